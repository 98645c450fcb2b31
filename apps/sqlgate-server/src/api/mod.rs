pub mod history;
pub mod meta;
pub mod metrics;
pub mod query;
pub mod schema;
