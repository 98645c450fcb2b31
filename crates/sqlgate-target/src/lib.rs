//! Access to target databases (SQLite through rusqlite, Postgres through
//! sqlx): connection-string parsing, catalog introspection, and bounded
//! statement execution.

mod dsn;
mod execute;
mod introspect;
mod pg;

pub use dsn::{Dialect, TargetDsn};
pub use execute::{execute, ExecutionLimits};
pub use introspect::{compose_type, discover, discover_async};
pub use pg::compose_pg_type;

#[derive(thiserror::Error, Debug)]
pub enum TargetError {
    #[error("unsupported dialect: {0}")]
    UnsupportedDialect(String),
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),
    #[error("statement cancelled before it started")]
    Cancelled,
    #[error("join error: {0}")]
    Join(String),
}
