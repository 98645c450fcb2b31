//! Process-wide configuration, loaded once at startup and handed to each
//! component explicitly.

pub mod config;

pub use config::{
    config_schema_json, ConfigError, ExecutionSettings, LlmSettings, ServerSettings, Settings,
};
