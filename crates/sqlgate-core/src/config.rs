use jsonschema::validator_for;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlgate_protocol::ConnectionDescriptor;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;


#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("configuration schema error: {0}")]
    Schema(String),
    #[error("invalid configuration: {}", .0.join(", "))]
    Invalid(Vec<String>),
    #[error("invalid value for {key}: {value:?}")]
    Env { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// Address the HTTP listener binds to.
    pub bind: String,
    pub port: u16,
    /// Maximum in-flight requests across the service.
    pub concurrency_limit: usize,
    /// Directory holding the service's own SQLite state.
    pub state_dir: PathBuf,
    /// Allowed CORS origins; empty disables cross-origin access.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8000,
            concurrency_limit: 256,
            state_dir: PathBuf::from("./state"),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionSettings {
    /// Upper bound, and default, for a statement's wall-clock time.
    pub max_execution_time_seconds: u64,
    /// Rows returned per statement; further rows are not fetched.
    pub max_rows_returned: usize,
    /// Run the guardrail before every explicit execute request.
    pub require_sql_approval: bool,
    /// Open target databases read-only.
    pub read_only_mode: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_execution_time_seconds: 300,
            max_rows_returned: 10_000,
            require_sql_approval: false,
            read_only_mode: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct LlmSettings {
    pub provider: String,
    /// OpenAI-compatible endpoint root, without the `/v1` suffix.
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_seconds: u64,
    /// Translate prompts to English before generation.
    pub translate_prompts: bool,
    /// Sampling temperature for schema normalization.
    pub normalize_temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            base_url: "https://api.openai.com".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            timeout_seconds: 20,
            translate_prompts: true,
            normalize_temperature: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: ServerSettings,
    pub execution: ExecutionSettings,
    pub llm: LlmSettings,
    /// Target connections registered at startup.
    pub connections: Vec<ConnectionDescriptor>,
}

/// Returns the JSON schema describing the configuration file.
pub fn config_schema_json() -> Result<serde_json::Value, ConfigError> {
    let schema = schemars::schema_for!(Settings);
    serde_json::to_value(&schema).map_err(|e| ConfigError::Schema(e.to_string()))
}

impl Settings {
    /// Settings from `SQLGATE_CONFIG` (if set) plus `SQLGATE_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::load`] with an explicit variable lookup.
    pub fn load_with<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match env("SQLGATE_CONFIG") {
            Some(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        settings.apply_env(&env)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML, checking it against the configuration schema first so
    /// unknown keys and mistyped values are reported together.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: toml::Value =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let json_value =
            serde_json::to_value(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let schema = config_schema_json()?;
        let validator = validator_for(&schema).map_err(|e| ConfigError::Schema(e.to_string()))?;
        let validation_errors: Vec<String> = validator
            .iter_errors(&json_value)
            .map(|e| e.to_string())
            .collect();
        if !validation_errors.is_empty() {
            return Err(ConfigError::Invalid(validation_errors));
        }
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_string(env, "SQLGATE_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env_parsed(env, "SQLGATE_PORT")? {
            self.server.port = v;
        }
        if let Some(v) = env_string(env, "SQLGATE_STATE_DIR") {
            self.server.state_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parsed(env, "SQLGATE_MAX_EXECUTION_TIME_SECONDS")? {
            self.execution.max_execution_time_seconds = v;
        }
        if let Some(v) = env_parsed(env, "SQLGATE_MAX_ROWS_RETURNED")? {
            self.execution.max_rows_returned = v;
        }
        if let Some(v) = env_flag(env, "SQLGATE_REQUIRE_SQL_APPROVAL")? {
            self.execution.require_sql_approval = v;
        }
        if let Some(v) = env_flag(env, "SQLGATE_READ_ONLY_MODE")? {
            self.execution.read_only_mode = v;
        }
        if let Some(v) = env_string(env, "SQLGATE_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) =
            env_string(env, "SQLGATE_LLM_API_KEY").or_else(|| env_string(env, "OPENAI_API_KEY"))
        {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = env_string(env, "SQLGATE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env_parsed(env, "SQLGATE_LLM_TIMEOUT_SECS")? {
            self.llm.timeout_seconds = v;
        }
        if let Some(v) = env_flag(env, "SQLGATE_TRANSLATE_PROMPTS")? {
            self.llm.translate_prompts = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.execution.max_rows_returned < 1 {
            problems.push("execution.max_rows_returned must be at least 1".to_string());
        }
        if !(1..=3600).contains(&self.execution.max_execution_time_seconds) {
            problems.push("execution.max_execution_time_seconds must be within 1..=3600".to_string());
        }
        if self.server.concurrency_limit < 1 {
            problems.push("server.concurrency_limit must be at least 1".to_string());
        }
        if self.llm.timeout_seconds < 1 {
            problems.push("llm.timeout_seconds must be at least 1".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.normalize_temperature) {
            problems.push("llm.normalize_temperature must be within 0..=2".to_string());
        }
        let mut seen = HashSet::new();
        for conn in &self.connections {
            if !seen.insert(conn.id) {
                problems.push(format!("duplicate connection id {}", conn.id));
            }
            if conn.connection_string.trim().is_empty() {
                problems.push(format!("connection {} has an empty connection_string", conn.id));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

fn env_string<F>(env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T, F>(env: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match env_string(env, key) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::Env {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn env_flag<F>(env: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match env_string(env, key) {
        None => Ok(None),
        Some(raw) => flag_word(&raw).map(Some).ok_or(ConfigError::Env {
            key: key.to_string(),
            value: raw,
        }),
    }
}

/// 1/0, true/false, yes/no, on/off in any case.
fn flag_word(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::load_with(lookup(&[])).unwrap();
        assert_eq!(s.execution.max_execution_time_seconds, 300);
        assert_eq!(s.execution.max_rows_returned, 10_000);
        assert!(!s.execution.require_sql_approval);
        assert!(s.execution.read_only_mode);
        assert_eq!(s.llm.model, "gpt-4o-mini");
        assert_eq!(s.llm.provider, "openai");
        assert!(s.llm.api_key.is_none());
        assert_eq!(s.listen_addr(), "127.0.0.1:8000");
    }

    #[test]
    fn toml_file_with_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlgate.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9090

[execution]
max_rows_returned = 50
require_sql_approval = true

[[connections]]
id = 1
name = "shop"
connection_string = "sqlite:////var/data/shop.db"
"#,
        )
        .unwrap();
        let cfg = path.display().to_string();
        let s = Settings::load_with(lookup(&[("SQLGATE_CONFIG", cfg.as_str())])).unwrap();
        assert_eq!(s.server.port, 9090);
        assert_eq!(s.server.bind, "127.0.0.1");
        assert_eq!(s.execution.max_rows_returned, 50);
        assert!(s.execution.require_sql_approval);
        assert!(s.execution.read_only_mode);
        assert_eq!(s.connections.len(), 1);
        assert_eq!(s.connections[0].name, "shop");
    }

    #[test]
    fn unknown_keys_and_bad_types_are_rejected() {
        let err = Settings::from_toml_str("[execution]\nmax_rows = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
        let err = Settings::from_toml_str("[server]\nport = \"eighty\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
        let err = Settings::from_toml_str("[server\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err =
            Settings::load_with(lookup(&[("SQLGATE_CONFIG", "/nonexistent/sqlgate.toml")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn env_overrides_win() {
        let s = Settings::load_with(lookup(&[
            ("SQLGATE_PORT", "8123"),
            ("SQLGATE_MAX_ROWS_RETURNED", "7"),
            ("SQLGATE_REQUIRE_SQL_APPROVAL", "yes"),
            ("SQLGATE_READ_ONLY_MODE", "off"),
            ("SQLGATE_LLM_MODEL", "gpt-4o"),
            ("SQLGATE_TRANSLATE_PROMPTS", "0"),
            ("OPENAI_API_KEY", "sk-fallback"),
        ]))
        .unwrap();
        assert_eq!(s.server.port, 8123);
        assert_eq!(s.execution.max_rows_returned, 7);
        assert!(s.execution.require_sql_approval);
        assert!(!s.execution.read_only_mode);
        assert_eq!(s.llm.model, "gpt-4o");
        assert!(!s.llm.translate_prompts);
        assert_eq!(s.llm.api_key.as_deref(), Some("sk-fallback"));
    }

    #[test]
    fn dedicated_api_key_beats_openai_fallback() {
        let s = Settings::load_with(lookup(&[
            ("SQLGATE_LLM_API_KEY", "sk-own"),
            ("OPENAI_API_KEY", "sk-fallback"),
        ]))
        .unwrap();
        assert_eq!(s.llm.api_key.as_deref(), Some("sk-own"));
    }

    #[test]
    fn malformed_env_values_fail() {
        let err = Settings::load_with(lookup(&[("SQLGATE_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref key, .. } if key == "SQLGATE_PORT"));
        let err =
            Settings::load_with(lookup(&[("SQLGATE_READ_ONLY_MODE", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn flag_env_values_accept_common_spellings() {
        for (raw, want) in [("1", true), ("TRUE", true), (" yes ", true), ("On", true)] {
            let s = Settings::load_with(lookup(&[("SQLGATE_REQUIRE_SQL_APPROVAL", raw)])).unwrap();
            assert_eq!(s.execution.require_sql_approval, want, "{raw:?}");
        }
        for raw in ["0", "false", "No", "OFF"] {
            let s = Settings::load_with(lookup(&[("SQLGATE_READ_ONLY_MODE", raw)])).unwrap();
            assert!(!s.execution.read_only_mode, "{raw:?}");
        }
        assert_eq!(flag_word(""), None);
    }

    #[test]
    fn validation_bounds() {
        let err =
            Settings::load_with(lookup(&[("SQLGATE_MAX_ROWS_RETURNED", "0")])).unwrap_err();
        assert!(err.to_string().contains("max_rows_returned"));
        let err = Settings::load_with(lookup(&[("SQLGATE_MAX_EXECUTION_TIME_SECONDS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("max_execution_time_seconds"));

        let mut s = Settings::default();
        let conn = ConnectionDescriptor {
            id: 1,
            name: "a".into(),
            connection_string: "sqlite://".into(),
        };
        s.connections = vec![conn.clone(), conn];
        assert!(s.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn schema_exposes_sections() {
        let schema = config_schema_json().unwrap();
        let props = &schema["properties"];
        for section in ["server", "execution", "llm", "connections"] {
            assert!(props.get(section).is_some(), "{section}");
        }
    }
}
