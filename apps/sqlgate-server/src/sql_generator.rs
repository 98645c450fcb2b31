use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlgate_protocol::{GeneratedQuery, SchemaSnapshot};
use sqlgate_target::Dialect;
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, ChatRequest, LlmClient};

/// Substituted when the model reply holds no usable statement.
pub const INERT_FALLBACK: &str = "SELECT 1;";

const GENERATION_CONFIDENCE: f64 = 0.6;
const DEFAULT_MAX_TOKENS: u32 = 512;
const MAX_TOKENS_CAP: u32 = 4000;
const DEFAULT_TEMPERATURE: f32 = 0.1;
const TRANSLATE_MAX_TOKENS: u32 = 256;

const GENERATION_SYSTEM_PROMPT: &str = "You are a SQL expert. Generate a single, safe SQL statement for the user's request. \
Prefer SELECT queries and avoid DDL/DML unless explicitly requested. \
For textual filters, use case-insensitive comparisons by default.";

const TRANSLATE_SYSTEM_PROMPT: &str = "You are a professional translator. \
Translate the user input to clear, concise English. Return only the translated text.";

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("fenced block pattern"));
static FIRST_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)(select.*?)(;|$)").expect("select pattern"));
static WHERE_EQ_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"((?i:where))\s+([\w\."]+)\s*=\s*'([a-z]+)'"#).expect("where pattern")
});

/// Caller-tunable sampling for one generation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationParams {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationParams {
    fn temperature(&self) -> f32 {
        match self.temperature {
            Some(t) if t.is_finite() => t.clamp(0.0, 2.0),
            _ => DEFAULT_TEMPERATURE,
        }
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
            .unwrap_or(DEFAULT_MAX_TOKENS)
            .clamp(1, MAX_TOKENS_CAP)
    }
}

/// Turns a natural-language request into one candidate statement.
pub struct SqlGenerator {
    llm: Arc<dyn LlmClient>,
    translate_prompts: bool,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, translate_prompts: bool) -> Self {
        Self {
            llm,
            translate_prompts,
        }
    }

    pub fn provider(&self) -> &str {
        self.llm.provider()
    }

    /// Never fails. When the model is unreachable or its reply carries no
    /// SELECT, the result is the inert fallback with `degraded` set.
    pub async fn generate(
        &self,
        prompt: &str,
        schema: Option<&SchemaSnapshot>,
        dialect: Option<Dialect>,
        params: &GenerationParams,
    ) -> GeneratedQuery {
        let started = Instant::now();
        let working = if self.translate_prompts {
            self.translate(prompt).await
        } else {
            prompt.to_string()
        };

        let req = ChatRequest {
            model: params.model.clone(),
            messages: vec![
                ChatMessage::system(GENERATION_SYSTEM_PROMPT),
                ChatMessage::user(user_message(&working, schema)),
            ],
            temperature: params.temperature(),
            max_tokens: Some(params.max_tokens()),
        };
        info!(
            model = params.model.as_deref().unwrap_or("default"),
            with_schema = schema.is_some(),
            "generating statement"
        );

        let mut warnings = Vec::new();
        let extracted = match self.llm.complete(req).await {
            Ok(reply) => {
                let sql = extract_statement(&reply);
                if sql.is_none() {
                    warnings.push(
                        "model reply contained no SELECT statement; using inert fallback".into(),
                    );
                }
                sql
            }
            Err(err) => {
                warnings.push(format!("generation degraded: {}", err));
                None
            }
        };

        let generation_time_ms = started.elapsed().as_millis() as u64;
        let query = match extracted {
            Some(sql) => {
                let sql = match dialect {
                    Some(d) => rewrite_case_insensitive(&sql, d),
                    None => sql,
                };
                GeneratedQuery {
                    sql,
                    warnings,
                    confidence: GENERATION_CONFIDENCE,
                    generation_time_ms,
                    degraded: false,
                }
            }
            None => {
                metrics::counter!("sqlgate_generation_degraded_total").increment(1);
                warn!(warnings = ?warnings, "generation degraded to inert fallback");
                GeneratedQuery {
                    sql: INERT_FALLBACK.to_string(),
                    warnings,
                    confidence: 0.0,
                    generation_time_ms,
                    degraded: true,
                }
            }
        };
        info!(
            elapsed_ms = query.generation_time_ms,
            degraded = query.degraded,
            "generation finished"
        );
        query
    }

    /// Best effort: any failure or empty reply yields `text` unchanged.
    pub async fn translate(&self, text: &str) -> String {
        let req = ChatRequest {
            model: None,
            messages: vec![
                ChatMessage::system(TRANSLATE_SYSTEM_PROMPT),
                ChatMessage::user(text),
            ],
            temperature: 0.0,
            max_tokens: Some(TRANSLATE_MAX_TOKENS),
        };
        match self.llm.complete(req).await {
            Ok(out) if !out.trim().is_empty() => out.trim().to_string(),
            Ok(_) => text.to_string(),
            Err(err) => {
                debug!(error = %err, "prompt translation skipped");
                text.to_string()
            }
        }
    }
}

fn user_message(prompt: &str, schema: Option<&SchemaSnapshot>) -> String {
    let mut msg = format!("User request (English): {}\n", prompt);
    if let Some(snapshot) = schema {
        if let Ok(json) = serde_json::to_string(snapshot) {
            msg.push_str("\nDatabase schema (JSON):\n");
            msg.push_str(&json);
            msg.push('\n');
        }
    }
    msg.push_str("\nReturn only SQL in plain text. No explanations, no code fences.");
    msg
}

/// First SELECT statement of a model reply, terminated by exactly one `;`.
///
/// Fenced blocks are dropped whole, contents included, and stray backticks
/// become spaces before the search. `None` when no SELECT remains.
pub fn extract_statement(reply: &str) -> Option<String> {
    let text = FENCED_BLOCK.replace_all(reply, " ").replace('`', " ");
    let caps = FIRST_SELECT.captures(&text)?;
    let body = caps.get(1)?.as_str().trim().trim_end_matches(';').trim_end();
    if body.is_empty() {
        return None;
    }
    Some(format!("{};", body))
}

/// Rewrites `WHERE col = '<lowercase>'` into the dialect's case-insensitive
/// comparison. Matches that start inside a quoted string are left alone.
pub fn rewrite_case_insensitive(sql: &str, dialect: Dialect) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for caps in WHERE_EQ_LITERAL.captures_iter(sql) {
        let (Some(whole), Some(kw), Some(col), Some(lit)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        if sql[..whole.start()].matches('\'').count() % 2 != 0 {
            continue;
        }
        let Some(cmp) = dialect.case_insensitive_eq(col.as_str(), lit.as_str()) else {
            continue;
        };
        out.push_str(&sql[last..whole.start()]);
        out.push_str(kw.as_str());
        out.push(' ');
        out.push_str(&cmp);
        last = whole.end();
    }
    out.push_str(&sql[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::test_support::ScriptedLlm;
    use sqlgate_protocol::SnapshotSource;

    #[test]
    fn fenced_blocks_are_dropped_with_contents() {
        assert_eq!(
            extract_statement("```sql\nSELECT 1;\n```extra text").as_deref(),
            None
        );
        assert_eq!(
            extract_statement("```sql\nSELECT id FROM orders;\n```").as_deref(),
            None
        );
        assert_eq!(
            extract_statement("```\nnotes\n``` then SELECT name FROM t").as_deref(),
            Some("SELECT name FROM t;")
        );
        assert_eq!(
            extract_statement("Sure:\nselect id from orders;\nThanks").as_deref(),
            Some("select id from orders;")
        );
        assert_eq!(
            extract_statement("`SELECT * FROM t`").as_deref(),
            Some("SELECT * FROM t;")
        );
        assert_eq!(
            extract_statement("SELECT a FROM t;;").as_deref(),
            Some("SELECT a FROM t;")
        );
    }

    #[test]
    fn no_select_means_none() {
        assert!(extract_statement("DROP TABLE orders;").is_none());
        assert!(extract_statement("").is_none());
    }

    #[test]
    fn rewrites_lowercase_literals_outside_strings() {
        assert_eq!(
            rewrite_case_insensitive("SELECT * FROM cars where make = 'bmw';", Dialect::Sqlite),
            "SELECT * FROM cars where make = 'bmw' COLLATE NOCASE;"
        );
        assert_eq!(
            rewrite_case_insensitive("SELECT * FROM c WHERE c.make='bmw'", Dialect::Postgres),
            "SELECT * FROM c WHERE c.make ILIKE 'bmw'"
        );
        // mixed-case literal is not a candidate
        let sql = "SELECT * FROM c WHERE make = 'BMW'";
        assert_eq!(rewrite_case_insensitive(sql, Dialect::Sqlite), sql);
        // starts inside a string literal
        let sql = "SELECT 'where a = 'b'' AS s";
        assert_eq!(rewrite_case_insensitive(sql, Dialect::Sqlite), sql);
        let sql = "SELECT * FROM c WHERE make = 'bmw'";
        assert_eq!(rewrite_case_insensitive(sql, Dialect::MySql), sql);
    }

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot {
            connection_id: 1,
            database: "shop".into(),
            source: SnapshotSource::Raw,
            tables: Vec::new(),
        }
    }

    #[tokio::test]
    async fn generation_uses_schema_and_clamps_params() {
        let llm = ScriptedLlm::replying(["SELECT id FROM orders WHERE status = 'open'"]);
        let generator = SqlGenerator::new(llm.clone(), false);
        let snap = snapshot();
        let out = generator
            .generate(
                "open orders",
                Some(&snap),
                Some(Dialect::Sqlite),
                &GenerationParams {
                    model: Some("gpt-4o".into()),
                    temperature: Some(5.0),
                    max_tokens: Some(100_000),
                },
            )
            .await;
        assert_eq!(
            out.sql,
            "SELECT id FROM orders WHERE status = 'open' COLLATE NOCASE;"
        );
        assert!(!out.degraded);
        assert_eq!(out.confidence, 0.6);

        let reqs = llm.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].temperature, 2.0);
        assert_eq!(reqs[0].max_tokens, Some(4000));
        assert_eq!(reqs[0].model.as_deref(), Some("gpt-4o"));
        assert!(reqs[0].messages[1].content.contains("Database schema (JSON)"));
        assert!(reqs[0].messages[1]
            .content
            .starts_with("User request (English): open orders"));
    }

    #[tokio::test]
    async fn no_select_falls_back_without_error() {
        let llm = ScriptedLlm::replying(["I cannot help with that."]);
        let out = SqlGenerator::new(llm, false)
            .generate("delete everything", None, None, &GenerationParams::default())
            .await;
        assert_eq!(out.sql, INERT_FALLBACK);
        assert!(out.degraded);
        assert_eq!(out.confidence, 0.0);
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn fenced_only_reply_degrades_to_fallback() {
        let llm = ScriptedLlm::replying(["```sql\nSELECT 1;\n```extra text"]);
        let out = SqlGenerator::new(llm, false)
            .generate("one", None, None, &GenerationParams::default())
            .await;
        assert_eq!(out.sql, "SELECT 1;");
        assert!(out.degraded);
        assert_eq!(out.confidence, 0.0);
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_model_degrades() {
        let out = SqlGenerator::new(ScriptedLlm::unavailable(), false)
            .generate("anything", None, None, &GenerationParams::default())
            .await;
        assert_eq!(out.sql, INERT_FALLBACK);
        assert!(out.degraded);
        assert!(out.warnings[0].starts_with("generation degraded"));
    }

    #[tokio::test]
    async fn translation_failure_keeps_original_prompt() {
        let llm = std::sync::Arc::new(ScriptedLlm::new());
        llm.push_err(LlmError::Empty);
        llm.push_ok("SELECT 1");
        let out = SqlGenerator::new(llm.clone(), true)
            .generate("wie viele autos", None, None, &GenerationParams::default())
            .await;
        assert_eq!(out.sql, "SELECT 1;");
        let reqs = llm.requests();
        assert_eq!(reqs[0].temperature, 0.0);
        assert_eq!(reqs[0].max_tokens, Some(256));
        assert!(reqs[1].messages[1].content.contains("wie viele autos"));
        assert_eq!(reqs[1].max_tokens, Some(512));
        assert_eq!(reqs[1].temperature, 0.1);
    }

    #[tokio::test]
    async fn translated_prompt_feeds_generation() {
        let llm = ScriptedLlm::replying(["how many cars", "SELECT COUNT(*) FROM cars"]);
        let out = SqlGenerator::new(llm.clone(), true)
            .generate("wie viele autos", None, None, &GenerationParams::default())
            .await;
        assert_eq!(out.sql, "SELECT COUNT(*) FROM cars;");
        assert!(llm.requests()[1].messages[1]
            .content
            .contains("User request (English): how many cars"));
    }
}
