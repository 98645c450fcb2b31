use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use sqlgate_core::LlmSettings;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm provider unavailable: {0}")]
    Unavailable(String),
    #[error("llm request failed: {0}")]
    Http(String),
    #[error("llm returned status {status}")]
    Status { status: u16, body: String },
    #[error("llm reply could not be decoded: {0}")]
    Decode(String),
    #[error("llm reply was empty")]
    Empty,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    /// `None` uses the client's configured model.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// A chat-completion backend. Replies are the first choice's text.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> &str;
    async fn complete(&self, req: ChatRequest) -> Result<String, LlmError>;
}

/// OpenAI-compatible `/v1/chat/completions` client.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("sqlgate-server/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(settings.timeout_seconds.max(1)))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        let base_url = settings.base_url.trim().trim_end_matches('/');
        Ok(Self {
            http,
            api_url: format!("{}/v1/chat/completions", base_url),
            api_key: settings
                .api_key
                .as_ref()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            model: settings.model.clone(),
        })
    }

    fn body(&self, req: &ChatRequest) -> Value {
        let mut body = json!({
            "model": req.model.as_deref().unwrap_or(&self.model),
            "messages": req.messages,
            "temperature": req.temperature,
        });
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn complete(&self, req: ChatRequest) -> Result<String, LlmError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(LlmError::Unavailable("no API key configured".into()));
        };
        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(key)
            .json(&self.body(&req))
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).chars().take(512).collect();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }
        first_choice_text(&bytes)
    }
}

fn first_choice_text(bytes: &[u8]) -> Result<String, LlmError> {
    let v: Value = serde_json::from_slice(bytes).map_err(|e| LlmError::Decode(e.to_string()))?;
    let text = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| LlmError::Decode("missing choices[0].message.content".into()))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(LlmError::Empty);
    }
    Ok(text.to_string())
}
