use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::responses;

/// Failures surfaced synchronously to a caller. Execution failures are not
/// errors; they travel inside `ExecutionResult`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("statement blocked by guardrails: {}", warnings.join("; "))]
    ValidationBlocked { warnings: Vec<String> },
    #[error("{0}")]
    NotFound(String),
    #[error("schema introspection failed: {0}")]
    Introspection(String),
    #[error("{0}")]
    Invalid(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn status(&self) -> StatusCode {
        match self {
            OrchestratorError::ValidationBlocked { .. } => StatusCode::BAD_REQUEST,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::Introspection(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::Invalid(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = self.status();
        let warnings = match &self {
            OrchestratorError::ValidationBlocked { warnings } => warnings.clone(),
            _ => Vec::new(),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        responses::problem(status, Some(self.to_string()), warnings)
    }
}
