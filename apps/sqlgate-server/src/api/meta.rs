use axum::response::IntoResponse;
use axum::{extract::State, Json};
use serde_json::json;
use utoipa::OpenApi;

use crate::AppState;

pub const MODELS: [&str; 12] = [
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-3.5-turbo",
    "claude-3-5-sonnet",
    "claude-3-haiku",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "llama-3.1-8b",
    "llama-3.1-70b",
    "mixtral-8x7b",
    "qwen2.5-7b",
];

/// Service banner.
#[utoipa::path(
    get,
    path = "/",
    tag = "Meta",
    responses((status = 200, description = "Banner", body = crate::openapi::RootResponse))
)]
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "sqlgate API",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": crate::router::paths::OPENAPI,
        "status": "running",
    }))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Meta",
    responses((status = 200, description = "Service healthy", body = crate::openapi::HealthResponse))
)]
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

/// Service metadata and endpoints index.
#[utoipa::path(
    get,
    path = "/about",
    tag = "Meta",
    responses((status = 200, description = "Service metadata", body = crate::openapi::AboutResponse))
)]
pub async fn about(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.settings();
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "http": {"bind": settings.server.bind, "port": settings.server.port},
        "llm": {"provider": settings.llm.provider, "model": settings.llm.model},
        "endpoints": state.endpoints(),
    }))
}

/// Models a client may request.
#[utoipa::path(
    get,
    path = "/api/query/models",
    tag = "Query",
    responses((status = 200, description = "Model names", body = [String]))
)]
pub async fn models() -> impl IntoResponse {
    Json(MODELS)
}

pub async fn openapi_json() -> impl IntoResponse {
    Json(crate::openapi::ApiDoc::openapi())
}
