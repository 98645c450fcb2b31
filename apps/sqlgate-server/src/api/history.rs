use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlgate_protocol::ExecutionResult;
use utoipa::IntoParams;

use crate::error::OrchestratorError;
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Defaults to 50; clamped to 1..=500.
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PinParams {
    #[serde(default = "default_pinned")]
    pub pinned: bool,
}

fn default_pinned() -> bool {
    true
}

/// Pinned records first, then newest first.
#[utoipa::path(
    get,
    path = "/api/history",
    tag = "History",
    params(ListParams),
    responses((status = 200, description = "History records under `items`", body = serde_json::Value))
)]
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, OrchestratorError> {
    let items = state.orchestrator().list_history(params.limit).await?;
    Ok(Json(json!({ "items": items })))
}

#[utoipa::path(
    post,
    path = "/api/history/{id}/pin",
    tag = "History",
    params(("id" = i64, Path, description = "History id"), PinParams),
    responses(
        (status = 200, description = "Pin state updated", body = serde_json::Value),
        (status = 404, description = "Unknown record", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn pin(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<PinParams>,
) -> Result<Json<Value>, OrchestratorError> {
    state.orchestrator().set_pinned(id, params.pinned).await?;
    Ok(Json(json!({"success": true, "pinned": params.pinned})))
}

/// Re-execute a stored statement. Stored statements skip the guardrail.
#[utoipa::path(
    post,
    path = "/api/history/{id}/rerun",
    tag = "History",
    params(("id" = i64, Path, description = "History id")),
    responses(
        (status = 200, description = "Execution result", body = ExecutionResult),
        (status = 404, description = "Unknown record or connection", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn rerun(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ExecutionResult>, OrchestratorError> {
    Ok(Json(state.orchestrator().rerun(id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/history/{id}",
    tag = "History",
    params(("id" = i64, Path, description = "History id")),
    responses(
        (status = 200, description = "Deleted", body = serde_json::Value),
        (status = 404, description = "Unknown record", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, OrchestratorError> {
    state.orchestrator().delete_history(id).await?;
    Ok(Json(json!({"success": true})))
}
