use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlgate_protocol::{ConnectionId, SchemaSnapshot};
use utoipa::ToSchema;

use crate::error::OrchestratorError;
use crate::AppState;

/// Body of a discovery request. Absent or empty means "use the stored
/// connection string".
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DiscoverRequest {
    #[serde(default)]
    pub connection_string: Option<String>,
}

fn discover_body(body: &Bytes) -> Result<DiscoverRequest, OrchestratorError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DiscoverRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| OrchestratorError::Invalid(format!("invalid discovery body: {}", e)))
}

async fn run_discovery(
    state: &AppState,
    connection_id: ConnectionId,
    body: &Bytes,
    message: &str,
) -> Result<Json<Value>, OrchestratorError> {
    let req = discover_body(body)?;
    let snapshot = state
        .orchestrator()
        .discover_schema(connection_id, req.connection_string.as_deref())
        .await?;
    Ok(Json(json!({"message": message, "schema": snapshot})))
}

/// Introspect the target, normalize and store its snapshot.
#[utoipa::path(
    post,
    path = "/api/schema/{connection_id}/discover",
    tag = "Schema",
    params(("connection_id" = i64, Path, description = "Connection id")),
    request_body = DiscoverRequest,
    responses(
        (status = 200, description = "Snapshot saved", body = serde_json::Value),
        (status = 400, description = "Introspection failed", body = sqlgate_protocol::ProblemDetails),
        (status = 404, description = "Unknown connection", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn discover(
    State(state): State<AppState>,
    Path(connection_id): Path<ConnectionId>,
    body: Bytes,
) -> Result<Json<Value>, OrchestratorError> {
    run_discovery(&state, connection_id, &body, "Schema discovered and saved").await
}

#[utoipa::path(
    post,
    path = "/api/schema/{connection_id}/refresh",
    tag = "Schema",
    params(("connection_id" = i64, Path, description = "Connection id")),
    request_body = DiscoverRequest,
    responses(
        (status = 200, description = "Snapshot replaced", body = serde_json::Value),
        (status = 400, description = "Introspection failed", body = sqlgate_protocol::ProblemDetails),
        (status = 404, description = "Unknown connection", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Path(connection_id): Path<ConnectionId>,
    body: Bytes,
) -> Result<Json<Value>, OrchestratorError> {
    run_discovery(&state, connection_id, &body, "Schema refreshed").await
}

#[utoipa::path(
    get,
    path = "/api/schema/{connection_id}",
    tag = "Schema",
    params(("connection_id" = i64, Path, description = "Connection id")),
    responses(
        (status = 200, description = "Stored snapshot", body = SchemaSnapshot),
        (status = 404, description = "No snapshot yet", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn get_schema(
    State(state): State<AppState>,
    Path(connection_id): Path<ConnectionId>,
) -> Result<Json<SchemaSnapshot>, OrchestratorError> {
    Ok(Json(state.orchestrator().get_schema(connection_id).await?))
}

/// Table names of the stored snapshot.
#[utoipa::path(
    get,
    path = "/api/schema/{connection_id}/tables",
    tag = "Schema",
    params(("connection_id" = i64, Path, description = "Connection id")),
    responses((status = 200, description = "Table names, empty without a snapshot", body = serde_json::Value))
)]
pub async fn tables(
    State(state): State<AppState>,
    Path(connection_id): Path<ConnectionId>,
) -> Result<Json<Value>, OrchestratorError> {
    let tables = state.orchestrator().schema_tables(connection_id).await?;
    Ok(Json(json!({ "tables": tables })))
}

#[utoipa::path(
    get,
    path = "/api/schema/{connection_id}/tables/{table_name}",
    tag = "Schema",
    params(
        ("connection_id" = i64, Path, description = "Connection id"),
        ("table_name" = String, Path, description = "Table name")
    ),
    responses((status = 200, description = "Table, or a column-less stub when unknown", body = serde_json::Value))
)]
pub async fn table(
    State(state): State<AppState>,
    Path((connection_id, table_name)): Path<(ConnectionId, String)>,
) -> Result<Json<Value>, OrchestratorError> {
    let found = state
        .orchestrator()
        .schema_table(connection_id, &table_name)
        .await?;
    Ok(Json(match found {
        Some(t) => serde_json::to_value(t).map_err(|e| OrchestratorError::Internal(e.to_string()))?,
        None => json!({"name": table_name, "columns": []}),
    }))
}
