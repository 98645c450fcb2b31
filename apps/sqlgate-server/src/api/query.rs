use axum::{extract::State, Json};
use sqlgate_protocol::{
    ChartRequest, ChartSuggestion, ExecuteRequest, ExecutionResult, GenerateExecuteSuggestResponse,
    GenerateRequest, GeneratedQuery,
};

use crate::error::OrchestratorError;
use crate::AppState;

/// Generate a statement from a natural-language prompt.
#[utoipa::path(
    post,
    path = "/api/query/generate",
    tag = "Query",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Generated statement", body = GeneratedQuery),
        (status = 400, description = "Blocked by guardrails", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GeneratedQuery>, OrchestratorError> {
    Ok(Json(state.orchestrator().generate(&req).await?))
}

/// Execute a statement against a stored connection.
#[utoipa::path(
    post,
    path = "/api/query/execute",
    tag = "Query",
    request_body = ExecuteRequest,
    responses(
        (status = 200, description = "Execution result; engine failures set success=false", body = ExecutionResult),
        (status = 400, description = "Blocked by guardrails", body = sqlgate_protocol::ProblemDetails),
        (status = 404, description = "Unknown connection", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecutionResult>, OrchestratorError> {
    Ok(Json(state.orchestrator().execute(&req).await?))
}

#[utoipa::path(
    post,
    path = "/api/query/generate-and-execute",
    tag = "Query",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Execution result of the generated statement", body = ExecutionResult),
        (status = 400, description = "Blocked by guardrails", body = sqlgate_protocol::ProblemDetails),
        (status = 404, description = "Unknown connection", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn generate_and_execute(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<ExecutionResult>, OrchestratorError> {
    let (_, result) = state.orchestrator().generate_and_execute(&req).await?;
    Ok(Json(result))
}

#[utoipa::path(
    post,
    path = "/api/query/generate-execute-suggest",
    tag = "Query",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Statement, its result and a chart suggestion", body = GenerateExecuteSuggestResponse),
        (status = 400, description = "Blocked by guardrails", body = sqlgate_protocol::ProblemDetails),
        (status = 404, description = "Unknown connection", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn generate_execute_suggest(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateExecuteSuggestResponse>, OrchestratorError> {
    Ok(Json(state.orchestrator().generate_execute_suggest(&req).await?))
}

#[utoipa::path(
    post,
    path = "/api/query/suggest-chart",
    tag = "Query",
    request_body = ChartRequest,
    responses(
        (status = 200, description = "Chart suggestion", body = ChartSuggestion),
        (status = 400, description = "No columns provided", body = sqlgate_protocol::ProblemDetails)
    )
)]
pub async fn suggest_chart(
    State(state): State<AppState>,
    Json(req): Json<ChartRequest>,
) -> Result<Json<ChartSuggestion>, OrchestratorError> {
    Ok(Json(state.orchestrator().suggest_chart(&req).await?))
}
