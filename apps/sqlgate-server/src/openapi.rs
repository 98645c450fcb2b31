use utoipa::{OpenApi, ToSchema};

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
    pub docs: String,
    pub status: String,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HttpInfo {
    pub bind: String,
    pub port: u16,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct LlmInfo {
    pub provider: String,
    pub model: String,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct AboutResponse {
    pub service: String,
    pub version: String,
    pub http: HttpInfo,
    pub llm: LlmInfo,
    #[schema(example = json!(["GET /health", "POST /api/query/generate"]))]
    pub endpoints: Vec<String>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::meta::root,
        crate::api::meta::health,
        crate::api::meta::about,
        crate::api::meta::models,
        crate::api::metrics::metrics_prometheus,
        crate::api::query::generate,
        crate::api::query::execute,
        crate::api::query::generate_and_execute,
        crate::api::query::generate_execute_suggest,
        crate::api::query::suggest_chart,
        crate::api::schema::discover,
        crate::api::schema::refresh,
        crate::api::schema::get_schema,
        crate::api::schema::tables,
        crate::api::schema::table,
        crate::api::history::list,
        crate::api::history::pin,
        crate::api::history::rerun,
        crate::api::history::delete,
    ),
    components(schemas(
        RootResponse,
        HealthResponse,
        HttpInfo,
        LlmInfo,
        AboutResponse,
        crate::api::schema::DiscoverRequest,
        sqlgate_protocol::ProblemDetails,
        sqlgate_protocol::GenerateRequest,
        sqlgate_protocol::GeneratedQuery,
        sqlgate_protocol::ExecuteRequest,
        sqlgate_protocol::ExecutionResult,
        sqlgate_protocol::ChartRequest,
        sqlgate_protocol::ChartSuggestion,
        sqlgate_protocol::GenerateExecuteSuggestResponse,
        sqlgate_protocol::SchemaSnapshot,
        sqlgate_protocol::SnapshotSource,
        sqlgate_protocol::TableSchema,
        sqlgate_protocol::ColumnSchema,
        sqlgate_protocol::HistoryRecord,
    )),
    tags(
        (name = "Meta", description = "Service banner, health and index"),
        (name = "Query", description = "Generate, validate and execute statements"),
        (name = "Schema", description = "Schema discovery and snapshots"),
        (name = "History", description = "Execution history")
    )
)]
pub struct ApiDoc;
