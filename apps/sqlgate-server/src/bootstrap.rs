use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::http::{HeaderValue, Method};
use sqlgate_core::Settings;
use sqlgate_kernel::Kernel;
use sqlgate_policy::ApprovalPolicy;
use tracing::{info, warn};

use crate::{
    access_log,
    app_state::AppState,
    chart::HeuristicChartAdvisor,
    executor::QueryExecutor,
    llm::{LlmClient, OpenAiClient},
    orchestrator::Orchestrator,
    router::build_router,
    schema_catalog::SchemaCatalog,
    sql_generator::SqlGenerator,
};

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<AppState>,
    pub state: AppState,
}

/// Opens the state store, seeds configured connections and wires the
/// OpenAI-compatible client into the pipeline.
pub(crate) async fn build(settings: Arc<Settings>) -> anyhow::Result<BootstrapOutput> {
    let kernel = Kernel::open(&settings.server.state_dir)
        .with_context(|| format!("open state dir {}", settings.server.state_dir.display()))?;
    let llm = OpenAiClient::from_settings(&settings.llm)?;
    if settings.llm.api_key.is_none() {
        warn!("no LLM API key configured; generation and normalization will degrade");
    }
    assemble(settings, kernel, Arc::new(llm)).await
}

pub(crate) async fn assemble(
    settings: Arc<Settings>,
    kernel: Kernel,
    llm: Arc<dyn LlmClient>,
) -> anyhow::Result<BootstrapOutput> {
    for conn in &settings.connections {
        kernel.upsert_connection_async(conn).await?;
    }
    if !settings.connections.is_empty() {
        info!(count = settings.connections.len(), "connections seeded");
    }
    let orchestrator = orchestrator(&settings, kernel, llm);
    let (router, endpoints) = build_router();
    let state = AppState::new(
        Arc::new(orchestrator),
        settings,
        Arc::new(endpoints),
        sqlgate_otel::metrics_handle(),
    );
    Ok(BootstrapOutput { router, state })
}

pub(crate) fn orchestrator(settings: &Settings, kernel: Kernel, llm: Arc<dyn LlmClient>) -> Orchestrator {
    let kernel = Arc::new(kernel);
    Orchestrator::new(
        SqlGenerator::new(llm.clone(), settings.llm.translate_prompts),
        SchemaCatalog::new(llm, kernel.clone(), settings.llm.normalize_temperature),
        QueryExecutor::new(kernel.clone(), settings.execution.clone()),
        kernel,
        Arc::new(HeuristicChartAdvisor),
        ApprovalPolicy::new(settings.execution.require_sql_approval),
    )
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
    cors_origins: &[String],
) -> axum::Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::{
        compression::CompressionLayer,
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    };

    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let router = if origins.is_empty() {
        router
    } else {
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(Any),
        )
    };
    router
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit.max(1)))
}

pub(crate) fn attach_global_layers(router: axum::Router<()>) -> axum::Router<()> {
    router.layer(axum::middleware::from_fn(access_log::access_log_mw))
}

pub(crate) struct HttpConfig {
    pub addr: SocketAddr,
    pub concurrency_limit: usize,
}

pub(crate) fn http_config(settings: &Settings) -> anyhow::Result<HttpConfig> {
    let addr = settings
        .listen_addr()
        .parse()
        .map_err(|_| anyhow!("invalid bind address: {}", settings.listen_addr()))?;
    Ok(HttpConfig {
        addr,
        concurrency_limit: settings.server.concurrency_limit,
    })
}
