use std::mem;

use axum::{
    handler::Handler,
    routing::{delete, get, post},
    Router,
};

use crate::{api, AppState};

/// Routes plus the `METHOD path` index served by `/about`.
pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
        }
    }

    fn record(&mut self, method: &str, path: &'static str) {
        self.endpoints.push(format!("{} {}", method, path));
    }

    pub fn route_get<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.record("GET", path);
        let router = mem::take(&mut self.router);
        self.router = router.route(path, get(handler));
        self
    }

    pub fn route_post<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.record("POST", path);
        let router = mem::take(&mut self.router);
        self.router = router.route(path, post(handler));
        self
    }

    pub fn route_delete<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.record("DELETE", path);
        let router = mem::take(&mut self.router);
        self.router = router.route(path, delete(handler));
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>) {
        (self.router, self.endpoints)
    }
}

pub(crate) mod paths {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
    pub const OPENAPI: &str = "/api/openapi.json";
    pub const METRICS: &str = "/metrics";

    pub const QUERY_MODELS: &str = "/api/query/models";
    pub const QUERY_GENERATE: &str = "/api/query/generate";
    pub const QUERY_EXECUTE: &str = "/api/query/execute";
    pub const QUERY_GENERATE_AND_EXECUTE: &str = "/api/query/generate-and-execute";
    pub const QUERY_GENERATE_EXECUTE_SUGGEST: &str = "/api/query/generate-execute-suggest";
    pub const QUERY_SUGGEST_CHART: &str = "/api/query/suggest-chart";

    pub const SCHEMA: &str = "/api/schema/{connection_id}";
    pub const SCHEMA_DISCOVER: &str = "/api/schema/{connection_id}/discover";
    pub const SCHEMA_REFRESH: &str = "/api/schema/{connection_id}/refresh";
    pub const SCHEMA_TABLES: &str = "/api/schema/{connection_id}/tables";
    pub const SCHEMA_TABLE: &str = "/api/schema/{connection_id}/tables/{table_name}";

    pub const HISTORY: &str = "/api/history";
    pub const HISTORY_ITEM: &str = "/api/history/{id}";
    pub const HISTORY_PIN: &str = "/api/history/{id}/pin";
    pub const HISTORY_RERUN: &str = "/api/history/{id}/rerun";
}

pub(crate) fn build_router() -> (Router<AppState>, Vec<String>) {
    let mut builder = RouterBuilder::new();
    builder
        .route_get(paths::ROOT, api::meta::root)
        .route_get(paths::HEALTH, api::meta::health)
        .route_get(paths::ABOUT, api::meta::about)
        .route_get(paths::OPENAPI, api::meta::openapi_json)
        .route_get(paths::METRICS, api::metrics::metrics_prometheus)
        .route_get(paths::QUERY_MODELS, api::meta::models)
        .route_post(paths::QUERY_GENERATE, api::query::generate)
        .route_post(paths::QUERY_EXECUTE, api::query::execute)
        .route_post(
            paths::QUERY_GENERATE_AND_EXECUTE,
            api::query::generate_and_execute,
        )
        .route_post(
            paths::QUERY_GENERATE_EXECUTE_SUGGEST,
            api::query::generate_execute_suggest,
        )
        .route_post(paths::QUERY_SUGGEST_CHART, api::query::suggest_chart)
        .route_get(paths::SCHEMA, api::schema::get_schema)
        .route_post(paths::SCHEMA_DISCOVER, api::schema::discover)
        .route_post(paths::SCHEMA_REFRESH, api::schema::refresh)
        .route_get(paths::SCHEMA_TABLES, api::schema::tables)
        .route_get(paths::SCHEMA_TABLE, api::schema::table)
        .route_get(paths::HISTORY, api::history::list)
        .route_delete(paths::HISTORY_ITEM, api::history::delete)
        .route_post(paths::HISTORY_PIN, api::history::pin)
        .route_post(paths::HISTORY_RERUN, api::history::rerun);
    builder.build()
}
