use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::AppState;

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Meta",
    responses(
        (status = 200, description = "Prometheus metrics", content_type = "text/plain", body = String),
        (status = 503, description = "No metrics recorder installed")
    )
)]
pub async fn metrics_prometheus(State(state): State<AppState>) -> Response {
    let Some(handle) = state.metrics() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder unavailable").into_response();
    };
    let mut response = Response::new(handle.render().into());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
