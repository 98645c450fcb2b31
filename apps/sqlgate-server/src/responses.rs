use axum::{http::StatusCode, response::IntoResponse, Json};
use sqlgate_protocol::ProblemDetails;

/// RFC7807 body with the status's canonical reason as title.
pub fn problem(
    status: StatusCode,
    detail: Option<String>,
    warnings: Vec<String>,
) -> axum::response::Response {
    let body = ProblemDetails {
        r#type: "about:blank".into(),
        title: status.canonical_reason().unwrap_or("Error").to_string(),
        status: status.as_u16(),
        detail,
        warnings,
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn problem_shape() {
        let resp = problem(
            StatusCode::NOT_FOUND,
            Some("History not found".into()),
            Vec::new(),
        );
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["type"], "about:blank");
        assert_eq!(v["title"], "Not Found");
        assert_eq!(v["status"], 404);
        assert_eq!(v["detail"], "History not found");
        assert!(v.get("warnings").is_none());
    }
}
