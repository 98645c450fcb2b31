use std::{net::SocketAddr, sync::Arc};

use tracing::{error, info};

mod access_log;
mod api;
mod app_state;
mod audit;
mod bootstrap;
mod chart;
mod error;
mod executor;
mod llm;
mod openapi;
mod orchestrator;
mod responses;
mod router;
mod schema_catalog;
mod sql_generator;
#[cfg(test)]
mod test_support;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    sqlgate_otel::init();

    let settings = match sqlgate_core::Settings::load() {
        Ok(settings) => Arc::new(settings),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    let http_cfg = match bootstrap::http_config(&settings) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    let bootstrap::BootstrapOutput { router, state } = match bootstrap::build(settings.clone()).await
    {
        Ok(out) => out,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    };

    let app = bootstrap::attach_global_layers(bootstrap::attach_http_layers(
        router.with_state(state),
        http_cfg.concurrency_limit,
        &settings.server.cors_origins,
    ));

    let listener = match tokio::net::TcpListener::bind(http_cfg.addr).await {
        Ok(l) => l,
        Err(err) => {
            eprintln!("error: bind {}: {err}", http_cfg.addr);
            std::process::exit(2);
        }
    };
    info!(addr = %http_cfg.addr, "sqlgate listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod http_tests {
    use super::*;
    use crate::router::paths;
    use crate::test_support::{orders_db, wait_for_history, ScriptedLlm};
    use axum::{
        body::Body,
        http::{header::CONTENT_TYPE, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use sqlgate_core::Settings;
    use sqlgate_kernel::Kernel;
    use sqlgate_protocol::ConnectionDescriptor;
    use tower::util::ServiceExt;

    struct TestApp {
        _dir: tempfile::TempDir,
        kernel: Kernel,
        app: Router,
    }

    async fn test_app(llm: Arc<ScriptedLlm>) -> TestApp {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = Settings::default();
        settings.llm.translate_prompts = false;
        settings.connections.push(ConnectionDescriptor {
            id: 1,
            name: "shop".into(),
            connection_string: orders_db(dir.path()),
        });
        let kernel = Kernel::open(&dir.path().join("state")).expect("kernel");
        let out = bootstrap::assemble(Arc::new(settings), kernel.clone(), llm)
            .await
            .expect("assemble");
        let app = bootstrap::attach_global_layers(bootstrap::attach_http_layers(
            out.router.with_state(out.state),
            16,
            &[],
        ));
        TestApp {
            _dir: dir,
            kernel,
            app,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header(CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app
            .clone()
            .oneshot(req.body(body).expect("request"))
            .await
            .expect("response");
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("body collect")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn banner_health_and_models() {
        let t = test_app(ScriptedLlm::unavailable()).await;
        let (status, body) = call(&t.app, "GET", paths::ROOT, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        let (_, body) = call(&t.app, "GET", paths::HEALTH, None).await;
        assert_eq!(body["status"], "healthy");
        let (_, body) = call(&t.app, "GET", paths::QUERY_MODELS, None).await;
        assert_eq!(body.as_array().map(Vec::len), Some(12));
        let (status, body) = call(&t.app, "GET", paths::OPENAPI, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/query/execute"].is_object());
    }

    #[tokio::test]
    async fn discover_then_get_keeps_exact_columns() {
        let reply = r#"{"database":"shop","tables":[{"name":"orders",
            "description":"Orders placed by customers; totals include tax.",
            "columns":[{"name":"id","description":"primary key"},{"name":"total","description":"gross"}]}]}"#;
        let t = test_app(ScriptedLlm::replying([reply])).await;

        let (status, body) = call(&t.app, "GET", "/api/schema/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "No schema snapshot. Please run discovery.");

        let (status, body) = call(&t.app, "POST", "/api/schema/1/discover", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Schema discovered and saved");

        let (status, body) = call(&t.app, "GET", "/api/schema/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let tables = body["tables"].as_array().unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0]["name"], "orders");
        let cols: Vec<&str> = tables[0]["columns"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|c| c["name"].as_str())
            .collect();
        assert_eq!(cols, vec!["id", "total"]);
        assert_eq!(body["source"], "llm");

        let (_, body) = call(&t.app, "GET", "/api/schema/1/tables", None).await;
        assert_eq!(body["tables"], json!(["orders"]));
        let (_, body) = call(&t.app, "GET", "/api/schema/1/tables/missing", None).await;
        assert_eq!(body, json!({"name": "missing", "columns": []}));
    }

    #[tokio::test]
    async fn discover_unknown_connection_and_bad_dialect() {
        let t = test_app(ScriptedLlm::unavailable()).await;
        let (status, _) = call(&t.app, "POST", "/api/schema/9/discover", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = call(
            &t.app,
            "POST",
            "/api/schema/9/discover",
            Some(json!({"connection_string": "mysql://u@h/db"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("unsupported dialect"));
    }

    #[tokio::test]
    async fn execute_select_one() {
        let t = test_app(ScriptedLlm::unavailable()).await;
        let (status, body) = call(
            &t.app,
            "POST",
            paths::QUERY_EXECUTE,
            Some(json!({"sql": "SELECT 1", "connection_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["columns"], json!(["1"]));
        assert_eq!(body["rows"], json!([{"1": 1}]));
        assert_eq!(body["row_count"], 1);
        assert_eq!(body["sql_executed"], "SELECT 1");
    }

    #[tokio::test]
    async fn delete_with_approval_is_blocked() {
        let t = test_app(ScriptedLlm::unavailable()).await;
        let (status, body) = call(
            &t.app,
            "POST",
            paths::QUERY_EXECUTE,
            Some(json!({"sql": "DELETE FROM orders", "connection_id": 1, "require_approval": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let warnings = body["warnings"].as_array().unwrap();
        assert!(warnings.iter().any(|w| w.as_str().unwrap_or("").contains("DELETE")));

        // nothing ran and nothing was logged
        let (_, body) = call(
            &t.app,
            "POST",
            paths::QUERY_EXECUTE,
            Some(json!({"sql": "SELECT COUNT(*) AS n FROM orders", "connection_id": 1})),
        )
        .await;
        assert_eq!(body["rows"][0]["n"], 3);
        let items = wait_for_history(&t.kernel, 1).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].sql.starts_with("SELECT COUNT"));
    }

    #[tokio::test]
    async fn blocked_execute_shows_up_in_metrics() {
        let t = test_app(ScriptedLlm::unavailable()).await;
        let (status, _) = call(
            &t.app,
            "POST",
            paths::QUERY_EXECUTE,
            Some(json!({"sql": "DROP TABLE orders", "connection_id": 1, "require_approval": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let resp = t
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(paths::METRICS)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        let blocked = text
            .lines()
            .find(|l| l.starts_with("sqlgate_guardrail_blocked_total"))
            .expect("blocked counter exported");
        let count: f64 = blocked
            .rsplit(' ')
            .next()
            .and_then(|v| v.parse().ok())
            .expect("counter value");
        assert!(count >= 1.0, "{blocked}");
    }

    #[tokio::test]
    async fn engine_failure_is_still_ok_status() {
        let t = test_app(ScriptedLlm::unavailable()).await;
        let (status, body) = call(
            &t.app,
            "POST",
            paths::QUERY_EXECUTE,
            Some(json!({"sql": "SELECT * FROM missing_table", "connection_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["rows"], json!([]));
        assert!(body["error"].is_string());

        let (status, _) = call(
            &t.app,
            "POST",
            paths::QUERY_EXECUTE,
            Some(json!({"sql": "SELECT 1", "connection_id": 404})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn generate_and_execute_flow() {
        let t = test_app(ScriptedLlm::replying([
            "```sql\nSELECT id FROM orders;\n```",
            "Here you go: SELECT id, total FROM orders ORDER BY id; enjoy",
        ]))
        .await;
        let (status, body) = call(
            &t.app,
            "POST",
            paths::QUERY_GENERATE,
            Some(json!({"prompt": "list order ids", "connection_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sql"], "SELECT 1;");
        assert_eq!(body["degraded"], true);

        let (status, body) = call(
            &t.app,
            "POST",
            paths::QUERY_GENERATE_EXECUTE_SUGGEST,
            Some(json!({"prompt": "order totals", "connection_id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sql"], "SELECT id, total FROM orders ORDER BY id;");
        assert_eq!(body["execution"]["row_count"], 3);
        assert_eq!(body["chart"]["type"], "bar");
        assert_eq!(body["chart"]["valueKey"], "total");

        let items = wait_for_history(&t.kernel, 1).await;
        assert_eq!(items[0].prompt.as_deref(), Some("order totals"));
    }

    #[tokio::test]
    async fn suggest_chart_requires_columns() {
        let t = test_app(ScriptedLlm::unavailable()).await;
        let (status, body) = call(
            &t.app,
            "POST",
            paths::QUERY_SUGGEST_CHART,
            Some(json!({"columns": [], "rows": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "No columns provided");

        let (status, body) = call(
            &t.app,
            "POST",
            paths::QUERY_SUGGEST_CHART,
            Some(json!({"columns": ["make", "price"], "rows": [{"make": "bmw", "price": 3}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["groupBy"], "make");
        assert_eq!(body["agg"], "avg");
    }

    #[tokio::test]
    async fn history_pin_rerun_delete() {
        let t = test_app(ScriptedLlm::unavailable()).await;
        call(
            &t.app,
            "POST",
            paths::QUERY_EXECUTE,
            Some(json!({"sql": "SELECT 1", "connection_id": 1})),
        )
        .await;
        let id = wait_for_history(&t.kernel, 1).await[0].id;

        let (status, body) = call(&t.app, "POST", &format!("/api/history/{id}/pin"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "pinned": true}));

        let (status, body) =
            call(&t.app, "POST", &format!("/api/history/{id}/rerun"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        wait_for_history(&t.kernel, 2).await;

        let (_, body) = call(&t.app, "GET", "/api/history?limit=10", None).await;
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], id);
        assert_eq!(items[0]["pinned"], true);
        assert!(items[0]["last_run_at"].is_string());

        let (status, body) = call(&t.app, "DELETE", &format!("/api/history/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (status, body) = call(&t.app, "DELETE", &format!("/api/history/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "History not found");
        let (status, _) = call(
            &t.app,
            "POST",
            &format!("/api/history/{id}/pin?pinned=false"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&t.app, "POST", "/api/history/999/rerun", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
