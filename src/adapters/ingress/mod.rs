//! HTTP drift ingress and operator endpoints.
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | POST | `/v1/drift-events` | submit a drift event (202 + intake decision, 422 on bad payload) |
//! | GET | `/v1/targets/{id}` | cycle state, stability record and budget of a target |
//! | POST | `/v1/targets/{id}/rollback` | manual rollback to the previous stable model |
//! | POST | `/v1/targets/{id}/unfreeze` | clear a rollback-failure freeze |
//! | GET | `/v1/health` | queue depth and slot usage |

mod handlers;

pub use handlers::{ApiError, ErrorResponse};

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::services::Orchestrator;

/// Build the ingress router around a shared orchestrator.
pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/v1/drift-events", post(handlers::submit_drift_event))
        .route("/v1/targets/{id}", get(handlers::target_status))
        .route("/v1/targets/{id}/rollback", post(handlers::rollback))
        .route("/v1/targets/{id}/unfreeze", post(handlers::unfreeze))
        .route("/v1/health", get(handlers::health))
        .with_state(orchestrator)
        .layer(TraceLayer::new_for_http())
}

/// Serve the ingress on `bind` until `shutdown` resolves.
pub async fn serve<F>(orchestrator: Orchestrator, bind: &str, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{bind}: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drift ingress listening");

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::adapters::mock::{ManualClock, MemoryAuditLog, MockBackend};
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::Config;
    use crate::services::NotificationBus;

    async fn setup() -> (Orchestrator, MockBackend) {
        let pool = create_migrated_test_pool().await.unwrap();
        let backend = MockBackend::new();
        let ports = backend.ports(
            pool,
            Arc::new(MemoryAuditLog::default()),
            Arc::new(ManualClock::default()),
        );
        let orchestrator =
            Orchestrator::new(Config::default(), ports, Arc::new(NotificationBus::default()));
        (orchestrator, backend)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_accepts_drift_event() {
        let (orchestrator, _) = setup().await;
        let payload = json!({
            "target_id": "lap_time",
            "severity": 0.85,
            "detected_at": "2026-03-07T13:59:00Z",
            "feature_breakdown": { "tyre_temp": 0.6 }
        });

        let (status, body) =
            send(router(orchestrator.clone()), post_json("/v1/drift-events", &payload.to_string())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["decision"], "accepted");
        assert!(body["request_id"].is_string());

        let (status, body) = send(
            router(orchestrator),
            Request::builder().uri("/v1/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queued_requests"], 1);
    }

    #[tokio::test]
    async fn test_below_threshold_is_ignored_not_rejected() {
        let (orchestrator, _) = setup().await;
        let payload = r#"{"target_id":"lap_time","severity":0.2,"detected_at":"2026-03-07T13:59:00Z"}"#;

        let (status, body) = send(router(orchestrator), post_json("/v1/drift-events", payload)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["decision"], "ignored");
    }

    #[tokio::test]
    async fn test_invalid_fields_return_422_with_violations() {
        let (orchestrator, _) = setup().await;
        let payload = r#"{"target_id":"","severity":1.5,"detected_at":"2026-03-07T13:59:00Z"}"#;

        let (status, body) = send(router(orchestrator), post_json("/v1/drift-events", payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "INVALID_EVENT");
        let fields: Vec<&str> = body["violations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["target_id", "severity"]);
    }

    #[tokio::test]
    async fn test_malformed_json_returns_422() {
        let (orchestrator, _) = setup().await;
        let (status, body) = send(router(orchestrator), post_json("/v1/drift-events", "{not json")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["violations"][0]["field"], "body");
    }

    #[tokio::test]
    async fn test_target_status_of_unseen_target_is_idle() {
        let (orchestrator, _) = setup().await;
        let (status, body) = send(
            router(orchestrator),
            Request::builder().uri("/v1/targets/lap_time").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target_id"], "lap_time");
        assert_eq!(body["cycle"]["state"], "idle");
        assert!(body["stability"].is_null());
        assert_eq!(body["budget"]["retrains_used"], 0);
    }

    #[tokio::test]
    async fn test_rollback_without_previous_model_conflicts() {
        let (orchestrator, backend) = setup().await;
        backend.registry.set_initial_production("lap_time", "models/lap_time/v1");
        orchestrator.bootstrap_target("lap_time").await.unwrap();

        let (status, body) = send(router(orchestrator), post_json("/v1/targets/lap_time/rollback", "")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "NOTHING_TO_ROLL_BACK");
    }

    #[tokio::test]
    async fn test_rollback_unknown_target_is_404() {
        let (orchestrator, _) = setup().await;
        let (status, _) = send(router(orchestrator), post_json("/v1/targets/ghost/rollback", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unfreeze_unknown_target_is_404() {
        let (orchestrator, _) = setup().await;
        let (status, body) = send(router(orchestrator), post_json("/v1/targets/ghost/unfreeze", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "UNKNOWN_TARGET");
    }

    #[tokio::test]
    async fn test_unfreeze_clears_freeze() {
        let (orchestrator, backend) = setup().await;
        backend.registry.set_initial_production("lap_time", "models/lap_time/v1");
        orchestrator.bootstrap_target("lap_time").await.unwrap();
        orchestrator.promotion().freeze("lap_time", "registry unreachable").await;

        let (status, body) = send(router(orchestrator), post_json("/v1/targets/lap_time/unfreeze", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["frozen"], false);
    }
}
