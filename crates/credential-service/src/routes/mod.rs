//! HTTP routes for the credential service.

use crate::handlers::{self, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the application routes.
///
/// - `/health` - Liveness probe
/// - `/metrics` - Prometheus scrape endpoint
/// - `/api/v1/video/credentials` - Issue a credential
/// - `/api/v1/video/credentials/status` - Whether issuance is configured
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/video/credentials", post(handlers::issue_credential))
        .route(
            "/api/v1/video/credentials/status",
            get(handlers::credential_status),
        )
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    api_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::issuer::CredentialIssuer;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use common::config::DeploymentConfig;
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn app() -> Router {
        let issuer =
            CredentialIssuer::new(DeploymentConfig::resolve("meet.jit.si", None), None, None)
                .unwrap();
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_routes(Arc::new(AppState { issuer }), handle)
    }

    #[tokio::test]
    async fn test_health_route() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_status_route_on_free_deployment() {
        let response = app()
            .oneshot(
                Request::get("/api/v1/video/credentials/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status, serde_json::json!({"configured": false, "deployment": "free"}));
    }

    #[tokio::test]
    async fn test_issue_route_rejects_get() {
        let response = app()
            .oneshot(
                Request::get("/api/v1/video/credentials")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
