//! Integration tests for the credential endpoints
//!
//! Each test spawns the real router on a random port and talks to it over
//! HTTP.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::config::DeploymentConfig;
use common::credential::{CredentialResponse, CredentialStatus};
use common::secret::SecretString;
use credential_service::config::Config;
use credential_service::handlers::AppState;
use credential_service::issuer::CredentialIssuer;
use credential_service::routes;
use metrics_exporter_prometheus::PrometheusBuilder;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use video_test_utils::*;

struct TestCredentialServer {
    addr: SocketAddr,
    _handle: JoinHandle<()>,
}

impl TestCredentialServer {
    async fn spawn(issuer: CredentialIssuer) -> Result<Self, anyhow::Error> {
        let state = Arc::new(AppState { issuer });
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            _handle: handle,
        })
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

fn hosted_issuer() -> CredentialIssuer {
    let (_, private_pem) = test_signing_key();
    CredentialIssuer::new(
        DeploymentConfig::resolve(TEST_HOSTED_DOMAIN, Some(TEST_APP_ID)),
        Some(&SecretString::from(private_pem)),
        Some(TEST_KEY_ID.to_string()),
    )
    .unwrap()
}

fn request_body() -> Value {
    json!({
        "user_id": TEST_USER_CLIENT,
        "user_name": "Riley Client",
        "is_moderator": false,
        "room_name": TEST_ROOM,
    })
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() -> Result<(), anyhow::Error> {
    let server = TestCredentialServer::spawn(hosted_issuer()).await?;

    let response = reqwest::get(format!("{}/health", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "OK");
    Ok(())
}

#[tokio::test]
async fn test_issue_credential_end_to_end() -> Result<(), anyhow::Error> {
    let server = TestCredentialServer::spawn(hosted_issuer()).await?;

    let before = chrono::Utc::now().timestamp();
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/video/credentials", server.url()))
        .json(&request_body())
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: CredentialResponse = response.json().await?;

    assert!(body.expires_at >= before + 3600);
    body.token
        .assert_valid_jwt()
        .assert_kid(&format!("{TEST_PREFIXED_APP_ID}/{TEST_KEY_ID}"))
        .assert_room(&format!("{TEST_PREFIXED_APP_ID}/{TEST_ROOM}"))
        .assert_subject(TEST_PREFIXED_APP_ID)
        .assert_moderator(false)
        .assert_lifetime(3660)
        .assert_signed_with(TEST_PUBLIC_KEY_PEM);

    Ok(())
}

#[tokio::test]
async fn test_missing_user_id_returns_400() -> Result<(), anyhow::Error> {
    let server = TestCredentialServer::spawn(hosted_issuer()).await?;

    let mut body = request_body();
    body["user_id"] = json!("");

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/video/credentials", server.url()))
        .json(&body)
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: Value = response.json().await?;
    assert_eq!(error["error"]["code"], "MISSING_USER_ID");
    Ok(())
}

#[tokio::test]
async fn test_unconfigured_deployment_returns_503() -> Result<(), anyhow::Error> {
    let config = Config::from_vars(&HashMap::from([(
        "VIDEO_DOMAIN".to_string(),
        "meet.example.org".to_string(),
    )]))?;
    let issuer = CredentialIssuer::from_config(&config)?;
    let server = TestCredentialServer::spawn(issuer).await?;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/video/credentials", server.url()))
        .json(&request_body())
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error: Value = response.json().await?;
    assert_eq!(error["error"]["code"], "NOT_CONFIGURED");
    Ok(())
}

#[tokio::test]
async fn test_status_reports_configuration() -> Result<(), anyhow::Error> {
    let server = TestCredentialServer::spawn(hosted_issuer()).await?;
    let status: CredentialStatus =
        reqwest::get(format!("{}/api/v1/video/credentials/status", server.url()))
            .await?
            .json()
            .await?;
    assert!(status.configured);

    let unkeyed = CredentialIssuer::new(
        DeploymentConfig::resolve(TEST_HOSTED_DOMAIN, Some(TEST_APP_ID)),
        None,
        None,
    )?;
    let server = TestCredentialServer::spawn(unkeyed).await?;
    let status: CredentialStatus =
        reqwest::get(format!("{}/api/v1/video/credentials/status", server.url()))
            .await?
            .json()
            .await?;
    assert!(!status.configured);

    Ok(())
}

#[tokio::test]
async fn test_escaped_env_key_signs_verifiable_credentials() -> Result<(), anyhow::Error> {
    let config = Config::from_vars(&HashMap::from([
        ("VIDEO_DOMAIN".to_string(), TEST_HOSTED_DOMAIN.to_string()),
        ("VIDEO_APP_ID".to_string(), TEST_APP_ID.to_string()),
        ("VIDEO_PRIVATE_KEY".to_string(), escaped_private_key()),
        ("VIDEO_CREDENTIAL_TTL_SECONDS".to_string(), "600".to_string()),
    ]))?;
    let server = TestCredentialServer::spawn(CredentialIssuer::from_config(&config)?).await?;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/video/credentials", server.url()))
        .json(&request_body())
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: CredentialResponse = response.json().await?;
    body.token
        .assert_kid(TEST_PREFIXED_APP_ID)
        .assert_lifetime(660)
        .assert_signed_with(TEST_PUBLIC_KEY_PEM);

    Ok(())
}

#[tokio::test]
async fn test_malformed_body_is_rejected() -> Result<(), anyhow::Error> {
    let server = TestCredentialServer::spawn(hosted_issuer()).await?;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/video/credentials", server.url()))
        .json(&json!({ "user_name": "no id or room" }))
        .send()
        .await?;

    assert!(response.status().is_client_error());
    Ok(())
}
