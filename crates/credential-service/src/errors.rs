use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Deployment is not hosted; credentials are not used")]
    NotHostedDeployment,

    #[error("Hosted app id is not configured")]
    MissingAppId,

    #[error("Signing key is not configured")]
    MissingSigningKey,

    #[error("User id is required")]
    MissingUserId,

    #[error("Invalid credential request: {0}")]
    InvalidRequest(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

impl CredentialError {
    /// Bounded label for metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            CredentialError::NotHostedDeployment
            | CredentialError::MissingAppId
            | CredentialError::MissingSigningKey => "not_configured",
            CredentialError::MissingUserId | CredentialError::InvalidRequest(_) => {
                "invalid_request"
            }
            CredentialError::Signing(_) => "signing",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for CredentialError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            CredentialError::NotHostedDeployment
            | CredentialError::MissingAppId
            | CredentialError::MissingSigningKey => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NOT_CONFIGURED",
                "Credential issuance is not configured".to_string(),
            ),
            CredentialError::MissingUserId => (
                StatusCode::BAD_REQUEST,
                "MISSING_USER_ID",
                "A user id is required".to_string(),
            ),
            CredentialError::InvalidRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                reason.clone(),
            ),
            CredentialError::Signing(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SIGNING_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: CredentialError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_not_configured_maps_to_503() {
        for err in [
            CredentialError::NotHostedDeployment,
            CredentialError::MissingAppId,
            CredentialError::MissingSigningKey,
        ] {
            let (status, body) = body_json(err).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body["error"]["code"], "NOT_CONFIGURED");
        }
    }

    #[tokio::test]
    async fn test_request_errors_map_to_400() {
        let (status, body) = body_json(CredentialError::MissingUserId).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "MISSING_USER_ID");

        let (status, body) =
            body_json(CredentialError::InvalidRequest("ttl_seconds must be positive".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "ttl_seconds must be positive");
    }

    #[tokio::test]
    async fn test_signing_error_hides_details() {
        let (status, body) =
            body_json(CredentialError::Signing("InvalidRsaKey: bad modulus".into())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.to_string().contains("modulus"));
    }

    #[test]
    fn test_categories_are_bounded() {
        assert_eq!(CredentialError::MissingAppId.category(), "not_configured");
        assert_eq!(CredentialError::MissingUserId.category(), "invalid_request");
        assert_eq!(CredentialError::Signing(String::new()).category(), "signing");
    }
}
