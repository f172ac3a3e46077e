//! Credential acquisition for hosted deployments.
//!
//! Hosted deployments only admit authenticated participants. The signing key
//! never reaches the embedding client; instead [`HttpCredentialProvider`]
//! asks the credential service (`POST /api/v1/video/credentials`) for a
//! short-lived, room-scoped token.

use crate::errors::CredentialError;
use async_trait::async_trait;
use common::config::{DeploymentConfig, DeploymentKind};
use common::credential::{CredentialRequest, CredentialResponse};
use common::secret::SecretString;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for the HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const CREDENTIALS_PATH: &str = "/api/v1/video/credentials";

/// Source of signed widget credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Whether credentials can be issued for this deployment at all.
    fn is_configured(&self) -> bool;

    /// Obtain a credential for `request`.
    ///
    /// # Errors
    ///
    /// - `CredentialError::MissingUserId` - the request has no user id
    /// - `CredentialError::NotConfigured` - the provider cannot issue
    /// - `CredentialError::Http` / `Rejected` / `InvalidResponse` - the service call failed
    async fn fetch(&self, request: &CredentialRequest) -> Result<SecretString, CredentialError>;
}

/// Fetches credentials from the credential service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCredentialProvider {
    endpoint: Option<String>,
    kind: DeploymentKind,
    client: reqwest::Client,
}

impl HttpCredentialProvider {
    /// Create a provider for `deployment`, talking to the service at
    /// `endpoint` (base URL, no path). `None` leaves it unconfigured.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Http` if the HTTP client cannot be built.
    pub fn new(
        deployment: &DeploymentConfig,
        endpoint: Option<String>,
    ) -> Result<Self, CredentialError> {
        Self::with_timeout(deployment, endpoint, DEFAULT_HTTP_TIMEOUT)
    }

    /// Same as [`Self::new`] with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Http` if the HTTP client cannot be built.
    pub fn with_timeout(
        deployment: &DeploymentConfig,
        endpoint: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CredentialError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CredentialError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint
                .map(|e| e.trim_end_matches('/').to_string())
                .filter(|e| !e.is_empty()),
            kind: deployment.kind(),
            client,
        })
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    fn is_configured(&self) -> bool {
        self.kind == DeploymentKind::Hosted && self.endpoint.is_some()
    }

    #[instrument(skip_all)]
    async fn fetch(&self, request: &CredentialRequest) -> Result<SecretString, CredentialError> {
        if request.user_id.trim().is_empty() {
            return Err(CredentialError::MissingUserId);
        }
        let Some(endpoint) = self.endpoint.as_deref().filter(|_| self.is_configured()) else {
            return Err(CredentialError::NotConfigured(format!(
                "no credential service for {} deployment",
                self.kind
            )));
        };

        let url = format!("{endpoint}{CREDENTIALS_PATH}");
        debug!(target: "embed.credentials", url = %url, "Requesting widget credential");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "embed.credentials", error = %e, "HTTP request failed");
                CredentialError::Http(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let body: CredentialResponse = response.json().await.map_err(|e| {
                warn!(target: "embed.credentials", error = %e, "Failed to parse credential response");
                CredentialError::InvalidResponse(e.to_string())
            })?;
            debug!(
                target: "embed.credentials",
                expires_at = body.expires_at,
                "Credential acquired"
            );
            Ok(SecretString::from(body.token))
        } else if status.is_client_error() {
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(target: "embed.credentials", error = %e, "Failed to read error response body");
                "<failed to read body>".to_string()
            });
            warn!(target: "embed.credentials", status = %status, "Credential request rejected");
            trace!(target: "embed.credentials", body = %body, "Credential rejection response body");
            Err(CredentialError::Rejected(format!("Status {status}")))
        } else if status.as_u16() == 503 {
            warn!(target: "embed.credentials", "Credential service not configured");
            Err(CredentialError::NotConfigured(format!("Status {status}")))
        } else {
            warn!(target: "embed.credentials", status = %status, "Credential service error");
            Err(CredentialError::Http(format!(
                "Credential service error: {status}"
            )))
        }
    }
}

/// In-memory credential providers for testing.
pub mod mock {
    use super::CredentialProvider;
    use crate::errors::CredentialError;
    use async_trait::async_trait;
    use common::credential::CredentialRequest;
    use common::secret::SecretString;
    use std::sync::{Mutex, PoisonError};

    /// Returns a fixed token (or error) and records every request.
    pub struct StaticCredentialProvider {
        configured: bool,
        result: Result<String, CredentialError>,
        requests: Mutex<Vec<CredentialRequest>>,
    }

    impl StaticCredentialProvider {
        /// Configured provider that hands out `token`.
        pub fn new(token: &str) -> Self {
            Self {
                configured: true,
                result: Ok(token.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Configured provider whose fetches fail with `error`.
        pub fn failing(error: CredentialError) -> Self {
            Self {
                configured: true,
                result: Err(error),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Provider that reports itself unconfigured.
        pub fn unconfigured() -> Self {
            Self {
                configured: false,
                result: Err(CredentialError::NotConfigured("unconfigured".to_string())),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Requests that reached `fetch`, in order.
        pub fn requests(&self) -> Vec<CredentialRequest> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl CredentialProvider for StaticCredentialProvider {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn fetch(
            &self,
            request: &CredentialRequest,
        ) -> Result<SecretString, CredentialError> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());

            if request.user_id.trim().is_empty() {
                return Err(CredentialError::MissingUserId);
            }
            self.result.clone().map(SecretString::from)
        }
    }
}
