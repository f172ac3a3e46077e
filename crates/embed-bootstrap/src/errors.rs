//! Embed bootstrap error types.
//!
//! Every error that reaches a caller collapses into one of two user-facing
//! messages: a rate-limit message ("high demand, try again later") or a
//! generic unavailability message. Raw third-party error text is logged, never
//! surfaced.

use std::time::Duration;
use thiserror::Error;

/// Shown when the conferencing service is rate limiting this client.
pub const RATE_LIMITED_MESSAGE: &str =
    "The video service is experiencing high demand. Please wait a minute and try again.";

/// Shown for every other terminal failure.
pub const UNAVAILABLE_MESSAGE: &str =
    "The video service is temporarily unavailable. Please try again later.";

/// A single failed script load as reported by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// Diagnostic reason (logged only).
    pub reason: String,
    /// HTTP status, when the host can observe one.
    pub status: Option<u16>,
}

impl ScriptFailure {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            status: None,
        }
    }

    #[must_use]
    pub fn with_status(reason: impl Into<String>, status: u16) -> Self {
        Self {
            reason: reason.into(),
            status: Some(status),
        }
    }

    /// True when the host observed an explicit 429.
    #[must_use]
    pub fn is_rate_limit_status(&self) -> bool {
        self.status == Some(429)
    }
}

/// Script loader errors. Cloneable so every waiter on a shared load observes
/// the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// A load attempt failed (network error, broken script).
    #[error("Script load failed: {0}")]
    ScriptLoad(String),

    /// Retries exhausted while the service was rate limiting.
    #[error("Script load rate limited after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    /// Retries exhausted for generic failures.
    #[error("Script load failed after {attempts} attempts")]
    LoadExhausted { attempts: u32 },

    /// Fresh load refused during the rate-limit cooldown.
    #[error("Script loading is rate limited for another {remaining:?}")]
    RateLimited { remaining: Duration },

    /// The in-flight load was abandoned by `reset()`.
    #[error("Script load aborted")]
    Aborted,
}

impl LoadError {
    /// True for the rate-limit classes.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            LoadError::RateLimitExhausted { .. } | LoadError::RateLimited { .. }
        )
    }

    /// Client-safe message (no internal details).
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        if self.is_rate_limited() {
            RATE_LIMITED_MESSAGE
        } else {
            UNAVAILABLE_MESSAGE
        }
    }
}

/// Credential fetch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// No user id to bind the credential to.
    #[error("User id is required for a credential")]
    MissingUserId,

    /// The provider is not configured for this deployment.
    #[error("Credential provider not configured: {0}")]
    NotConfigured(String),

    /// Transport failure talking to the credential service.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// The credential service refused the request.
    #[error("Credential request rejected: {0}")]
    Rejected(String),

    /// Response parsing failed.
    #[error("Invalid credential response: {0}")]
    InvalidResponse(String),
}

/// Errors surfaced by the embed lifecycle.
#[derive(Debug, Clone, Error)]
pub enum EmbedError {
    /// The embed library could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The host container is absent at instantiation time.
    #[error("Embed container not found: {0}")]
    ContainerMissing(String),

    /// A credential is required but cannot be built from the inputs.
    #[error("Credential configuration error: {0}")]
    CredentialConfig(String),

    /// Fetching the credential failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Widget construction failed.
    #[error("Widget error: {0}")]
    Widget(String),
}

impl EmbedError {
    /// Client-safe message (no internal details).
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            EmbedError::Load(e) => e.user_message(),
            EmbedError::ContainerMissing(_)
            | EmbedError::CredentialConfig(_)
            | EmbedError::Credential(_)
            | EmbedError::Widget(_) => UNAVAILABLE_MESSAGE,
        }
    }
}
