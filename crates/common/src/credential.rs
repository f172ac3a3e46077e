//! Wire types for the credential endpoint.
//!
//! These are shared between `credential-service`, which issues signed
//! credentials, and the embed bootstrap's HTTP credential provider, which
//! requests them. User email and the issued token are redacted in `Debug`
//! output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Room name granting access to every room of the tenant.
pub const ROOM_WILDCARD: &str = "*";

/// Feature grants embedded in a credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub livestreaming: bool,
    #[serde(default)]
    pub recording: bool,
    #[serde(default)]
    pub moderation: bool,
}

/// Request body for `POST /api/v1/video/credentials`.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub user_id: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<String>,
    #[serde(default)]
    pub is_moderator: bool,
    pub room_name: String,
    /// Lifetime in seconds; the service default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureFlags>,
}

impl fmt::Debug for CredentialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRequest")
            .field("user_id", &self.user_id)
            .field("user_name", &self.user_name)
            .field("user_email", &self.user_email.as_ref().map(|_| "[REDACTED]"))
            .field("user_avatar", &self.user_avatar)
            .field("is_moderator", &self.is_moderator)
            .field("room_name", &self.room_name)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("features", &self.features)
            .finish()
    }
}

/// Successful response from the credential endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialResponse {
    /// Signed credential.
    pub token: String,
    /// Expiration (Unix epoch seconds).
    pub expires_at: i64,
}

impl fmt::Debug for CredentialResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResponse")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Response from `GET /api/v1/video/credentials/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub configured: bool,
    pub deployment: crate::config::DeploymentKind,
}
