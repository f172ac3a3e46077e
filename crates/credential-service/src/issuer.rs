//! Signed credential issuance for hosted deployments.
//!
//! A credential is an RS256 JWT the hosted conferencing service verifies
//! against the tenant's registered public key:
//!
//! ```text
//! header  {alg: RS256, kid: "{prefixed_app_id}[/{key_id}]", typ: JWT}
//! payload {aud: "jitsi", context: {user, features?}, exp, iss: "chat",
//!          nbf: now - 60, room, sub: prefixed_app_id}
//! ```
//!
//! Boolean flags inside `context` are serialized as the strings `"true"` /
//! `"false"`; the verifier does not accept JSON booleans there.

use crate::config::{Config, DEFAULT_TTL_SECONDS};
use crate::errors::CredentialError;
use crate::observability::metrics;
use common::config::{scope_to_app, DeploymentConfig, DeploymentKind, APP_ID_PREFIX};
use common::credential::{
    CredentialRequest, CredentialResponse, CredentialStatus, FeatureFlags, ROOM_WILDCARD,
};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// `iss` claim.
pub const ISSUER: &str = "chat";

/// `aud` claim.
pub const AUDIENCE: &str = "jitsi";

/// `nbf` is backdated by this much to absorb clock drift.
pub const CLOCK_SKEW_SECONDS: i64 = 60;

/// Upper bound on a requested lifetime (24 hours).
pub const MAX_TTL_SECONDS: u64 = 86_400;

fn flag(value: bool) -> String {
    value.to_string()
}

/// Credential payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialClaims {
    pub aud: String,
    pub context: CredentialContext,
    pub exp: i64,
    pub iss: String,
    pub nbf: i64,
    pub room: String,
    pub sub: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialContext {
    pub user: CredentialUser,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub features: Option<CredentialFeatures>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialUser {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
    /// `"true"` or `"false"`.
    pub moderator: String,
}

impl fmt::Debug for CredentialUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialUser")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("avatar", &self.avatar)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("moderator", &self.moderator)
            .finish()
    }
}

/// Feature grants, each `"true"` or `"false"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialFeatures {
    pub livestreaming: String,
    pub recording: String,
    pub moderation: String,
}

impl From<FeatureFlags> for CredentialFeatures {
    fn from(flags: FeatureFlags) -> Self {
        Self {
            livestreaming: flag(flags.livestreaming),
            recording: flag(flags.recording),
            moderation: flag(flags.moderation),
        }
    }
}

/// Issues credentials for one hosted tenant.
pub struct CredentialIssuer {
    deployment: DeploymentConfig,
    signing_key: Option<EncodingKey>,
    key_id: Option<String>,
    default_ttl_seconds: u64,
}

impl fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("deployment", &self.deployment)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "[REDACTED]"))
            .field("key_id", &self.key_id)
            .field("default_ttl_seconds", &self.default_ttl_seconds)
            .finish()
    }
}

impl CredentialIssuer {
    /// Create an issuer. The private key is parsed up front so a broken key
    /// fails at startup rather than on the first request.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Signing` if `private_key_pem` is not an RSA
    /// key.
    pub fn new(
        deployment: DeploymentConfig,
        private_key_pem: Option<&SecretString>,
        key_id: Option<String>,
    ) -> Result<Self, CredentialError> {
        let signing_key = private_key_pem
            .map(|pem| {
                EncodingKey::from_rsa_pem(pem.expose_secret().as_bytes())
                    .map_err(|e| CredentialError::Signing(format!("Invalid private key: {e}")))
            })
            .transpose()?;

        Ok(Self {
            deployment,
            signing_key,
            key_id: key_id.filter(|id| !id.trim().is_empty()),
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
        })
    }

    /// Build an issuer from service configuration.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub fn from_config(config: &Config) -> Result<Self, CredentialError> {
        Ok(Self::new(
            config.deployment.clone(),
            config.private_key.as_ref(),
            config.key_id.clone(),
        )?
        .with_default_ttl(config.default_ttl_seconds))
    }

    #[must_use]
    pub fn with_default_ttl(mut self, ttl_seconds: u64) -> Self {
        self.default_ttl_seconds = ttl_seconds;
        self
    }

    /// True when the deployment is hosted and both the app id and the
    /// signing key are present.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.deployment.kind() == DeploymentKind::Hosted
            && self.deployment.app_id().is_some()
            && self.signing_key.is_some()
    }

    #[must_use]
    pub fn status(&self) -> CredentialStatus {
        CredentialStatus {
            configured: self.is_configured(),
            deployment: self.deployment.kind(),
        }
    }

    /// Issue a credential valid from now.
    ///
    /// # Errors
    ///
    /// See [`Self::issue_at`].
    #[instrument(skip_all)]
    pub fn issue(&self, request: &CredentialRequest) -> Result<CredentialResponse, CredentialError> {
        let start = Instant::now();
        let result = self.issue_at(request, chrono::Utc::now().timestamp());

        match &result {
            Ok(_) => metrics::record_credential_issuance("success", start.elapsed()),
            Err(e) => {
                warn!(target: "credential.issuer", error = %e, "Credential issuance failed");
                metrics::record_credential_issuance(e.category(), start.elapsed());
            }
        }
        result
    }

    /// Issue a credential as of `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// - `CredentialError::NotHostedDeployment` - deployment is not hosted
    /// - `CredentialError::MissingAppId` - no app id configured
    /// - `CredentialError::MissingSigningKey` - no private key configured
    /// - `CredentialError::MissingUserId` - blank `user_id`
    /// - `CredentialError::InvalidRequest` - zero TTL or blank room
    /// - `CredentialError::Signing` - JWT encoding failed
    pub fn issue_at(
        &self,
        request: &CredentialRequest,
        now: i64,
    ) -> Result<CredentialResponse, CredentialError> {
        if self.deployment.kind() != DeploymentKind::Hosted {
            return Err(CredentialError::NotHostedDeployment);
        }
        let prefixed = self
            .deployment
            .prefixed_app_id()
            .ok_or(CredentialError::MissingAppId)?;
        let signing_key = self
            .signing_key
            .as_ref()
            .ok_or(CredentialError::MissingSigningKey)?;

        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(CredentialError::MissingUserId);
        }

        let ttl = match request.ttl_seconds {
            Some(0) => {
                return Err(CredentialError::InvalidRequest(
                    "ttl_seconds must be positive".to_string(),
                ))
            }
            Some(ttl) => ttl.min(MAX_TTL_SECONDS),
            None => self.default_ttl_seconds.min(MAX_TTL_SECONDS),
        };

        let room_name = request.room_name.trim();
        if room_name.is_empty() {
            return Err(CredentialError::InvalidRequest(
                "room_name is required".to_string(),
            ));
        }
        let room = if room_name == ROOM_WILDCARD {
            ROOM_WILDCARD.to_string()
        } else {
            scope_to_app(&prefixed, room_name)
        };

        let user_name = match request.user_name.trim() {
            "" => user_id.to_string(),
            name => name.to_string(),
        };

        let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
        let exp = now.saturating_add(ttl);
        let claims = CredentialClaims {
            aud: AUDIENCE.to_string(),
            context: CredentialContext {
                user: CredentialUser {
                    id: user_id.to_string(),
                    name: user_name,
                    avatar: request.user_avatar.clone(),
                    email: request.user_email.clone(),
                    moderator: flag(request.is_moderator),
                },
                features: request.features.map(CredentialFeatures::from),
            },
            exp,
            iss: ISSUER.to_string(),
            nbf: now - CLOCK_SKEW_SECONDS,
            room,
            sub: prefixed.clone(),
        };

        let kid = self.kid(&prefixed);
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(kid.clone());

        let token = encode(&header, &claims, signing_key)
            .map_err(|e| CredentialError::Signing(format!("JWT signing operation failed: {e}")))?;

        debug!(
            target: "credential.issuer",
            kid = %kid,
            room = %claims.room,
            moderator = request.is_moderator,
            ttl_seconds = ttl,
            "Credential issued"
        );

        Ok(CredentialResponse {
            token,
            expires_at: exp,
        })
    }

    /// Header key id: the prefixed app id, optionally followed by
    /// `/{key_id}`. A key id that already carries the prefix is used as is.
    fn kid(&self, prefixed: &str) -> String {
        match self.key_id.as_deref().map(str::trim) {
            None => prefixed.to_string(),
            Some(key_id) if key_id.starts_with(APP_ID_PREFIX) => key_id.to_string(),
            Some(key_id) => format!("{prefixed}/{key_id}"),
        }
    }
}
