//! Deployment classification for the conferencing service.
//!
//! A deployment is derived once from the `VIDEO_DOMAIN` / `VIDEO_APP_ID`
//! environment and never changes for the lifetime of the process. Everything
//! else (room name formatting, the external library URL, whether a signed
//! credential is needed) is a pure function of it.
//!
//! | domain                      | kind         | credential |
//! |-----------------------------|--------------|------------|
//! | `meet.jit.si` (or contains) | `Free`       | no         |
//! | `8x8.vc` (or contains)      | `Hosted`     | yes        |
//! | anything else               | `SelfHosted` | no         |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;

/// Public community deployment host.
pub const PUBLIC_HOST: &str = "meet.jit.si";

/// Hosted multi-tenant ("as-a-service") deployment host.
pub const HOSTED_HOST: &str = "8x8.vc";

/// Prefix every hosted app id must carry.
pub const APP_ID_PREFIX: &str = "vpaas-magic-cookie-";

/// Domain used when none is configured.
pub const DEFAULT_DOMAIN: &str = PUBLIC_HOST;

/// Environment variable holding the conferencing domain.
pub const DOMAIN_ENV_VAR: &str = "VIDEO_DOMAIN";

/// Environment variable holding the hosted app id.
pub const APP_ID_ENV_VAR: &str = "VIDEO_APP_ID";

/// Kind of conferencing deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentKind {
    /// Public community instance, no credential.
    Free,
    /// Hosted multi-tenant service reached through an app-id path prefix.
    Hosted,
    /// Operator-controlled instance.
    SelfHosted,
}

impl DeploymentKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentKind::Free => "free",
            DeploymentKind::Hosted => "hosted",
            DeploymentKind::SelfHosted => "self_hosted",
        }
    }
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    domain: String,
    app_id: Option<String>,
    kind: DeploymentKind,
}

/// A room name together with its deployment-specific form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomIdentity {
    /// Name as supplied by the caller.
    pub raw_name: String,
    /// Name passed to the conferencing service.
    pub formatted_name: String,
}

impl DeploymentConfig {
    /// Classify a deployment from its domain and optional app id.
    ///
    /// A hosted domain without an app id is accepted with a warning; room
    /// names and the library URL then fall back to their unprefixed forms.
    #[must_use]
    pub fn resolve(domain: &str, app_id: Option<&str>) -> Self {
        let domain = normalize_domain(domain);
        let app_id = app_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string);

        let kind = if domain.contains(PUBLIC_HOST) {
            DeploymentKind::Free
        } else if domain.contains(HOSTED_HOST) {
            DeploymentKind::Hosted
        } else {
            DeploymentKind::SelfHosted
        };

        if kind == DeploymentKind::Hosted && app_id.is_none() {
            tracing::warn!(
                target: "common.config",
                domain = %domain,
                "Hosted deployment configured without an app id; rooms will not be scoped"
            );
        }

        Self {
            domain,
            app_id,
            kind,
        }
    }

    /// Load the deployment from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&env::vars().collect())
    }

    /// Load the deployment from a `HashMap` (for testing).
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let domain = vars
            .get(DOMAIN_ENV_VAR)
            .map_or(DEFAULT_DOMAIN, String::as_str);
        Self::resolve(domain, vars.get(APP_ID_ENV_VAR).map(String::as_str))
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    #[must_use]
    pub fn kind(&self) -> DeploymentKind {
        self.kind
    }

    /// True when sessions on this deployment need a signed credential.
    #[must_use]
    pub fn requires_credential(&self) -> bool {
        self.kind == DeploymentKind::Hosted
    }

    /// The app id carrying its required prefix, for hosted deployments.
    #[must_use]
    pub fn prefixed_app_id(&self) -> Option<String> {
        match self.kind {
            DeploymentKind::Hosted => self.app_id.as_deref().map(prefix_app_id),
            DeploymentKind::Free | DeploymentKind::SelfHosted => None,
        }
    }

    /// Format a room name for this deployment.
    ///
    /// Hosted rooms are scoped as `{prefixed_app_id}/{raw}`. Formatting an
    /// already-scoped name returns it unchanged.
    #[must_use]
    pub fn format_room_name(&self, raw: &str) -> String {
        match self.prefixed_app_id() {
            Some(prefixed) => scope_to_app(&prefixed, raw),
            None => raw.to_string(),
        }
    }

    /// Build the room identity for a raw room name.
    #[must_use]
    pub fn room_identity(&self, raw: &str) -> RoomIdentity {
        RoomIdentity {
            raw_name: raw.to_string(),
            formatted_name: self.format_room_name(raw),
        }
    }

    /// URL of the external embed library for this deployment.
    #[must_use]
    pub fn external_library_url(&self) -> String {
        match self.prefixed_app_id() {
            Some(prefixed) => format!("https://{}/{}/external_api.js", self.domain, prefixed),
            None => format!("https://{}/external_api.js", self.domain),
        }
    }
}

/// Prepend the hosted app id prefix unless it is already present.
#[must_use]
pub fn prefix_app_id(app_id: &str) -> String {
    let app_id = app_id.trim();
    if app_id.starts_with(APP_ID_PREFIX) {
        app_id.to_string()
    } else {
        format!("{APP_ID_PREFIX}{app_id}")
    }
}

/// Scope `name` under `prefixed_app_id/` unless it already is.
#[must_use]
pub fn scope_to_app(prefixed_app_id: &str, name: &str) -> String {
    let scope = format!("{prefixed_app_id}/");
    if name.starts_with(&scope) {
        name.to_string()
    } else {
        format!("{scope}{name}")
    }
}

fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_ascii_lowercase();
    let domain = domain
        .strip_prefix("https://")
        .or_else(|| domain.strip_prefix("http://"))
        .unwrap_or(domain.as_str())
        .trim_end_matches('/');

    if domain.is_empty() {
        DEFAULT_DOMAIN.to_string()
    } else {
        domain.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn hosted(app_id: &str) -> DeploymentConfig {
        DeploymentConfig::resolve(HOSTED_HOST, Some(app_id))
    }

    #[test]
    fn test_public_host_is_free() {
        let config = DeploymentConfig::resolve("meet.jit.si", None);
        assert_eq!(config.kind(), DeploymentKind::Free);
        assert!(!config.requires_credential());
    }

    #[test]
    fn test_domain_containing_hosted_host_is_hosted() {
        let config = DeploymentConfig::resolve("stage.8x8.vc", Some("abc"));
        assert_eq!(config.kind(), DeploymentKind::Hosted);
        assert!(config.requires_credential());
    }

    #[test]
    fn test_other_domain_is_self_hosted() {
        let config = DeploymentConfig::resolve("video.clinic.example", Some("ignored"));
        assert_eq!(config.kind(), DeploymentKind::SelfHosted);
        assert_eq!(config.prefixed_app_id(), None);
    }

    #[test]
    fn test_hosted_without_app_id_is_not_an_error() {
        let config = DeploymentConfig::resolve(HOSTED_HOST, None);
        assert_eq!(config.kind(), DeploymentKind::Hosted);
        assert_eq!(config.format_room_name("abc"), "abc");
        assert_eq!(
            config.external_library_url(),
            "https://8x8.vc/external_api.js"
        );
    }

    #[test]
    fn test_domain_normalization() {
        let config = DeploymentConfig::resolve("  https://Meet.Jit.Si/ ", None);
        assert_eq!(config.domain(), "meet.jit.si");

        let config = DeploymentConfig::resolve("", None);
        assert_eq!(config.domain(), DEFAULT_DOMAIN);
    }

    #[test]
    fn test_blank_app_id_is_absent() {
        let config = DeploymentConfig::resolve(HOSTED_HOST, Some("   "));
        assert_eq!(config.app_id(), None);
    }

    #[test]
    fn test_format_room_name_free_is_unchanged() {
        let config = DeploymentConfig::resolve(PUBLIC_HOST, None);
        assert_eq!(config.format_room_name("abc"), "abc");
    }

    #[test]
    fn test_format_room_name_hosted_is_prefixed() {
        assert_eq!(
            hosted("X").format_room_name("abc"),
            "vpaas-magic-cookie-X/abc"
        );
    }

    #[test]
    fn test_format_room_name_is_idempotent() {
        let config = hosted("X");
        let once = config.format_room_name("abc");
        assert_eq!(config.format_room_name(&once), once);
    }

    #[test]
    fn test_prefixed_app_id_is_not_double_prefixed() {
        let config = hosted("vpaas-magic-cookie-X");
        assert_eq!(
            config.prefixed_app_id().as_deref(),
            Some("vpaas-magic-cookie-X")
        );
        assert_eq!(prefix_app_id(&prefix_app_id("X")), "vpaas-magic-cookie-X");
    }

    #[test]
    fn test_external_library_url() {
        assert_eq!(
            DeploymentConfig::resolve("video.clinic.example", None).external_library_url(),
            "https://video.clinic.example/external_api.js"
        );
        assert_eq!(
            hosted("X").external_library_url(),
            "https://8x8.vc/vpaas-magic-cookie-X/external_api.js"
        );
    }

    #[test]
    fn test_room_identity() {
        let identity = hosted("X").room_identity("session-42");
        assert_eq!(identity.raw_name, "session-42");
        assert_eq!(identity.formatted_name, "vpaas-magic-cookie-X/session-42");
    }

    #[test]
    fn test_from_vars_defaults_to_public_host() {
        let config = DeploymentConfig::from_vars(&HashMap::new());
        assert_eq!(config.domain(), DEFAULT_DOMAIN);
        assert_eq!(config.kind(), DeploymentKind::Free);
    }

    #[test]
    fn test_from_vars_hosted() {
        let vars = HashMap::from([
            (DOMAIN_ENV_VAR.to_string(), "8x8.vc".to_string()),
            (APP_ID_ENV_VAR.to_string(), "tenant".to_string()),
        ]);
        let config = DeploymentConfig::from_vars(&vars);
        assert_eq!(config.kind(), DeploymentKind::Hosted);
        assert_eq!(config.app_id(), Some("tenant"));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(DeploymentKind::SelfHosted.to_string(), "self_hosted");
        assert_eq!(
            serde_json::to_string(&DeploymentKind::Hosted).unwrap(),
            "\"hosted\""
        );
    }
}
