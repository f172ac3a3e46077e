//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for widget credentials.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use serde_json::Value;

/// JWT header structure
#[derive(Debug, Deserialize)]
struct JwtHeader {
    pub alg: String,
    pub typ: String,
    #[serde(default)]
    pub kid: Option<String>,
}

/// Credential claims, loosely typed so assertions can inspect any field.
#[derive(Debug, Deserialize)]
struct CredentialClaims {
    pub aud: String,
    pub iss: String,
    pub sub: String,
    pub room: String,
    pub exp: i64,
    pub nbf: i64,
    pub context: Value,
}

fn segment(token: &str, index: usize) -> Vec<u8> {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT has no segment {index}"));
    URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {index}: {e}"))
}

fn header(token: &str) -> JwtHeader {
    serde_json::from_slice(&segment(token, 0)).expect("Failed to parse JWT header")
}

fn claims(token: &str) -> CredentialClaims {
    serde_json::from_slice(&segment(token, 1)).expect("Failed to parse JWT claims")
}

/// Custom assertions for issued credentials
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_kid("vpaas-magic-cookie-tenant42/key-1")
///     .assert_room("vpaas-magic-cookie-tenant42/intake-7")
///     .assert_moderator(true);
/// ```
pub trait CredentialAssertions {
    /// Assert the token is a structurally valid RS256 credential
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert the header key id
    fn assert_kid(&self, kid: &str) -> &Self;

    /// Assert the `room` claim
    fn assert_room(&self, room: &str) -> &Self;

    /// Assert the `sub` claim
    fn assert_subject(&self, subject: &str) -> &Self;

    /// Assert the user moderator flag (serialized as a string)
    fn assert_moderator(&self, moderator: bool) -> &Self;

    /// Assert `exp - nbf` equals `seconds`
    fn assert_lifetime(&self, seconds: i64) -> &Self;

    /// Assert the signature verifies against `public_key_pem`
    fn assert_signed_with(&self, public_key_pem: &str) -> &Self;
}

impl CredentialAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        let parts: Vec<_> = self.split('.').collect();
        assert_eq!(
            parts.len(),
            3,
            "JWT must have 3 parts (header.payload.signature), got {}",
            parts.len()
        );

        let header = header(self);
        assert_eq!(header.alg, "RS256", "Expected RS256 algorithm");
        assert_eq!(header.typ, "JWT", "Expected JWT type");
        assert!(header.kid.is_some(), "Expected a kid header");

        let claims = claims(self);
        assert_eq!(claims.aud, "jitsi", "Unexpected audience");
        assert_eq!(claims.iss, "chat", "Unexpected issuer");
        assert!(claims.nbf < claims.exp, "nbf must precede exp");

        self
    }

    fn assert_kid(&self, kid: &str) -> &Self {
        let header = header(self);
        assert_eq!(
            header.kid.as_deref(),
            Some(kid),
            "Expected kid '{}', got {:?}",
            kid,
            header.kid
        );
        self
    }

    fn assert_room(&self, room: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(claims.room, room, "Unexpected room claim");
        self
    }

    fn assert_subject(&self, subject: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.sub, subject,
            "Expected subject '{}', got '{}'",
            subject, claims.sub
        );
        self
    }

    fn assert_moderator(&self, moderator: bool) -> &Self {
        let claims = claims(self);
        let flag = &claims.context["user"]["moderator"];
        assert_eq!(
            flag,
            &Value::String(moderator.to_string()),
            "Expected moderator flag \"{moderator}\", got {flag}"
        );
        self
    }

    fn assert_lifetime(&self, seconds: i64) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.exp - claims.nbf,
            seconds,
            "Expected exp - nbf == {seconds}"
        );
        self
    }

    fn assert_signed_with(&self, public_key_pem: &str) -> &Self {
        let key = jsonwebtoken::DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .expect("Invalid public key PEM");
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
        validation.set_audience(&["jitsi"]);
        validation.set_issuer(&["chat"]);
        validation.validate_exp = false;

        let result = jsonwebtoken::decode::<Value>(self, &key, &validation);
        assert!(result.is_ok(), "Signature check failed: {:?}", result.err());
        self
    }
}
