//! Fixed test identifiers for deterministic tests

/// Hosted app id without its prefix.
pub const TEST_APP_ID: &str = "tenant42";

/// [`TEST_APP_ID`] with the hosted prefix.
pub const TEST_PREFIXED_APP_ID: &str = "vpaas-magic-cookie-tenant42";

/// Hosted domain.
pub const TEST_HOSTED_DOMAIN: &str = "8x8.vc";

/// Signing key id as configured (unprefixed).
pub const TEST_KEY_ID: &str = "key-2025-01";

// Users
pub const TEST_USER_COUNSELOR: &str = "user-counselor-17";
pub const TEST_USER_CLIENT: &str = "user-client-42";

// Rooms
pub const TEST_ROOM: &str = "intake-7";
pub const TEST_ROOM_OTHER: &str = "followup-3";

/// Fixed issuance instant (2033-05-18T03:33:20Z).
pub const TEST_NOW: i64 = 2_000_000_000;
