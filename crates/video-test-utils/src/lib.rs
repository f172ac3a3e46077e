//! # Video Test Utilities
//!
//! Shared test utilities for the credential service and embed bootstrap.
//!
//! This crate provides:
//! - Fixed RSA fixtures (PEM key pairs for RS256 credentials)
//! - Fixed test IDs (app id, users, rooms, a fixed clock)
//! - Custom assertions (`CredentialAssertions` trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use video_test_utils::*;
//!
//! #[test]
//! fn test_example() {
//!     let (public_pem, private_pem) = test_signing_key();
//!     let token = issue_with(private_pem);
//!
//!     token
//!         .assert_valid_jwt()
//!         .assert_room("vpaas-magic-cookie-tenant42/intake-7")
//!         .assert_signed_with(public_pem);
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod test_ids;

// Re-export commonly used items
pub use assertions::*;
pub use crypto_fixtures::*;
pub use test_ids::*;
