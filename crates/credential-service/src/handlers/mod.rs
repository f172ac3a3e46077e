//! HTTP request handlers for the credential service.

pub mod credentials;
pub mod health;

pub use credentials::{credential_status, issue_credential, AppState};
pub use health::{health_check, metrics_handler};
