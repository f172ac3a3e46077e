//! Observability for the credential service
//!
//! Handlers and the issuer use `#[instrument(skip_all)]` and log only
//! bounded fields (room, kid, status). Tokens, private keys and user email
//! addresses never appear in logs.

pub mod metrics;

pub use metrics::{init_metrics_recorder, record_credential_issuance, record_status_request};
