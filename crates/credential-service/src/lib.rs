//! Credential service library
//!
//! Issues short-lived, room-scoped credentials that let a browser join a
//! hosted video deployment. Self-hosted and free deployments need no
//! credential; the service still starts there and reports itself as
//! unconfigured.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `errors` - Error types and HTTP mapping
//! - `handlers` - HTTP request handlers
//! - `issuer` - Credential signing
//! - `observability` - Metrics
//! - `routes` - Router construction

pub mod config;
pub mod errors;
pub mod handlers;
pub mod issuer;
pub mod observability;
pub mod routes;
