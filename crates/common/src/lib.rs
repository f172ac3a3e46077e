//! Common utilities and types shared by the video embed components.

#![warn(clippy::pedantic)]

/// Module for deployment classification and room naming
pub mod config;

/// Module for credential request/response wire types
pub mod credential;

/// Module for secret types that prevent accidental logging
pub mod secret;
