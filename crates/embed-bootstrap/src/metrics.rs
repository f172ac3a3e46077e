//! Metrics for the embed bootstrap.
//!
//! All metrics follow Prometheus naming conventions:
//! - `embed_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `outcome`: 5 values (success, retry, rate_limited, exhausted, cooldown)
//! - `signal`: 3 values (surface_rendered, conference_joined, fallback_timeout)
//! - `category`: 2 values (expected, diagnostic)

use metrics::{counter, histogram};
use std::time::Duration;

/// Record the outcome of one script load attempt.
///
/// Metric: `embed_script_load_attempts_total`
/// Labels: `outcome`
pub fn record_script_load(outcome: &str) {
    counter!("embed_script_load_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record which readiness signal won and how long initialization took.
///
/// Metric: `embed_ready_total`, `embed_initialize_duration_seconds`
/// Labels: `signal`
pub fn record_embed_ready(signal: &str, duration: Duration) {
    counter!("embed_ready_total", "signal" => signal.to_string()).increment(1);
    histogram!("embed_initialize_duration_seconds", "signal" => signal.to_string())
        .record(duration.as_secs_f64());
}

/// Record a failed initialization.
///
/// Metric: `embed_initialize_failures_total`
/// Labels: `rate_limited`
pub fn record_embed_failure(rate_limited: bool) {
    counter!("embed_initialize_failures_total", "rate_limited" => rate_limited.to_string())
        .increment(1);
}

/// Record a widget runtime error.
///
/// Metric: `embed_widget_errors_total`
/// Labels: `category`
pub fn record_widget_error(category: &str) {
    counter!("embed_widget_errors_total", "category" => category.to_string()).increment(1);
}
