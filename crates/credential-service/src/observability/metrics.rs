//! Metrics definitions for the credential service
//!
//! All metrics follow Prometheus naming conventions:
//! - `credential_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `status`: 4 values (success, not_configured, invalid_request, signing)
//! - `configured`: 2 values

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder.
///
/// # Errors
///
/// Returns error if the recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signing is CPU-only; anything past a few ms is worth seeing
        .set_buckets_for_metric(
            Matcher::Prefix("credential_issuance".to_string()),
            &[0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100],
        )
        .map_err(|e| format!("Failed to set issuance buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Record credential issuance duration and outcome
///
/// Metric: `credential_issuance_duration_seconds`, `credential_issuance_total`
/// Labels: `status`
pub fn record_credential_issuance(status: &str, duration: Duration) {
    histogram!("credential_issuance_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("credential_issuance_total", "status" => status.to_string()).increment(1);
}

/// Record a status probe
///
/// Metric: `credential_status_requests_total`
/// Labels: `configured`
pub fn record_status_request(configured: bool) {
    counter!("credential_status_requests_total", "configured" => configured.to_string())
        .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    #[test]
    fn test_record_credential_issuance() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_credential_issuance("success", Duration::from_millis(2));
            record_credential_issuance("success", Duration::from_millis(3));
            record_credential_issuance("invalid_request", Duration::from_micros(40));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let success_count = snapshot.iter().find_map(|(key, _, _, value)| {
            let is_success = key.key().name() == "credential_issuance_total"
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == "status" && l.value() == "success");
            match value {
                DebugValue::Counter(n) if is_success => Some(*n),
                _ => None,
            }
        });
        assert_eq!(success_count, Some(2));

        let histograms = snapshot
            .iter()
            .filter(|(key, _, _, _)| {
                key.kind() == MetricKind::Histogram
                    && key.key().name() == "credential_issuance_duration_seconds"
            })
            .count();
        assert_eq!(histograms, 2, "one histogram series per status");
    }

    #[test]
    fn test_record_status_request() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_status_request(false);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert!(snapshot.iter().any(|(key, _, _, value)| {
            key.key().name() == "credential_status_requests_total"
                && matches!(value, DebugValue::Counter(1))
        }));
    }
}
