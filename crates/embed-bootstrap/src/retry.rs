//! Backoff and failure classification for embed library loads.
//!
//! A failed script tag carries no status code, so the policy has to guess
//! whether the service is rate limiting us:
//!
//! - Hosted deployments treat every failure as a rate-limit signal. Hosted
//!   edges answer bursts with opaque 429s, which surface as a bare `error`
//!   event. Genuine outages get misclassified as rate limiting; that is kept.
//! - Other deployments treat the first failure as generic and only classify
//!   later failures as rate limited once a prior failure was flagged.
//!
//! Delays grow as `base * 2^attempt` plus jitter, capped at [`MAX_DELAY`].
//!
//! | attempt | generic (1s base) | rate limited (5s base) |
//! |---------|-------------------|------------------------|
//! | 0       | 1.0 - 1.2s        | 5.0 - 6.5s             |
//! | 1       | 2.0 - 2.4s        | 10 - 13s               |
//! | 2       | 4.0 - 4.8s        | 20 - 26s               |
//! | 3       | 8.0 - 9.6s        | 30s (cap)              |

use crate::errors::LoadError;
use common::config::DeploymentKind;
use std::time::Duration;

/// Retries allowed after the first attempt.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for generic failures.
pub const GENERIC_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Base delay once rate limiting is suspected.
pub const RATE_LIMIT_BASE_DELAY: Duration = Duration::from_millis(5000);

/// Upper bound on any retry delay.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Jitter fraction for generic retries.
pub const GENERIC_JITTER: f64 = 0.2;

/// Jitter fraction for rate-limited retries.
pub const RATE_LIMIT_JITTER: f64 = 0.3;

/// How long the loader refuses fresh loads after rate-limit exhaustion.
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// One scheduled retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAttempt {
    /// Index of the attempt that will run after `delay`.
    pub attempt_index: u32,
    pub is_rate_limited: bool,
    pub delay: Duration,
}

/// Outcome of a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry(LoadAttempt),
    Exhausted(LoadError),
}

/// Retry policy. Pure: holds only constants.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub generic_base: Duration,
    pub rate_limit_base: Duration,
    pub max_delay: Duration,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            generic_base: GENERIC_BASE_DELAY,
            rate_limit_base: RATE_LIMIT_BASE_DELAY,
            max_delay: MAX_DELAY,
            cooldown: RATE_LIMIT_COOLDOWN,
        }
    }
}

impl RetryPolicy {
    /// Decide whether the failure of attempt `attempt_index` looks like rate
    /// limiting.
    #[must_use]
    pub fn classify(
        &self,
        attempt_index: u32,
        kind: DeploymentKind,
        previously_rate_limited: bool,
    ) -> bool {
        match kind {
            DeploymentKind::Hosted => true,
            DeploymentKind::Free | DeploymentKind::SelfHosted => {
                attempt_index > 0 && previously_rate_limited
            }
        }
    }

    /// Delay before retrying after the failure of attempt `attempt_index`.
    #[must_use]
    pub fn compute_delay(&self, attempt_index: u32, is_rate_limited: bool) -> Duration {
        self.delay_with_jitter(attempt_index, is_rate_limited, rand::random::<f64>())
    }

    /// Deterministic core of [`Self::compute_delay`]. `jitter_sample` is a
    /// uniform sample in `[0, 1)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_with_jitter(
        &self,
        attempt_index: u32,
        is_rate_limited: bool,
        jitter_sample: f64,
    ) -> Duration {
        let (base, jitter_fraction) = if is_rate_limited {
            (self.rate_limit_base, RATE_LIMIT_JITTER)
        } else {
            (self.generic_base, GENERIC_JITTER)
        };

        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let multiplier = 1u64.checked_shl(attempt_index).unwrap_or(u64::MAX);
        let raw_ms = base_ms.saturating_mul(multiplier);
        if raw_ms >= max_ms {
            return self.max_delay;
        }

        let sample = jitter_sample.clamp(0.0, 1.0);
        let jitter_ms = (raw_ms as f64 * jitter_fraction * sample).round() as u64;
        Duration::from_millis(raw_ms.saturating_add(jitter_ms)).min(self.max_delay)
    }

    /// Decide what follows the failure of attempt `failed_index`.
    ///
    /// The next attempt index is `failed_index + 1`; past `max_retries` the
    /// cycle is terminal.
    #[must_use]
    pub fn next_attempt(&self, failed_index: u32, is_rate_limited: bool) -> RetryDecision {
        let next_index = failed_index.saturating_add(1);
        if next_index > self.max_retries {
            let err = if is_rate_limited {
                LoadError::RateLimitExhausted {
                    attempts: next_index,
                }
            } else {
                LoadError::LoadExhausted {
                    attempts: next_index,
                }
            };
            return RetryDecision::Exhausted(err);
        }

        RetryDecision::Retry(LoadAttempt {
            attempt_index: next_index,
            is_rate_limited,
            delay: self.compute_delay(failed_index, is_rate_limited),
        })
    }
}
