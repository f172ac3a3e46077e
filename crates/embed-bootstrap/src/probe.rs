//! Rendered-surface readiness probe.
//!
//! One of the three readiness signals the lifecycle manager races is "the
//! widget's surface (its iframe) exists in the host container". How that is
//! observed depends on the host, so it sits behind [`ReadinessProbe`].

use async_trait::async_trait;
use std::time::Duration;

/// Default interval for [`PollingProbe`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolves once the widget surface is present in a container.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Wait until the surface exists inside `container_id`. May never
    /// resolve; callers race it against other signals.
    async fn surface_rendered(&self, container_id: &str);
}

/// Probe that polls a host-supplied presence check.
pub struct PollingProbe<F> {
    check: F,
    interval: Duration,
}

impl<F> PollingProbe<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self {
            check,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl<F> ReadinessProbe for PollingProbe<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn surface_rendered(&self, container_id: &str) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if (self.check)(container_id) {
                return;
            }
        }
    }
}

/// Manually triggered probe for tests.
pub mod mock {
    use super::ReadinessProbe;
    use async_trait::async_trait;
    use tokio::sync::watch;

    /// Never resolves until [`ManualProbe::trigger`] is called.
    pub struct ManualProbe {
        tx: watch::Sender<bool>,
    }

    impl ManualProbe {
        pub fn new() -> Self {
            let (tx, _rx) = watch::channel(false);
            Self { tx }
        }

        /// Report the surface as rendered.
        pub fn trigger(&self) {
            self.tx.send_replace(true);
        }
    }

    impl Default for ManualProbe {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ReadinessProbe for ManualProbe {
        async fn surface_rendered(&self, _container_id: &str) {
            let mut rx = self.tx.subscribe();
            if rx.wait_for(|rendered| *rendered).await.is_err() {
                // Sender lives as long as the probe; park forever if not
                std::future::pending::<()>().await;
            }
        }
    }
}
