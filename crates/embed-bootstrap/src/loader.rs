//! Process-wide loader for the embed library script.
//!
//! [`ScriptLoadCoordinator`] guarantees the external library is fetched at
//! most once at a time, no matter how many widget instances ask for it:
//!
//! 1. Library global already present: `Loaded`, no network.
//! 2. `RateLimited` and still cooling down: fail fast, no network.
//! 3. A load is in flight: join it (all callers share one `watch` channel).
//! 4. Otherwise start a load: attach to an existing script tag for the URL
//!    if the host has one, else insert exactly one.
//! 5. On load, verify the library global materialized before reporting
//!    success.
//! 6. On error, remove the failed tag and consult [`RetryPolicy`]; retries run
//!    as scheduler continuations while every caller keeps waiting; a terminal
//!    failure moves to `Error` or `RateLimited`.
//!
//! Continuations always re-check the *current* state and load generation
//! before acting, so a late timer can never clobber a newer cycle.
//!
//! One coordinator is created per process and shared as an `Arc`. Tests build
//! a fresh one per case.

use crate::errors::{LoadError, ScriptFailure};
use crate::metrics;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::scheduler::{Scheduler, TimerHandle};
use common::config::DeploymentKind;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// A pending script load in the host runtime.
pub type ScriptLoad = BoxFuture<'static, Result<(), ScriptFailure>>;

/// The runtime that owns script tags (the page, in a browser host).
pub trait ScriptHost: Send + Sync {
    /// True once the library's global entry point exists.
    fn library_available(&self) -> bool;

    /// Load events of a script tag for `url` that is already in the page.
    fn existing_script(&self, url: &str) -> Option<ScriptLoad>;

    /// Insert a script tag for `url` and return its load events.
    fn insert_script(&self, url: &str) -> ScriptLoad;

    /// Remove the script tag for `url`, if any.
    fn remove_script(&self, url: &str);
}

/// Loader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Error,
    RateLimited,
}

type LoadOutcome = Option<Result<(), LoadError>>;

struct Inner {
    state: LoadState,
    attempt: u32,
    rate_limit_flagged: bool,
    cooldown_until: Option<Instant>,
    in_flight: Option<watch::Receiver<LoadOutcome>>,
    pending_retry: Option<TimerHandle>,
    generation: u64,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state == LoadState::Loading
    }

    fn mark_loaded(&mut self) {
        self.state = LoadState::Loaded;
        self.attempt = 0;
        self.rate_limit_flagged = false;
        self.cooldown_until = None;
    }
}

/// Deduplicating, retrying loader for the embed library.
pub struct ScriptLoadCoordinator {
    host: Arc<dyn ScriptHost>,
    scheduler: Arc<dyn Scheduler>,
    policy: RetryPolicy,
    kind: DeploymentKind,
    inner: Mutex<Inner>,
}

impl ScriptLoadCoordinator {
    /// Create a coordinator with the default retry policy.
    pub fn new(
        host: Arc<dyn ScriptHost>,
        scheduler: Arc<dyn Scheduler>,
        kind: DeploymentKind,
    ) -> Arc<Self> {
        Self::with_policy(host, scheduler, kind, RetryPolicy::default())
    }

    pub fn with_policy(
        host: Arc<dyn ScriptHost>,
        scheduler: Arc<dyn Scheduler>,
        kind: DeploymentKind,
        policy: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            scheduler,
            policy,
            kind,
            inner: Mutex::new(Inner {
                state: LoadState::Idle,
                attempt: 0,
                rate_limit_flagged: false,
                cooldown_until: None,
                in_flight: None,
                pending_retry: None,
                generation: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> LoadState {
        self.lock().state
    }

    /// Index of the current (or last) attempt in this cycle.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.lock().attempt
    }

    /// Time left in the rate-limit cooldown, if one is active.
    #[must_use]
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.state, inner.cooldown_until) {
            (LoadState::RateLimited, Some(until)) => {
                Some(until.saturating_duration_since(Instant::now()))
            }
            _ => None,
        }
    }

    /// Make sure the embed library at `url` is loaded.
    ///
    /// Concurrent callers share a single load and all observe the same
    /// outcome.
    ///
    /// # Errors
    ///
    /// - `LoadError::RateLimited` - called during the rate-limit cooldown
    /// - `LoadError::RateLimitExhausted` / `LoadError::LoadExhausted` - retries exhausted
    /// - `LoadError::Aborted` - the coordinator was reset mid-load
    #[instrument(skip_all, fields(url = %url))]
    pub async fn ensure_loaded(self: &Arc<Self>, url: &str) -> Result<(), LoadError> {
        let mut receiver = {
            let mut inner = self.lock();

            if self.host.library_available() {
                // An in-flight load settles its own waiters
                if inner.in_flight.is_none() {
                    inner.mark_loaded();
                }
                return Ok(());
            }

            if inner.state == LoadState::RateLimited {
                let now = Instant::now();
                match inner.cooldown_until {
                    Some(until) if now < until => {
                        let remaining = until - now;
                        warn!(
                            target: "embed.loader",
                            remaining_ms = remaining.as_millis(),
                            "Refusing script load during rate-limit cooldown"
                        );
                        metrics::record_script_load("cooldown");
                        return Err(LoadError::RateLimited { remaining });
                    }
                    _ => {
                        info!(target: "embed.loader", "Rate-limit cooldown elapsed");
                        inner.state = LoadState::Idle;
                        inner.cooldown_until = None;
                        inner.attempt = 0;
                    }
                }
            }

            if let Some(rx) = &inner.in_flight {
                debug!(target: "embed.loader", "Joining in-flight script load");
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                inner.generation += 1;
                inner.state = LoadState::Loading;
                inner.attempt = 0;
                inner.in_flight = Some(rx.clone());

                tokio::spawn(Arc::clone(self).run_attempt(url.to_string(), tx, inner.generation));
                rx
            }
        };

        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map(|outcome| Option::clone(&outcome))
            .map_err(|_| LoadError::Aborted)?;

        outcome.unwrap_or(Err(LoadError::Aborted))
    }

    /// Abandon any in-flight load and return to `Idle`.
    ///
    /// Cancels a pending retry timer; callers waiting on the abandoned load
    /// observe `LoadError::Aborted`. Also clears an active cooldown.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if let Some(handle) = inner.pending_retry.take() {
            handle.cancel();
        }
        inner.generation += 1;
        inner.state = LoadState::Idle;
        inner.attempt = 0;
        inner.rate_limit_flagged = false;
        inner.cooldown_until = None;
        inner.in_flight = None;
        debug!(target: "embed.loader", "Script loader reset");
    }

    fn run_attempt(
        self: Arc<Self>,
        url: String,
        tx: watch::Sender<LoadOutcome>,
        generation: u64,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let attempt = {
                let mut inner = self.lock();
                if !inner.is_current(generation) {
                    debug!(target: "embed.loader", generation, "Stale load attempt ignored");
                    return;
                }
                inner.pending_retry = None;

                if self.host.library_available() {
                    inner.mark_loaded();
                    inner.in_flight = None;
                    tx.send_replace(Some(Ok(())));
                    return;
                }
                inner.attempt
            };

            let load = if let Some(load) = self.host.existing_script(&url) {
                debug!(target: "embed.loader", attempt, "Attaching to existing script tag");
                load
            } else {
                debug!(target: "embed.loader", attempt, "Inserting script tag");
                self.host.insert_script(&url)
            };

            let result = match load.await {
                Ok(()) if self.host.library_available() => Ok(()),
                Ok(()) => Err(ScriptFailure::new(
                    "script loaded but library entry point is missing",
                )),
                Err(failure) => Err(failure),
            };

            match result {
                Ok(()) => {
                    let mut inner = self.lock();
                    if inner.is_current(generation) {
                        info!(target: "embed.loader", attempt, "Embed library loaded");
                        metrics::record_script_load("success");
                        inner.mark_loaded();
                        inner.in_flight = None;
                        tx.send_replace(Some(Ok(())));
                    }
                }
                Err(failure) => self.handle_failure(url, tx, generation, &failure),
            }
        })
    }

    fn handle_failure(
        self: Arc<Self>,
        url: String,
        tx: watch::Sender<LoadOutcome>,
        generation: u64,
        failure: &ScriptFailure,
    ) {
        self.host.remove_script(&url);

        let mut inner = self.lock();
        if !inner.is_current(generation) {
            return;
        }

        let failed_index = inner.attempt;
        let is_rate_limited = failure.is_rate_limit_status()
            || self
                .policy
                .classify(failed_index, self.kind, inner.rate_limit_flagged);
        inner.rate_limit_flagged |= is_rate_limited;

        match self.policy.next_attempt(failed_index, is_rate_limited) {
            RetryDecision::Retry(next) => {
                warn!(
                    target: "embed.loader",
                    attempt = failed_index,
                    next_attempt = next.attempt_index,
                    delay_ms = next.delay.as_millis(),
                    rate_limited = is_rate_limited,
                    reason = %failure.reason,
                    "Script load failed, will retry"
                );
                metrics::record_script_load(if is_rate_limited {
                    "rate_limited"
                } else {
                    "retry"
                });

                inner.attempt = next.attempt_index;
                let continuation = Arc::clone(&self).run_attempt(url, tx, generation);
                inner.pending_retry = Some(self.scheduler.schedule(next.delay, continuation));
            }
            RetryDecision::Exhausted(err) => {
                if is_rate_limited {
                    inner.state = LoadState::RateLimited;
                    inner.cooldown_until = Some(Instant::now() + self.policy.cooldown);
                } else {
                    inner.state = LoadState::Error;
                }
                inner.in_flight = None;
                inner.pending_retry = None;

                error!(
                    target: "embed.loader",
                    attempts = failed_index + 1,
                    rate_limited = is_rate_limited,
                    reason = %failure.reason,
                    "Script load retries exhausted"
                );
                metrics::record_script_load("exhausted");
                tx.send_replace(Some(Err(err)));
            }
        }
    }
}

/// Fake script host for testing.
pub mod mock {
    use super::{ScriptHost, ScriptLoad};
    use crate::errors::ScriptFailure;
    use futures::future::{BoxFuture, FutureExt, Shared};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    type SharedLoad = Shared<BoxFuture<'static, Result<(), ScriptFailure>>>;

    /// Simulates a page that loads script tags after a fixed latency.
    ///
    /// Each inserted tag consumes the next scripted outcome (success when the
    /// script is empty). A successful load makes the library available
    /// unless [`FakeScriptHost::break_library`] was called.
    pub struct FakeScriptHost {
        outcomes: Mutex<VecDeque<Result<(), ScriptFailure>>>,
        tags: Mutex<HashMap<String, SharedLoad>>,
        library: Arc<AtomicBool>,
        broken: Arc<AtomicBool>,
        latency: Duration,
        insertions: AtomicUsize,
        removals: AtomicUsize,
    }

    impl FakeScriptHost {
        /// Host whose loads all succeed.
        pub fn new() -> Self {
            Self::with_outcomes(Vec::new())
        }

        /// Host that plays back `outcomes` for successive insertions.
        pub fn with_outcomes(outcomes: Vec<Result<(), ScriptFailure>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                tags: Mutex::new(HashMap::new()),
                library: Arc::new(AtomicBool::new(false)),
                broken: Arc::new(AtomicBool::new(false)),
                latency: Duration::from_millis(50),
                insertions: AtomicUsize::new(0),
                removals: AtomicUsize::new(0),
            }
        }

        /// Host whose next `count` loads fail without a status code.
        pub fn failing(count: usize) -> Self {
            Self::with_outcomes(
                (0..count)
                    .map(|i| Err(ScriptFailure::new(format!("error event #{i}"))))
                    .collect(),
            )
        }

        #[must_use]
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        /// Queue more outcomes.
        pub fn push_outcomes(&self, outcomes: Vec<Result<(), ScriptFailure>>) {
            self.outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(outcomes);
        }

        /// Loads succeed but the library global never appears.
        pub fn break_library(&self) {
            self.broken.store(true, Ordering::SeqCst);
        }

        /// Pretend the library was already loaded by someone else.
        pub fn set_library_available(&self, available: bool) {
            self.library.store(available, Ordering::SeqCst);
        }

        /// Put a tag in the page as another component would, resolving with
        /// `outcome` after the host latency. Not counted as an insertion.
        pub fn preinsert_script(&self, url: &str, outcome: Result<(), ScriptFailure>) {
            let load = self.make_load(outcome);
            self.tags
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.to_string(), load);
        }

        /// Number of script tags inserted through [`ScriptHost::insert_script`].
        pub fn insertions(&self) -> usize {
            self.insertions.load(Ordering::SeqCst)
        }

        pub fn removals(&self) -> usize {
            self.removals.load(Ordering::SeqCst)
        }

        /// Whether a tag for `url` is currently in the page.
        pub fn has_tag(&self, url: &str) -> bool {
            self.tags
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(url)
        }

        fn make_load(&self, outcome: Result<(), ScriptFailure>) -> SharedLoad {
            let latency = self.latency;
            let library = Arc::clone(&self.library);
            let broken = Arc::clone(&self.broken);

            let load: BoxFuture<'static, Result<(), ScriptFailure>> = Box::pin(async move {
                tokio::time::sleep(latency).await;
                if outcome.is_ok() && !broken.load(Ordering::SeqCst) {
                    library.store(true, Ordering::SeqCst);
                }
                outcome
            });
            load.shared()
        }
    }

    impl Default for FakeScriptHost {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ScriptHost for FakeScriptHost {
        fn library_available(&self) -> bool {
            self.library.load(Ordering::SeqCst)
        }

        fn existing_script(&self, url: &str) -> Option<ScriptLoad> {
            self.tags
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(url)
                .map(|load| load.clone().boxed())
        }

        fn insert_script(&self, url: &str) -> ScriptLoad {
            self.insertions.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or(Ok(()));

            let load = self.make_load(outcome);
            self.tags
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.to_string(), load.clone());
            load.boxed()
        }

        fn remove_script(&self, url: &str) {
            let removed = self
                .tags
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(url);
            if removed.is_some() {
                self.removals.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
