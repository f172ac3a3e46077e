//! Embed Bootstrap Library
//!
//! Brings up the embedded third-party conferencing widget:
//!
//! - [`loader`] - process-wide script loader that fetches the embed library
//!   exactly once, deduplicating concurrent callers and retrying with backoff
//! - [`retry`] - backoff and rate-limit classification for failed loads
//! - [`lifecycle`] - per-widget controller: credential, load, instantiate,
//!   readiness detection, event wiring, disposal
//! - [`credentials`] - fetches signed credentials for hosted deployments
//!
//! # Architecture
//!
//! ```text
//! EmbedLifecycleManager (one per widget instance)
//! ├── DeploymentConfig      (common::config)
//! ├── CredentialProvider    (hosted deployments only)
//! ├── ScriptLoadCoordinator (shared Arc, one per process)
//! │   ├── ScriptHost        (script tags in the host runtime)
//! │   ├── Scheduler         (retry timers)
//! │   └── RetryPolicy
//! ├── WidgetFactory         (instantiates the widget)
//! └── ReadinessProbe        (rendered-surface signal)
//! ```
//!
//! Environment-specific pieces sit behind traits; each trait module carries a
//! `mock` submodule with a controllable fake for tests.

pub mod credentials;
pub mod errors;
pub mod lifecycle;
pub mod loader;
pub mod metrics;
pub mod probe;
pub mod retry;
pub mod scheduler;
pub mod widget;
