//! Widget instantiation seam.
//!
//! The third-party library constructs the conferencing widget inside a host
//! container and reports what happens to it through an event stream. Both
//! live behind [`WidgetFactory`] / [`Widget`]; events are delivered on an
//! unbounded mpsc channel the lifecycle manager owns.

use crate::errors::EmbedError;
use common::secret::SecretString;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Whether the session starts with video or audio only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionKind {
    #[default]
    Video,
    /// Camera off, no video quality controls.
    AudioOnly,
}

/// A remote participant as reported by the widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub display_name: Option<String>,
}

/// Events emitted by a live widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    ConferenceJoined,
    ParticipantJoined(Participant),
    ParticipantLeft { id: String },
    /// The user hung up from inside the widget.
    ReadyToClose,
    ConferenceLeft,
    Error { name: String, message: String },
}

/// Everything the library needs to build a widget.
#[derive(Debug, Clone)]
pub struct WidgetOptions {
    pub domain: String,
    /// Deployment-formatted room name.
    pub room_name: String,
    pub container_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    /// Signed credential for hosted deployments.
    pub credential: Option<SecretString>,
    pub session_kind: SessionKind,
}

impl WidgetOptions {
    /// Library config overrides for this session.
    #[must_use]
    pub fn config_overrides(&self) -> Value {
        match self.session_kind {
            SessionKind::Video => json!({
                "prejoinPageEnabled": false,
                "disableDeepLinking": true,
            }),
            SessionKind::AudioOnly => json!({
                "prejoinPageEnabled": false,
                "disableDeepLinking": true,
                "startWithVideoMuted": true,
                "startAudioOnly": true,
                "toolbarButtons": ["microphone", "hangup", "participants-pane", "tileview"],
            }),
        }
    }
}

/// A constructed widget.
pub trait Widget: Send {
    /// Detach the widget from its container.
    ///
    /// # Errors
    ///
    /// Returns the library's error text; callers log it and move on.
    fn dispose(&mut self) -> Result<(), String>;
}

/// Builds widgets in the host runtime.
pub trait WidgetFactory: Send + Sync {
    /// True if the host container exists.
    fn container_present(&self, container_id: &str) -> bool;

    /// Construct a widget. Its events must be sent on `events` until the
    /// widget is disposed.
    ///
    /// # Errors
    ///
    /// Returns `EmbedError::Widget` if the library refuses the options.
    fn create_widget(
        &self,
        options: WidgetOptions,
        events: mpsc::UnboundedSender<WidgetEvent>,
    ) -> Result<Box<dyn Widget>, EmbedError>;
}

/// How a widget runtime error should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorClass {
    /// Permission prompts and analytics noise. Logged quietly.
    ExpectedWarning,
    /// Anything else. Logged for diagnostics; the widget stays up.
    Diagnostic,
}

impl RuntimeErrorClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeErrorClass::ExpectedWarning => "expected",
            RuntimeErrorClass::Diagnostic => "diagnostic",
        }
    }
}

const EXPECTED_MARKERS: &[&str] = &[
    "permission",
    "notallowederror",
    "denied",
    "analytics",
    "telemetry",
    "amplitude",
    "rtcstats",
];

/// Classify an error event raised by the widget.
#[must_use]
pub fn classify_runtime_error(name: &str, message: &str) -> RuntimeErrorClass {
    let haystack = format!("{name} {message}").to_lowercase();
    if EXPECTED_MARKERS
        .iter()
        .any(|marker| haystack.contains(marker))
    {
        RuntimeErrorClass::ExpectedWarning
    } else {
        RuntimeErrorClass::Diagnostic
    }
}

/// Fake widget runtime for testing.
pub mod mock {
    use super::{Widget, WidgetEvent, WidgetFactory, WidgetOptions};
    use crate::errors::EmbedError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Shared {
        containers: Mutex<HashSet<String>>,
        created: Mutex<Vec<WidgetOptions>>,
        senders: Mutex<Vec<mpsc::UnboundedSender<WidgetEvent>>>,
        disposals: AtomicUsize,
        live: AtomicUsize,
        peak_live: AtomicUsize,
        fail_create: AtomicBool,
        fail_dispose: AtomicBool,
    }

    /// Records every widget it builds and lets tests emit widget events.
    pub struct FakeWidgetFactory {
        shared: Arc<Shared>,
    }

    impl FakeWidgetFactory {
        /// Factory with a single container named `container_id`.
        pub fn new(container_id: &str) -> Self {
            let shared = Shared::default();
            shared
                .containers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(container_id.to_string());
            Self {
                shared: Arc::new(shared),
            }
        }

        pub fn remove_container(&self, container_id: &str) {
            self.shared
                .containers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(container_id);
        }

        /// Make the next `create_widget` calls fail.
        pub fn fail_create(&self, fail: bool) {
            self.shared.fail_create.store(fail, Ordering::SeqCst);
        }

        /// Make `Widget::dispose` report an error.
        pub fn fail_dispose(&self, fail: bool) {
            self.shared.fail_dispose.store(fail, Ordering::SeqCst);
        }

        /// Options of every widget created so far, in order.
        pub fn created(&self) -> Vec<WidgetOptions> {
            self.shared
                .created
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn creations(&self) -> usize {
            self.shared
                .created
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        pub fn disposals(&self) -> usize {
            self.shared.disposals.load(Ordering::SeqCst)
        }

        /// Widgets created and not yet disposed.
        pub fn live_widgets(&self) -> usize {
            self.shared.live.load(Ordering::SeqCst)
        }

        /// Most widgets that were ever alive at the same time.
        pub fn peak_live_widgets(&self) -> usize {
            self.shared.peak_live.load(Ordering::SeqCst)
        }

        /// Emit `event` from the most recently created widget.
        ///
        /// Returns false if no widget exists or its receiver is gone.
        pub fn emit(&self, event: WidgetEvent) -> bool {
            self.shared
                .senders
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .last()
                .is_some_and(|tx| tx.send(event).is_ok())
        }
    }

    impl WidgetFactory for FakeWidgetFactory {
        fn container_present(&self, container_id: &str) -> bool {
            self.shared
                .containers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(container_id)
        }

        fn create_widget(
            &self,
            options: WidgetOptions,
            events: mpsc::UnboundedSender<WidgetEvent>,
        ) -> Result<Box<dyn Widget>, EmbedError> {
            if self.shared.fail_create.load(Ordering::SeqCst) {
                return Err(EmbedError::Widget(
                    "TypeError: JitsiMeetExternalAPI is not a constructor".to_string(),
                ));
            }

            self.shared
                .created
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(options);
            self.shared
                .senders
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(events);
            let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.peak_live.fetch_max(live, Ordering::SeqCst);

            Ok(Box::new(FakeWidget {
                shared: Arc::clone(&self.shared),
                disposed: false,
            }))
        }
    }

    /// Widget handed out by [`FakeWidgetFactory`].
    pub struct FakeWidget {
        shared: Arc<Shared>,
        disposed: bool,
    }

    impl Widget for FakeWidget {
        fn dispose(&mut self) -> Result<(), String> {
            if self.disposed {
                return Err("widget already disposed".to_string());
            }
            self.disposed = true;
            self.shared.disposals.fetch_add(1, Ordering::SeqCst);
            self.shared.live.fetch_sub(1, Ordering::SeqCst);

            if self.shared.fail_dispose.load(Ordering::SeqCst) {
                Err("Cannot read properties of null (reading 'removeChild')".to_string())
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::FakeWidgetFactory;
    use super::*;

    fn options(kind: SessionKind) -> WidgetOptions {
        WidgetOptions {
            domain: "meet.jit.si".to_string(),
            room_name: "intake-7".to_string(),
            container_id: "video-container".to_string(),
            display_name: "Dr. Reyes".to_string(),
            email: None,
            avatar: None,
            credential: Some(SecretString::from("eyJhbGciOiJSUzI1NiJ9.e30.sig")),
            session_kind: kind,
        }
    }

    #[test]
    fn test_permission_and_analytics_errors_are_expected() {
        for (name, message) in [
            ("NotAllowedError", "Permission denied"),
            ("gum.permission_denied", "camera"),
            ("AnalyticsError", "failed to load amplitude"),
            ("conference.error", "rtcstats connection failed"),
        ] {
            assert_eq!(
                classify_runtime_error(name, message),
                RuntimeErrorClass::ExpectedWarning,
                "{name}: {message}"
            );
        }
    }

    #[test]
    fn test_other_errors_are_diagnostic() {
        assert_eq!(
            classify_runtime_error("conference.connectionError", "connection dropped"),
            RuntimeErrorClass::Diagnostic
        );
    }

    #[test]
    fn test_audio_only_overrides_disable_video() {
        let overrides = options(SessionKind::AudioOnly).config_overrides();
        assert_eq!(overrides.get("startWithVideoMuted"), Some(&json!(true)));
        assert_eq!(overrides.get("startAudioOnly"), Some(&json!(true)));

        let overrides = options(SessionKind::Video).config_overrides();
        assert!(overrides.get("startWithVideoMuted").is_none());
    }

    #[test]
    fn test_options_debug_redacts_credential() {
        let debug = format!("{:?}", options(SessionKind::Video));
        assert!(!debug.contains("eyJhbGci"));
    }

    #[tokio::test]
    async fn test_fake_factory_tracks_widgets() {
        let factory = FakeWidgetFactory::new("video-container");
        assert!(factory.container_present("video-container"));
        assert!(!factory.container_present("other"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut widget = factory
            .create_widget(options(SessionKind::Video), tx)
            .unwrap();
        assert_eq!(factory.live_widgets(), 1);

        assert!(factory.emit(WidgetEvent::ConferenceJoined));
        assert_eq!(rx.recv().await, Some(WidgetEvent::ConferenceJoined));

        widget.dispose().unwrap();
        assert!(widget.dispose().is_err());
        assert_eq!(factory.disposals(), 1);
        assert_eq!(factory.live_widgets(), 0);
    }
}
