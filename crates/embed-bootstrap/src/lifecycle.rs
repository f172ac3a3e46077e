//! Per-instance embed lifecycle.
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> Disposed
//!                       |            |
//!                       v            |  retry / room change
//!                    Failed ---------+-> Initializing
//! ```
//!
//! [`EmbedLifecycleManager::initialize`] resolves the room, fetches a
//! credential when the deployment needs one, waits on the shared
//! [`ScriptLoadCoordinator`], then builds the widget. After that an instance
//! task owns the session: it pumps widget events into the
//! [`EmbedCallbacks`] registry and races three readiness signals (rendered
//! surface plus settle delay, conference joined, fallback timeout). The first
//! signal wins; the rest are ignored.
//!
//! Every initialization bumps a generation counter. Each step re-checks it
//! after an `.await`, so an initialization superseded by a newer one (or by
//! `dispose`) bails out without touching the new session.

use crate::credentials::CredentialProvider;
use crate::errors::{CredentialError, EmbedError};
use crate::loader::ScriptLoadCoordinator;
use crate::metrics;
use crate::probe::ReadinessProbe;
use crate::widget::{
    classify_runtime_error, Participant, RuntimeErrorClass, SessionKind, Widget, WidgetEvent,
    WidgetFactory, WidgetOptions,
};
use common::config::{DeploymentConfig, DeploymentKind, RoomIdentity};
use common::credential::CredentialRequest;
use common::secret::SecretString;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default container the widget is mounted into.
pub const DEFAULT_CONTAINER_ID: &str = "video-container";

/// Delay between the surface appearing and declaring readiness.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Readiness is declared after this long even if no signal fired.
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Disposed,
}

/// Which readiness signal won the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySignal {
    SurfaceRendered,
    ConferenceJoined,
    FallbackTimeout,
}

impl ReadySignal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReadySignal::SurfaceRendered => "surface_rendered",
            ReadySignal::ConferenceJoined => "conference_joined",
            ReadySignal::FallbackTimeout => "fallback_timeout",
        }
    }
}

/// Caller inputs for one initialization.
#[derive(Clone, Default)]
pub struct InitParams {
    pub room_name: String,
    pub display_name: String,
    /// Platform user id; required for a credential.
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub user_avatar: Option<String>,
    pub is_moderator: bool,
    pub session_kind: SessionKind,
}

impl InitParams {
    pub fn new(room_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            room_name: room_name.into(),
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_moderator(mut self, is_moderator: bool) -> Self {
        self.is_moderator = is_moderator;
        self
    }

    #[must_use]
    pub fn with_session_kind(mut self, kind: SessionKind) -> Self {
        self.session_kind = kind;
        self
    }
}

impl fmt::Debug for InitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitParams")
            .field("room_name", &self.room_name)
            .field("display_name", &self.display_name)
            .field("user_id", &self.user_id)
            .field("user_email", &self.user_email.as_ref().map(|_| "[REDACTED]"))
            .field("user_avatar", &self.user_avatar)
            .field("is_moderator", &self.is_moderator)
            .field("session_kind", &self.session_kind)
            .finish()
    }
}

/// Tunables for the manager.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub container_id: String,
    pub settle_delay: Duration,
    pub fallback_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            container_id: DEFAULT_CONTAINER_ID.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            fallback_timeout: DEFAULT_FALLBACK_TIMEOUT,
        }
    }
}

type Handler = Box<dyn Fn() + Send + Sync>;
type ParticipantHandler = Box<dyn Fn(&Participant) + Send + Sync>;
type IdHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Typed observer registry for embed events.
///
/// Populated before the manager is built; the manager stops dispatching to it
/// for a session as soon as that session is disposed.
#[derive(Default)]
pub struct EmbedCallbacks {
    ready: Vec<Handler>,
    participant_joined: Vec<ParticipantHandler>,
    participant_left: Vec<IdHandler>,
    ended: Vec<Handler>,
    error: Vec<IdHandler>,
}

impl EmbedCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_ready(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.ready.push(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_participant_joined(
        mut self,
        f: impl Fn(&Participant) + Send + Sync + 'static,
    ) -> Self {
        self.participant_joined.push(Box::new(f));
        self
    }

    /// Called with the id of the participant that left.
    #[must_use]
    pub fn on_participant_left(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.participant_left.push(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_ended(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.ended.push(Box::new(f));
        self
    }

    /// Called with a user-facing message when initialization fails.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error.push(Box::new(f));
        self
    }

    fn emit_ready(&self) {
        self.ready.iter().for_each(|f| f());
    }

    fn emit_participant_joined(&self, participant: &Participant) {
        self.participant_joined.iter().for_each(|f| f(participant));
    }

    fn emit_participant_left(&self, id: &str) {
        self.participant_left.iter().for_each(|f| f(id));
    }

    fn emit_ended(&self) {
        self.ended.iter().for_each(|f| f());
    }

    fn emit_error(&self, message: &str) {
        self.error.iter().for_each(|f| f(message));
    }
}

/// A live widget bound to one room.
struct EmbedSession {
    id: Uuid,
    room: RoomIdentity,
    deployment: DeploymentKind,
    credential: Option<SecretString>,
    widget: Box<dyn Widget>,
    cancel: CancellationToken,
}

impl EmbedSession {
    /// Cancel instance tasks and detach the widget. Errors are logged only.
    fn dispose(mut self) {
        self.cancel.cancel();
        if let Err(e) = self.widget.dispose() {
            warn!(
                target: "embed.lifecycle",
                session_id = %self.id,
                room = %self.room.formatted_name,
                error = %e,
                "Widget disposal failed"
            );
        } else {
            debug!(
                target: "embed.lifecycle",
                session_id = %self.id,
                room = %self.room.formatted_name,
                deployment = %self.deployment,
                authenticated = self.credential.is_some(),
                "Session disposed"
            );
        }
    }
}

struct Inner {
    state: EmbedState,
    generation: u64,
    /// Room of the initializing or active session.
    room: Option<RoomIdentity>,
    session: Option<EmbedSession>,
    last_params: Option<InitParams>,
    last_error: Option<String>,
    ready_signal: Option<ReadySignal>,
}

struct Shared {
    inner: Mutex<Inner>,
    callbacks: EmbedCallbacks,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.lock();
        inner.generation == generation && inner.state == EmbedState::Initializing
    }

    /// Transition to `Ready` once per generation.
    fn mark_ready(&self, generation: u64, signal: ReadySignal, started: Instant) {
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != EmbedState::Initializing {
                return;
            }
            inner.state = EmbedState::Ready;
            inner.ready_signal = Some(signal);
        }

        info!(
            target: "embed.lifecycle",
            signal = signal.as_str(),
            "Embed ready"
        );
        metrics::record_embed_ready(signal.as_str(), started.elapsed());
        self.callbacks.emit_ready();
    }

    /// Transition to `Failed` and notify observers, unless superseded.
    fn fail(&self, generation: u64, err: EmbedError) -> Result<(), EmbedError> {
        let message = err.user_message();
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != EmbedState::Initializing {
                debug!(target: "embed.lifecycle", error = %err, "Superseded initialization failed");
                return Ok(());
            }
            inner.state = EmbedState::Failed;
            inner.last_error = Some(message.to_string());
        }

        error!(target: "embed.lifecycle", error = %err, "Embed initialization failed");
        metrics::record_embed_failure(matches!(&err, EmbedError::Load(e) if e.is_rate_limited()));
        self.callbacks.emit_error(message);
        Err(err)
    }
}

/// Manages the embed for one host component.
pub struct EmbedLifecycleManager {
    deployment: DeploymentConfig,
    settings: LifecycleSettings,
    loader: Arc<ScriptLoadCoordinator>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    factory: Arc<dyn WidgetFactory>,
    probe: Arc<dyn ReadinessProbe>,
    shared: Arc<Shared>,
}

impl EmbedLifecycleManager {
    pub fn new(
        deployment: DeploymentConfig,
        loader: Arc<ScriptLoadCoordinator>,
        factory: Arc<dyn WidgetFactory>,
        probe: Arc<dyn ReadinessProbe>,
        callbacks: EmbedCallbacks,
    ) -> Self {
        Self {
            deployment,
            settings: LifecycleSettings::default(),
            loader,
            credentials: None,
            factory,
            probe,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: EmbedState::Uninitialized,
                    generation: 0,
                    room: None,
                    session: None,
                    last_params: None,
                    last_error: None,
                    ready_signal: None,
                }),
                callbacks,
            }),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn state(&self) -> EmbedState {
        self.shared.lock().state
    }

    /// Readiness signal of the current session, once ready.
    #[must_use]
    pub fn ready_signal(&self) -> Option<ReadySignal> {
        self.shared.lock().ready_signal
    }

    /// User-facing message of the last failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Room of the initializing or active session.
    #[must_use]
    pub fn room(&self) -> Option<RoomIdentity> {
        self.shared.lock().room.clone()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        self.shared.lock().session.as_ref().map(|s| s.id)
    }

    /// Start (or restart) the embed for `params.room_name`.
    ///
    /// Returns once the widget is built; readiness is reported through
    /// `on_ready`. A call for the room already initializing or ready is a
    /// no-op. A call for another room disposes the current session first.
    ///
    /// # Errors
    ///
    /// - `EmbedError::Load` - the embed library could not be loaded
    /// - `EmbedError::Credential` - the credential service failed
    /// - `EmbedError::ContainerMissing` - the host container is gone
    /// - `EmbedError::Widget` - the library refused to build the widget
    ///
    /// A superseded initialization returns `Ok(())`.
    #[instrument(skip_all, fields(room = %params.room_name))]
    pub async fn initialize(&self, params: InitParams) -> Result<(), EmbedError> {
        let started = Instant::now();
        let room = self.deployment.room_identity(&params.room_name);

        let (generation, previous) = {
            let mut inner = self.shared.lock();
            let same_room = inner.room.as_ref() == Some(&room);
            if same_room && matches!(inner.state, EmbedState::Initializing | EmbedState::Ready) {
                debug!(
                    target: "embed.lifecycle",
                    state = ?inner.state,
                    "Room already initializing or ready, ignoring"
                );
                return Ok(());
            }

            inner.generation += 1;
            inner.state = EmbedState::Initializing;
            inner.room = Some(room.clone());
            inner.last_params = Some(params.clone());
            inner.last_error = None;
            inner.ready_signal = None;
            (inner.generation, inner.session.take())
        };

        if let Some(previous) = previous {
            info!(
                target: "embed.lifecycle",
                from = %previous.room.formatted_name,
                to = %room.formatted_name,
                "Room changed, disposing previous session"
            );
            previous.dispose();
        }

        info!(
            target: "embed.lifecycle",
            deployment = %self.deployment.kind(),
            formatted_room = %room.formatted_name,
            "Initializing embed"
        );

        let credential = match self.acquire_credential(&params, &room).await {
            Ok(credential) => credential,
            Err(e) => return self.shared.fail(generation, e),
        };
        if !self.shared.is_current(generation) {
            debug!(target: "embed.lifecycle", "Initialization superseded after credential fetch");
            return Ok(());
        }

        let url = self.deployment.external_library_url();
        if let Err(e) = self.loader.ensure_loaded(&url).await {
            return self.shared.fail(generation, EmbedError::Load(e));
        }
        if !self.shared.is_current(generation) {
            debug!(target: "embed.lifecycle", "Initialization superseded after script load");
            return Ok(());
        }

        let container_id = self.settings.container_id.clone();
        if !self.factory.container_present(&container_id) {
            return self
                .shared
                .fail(generation, EmbedError::ContainerMissing(container_id));
        }

        let options = WidgetOptions {
            domain: self.deployment.domain().to_string(),
            room_name: room.formatted_name.clone(),
            container_id: container_id.clone(),
            display_name: params.display_name.clone(),
            email: params.user_email.clone(),
            avatar: params.user_avatar.clone(),
            credential: credential.clone(),
            session_kind: params.session_kind,
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let widget = match self.factory.create_widget(options, events_tx) {
            Ok(widget) => widget,
            Err(e) => return self.shared.fail(generation, e),
        };

        let session = EmbedSession {
            id: Uuid::new_v4(),
            room,
            deployment: self.deployment.kind(),
            credential,
            widget,
            cancel: CancellationToken::new(),
        };
        let session_id = session.id;
        let cancel = session.cancel.clone();

        {
            let mut inner = self.shared.lock();
            if inner.generation != generation || inner.state != EmbedState::Initializing {
                drop(inner);
                debug!(target: "embed.lifecycle", "Initialization superseded, discarding widget");
                session.dispose();
                return Ok(());
            }
            inner.session = Some(session);
        }

        info!(target: "embed.lifecycle", %session_id, "Widget created, awaiting readiness");

        let monitor = SessionMonitor {
            shared: Arc::clone(&self.shared),
            probe: Arc::clone(&self.probe),
            settings: self.settings.clone(),
            generation,
            session_id,
            started,
        };
        tokio::spawn(monitor.run(events_rx, cancel));

        Ok(())
    }

    /// Clear the last failure and run the last initialization again.
    ///
    /// # Errors
    ///
    /// Same as [`Self::initialize`].
    pub async fn retry(&self) -> Result<(), EmbedError> {
        let (params, previous) = {
            let mut inner = self.shared.lock();
            let Some(params) = inner.last_params.clone() else {
                warn!(target: "embed.lifecycle", "Retry requested before any initialization");
                return Ok(());
            };
            if inner.state == EmbedState::Initializing {
                debug!(target: "embed.lifecycle", "Retry ignored while initializing");
                return Ok(());
            }

            inner.generation += 1;
            inner.state = EmbedState::Uninitialized;
            inner.room = None;
            inner.last_error = None;
            (params, inner.session.take())
        };

        if let Some(previous) = previous {
            previous.dispose();
        }

        info!(target: "embed.lifecycle", "Retrying embed initialization");
        self.initialize(params).await
    }

    /// Tear down the session. Safe to call any number of times.
    ///
    /// Does not cancel a shared script load in progress.
    pub fn dispose(&self) {
        let session = {
            let mut inner = self.shared.lock();
            if inner.state == EmbedState::Disposed {
                return;
            }
            inner.generation += 1;
            inner.state = EmbedState::Disposed;
            inner.room = None;
            inner.ready_signal = None;
            inner.session.take()
        };

        if let Some(session) = session {
            session.dispose();
        }
        debug!(target: "embed.lifecycle", "Embed manager disposed");
    }

    async fn acquire_credential(
        &self,
        params: &InitParams,
        room: &RoomIdentity,
    ) -> Result<Option<SecretString>, EmbedError> {
        let Some(provider) = self
            .credentials
            .as_ref()
            .filter(|provider| provider.is_configured())
        else {
            if self.deployment.requires_credential() {
                warn!(
                    target: "embed.lifecycle",
                    "Hosted deployment without a credential provider, joining unauthenticated"
                );
            }
            return Ok(None);
        };

        let Some(user_id) = params
            .user_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
        else {
            warn!(target: "embed.lifecycle", "No user id, proceeding without credential");
            return Ok(None);
        };

        let request = CredentialRequest {
            user_id: user_id.to_string(),
            user_name: params.display_name.clone(),
            user_email: params.user_email.clone(),
            user_avatar: params.user_avatar.clone(),
            is_moderator: params.is_moderator,
            room_name: room.raw_name.clone(),
            ttl_seconds: None,
            features: None,
        };

        match provider.fetch(&request).await {
            Ok(token) => Ok(Some(token)),
            Err(CredentialError::MissingUserId) => {
                warn!(target: "embed.lifecycle", "No user id, proceeding without credential");
                Ok(None)
            }
            Err(e) => Err(EmbedError::Credential(e)),
        }
    }
}

impl Drop for EmbedLifecycleManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Instance task for one session.
struct SessionMonitor {
    shared: Arc<Shared>,
    probe: Arc<dyn ReadinessProbe>,
    settings: LifecycleSettings,
    generation: u64,
    session_id: Uuid,
    started: Instant,
}

impl SessionMonitor {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<WidgetEvent>,
        cancel: CancellationToken,
    ) {
        let (joined_tx, mut joined_rx) = watch::channel(false);

        let probe = Arc::clone(&self.probe);
        let container_id = self.settings.container_id.clone();
        let settle_delay = self.settings.settle_delay;
        let fallback_timeout = self.settings.fallback_timeout;

        let readiness = async move {
            tokio::select! {
                () = async {
                    probe.surface_rendered(&container_id).await;
                    tokio::time::sleep(settle_delay).await;
                } => ReadySignal::SurfaceRendered,
                () = async {
                    if joined_rx.wait_for(|joined| *joined).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                } => ReadySignal::ConferenceJoined,
                () = tokio::time::sleep(fallback_timeout) => ReadySignal::FallbackTimeout,
            }
        };
        tokio::pin!(readiness);

        let mut ready = false;
        let mut events_open = true;
        let mut ended = false;

        while !ready || events_open {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(
                        target: "embed.lifecycle",
                        session_id = %self.session_id,
                        "Session task cancelled"
                    );
                    return;
                }
                signal = &mut readiness, if !ready => {
                    ready = true;
                    self.shared.mark_ready(self.generation, signal, self.started);
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if event == WidgetEvent::ConferenceJoined {
                            joined_tx.send_replace(true);
                        }
                        self.handle_event(event, &mut ended);
                    }
                    None => events_open = false,
                },
            }
        }
    }

    fn handle_event(&self, event: WidgetEvent, ended: &mut bool) {
        let callbacks = &self.shared.callbacks;
        match event {
            WidgetEvent::ConferenceJoined => {
                info!(
                    target: "embed.lifecycle",
                    session_id = %self.session_id,
                    "Conference joined"
                );
            }
            WidgetEvent::ParticipantJoined(participant) => {
                debug!(
                    target: "embed.lifecycle",
                    participant_id = %participant.id,
                    "Participant joined"
                );
                callbacks.emit_participant_joined(&participant);
            }
            WidgetEvent::ParticipantLeft { id } => {
                debug!(target: "embed.lifecycle", participant_id = %id, "Participant left");
                callbacks.emit_participant_left(&id);
            }
            WidgetEvent::ReadyToClose | WidgetEvent::ConferenceLeft => {
                if !*ended {
                    *ended = true;
                    info!(
                        target: "embed.lifecycle",
                        session_id = %self.session_id,
                        "Conference ended"
                    );
                    callbacks.emit_ended();
                }
            }
            WidgetEvent::Error { name, message } => {
                let class = classify_runtime_error(&name, &message);
                metrics::record_widget_error(class.as_str());
                match class {
                    RuntimeErrorClass::ExpectedWarning => {
                        debug!(
                            target: "embed.lifecycle",
                            error_name = %name,
                            error = %message,
                            "Ignoring expected widget warning"
                        );
                    }
                    RuntimeErrorClass::Diagnostic => {
                        warn!(
                            target: "embed.lifecycle",
                            session_id = %self.session_id,
                            error_name = %name,
                            error = %message,
                            "Widget runtime error"
                        );
                    }
                }
            }
        }
    }
}
