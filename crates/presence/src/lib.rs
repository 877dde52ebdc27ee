pub mod client;
pub mod launch;
pub mod resolver;
pub mod session;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use autologin_core::config::{AutoLoginConfig, LaunchCheck};
use autologin_core::event::{Event, EventPayload, StatusChangeEvent};
use autologin_notifications::{NotificationDispatcher, Notifier, Toast};

#[cfg(feature = "native")]
use autologin_core::error::{AutoLoginError, EventBusError};
#[cfg(feature = "native")]
use autologin_core::event::{EventBus, EventSubscription};

pub use client::{
    AvailableStatus, InMemoryPresenceClient, PresenceClient, PresenceClientError, StatusDetail,
    WorkItem,
};
pub use launch::SessionMarker;
pub use resolver::{DEFAULT_STATUS_ID, ResolverOptions, StatusResolver};
pub use session::{AttemptPhase, SessionSnapshot};

use session::{AttemptGuard, SessionState};

/// Channels the manager listens on.
pub const EVENT_PATTERN: &str = "{presence,system}.**";

const TOAST_TITLE: &str = "Auto-Login";
const ERROR_TOAST_TITLE: &str = "Auto-Login Error";

/// How a call to [`AutoLoginManager::attempt_login`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Auto-login is switched off; nothing was called.
    Disabled,
    /// No presence client was supplied.
    ClientUnavailable,
    /// Another attempt holds the session.
    AlreadyInProgress,
    AlreadyLoggedIn,
    LoggedIn { status_id: String },
    /// Both the primary and the fallback set-status calls failed.
    Failed { reason: String },
    /// The attempt broke off unexpectedly.
    Aborted { reason: String },
}

/// What [`AutoLoginManager::initialize`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    Disabled,
    SkippedReload,
    SkippedAlreadyPresent,
    Scheduled,
}

enum LoginStep {
    AlreadyLoggedIn,
    StatusSet(String),
    Failed(PresenceClientError),
}

struct Presence {
    client: Arc<dyn PresenceClient>,
    resolver: StatusResolver,
}

struct ScheduledLogin {
    token: CancellationToken,
    handle: JoinHandle<Option<AttemptOutcome>>,
}

pub struct AutoLoginManager {
    config: AutoLoginConfig,
    presence: Option<Presence>,
    notifications: NotificationDispatcher,
    state: Mutex<SessionState>,
    scheduled: Mutex<Option<ScheduledLogin>>,
}

impl AutoLoginManager {
    pub fn new(
        config: AutoLoginConfig,
        client: Option<Arc<dyn PresenceClient>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let presence = client.map(|client| Presence {
            resolver: StatusResolver::new(client.clone(), ResolverOptions::from(&config)),
            client,
        });

        Self {
            config,
            presence,
            notifications: NotificationDispatcher::new(notifier),
            state: Mutex::new(SessionState::default()),
            scheduled: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AutoLoginConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        session::lock(&self.state).snapshot()
    }

    pub fn is_processing(&self) -> bool {
        self.snapshot().is_processing
    }

    /// Reset the session and, unless disabled or skipped by the launch
    /// check, schedule one login attempt after the configured delay.
    /// Calling it again cancels a still-pending attempt first. An attempt
    /// already in flight keeps the session until it finishes.
    pub async fn initialize(self: &Arc<Self>) -> Initialization {
        self.cancel_scheduled();
        session::lock(&self.state).reset();

        if !self.config.enabled {
            info!("auto-login is disabled");
            return Initialization::Disabled;
        }

        if let Some(skipped) = self.run_launch_check().await {
            return skipped;
        }

        self.schedule_initial_attempt();
        Initialization::Scheduled
    }

    /// Wait for the attempt scheduled by [`initialize`](Self::initialize).
    /// Returns `None` if nothing is pending or the attempt was cancelled.
    pub async fn wait_for_scheduled(&self) -> Option<AttemptOutcome> {
        let scheduled = self.scheduled().take()?;
        match scheduled.handle.await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(error = %error, "scheduled auto-login task failed");
                None
            }
        }
    }

    /// End the session: cancel any pending scheduled attempt and, with the
    /// reload-marker launch check, remove the marker so the next launch
    /// counts as fresh. An attempt already running completes normally.
    pub fn shutdown(&self) {
        if self.cancel_scheduled() {
            info!("pending auto-login cancelled");
        }

        if self.config.launch_check == LaunchCheck::ReloadMarker {
            let marker = SessionMarker::new(self.config.marker_path());
            if let Err(error) = marker.clear() {
                warn!(
                    path = %marker.path().display(),
                    error = %error,
                    "failed to clear session marker"
                );
            }
        }
    }

    pub async fn attempt_login(&self) -> AttemptOutcome {
        if !self.config.enabled {
            debug!("auto-login is disabled, not attempting");
            return AttemptOutcome::Disabled;
        }

        let Some(presence) = &self.presence else {
            error!("presence client not available");
            self.notifications.dispatch(Toast::error(
                "Error",
                "Unable to access the presence service",
            ));
            return AttemptOutcome::ClientUnavailable;
        };

        let Some(guard) = AttemptGuard::begin(&self.state) else {
            debug!("auto-login already in progress");
            return AttemptOutcome::AlreadyInProgress;
        };
        let attempt = guard.attempt();
        info!(attempt, "attempting auto-login");

        let step = AssertUnwindSafe(self.login_sequence(presence))
            .catch_unwind()
            .await;

        match step {
            Ok(LoginStep::AlreadyLoggedIn) => {
                info!(attempt, "agent already holds a presence status");
                guard.set_logged_in(true);
                AttemptOutcome::AlreadyLoggedIn
            }
            Ok(LoginStep::StatusSet(status_id)) => {
                info!(attempt, status_id = %status_id, "presence established");
                guard.set_logged_in(true);
                if self.config.show_success_toast {
                    self.notifications.dispatch(Toast::success(
                        TOAST_TITLE,
                        "Successfully established presence",
                    ));
                }
                AttemptOutcome::LoggedIn { status_id }
            }
            Ok(LoginStep::Failed(failure)) => {
                warn!(attempt, error = %failure, "auto-login failed");
                guard.set_logged_in(false);
                self.notifications.dispatch(Toast::warning(
                    TOAST_TITLE,
                    format!("Failed to establish presence: {failure}"),
                ));
                AttemptOutcome::Failed {
                    reason: failure.to_string(),
                }
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(attempt, reason = %reason, "auto-login aborted");
                guard.set_logged_in(false);
                self.notifications.dispatch(Toast::error(
                    ERROR_TOAST_TITLE,
                    format!("Error establishing presence: {reason}"),
                ));
                AttemptOutcome::Aborted { reason }
            }
        }
    }

    /// React to a status-change notification. Returns the outcome when the
    /// notification triggered a re-login attempt.
    pub async fn on_status_changed(
        &self,
        change: Option<&StatusChangeEvent>,
    ) -> Option<AttemptOutcome> {
        let Some(change) = change else {
            debug!("status change delivered without a payload");
            return None;
        };

        let logged_in = self.config.login_derivation.derive(change);
        info!(
            status = change.display_status(),
            channels = change.channels.len(),
            logged_in,
            "presence status changed"
        );
        session::lock(&self.state).is_logged_in = logged_in;

        if !self.config.enabled {
            debug!("auto-login is disabled, ignoring status change");
            return None;
        }
        if logged_in {
            return None;
        }

        let (phase, last_attempt_at) = {
            let session = session::lock(&self.state);
            (session.phase, session.last_attempt_at)
        };
        if phase == AttemptPhase::Attempting {
            debug!("login attempt in flight, not re-triggering");
            return None;
        }

        let cooldown = Duration::from_millis(self.config.relogin_cooldown_ms);
        if let Some(elapsed) = last_attempt_at.map(|at| at.elapsed()) {
            if elapsed <= cooldown {
                debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "within re-login cooldown"
                );
                return None;
            }
        }

        info!("agent appears logged out, attempting auto-login");
        Some(self.attempt_login().await)
    }

    pub async fn handle_event(&self, event: &Event) -> Option<AttemptOutcome> {
        match &event.payload {
            EventPayload::PresenceStatusChanged { change } => {
                self.on_status_changed(change.as_ref()).await
            }
            EventPayload::ShutdownRequested { reason } => {
                debug!(reason = %reason, "shutdown requested");
                self.shutdown();
                None
            }
        }
    }

    /// Consume status-change and shutdown events until the bus closes or a
    /// shutdown is requested.
    #[cfg(feature = "native")]
    pub async fn run(self: Arc<Self>, event_bus: Arc<dyn EventBus>) -> Result<(), AutoLoginError> {
        let sub = event_bus.subscribe(EVENT_PATTERN)?;
        self.listen(sub).await
    }

    /// Like [`run`](Self::run), on a subscription taken by the caller so that
    /// no event published after subscribing is missed.
    #[cfg(feature = "native")]
    pub async fn listen(self: Arc<Self>, mut sub: EventSubscription) -> Result<(), AutoLoginError> {
        loop {
            match sub.recv().await {
                Ok(event) => {
                    self.handle_event(&event).await;
                    if matches!(event.payload, EventPayload::ShutdownRequested { .. }) {
                        debug!("auto-login manager stopping");
                        return Ok(());
                    }
                }
                Err(EventBusError::ChannelClosed) => {
                    debug!("event bus closed, auto-login manager stopping");
                    self.shutdown();
                    return Ok(());
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "auto-login manager lagged, some status changes dropped");
                }
                Err(e) => {
                    error!(error = %e, "auto-login manager subscription error");
                    return Err(e.into());
                }
            }
        }
    }

    async fn login_sequence(&self, presence: &Presence) -> LoginStep {
        if presence.resolver.is_logged_in().await {
            return LoginStep::AlreadyLoggedIn;
        }

        let status_id = presence.resolver.target_status_id().await;
        debug!(status_id = %status_id, "setting presence status");
        let failure = match presence.client.set_status(&status_id).await {
            Ok(()) => return LoginStep::StatusSet(status_id),
            Err(failure) => failure,
        };

        warn!(status_id = %status_id, error = %failure, "setting presence status failed, retrying");
        let retry_id = match presence.resolver.retry_status_id().await {
            Ok(retry_id) => retry_id,
            Err(failure) => return LoginStep::Failed(failure),
        };

        debug!(status_id = %retry_id, "retrying with fallback status");
        match presence.client.set_status(&retry_id).await {
            Ok(()) => LoginStep::StatusSet(retry_id),
            Err(failure) => LoginStep::Failed(failure),
        }
    }

    async fn run_launch_check(&self) -> Option<Initialization> {
        match self.config.launch_check {
            LaunchCheck::None => None,
            LaunchCheck::ReloadMarker => {
                let marker = SessionMarker::new(self.config.marker_path());
                match marker.is_reload() {
                    Ok(true) => {
                        info!("reload detected, skipping auto-login");
                        Some(Initialization::SkippedReload)
                    }
                    Ok(false) => None,
                    Err(error) => {
                        warn!(
                            path = %marker.path().display(),
                            error = %error,
                            "session marker unavailable, proceeding with auto-login"
                        );
                        None
                    }
                }
            }
            LaunchCheck::ExistingPresence => {
                let presence = self.presence.as_ref()?;
                if !presence.resolver.is_logged_in().await {
                    return None;
                }
                info!("agent already present, skipping auto-login");
                session::lock(&self.state).is_logged_in = true;
                Some(Initialization::SkippedAlreadyPresent)
            }
        }
    }

    fn schedule_initial_attempt(self: &Arc<Self>) {
        let delay = Duration::from_millis(self.config.delay_ms);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let manager = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => None,
                _ = tokio::time::sleep(delay) => match manager.upgrade() {
                    Some(manager) => Some(manager.attempt_login().await),
                    None => {
                        debug!("auto-login manager dropped before scheduled attempt");
                        None
                    }
                },
            }
        });

        debug!(delay_ms = self.config.delay_ms, "initial auto-login scheduled");
        *self.scheduled() = Some(ScheduledLogin { token, handle });
    }

    fn scheduled(&self) -> MutexGuard<'_, Option<ScheduledLogin>> {
        self.scheduled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_scheduled(&self) -> bool {
        match self.scheduled().take() {
            Some(scheduled) => {
                scheduled.token.cancel();
                true
            }
            None => false,
        }
    }
}

impl Drop for AutoLoginManager {
    fn drop(&mut self) {
        let scheduled = self
            .scheduled
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(scheduled) = scheduled.take() {
            scheduled.token.cancel();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected failure".to_string()
    }
}
