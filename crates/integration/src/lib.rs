#[cfg(all(test, feature = "native"))]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use autologin_core::config::{AutoLoginConfig, load_config_from_str};
    use autologin_core::error::AutoLoginError;
    use autologin_core::event::{BroadcastEventBus, Event, EventBus, EventSource, StatusChangeEvent};
    use autologin_notifications::{NotificationError, Notifier, Severity, Toast};
    use autologin_presence::{
        AttemptOutcome, AutoLoginManager, AvailableStatus, DEFAULT_STATUS_ID, EVENT_PATTERN,
        InMemoryPresenceClient, Initialization, PresenceClient,
    };
    use autologin_test_support::fixtures;

    const TIMEOUT: Duration = Duration::from_millis(500);

    #[derive(Default)]
    struct RecordingNotifier {
        toasts: Mutex<Vec<Toast>>,
    }

    impl RecordingNotifier {
        fn toasts(&self) -> Vec<Toast> {
            self.toasts.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, toast: &Toast) -> Result<(), NotificationError> {
            self.toasts.lock().unwrap().push(toast.clone());
            Ok(())
        }
    }

    struct Harness {
        manager: Arc<AutoLoginManager>,
        client: Arc<InMemoryPresenceClient>,
        notifier: Arc<RecordingNotifier>,
        bus: Arc<dyn EventBus>,
        listener: Option<JoinHandle<Result<(), AutoLoginError>>>,
    }

    impl Harness {
        fn start(config: AutoLoginConfig, client: InMemoryPresenceClient) -> Self {
            let client = Arc::new(client);
            let notifier = Arc::new(RecordingNotifier::default());
            let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());

            let manager = Arc::new(AutoLoginManager::new(
                config,
                Some(client.clone() as Arc<dyn PresenceClient>),
                Some(notifier.clone() as Arc<dyn Notifier>),
            ));
            let subscription = bus.subscribe(EVENT_PATTERN).unwrap();
            let listener = tokio::spawn(manager.clone().listen(subscription));

            Self {
                manager,
                client,
                notifier,
                bus,
                listener: Some(listener),
            }
        }

        fn publish_status(&self, change: Option<StatusChangeEvent>) {
            self.bus
                .publish(Event::status_changed(EventSource::Platform, change))
                .unwrap();
        }

        fn publish_fixture(&self, name: &str) {
            let change = StatusChangeEvent::from_json(&fixtures::event(name)).unwrap();
            self.publish_status(Some(change));
        }

        async fn shutdown(&mut self) {
            self.bus
                .publish(Event::shutdown_requested(
                    EventSource::System("test".into()),
                    "test complete",
                ))
                .unwrap();
            if let Some(listener) = self.listener.take() {
                timeout(TIMEOUT, listener)
                    .await
                    .expect("listener should stop on shutdown")
                    .unwrap()
                    .unwrap();
            }
        }

        async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
            timeout(TIMEOUT, async {
                while !condition(self) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("condition not reached in time");
        }
    }

    fn config_fixture(name: &str) -> AutoLoginConfig {
        load_config_from_str(&fixtures::config(name))
            .unwrap()
            .auto_login
    }

    fn service() -> InMemoryPresenceClient {
        InMemoryPresenceClient::new(vec![
            AvailableStatus::new(DEFAULT_STATUS_ID, "Available"),
            AvailableStatus::new("0N5AVAILABLE", "Available (chat)"),
            AvailableStatus::new("0N5BUSY", "Busy"),
        ])
    }

    // ── 1. Initial login ─────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn fresh_session_establishes_presence() {
        let mut harness = Harness::start(config_fixture("immediate.toml"), service());

        assert_eq!(
            harness.manager.initialize().await,
            Initialization::Scheduled
        );
        assert_eq!(
            harness.manager.wait_for_scheduled().await,
            Some(AttemptOutcome::LoggedIn {
                status_id: DEFAULT_STATUS_ID.into()
            })
        );

        assert_eq!(harness.client.current().as_deref(), Some(DEFAULT_STATUS_ID));
        let toasts = harness.notifier.toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].severity, Severity::Success);

        harness.shutdown().await;
        assert!(harness.manager.snapshot().is_logged_in);
    }

    #[tokio::test(start_paused = true)]
    async fn agent_already_present_is_left_alone() {
        let mut harness = Harness::start(
            config_fixture("immediate.toml"),
            service().with_current_status("0N5BUSY"),
        );

        harness.manager.initialize().await;
        assert_eq!(
            harness.manager.wait_for_scheduled().await,
            Some(AttemptOutcome::AlreadyLoggedIn)
        );
        assert_eq!(harness.client.current().as_deref(), Some("0N5BUSY"));
        assert!(harness.notifier.toasts().is_empty());

        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn active_work_counts_as_present() {
        let client = service();
        client.assign_work("0Bz000000000001");
        let mut harness = Harness::start(config_fixture("immediate.toml"), client);

        assert_eq!(
            harness.manager.attempt_login().await,
            AttemptOutcome::AlreadyLoggedIn
        );
        assert_eq!(harness.client.current(), None);

        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_status_retries_with_first_available() {
        let client = InMemoryPresenceClient::new(vec![
            AvailableStatus::new("0N5AVAILABLE", "Available"),
            AvailableStatus::new("0N5BUSY", "Busy"),
        ]);
        let mut harness = Harness::start(config_fixture("immediate.toml"), client);

        assert_eq!(
            harness.manager.attempt_login().await,
            AttemptOutcome::LoggedIn {
                status_id: "0N5AVAILABLE".into()
            }
        );
        assert_eq!(harness.client.current().as_deref(), Some("0N5AVAILABLE"));

        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_service_reports_failure() {
        let mut harness = Harness::start(
            config_fixture("immediate.toml"),
            InMemoryPresenceClient::new(Vec::new()),
        );

        assert_matches!(
            harness.manager.attempt_login().await,
            AttemptOutcome::Failed { .. }
        );
        let toasts = harness.notifier.toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].severity, Severity::Warning);
        assert!(!harness.manager.is_processing());

        harness.shutdown().await;
    }

    // ── 2. Status changes over the bus ───────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn platform_sign_out_triggers_relogin_after_cooldown() {
        let mut harness = Harness::start(config_fixture("immediate.toml"), service());
        harness.manager.initialize().await;
        harness.manager.wait_for_scheduled().await;

        harness.client.sign_out();
        tokio::time::advance(Duration::from_secs(31)).await;
        harness.publish_fixture("logged-out.json");

        harness
            .wait_until(|h| h.client.current().is_some())
            .await;
        assert_eq!(harness.manager.snapshot().login_attempts, 2);
        assert_eq!(harness.notifier.toasts().len(), 2);

        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_within_cooldown_is_ignored() {
        let mut harness = Harness::start(config_fixture("immediate.toml"), service());
        harness.manager.initialize().await;
        harness.manager.wait_for_scheduled().await;
        assert!(harness.manager.snapshot().is_logged_in);

        harness.client.sign_out();
        harness.publish_fixture("logged-out.json");

        harness
            .wait_until(|h| !h.manager.snapshot().is_logged_in)
            .await;
        assert_eq!(harness.manager.snapshot().login_attempts, 1);
        assert_eq!(harness.client.current(), None);

        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn logged_in_notification_only_updates_flag() {
        let mut harness = Harness::start(config_fixture("immediate.toml"), service());

        harness.publish_fixture("available.json");
        harness
            .wait_until(|h| h.manager.snapshot().is_logged_in)
            .await;

        assert_eq!(harness.manager.snapshot().login_attempts, 0);
        assert_eq!(harness.client.current(), None);

        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn payloadless_notification_changes_nothing() {
        let mut harness = Harness::start(config_fixture("immediate.toml"), service());

        harness.publish_status(None);
        harness.shutdown().await;

        let snapshot = harness.manager.snapshot();
        assert_eq!(snapshot.login_attempts, 0);
        assert!(!snapshot.is_logged_in);
        assert_eq!(harness.client.current(), None);
    }

    // ── 3. Configuration variants ────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn disabled_configuration_is_inert() {
        let mut harness = Harness::start(config_fixture("disabled.toml"), service());

        assert_eq!(
            harness.manager.initialize().await,
            Initialization::Disabled
        );
        harness.publish_fixture("logged-out.json");
        harness.shutdown().await;

        assert_eq!(harness.manager.snapshot().login_attempts, 0);
        assert_eq!(harness.client.current(), None);
        assert!(harness.notifier.toasts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_configuration_applies_override_and_marker() {
        let dir = TempDir::new().unwrap();
        let config = AutoLoginConfig {
            marker_path: Some(dir.path().join("session.marker")),
            ..config_fixture("full.toml")
        };

        let mut harness = Harness::start(config.clone(), service());
        assert_eq!(
            harness.manager.initialize().await,
            Initialization::Scheduled
        );
        assert_eq!(
            harness.manager.wait_for_scheduled().await,
            Some(AttemptOutcome::LoggedIn {
                status_id: "0N5AVAILABLE".into()
            })
        );
        assert!(harness.notifier.toasts().is_empty());

        // Status-id derivation: a status id alone means logged in.
        harness.publish_fixture("logged-out.json");
        harness
            .wait_until(|h| !h.manager.snapshot().is_logged_in)
            .await;
        harness.publish_fixture("status-only.json");
        harness
            .wait_until(|h| h.manager.snapshot().is_logged_in)
            .await;

        // Relaunching while the session is still open is a reload.
        let mut reloaded = Harness::start(config.clone(), service());
        assert_eq!(
            reloaded.manager.initialize().await,
            Initialization::SkippedReload
        );

        // A clean shutdown ends the session; the next launch is fresh.
        harness.shutdown().await;
        let mut next = Harness::start(config, service());
        assert_eq!(
            next.manager.initialize().await,
            Initialization::Scheduled
        );

        reloaded.shutdown().await;
        next.shutdown().await;
    }

    // ── 4. Lifecycle ─────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn shutdown_event_cancels_pending_login() {
        let mut harness = Harness::start(AutoLoginConfig::default(), service());
        assert_eq!(
            harness.manager.initialize().await,
            Initialization::Scheduled
        );

        harness.shutdown().await;
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(harness.manager.wait_for_scheduled().await, None);
        assert_eq!(harness.client.current(), None);
        assert_eq!(harness.manager.snapshot().login_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_stops_when_bus_is_dropped() {
        let client = Arc::new(service());
        let manager = Arc::new(AutoLoginManager::new(
            config_fixture("immediate.toml"),
            Some(client as Arc<dyn PresenceClient>),
            None,
        ));
        let bus = BroadcastEventBus::default();
        let subscription = bus.subscribe(EVENT_PATTERN).unwrap();
        let listener = tokio::spawn(manager.clone().listen(subscription));

        drop(bus);

        timeout(TIMEOUT, listener)
            .await
            .expect("listener should stop when the bus closes")
            .unwrap()
            .unwrap();
    }
}
