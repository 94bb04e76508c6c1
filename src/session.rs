//! The background session: owns connection, current tab and heartbeat.

use std::sync::Arc;

use anyhow::Result;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    context::{ContextRecord, PageContextPayload},
    control::{normalize_page_payload, ControlMessage, ControlResponse},
    heartbeat::{heartbeat_interval, HeartbeatController, HeartbeatTarget},
    settings::{PortConfig, SettingsStore},
    tracker::{BrowserEvent, BrowserRuntime, CurrentTab, TabTracker, TrackerAction},
    transport::{ActivityRecord, CompanionClient, SendOutcome},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const DEFAULT_BROWSER: &str = "Chrome";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Value of the `browser` field on activity records.
    pub browser: String,
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            browser: DEFAULT_BROWSER.to_string(),
            heartbeat_interval: heartbeat_interval(),
        }
    }
}

/// State shared with the heartbeat task.
struct SessionShared {
    client: CompanionClient,
    current_tab: Arc<Mutex<Option<CurrentTab>>>,
    browser: String,
}

impl SessionShared {
    async fn report(&self, tab: &CurrentTab) -> SendOutcome {
        let record = ActivityRecord::now(&tab.url, &tab.title, &self.browser);
        self.client.send_activity(&record).await
    }
}

impl HeartbeatTarget for SessionShared {
    async fn current_tab(&self) -> Option<CurrentTab> {
        self.current_tab.lock().await.clone()
    }

    async fn last_activity_sent(&self) -> Option<Instant> {
        self.client.last_activity_sent().await
    }

    async fn resend(&self, tab: CurrentTab) {
        self.report(&tab).await;
    }
}

pub struct BackgroundSession<R> {
    id: Uuid,
    settings: Arc<SettingsStore>,
    tracker: TabTracker<R>,
    shared: Arc<SessionShared>,
    heartbeat_period: Duration,
    heartbeat: Mutex<HeartbeatController>,
    port_watch: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl<R: BrowserRuntime> BackgroundSession<R> {
    pub fn new(runtime: R, settings: Arc<SettingsStore>, config: SessionConfig) -> Result<Self> {
        let client = CompanionClient::new(Arc::clone(&settings))?;
        let tracker = TabTracker::new(runtime);

        let shared = Arc::new(SessionShared {
            client,
            current_tab: tracker.current_cell(),
            browser: config.browser,
        });

        Ok(Self {
            id: Uuid::new_v4(),
            settings,
            tracker,
            shared,
            heartbeat_period: config.heartbeat_interval,
            heartbeat: Mutex::new(HeartbeatController::new()),
            port_watch: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> &CompanionClient {
        &self.shared.client
    }

    pub fn runtime(&self) -> &R {
        self.tracker.runtime()
    }

    pub async fn current_tab(&self) -> Option<CurrentTab> {
        self.tracker.current().await
    }

    /// Probes the companion, then starts the heartbeat and the port watcher.
    pub async fn start(&self) {
        log_info!("background session {} starting", self.id);
        self.shared.client.probe().await;

        self.heartbeat
            .lock()
            .await
            .start(Arc::clone(&self.shared), self.heartbeat_period);

        let mut guard = self.port_watch.lock().await;
        if guard.is_none() {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(watch_port(
                self.settings.observe_port(),
                self.shared.client.clone(),
                cancel.clone(),
            ));
            *guard = Some((handle, cancel));
        }
    }

    pub async fn shutdown(&self) {
        self.heartbeat.lock().await.stop().await;

        if let Some((handle, cancel)) = self.port_watch.lock().await.take() {
            cancel.cancel();
            if let Err(err) = handle.await {
                log::error!("port watcher failed to join: {err}");
            }
        }
        log_info!("background session {} stopped", self.id);
    }

    /// Applies a browser event and reports a newly adopted tab.
    ///
    /// The current tab is updated before this returns; the report itself runs
    /// on its own task so a stalled companion never holds up the next event.
    pub async fn handle_event(&self, event: BrowserEvent) -> TrackerAction {
        let action = self.tracker.handle(event).await;
        if let TrackerAction::Adopted(tab) = &action {
            let shared = Arc::clone(&self.shared);
            let tab = tab.clone();
            tokio::spawn(async move {
                shared.report(&tab).await;
            });
        }
        action
    }

    /// Dispatches a control message. `None` means no response is sent.
    pub async fn handle_control(&self, message: ControlMessage) -> Option<ControlResponse> {
        match message {
            ControlMessage::GetStatus => Some(ControlResponse::Status {
                connected: self.shared.client.is_connected().await,
                current_tab: self.current_tab().await,
            }),
            ControlMessage::CheckConnection => Some(ControlResponse::Connection {
                connected: self.shared.client.probe().await,
            }),
            ControlMessage::PageContext { data } => {
                match normalize_page_payload(&data) {
                    Some(payload) => {
                        log_info!("forwarding {} context from {}", context_kind(&payload), payload.url);
                        let client = self.shared.client.clone();
                        tokio::spawn(async move {
                            client.send_context(&payload).await;
                        });
                    }
                    None => log_debug!("page payload carried no usable context"),
                }
                Some(ControlResponse::Received { received: true })
            }
            ControlMessage::GetPort => Some(ControlResponse::Port {
                port: self.settings.port().get(),
            }),
            ControlMessage::SetPort { port } => Some(self.set_port(&port).await),
        }
    }

    /// Raw-JSON entry point; unknown actions are ignored.
    pub async fn handle_control_value(
        &self,
        value: serde_json::Value,
    ) -> Option<ControlResponse> {
        match ControlMessage::from_value(value) {
            Some(message) => self.handle_control(message).await,
            None => {
                log_debug!("ignoring unknown control message");
                None
            }
        }
    }

    async fn set_port(&self, raw: &serde_json::Value) -> ControlResponse {
        let current = self.settings.port().get();
        let port = match PortConfig::from_json(raw) {
            Ok(port) => port,
            Err(err) => {
                return ControlResponse::PortUpdated {
                    success: false,
                    port: current,
                    error: Some(err.to_string()),
                }
            }
        };

        // The port watcher re-probes the new port.
        match self.shared.client.switch_port(port).await {
            Ok(_) => ControlResponse::PortUpdated {
                success: true,
                port: port.get(),
                error: None,
            },
            Err(err) => {
                log_warn!("failed to store port {}: {}", port.get(), err);
                ControlResponse::PortUpdated {
                    success: false,
                    port: current,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

fn context_kind(payload: &PageContextPayload) -> &'static str {
    match payload.record {
        ContextRecord::Jira(_) => "jira",
        ContextRecord::Github(_) => "github",
    }
}

/// Invalidates the connection and re-probes whenever the stored port changes.
async fn watch_port(
    mut port_rx: watch::Receiver<PortConfig>,
    client: CompanionClient,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            changed = port_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let port = *port_rx.borrow_and_update();
                log_info!("companion port changed to {}", port.get());
                client.port_changed(port).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::fake::FakeRuntime;
    use serde_json::json;

    fn session(dir: &tempfile::TempDir) -> BackgroundSession<FakeRuntime> {
        let settings =
            Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());
        let runtime = FakeRuntime::default().with_tab(7, 1, "https://example.com/a", "A");
        BackgroundSession::new(runtime, settings, SessionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn get_port_reports_default() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        assert_eq!(
            session.handle_control(ControlMessage::GetPort).await,
            Some(ControlResponse::Port { port: 41417 })
        );
    }

    #[tokio::test]
    async fn invalid_port_is_rejected_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);

        for raw in [json!(80), json!("nope"), json!(70000), json!(null)] {
            let response = session
                .handle_control(ControlMessage::SetPort { port: raw })
                .await
                .unwrap();
            let ControlResponse::PortUpdated { success, port, error } = response else {
                panic!("unexpected response");
            };
            assert!(!success);
            assert_eq!(port, 41417);
            assert!(error.is_some());
        }
        assert!(!dir.path().join("settings.json").exists());
    }

    #[tokio::test]
    async fn valid_port_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        let response = session
            .handle_control(ControlMessage::SetPort { port: json!("50000") })
            .await;
        assert_eq!(
            response,
            Some(ControlResponse::PortUpdated {
                success: true,
                port: 50000,
                error: None
            })
        );
        assert_eq!(
            session.handle_control(ControlMessage::GetPort).await,
            Some(ControlResponse::Port { port: 50000 })
        );
    }

    #[tokio::test]
    async fn unknown_action_gets_no_response() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        assert_eq!(
            session
                .handle_control_value(json!({"action": "openDashboard"}))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn page_context_is_acknowledged_even_when_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir);
        let response = session
            .handle_control(ControlMessage::PageContext { data: json!({"foo": 1}) })
            .await;
        assert_eq!(response, Some(ControlResponse::Received { received: true }));
    }
}
