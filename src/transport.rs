//! Loopback client for the desktop companion.
//!
//! Every public operation swallows its failures: the outcome is reflected in
//! [`ConnectionState`] and the log, never returned as an error.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};

use crate::context::PageContextPayload;
use crate::settings::{PortConfig, SettingsError, SettingsStore};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const STATUS_PATH: &str = "/status";
const ACTIVITY_PATH: &str = "/browser-activity";
const CONTEXT_PATH: &str = "/page-context";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("companion unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("companion rejected the token")]
    Unauthorized,
    #[error("malformed status response: {0}")]
    MalformedStatus(String),
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
    #[error("no usable token")]
    NotConnected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub token: Option<String>,
}

impl ConnectionState {
    fn disconnected() -> Self {
        Self::default()
    }

    fn usable_token(&self) -> Option<&str> {
        if self.connected {
            self.token.as_deref()
        } else {
            None
        }
    }
}

/// Body of `POST /browser-activity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub url: String,
    pub title: String,
    pub timestamp: String,
    pub browser: String,
}

impl ActivityRecord {
    /// Builds a record stamped with the current UTC time.
    pub fn now(url: &str, title: &str, browser: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            browser: browser.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// No usable token even after probing.
    Skipped,
    /// 401; the token was cleared and a re-probe issued.
    Rejected,
    Failed,
}

#[derive(Debug, Default)]
struct ClientState {
    connection: ConnectionState,
    /// Port the current token was issued on. A token is only used against
    /// the port it came from, so stale probe results are harmless.
    probed_port: Option<u16>,
    last_activity_sent: Option<Instant>,
}

impl ClientState {
    fn token_for(&self, port: u16) -> Option<String> {
        if self.probed_port == Some(port) {
            self.connection.usable_token().map(str::to_string)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct CompanionClient {
    http: Client,
    settings: Arc<SettingsStore>,
    state: Arc<Mutex<ClientState>>,
}

impl CompanionClient {
    pub fn new(settings: Arc<SettingsStore>) -> Result<Self> {
        let http = Client::builder()
            .no_proxy()
            .user_agent(concat!("focusbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            settings,
            state: Arc::new(Mutex::new(ClientState::default())),
        })
    }

    pub async fn connection(&self) -> ConnectionState {
        self.state.lock().await.connection.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connection.connected
    }

    pub async fn last_activity_sent(&self) -> Option<Instant> {
        self.state.lock().await.last_activity_sent
    }

    /// Stores a new companion port and drops the connection in one step.
    ///
    /// Both happen under the state lock, so no reader sees the new port
    /// paired with the old connection. Returns whether the port changed.
    pub async fn switch_port(&self, port: PortConfig) -> Result<bool, SettingsError> {
        let mut state = self.state.lock().await;
        let changed = self.settings.set_port(port)?;
        if changed {
            state.connection = ConnectionState::disconnected();
            state.probed_port = None;
        }
        Ok(changed)
    }

    /// Clears a connection that belongs to another port, then probes `port`.
    pub async fn port_changed(&self, port: PortConfig) {
        {
            let mut state = self.state.lock().await;
            if state.probed_port != Some(port.get()) {
                state.connection = ConnectionState::disconnected();
                state.probed_port = None;
            }
        }
        self.probe().await;
    }

    /// `GET /status`; adopts the returned token on 2xx.
    pub async fn probe(&self) -> bool {
        let port = self.settings.port();
        let base = port.base_url();

        let result = self.fetch_status(&base).await;

        let mut state = self.state.lock().await;
        if self.settings.port() != port {
            log_debug!("discarding probe of {}: port changed meanwhile", base);
            return false;
        }
        match result {
            Ok(token) => {
                log_info!(
                    "companion available at {} (token: {})",
                    base,
                    if token.is_some() { "yes" } else { "no" }
                );
                state.connection = ConnectionState {
                    connected: true,
                    token,
                };
                state.probed_port = Some(port.get());
                true
            }
            Err(err) => {
                log_debug!("companion unavailable at {}: {}", base, err);
                state.connection = ConnectionState::disconnected();
                state.probed_port = None;
                false
            }
        }
    }

    pub async fn send_activity(&self, record: &ActivityRecord) -> SendOutcome {
        let outcome = self.send(ACTIVITY_PATH, record).await;
        if outcome == SendOutcome::Delivered {
            self.state.lock().await.last_activity_sent = Some(Instant::now());
        }
        outcome
    }

    pub async fn send_context(&self, payload: &PageContextPayload) -> SendOutcome {
        self.send(CONTEXT_PATH, payload).await
    }

    async fn send<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> SendOutcome {
        let (token, base) = match self.ensure_token().await {
            Some(found) => found,
            None => {
                log_debug!("skipping {}: {}", path, TransportError::NotConnected);
                return SendOutcome::Skipped;
            }
        };

        match self.post(&base, path, &token, body).await {
            Ok(()) => SendOutcome::Delivered,
            Err(TransportError::Unauthorized) => {
                log_info!("token rejected on {}; refreshing", path);
                {
                    let mut state = self.state.lock().await;
                    state.connection = ConnectionState::disconnected();
                    state.probed_port = None;
                }
                self.probe().await;
                SendOutcome::Rejected
            }
            Err(err @ TransportError::Unreachable(_)) => {
                log_warn!("send to {} failed: {}", path, err);
                let mut state = self.state.lock().await;
                state.connection = ConnectionState::disconnected();
                state.probed_port = None;
                SendOutcome::Failed
            }
            Err(err) => {
                log_warn!("send to {} failed: {}", path, err);
                SendOutcome::Failed
            }
        }
    }

    /// Current token, probing first when there is none for the configured port.
    async fn ensure_token(&self) -> Option<(String, String)> {
        let port = self.settings.port();
        if let Some(token) = self.state.lock().await.token_for(port.get()) {
            return Some((token, port.base_url()));
        }

        self.probe().await;

        let port = self.settings.port();
        let token = self.state.lock().await.token_for(port.get())?;
        Some((token, port.base_url()))
    }

    async fn fetch_status(&self, base: &str) -> Result<Option<String>, TransportError> {
        let response = self
            .http
            .get(format!("{base}{STATUS_PATH}"))
            .send()
            .await
            .map_err(TransportError::Unreachable)?;

        if !response.status().is_success() {
            return Err(TransportError::UnexpectedStatus(response.status().as_u16()));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|err| TransportError::MalformedStatus(err.to_string()))?;
        Ok(body.token)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        base: &str,
        path: &str,
        token: &str,
        body: &T,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .post(format!("{base}{path}"))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(TransportError::Unreachable)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized),
            status => Err(TransportError::UnexpectedStatus(status.as_u16())),
        }
    }
}
