#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use focusbridge_lib::session::{BackgroundSession, SessionConfig};
use focusbridge_lib::settings::{PortConfig, SettingsStore};
use focusbridge_lib::tracker::{BrowserRuntime, TabInfo};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub auth: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct CompanionState {
    requests: Mutex<Vec<Recorded>>,
    token: Mutex<Option<String>>,
    /// Scripted statuses for POSTs; 200 once exhausted.
    post_statuses: Mutex<VecDeque<u16>>,
    /// Raw `/status` reply replacing the token body when set.
    status_reply: Mutex<Option<(u16, String)>>,
    status_delay: Mutex<Option<Duration>>,
    /// POSTs are recorded, then never answered.
    stall_posts: Mutex<bool>,
}

/// Stand-in for the desktop companion on an ephemeral loopback port.
pub struct FakeCompanion {
    pub port: u16,
    state: Arc<CompanionState>,
    server: JoinHandle<()>,
}

impl FakeCompanion {
    pub async fn start(token: &str) -> Self {
        let state = Arc::new(CompanionState::default());
        *state.token.lock().unwrap() = Some(token.to_string());

        let app = Router::new()
            .fallback(record_request)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            port,
            state,
            server,
        }
    }

    pub fn script_post_statuses(&self, statuses: &[u16]) {
        self.state
            .post_statuses
            .lock()
            .unwrap()
            .extend(statuses.iter().copied());
    }

    /// Answers every `/status` with `status` and the literal `body`.
    pub fn script_status(&self, status: u16, body: &str) {
        *self.state.status_reply.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn delay_status(&self, delay: Duration) {
        *self.state.status_delay.lock().unwrap() = Some(delay);
    }

    pub fn stall_posts(&self) {
        *self.state.stall_posts.lock().unwrap() = true;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    /// Polls until `predicate` holds or two seconds pass.
    pub async fn wait_until(&self, predicate: impl Fn(&[Recorded]) -> bool) -> bool {
        for _ in 0..200 {
            if predicate(&self.requests()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for FakeCompanion {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn record_request(
    State(state): State<Arc<CompanionState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);

    state.requests.lock().unwrap().push(Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        auth,
        body,
    });

    if uri.path() == "/status" {
        let delay = *state.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = state.status_reply.lock().unwrap().clone();
        if let Some((status, body)) = scripted {
            return (StatusCode::from_u16(status).unwrap(), body).into_response();
        }
        let token = state.token.lock().unwrap().clone();
        return (StatusCode::OK, Json(json!({ "token": token }))).into_response();
    }

    let stalled = *state.stall_posts.lock().unwrap();
    if stalled {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }

    let status = state.post_statuses.lock().unwrap().pop_front().unwrap_or(200);
    StatusCode::from_u16(status).unwrap().into_response()
}

/// Scripted browser: a fixed tab table plus the active tab per window.
#[derive(Default)]
pub struct FakeBrowser {
    tabs: Mutex<HashMap<i64, TabInfo>>,
    active: Mutex<HashMap<i64, i64>>,
}

impl FakeBrowser {
    pub fn with_tab(self, id: i64, window_id: i64, url: &str, title: &str) -> Self {
        self.tabs.lock().unwrap().insert(
            id,
            TabInfo {
                id,
                window_id,
                url: Some(url.to_string()),
                title: Some(title.to_string()),
                active: false,
            },
        );
        self
    }

    pub fn with_active(self, window_id: i64, tab_id: i64) -> Self {
        self.active.lock().unwrap().insert(window_id, tab_id);
        self
    }
}

impl BrowserRuntime for FakeBrowser {
    async fn get_tab(&self, tab_id: i64) -> Option<TabInfo> {
        self.tabs.lock().unwrap().get(&tab_id).cloned()
    }

    async fn active_tab_in_window(&self, window_id: i64) -> Option<TabInfo> {
        let tab_id = *self.active.lock().unwrap().get(&window_id)?;
        self.tabs.lock().unwrap().get(&tab_id).cloned()
    }
}

pub fn settings_on_port(dir: &TempDir, port: u16) -> Arc<SettingsStore> {
    let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
    store.set_port(PortConfig::new(port).unwrap()).unwrap();
    Arc::new(store)
}

pub fn session_with<R: BrowserRuntime>(
    runtime: R,
    settings: Arc<SettingsStore>,
    heartbeat: Duration,
) -> BackgroundSession<R> {
    let config = SessionConfig {
        browser: "Chrome".to_string(),
        heartbeat_interval: heartbeat,
    };
    BackgroundSession::new(runtime, settings, config).unwrap()
}
