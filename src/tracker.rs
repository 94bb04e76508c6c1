//! Tracks which tab the user is looking at.

use std::{future::Future, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Schemes that never count as user activity.
const INTERNAL_SCHEMES: [&str; 9] = [
    "chrome://",
    "chrome-extension://",
    "chrome-search://",
    "edge://",
    "brave://",
    "opera://",
    "vivaldi://",
    "about:",
    "moz-extension://",
];

/// A tab as reported by the browser runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: i64,
    #[serde(default)]
    pub window_id: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentTab {
    pub id: i64,
    pub url: String,
    pub title: String,
}

impl CurrentTab {
    /// `None` when the tab has no URL or sits on a browser-internal page.
    pub fn from_tab(tab: &TabInfo) -> Option<Self> {
        let url = tab.url.as_deref()?;
        if !is_trackable_url(url) {
            return None;
        }
        Some(Self {
            id: tab.id,
            url: url.to_string(),
            title: tab.title.clone().unwrap_or_default(),
        })
    }
}

pub fn is_trackable_url(url: &str) -> bool {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lower = trimmed.to_ascii_lowercase();
    !INTERNAL_SCHEMES
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    TabActivated { tab_id: i64 },
    TabUpdated { tab_id: i64, status: TabStatus, active: bool },
    /// `None` when focus moved to something that is not a browser window.
    WindowFocusChanged { window_id: Option<i64> },
}

/// Tab queries the tracker needs from the browser.
pub trait BrowserRuntime: Send + Sync + 'static {
    fn get_tab(&self, tab_id: i64) -> impl Future<Output = Option<TabInfo>> + Send;

    fn active_tab_in_window(&self, window_id: i64)
        -> impl Future<Output = Option<TabInfo>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerAction {
    /// A new current tab was adopted and should be reported.
    Adopted(CurrentTab),
    Cleared,
    Unchanged,
}

/// Owns the `current tab` cell and applies browser events to it.
pub struct TabTracker<R> {
    runtime: R,
    current: Arc<Mutex<Option<CurrentTab>>>,
}

impl<R: BrowserRuntime> TabTracker<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Shared handle to the current tab cell.
    pub fn current_cell(&self) -> Arc<Mutex<Option<CurrentTab>>> {
        Arc::clone(&self.current)
    }

    pub async fn current(&self) -> Option<CurrentTab> {
        self.current.lock().await.clone()
    }

    pub async fn handle(&self, event: BrowserEvent) -> TrackerAction {
        match event {
            BrowserEvent::TabActivated { tab_id } => {
                let tab = self.runtime.get_tab(tab_id).await;
                self.adopt(tab).await
            }
            BrowserEvent::TabUpdated {
                tab_id,
                status: TabStatus::Complete,
                active: true,
            } => {
                let tab = self.runtime.get_tab(tab_id).await;
                self.adopt(tab).await
            }
            BrowserEvent::TabUpdated { .. } => TrackerAction::Unchanged,
            BrowserEvent::WindowFocusChanged { window_id: None } => {
                *self.current.lock().await = None;
                log_debug!("browser lost focus; current tab cleared");
                TrackerAction::Cleared
            }
            BrowserEvent::WindowFocusChanged {
                window_id: Some(window_id),
            } => {
                let tab = self.runtime.active_tab_in_window(window_id).await;
                self.adopt(tab).await
            }
        }
    }

    async fn adopt(&self, tab: Option<TabInfo>) -> TrackerAction {
        // Unusable tabs keep the previous context instead of clearing it.
        let Some(next) = tab.as_ref().and_then(CurrentTab::from_tab) else {
            return TrackerAction::Unchanged;
        };

        log_debug!("adopting tab {} ({})", next.id, next.url);
        *self.current.lock().await = Some(next.clone());
        TrackerAction::Adopted(next)
    }
}
