use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::tracker::{BrowserRuntime, TabInfo};

#[derive(Debug, Default)]
struct TabMirror {
    tabs: HashMap<i64, TabInfo>,
    /// Active tab per window.
    active: HashMap<i64, i64>,
}

/// Browser state mirrored from the tab snapshots the extension forwards.
#[derive(Clone, Default)]
pub struct HostRuntime {
    mirror: Arc<Mutex<TabMirror>>,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_tab(&self, tab: TabInfo) {
        let mut mirror = self.mirror.lock().await;
        if tab.active {
            mirror.active.insert(tab.window_id, tab.id);
        }
        mirror.tabs.insert(tab.id, tab);
    }

    pub async fn mark_active(&self, window_id: i64, tab_id: i64) {
        let mut mirror = self.mirror.lock().await;
        if let Some(previous) = mirror.active.insert(window_id, tab_id) {
            if let Some(tab) = mirror.tabs.get_mut(&previous) {
                tab.active = false;
            }
        }
        if let Some(tab) = mirror.tabs.get_mut(&tab_id) {
            tab.active = true;
            tab.window_id = window_id;
        }
    }

    pub async fn remove_tab(&self, tab_id: i64) {
        let mut mirror = self.mirror.lock().await;
        mirror.tabs.remove(&tab_id);
        mirror.active.retain(|_, active| *active != tab_id);
    }
}

impl BrowserRuntime for HostRuntime {
    async fn get_tab(&self, tab_id: i64) -> Option<TabInfo> {
        self.mirror.lock().await.tabs.get(&tab_id).cloned()
    }

    async fn active_tab_in_window(&self, window_id: i64) -> Option<TabInfo> {
        let mirror = self.mirror.lock().await;
        let tab_id = mirror.active.get(&window_id)?;
        mirror.tabs.get(tab_id).cloned()
    }
}
