//! Native-messaging host: turns frames from the extension shim into session calls.

pub mod codec;
pub mod runtime;

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{read_frame, read_frame_bytes, write_frame, MAX_FRAME_BYTES};
pub use runtime::HostRuntime;

use crate::{
    context::{DomElement, PageLocation, PageObserver},
    control::ControlResponse,
    session::BackgroundSession,
    tracker::{BrowserEvent, TabInfo, TabStatus},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Inbound frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostMessage {
    TabActivated {
        tab_id: i64,
        window_id: i64,
        #[serde(default)]
        tab: Option<TabInfo>,
    },
    TabUpdated {
        tab: TabInfo,
        #[serde(default)]
        status: Option<String>,
    },
    TabRemoved {
        tab_id: i64,
    },
    WindowFocusChanged {
        #[serde(default)]
        window_id: Option<i64>,
    },
    PageLoaded {
        tab_id: i64,
        #[serde(default)]
        load_id: Option<String>,
        url: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        dom: HashMap<String, DomElement>,
    },
    Control {
        #[serde(default)]
        id: Value,
        message: Value,
    },
}

#[derive(Debug, Serialize)]
struct ResponseFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a Value,
    body: &'a ControlResponse,
}

/// Page observers keyed by tab, each tagged with the load it belongs to.
#[derive(Default)]
struct PageLoads {
    observers: HashMap<i64, (String, PageObserver)>,
}

impl PageLoads {
    fn observer_for(&mut self, tab_id: i64, load_key: &str) -> &mut PageObserver {
        let entry = self
            .observers
            .entry(tab_id)
            .or_insert_with(|| (load_key.to_string(), PageObserver::new()));
        if entry.0 != load_key {
            *entry = (load_key.to_string(), PageObserver::new());
        }
        &mut entry.1
    }

    fn forget(&mut self, tab_id: i64) {
        self.observers.remove(&tab_id);
    }
}

/// Runs until the extension closes its end of the pipe.
pub async fn serve<Rd, Wr>(
    session: &BackgroundSession<HostRuntime>,
    mut reader: Rd,
    mut writer: Wr,
) -> Result<()>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut loads = PageLoads::default();

    while let Some(body) = read_frame_bytes(&mut reader).await? {
        let message: HostMessage = match serde_json::from_slice(&body) {
            Ok(message) => message,
            Err(err) => {
                log_warn!("ignoring malformed host frame: {err}");
                continue;
            }
        };

        if let Some((id, body)) = dispatch(session, &mut loads, message).await {
            let frame = ResponseFrame {
                kind: "response",
                id: &id,
                body: &body,
            };
            write_frame(&mut writer, &frame).await?;
        }
    }

    log_info!("extension closed the native port");
    Ok(())
}

async fn dispatch(
    session: &BackgroundSession<HostRuntime>,
    loads: &mut PageLoads,
    message: HostMessage,
) -> Option<(Value, ControlResponse)> {
    let runtime = session.runtime();
    match message {
        HostMessage::TabActivated {
            tab_id,
            window_id,
            tab,
        } => {
            if let Some(tab) = tab {
                runtime.upsert_tab(tab).await;
            }
            runtime.mark_active(window_id, tab_id).await;
            session
                .handle_event(BrowserEvent::TabActivated { tab_id })
                .await;
            None
        }
        HostMessage::TabUpdated { tab, status } => {
            let event = BrowserEvent::TabUpdated {
                tab_id: tab.id,
                status: match status.as_deref() {
                    Some("complete") => TabStatus::Complete,
                    _ => TabStatus::Loading,
                },
                active: tab.active,
            };
            runtime.upsert_tab(tab).await;
            session.handle_event(event).await;
            None
        }
        HostMessage::TabRemoved { tab_id } => {
            runtime.remove_tab(tab_id).await;
            loads.forget(tab_id);
            None
        }
        HostMessage::WindowFocusChanged { window_id } => {
            // The browser reports "no window" as a negative id.
            let window_id = window_id.filter(|id| *id >= 0);
            session
                .handle_event(BrowserEvent::WindowFocusChanged { window_id })
                .await;
            None
        }
        HostMessage::PageLoaded {
            tab_id,
            load_id,
            url,
            title,
            dom,
        } => {
            let page = match PageLocation::parse(&url, &title) {
                Ok(page) => page,
                Err(err) => {
                    log_debug!("skipping page load in tab {tab_id}: {err:#}");
                    return None;
                }
            };
            let load_key = load_id.unwrap_or_else(|| url.clone());
            let message = loads.observer_for(tab_id, &load_key).observe(&page, &dom)?;
            // Page-originated: the response goes back to the page, not the host.
            session.handle_control(message).await;
            None
        }
        HostMessage::Control { id, message } => {
            let body = session.handle_control_value(message).await?;
            Some((id, body))
        }
    }
}
