use std::{future::Future, sync::Arc};

use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::tracker::CurrentTab;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
const DEBUG_HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Heartbeat period, shortened when `FOCUSBRIDGE_DEBUG` is set.
pub fn heartbeat_interval() -> Duration {
    let debug_mode = std::env::var("FOCUSBRIDGE_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Duration::from_secs(if debug_mode {
        DEBUG_HEARTBEAT_INTERVAL_SECS
    } else {
        HEARTBEAT_INTERVAL_SECS
    })
}

/// What the heartbeat needs from the background session.
pub trait HeartbeatTarget: Send + Sync + 'static {
    fn current_tab(&self) -> impl Future<Output = Option<CurrentTab>> + Send;

    fn last_activity_sent(&self) -> impl Future<Output = Option<Instant>> + Send;

    fn resend(&self, tab: CurrentTab) -> impl Future<Output = ()> + Send;
}

/// A tick sends iff a tab is current and the last send is at least `period` old.
pub fn heartbeat_due(
    has_tab: bool,
    last_sent: Option<Instant>,
    now: Instant,
    period: Duration,
) -> bool {
    if !has_tab {
        return false;
    }
    match last_sent {
        Some(at) => now.saturating_duration_since(at) >= period,
        None => true,
    }
}

pub async fn heartbeat_loop<T: HeartbeatTarget>(
    target: Arc<T>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = target.current_tab().await;
                let last_sent = target.last_activity_sent().await;
                if !heartbeat_due(current.is_some(), last_sent, Instant::now(), period) {
                    continue;
                }
                if let Some(tab) = current {
                    log_debug!("heartbeat for tab {}", tab.id);
                    target.resend(tab).await;
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("heartbeat shutting down");
                break;
            }
        }
    }
}

/// Owns the spawned heartbeat task.
pub struct HeartbeatController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl HeartbeatController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the loop; a second call while running is a no-op.
    pub fn start<T: HeartbeatTarget>(&mut self, target: Arc<T>, period: Duration) {
        if self.handle.is_some() {
            return;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_loop(target, period, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
    }

    pub async fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                log::error!("heartbeat task failed to join: {err}");
            }
        }
    }
}

impl Default for HeartbeatController {
    fn default() -> Self {
        Self::new()
    }
}
