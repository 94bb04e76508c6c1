pub mod context;
pub mod control;
pub mod heartbeat;
pub mod host;
pub mod manifest;
pub mod session;
pub mod settings;
pub mod tracker;
pub mod transport;
pub mod utils;

use std::sync::Arc;

use anyhow::Context;
use host::HostRuntime;
use session::{BackgroundSession, SessionConfig, DEFAULT_BROWSER};
use settings::SettingsStore;

pub use context::{extract_context, ContextRecord, PageContextPayload};
pub use control::{ControlMessage, ControlResponse};
pub use tracker::{BrowserEvent, BrowserRuntime, CurrentTab, TabInfo};
pub use transport::{ActivityRecord, CompanionClient, ConnectionState};

/// Runs the native-messaging host on stdin/stdout until the browser disconnects.
pub fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var); stdout belongs to the browser.
    utils::init_logging();

    log::info!("FocusBridge host starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        let settings = Arc::new(SettingsStore::open_default()?);
        log::info!(
            "settings at {} (companion port {})",
            settings.path().display(),
            settings.port().get()
        );

        let config = SessionConfig {
            browser: std::env::var("FOCUSBRIDGE_BROWSER")
                .unwrap_or_else(|_| DEFAULT_BROWSER.to_string()),
            ..SessionConfig::default()
        };

        let session = BackgroundSession::new(HostRuntime::new(), settings, config)?;
        session.start().await;

        let result = host::serve(&session, tokio::io::stdin(), tokio::io::stdout()).await;

        session.shutdown().await;
        result
    })
}
