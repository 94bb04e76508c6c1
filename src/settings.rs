use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

pub const DEFAULT_PORT: u16 = 41417;
pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 65535;

const SETTINGS_ENV: &str = "FOCUSBRIDGE_SETTINGS";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("port must be a number between {MIN_PORT} and {MAX_PORT}, got {0}")]
    InvalidPort(String),
    #[error("failed to write settings to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Validated loopback port of the desktop companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct PortConfig(u16);

impl PortConfig {
    pub fn new(port: u16) -> Result<Self, SettingsError> {
        if port < MIN_PORT {
            return Err(SettingsError::InvalidPort(port.to_string()));
        }
        Ok(Self(port))
    }

    /// Accepts the loose shapes a settings UI sends: integers or numeric strings.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SettingsError> {
        let invalid = || SettingsError::InvalidPort(value.to_string());
        let raw = match value {
            serde_json::Value::Number(n) => n.as_u64().ok_or_else(invalid)?,
            serde_json::Value::String(s) => s.trim().parse::<u64>().map_err(|_| invalid())?,
            _ => return Err(invalid()),
        };
        let port = u16::try_from(raw).map_err(|_| invalid())?;
        Self::new(port)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn base_url(self) -> String {
        format!("http://localhost:{}", self.0)
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self(DEFAULT_PORT)
    }
}

impl TryFrom<u16> for PortConfig {
    type Error = SettingsError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PortConfig> for u16 {
    fn from(value: PortConfig) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    port: PortConfig,
}

/// Durable settings document with change notification.
///
/// Writes are last-writer-wins; a write that does not change the stored
/// value does not notify observers.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
    port_tx: watch::Sender<PortConfig>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            // A corrupt document falls back to defaults rather than blocking startup.
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        let (port_tx, _) = watch::channel(data.port);

        Ok(Self {
            path,
            data: RwLock::new(data),
            port_tx,
        })
    }

    /// Opens the store at `FOCUSBRIDGE_SETTINGS` or the per-user config directory.
    pub fn open_default() -> Result<Self> {
        Self::new(default_settings_path()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn port(&self) -> PortConfig {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .port
    }

    /// Stores `port`, returning whether the value changed.
    pub fn set_port(&self, port: PortConfig) -> Result<bool, SettingsError> {
        {
            let mut guard = self
                .data
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.port == port {
                return Ok(false);
            }
            let mut updated = guard.clone();
            updated.port = port;
            self.persist(&updated)?;
            *guard = updated;
        }

        self.port_tx.send_replace(port);
        Ok(true)
    }

    /// Subscribes to port changes. The receiver starts with the current value marked seen.
    pub fn observe_port(&self) -> watch::Receiver<PortConfig> {
        self.port_tx.subscribe()
    }

    fn persist(&self, data: &UserSettings) -> Result<(), SettingsError> {
        let serialized = serde_json::to_string_pretty(data)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, serialized).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn default_settings_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(SETTINGS_ENV) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::config_dir().context("no per-user config directory available")?;
    Ok(base.join("focusbridge").join("settings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::new(dir.path().join("settings.json")).unwrap()
    }

    #[test]
    fn missing_file_uses_default_port() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.port().get(), DEFAULT_PORT);
    }

    #[test]
    fn corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.port().get(), DEFAULT_PORT);
    }

    #[test]
    fn set_port_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.set_port(PortConfig::new(50000).unwrap()).unwrap());

        let reopened = store_in(&dir);
        assert_eq!(reopened.port().get(), 50000);
    }

    #[test]
    fn setting_same_port_does_not_notify() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let rx = store.observe_port();

        assert!(!store.set_port(PortConfig::default()).unwrap());
        assert!(!rx.has_changed().unwrap());

        assert!(store.set_port(PortConfig::new(42000).unwrap()).unwrap());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().get(), 42000);
    }

    #[test]
    fn port_validation() {
        assert!(PortConfig::new(1023).is_err());
        assert!(PortConfig::new(1024).is_ok());
        assert!(PortConfig::new(65535).is_ok());

        assert_eq!(PortConfig::from_json(&json!(50000)).unwrap().get(), 50000);
        assert_eq!(PortConfig::from_json(&json!(" 41418 ")).unwrap().get(), 41418);
        assert!(PortConfig::from_json(&json!(70000)).is_err());
        assert!(PortConfig::from_json(&json!(-1)).is_err());
        assert!(PortConfig::from_json(&json!(4141.5)).is_err());
        assert!(PortConfig::from_json(&json!("abc")).is_err());
        assert!(PortConfig::from_json(&json!(null)).is_err());
    }

    #[test]
    fn out_of_range_port_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"port": 80}"#).unwrap();
        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.port().get(), DEFAULT_PORT);
    }
}
