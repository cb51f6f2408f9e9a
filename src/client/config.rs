use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Which windows count as being "in use". Only [Topmost] is implemented; the
/// other modes are recognized in the config so a file naming them fails at
/// startup instead of being silently tracked as topmost.
///
/// [Topmost]: MonitorMode::Topmost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorMode {
    /// The single window holding focus.
    #[default]
    Topmost,
    /// Every visible, non-minimized window.
    Foreground,
    /// Every process owning a window.
    All,
}

/// Immutable client settings, loaded once at startup. Every recognized option
/// has a default so a fresh install runs without hand-editing; the file is
/// written out with the defaults when it doesn't exist yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub device_name: String,
    pub api_base_url: String,
    pub api_key: String,
    pub monitor_mode: MonitorMode,
    pub sample_interval_seconds: u64,
    pub upload_interval_seconds: u64,
    pub status_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            api_base_url: "http://localhost:8080/api/v1".into(),
            api_key: String::new(),
            monitor_mode: MonitorMode::default(),
            sample_interval_seconds: 1,
            upload_interval_seconds: 60,
            status_interval_seconds: 30,
        }
    }
}

fn default_device_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "DESKTOP-001".into())
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let config: Config = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Couldn't parse config at {path:?}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Config::default();
                info!("No config at {path:?}, writing defaults");
                std::fs::write(path, serde_json::to_vec_pretty(&config)?)
                    .with_context(|| format!("Couldn't write default config to {path:?}"))?;
                Ok(config)
            }
            Err(e) => Err(e).with_context(|| format!("Couldn't read config at {path:?}")),
        }
    }
}
