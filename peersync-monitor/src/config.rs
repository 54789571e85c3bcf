//! Monitor configuration file.
//!
//! A single JSON document holding the signed-in user, the system sync gate
//! and the user's sync settings:
//!
//! ```json
//! {
//!   "identity": { "id": "u1", "platform": { "browser": "Firefox", "os": "Linux" } },
//!   "systemEnable": true,
//!   "sync": {
//!     "mesh": { "enabled": true, "channelName": "notes", "signaling": "wss://signal.example" }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use peersync_sync::{SettingsSnapshot, SyncSettings, SystemEnable};
use peersync_types::Identity;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Signed-in user. Absent means nobody is signed in.
    pub identity: Option<Identity>,
    /// System gate; absent means not loaded yet.
    pub system_enable: Option<bool>,
    pub sync: SyncSettings,
}

impl MonitorConfig {
    /// Reads and parses the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse monitor config")
    }

    pub fn system_enable(&self) -> SystemEnable {
        self.system_enable.into()
    }

    pub fn settings_snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            system_enable: self.system_enable(),
            settings: self.sync.clone(),
        }
    }
}
