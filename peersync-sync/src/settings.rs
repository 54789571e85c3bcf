//! User and system sync settings, and the read-only store the engine reads
//! them from.

use crate::credential::Secret;
use peersync_types::ChannelMap;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

/// Mesh channel settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeshConfig {
    /// User wants the mesh channel on.
    pub enabled: bool,
    /// Room (channel) name shared by every device of the user.
    pub channel_name: Option<String>,
    /// Signaling server endpoint used to bootstrap the mesh.
    pub signaling: Option<String>,
    /// Optional room password.
    pub password: Option<Secret>,
}

/// Relay channel settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    /// User wants the relay channel on.
    pub enabled: bool,
    /// Relay room name.
    pub room_name: Option<String>,
    /// Optional room password.
    pub room_password: Option<Secret>,
    /// Public API key of the relay service.
    pub public_api_key: Option<Secret>,
}

/// Everything the resolver needs to decide which channels can run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Name announced to other peers; falls back to a platform label.
    pub device_name: Option<String>,
    /// Key-vault access code, forwarded to the relay service.
    pub access_code: Option<Secret>,
    pub mesh: MeshConfig,
    pub relay: RelayConfig,
}

/// Per-user per-channel enable flags.
pub type ChannelToggles = ChannelMap<bool>;

impl SyncSettings {
    /// The user's per-channel toggles.
    pub fn toggles(&self) -> ChannelToggles {
        ChannelMap::new(self.mesh.enabled, self.relay.enabled)
    }
}

/// System-level sync gate, independent of user settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemEnable {
    Enabled,
    Disabled,
    /// The system configuration has not loaded yet.
    #[default]
    Pending,
}

impl SystemEnable {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl From<Option<bool>> for SystemEnable {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::Enabled,
            Some(false) => Self::Disabled,
            None => Self::Pending,
        }
    }
}

impl From<bool> for SystemEnable {
    fn from(value: bool) -> Self {
        Self::from(Some(value))
    }
}

/// A consistent read of the settings store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsSnapshot {
    pub system_enable: SystemEnable,
    pub settings: SyncSettings,
}

/// Read access to the settings store. Writes belong to the UI.
pub trait SettingsSource: Send + Sync {
    /// Returns the current settings.
    fn load(&self) -> SettingsSnapshot;
}

/// In-process settings store.
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: RwLock<SettingsSnapshot>,
}

impl MemorySettings {
    pub fn new(system_enable: SystemEnable, settings: SyncSettings) -> Self {
        Self {
            inner: RwLock::new(SettingsSnapshot {
                system_enable,
                settings,
            }),
        }
    }

    pub fn set_system_enable(&self, system_enable: impl Into<SystemEnable>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .system_enable = system_enable.into();
    }

    /// Applies an in-place edit to the user settings.
    pub fn update(&self, edit: impl FnOnce(&mut SyncSettings)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        edit(&mut guard.settings);
    }

    /// Replaces the user settings wholesale.
    pub fn replace(&self, settings: SyncSettings) {
        self.update(|current| *current = settings);
    }
}

impl SettingsSource for MemorySettings {
    fn load(&self) -> SettingsSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
