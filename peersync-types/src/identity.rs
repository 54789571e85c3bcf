//! User identity as announced to synchronization rooms.

use crate::ids::UserId;
use serde::{Deserialize, Serialize};

/// Describes the device/runtime a client is running on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformInfo {
    /// Browser or host application name.
    pub browser: String,
    /// Operating system name.
    pub os: String,
    /// Whether the client runs on a mobile device.
    pub is_mobile: bool,
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self {
            browser: "Unknown".to_string(),
            os: "Unknown".to_string(),
            is_mobile: false,
        }
    }
}

/// The signed-in user, as required to join a synchronization room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Identity {
    /// Opaque user id. Empty means no user.
    pub id: UserId,
    /// Display name shown to other peers.
    pub name: String,
    /// Device descriptors.
    pub platform: PlatformInfo,
}

impl Identity {
    /// Creates an identity with an empty display name and unknown platform.
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the platform descriptors.
    #[must_use]
    pub fn with_platform(mut self, platform: PlatformInfo) -> Self {
        self.platform = platform;
        self
    }

    /// Whether this identity carries a usable user id.
    pub fn is_present(&self) -> bool {
        !self.id.is_empty()
    }

    /// Default device label, e.g. `My Firefox (Linux)`.
    pub fn default_device_name(&self) -> String {
        format!("My {} ({})", self.platform.browser, self.platform.os)
    }

    /// The identity announced in rooms: the configured device name wins,
    /// otherwise the default device label.
    #[must_use]
    pub fn with_display_name(&self, device_name: Option<&str>) -> Self {
        let name = match device_name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.default_device_name(),
        };
        Self {
            name,
            ..self.clone()
        }
    }
}
