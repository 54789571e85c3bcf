//! Channel kinds, connection status and the per-channel state model.

use crate::Error;
use crate::presence::PeerPresence;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// One synchronization transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Direct browser-to-browser mesh, bootstrapped through a signaling server.
    Mesh,
    /// Hosted relay room service.
    Relay,
}

impl ChannelKind {
    /// Every channel kind, in processing order.
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Mesh, ChannelKind::Relay];

    /// Stable lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Relay => "relay",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mesh" => Ok(Self::Mesh),
            "relay" => Ok(Self::Relay),
            _ => Err(Error::UnknownChannel(s.to_string())),
        }
    }
}

/// One value per channel kind.
///
/// Used for eligibility and desire maps, per-user toggles, transport
/// adapters and state snapshots alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelMap<T> {
    pub mesh: T,
    pub relay: T,
}

impl<T> ChannelMap<T> {
    /// Creates a map from explicit values.
    pub const fn new(mesh: T, relay: T) -> Self {
        Self { mesh, relay }
    }

    /// Builds a map by calling `f` once per kind.
    pub fn from_fn(mut f: impl FnMut(ChannelKind) -> T) -> Self {
        Self {
            mesh: f(ChannelKind::Mesh),
            relay: f(ChannelKind::Relay),
        }
    }

    pub fn get(&self, kind: ChannelKind) -> &T {
        match kind {
            ChannelKind::Mesh => &self.mesh,
            ChannelKind::Relay => &self.relay,
        }
    }

    pub fn get_mut(&mut self, kind: ChannelKind) -> &mut T {
        match kind {
            ChannelKind::Mesh => &mut self.mesh,
            ChannelKind::Relay => &mut self.relay,
        }
    }

    /// Iterates `(kind, value)` pairs in [`ChannelKind::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (ChannelKind, &T)> {
        ChannelKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }

    /// Transforms every value.
    pub fn map<U>(self, mut f: impl FnMut(ChannelKind, T) -> U) -> ChannelMap<U> {
        ChannelMap {
            mesh: f(ChannelKind::Mesh, self.mesh),
            relay: f(ChannelKind::Relay, self.relay),
        }
    }
}

impl ChannelMap<bool> {
    /// Whether any channel is set.
    pub fn any(&self) -> bool {
        self.mesh || self.relay
    }
}

impl<T> Index<ChannelKind> for ChannelMap<T> {
    type Output = T;

    fn index(&self, kind: ChannelKind) -> &T {
        self.get(kind)
    }
}

impl<T> IndexMut<ChannelKind> for ChannelMap<T> {
    fn index_mut(&mut self, kind: ChannelKind) -> &mut T {
        self.get_mut(kind)
    }
}

/// Connection lifecycle of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Not running.
    #[default]
    Disabled,
    /// Started, waiting for the transport to report a connection.
    Connecting,
    /// The transport reports a live room.
    Connected,
    /// The transport reports a failure. Retrying is the transport's business.
    ConnectionError,
}

impl SyncStatus {
    /// Whether the channel counts as running (anything but `Disabled`).
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConnectionError => "connection_error",
        };
        f.write_str(s)
    }
}

/// Observable state of one channel.
///
/// `status == Disabled` exactly when `enabled == false`, and `awareness` is
/// empty unless the channel is connected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Effective enablement as resolved by the orchestrator.
    pub enabled: bool,
    /// Lifecycle status.
    pub status: SyncStatus,
    /// Peers currently present in the room, as last reported by the transport.
    pub awareness: Vec<PeerPresence>,
}

impl ChannelState {
    /// A channel that has just been asked to start.
    pub fn connecting() -> Self {
        Self {
            enabled: true,
            status: SyncStatus::Connecting,
            awareness: Vec::new(),
        }
    }

    /// Resets to the disabled state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-only view of every channel's state.
pub type SyncSnapshot = ChannelMap<ChannelState>;
