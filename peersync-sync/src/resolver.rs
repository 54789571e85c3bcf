//! Channel config resolution.
//!
//! Turns raw settings into a per-channel plan: whether each channel has the
//! identifying fields needed to join a room (eligible), whether the user
//! wants it (desired), and the room parameters to start it with.
//!
//! Resolution is pure and runs on every re-evaluation.

use crate::credential::Secret;
use crate::settings::{ChannelToggles, SyncSettings, SystemEnable};
use peersync_types::{ChannelKind, ChannelMap};

/// Parameters a transport needs to join a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomParams {
    /// Mesh rooms are found through a signaling server.
    Mesh {
        channel_name: String,
        signaling: String,
        password: Option<Secret>,
    },
    /// Relay rooms are hosted by the relay service.
    Relay {
        room_name: String,
        password: Option<Secret>,
        public_api_key: Option<Secret>,
        access_code: Option<Secret>,
    },
}

impl RoomParams {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Mesh { .. } => ChannelKind::Mesh,
            Self::Relay { .. } => ChannelKind::Relay,
        }
    }

    pub fn room_name(&self) -> &str {
        match self {
            Self::Mesh { channel_name, .. } => channel_name,
            Self::Relay { room_name, .. } => room_name,
        }
    }

    pub fn password(&self) -> Option<&Secret> {
        match self {
            Self::Mesh { password, .. } | Self::Relay { password, .. } => password.as_ref(),
        }
    }

    /// Service credential, if the transport takes one.
    pub fn credential(&self) -> Option<&Secret> {
        match self {
            Self::Mesh { .. } => None,
            Self::Relay { public_api_key, .. } => public_api_key.as_ref(),
        }
    }

    /// Signaling endpoint of a mesh room.
    pub fn signaling(&self) -> Option<&str> {
        match self {
            Self::Mesh { signaling, .. } => Some(signaling),
            Self::Relay { .. } => None,
        }
    }
}

/// Resolution result for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedChannel {
    /// All mandatory identifying fields are present.
    pub eligible: bool,
    /// The user's stored preference.
    pub desired: bool,
    /// Present iff `eligible`.
    pub room: Option<RoomParams>,
}

impl ResolvedChannel {
    /// Whether the channel should run, ignoring the system gate.
    pub fn target(&self) -> bool {
        self.eligible && self.desired
    }
}

/// Per-channel resolution of a settings snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelPlan {
    pub channels: ChannelMap<ResolvedChannel>,
    /// Configured device name, if any.
    pub device_name: Option<String>,
}

impl ChannelPlan {
    pub fn eligible(&self) -> ChannelMap<bool> {
        ChannelMap::from_fn(|kind| self.channels[kind].eligible)
    }

    pub fn desired(&self) -> ChannelMap<bool> {
        ChannelMap::from_fn(|kind| self.channels[kind].desired)
    }

    pub fn target(&self, kind: ChannelKind) -> bool {
        self.channels[kind].target()
    }

    pub fn room(&self, kind: ChannelKind) -> Option<&RoomParams> {
        self.channels[kind].room.as_ref()
    }

    pub fn any_eligible(&self) -> bool {
        self.eligible().any()
    }

    /// Replaces the desired flags with an explicit toggle map.
    #[must_use]
    pub fn with_toggles(mut self, toggles: ChannelToggles) -> Self {
        for kind in ChannelKind::ALL {
            self.channels[kind].desired = toggles[kind];
        }
        self
    }
}

/// Resolves settings into a channel plan.
pub fn resolve(settings: &SyncSettings) -> ChannelPlan {
    let mesh_room = match (
        non_blank(settings.mesh.channel_name.as_deref()),
        non_blank(settings.mesh.signaling.as_deref()),
    ) {
        (Some(channel_name), Some(signaling)) => Some(RoomParams::Mesh {
            channel_name,
            signaling,
            password: Secret::non_empty(settings.mesh.password.as_ref()),
        }),
        _ => None,
    };

    let relay_room =
        non_blank(settings.relay.room_name.as_deref()).map(|room_name| RoomParams::Relay {
            room_name,
            password: Secret::non_empty(settings.relay.room_password.as_ref()),
            public_api_key: Secret::non_empty(settings.relay.public_api_key.as_ref()),
            access_code: Secret::non_empty(settings.access_code.as_ref()),
        });

    ChannelPlan {
        channels: ChannelMap::new(
            ResolvedChannel {
                eligible: mesh_room.is_some(),
                desired: settings.mesh.enabled,
                room: mesh_room,
            },
            ResolvedChannel {
                eligible: relay_room.is_some(),
                desired: settings.relay.enabled,
                room: relay_room,
            },
        ),
        device_name: non_blank(settings.device_name.as_deref()),
    }
}

/// The three-way gate on a channel's effective enablement.
pub fn effective_enabled(system: SystemEnable, eligible: bool, desired: bool) -> bool {
    system.is_enabled() && eligible && desired
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
