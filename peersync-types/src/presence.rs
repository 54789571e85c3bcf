//! Room membership as reported by a transport.

use crate::identity::Identity;
use crate::ids::ClientId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One peer present in a synchronization room.
///
/// The engine relays these snapshots; it never interprets `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPresence {
    /// The peer's engine instance.
    pub client_id: ClientId,
    /// The user behind the peer.
    pub user: Identity,
    /// Whether this entry describes the local client.
    #[serde(default)]
    pub is_local: bool,
    /// Last activity reported by the transport.
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
    /// Transport-specific connection metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PeerPresence {
    /// Creates a remote presence entry with no metadata.
    pub fn new(client_id: ClientId, user: Identity) -> Self {
        Self {
            client_id,
            user,
            is_local: false,
            last_active: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Marks the entry as the local client.
    #[must_use]
    pub fn local(mut self) -> Self {
        self.is_local = true;
        self
    }

    /// Stamps the entry as active now.
    #[must_use]
    pub fn touched(mut self) -> Self {
        self.last_active = Some(Utc::now());
        self
    }
}
