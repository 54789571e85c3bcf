//! Core type definitions for the peersync engine.
//!
//! This crate defines the state model shared by the engine and its observers:
//! - Client and user identifiers
//! - The identity announced to synchronization rooms
//! - Channel kinds, connection status and per-channel state snapshots
//! - Peer presence (awareness) entries
//!
//! Transport wire formats and document contents live elsewhere.

mod channel;
mod identity;
mod ids;
mod presence;

pub use channel::{ChannelKind, ChannelMap, ChannelState, SyncSnapshot, SyncStatus};
pub use identity::{Identity, PlatformInfo};
pub use ids::{ClientId, UserId};
pub use presence::PeerPresence;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown channel kind: {0}")]
    UnknownChannel(String),
}
