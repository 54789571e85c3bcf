//! Error types for the sync layer.

use peersync_types::ChannelKind;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
///
/// Connection problems are not errors here: they reach observers as
/// `SyncStatus::ConnectionError`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A transport adapter refused or failed a start/stop dispatch.
    #[error("transport error on {kind}: {message}")]
    Transport { kind: ChannelKind, message: String },

    /// An adapter was wired to the wrong channel slot.
    #[error("adapter for {actual} registered in the {expected} slot")]
    ChannelMismatch {
        expected: ChannelKind,
        actual: ChannelKind,
    },

    /// The orchestrator task is gone.
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Convenience constructor for adapter failures.
    pub fn transport(kind: ChannelKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }
}

/// Failure of one enablement evaluation.
///
/// Cloneable so a single in-flight evaluation can be shared by every caller
/// that asked for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The orchestrator rejected or dropped the request.
    #[error("sync orchestrator unavailable: {0}")]
    Orchestrator(String),

    /// The evaluation task panicked or was cancelled.
    #[error("enablement task failed: {0}")]
    Task(String),

    /// A newer evaluation was requested before this one got to run.
    #[error("enablement evaluation superseded")]
    Superseded,
}

impl From<SyncError> for QueryError {
    fn from(e: SyncError) -> Self {
        Self::Orchestrator(e.to_string())
    }
}
