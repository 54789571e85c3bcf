//! Peer synchronization engine.
//!
//! Keeps a user's data in sync across their open clients over two
//! structurally different transports:
//! - a direct mesh between clients, bootstrapped through a signaling server
//! - a hosted relay room
//!
//! # Architecture
//!
//! Document contents are merged by the transports themselves (CRDT based).
//! This crate decides *whether* each transport runs and tracks what it
//! reports.
//!
//! ## Components
//!
//! - **Resolver**: turns settings into per-channel eligibility, desire and
//!   room parameters
//! - **Transport**: the adapter interface each transport is wrapped behind
//! - **Orchestrator**: owns channel state, starts and stops transports,
//!   publishes snapshots
//! - **Query**: re-runs the enablement decision when its inputs change
//!
//! ## Enablement
//!
//! A channel runs only when the system gate is on, the channel has the
//! identifying fields it needs, and the user turned it on. Without a
//! signed-in user nothing runs.
//!
//! # Example
//!
//! ```
//! use peersync_sync::transport::loopback::LoopbackTransport;
//! use peersync_sync::{spawn_orchestrator, OrchestratorConfig, TransportAdapter};
//! use peersync_types::{ChannelKind, ChannelMap};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mesh: Arc<dyn TransportAdapter> = Arc::new(LoopbackTransport::new(ChannelKind::Mesh));
//! let relay: Arc<dyn TransportAdapter> = Arc::new(LoopbackTransport::new(ChannelKind::Relay));
//!
//! let handle = spawn_orchestrator(OrchestratorConfig::default(), ChannelMap::new(mesh, relay))?;
//! assert!(!handle.snapshot().mesh.enabled);
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod credential;
mod error;
mod orchestrator;
pub mod query;
pub mod resolver;
pub mod settings;
pub mod transport;

pub use credential::Secret;
pub use error::{QueryError, SyncError, SyncResult};
pub use orchestrator::{
    spawn_orchestrator, OrchestratorConfig, OrchestratorHandle, SyncOrchestrator,
};
pub use query::{EnablementKey, EnablementQuery, EnablementState};
pub use resolver::{effective_enabled, resolve, ChannelPlan, ResolvedChannel, RoomParams};
pub use settings::{
    ChannelToggles, MemorySettings, MeshConfig, RelayConfig, SettingsSnapshot, SettingsSource,
    SyncSettings, SystemEnable,
};
pub use transport::{
    ChannelEventSink, StartRequest, SyncEvent, TransportAdapter, TransportEvent, TransportPayload,
};
