//! Transport adapter abstraction.
//!
//! Each synchronization transport (mesh, relay) is wrapped behind
//! [`TransportAdapter`] so the orchestrator can start and stop it without
//! knowing its wire protocol. Transports report back through a
//! [`ChannelEventSink`]: every report becomes a message on the
//! orchestrator's queue, tagged with the channel and the generation the
//! sink was issued for.

use crate::error::SyncResult;
use crate::resolver::RoomParams;
use async_trait::async_trait;
use peersync_types::{ChannelKind, ClientId, Identity, PeerPresence, SyncStatus};
use tokio::sync::mpsc;

/// Notification that shared data changed through a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    /// Channel the change arrived on.
    pub channel: ChannelKind,
    /// Name of the synchronized collection that changed.
    pub table: String,
}

/// What a transport reported.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportPayload {
    /// Full current room membership.
    Awareness(Vec<PeerPresence>),
    /// Connection status change.
    Status(SyncStatus),
    /// Remote data was applied to a collection.
    Synced(String),
}

/// A transport report, tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub kind: ChannelKind,
    pub generation: u64,
    pub payload: TransportPayload,
}

/// Callback handle given to a transport when it is started.
///
/// Reports sent after the orchestrator has shut down are dropped.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    kind: ChannelKind,
    generation: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelEventSink {
    pub(crate) fn new(
        kind: ChannelKind,
        generation: u64,
        tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            kind,
            generation,
            tx,
        }
    }

    /// Creates a sink that is not attached to an orchestrator, for driving
    /// an adapter in isolation.
    pub fn detached(
        kind: ChannelKind,
        generation: u64,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(kind, generation, tx), rx)
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// The activation attempt this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the channel's awareness with `peers`.
    pub fn awareness_changed(&self, peers: Vec<PeerPresence>) {
        self.emit(TransportPayload::Awareness(peers));
    }

    /// Reports a connection status change.
    pub fn status_changed(&self, status: SyncStatus) {
        self.emit(TransportPayload::Status(status));
    }

    /// Reports that remote data was applied to `table`.
    pub fn data_synced(&self, table: impl Into<String>) {
        self.emit(TransportPayload::Synced(table.into()));
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, payload: TransportPayload) {
        let _ = self.tx.send(TransportEvent {
            kind: self.kind,
            generation: self.generation,
            payload,
        });
    }
}

/// Everything a transport needs to join a room.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub kind: ChannelKind,
    pub generation: u64,
    /// This engine instance.
    pub client_id: ClientId,
    /// Identity announced to the room.
    pub user: Identity,
    pub room: RoomParams,
    /// Where to report awareness, status and data changes.
    pub events: ChannelEventSink,
}

/// A synchronization transport the orchestrator can start and stop.
///
/// Implementations must not call back into the orchestrator handle from
/// `start`/`stop`; use the [`ChannelEventSink`] instead.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// The channel this adapter serves.
    fn kind(&self) -> ChannelKind;

    /// Dispatches a room join. Returns whether the dispatch was accepted,
    /// not whether the connection succeeded; that arrives later through
    /// the sink.
    async fn start(&self, request: StartRequest) -> SyncResult<bool>;

    /// Leaves the room. Must be safe to call when not started.
    async fn stop(&self) -> SyncResult<()>;
}

/// An in-process transport for tests and local diagnostics.
pub mod loopback {
    use super::*;
    use crate::error::SyncError;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    enum Refusal {
        Reject,
        Fail(String),
    }

    #[derive(Default)]
    struct LoopbackState {
        requests: Vec<StartRequest>,
        stop_count: usize,
        active_sessions: usize,
        max_sessions: usize,
        refuse_next: Option<Refusal>,
    }

    /// Records every call and lets the caller play the remote side.
    pub struct LoopbackTransport {
        kind: ChannelKind,
        auto_connect: Option<Duration>,
        state: Mutex<LoopbackState>,
    }

    impl LoopbackTransport {
        /// Creates a loopback adapter that stays `Connecting` until told
        /// otherwise.
        pub fn new(kind: ChannelKind) -> Self {
            Self {
                kind,
                auto_connect: None,
                state: Mutex::new(LoopbackState::default()),
            }
        }

        /// Reports `Connected` with the local user present `delay` after
        /// every start.
        #[must_use]
        pub fn with_auto_connect(mut self, delay: Duration) -> Self {
            self.auto_connect = Some(delay);
            self
        }

        fn state(&self) -> MutexGuard<'_, LoopbackState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// The next start returns `Ok(false)`.
        pub fn reject_next_start(&self) {
            self.state().refuse_next = Some(Refusal::Reject);
        }

        /// The next start returns an error.
        pub fn fail_next_start(&self, message: impl Into<String>) {
            self.state().refuse_next = Some(Refusal::Fail(message.into()));
        }

        pub fn start_count(&self) -> usize {
            self.state().requests.len()
        }

        pub fn stop_count(&self) -> usize {
            self.state().stop_count
        }

        /// Sessions started since the last stop.
        pub fn active_sessions(&self) -> usize {
            self.state().active_sessions
        }

        /// Highest number of sessions that were ever running at once.
        pub fn max_concurrent_sessions(&self) -> usize {
            self.state().max_sessions
        }

        pub fn requests(&self) -> Vec<StartRequest> {
            self.state().requests.clone()
        }

        pub fn last_request(&self) -> Option<StartRequest> {
            self.state().requests.last().cloned()
        }

        /// The sink handed over with the most recent start.
        pub fn latest_sink(&self) -> Option<ChannelEventSink> {
            self.last_request().map(|r| r.events)
        }

        /// The sink of a specific generation, including superseded ones.
        pub fn sink_for(&self, generation: u64) -> Option<ChannelEventSink> {
            self.state()
                .requests
                .iter()
                .find(|r| r.generation == generation)
                .map(|r| r.events.clone())
        }

        /// Plays a successful join on the latest session: `Connected`, then
        /// the local user as the only peer.
        pub fn connect(&self) {
            if let Some(request) = self.last_request() {
                announce_connected(&request);
            }
        }
    }

    fn announce_connected(request: &StartRequest) {
        request.events.status_changed(SyncStatus::Connected);
        request.events.awareness_changed(vec![
            PeerPresence::new(request.client_id, request.user.clone())
                .local()
                .touched(),
        ]);
    }

    #[async_trait]
    impl TransportAdapter for LoopbackTransport {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn start(&self, request: StartRequest) -> SyncResult<bool> {
            {
                let mut state = self.state();
                match state.refuse_next.take() {
                    Some(Refusal::Reject) => return Ok(false),
                    Some(Refusal::Fail(message)) => {
                        return Err(SyncError::transport(self.kind, message));
                    }
                    None => {}
                }
                state.requests.push(request.clone());
                state.active_sessions += 1;
                state.max_sessions = state.max_sessions.max(state.active_sessions);
            }

            if let Some(delay) = self.auto_connect {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    announce_connected(&request);
                });
            }
            Ok(true)
        }

        async fn stop(&self) -> SyncResult<()> {
            let mut state = self.state();
            state.stop_count += 1;
            state.active_sessions = 0;
            Ok(())
        }
    }
}
