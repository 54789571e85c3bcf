//! Sync orchestrator: owns every channel's state and drives the transports.
//!
//! The orchestrator runs as a single task. Callers talk to it through an
//! [`OrchestratorHandle`]; transports talk to it through the
//! [`ChannelEventSink`] they were started with. Both arrive as messages and
//! are applied one at a time, so no two activations can race on a channel.
//!
//! Every start bumps the channel's generation and hands the transport a sink
//! tagged with it. Stopping bumps it again. Reports carrying an older
//! generation are dropped, which keeps a late `Connected` from reviving a
//! channel that was switched off in the meantime.

use crate::error::{SyncError, SyncResult};
use crate::resolver::{ChannelPlan, RoomParams};
use crate::settings::ChannelToggles;
use crate::transport::{
    ChannelEventSink, StartRequest, SyncEvent, TransportAdapter, TransportEvent,
    TransportPayload,
};
use futures::future::join_all;
use peersync_types::{
    ChannelKind, ChannelMap, ChannelState, ClientId, Identity, SyncSnapshot, SyncStatus,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Identifies this engine instance in rooms.
    pub client_id: ClientId,
    /// Capacity of the command queue.
    pub command_buffer: usize,
    /// Capacity of the [`SyncEvent`] broadcast.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            client_id: ClientId::new(),
            command_buffer: 32,
            event_capacity: 64,
        }
    }
}

/// Requests accepted by the orchestrator loop.
enum Command {
    EvaluateAndActivate {
        identity: Identity,
        plan: ChannelPlan,
        reply: oneshot::Sender<bool>,
    },
    DisableAll {
        toggles: ChannelToggles,
        reply: oneshot::Sender<()>,
    },
    CurrentState {
        reply: oneshot::Sender<SyncSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// What a running generation was started with. A change restarts it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Session {
    room: RoomParams,
    user: Identity,
}

struct ChannelSlot {
    adapter: Arc<dyn TransportAdapter>,
    state: ChannelState,
    generation: u64,
    /// A start was dispatched and no stop has followed.
    started: bool,
    /// The transport accepted the current generation's start.
    accepted: bool,
    session: Option<Session>,
}

impl ChannelSlot {
    fn new(adapter: Arc<dyn TransportAdapter>) -> Self {
        Self {
            adapter,
            state: ChannelState::default(),
            generation: 0,
            started: false,
            accepted: false,
            session: None,
        }
    }
}

enum Dispatch {
    Start { restart: bool, request: StartRequest },
    Stop,
}

/// The single owner of channel state.
pub struct SyncOrchestrator {
    config: OrchestratorConfig,
    slots: ChannelMap<ChannelSlot>,
    command_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    event_rx: mpsc::UnboundedReceiver<TransportEvent>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    sync_events: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Creates an orchestrator and the handle to drive it.
    ///
    /// Fails if an adapter is registered under the wrong channel.
    pub fn new(
        config: OrchestratorConfig,
        adapters: ChannelMap<Arc<dyn TransportAdapter>>,
    ) -> SyncResult<(Self, OrchestratorHandle)> {
        for (expected, adapter) in adapters.iter() {
            let actual = adapter.kind();
            if actual != expected {
                return Err(SyncError::ChannelMismatch { expected, actual });
            }
        }

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SyncSnapshot::default());
        let (sync_events, _) = broadcast::channel(config.event_capacity.max(1));

        let handle = OrchestratorHandle {
            client_id: config.client_id,
            commands: command_tx,
            snapshot: snapshot_rx,
            sync_events: sync_events.clone(),
        };

        let orchestrator = Self {
            config,
            slots: adapters.map(|_, adapter| ChannelSlot::new(adapter)),
            command_rx,
            event_tx,
            event_rx,
            snapshot_tx,
            sync_events,
        };

        Ok((orchestrator, handle))
    }

    /// Runs the loop until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!(
            "Sync orchestrator started, client ID: {}",
            self.config.client_id
        );

        loop {
            tokio::select! {
                biased;

                // Transport reports queued before a command are applied first.
                Some(event) = self.event_rx.recv() => {
                    self.handle_transport_event(event);
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(Command::EvaluateAndActivate { identity, plan, reply }) => {
                            let active = self.evaluate_and_activate(identity, plan).await;
                            let _ = reply.send(active);
                        }
                        Some(Command::DisableAll { toggles, reply }) => {
                            self.disable_all(toggles).await;
                            let _ = reply.send(());
                        }
                        Some(Command::CurrentState { reply }) => {
                            let _ = reply.send(self.snapshot());
                        }
                        Some(Command::Shutdown { reply }) => {
                            self.teardown().await;
                            let _ = reply.send(());
                            break;
                        }
                        None => {
                            self.teardown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!("Sync orchestrator stopped");
    }

    fn snapshot(&self) -> SyncSnapshot {
        ChannelMap::from_fn(|kind| self.slots[kind].state.clone())
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn is_any_active(&self) -> bool {
        self.slots.iter().any(|(_, slot)| slot.state.enabled)
    }

    async fn evaluate_and_activate(&mut self, identity: Identity, plan: ChannelPlan) -> bool {
        if !identity.is_present() {
            debug!("No user id, skipping sync activation");
            return false;
        }

        let user = identity.with_display_name(plan.device_name.as_deref());
        let mut dispatches = Vec::new();

        for kind in ChannelKind::ALL {
            let room = plan.room(kind).filter(|_| plan.target(kind));
            let slot = &self.slots[kind];

            match room {
                Some(room) => {
                    let session = Session {
                        room: room.clone(),
                        user: user.clone(),
                    };
                    // Rejected or failed starts are dispatched again.
                    if slot.accepted && slot.session.as_ref() == Some(&session) {
                        continue;
                    }
                    let restart = slot.started;
                    let request = self.begin_start(kind, session);
                    dispatches.push((kind, Dispatch::Start { restart, request }));
                }
                None => {
                    if slot.started || slot.state.enabled {
                        self.begin_stop(kind);
                        dispatches.push((kind, Dispatch::Stop));
                    }
                }
            }
        }

        self.dispatch(dispatches).await;
        self.publish();
        self.is_any_active()
    }

    async fn disable_all(&mut self, toggles: ChannelToggles) {
        let mut dispatches = Vec::new();
        for kind in ChannelKind::ALL {
            if toggles[kind] {
                continue;
            }
            let slot = &self.slots[kind];
            if slot.started || slot.state.enabled {
                self.begin_stop(kind);
                dispatches.push((kind, Dispatch::Stop));
            }
        }

        self.dispatch(dispatches).await;
        self.publish();
    }

    async fn teardown(&mut self) {
        self.disable_all(ChannelMap::new(false, false)).await;
    }

    /// Moves a channel to `Connecting` under a fresh generation.
    fn begin_start(&mut self, kind: ChannelKind, session: Session) -> StartRequest {
        let client_id = self.config.client_id;
        let slot = &mut self.slots[kind];
        slot.generation += 1;
        slot.state = ChannelState::connecting();
        slot.started = true;
        slot.accepted = false;

        info!(
            "Starting {} channel in room {} (generation {}, credential {})",
            kind,
            session.room.room_name(),
            slot.generation,
            session
                .room
                .credential()
                .or(session.room.password())
                .map(|s| s.fingerprint())
                .unwrap_or_else(|| "none".to_string()),
        );

        let request = StartRequest {
            kind,
            generation: slot.generation,
            client_id,
            user: session.user.clone(),
            room: session.room.clone(),
            events: ChannelEventSink::new(kind, slot.generation, self.event_tx.clone()),
        };
        slot.session = Some(session);
        request
    }

    /// Moves a channel to `Disabled` and retires its generation.
    fn begin_stop(&mut self, kind: ChannelKind) {
        let slot = &mut self.slots[kind];
        slot.generation += 1;
        slot.state.reset();
        slot.started = false;
        slot.accepted = false;
        slot.session = None;
        info!("Stopping {} channel", kind);
    }

    /// Issues start/stop calls for all channels concurrently and records
    /// rejected starts as connection errors.
    async fn dispatch(&mut self, dispatches: Vec<(ChannelKind, Dispatch)>) {
        if dispatches.is_empty() {
            return;
        }

        let calls = dispatches.into_iter().map(|(kind, dispatch)| {
            let adapter = Arc::clone(&self.slots[kind].adapter);
            async move {
                match dispatch {
                    Dispatch::Start { restart, request } => {
                        if restart {
                            if let Err(e) = adapter.stop().await {
                                warn!("Failed to stop {} transport before restart: {}", kind, e);
                            }
                        }
                        let generation = request.generation;
                        (kind, Some((generation, adapter.start(request).await)))
                    }
                    Dispatch::Stop => {
                        if let Err(e) = adapter.stop().await {
                            warn!("Failed to stop {} transport: {}", kind, e);
                        }
                        (kind, None)
                    }
                }
            }
        });

        for (kind, started) in join_all(calls).await {
            let Some((generation, result)) = started else {
                continue;
            };
            let slot = &mut self.slots[kind];
            if slot.generation != generation {
                continue;
            }
            match result {
                Ok(true) => {
                    debug!("{} transport accepted generation {}", kind, generation);
                    slot.accepted = true;
                }
                Ok(false) => {
                    warn!("{} transport rejected start of generation {}", kind, generation);
                    slot.state.status = SyncStatus::ConnectionError;
                }
                Err(e) => {
                    warn!("{} transport failed to start generation {}: {}", kind, generation, e);
                    slot.state.status = SyncStatus::ConnectionError;
                }
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let kind = event.kind;
        let slot = &mut self.slots[kind];

        if event.generation != slot.generation || !slot.state.enabled {
            debug!(
                "Dropping stale {} report from generation {} (current {})",
                kind, event.generation, slot.generation
            );
            return;
        }

        match event.payload {
            TransportPayload::Awareness(peers) => {
                debug!("{} awareness updated: {} peer(s)", kind, peers.len());
                slot.state.awareness = peers;
            }
            TransportPayload::Status(SyncStatus::Disabled) => {
                warn!("Ignoring Disabled status reported by {} transport", kind);
                return;
            }
            TransportPayload::Status(status) => {
                if slot.state.status != status {
                    info!("{} channel status: {} -> {}", kind, slot.state.status, status);
                }
                slot.state.status = status;
                if status != SyncStatus::Connected {
                    slot.state.awareness.clear();
                }
            }
            TransportPayload::Synced(table) => {
                debug!("{} synced {}", kind, table);
                let _ = self.sync_events.send(SyncEvent {
                    channel: kind,
                    table,
                });
                return;
            }
        }

        self.publish();
    }
}

/// Creates an orchestrator and spawns its loop on the current runtime.
pub fn spawn_orchestrator(
    config: OrchestratorConfig,
    adapters: ChannelMap<Arc<dyn TransportAdapter>>,
) -> SyncResult<OrchestratorHandle> {
    let (orchestrator, handle) = SyncOrchestrator::new(config, adapters)?;
    tokio::spawn(orchestrator.run());
    Ok(handle)
}

/// Cloneable handle to a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    client_id: ClientId,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SyncSnapshot>,
    sync_events: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for OrchestratorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorHandle")
            .field("client_id", &self.client_id)
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl OrchestratorHandle {
    /// The engine instance this handle drives.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Starts or stops each channel so it matches `eligible && desired`.
    ///
    /// Returns whether at least one channel is active afterwards. Without a
    /// user id this is a no-op returning `false`.
    pub async fn evaluate_and_activate(
        &self,
        identity: Identity,
        plan: ChannelPlan,
    ) -> SyncResult<bool> {
        self.request(|reply| Command::EvaluateAndActivate {
            identity,
            plan,
            reply,
        })
        .await
    }

    /// Stops every channel whose toggle is off.
    pub async fn disable_all(&self, toggles: ChannelToggles) -> SyncResult<()> {
        self.request(|reply| Command::DisableAll { toggles, reply })
            .await
    }

    /// The state after every report queued so far has been applied.
    pub async fn current_state(&self) -> SyncResult<SyncSnapshot> {
        self.request(|reply| Command::CurrentState { reply }).await
    }

    /// Stops every channel and ends the orchestrator. Idempotent.
    pub async fn shutdown(&self) -> SyncResult<()> {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Ok(()) | Err(SyncError::ChannelClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Last published state.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Last published state of one channel.
    pub fn channel(&self, kind: ChannelKind) -> ChannelState {
        self.snapshot.borrow()[kind].clone()
    }

    /// Receives every published state.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.clone()
    }

    /// Receives data-change notifications from current generations.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync_events.subscribe()
    }
}
