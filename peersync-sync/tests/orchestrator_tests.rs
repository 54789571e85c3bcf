use peersync_sync::transport::loopback::LoopbackTransport;
use peersync_sync::{
    resolve, spawn_orchestrator, ChannelPlan, MeshConfig, OrchestratorConfig, OrchestratorHandle,
    RelayConfig, SyncError, SyncOrchestrator, SyncSettings, TransportAdapter,
};
use peersync_types::{
    ChannelKind, ChannelMap, ClientId, Identity, PeerPresence, PlatformInfo, SyncStatus,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    handle: OrchestratorHandle,
    mesh: Arc<LoopbackTransport>,
    relay: Arc<LoopbackTransport>,
}

fn harness() -> Harness {
    let mesh = Arc::new(LoopbackTransport::new(ChannelKind::Mesh));
    let relay = Arc::new(LoopbackTransport::new(ChannelKind::Relay));
    let adapters = ChannelMap::new(
        mesh.clone() as Arc<dyn TransportAdapter>,
        relay.clone() as Arc<dyn TransportAdapter>,
    );
    let handle = spawn_orchestrator(OrchestratorConfig::default(), adapters).unwrap();
    Harness {
        handle,
        mesh,
        relay,
    }
}

fn settings(mesh_on: bool, relay_on: bool) -> SyncSettings {
    SyncSettings {
        mesh: MeshConfig {
            enabled: mesh_on,
            channel_name: Some("room1".into()),
            signaling: Some("wss://signal".into()),
            password: None,
        },
        relay: RelayConfig {
            enabled: relay_on,
            room_name: Some("team".into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn mesh_only() -> ChannelPlan {
    resolve(&settings(true, false))
}

fn nothing() -> ChannelPlan {
    resolve(&settings(false, false))
}

fn user() -> Identity {
    Identity::new("u1")
}

fn peer(id: &str) -> PeerPresence {
    PeerPresence::new(ClientId::new(), Identity::new(id))
}

// ── Construction ────────────────────────────────────────────────

#[tokio::test]
async fn starts_with_every_channel_disabled() {
    let h = harness();
    let snapshot = h.handle.current_state().await.unwrap();

    for kind in ChannelKind::ALL {
        assert!(!snapshot[kind].enabled);
        assert_eq!(snapshot[kind].status, SyncStatus::Disabled);
        assert!(snapshot[kind].awareness.is_empty());
    }
    assert_eq!(h.handle.snapshot(), snapshot);
}

#[test]
fn adapter_in_wrong_slot_is_rejected() {
    let adapters = ChannelMap::new(
        Arc::new(LoopbackTransport::new(ChannelKind::Relay)) as Arc<dyn TransportAdapter>,
        Arc::new(LoopbackTransport::new(ChannelKind::Relay)) as Arc<dyn TransportAdapter>,
    );
    let err = SyncOrchestrator::new(OrchestratorConfig::default(), adapters).unwrap_err();
    assert!(matches!(
        err,
        SyncError::ChannelMismatch {
            expected: ChannelKind::Mesh,
            actual: ChannelKind::Relay,
        }
    ));
}

#[tokio::test]
async fn handle_exposes_configured_client_id() {
    let client_id = ClientId::new();
    let config = OrchestratorConfig {
        client_id,
        ..Default::default()
    };
    let mesh = Arc::new(LoopbackTransport::new(ChannelKind::Mesh));
    let adapters = ChannelMap::new(
        mesh.clone() as Arc<dyn TransportAdapter>,
        Arc::new(LoopbackTransport::new(ChannelKind::Relay)) as Arc<dyn TransportAdapter>,
    );
    let handle = spawn_orchestrator(config, adapters).unwrap();
    assert_eq!(handle.client_id(), client_id);

    handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    assert_eq!(mesh.last_request().unwrap().client_id, client_id);
}

// ── Activation ──────────────────────────────────────────────────

#[tokio::test]
async fn mesh_only_activation() {
    let h = harness();

    let active = h
        .handle
        .evaluate_and_activate(user(), mesh_only())
        .await
        .unwrap();
    assert!(active);

    let snapshot = h.handle.snapshot();
    assert!(snapshot.mesh.enabled);
    assert_eq!(snapshot.mesh.status, SyncStatus::Connecting);
    assert!(!snapshot.relay.enabled);
    assert_eq!(snapshot.relay.status, SyncStatus::Disabled);

    assert_eq!(h.mesh.start_count(), 1);
    assert_eq!(h.relay.start_count(), 0);

    let request = h.mesh.last_request().unwrap();
    assert_eq!(request.kind, ChannelKind::Mesh);
    assert_eq!(request.room.room_name(), "room1");
    assert_eq!(request.room.signaling(), Some("wss://signal"));
    assert_eq!(request.user.id.as_str(), "u1");
    assert_eq!(request.user.name, "My Unknown (Unknown)");
}

#[tokio::test]
async fn both_channels_start_together() {
    let h = harness();
    let settings = SyncSettings {
        device_name: Some("Work laptop".into()),
        ..settings(true, true)
    };
    let identity = Identity::new("u1").with_platform(PlatformInfo {
        browser: "Firefox".into(),
        os: "Linux".into(),
        is_mobile: false,
    });

    assert!(h
        .handle
        .evaluate_and_activate(identity, resolve(&settings))
        .await
        .unwrap());

    assert_eq!(h.mesh.start_count(), 1);
    assert_eq!(h.relay.start_count(), 1);
    assert_eq!(h.relay.last_request().unwrap().user.name, "Work laptop");
    assert_eq!(h.relay.last_request().unwrap().user.platform.os, "Linux");
}

#[tokio::test]
async fn ineligible_channel_is_not_started() {
    let h = harness();
    let mut settings = settings(true, true);
    settings.mesh.signaling = None;
    settings.relay.room_name = Some(String::new());

    let active = h
        .handle
        .evaluate_and_activate(user(), resolve(&settings))
        .await
        .unwrap();

    assert!(!active);
    assert_eq!(h.mesh.start_count(), 0);
    assert_eq!(h.relay.start_count(), 0);
}

#[tokio::test]
async fn missing_user_is_a_no_op() {
    let h = harness();

    for identity in [Identity::default(), Identity::new("   ")] {
        let active = h
            .handle
            .evaluate_and_activate(identity, mesh_only())
            .await
            .unwrap();
        assert!(!active);
    }

    assert_eq!(h.mesh.start_count(), 0);
    assert_eq!(h.mesh.stop_count(), 0);
    assert_eq!(h.relay.start_count(), 0);
    assert!(!h.handle.snapshot().mesh.enabled);
}

#[tokio::test]
async fn repeated_activation_does_not_restart() {
    let h = harness();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    h.mesh.connect();

    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();

    assert_eq!(h.mesh.start_count(), 1);
    assert_eq!(h.mesh.stop_count(), 0);
    assert_eq!(
        h.handle.current_state().await.unwrap().mesh.status,
        SyncStatus::Connected
    );
}

#[tokio::test]
async fn every_activation_publishes() {
    let h = harness();
    let mut rx = h.handle.subscribe();
    rx.mark_unchanged();

    h.handle.evaluate_and_activate(user(), nothing()).await.unwrap();
    assert!(rx.has_changed().unwrap());
}

#[tokio::test]
async fn room_change_restarts_channel() {
    let h = harness();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();

    let mut moved = settings(true, false);
    moved.mesh.channel_name = Some("room2".into());
    h.handle
        .evaluate_and_activate(user(), resolve(&moved))
        .await
        .unwrap();

    assert_eq!(h.mesh.start_count(), 2);
    assert_eq!(h.mesh.stop_count(), 1);
    assert_eq!(h.mesh.active_sessions(), 1);
    assert_eq!(h.mesh.max_concurrent_sessions(), 1);
    assert_eq!(h.mesh.last_request().unwrap().room.room_name(), "room2");

    // Reports from the replaced session are ignored.
    let first = h.mesh.requests()[0].generation;
    h.mesh.sink_for(first).unwrap().status_changed(SyncStatus::Connected);
    assert_eq!(
        h.handle.current_state().await.unwrap().mesh.status,
        SyncStatus::Connecting
    );
}

#[tokio::test]
async fn rejected_start_becomes_connection_error() {
    let h = harness();
    h.mesh.reject_next_start();

    let active = h
        .handle
        .evaluate_and_activate(user(), mesh_only())
        .await
        .unwrap();

    assert!(active);
    let mesh = h.handle.snapshot().mesh;
    assert!(mesh.enabled);
    assert_eq!(mesh.status, SyncStatus::ConnectionError);
}

#[tokio::test]
async fn same_session_is_dispatched_again_after_failed_start() {
    let h = harness();
    h.mesh.fail_next_start("signaling unreachable");
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    assert_eq!(h.mesh.start_count(), 0);

    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    assert_eq!(h.mesh.start_count(), 1);
    assert_eq!(h.handle.snapshot().mesh.status, SyncStatus::Connecting);

    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    assert_eq!(h.mesh.start_count(), 1);
}

#[tokio::test]
async fn failed_start_becomes_connection_error() {
    let h = harness();
    h.relay.fail_next_start("service unavailable");

    h.handle
        .evaluate_and_activate(user(), resolve(&settings(true, true)))
        .await
        .unwrap();

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.relay.status, SyncStatus::ConnectionError);
    assert_eq!(snapshot.mesh.status, SyncStatus::Connecting);
}

// ── Transport reports ───────────────────────────────────────────

#[tokio::test]
async fn connect_then_disable() {
    let h = harness();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();

    let sink = h.mesh.latest_sink().unwrap();
    sink.status_changed(SyncStatus::Connected);
    sink.awareness_changed(vec![peer("p1")]);

    let connected = h.handle.current_state().await.unwrap().mesh;
    assert_eq!(connected.status, SyncStatus::Connected);
    assert_eq!(connected.awareness.len(), 1);
    assert_eq!(connected.awareness[0].user.id.as_str(), "p1");

    let active = h
        .handle
        .evaluate_and_activate(user(), nothing())
        .await
        .unwrap();

    assert!(!active);
    assert_eq!(h.mesh.stop_count(), 1);
    let mesh = h.handle.snapshot().mesh;
    assert!(!mesh.enabled);
    assert_eq!(mesh.status, SyncStatus::Disabled);
    assert!(mesh.awareness.is_empty());
}

#[tokio::test]
async fn awareness_is_replaced_wholesale() {
    let h = harness();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    let sink = h.mesh.latest_sink().unwrap();
    sink.status_changed(SyncStatus::Connected);

    sink.awareness_changed(vec![peer("a"), peer("b")]);
    assert_eq!(h.handle.current_state().await.unwrap().mesh.awareness.len(), 2);

    sink.awareness_changed(vec![peer("c")]);
    let awareness = h.handle.current_state().await.unwrap().mesh.awareness;
    let ids: Vec<&str> = awareness.iter().map(|p| p.user.id.as_str()).collect();
    assert_eq!(ids, vec!["c"]);
}

#[tokio::test]
async fn connection_error_clears_awareness_without_retry() {
    let h = harness();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    h.mesh.connect();
    assert_eq!(h.handle.current_state().await.unwrap().mesh.awareness.len(), 1);

    h.mesh
        .latest_sink()
        .unwrap()
        .status_changed(SyncStatus::ConnectionError);
    let mesh = h.handle.current_state().await.unwrap().mesh;
    assert!(mesh.enabled);
    assert_eq!(mesh.status, SyncStatus::ConnectionError);
    assert!(mesh.awareness.is_empty());

    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    assert_eq!(h.mesh.start_count(), 1);
}

#[tokio::test]
async fn transport_cannot_report_disabled() {
    let h = harness();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();

    h.mesh
        .latest_sink()
        .unwrap()
        .status_changed(SyncStatus::Disabled);

    let mesh = h.handle.current_state().await.unwrap().mesh;
    assert!(mesh.enabled);
    assert_eq!(mesh.status, SyncStatus::Connecting);
}

#[tokio::test]
async fn late_report_after_disable_is_dropped() {
    let h = harness();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    let stale = h.mesh.latest_sink().unwrap();

    h.handle.evaluate_and_activate(user(), nothing()).await.unwrap();
    stale.status_changed(SyncStatus::Connected);
    stale.awareness_changed(vec![peer("p1")]);

    let mesh = h.handle.current_state().await.unwrap().mesh;
    assert!(!mesh.enabled);
    assert_eq!(mesh.status, SyncStatus::Disabled);
    assert!(mesh.awareness.is_empty());
}

#[tokio::test]
async fn enable_disable_enable_keeps_one_session() {
    let h = harness();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    h.handle.evaluate_and_activate(user(), nothing()).await.unwrap();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();

    assert_eq!(h.mesh.start_count(), 2);
    assert_eq!(h.mesh.stop_count(), 1);
    assert_eq!(h.mesh.active_sessions(), 1);
    assert_eq!(h.mesh.max_concurrent_sessions(), 1);

    // The first session's late Connected must not affect the new one.
    let generations: Vec<u64> = h.mesh.requests().iter().map(|r| r.generation).collect();
    assert!(generations[1] > generations[0]);
    h.mesh
        .sink_for(generations[0])
        .unwrap()
        .status_changed(SyncStatus::Connected);
    assert_eq!(
        h.handle.current_state().await.unwrap().mesh.status,
        SyncStatus::Connecting
    );

    h.mesh.connect();
    assert_eq!(
        h.handle.current_state().await.unwrap().mesh.status,
        SyncStatus::Connected
    );
}

#[tokio::test]
async fn sync_events_are_forwarded() {
    let h = harness();
    let mut events = h.handle.subscribe_events();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();

    h.mesh.latest_sink().unwrap().data_synced("notes");
    h.handle.current_state().await.unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.channel, ChannelKind::Mesh);
    assert_eq!(event.table, "notes");
}

#[tokio::test]
async fn sync_events_from_stopped_sessions_are_dropped() {
    let h = harness();
    let mut events = h.handle.subscribe_events();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    let stale = h.mesh.latest_sink().unwrap();
    h.handle.evaluate_and_activate(user(), nothing()).await.unwrap();

    stale.data_synced("notes");
    h.handle.current_state().await.unwrap();

    assert!(events.try_recv().is_err());
}

// ── Disable and shutdown ────────────────────────────────────────

#[tokio::test]
async fn disable_all_stops_only_toggled_off_channels() {
    let h = harness();
    h.handle
        .evaluate_and_activate(user(), resolve(&settings(true, true)))
        .await
        .unwrap();

    h.handle.disable_all(ChannelMap::new(false, true)).await.unwrap();

    let snapshot = h.handle.snapshot();
    assert!(!snapshot.mesh.enabled);
    assert!(snapshot.relay.enabled);
    assert_eq!(h.mesh.stop_count(), 1);
    assert_eq!(h.relay.stop_count(), 0);

    h.handle.disable_all(ChannelMap::new(false, true)).await.unwrap();
    assert_eq!(h.mesh.stop_count(), 1);
}

#[tokio::test]
async fn disable_all_on_idle_channels_does_nothing() {
    let h = harness();
    h.handle.disable_all(ChannelMap::new(false, false)).await.unwrap();
    assert_eq!(h.mesh.stop_count(), 0);
    assert_eq!(h.relay.stop_count(), 0);
}

#[tokio::test]
async fn shutdown_stops_channels_and_closes_handle() {
    let h = harness();
    h.handle
        .evaluate_and_activate(user(), resolve(&settings(true, true)))
        .await
        .unwrap();

    h.handle.shutdown().await.unwrap();

    assert_eq!(h.mesh.stop_count(), 1);
    assert_eq!(h.relay.stop_count(), 1);
    assert!(!h.handle.snapshot().mesh.enabled);
    assert!(matches!(
        h.handle.current_state().await,
        Err(SyncError::ChannelClosed)
    ));
    assert!(matches!(
        h.handle.evaluate_and_activate(user(), mesh_only()).await,
        Err(SyncError::ChannelClosed)
    ));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn dropping_every_handle_tears_down() {
    let h = harness();
    h.handle.evaluate_and_activate(user(), mesh_only()).await.unwrap();
    let mesh = h.mesh.clone();
    drop(h);

    tokio::time::timeout(Duration::from_secs(2), async {
        while mesh.stop_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("orchestrator did not tear down");
    assert_eq!(mesh.active_sessions(), 0);
}
