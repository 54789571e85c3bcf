//! Shared types and HTTP API for the peersync monitor.

pub mod config;

pub use config::MonitorConfig;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use peersync_sync::{EnablementQuery, EnablementState};
use peersync_types::{ChannelKind, ChannelState, ClientId, SyncSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub client_id: ClientId,
    /// Latest enablement decision, `None` before the first one finished.
    pub enabled: Option<bool>,
    pub validating: bool,
    pub error: Option<String>,
    pub channels: SyncSnapshot,
}

/// Read-only views served by the HTTP API.
#[derive(Clone)]
pub struct AppState {
    client_id: ClientId,
    snapshot: watch::Receiver<SyncSnapshot>,
    enablement: watch::Receiver<EnablementState>,
}

impl AppState {
    pub fn new(query: &EnablementQuery) -> Self {
        Self {
            client_id: query.orchestrator().client_id(),
            snapshot: query.orchestrator().subscribe(),
            enablement: query.subscribe(),
        }
    }

    pub fn status(&self) -> StatusResponse {
        let enablement = self.enablement.borrow().clone();
        StatusResponse {
            client_id: self.client_id,
            enabled: enablement.value,
            validating: enablement.validating,
            error: enablement.error.map(|e| e.to_string()),
            channels: self.snapshot.borrow().clone(),
        }
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.status())
}

async fn channel_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<ChannelState>, StatusCode> {
    let kind: ChannelKind = kind.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    let channel = state.snapshot.borrow()[kind].clone();
    Ok(Json(channel))
}

/// Build the HTTP API router over the given engine views.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/sync/status", get(status_handler))
        .route("/api/v1/sync/channels/{kind}", get(channel_handler))
        .with_state(state)
}

/// Logs channel status transitions until the orchestrator goes away.
pub async fn log_status_changes(mut snapshots: watch::Receiver<SyncSnapshot>) {
    let mut last = snapshots.borrow_and_update().clone();
    while snapshots.changed().await.is_ok() {
        let current = snapshots.borrow_and_update().clone();
        for kind in ChannelKind::ALL {
            let (before, after) = (&last[kind], &current[kind]);
            if before.status != after.status {
                info!("{} channel: {} -> {}", kind, before.status, after.status);
            }
            if before.awareness.len() != after.awareness.len() {
                debug!("{} channel: {} peer(s) present", kind, after.awareness.len());
            }
        }
        last = current;
    }
}
