use crate::AppState;
use axum::{Json, extract::State};
use liveframe_core::session::{SessionStats, SessionSummary};
use serde::Serialize;

/// Connection introspection payload.
#[derive(Debug, Serialize)]
pub struct ConnectionsReport {
    #[serde(flatten)]
    pub stats: SessionStats,
    pub sessions: Vec<SessionSummary>,
}

/// Aggregate and per-session connection statistics.
pub async fn connections_handler(State(state): State<AppState>) -> Json<ConnectionsReport> {
    let store = state.pipeline.store();
    Json(ConnectionsReport {
        stats: store.stats().await,
        sessions: store.snapshot().await,
    })
}
