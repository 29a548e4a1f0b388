//! Orchestrator API handlers.

use axum::{extract::State, Json};
use std::sync::Arc;

use evidence_core::OrchestratorStatus;

use crate::state::AppState;

/// Get orchestrator status: queue counts, live jobs and the ceiling.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator().status().await)
}
