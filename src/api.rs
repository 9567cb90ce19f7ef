//! # REST API Endpoints
//!
//! Provides HTTP API endpoints for querying server state.
//! Currently only exposes the list of live Wisp sessions.

use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

/// Response item representing a single live session.
#[derive(Serialize)]
pub struct SessionListItem {
    /// The session's short identifier, as printed in the logs.
    pub session_id: String,

    /// Number of streams currently open in the session.
    pub streams: usize,
}

/// `GET /api/sessions` — Returns a JSON array of all live sessions.
///
/// This endpoint can be used by external tools or dashboards to see how
/// many sessions are connected and how many streams each carries.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionListItem>> {
    let sessions: Vec<SessionListItem> = state
        .sessions
        .iter()
        .map(|entry| SessionListItem {
            session_id: entry.key().clone(),
            streams: entry.value().streams.len(),
        })
        .collect();
    Json(sessions)
}
