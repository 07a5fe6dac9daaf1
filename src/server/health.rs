//! Health check endpoint for liveness probes.
//!
//! Reports dispatcher load alongside the status so an operator can see at a
//! glance whether the concurrency ceiling is saturated.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Health {
    pub status: &'static str,
    /// Units of work spawned and not yet finished.
    pub in_flight: usize,
    /// Units currently holding a concurrency slot.
    pub running: usize,
    pub max_concurrent: usize,
}

/// Health check handler.
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"status":"ok","in_flight":0,"running":0,"max_concurrent":5}
/// ```
pub async fn health_handler(State(app_state): State<AppState>) -> Json<Health> {
    let dispatcher = app_state.dispatcher();
    Json(Health {
        status: "ok",
        in_flight: dispatcher.in_flight(),
        running: dispatcher.running(),
        max_concurrent: dispatcher.max_concurrent(),
    })
}
