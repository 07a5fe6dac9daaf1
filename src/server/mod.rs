//! HTTP server for the grading webhook service.
//!
//! This module implements the HTTP server that:
//! - Accepts webhooks from GitHub, validates signatures, and dispatches them
//!   for background handling
//! - Streams recorded submissions to connected clients
//! - Provides health checks for liveness probes
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries (returns 200 once dispatched)
//! - `GET /stream/submissions?user_id=<id>` - Server-sent events, one per submission
//! - `GET /health` - Returns dispatcher load as JSON

use std::future::Future;
use std::sync::Arc;

use tracing::info;

pub mod health;
pub mod stream;
pub mod webhook;

pub use health::health_handler;
pub use stream::submissions_handler;
pub use webhook::{WebhookError, webhook_handler};

use crate::dispatch::Dispatcher;
use crate::stream::StreamServices;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Webhook secret for HMAC-SHA256 signature verification.
    webhook_secret: Vec<u8>,

    /// Admits verified events for background handling.
    dispatcher: Arc<Dispatcher>,

    /// Streams handlers publish to and clients subscribe to.
    streams: StreamServices,
}

impl AppState {
    pub fn new(
        webhook_secret: impl Into<Vec<u8>>,
        dispatcher: Arc<Dispatcher>,
        streams: StreamServices,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                webhook_secret: webhook_secret.into(),
                dispatcher,
                streams,
            }),
        }
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn streams(&self) -> &StreamServices {
        &self.inner.streams
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/stream/submissions", get(submissions_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

/// Waits for `signal`, then closes every submission stream.
///
/// Pass to `axum::serve(..).with_graceful_shutdown`: open event streams hold
/// their connections until they end, so they must be closed for the server to
/// finish draining.
pub async fn shutdown_on<F>(signal: F, streams: StreamServices)
where
    F: Future<Output = ()>,
{
    signal.await;
    info!("Shutdown requested, closing submission streams");
    streams.close().await;
}
