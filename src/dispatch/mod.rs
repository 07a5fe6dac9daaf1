//! Deduplicated, concurrency-bounded dispatch of webhook events.

pub mod dispatcher;
pub mod gate;

use async_trait::async_trait;

use crate::handlers::{HandlerError, Outcome};
use crate::webhooks::InboundEvent;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use gate::DedupeGate;

/// Processes one event to completion.
///
/// Implemented by [`EventRouter`](crate::handlers::EventRouter); tests supply
/// their own.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent) -> Result<Outcome, HandlerError>;
}
