//! Concurrency-bounded dispatch of webhook events.
//!
//! The HTTP handler calls [`Dispatcher::dispatch`] and returns immediately.
//! Each admitted event becomes one spawned task that waits for a slot from a
//! fixed-size semaphore, runs the event handler to completion and then frees
//! its slot and its gate entry.
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   new   ┌──────────────┐   permit   ┌─────────┐
//! │ POST        │──►│ DedupeGate │───────► │ spawned task │──────────► │ handler │
//! │ /webhook    │   └────────────┘         └──────────────┘            └─────────┘
//! └─────────────┘        │ duplicate
//!       │ 200            ▼
//!       ▼              dropped
//! ```
//!
//! # Release Discipline
//!
//! The slot and the gate entry are held by values owned by the spawned task,
//! so they are released on every exit path: normal return, handler error,
//! panic, or the task being aborted. The permit is dropped before the gate
//! entry.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::handlers::Outcome;
use crate::webhooks::{DedupeKey, InboundEvent};

use super::EventHandler;
use super::gate::DedupeGate;

/// What happened to a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A task was spawned for the event.
    Accepted,
    /// The same logical event is already in flight; dropped.
    Duplicate,
    /// The dispatcher is shutting down; dropped.
    ShuttingDown,
}

/// A gate entry owned by one unit of work.
struct InFlight {
    gate: Arc<DedupeGate>,
    key: DedupeKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.gate.release(&self.key);
    }
}

/// Spawns one task per admitted event, at most `max_concurrent` running the
/// handler at a time.
pub struct Dispatcher {
    handler: Arc<dyn EventHandler>,
    gate: Arc<DedupeGate>,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Creates a dispatcher with a fresh gate.
    ///
    /// A ceiling of zero would never admit work and is raised to one.
    pub fn new(handler: Arc<dyn EventHandler>, max_concurrent: usize) -> Self {
        Self::with_gate(handler, Arc::new(DedupeGate::new()), max_concurrent)
    }

    /// Creates a dispatcher sharing an existing gate.
    pub fn with_gate(
        handler: Arc<dyn EventHandler>,
        gate: Arc<DedupeGate>,
        max_concurrent: usize,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        info!(max_concurrent, "Creating dispatcher");

        Dispatcher {
            handler,
            gate,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Admits `event` unless `key` is already in flight.
    ///
    /// Never blocks: slot acquisition happens inside the spawned task. Must be
    /// called from within a tokio runtime.
    pub fn dispatch(&self, event: InboundEvent, key: DedupeKey) -> DispatchOutcome {
        if self.shutdown.is_cancelled() {
            warn!(key = %key, kind = event.kind(), "Dispatcher shutting down, dropping event");
            return DispatchOutcome::ShuttingDown;
        }

        if self.gate.is_duplicate(&key) {
            debug!(key = %key, kind = event.kind(), "Duplicate event in flight, dropping");
            return DispatchOutcome::Duplicate;
        }

        let entry = InFlight {
            gate: Arc::clone(&self.gate),
            key,
        };
        let slots = Arc::clone(&self.slots);
        let handler = Arc::clone(&self.handler);
        let span = info_span!("unit_of_work", key = %entry.key, kind = event.kind());

        self.tasks.spawn(
            async move {
                let _entry = entry;
                // Declared after `_entry`, so released before it.
                let _permit: OwnedSemaphorePermit = match slots.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Concurrency pool closed, abandoning event");
                        return;
                    }
                };

                match handler.handle(event).await {
                    Ok(Outcome::Handled) => debug!("Event handled"),
                    Ok(Outcome::Ignored(reason)) => debug!(reason = %reason, "Event ignored"),
                    Err(e) => warn!(error = %e, "Event handling failed"),
                }
            }
            .instrument(span),
        );

        DispatchOutcome::Accepted
    }

    /// Number of units of work spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Number of units currently holding a slot.
    pub fn running(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn gate(&self) -> &Arc<DedupeGate> {
        &self.gate
    }

    /// Stops admitting events and waits for every in-flight unit to finish.
    pub async fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "Dispatcher shutting down");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("Dispatcher drained");
    }
}
