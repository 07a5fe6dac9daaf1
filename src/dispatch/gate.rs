//! In-flight deduplication gate.
//!
//! A key is present from the moment its event is admitted until the unit of
//! work handling it terminates. A redelivery arriving in between is dropped,
//! not queued. Both operations take the same lock.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::webhooks::DedupeKey;

/// The set of idempotency keys currently being processed.
#[derive(Debug, Default)]
pub struct DedupeGate {
    in_flight: Mutex<HashSet<DedupeKey>>,
}

impl DedupeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically tests for `key` and inserts it if absent.
    ///
    /// Returns `true` if the key was already in flight (the caller must drop
    /// the event), `false` if the caller now owns the entry and must
    /// eventually [`release`](Self::release) it.
    pub fn is_duplicate(&self, key: &DedupeKey) -> bool {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        !set.insert(key.clone())
    }

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn release(&self, key: &DedupeKey) {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        set.remove(key);
    }

    /// Returns true if `key` is currently in flight.
    pub fn contains(&self, key: &DedupeKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
