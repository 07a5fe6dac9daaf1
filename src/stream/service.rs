//! Generic publish/subscribe registry keyed by subscriber identity.
//!
//! At most one live subscription exists per identity: subscribing again
//! closes the previous delivery pipe before registering the new one.
//!
//! # Delivery under the lock
//!
//! [`send_to`](StreamService::send_to) and
//! [`broadcast`](StreamService::broadcast) hold the registry lock while
//! waiting for each subscriber's pipe to accept the value, so a subscription
//! can never be replaced or closed halfway through a delivery. The known
//! limitation: one subscriber that stops reading (but keeps its connection
//! open) delays delivery to everyone else, and blocks `subscribe` and
//! `unsubscribe` until it catches up.

use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

/// Values each pipe buffers before the sender waits.
const PIPE_CAPACITY: usize = 1;

struct Subscription<T> {
    serial: u64,
    tx: mpsc::Sender<T>,
}

struct Registry<K, T> {
    subscriptions: HashMap<K, Subscription<T>>,
    next_serial: u64,
    closed: bool,
}

/// The receiving end of a subscription.
///
/// `recv` returns `None` once the subscription has been closed, either by
/// [`StreamService::unsubscribe`] or by a newer subscription for the same ID.
pub struct Subscriber<K, T> {
    id: K,
    serial: u64,
    rx: mpsc::Receiver<T>,
}

impl<K: Copy, T> Subscriber<K, T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns a value that is already waiting, without blocking.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn id(&self) -> K {
        self.id
    }

    /// Distinguishes this subscription from later ones for the same ID.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

/// A registry of live subscriptions delivering values of type `T`.
pub struct StreamService<K, T> {
    registry: Mutex<Registry<K, T>>,
}

impl<K, T> Default for StreamService<K, T> {
    fn default() -> Self {
        Self {
            registry: Mutex::new(Registry {
                subscriptions: HashMap::new(),
                next_serial: 0,
                closed: false,
            }),
        }
    }
}

impl<K, T> StreamService<K, T>
where
    K: Copy + Eq + Hash + std::fmt::Debug,
    T: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription for `id`, closing any existing one first.
    pub async fn subscribe(&self, id: K) -> Subscriber<K, T> {
        let mut registry = self.registry.lock().await;

        if registry.subscriptions.remove(&id).is_some() {
            debug!(id = ?id, "Closing superseded subscription");
        }

        registry.next_serial += 1;
        let serial = registry.next_serial;
        let (tx, rx) = mpsc::channel(PIPE_CAPACITY);
        if registry.closed {
            debug!(id = ?id, "Service closed, subscription ends immediately");
            return Subscriber { id, serial, rx };
        }
        registry.subscriptions.insert(id, Subscription { serial, tx });
        debug!(id = ?id, serial, "Subscribed");

        Subscriber { id, serial, rx }
    }

    /// Closes and removes the subscription for `id`, if any.
    pub async fn unsubscribe(&self, id: K) {
        if self.registry.lock().await.subscriptions.remove(&id).is_some() {
            debug!(id = ?id, "Unsubscribed");
        }
    }

    /// Removes the subscription for `id` only if it is still the one
    /// identified by `serial`. Returns whether it was removed.
    pub async fn release(&self, id: K, serial: u64) -> bool {
        let mut registry = self.registry.lock().await;
        match registry.subscriptions.get(&id) {
            Some(sub) if sub.serial == serial => {
                registry.subscriptions.remove(&id);
                debug!(id = ?id, serial, "Released subscription");
                true
            }
            _ => false,
        }
    }

    /// Delivers `payload` to each listed ID with a live subscription.
    ///
    /// Unknown IDs and pipes closed by their receiver are skipped. Returns the
    /// number of subscribers that accepted the value.
    pub async fn send_to(&self, payload: T, ids: &[K]) -> usize {
        let registry = self.registry.lock().await;
        let mut delivered = 0;

        for id in ids {
            let Some(sub) = registry.subscriptions.get(id) else {
                trace!(id = ?id, "No subscriber");
                continue;
            };
            match sub.tx.send(payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => trace!(id = ?id, "Subscriber went away"),
            }
        }

        delivered
    }

    /// Delivers `payload` to every live subscription.
    pub async fn broadcast(&self, payload: T) -> usize {
        let registry = self.registry.lock().await;
        let mut delivered = 0;

        for (id, sub) in &registry.subscriptions {
            match sub.tx.send(payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => trace!(id = ?id, "Subscriber went away"),
            }
        }

        delivered
    }

    /// Closes every subscription and refuses new ones. Each open
    /// [`Subscriber`] sees `None` once it has drained what was delivered.
    pub async fn close_all(&self) {
        let mut registry = self.registry.lock().await;
        registry.closed = true;
        let count = registry.subscriptions.len();
        registry.subscriptions.clear();
        debug!(count, "Closed all subscriptions");
    }

    /// Number of registered subscriptions.
    pub async fn len(&self) -> usize {
        self.registry.lock().await.subscriptions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_subscribed(&self, id: K) -> bool {
        self.registry.lock().await.subscriptions.contains_key(&id)
    }
}
