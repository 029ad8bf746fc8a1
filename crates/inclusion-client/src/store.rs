//! Snapshot store for UI readers
//!
//! The request driver is the only writer. Readers either load the latest
//! snapshot or subscribe to every published one.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;

use crate::machine::RequestSnapshot;

/// Broadcast channel capacity (a request publishes a handful of snapshots)
const BROADCAST_CAPACITY: usize = 64;

/// Latest request snapshot plus change notifications
#[derive(Clone)]
pub struct StateStore {
    current: Arc<ArcSwap<RequestSnapshot>>,
    tx: broadcast::Sender<Arc<RequestSnapshot>>,
}

impl StateStore {
    pub fn new(initial: RequestSnapshot) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            tx,
        }
    }

    /// Publish a fully-applied snapshot
    ///
    /// Returns the number of subscribers that were notified.
    pub(crate) fn publish(&self, snapshot: RequestSnapshot) -> usize {
        let snapshot = Arc::new(snapshot);
        self.current.store(Arc::clone(&snapshot));

        match self.tx.send(snapshot) {
            Ok(count) => {
                tracing::trace!(receivers = count, "Published request snapshot");
                count
            }
            // No subscribers
            Err(_) => 0,
        }
    }

    /// Latest published snapshot
    pub fn load(&self) -> Arc<RequestSnapshot> {
        self.current.load_full()
    }

    /// Receive every snapshot published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RequestSnapshot>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(RequestSnapshot::default())
    }
}
