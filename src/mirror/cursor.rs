use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

/// Per-topic watermark of the highest message id already forwarded, plus
/// the in-flight reservations that make it a dedup gate: both discovery
/// paths must `claim` an id before forwarding it, so the same message can
/// never be delivered twice even when the live and poll paths race.
#[derive(Clone, Default)]
pub struct CursorStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    last: HashMap<i64, i64>,
    in_flight: HashMap<i64, HashSet<i64>>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last forwarded id for a topic; 0 for unknown topics
    pub async fn get(&self, topic: i64) -> i64 {
        self.inner.lock().await.last.get(&topic).copied().unwrap_or(0)
    }

    /// Direct set, used during initialization
    pub async fn prime(&self, topic: i64, id: i64) {
        self.inner.lock().await.last.insert(topic, id);
    }

    /// Reserve a message id for forwarding. Returns false when the id is
    /// at or below the watermark, or another task already holds it.
    pub async fn claim(&self, topic: i64, id: i64) -> bool {
        let mut inner = self.inner.lock().await;
        if id <= inner.last.get(&topic).copied().unwrap_or(0) {
            return false;
        }
        inner.in_flight.entry(topic).or_default().insert(id)
    }

    /// Advance the watermark after a successful forward and drop the
    /// reservation. The caller guarantees `id` was just forwarded.
    pub async fn commit(&self, topic: i64, id: i64) {
        let mut inner = self.inner.lock().await;
        inner.last.insert(topic, id);
        if let Some(pending) = inner.in_flight.get_mut(&topic) {
            pending.remove(&id);
        }
    }

    /// Drop a reservation without moving the watermark, so a failed
    /// forward stays eligible for the next sweep.
    pub async fn release(&self, topic: i64, id: i64) {
        let mut inner = self.inner.lock().await;
        if let Some(pending) = inner.in_flight.get_mut(&topic) {
            pending.remove(&id);
        }
    }
}
