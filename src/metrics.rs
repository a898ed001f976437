//! Metrics hooks for cache activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking cache activity.
///
/// Implementations receive one call per reconciliation, sync or delivery
/// event. The core never reads these values back.
pub trait CacheMetrics: Send + Sync {
    /// Records a relationship write entering the pending log.
    fn write_enqueued(&self);

    /// Records a flush of the pending log.
    ///
    /// # Parameters
    /// * `writes` - Number of pending writes applied by the flush.
    fn flushed(&self, writes: usize);

    /// Records an automatic repair of contradicting inverse data.
    fn inverse_repaired(&self);

    /// Records a record-array sync that changed membership.
    fn array_synced(&self, added: usize, removed: usize);

    /// Records a notification fan-out.
    ///
    /// # Parameters
    /// * `subscribers` - Number of callbacks invoked; `0` for undelivered notifications.
    fn notified(&self, subscribers: usize);

    /// Records an identity merge.
    fn identity_merged(&self);
}

/// A no-op implementation of [`CacheMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    fn write_enqueued(&self) {}
    fn flushed(&self, _writes: usize) {}
    fn inverse_repaired(&self) {}
    fn array_synced(&self, _added: usize, _removed: usize) {}
    fn notified(&self, _subscribers: usize) {}
    fn identity_merged(&self) {}
}

/// Counter-based implementation of [`CacheMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Relationship writes enqueued.
    pub writes_enqueued: AtomicU64,

    /// Flushes that applied at least one write.
    pub flushes: AtomicU64,

    /// Writes applied by flushes.
    pub writes_applied: AtomicU64,

    /// Inverse contradictions repaired.
    pub inverse_repairs: AtomicU64,

    /// Array syncs that changed membership.
    pub array_syncs: AtomicU64,

    /// Members appended by array syncs.
    pub array_members_added: AtomicU64,

    /// Members removed by array syncs.
    pub array_members_removed: AtomicU64,

    /// Notifications that reached at least one subscriber.
    pub notifications_delivered: AtomicU64,

    /// Notifications with no subscriber.
    pub notifications_dropped: AtomicU64,

    /// Identity merges.
    pub merges: AtomicU64,
}

impl CacheMetrics for CounterMetrics {
    fn write_enqueued(&self) {
        self.writes_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn flushed(&self, writes: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.writes_applied
            .fetch_add(writes as u64, Ordering::Relaxed);
    }

    fn inverse_repaired(&self) {
        self.inverse_repairs.fetch_add(1, Ordering::Relaxed);
    }

    fn array_synced(&self, added: usize, removed: usize) {
        self.array_syncs.fetch_add(1, Ordering::Relaxed);
        self.array_members_added
            .fetch_add(added as u64, Ordering::Relaxed);
        self.array_members_removed
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    fn notified(&self, subscribers: usize) {
        if subscribers == 0 {
            self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn identity_merged(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn CacheMetrics> {
    Arc::new(NoopMetrics)
}
