use indexmap::IndexMap;

use super::Namespace;
use crate::types::{LocalId, ResourceIdentity, Result};

type BufferKey = (LocalId, Namespace, Option<String>);

/// One queued notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingNotification {
    /// Identity to notify.
    pub identity: ResourceIdentity,
    /// Namespace of the change.
    pub namespace: Namespace,
    /// Changed field, for attributes and relationships.
    pub key: Option<String>,
}

/// Per-turn notification queue.
///
/// Repeated `(identity, namespace, key)` entries collapse into the first one;
/// the latest identity snapshot is kept so dispatch sees assigned ids.
#[derive(Debug, Default)]
pub struct NotificationBuffer {
    pending: IndexMap<BufferKey, ResourceIdentity>,
}

impl NotificationBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct queued notifications.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queues a notification; returns `false` when an identical one was already queued.
    pub fn enqueue(
        &mut self,
        identity: &ResourceIdentity,
        namespace: Namespace,
        key: Option<&str>,
    ) -> Result<bool> {
        namespace.check_key(key)?;
        let slot = (identity.lid.clone(), namespace, key.map(str::to_string));
        Ok(self.pending.insert(slot, identity.clone()).is_none())
    }

    /// Drops everything queued for `lid`.
    pub fn discard(&mut self, lid: &LocalId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(queued, _, _), _| queued != lid);
        before - self.pending.len()
    }

    /// Removes and returns every queued notification in enqueue order.
    pub fn drain(&mut self) -> Vec<PendingNotification> {
        self.pending
            .drain(..)
            .map(|((_, namespace, key), identity)| PendingNotification {
                identity,
                namespace,
                key,
            })
            .collect()
    }
}
