use indexmap::IndexMap;

use crate::types::LocalId;

/// Pending membership operation for one identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    /// Append on next sync.
    Add,
    /// Remove on next sync.
    Delete,
}

impl ChangeOp {
    fn opposite(self) -> ChangeOp {
        match self {
            ChangeOp::Add => ChangeOp::Delete,
            ChangeOp::Delete => ChangeOp::Add,
        }
    }
}

/// Collapsed set of pending membership changes, in first-write order.
///
/// Recording the opposite of a pending op cancels both; recording the same op
/// twice is a no-op.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    ops: IndexMap<LocalId, ChangeOp>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities with a pending op.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Pending op for `lid`, if any.
    pub fn get(&self, lid: &LocalId) -> Option<ChangeOp> {
        self.ops.get(lid).copied()
    }

    /// Records `op` for `lid`; returns `true` if an op is pending afterwards.
    pub fn record(&mut self, lid: LocalId, op: ChangeOp) -> bool {
        match self.ops.get(&lid) {
            Some(existing) if *existing == op.opposite() => {
                self.ops.shift_remove(&lid);
                false
            }
            Some(_) => true,
            None => {
                self.ops.insert(lid, op);
                true
            }
        }
    }

    /// Drops any pending op for `lid`.
    pub fn remove(&mut self, lid: &LocalId) -> Option<ChangeOp> {
        self.ops.shift_remove(lid)
    }

    /// Moves a pending op from `stale` to `kept`, unless `kept` already has one.
    pub fn rewrite(&mut self, stale: &LocalId, kept: &LocalId) {
        let Some(op) = self.ops.shift_remove(stale) else {
            return;
        };
        self.ops.entry(kept.clone()).or_insert(op);
    }

    /// Folds every op of `other` into this set, in order.
    pub fn absorb(&mut self, other: ChangeSet) {
        for (lid, op) in other.ops {
            self.record(lid, op);
        }
    }

    /// Iterates pending ops in first-write order.
    pub fn iter(&self) -> impl Iterator<Item = (&LocalId, ChangeOp)> {
        self.ops.iter().map(|(lid, op)| (lid, *op))
    }

    /// Removes and returns every pending op in first-write order.
    pub fn drain(&mut self) -> impl Iterator<Item = (LocalId, ChangeOp)> + '_ {
        self.ops.drain(..)
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.ops.clear();
    }
}
