use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::trace;

use super::change_set::{ChangeOp, ChangeSet};
use crate::types::LocalId;

/// Handle of a tracked array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(pub(crate) u64);

impl ArrayId {
    /// Raw numeric handle.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// What drives an array's membership.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayKind {
    /// Every loaded resource of `ty`.
    Live {
        /// Resource type.
        ty: String,
    },
    /// Membership set by a query result.
    Managed {
        /// Resource type of the members.
        ty: String,
        /// Query that produced the membership, as supplied by the caller.
        query: Option<Value>,
    },
}

impl ArrayKind {
    /// Resource type of the members.
    pub fn resource_type(&self) -> &str {
        match self {
            ArrayKind::Live { ty } | ArrayKind::Managed { ty, .. } => ty,
        }
    }

    /// Returns `true` for live arrays.
    pub fn is_live(&self) -> bool {
        matches!(self, ArrayKind::Live { .. })
    }
}

/// Membership change applied by one sync.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArrayDelta {
    /// Identities appended, in order.
    pub added: Vec<LocalId>,
    /// Identities removed.
    pub removed: Vec<LocalId>,
}

impl ArrayDelta {
    /// Returns `true` when the sync changed nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Ordered, duplicate-free sequence of identities plus its pending changes.
#[derive(Debug)]
pub struct TrackedArray {
    id: ArrayId,
    kind: ArrayKind,
    members: Vec<LocalId>,
    index: FxHashSet<LocalId>,
    pub(crate) pending: ChangeSet,
    meta: Option<Value>,
    is_loaded: bool,
    is_updating: bool,
}

impl TrackedArray {
    pub(crate) fn new(id: ArrayId, kind: ArrayKind) -> Self {
        Self {
            id,
            kind,
            members: Vec::new(),
            index: FxHashSet::default(),
            pending: ChangeSet::new(),
            meta: None,
            is_loaded: false,
            is_updating: false,
        }
    }

    /// Array handle.
    pub fn id(&self) -> ArrayId {
        self.id
    }

    /// Kind of the array.
    pub fn kind(&self) -> &ArrayKind {
        &self.kind
    }

    /// Committed members, ignoring pending changes.
    pub fn members(&self) -> &[LocalId] {
        &self.members
    }

    /// Number of committed members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` when there are no committed members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `lid` is a committed member.
    pub fn contains(&self, lid: &LocalId) -> bool {
        self.index.contains(lid)
    }

    /// Pending changes not yet applied.
    pub fn pending(&self) -> &ChangeSet {
        &self.pending
    }

    /// Query/response meta.
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// Whether the membership has been loaded at least once.
    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    /// Whether a reload is in flight.
    pub fn is_updating(&self) -> bool {
        self.is_updating
    }

    pub(crate) fn set_loaded(&mut self, loaded: bool) {
        self.is_loaded = loaded;
    }

    pub(crate) fn set_updating(&mut self, updating: bool) {
        self.is_updating = updating;
    }

    /// Replaces the membership outright; pending changes are discarded.
    ///
    /// Returns the previous members.
    pub(crate) fn replace(&mut self, members: Vec<LocalId>, meta: Option<Value>) -> Vec<LocalId> {
        self.pending.clear();
        self.index.clear();
        let mut deduped = Vec::with_capacity(members.len());
        for lid in members {
            if self.index.insert(lid.clone()) {
                deduped.push(lid);
            }
        }
        if meta.is_some() {
            self.meta = meta;
        }
        self.is_loaded = true;
        self.is_updating = false;
        std::mem::replace(&mut self.members, deduped)
    }

    /// Swaps `stale` for `kept` in place, or drops it when `kept` is already present.
    pub(crate) fn rename(&mut self, stale: &LocalId, kept: &LocalId) -> bool {
        self.pending.rewrite(stale, kept);
        if !self.index.remove(stale) {
            return false;
        }
        if self.index.contains(kept) {
            self.members.retain(|lid| lid != stale);
        } else if let Some(slot) = self.members.iter_mut().find(|lid| *lid == stale) {
            *slot = kept.clone();
            self.index.insert(kept.clone());
        }
        true
    }

    /// Removes `lid` immediately, dropping any pending op for it.
    pub(crate) fn evict(&mut self, lid: &LocalId) -> bool {
        self.pending.remove(lid);
        if !self.index.remove(lid) {
            return false;
        }
        self.members.retain(|member| member != lid);
        true
    }

    /// Removes every member and pending op; returns the removed members.
    pub(crate) fn clear(&mut self) -> Vec<LocalId> {
        self.pending.clear();
        self.index.clear();
        std::mem::take(&mut self.members)
    }

    /// Applies pending changes: removals first, then appends in chunks of
    /// `chunk_size`, keeping the order additions were recorded in.
    pub(crate) fn sync(&mut self, chunk_size: usize) -> ArrayDelta {
        if self.pending.is_empty() {
            return ArrayDelta::default();
        }
        let mut delta = ArrayDelta::default();
        for (lid, op) in self.pending.drain() {
            match op {
                ChangeOp::Add if !self.index.contains(&lid) => delta.added.push(lid),
                ChangeOp::Delete if self.index.contains(&lid) => delta.removed.push(lid),
                _ => {}
            }
        }

        if !delta.removed.is_empty() {
            if delta.removed.len() == self.members.len() {
                self.members.clear();
                self.index.clear();
            } else {
                for lid in &delta.removed {
                    self.index.remove(lid);
                }
                let index = &self.index;
                self.members.retain(|lid| index.contains(lid));
            }
        }

        let mut chunks = 0usize;
        for chunk in delta.added.chunks(chunk_size.max(1)) {
            self.members.reserve(chunk.len());
            for lid in chunk {
                self.index.insert(lid.clone());
                self.members.push(lid.clone());
            }
            chunks += 1;
        }
        trace!(
            array = self.id.0,
            added = delta.added.len(),
            removed = delta.removed.len(),
            chunks,
            "array.sync.apply"
        );
        delta
    }
}
