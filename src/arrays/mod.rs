#![forbid(unsafe_code)]

//! Record arrays: live (all loaded records of a type) and managed (query
//! result) ordered collections kept in sync as identities come and go.
//!
//! Membership changes are staged in per-array [`ChangeSet`]s and only applied
//! by [`ArrayMembershipTracker::sync`], either on read or when the owning store
//! runs its scheduled sync job.

mod change_set;
mod tracked;


use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::metrics::CacheMetrics;
use crate::types::{CacheError, LocalId, ResourceIdentity, Result};

pub use change_set::{ChangeOp, ChangeSet};
pub use tracked::{ArrayDelta, ArrayId, ArrayKind, TrackedArray};

/// Default number of identities appended per chunk during a sync.
pub const DEFAULT_APPEND_CHUNK_SIZE: usize = 1024;

/// Callback invoked after a sync that changed an array's membership.
pub type ArrayListener = Box<dyn FnMut(ArrayId, &ArrayDelta)>;

/// Handle returned by [`ArrayMembershipTracker::subscribe_array`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArrayListenerToken(u64);

/// Parameters of a managed array.
#[derive(Clone, Debug, Default)]
pub struct ManagedArrayConfig {
    /// Resource type of the members.
    pub ty: String,
    /// Query that produced the result.
    pub query: Option<Value>,
    /// Initial members, in order.
    pub identities: Vec<LocalId>,
    /// Response meta.
    pub meta: Option<Value>,
}

impl ManagedArrayConfig {
    /// Config for an empty managed array of `ty`.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            ..Self::default()
        }
    }

    /// Sets the query.
    pub fn query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    /// Sets the initial members.
    pub fn identities(mut self, identities: impl IntoIterator<Item = LocalId>) -> Self {
        self.identities = identities.into_iter().collect();
        self
    }

    /// Sets the response meta.
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

type ArraySet = SmallVec<[ArrayId; 2]>;

/// Tracks which arrays contain which identities and applies batched deltas.
pub struct ArrayMembershipTracker {
    arrays: IndexMap<ArrayId, TrackedArray>,
    live: FxHashMap<String, ArrayId>,
    staged: FxHashMap<String, ChangeSet>,
    reverse: FxHashMap<LocalId, ArraySet>,
    listeners: FxHashMap<ArrayId, Vec<(ArrayListenerToken, ArrayListener)>>,
    dirty: IndexSet<ArrayId>,
    next_array: u64,
    next_listener: u64,
    chunk_size: usize,
    metrics: Arc<dyn CacheMetrics>,
}

impl ArrayMembershipTracker {
    /// Creates an empty tracker appending at most `chunk_size` members per chunk.
    pub fn new(chunk_size: usize, metrics: Arc<dyn CacheMetrics>) -> Self {
        Self {
            arrays: IndexMap::new(),
            live: FxHashMap::default(),
            staged: FxHashMap::default(),
            reverse: FxHashMap::default(),
            listeners: FxHashMap::default(),
            dirty: IndexSet::new(),
            next_array: 1,
            next_listener: 1,
            chunk_size: chunk_size.max(1),
            metrics,
        }
    }

    /// Number of arrays alive.
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    /// Returns `true` when no array exists.
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Returns `true` when some array (or staged type) has unapplied changes.
    pub fn has_pending(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Returns the live array for `ty`, creating it on first use.
    ///
    /// Additions recorded for `ty` before the array existed are replayed into
    /// its pending set.
    pub fn live_array_for(&mut self, ty: &str) -> ArrayId {
        if let Some(id) = self.live.get(ty) {
            return *id;
        }
        let id = self.allocate();
        let mut array = TrackedArray::new(id, ArrayKind::Live { ty: ty.to_string() });
        array.set_loaded(true);
        let replayed = match self.staged.remove(ty) {
            Some(staged) => {
                let count = staged.len();
                array.pending = staged;
                count
            }
            None => 0,
        };
        if !array.pending.is_empty() {
            self.dirty.insert(id);
        }
        self.arrays.insert(id, array);
        self.live.insert(ty.to_string(), id);
        debug!(ty, array = id.0, replayed, "array.live.create");
        id
    }

    /// Creates a managed array with explicit initial membership.
    pub fn create_managed_array(&mut self, config: ManagedArrayConfig) -> ArrayId {
        let id = self.allocate();
        let ManagedArrayConfig {
            ty,
            query,
            identities,
            meta,
        } = config;
        let mut array = TrackedArray::new(
            id,
            ArrayKind::Managed {
                ty: ty.clone(),
                query,
            },
        );
        array.replace(identities, meta);
        for lid in array.members() {
            link(&mut self.reverse, lid, id);
        }
        debug!(ty = %ty, array = id.0, members = array.len(), "array.managed.create");
        self.arrays.insert(id, array);
        id
    }

    /// Replaces the membership of `id`, disassociating every previous member first.
    pub fn populate(
        &mut self,
        id: ArrayId,
        identities: Vec<LocalId>,
        meta: Option<Value>,
    ) -> Result<ArrayDelta> {
        let array = self
            .arrays
            .get_mut(&id)
            .ok_or(CacheError::UnknownArray(id.0))?;
        let previous = array.replace(identities, meta);
        for lid in &previous {
            unlink(&mut self.reverse, lid, id);
        }
        let mut delta = ArrayDelta::default();
        for lid in array.members() {
            link(&mut self.reverse, lid, id);
            if !previous.contains(lid) {
                delta.added.push(lid.clone());
            }
        }
        delta.removed = previous
            .into_iter()
            .filter(|lid| !array.contains(lid))
            .collect();
        self.dirty.shift_remove(&id);
        debug!(
            array = id.0,
            added = delta.added.len(),
            removed = delta.removed.len(),
            "array.populate"
        );
        self.emit(id, &delta);
        Ok(delta)
    }

    /// Marks `id` as reloading; cleared by the next [`Self::populate`].
    pub fn set_updating(&mut self, id: ArrayId, updating: bool) -> Result<()> {
        self.arrays
            .get_mut(&id)
            .ok_or(CacheError::UnknownArray(id.0))?
            .set_updating(updating);
        Ok(())
    }

    /// Records that `identity` became available.
    ///
    /// The live array of its type and every array already holding it record
    /// the add, so a removal pending since the last sync is cancelled. Managed
    /// arrays otherwise only gain members through [`Self::populate`].
    pub fn identifier_added(&mut self, identity: &ResourceIdentity) {
        self.dispatch(identity, ChangeOp::Add);
    }

    /// Records that `identity` went away from every array containing it.
    pub fn identifier_removed(&mut self, identity: &ResourceIdentity) {
        self.dispatch(identity, ChangeOp::Delete);
    }

    /// Dispatches a loaded/unloaded transition of `identity`.
    pub fn identifier_changed(&mut self, identity: &ResourceIdentity, is_loaded: bool) {
        if is_loaded {
            self.identifier_added(identity);
        } else {
            self.identifier_removed(identity);
        }
    }

    /// Applies pending changes of `id` and notifies its listeners.
    pub fn sync(&mut self, id: ArrayId) -> Result<ArrayDelta> {
        let array = self
            .arrays
            .get_mut(&id)
            .ok_or(CacheError::UnknownArray(id.0))?;
        self.dirty.shift_remove(&id);
        let delta = array.sync(self.chunk_size);
        if delta.is_empty() {
            return Ok(delta);
        }
        for lid in &delta.removed {
            unlink(&mut self.reverse, lid, id);
        }
        for lid in &delta.added {
            link(&mut self.reverse, lid, id);
        }
        self.metrics
            .array_synced(delta.added.len(), delta.removed.len());
        debug!(
            array = id.0,
            added = delta.added.len(),
            removed = delta.removed.len(),
            "array.sync"
        );
        self.emit(id, &delta);
        Ok(delta)
    }

    /// Syncs every array with pending changes; returns how many changed.
    pub fn sync_all(&mut self) -> usize {
        let dirty: Vec<ArrayId> = self.dirty.drain(..).collect();
        let mut changed = 0usize;
        for id in dirty {
            if let Ok(delta) = self.sync(id) {
                if !delta.is_empty() {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Syncs `id` and returns its members.
    pub fn members(&mut self, id: ArrayId) -> Result<&[LocalId]> {
        self.sync(id)?;
        self.arrays
            .get(&id)
            .map(TrackedArray::members)
            .ok_or(CacheError::UnknownArray(id.0))
    }

    /// Returns the array without syncing it.
    pub fn array(&self, id: ArrayId) -> Result<&TrackedArray> {
        self.arrays.get(&id).ok_or(CacheError::UnknownArray(id.0))
    }

    /// Arrays whose committed membership contains `lid`.
    pub fn arrays_containing(&self, lid: &LocalId) -> Vec<ArrayId> {
        self.reverse
            .get(lid)
            .map(|set| set.to_vec())
            .unwrap_or_default()
    }

    /// Registers a listener for membership changes of `id`.
    pub fn subscribe_array(
        &mut self,
        id: ArrayId,
        listener: impl FnMut(ArrayId, &ArrayDelta) + 'static,
    ) -> Result<ArrayListenerToken> {
        if !self.arrays.contains_key(&id) {
            return Err(CacheError::UnknownArray(id.0));
        }
        let token = ArrayListenerToken(self.next_listener);
        self.next_listener += 1;
        self.listeners
            .entry(id)
            .or_default()
            .push((token, Box::new(listener)));
        Ok(token)
    }

    /// Removes an array listener; returns `false` if it was already gone.
    pub fn unsubscribe_array(&mut self, token: ArrayListenerToken) -> bool {
        for listeners in self.listeners.values_mut() {
            if let Some(pos) = listeners.iter().position(|(t, _)| *t == token) {
                listeners.remove(pos);
                return true;
            }
        }
        false
    }

    /// Removes `lid` from every array immediately, pending ops included.
    ///
    /// Returns the number of arrays whose committed membership changed.
    pub fn forget(&mut self, identity: &ResourceIdentity) -> usize {
        let lid = &identity.lid;
        if let Some(staged) = self.staged.get_mut(identity.ty.as_ref()) {
            staged.remove(lid);
        }
        if let Some(id) = self.live.get(identity.ty.as_ref()) {
            if let Some(array) = self.arrays.get_mut(id) {
                array.pending.remove(lid);
            }
        }
        let containing = self.reverse.remove(lid).unwrap_or_default();
        let mut touched = 0usize;
        for id in containing {
            let evicted = self
                .arrays
                .get_mut(&id)
                .is_some_and(|array| array.evict(lid));
            if evicted {
                touched += 1;
                let delta = ArrayDelta {
                    added: Vec::new(),
                    removed: vec![lid.clone()],
                };
                self.emit(id, &delta);
            }
        }
        trace!(identity = %identity, touched, "array.forget");
        touched
    }

    /// Rewrites every membership and pending op of `stale` to `kept`.
    pub fn merge(&mut self, stale: &ResourceIdentity, kept: &LocalId) {
        if stale.lid == *kept {
            return;
        }
        if let Some(staged) = self.staged.get_mut(stale.ty.as_ref()) {
            staged.rewrite(&stale.lid, kept);
        }
        let mut touched = 0usize;
        for array in self.arrays.values_mut() {
            let had_pending = array.pending.get(&stale.lid).is_some();
            if array.rename(&stale.lid, kept) || had_pending {
                touched += 1;
            }
        }
        if let Some(set) = self.reverse.remove(&stale.lid) {
            for id in set {
                link(&mut self.reverse, kept, id);
            }
        }
        debug!(stale = %stale.lid, kept = %kept, touched, "array.merge");
    }

    /// Empties and destroys the live array of `ty`, discarding staged changes.
    ///
    /// Returns the members it held.
    pub fn clear_type(&mut self, ty: &str) -> Vec<LocalId> {
        self.staged.remove(ty);
        let Some(id) = self.live.get(ty).copied() else {
            return Vec::new();
        };
        let removed = match self.arrays.get_mut(&id) {
            Some(array) => array.clear(),
            None => Vec::new(),
        };
        if !removed.is_empty() {
            let delta = ArrayDelta {
                added: Vec::new(),
                removed: removed.clone(),
            };
            self.emit(id, &delta);
        }
        self.destroy_array(id);
        debug!(ty, removed = removed.len(), "array.clear_type");
        removed
    }

    /// Drops `id`, its listeners and its reverse-index entries.
    pub fn destroy_array(&mut self, id: ArrayId) -> bool {
        let Some(array) = self.arrays.shift_remove(&id) else {
            return false;
        };
        for lid in array.members() {
            unlink(&mut self.reverse, lid, id);
        }
        if array.kind().is_live() {
            self.live.remove(array.kind().resource_type());
        }
        self.listeners.remove(&id);
        self.dirty.shift_remove(&id);
        trace!(array = id.0, "array.destroy");
        true
    }

    /// Drops every array, listener and staged change.
    pub fn teardown(&mut self) {
        let arrays = self.arrays.len();
        self.arrays.clear();
        self.live.clear();
        self.staged.clear();
        self.reverse.clear();
        self.listeners.clear();
        self.dirty.clear();
        debug!(arrays, "array.teardown");
    }

    fn allocate(&mut self) -> ArrayId {
        let id = ArrayId(self.next_array);
        self.next_array += 1;
        id
    }

    fn dispatch(&mut self, identity: &ResourceIdentity, op: ChangeOp) {
        let ty = identity.ty.as_ref();
        let mut targets: ArraySet = self.reverse.get(&identity.lid).cloned().unwrap_or_default();
        match self.live.get(ty) {
            Some(&id) => {
                if !targets.contains(&id) {
                    targets.push(id);
                }
            }
            // nothing is committed before the live array exists
            None => match op {
                ChangeOp::Add => {
                    self.staged
                        .entry(ty.to_string())
                        .or_default()
                        .record(identity.lid.clone(), op);
                    trace!(identity = %identity, "array.stage_add");
                }
                ChangeOp::Delete => {
                    if let Some(staged) = self.staged.get_mut(ty) {
                        if staged.get(&identity.lid).is_some() {
                            staged.record(identity.lid.clone(), op);
                        }
                    }
                }
            },
        }
        for id in targets {
            self.record(id, identity.lid.clone(), op);
        }
    }

    fn record(&mut self, id: ArrayId, lid: LocalId, op: ChangeOp) {
        let Some(array) = self.arrays.get_mut(&id) else {
            return;
        };
        if array.pending.get(&lid).is_none() && (op == ChangeOp::Add) == array.contains(&lid) {
            trace!(array = id.0, lid = %lid, ?op, "array.record.redundant");
            return;
        }
        trace!(array = id.0, lid = %lid, ?op, "array.record");
        array.pending.record(lid, op);
        if array.pending.is_empty() {
            self.dirty.shift_remove(&id);
        } else {
            self.dirty.insert(id);
        }
    }

    fn emit(&mut self, id: ArrayId, delta: &ArrayDelta) {
        if delta.is_empty() {
            return;
        }
        if let Some(listeners) = self.listeners.get_mut(&id) {
            for (_, listener) in listeners.iter_mut() {
                listener(id, delta);
            }
        }
    }
}

fn link(reverse: &mut FxHashMap<LocalId, ArraySet>, lid: &LocalId, id: ArrayId) {
    let set = reverse.entry(lid.clone()).or_default();
    if !set.contains(&id) {
        set.push(id);
    }
}

fn unlink(reverse: &mut FxHashMap<LocalId, ArraySet>, lid: &LocalId, id: ArrayId) {
    if let Some(set) = reverse.get_mut(lid) {
        set.retain(|existing| *existing != id);
        if set.is_empty() {
            reverse.remove(lid);
        }
    }
}
