#![forbid(unsafe_code)]

//! Relationship payload store.
//!
//! Keeps both directional views of every relationship pair consistent given a
//! stream of one-sided pushes. Pushes only enqueue; the pending log is applied
//! in arrival order right before anything reads from the store.

mod payload;
mod reconcile;


use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::metrics::CacheMetrics;
use crate::schema::{Polymorphism, RelationshipPairInfo, SchemaService, Side};
use crate::types::{ResourceRef, Result};

pub use payload::{RelationshipData, RelationshipPayload};

/// Handle of one registered relationship pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PairId(usize);

/// A push waiting for the next flush.
#[derive(Clone, Debug)]
pub struct PendingEdgeWrite {
    /// Owning resource type.
    pub ty: String,
    /// Owning resource id.
    pub id: String,
    /// Relationship name on the owning type.
    pub name: String,
    /// Pushed payload.
    pub payload: RelationshipPayload,
    target: (PairId, Side),
}

/// A relationship view touched by a flush.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EdgeChange {
    /// Resource whose view changed.
    pub resource: ResourceRef,
    /// Relationship name of the changed view.
    pub relationship: String,
}

pub(crate) struct PairStore {
    info: RelationshipPairInfo,
    lhs: FxHashMap<ResourceRef, RelationshipPayload>,
    rhs: FxHashMap<ResourceRef, RelationshipPayload>,
}

impl PairStore {
    fn new(info: RelationshipPairInfo) -> Self {
        Self {
            info,
            lhs: FxHashMap::default(),
            rhs: FxHashMap::default(),
        }
    }

    fn view(&self, side: Side) -> &FxHashMap<ResourceRef, RelationshipPayload> {
        match side {
            Side::Rhs if !self.info.is_reflexive() => &self.rhs,
            _ => &self.lhs,
        }
    }

    fn view_mut(&mut self, side: Side) -> &mut FxHashMap<ResourceRef, RelationshipPayload> {
        match side {
            Side::Rhs if !self.info.is_reflexive() => &mut self.rhs,
            _ => &mut self.lhs,
        }
    }
}

/// Storage for the lhs/rhs views of every relationship pair touched so far.
///
/// Pairs are discovered lazily: nothing is allocated for a relationship until
/// one of its sides is pushed or read.
pub struct RelationshipPayloadStore {
    schema: Arc<dyn SchemaService>,
    pairs: Vec<PairStore>,
    keys: FxHashMap<(String, String), (PairId, Side)>,
    pending: VecDeque<PendingEdgeWrite>,
    changes: IndexSet<EdgeChange>,
    repair_mismatches: bool,
    metrics: Arc<dyn CacheMetrics>,
}

impl RelationshipPayloadStore {
    /// Creates an empty store resolving pairs through `schema`.
    pub fn new(schema: Arc<dyn SchemaService>, metrics: Arc<dyn CacheMetrics>) -> Self {
        Self {
            schema,
            pairs: Vec::new(),
            keys: FxHashMap::default(),
            pending: VecDeque::new(),
            changes: IndexSet::new(),
            repair_mismatches: true,
            metrics,
        }
    }

    /// Enables or disables repairing the previous owner of a displaced singular inverse.
    pub fn set_repair_mismatches(&mut self, enabled: bool) {
        self.repair_mismatches = enabled;
    }

    /// Number of writes waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of pairs discovered so far.
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Enqueues a write. Reconciliation is deferred to the next read.
    ///
    /// Fails only when the relationship cannot be resolved against the schema.
    pub fn push(
        &mut self,
        ty: &str,
        id: &str,
        name: &str,
        mut payload: RelationshipPayload,
    ) -> Result<()> {
        let target = self.pair_for(ty, name)?;
        payload.partial_data = None;
        self.pending.push_back(PendingEdgeWrite {
            ty: ty.to_string(),
            id: id.to_string(),
            name: name.to_string(),
            payload,
            target,
        });
        self.metrics.write_enqueued();
        trace!(ty, id, name, pending = self.pending.len(), "relationship.push");
        Ok(())
    }

    /// Flushes pending writes and returns the stored view of `ty:id.name`.
    ///
    /// Resources with nothing known yield an empty payload.
    pub fn get(&mut self, ty: &str, id: &str, name: &str) -> Result<RelationshipPayload> {
        self.flush();
        let (pair, side) = self.pair_for(ty, name)?;
        let key = ResourceRef::new(ty, id);
        Ok(self.pairs[pair.0]
            .view(side)
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    /// Flushes pending writes and removes the view of `ty:id.name`.
    ///
    /// Inverse views are left as the flush reconciled them.
    pub fn unload(&mut self, ty: &str, id: &str, name: &str) -> Result<Option<RelationshipPayload>> {
        self.flush();
        let (pair, side) = self.pair_for(ty, name)?;
        let removed = self.pairs[pair.0]
            .view_mut(side)
            .remove(&ResourceRef::new(ty, id));
        trace!(ty, id, name, found = removed.is_some(), "relationship.unload");
        Ok(removed)
    }

    /// Flushes pending writes and removes every view owned by `resource`.
    pub fn unload_resource(&mut self, resource: &ResourceRef) -> usize {
        self.flush();
        let targets: Vec<(PairId, Side)> = self
            .keys
            .iter()
            .filter(|((owner, _), _)| *owner == resource.ty)
            .map(|(_, target)| *target)
            .collect();
        let mut removed = 0usize;
        for (pair, side) in targets {
            if self.pairs[pair.0].view_mut(side).remove(resource).is_some() {
                removed += 1;
            }
        }
        debug!(resource = %resource, removed, "relationship.unload_resource");
        removed
    }

    /// Returns the pair description for `ty.name`, discovering it if needed.
    pub fn pair_info(&mut self, ty: &str, name: &str) -> Result<&RelationshipPairInfo> {
        let (pair, _) = self.pair_for(ty, name)?;
        Ok(&self.pairs[pair.0].info)
    }

    /// Drains the views touched by flushes since the last call.
    pub fn take_changes(&mut self) -> Vec<EdgeChange> {
        self.changes.drain(..).collect()
    }

    /// Drops all pairs, views and pending writes.
    pub fn clear(&mut self) {
        self.pairs.clear();
        self.keys.clear();
        self.pending.clear();
        self.changes.clear();
    }

    fn pair_for(&mut self, ty: &str, name: &str) -> Result<(PairId, Side)> {
        if let Some(target) = self.keys.get(&(ty.to_string(), name.to_string())) {
            return Ok(*target);
        }
        if let Some(pair) = self.polymorphic_pair_for(ty, name) {
            self.pairs[pair.0].info.adopt_concrete(ty);
            self.keys
                .insert((ty.to_string(), name.to_string()), (pair, Side::Rhs));
            debug!(ty, name, "relationship.pair.adopt");
            return Ok((pair, Side::Rhs));
        }
        let resolved = RelationshipPairInfo::resolve(self.schema.as_ref(), ty, name)?;

        if resolved.adopt.is_some() {
            let base = resolved.info.side(Side::Rhs);
            let base_key = (base.owner.clone(), base.name.clone());
            if let Some(&(pair, side)) = self.keys.get(&base_key) {
                self.pairs[pair.0].info.adopt_concrete(ty);
                self.keys
                    .insert((ty.to_string(), name.to_string()), (pair, side));
                debug!(ty, name, base = %base_key.0, "relationship.pair.adopt");
                return Ok((pair, side));
            }
        }

        let pair = PairId(self.pairs.len());
        let info = resolved.info;
        self.keys
            .entry((info.lhs.owner.clone(), info.lhs.name.clone()))
            .or_insert((pair, Side::Lhs));
        if let (Some(rhs), false) = (&info.rhs, info.is_reflexive()) {
            self.keys
                .entry((rhs.owner.clone(), rhs.name.clone()))
                .or_insert((pair, Side::Rhs));
        }
        self.keys
            .entry((ty.to_string(), name.to_string()))
            .or_insert((pair, resolved.side));
        debug!(
            ty,
            name,
            lhs = %format!("{}.{}", info.lhs.owner, info.lhs.name),
            polymorphic = info.is_polymorphic(),
            reflexive = info.is_reflexive(),
            "relationship.pair.discover"
        );
        self.pairs.push(PairStore::new(info));
        Ok((pair, resolved.side))
    }

    /// Finds a discovered polymorphic pair whose abstract side `ty` can fill as `name`.
    fn polymorphic_pair_for(&self, ty: &str, name: &str) -> Option<PairId> {
        self.pairs.iter().enumerate().find_map(|(index, store)| {
            let Polymorphism::Polymorphic { base, .. } = &store.info.polymorphism else {
                return None;
            };
            let rhs = store.info.rhs.as_ref()?;
            (rhs.name == name && base != ty && self.schema.is_subtype(ty, base))
                .then_some(PairId(index))
        })
    }
}
