#![forbid(unsafe_code)]

//! Identity registry: one stable [`ResourceIdentity`] per logical resource.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::types::{CacheError, IdentifierRef, LocalId, ResourceIdentity, Result};

/// Default prefix for generated local ids.
pub const DEFAULT_LID_PREFIX: &str = "@lid:";

#[derive(Clone, Debug)]
struct IdentityRecord {
    ty: Arc<str>,
    id: Option<Arc<str>>,
    lid: LocalId,
}

impl IdentityRecord {
    fn snapshot(&self) -> ResourceIdentity {
        ResourceIdentity {
            ty: Arc::clone(&self.ty),
            id: self.id.clone(),
            lid: self.lid.clone(),
        }
    }
}

#[derive(Default)]
struct RegistryMetrics {
    lookups: AtomicU64,
    lid_hits: AtomicU64,
    key_hits: AtomicU64,
    allocations: AtomicU64,
    merges: AtomicU64,
}

/// Point-in-time copy of the registry counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryMetricsSnapshot {
    /// Calls to `get_or_create`.
    pub lookups: u64,
    /// Lookups answered by local id.
    pub lid_hits: u64,
    /// Lookups answered by `(type, id)`.
    pub key_hits: u64,
    /// Identities allocated.
    pub allocations: u64,
    /// Merges performed.
    pub merges: u64,
}

impl RegistryMetricsSnapshot {
    /// Fraction of lookups that found an existing identity.
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        (self.lid_hits + self.key_hits) as f64 / self.lookups as f64
    }
}

impl RegistryMetrics {
    fn snapshot(&self) -> RegistryMetricsSnapshot {
        RegistryMetricsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            lid_hits: self.lid_hits.load(Ordering::Relaxed),
            key_hits: self.key_hits.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Assigns and stabilizes resource identities.
///
/// Every resource ever referenced gets exactly one live identity per
/// `(type, id)`. Local ids are allocated from a monotonic counter and are
/// never handed out twice. Merged-away local ids stay resolvable as aliases of
/// the identity they were merged into.
pub struct IdentifierRegistry {
    by_lid: FxHashMap<LocalId, IdentityRecord>,
    by_key: FxHashMap<Arc<str>, FxHashMap<Arc<str>, LocalId>>,
    aliases: FxHashMap<LocalId, LocalId>,
    lid_prefix: String,
    next_lid: u64,
    metrics: RegistryMetrics,
}

impl Default for IdentifierRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LID_PREFIX)
    }
}

impl IdentifierRegistry {
    /// Creates an empty registry whose generated local ids start with `lid_prefix`.
    pub fn new(lid_prefix: impl Into<String>) -> Self {
        Self {
            by_lid: FxHashMap::default(),
            by_key: FxHashMap::default(),
            aliases: FxHashMap::default(),
            lid_prefix: lid_prefix.into(),
            next_lid: 1,
            metrics: RegistryMetrics::default(),
        }
    }

    /// Number of live identities.
    pub fn len(&self) -> usize {
        self.by_lid.len()
    }

    /// Returns `true` when no identity is registered.
    pub fn is_empty(&self) -> bool {
        self.by_lid.is_empty()
    }

    /// Returns the counters collected so far.
    pub fn metrics(&self) -> RegistryMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Returns the existing identity for `reference`, allocating one if needed.
    ///
    /// Resolution order is local id, then `(type, id)`. A miss allocates a new
    /// identity that keeps the supplied local id when one was given.
    pub fn get_or_create(&mut self, reference: &IdentifierRef) -> ResourceIdentity {
        RegistryMetrics::inc(&self.metrics.lookups);
        if let Some(lid) = reference.lid.as_deref() {
            if let Some(record) = self.record(&LocalId::new(lid)) {
                RegistryMetrics::inc(&self.metrics.lid_hits);
                return record.snapshot();
            }
        }
        if let Some(id) = reference.id.as_deref() {
            if let Some(record) = self.record_by_key(&reference.ty, id) {
                RegistryMetrics::inc(&self.metrics.key_hits);
                return record.snapshot();
            }
        }
        let lid = match reference.lid.as_deref() {
            Some(lid) => LocalId::new(lid),
            None => self.generate_lid(&reference.ty),
        };
        self.insert(&reference.ty, reference.id.as_deref(), lid)
    }

    /// Looks up an identity without allocating.
    pub fn peek(&self, reference: &IdentifierRef) -> Option<ResourceIdentity> {
        if let Some(lid) = reference.lid.as_deref() {
            if let Some(record) = self.record(&LocalId::new(lid)) {
                return Some(record.snapshot());
            }
        }
        let id = reference.id.as_deref()?;
        self.record_by_key(&reference.ty, id)
            .map(IdentityRecord::snapshot)
    }

    /// Resolves a local id, following merge aliases.
    pub fn resolve(&self, lid: &LocalId) -> Option<ResourceIdentity> {
        self.record(lid).map(IdentityRecord::snapshot)
    }

    /// Resolves the identity owning `(ty, id)`.
    pub fn lookup(&self, ty: &str, id: &str) -> Option<ResourceIdentity> {
        self.record_by_key(ty, id).map(IdentityRecord::snapshot)
    }

    /// Returns the live local id `lid` refers to, following merge aliases.
    pub fn canonical(&self, lid: &LocalId) -> Option<LocalId> {
        self.record(lid).map(|record| record.lid.clone())
    }

    /// Allocates an identity for a client-created resource that has no server id yet.
    pub fn create_for_new_resource(&mut self, ty: &str) -> ResourceIdentity {
        let lid = self.generate_lid(ty);
        self.insert(ty, None, lid)
    }

    /// Transitions the identity's server id from absent to `id`.
    ///
    /// Re-assigning the same id is a no-op. Assigning a different id to an
    /// identity that already has one fails with [`CacheError::IdMismatch`]; an
    /// id owned by another live identity fails with
    /// [`CacheError::IdentityCollision`] and must be resolved with
    /// [`IdentifierRegistry::merge`].
    pub fn assign_id(&mut self, lid: &LocalId, id: &str) -> Result<ResourceIdentity> {
        let canonical = self
            .canonical(lid)
            .ok_or_else(|| CacheError::UnknownIdentity(lid.clone()))?;
        let (ty, current) = {
            let record = &self.by_lid[&canonical];
            (Arc::clone(&record.ty), record.id.clone())
        };
        if let Some(current) = current {
            if current.as_ref() == id {
                return Ok(self.by_lid[&canonical].snapshot());
            }
            return Err(CacheError::IdMismatch {
                lid: canonical,
                current: current.to_string(),
                requested: id.to_string(),
            });
        }
        if let Some(owner) = self.by_key.get(&ty).and_then(|ids| ids.get(id)) {
            return Err(CacheError::IdentityCollision {
                ty: ty.to_string(),
                id: id.to_string(),
                existing: owner.clone(),
                incoming: canonical,
            });
        }
        let id: Arc<str> = Arc::from(id);
        self.by_key
            .entry(Arc::clone(&ty))
            .or_default()
            .insert(Arc::clone(&id), canonical.clone());
        let record = self
            .by_lid
            .get_mut(&canonical)
            .ok_or_else(|| CacheError::UnknownIdentity(canonical.clone()))?;
        record.id = Some(id);
        debug!(identity = %record.snapshot(), "identity.assign_id");
        Ok(record.snapshot())
    }

    /// Folds `stale` into `kept` and returns the surviving identity.
    ///
    /// The kept identity inherits the stale server id when it has none. The
    /// stale local id stays resolvable as an alias of `kept`. Identities of
    /// different types, or carrying two different server ids, cannot be merged.
    pub fn merge(&mut self, stale: &LocalId, kept: &LocalId) -> Result<ResourceIdentity> {
        let stale_lid = self
            .canonical(stale)
            .ok_or_else(|| CacheError::UnknownIdentity(stale.clone()))?;
        let kept_lid = self
            .canonical(kept)
            .ok_or_else(|| CacheError::UnknownIdentity(kept.clone()))?;
        if stale_lid == kept_lid {
            return Ok(self.by_lid[&kept_lid].snapshot());
        }
        let stale_record = self.by_lid[&stale_lid].clone();
        let kept_record = self.by_lid[&kept_lid].clone();
        if stale_record.ty != kept_record.ty {
            return Err(CacheError::IrreconcilableMerge {
                stale: stale_lid,
                kept: kept_lid,
                reason: "identities have different types",
            });
        }
        if let (Some(a), Some(b)) = (&stale_record.id, &kept_record.id) {
            if a != b {
                return Err(CacheError::IrreconcilableMerge {
                    stale: stale_lid,
                    kept: kept_lid,
                    reason: "identities carry different server ids",
                });
            }
        }

        self.by_lid.remove(&stale_lid);
        if let Some(id) = &stale_record.id {
            if let Some(ids) = self.by_key.get_mut(&stale_record.ty) {
                if ids.get(id) == Some(&stale_lid) {
                    ids.remove(id);
                }
            }
        }
        let surviving_id = kept_record.id.or(stale_record.id);
        if let Some(id) = &surviving_id {
            self.by_key
                .entry(Arc::clone(&kept_record.ty))
                .or_default()
                .insert(Arc::clone(id), kept_lid.clone());
        }
        for target in self.aliases.values_mut() {
            if *target == stale_lid {
                *target = kept_lid.clone();
            }
        }
        self.aliases.insert(stale_lid.clone(), kept_lid.clone());

        let record = self
            .by_lid
            .get_mut(&kept_lid)
            .ok_or_else(|| CacheError::UnknownIdentity(kept_lid.clone()))?;
        record.id = surviving_id;
        RegistryMetrics::inc(&self.metrics.merges);
        debug!(stale = %stale_lid, kept = %record.snapshot(), "identity.merge");
        Ok(record.snapshot())
    }

    /// Drops all bookkeeping for `lid`. The local id is never reallocated.
    pub fn forget(&mut self, lid: &LocalId) -> Option<ResourceIdentity> {
        let canonical = self.canonical(lid)?;
        let record = self.by_lid.remove(&canonical)?;
        if let Some(id) = &record.id {
            if let Some(ids) = self.by_key.get_mut(&record.ty) {
                if ids.get(id) == Some(&canonical) {
                    ids.remove(id);
                }
                if ids.is_empty() {
                    self.by_key.remove(&record.ty);
                }
            }
        }
        self.aliases.retain(|_, target| *target != canonical);
        trace!(identity = %record.snapshot(), "identity.forget");
        Some(record.snapshot())
    }

    /// Drops every identity and alias. The local id counter keeps running.
    pub fn clear(&mut self) {
        self.by_lid.clear();
        self.by_key.clear();
        self.aliases.clear();
    }

    /// Iterates all live identities of `ty` in no particular order.
    pub fn identities_of_type<'a>(
        &'a self,
        ty: &'a str,
    ) -> impl Iterator<Item = ResourceIdentity> + 'a {
        self.by_lid
            .values()
            .filter(move |record| record.ty.as_ref() == ty)
            .map(IdentityRecord::snapshot)
    }

    fn record(&self, lid: &LocalId) -> Option<&IdentityRecord> {
        if let Some(record) = self.by_lid.get(lid) {
            return Some(record);
        }
        self.aliases
            .get(lid)
            .and_then(|target| self.by_lid.get(target))
    }

    fn record_by_key(&self, ty: &str, id: &str) -> Option<&IdentityRecord> {
        self.by_key
            .get(ty)
            .and_then(|ids| ids.get(id))
            .and_then(|lid| self.by_lid.get(lid))
    }

    fn generate_lid(&mut self, ty: &str) -> LocalId {
        loop {
            let candidate = LocalId::new(format!("{}{}-{}", self.lid_prefix, ty, self.next_lid));
            self.next_lid += 1;
            if !self.by_lid.contains_key(&candidate) && !self.aliases.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn insert(&mut self, ty: &str, id: Option<&str>, lid: LocalId) -> ResourceIdentity {
        let ty: Arc<str> = Arc::from(ty);
        let id: Option<Arc<str>> = id.map(Arc::from);
        if let Some(id) = &id {
            self.by_key
                .entry(Arc::clone(&ty))
                .or_default()
                .insert(Arc::clone(id), lid.clone());
        }
        let record = IdentityRecord { ty, id, lid };
        let snapshot = record.snapshot();
        self.by_lid.insert(record.lid.clone(), record);
        RegistryMetrics::inc(&self.metrics.allocations);
        trace!(identity = %snapshot, "identity.allocate");
        snapshot
    }
}
