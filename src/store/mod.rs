#![forbid(unsafe_code)]

//! The cache store: one owner for the identity registry, the relationship
//! payload store, the record-array tracker and the notification hub.
//!
//! Every operation goes through `&mut Store`; nothing is shared between
//! stores. Relationship writes are reconciled lazily on the next read, and
//! array syncs and notification dispatch are handed to the injected
//! [`Scheduler`].

mod ingest;
mod options;


use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::arrays::{
    ArrayDelta, ArrayId, ArrayListenerToken, ArrayMembershipTracker, ManagedArrayConfig,
};
use crate::identity::IdentifierRegistry;
use crate::metrics::{default_metrics, CacheMetrics};
use crate::notify::{Namespace, NotificationBuffer, NotificationHub, SubscriptionToken};
use crate::relationships::{RelationshipData, RelationshipPayload, RelationshipPayloadStore};
use crate::scheduler::{Dispatch, ImmediateScheduler, Job, Scheduler};
use crate::schema::SchemaService;
use crate::types::{CacheError, IdentifierRef, LocalId, ResourceIdentity, ResourceRef, Result};

pub use options::StoreOptions;

/// Normalized resource cache.
pub struct Store {
    registry: IdentifierRegistry,
    payloads: RelationshipPayloadStore,
    arrays: ArrayMembershipTracker,
    hub: NotificationHub,
    buffer: NotificationBuffer,
    scheduler: Box<dyn Scheduler>,
    coalesce: bool,
    metrics: Arc<dyn CacheMetrics>,
}

impl Store {
    /// Creates a store that runs deferred work immediately.
    pub fn new(schema: Arc<dyn SchemaService>, options: StoreOptions) -> Self {
        Self::with_scheduler(schema, options, Box::new(ImmediateScheduler))
    }

    /// Creates a store deferring array syncs and notification dispatch to `scheduler`.
    pub fn with_scheduler(
        schema: Arc<dyn SchemaService>,
        options: StoreOptions,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        let mut payloads = RelationshipPayloadStore::new(schema, Arc::clone(&metrics));
        payloads.set_repair_mismatches(options.repair_inverse_mismatches);
        Self {
            registry: IdentifierRegistry::new(options.lid_prefix.clone()),
            payloads,
            arrays: ArrayMembershipTracker::new(options.append_chunk_size, Arc::clone(&metrics)),
            hub: NotificationHub::new(Arc::clone(&metrics)),
            buffer: NotificationBuffer::new(),
            scheduler,
            coalesce: options.coalesce_notifications,
            metrics,
        }
    }

    /// The identity registry.
    pub fn registry(&self) -> &IdentifierRegistry {
        &self.registry
    }

    /// The record-array tracker, without syncing.
    pub fn arrays(&self) -> &ArrayMembershipTracker {
        &self.arrays
    }

    /// Returns the identity for `reference`, allocating one on first sight.
    pub fn identifier(&mut self, reference: &IdentifierRef) -> ResourceIdentity {
        self.registry.get_or_create(reference)
    }

    /// Looks up an identity without allocating.
    pub fn peek_identifier(&self, reference: &IdentifierRef) -> Option<ResourceIdentity> {
        self.registry.peek(reference)
    }

    /// Resolves a local id, following merge aliases.
    pub fn resolve(&self, lid: &LocalId) -> Option<ResourceIdentity> {
        self.registry.resolve(lid)
    }

    /// Allocates an identity for a client-created resource.
    pub fn create_record_identity(&mut self, ty: &str) -> ResourceIdentity {
        self.registry.create_for_new_resource(ty)
    }

    /// Gives an unsaved identity its server id.
    ///
    /// Relationship entries keyed by the local id are re-keyed under the new
    /// id. A collision with another live identity fails with
    /// [`CacheError::IdentityCollision`]; resolve it with [`Store::merge`].
    pub fn assign_id(&mut self, lid: &LocalId, id: &str) -> Result<ResourceIdentity> {
        let before = self
            .registry
            .resolve(lid)
            .ok_or_else(|| CacheError::UnknownIdentity(lid.clone()))?;
        let after = self.registry.assign_id(lid, id)?;
        if before.key() != after.key() {
            self.payloads.merge_resource(&before.key(), &after.key());
            self.emit(&after, Namespace::Identity, None)?;
            self.dispatch_edge_changes()?;
        }
        Ok(after)
    }

    /// Folds `stale` into `kept` everywhere and returns the surviving identity.
    ///
    /// Relationship payloads, array memberships and pending array changes of
    /// `stale` are rewritten to `kept`. Subscribers of `stale` receive one
    /// final identity notification and are then dropped.
    pub fn merge(&mut self, stale: &LocalId, kept: &LocalId) -> Result<ResourceIdentity> {
        let stale_before = self
            .registry
            .resolve(stale)
            .ok_or_else(|| CacheError::UnknownIdentity(stale.clone()))?;
        let kept_before = self
            .registry
            .resolve(kept)
            .ok_or_else(|| CacheError::UnknownIdentity(kept.clone()))?;
        if stale_before.lid == kept_before.lid {
            return Ok(kept_before);
        }
        self.payloads.flush();
        let kept_after = self.registry.merge(&stale_before.lid, &kept_before.lid)?;

        let target = kept_after.key();
        let mut rewritten = self.payloads.merge_resource(&stale_before.key(), &target);
        if kept_before.key() != target {
            rewritten += self.payloads.merge_resource(&kept_before.key(), &target);
        }
        self.arrays.merge(&stale_before, &kept_after.lid);

        self.hub.notify(&stale_before, Namespace::Identity, None)?;
        self.hub.drop_identity(&stale_before.lid);
        self.buffer.discard(&stale_before.lid);
        self.metrics.identity_merged();
        debug!(stale = %stale_before, kept = %kept_after, rewritten, "store.merge");

        self.emit(&kept_after, Namespace::Identity, None)?;
        self.dispatch_edge_changes()?;
        self.request(Job::SyncArrays)?;
        Ok(kept_after)
    }

    /// Enqueues a relationship payload for `ty:id.name`.
    ///
    /// The owner and every referenced resource get an identity; references are
    /// normalized to the canonical key of their identity.
    pub fn push(
        &mut self,
        ty: &str,
        id: &str,
        name: &str,
        mut payload: RelationshipPayload,
    ) -> Result<()> {
        self.payloads.pair_info(ty, name)?;
        let owner = self.identify(&ResourceRef::new(ty, id)).key();
        payload.data = match payload.data.take() {
            Some(RelationshipData::One(target)) => {
                Some(RelationshipData::One(self.identify(&target).key()))
            }
            Some(RelationshipData::Many(targets)) => Some(RelationshipData::Many(
                targets
                    .iter()
                    .map(|target| self.identify(target).key())
                    .collect(),
            )),
            other => other,
        };
        self.payloads.push(&owner.ty, &owner.id, name, payload)
    }

    /// Flushes pending writes and returns the view of `ty:id.name`.
    pub fn get(&mut self, ty: &str, id: &str, name: &str) -> Result<RelationshipPayload> {
        let key = self.canonical_ref(&ResourceRef::new(ty, id));
        let payload = self.payloads.get(&key.ty, &key.id, name)?;
        self.dispatch_edge_changes()?;
        Ok(payload)
    }

    /// Flushes pending writes and drops the view of `ty:id.name`.
    pub fn unload_relationship(
        &mut self,
        ty: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<RelationshipPayload>> {
        let key = self.canonical_ref(&ResourceRef::new(ty, id));
        let removed = self.payloads.unload(&key.ty, &key.id, name)?;
        self.dispatch_edge_changes()?;
        Ok(removed)
    }

    /// Applies every pending relationship write and queues the resulting
    /// relationship notifications.
    pub fn flush(&mut self) -> Result<()> {
        self.payloads.flush();
        self.dispatch_edge_changes()
    }

    /// Number of relationship writes waiting for the next flush.
    pub fn pending_writes(&self) -> usize {
        self.payloads.pending_len()
    }

    /// Returns the live array of `ty`, creating it on first use.
    pub fn live_array_for(&mut self, ty: &str) -> Result<ArrayId> {
        let id = self.arrays.live_array_for(ty);
        if self.arrays.has_pending() {
            self.request(Job::SyncArrays)?;
        }
        Ok(id)
    }

    /// Creates a managed array holding a query result.
    pub fn create_managed_array(&mut self, config: ManagedArrayConfig) -> ArrayId {
        self.arrays.create_managed_array(config)
    }

    /// Replaces the membership of a managed array with `identities`.
    pub fn populate(
        &mut self,
        id: ArrayId,
        identities: &[ResourceIdentity],
        meta: Option<Value>,
    ) -> Result<ArrayDelta> {
        let lids = identities
            .iter()
            .map(|identity| self.canonical_lid(&identity.lid))
            .collect();
        self.arrays.populate(id, lids, meta)
    }

    /// Syncs `id` and returns its members.
    pub fn array_members(&mut self, id: ArrayId) -> Result<Vec<ResourceIdentity>> {
        let lids = self.arrays.members(id)?.to_vec();
        Ok(lids
            .iter()
            .filter_map(|lid| self.registry.resolve(lid))
            .collect())
    }

    /// Marks a reload of `id` as in flight.
    pub fn set_array_updating(&mut self, id: ArrayId, updating: bool) -> Result<()> {
        self.arrays.set_updating(id, updating)
    }

    /// Registers a listener for membership changes of `id`.
    pub fn subscribe_array(
        &mut self,
        id: ArrayId,
        listener: impl FnMut(ArrayId, &ArrayDelta) + 'static,
    ) -> Result<ArrayListenerToken> {
        self.arrays.subscribe_array(id, listener)
    }

    /// Removes an array listener.
    pub fn unsubscribe_array(&mut self, token: ArrayListenerToken) -> bool {
        self.arrays.unsubscribe_array(token)
    }

    /// Destroys an array.
    pub fn destroy_array(&mut self, id: ArrayId) -> bool {
        self.arrays.destroy_array(id)
    }

    /// Records that the resource behind `lid` was loaded or unloaded.
    ///
    /// Live arrays pick the change up on the next sync.
    pub fn set_loaded(&mut self, lid: &LocalId, loaded: bool) -> Result<()> {
        let identity = self
            .registry
            .resolve(lid)
            .ok_or_else(|| CacheError::UnknownIdentity(lid.clone()))?;
        self.arrays.identifier_changed(&identity, loaded);
        if self.arrays.has_pending() {
            self.request(Job::SyncArrays)?;
        }
        Ok(())
    }

    /// Subscribes to changes of the resource behind `lid`.
    pub fn subscribe(
        &mut self,
        lid: &LocalId,
        callback: impl FnMut(&ResourceIdentity, Namespace, Option<&str>) + 'static,
    ) -> SubscriptionToken {
        let lid = self.canonical_lid(lid);
        self.hub.subscribe(&lid, callback)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        self.hub.unsubscribe(token)
    }

    /// Notifies subscribers of `lid` synchronously.
    ///
    /// Returns `Ok(false)` for unknown identities and identities nobody
    /// subscribed to.
    pub fn notify(&mut self, lid: &LocalId, namespace: Namespace, key: Option<&str>) -> Result<bool> {
        namespace.check_key(key)?;
        match self.registry.resolve(lid) {
            Some(identity) => self.hub.notify(&identity, namespace, key),
            None => {
                trace!(lid = %lid, "notify.unknown_identity");
                Ok(false)
            }
        }
    }

    /// Runs every job the scheduler deferred during this turn.
    ///
    /// Returns the number of jobs run.
    pub fn end_turn(&mut self) -> Result<usize> {
        let mut ran = 0usize;
        loop {
            let jobs = self.scheduler.drain();
            if jobs.is_empty() {
                break;
            }
            for job in jobs {
                self.run(job)?;
                ran += 1;
            }
        }
        Ok(ran)
    }

    /// Unloads one resource: its relationship views, array memberships,
    /// queued notifications, subscriptions and identity.
    pub fn unload_record(&mut self, lid: &LocalId) -> Result<ResourceIdentity> {
        let identity = self
            .registry
            .resolve(lid)
            .ok_or_else(|| CacheError::UnknownIdentity(lid.clone()))?;
        self.payloads.flush();
        self.dispatch_edge_changes()?;
        let views = self.payloads.unload_resource(&identity.key());
        let arrays = self.arrays.forget(&identity);
        self.buffer.discard(&identity.lid);
        self.hub.notify(&identity, Namespace::State, None)?;
        self.hub.drop_identity(&identity.lid);
        self.registry.forget(&identity.lid);
        debug!(identity = %identity, views, arrays, "store.unload_record");
        Ok(identity)
    }

    /// Unloads every resource of `ty` and destroys its live array.
    pub fn unload_all(&mut self, ty: &str) -> Result<usize> {
        let identities: Vec<ResourceIdentity> = self.registry.identities_of_type(ty).collect();
        for identity in &identities {
            self.unload_record(&identity.lid)?;
        }
        self.arrays.clear_type(ty);
        debug!(ty, unloaded = identities.len(), "store.unload_all");
        Ok(identities.len())
    }

    /// Drops all cached state. Local ids handed out before are never reused.
    pub fn teardown(&mut self) {
        self.payloads.clear();
        self.arrays.teardown();
        self.hub.clear();
        self.buffer.drain();
        self.scheduler.drain();
        self.registry.clear();
        debug!("store.teardown");
    }

    fn resolve_ref(&self, reference: &ResourceRef) -> Option<ResourceIdentity> {
        self.registry
            .lookup(&reference.ty, &reference.id)
            .or_else(|| {
                self.registry
                    .resolve(&LocalId::new(&reference.id))
                    .filter(|identity| identity.ty.as_ref() == reference.ty)
            })
    }

    fn identify(&mut self, reference: &ResourceRef) -> ResourceIdentity {
        match self.resolve_ref(reference) {
            Some(identity) => identity,
            None => self
                .registry
                .get_or_create(&IdentifierRef::new(&reference.ty, &reference.id)),
        }
    }

    fn canonical_ref(&self, reference: &ResourceRef) -> ResourceRef {
        self.resolve_ref(reference)
            .map(|identity| identity.key())
            .unwrap_or_else(|| reference.clone())
    }

    fn canonical_lid(&self, lid: &LocalId) -> LocalId {
        self.registry.canonical(lid).unwrap_or_else(|| lid.clone())
    }

    fn dispatch_edge_changes(&mut self) -> Result<()> {
        for change in self.payloads.take_changes() {
            match self.resolve_ref(&change.resource) {
                Some(identity) => {
                    self.emit(&identity, Namespace::Relationships, Some(&change.relationship))?
                }
                None => trace!(resource = %change.resource, "store.change.unknown_identity"),
            }
        }
        Ok(())
    }

    fn emit(&mut self, identity: &ResourceIdentity, namespace: Namespace, key: Option<&str>) -> Result<()> {
        if !self.coalesce {
            self.hub.notify(identity, namespace, key)?;
            return Ok(());
        }
        if self.buffer.enqueue(identity, namespace, key)? {
            self.request(Job::DispatchNotifications)?;
        }
        Ok(())
    }

    fn request(&mut self, job: Job) -> Result<()> {
        match self.scheduler.schedule(job) {
            Dispatch::Now => self.run(job),
            Dispatch::Deferred => Ok(()),
        }
    }

    fn run(&mut self, job: Job) -> Result<()> {
        match job {
            Job::SyncArrays => {
                let changed = self.arrays.sync_all();
                trace!(changed, "store.job.sync_arrays");
            }
            Job::DispatchNotifications => {
                let pending = self.buffer.drain();
                trace!(pending = pending.len(), "store.job.dispatch");
                for notification in pending {
                    self.hub.notify(
                        &notification.identity,
                        notification.namespace,
                        notification.key.as_deref(),
                    )?;
                }
            }
        }
        Ok(())
    }
}
