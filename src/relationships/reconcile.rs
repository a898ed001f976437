use tracing::{debug, trace, warn};

use super::{EdgeChange, PairId, PendingEdgeWrite, RelationshipData, RelationshipPayload, RelationshipPayloadStore};
use crate::schema::{Polymorphism, Side};
use crate::types::ResourceRef;

/// Whether two data values name the same single resource.
fn data_matches(next: Option<&RelationshipData>, previous: Option<&RelationshipData>) -> bool {
    match (next, previous) {
        (Some(RelationshipData::One(a)), Some(RelationshipData::One(b))) => a == b,
        _ => false,
    }
}

/// Removes `member` from `entry`; returns `true` if anything changed.
fn remove_member(entry: &mut RelationshipPayload, member: &ResourceRef) -> bool {
    let mut changed = false;
    let mut clear_single = false;
    match &mut entry.data {
        Some(RelationshipData::Many(list)) => {
            let before = list.len();
            list.retain(|m| m != member);
            changed |= list.len() != before;
        }
        Some(RelationshipData::One(current)) => clear_single = current == member,
        _ => {}
    }
    if clear_single {
        entry.data = Some(RelationshipData::Empty);
        changed = true;
    }
    if let Some(partial) = &mut entry.partial_data {
        let before = partial.len();
        partial.retain(|m| m != member);
        changed |= partial.len() != before;
    }
    changed
}

/// Appends `member` to a collection view; returns `true` if anything changed.
fn append_member(entry: &mut RelationshipPayload, member: &ResourceRef) -> bool {
    match entry.data.take() {
        Some(RelationshipData::Many(mut list)) => {
            let added = !list.contains(member);
            if added {
                list.push(member.clone());
            }
            entry.data = Some(RelationshipData::Many(list));
            added
        }
        Some(other) => {
            let mut list = other.refs().to_vec();
            let added = !list.contains(member);
            if added {
                list.push(member.clone());
            }
            entry.data = Some(RelationshipData::Many(list));
            added
        }
        None => {
            let partial = entry.partial_data.get_or_insert_with(Vec::new);
            if partial.contains(member) {
                false
            } else {
                partial.push(member.clone());
                true
            }
        }
    }
}

fn rewrite_list(list: &mut Vec<ResourceRef>, stale: &ResourceRef, kept: &ResourceRef) -> bool {
    if !list.contains(stale) {
        return false;
    }
    let mut seen = Vec::with_capacity(list.len());
    for member in list.drain(..) {
        let member = if member == *stale { kept.clone() } else { member };
        if !seen.contains(&member) {
            seen.push(member);
        }
    }
    *list = seen;
    true
}

/// Rewrites every reference to `stale` into `kept`; returns `true` if anything changed.
fn rewrite_refs(entry: &mut RelationshipPayload, stale: &ResourceRef, kept: &ResourceRef) -> bool {
    let mut changed = false;
    match &mut entry.data {
        Some(RelationshipData::One(current)) if current == stale => {
            *current = kept.clone();
            changed = true;
        }
        Some(RelationshipData::Many(list)) => changed |= rewrite_list(list, stale, kept),
        _ => {}
    }
    if let Some(partial) = &mut entry.partial_data {
        changed |= rewrite_list(partial, stale, kept);
    }
    changed
}

/// Fills the undefined members of `kept` from `stale`.
fn fold_payload(kept: &mut RelationshipPayload, stale: RelationshipPayload) {
    if kept.data.is_none() {
        if let Some(data) = stale.data {
            // inferred members of `kept` survive when the canonical data is a list
            kept.data = Some(match (data, kept.partial_data.take()) {
                (RelationshipData::Many(mut list), Some(partial)) => {
                    for member in partial {
                        if !list.contains(&member) {
                            list.push(member);
                        }
                    }
                    RelationshipData::Many(list)
                }
                (data, _) => data,
            });
        } else if let Some(stale_partial) = stale.partial_data {
            let partial = kept.partial_data.get_or_insert_with(Vec::new);
            for member in stale_partial {
                if !partial.contains(&member) {
                    partial.push(member);
                }
            }
        }
    }
    if kept.meta.is_none() {
        kept.meta = stale.meta;
    }
    if kept.links.is_none() {
        kept.links = stale.links;
    }
}

impl RelationshipPayloadStore {
    /// Applies every pending write in arrival order.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let writes = std::mem::take(&mut self.pending);
        let applied = writes.len();
        for write in writes {
            self.apply(write);
        }
        self.metrics.flushed(applied);
        debug!(applied, changes = self.changes.len(), "relationship.flush");
    }

    fn apply(&mut self, write: PendingEdgeWrite) {
        let PendingEdgeWrite {
            ty,
            id,
            name,
            mut payload,
            target: (pair, side),
        } = write;
        let me = ResourceRef::new(ty, id);
        let previous = self.pairs[pair.0]
            .view(side)
            .get(&me)
            .cloned()
            .unwrap_or_default();
        let replace = payload.data.is_some()
            && !data_matches(payload.data.as_ref(), previous.data.as_ref());
        let inverse = self.pairs[pair.0].info.inverse_side(side);
        trace!(resource = %me, name = %name, replace, "relationship.apply");

        if let (true, Some(inverse)) = (replace, inverse) {
            let next = payload.data.as_ref();
            for target in previous.members() {
                if next.is_some_and(|data| data.contains(target)) {
                    continue;
                }
                self.remove_inverse(pair, inverse, target, &me);
            }
        }

        if payload.data.is_none() {
            payload.data = previous.data.clone();
            if payload.data.is_none() {
                payload.partial_data = previous.partial_data.clone();
            }
        } else {
            payload.partial_data = None;
        }
        if payload.meta.is_none() {
            payload.meta = previous.meta.clone();
        }
        if payload.links.is_none() {
            payload.links = previous.links.clone();
        }

        let targets: Vec<ResourceRef> = match (replace, &payload.data) {
            (true, Some(data)) => data.refs().to_vec(),
            _ => Vec::new(),
        };
        if payload != previous {
            self.changes.insert(EdgeChange {
                resource: me.clone(),
                relationship: name,
            });
        }
        self.pairs[pair.0].view_mut(side).insert(me.clone(), payload);

        if let Some(inverse) = inverse {
            for target in &targets {
                self.insert_inverse(pair, inverse, target, &me, side);
            }
        }
    }

    fn remove_inverse(&mut self, pair: PairId, side: Side, target: &ResourceRef, me: &ResourceRef) {
        let store = &mut self.pairs[pair.0];
        if store.info.is_reflexive() && target == me {
            trace!(resource = %me, "relationship.self_edge.skip_remove");
            return;
        }
        let name = store.info.side(side).name.clone();
        let Some(entry) = store.view_mut(side).get_mut(target) else {
            return;
        };
        if remove_member(entry, me) {
            self.changes.insert(EdgeChange {
                resource: target.clone(),
                relationship: name,
            });
        }
    }

    fn insert_inverse(
        &mut self,
        pair: PairId,
        side: Side,
        target: &ResourceRef,
        me: &ResourceRef,
        origin: Side,
    ) {
        if self.pairs[pair.0].info.is_reflexive() && target == me {
            trace!(resource = %me, "relationship.self_edge.skip_insert");
            return;
        }
        if side == Side::Rhs {
            self.adopt_participant(pair, &target.ty);
        }
        let store = &mut self.pairs[pair.0];
        let info = store.info.side(side);
        let name = info.name.clone();
        let collection = info.is_collection();
        let entry = store.view_mut(side).entry(target.clone()).or_default();

        if collection {
            if append_member(entry, me) {
                self.changes.insert(EdgeChange {
                    resource: target.clone(),
                    relationship: name,
                });
            }
            return;
        }

        let displaced = match &entry.data {
            Some(RelationshipData::One(current)) if current != me => Some(current.clone()),
            _ => None,
        };
        let already = matches!(&entry.data, Some(RelationshipData::One(current)) if current == me);
        entry.data = Some(RelationshipData::One(me.clone()));
        entry.partial_data = None;
        if !already {
            self.changes.insert(EdgeChange {
                resource: target.clone(),
                relationship: name,
            });
        }

        if let Some(other) = displaced {
            warn!(
                resource = %target,
                previous = %other,
                claimed_by = %me,
                repair = self.repair_mismatches,
                "relationship.inverse_mismatch"
            );
            self.metrics.inverse_repaired();
            if self.repair_mismatches {
                self.remove_inverse(pair, origin, &other, target);
            }
        }
    }

    fn adopt_participant(&mut self, pair: PairId, ty: &str) {
        let store = &mut self.pairs[pair.0];
        if !store.info.adopt_concrete(ty) {
            return;
        }
        let Polymorphism::Polymorphic { base, .. } = &store.info.polymorphism else {
            return;
        };
        let base = base.clone();
        let name = store.info.side(Side::Rhs).name.clone();
        if !self.schema.is_subtype(ty, &base) {
            warn!(ty, base = %base, name = %name, "relationship.polymorphic.unexpected_type");
        }
        self.keys.entry((ty.to_string(), name)).or_insert((pair, Side::Rhs));
        debug!(ty, base = %base, "relationship.pair.adopt");
    }

    /// Flushes, then rewrites every reference to `stale` into `kept`.
    ///
    /// Views owned by `stale` move to `kept`; where `kept` already has a view,
    /// its defined members win and undefined ones are filled from the stale view.
    /// Returns the number of views rewritten.
    pub fn merge_resource(&mut self, stale: &ResourceRef, kept: &ResourceRef) -> usize {
        if stale == kept {
            return 0;
        }
        self.flush();
        let mut rewritten = 0usize;
        for store in &mut self.pairs {
            let sides: &[Side] = if store.info.is_reflexive() || store.info.rhs.is_none() {
                &[Side::Lhs]
            } else {
                &[Side::Lhs, Side::Rhs]
            };
            for &side in sides {
                let name = store.info.side(side).name.clone();
                let view = store.view_mut(side);
                if let Some(stale_entry) = view.remove(stale) {
                    match view.get_mut(kept) {
                        Some(kept_entry) => fold_payload(kept_entry, stale_entry),
                        None => {
                            view.insert(kept.clone(), stale_entry);
                        }
                    }
                    rewritten += 1;
                    self.changes.insert(EdgeChange {
                        resource: kept.clone(),
                        relationship: name.clone(),
                    });
                }
                for (owner, entry) in view.iter_mut() {
                    if rewrite_refs(entry, stale, kept) {
                        rewritten += 1;
                        self.changes.insert(EdgeChange {
                            resource: owner.clone(),
                            relationship: name.clone(),
                        });
                    }
                }
            }
        }
        debug!(stale = %stale, kept = %kept, rewritten, "relationship.merge");
        rewritten
    }
}
