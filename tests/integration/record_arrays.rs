#![allow(clippy::all)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use penumbra::{
    ArrayDelta, CounterMetrics, IdentifierRef, ManagedArrayConfig, ResourceIdentity, Result,
    StaticSchema, Store, StoreOptions, TurnScheduler,
};
use serde_json::json;

fn turn_store(metrics: Arc<CounterMetrics>, chunk: usize) -> Store {
    Store::with_scheduler(
        Arc::new(StaticSchema::new()),
        StoreOptions::new().append_chunk_size(chunk).metrics(metrics),
        Box::new(TurnScheduler::new()),
    )
}

fn people(store: &mut Store, count: usize) -> Vec<ResourceIdentity> {
    (1..=count)
        .map(|n| store.identifier(&IdentifierRef::new("person", n.to_string())))
        .collect()
}

#[test]
fn load_then_unload_within_a_turn_is_invisible() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let mut store = turn_store(metrics.clone(), 8);
    let live = store.live_array_for("person")?;
    let deltas = Rc::new(RefCell::new(Vec::<ArrayDelta>::new()));
    let sink = Rc::clone(&deltas);
    store.subscribe_array(live, move |_, delta| sink.borrow_mut().push(delta.clone()))?;

    let person = store.identifier(&IdentifierRef::new("person", "1"));
    store.set_loaded(&person.lid, true)?;
    store.set_loaded(&person.lid, false)?;
    store.end_turn()?;

    assert!(store.array_members(live)?.is_empty());
    assert!(deltas.borrow().is_empty());
    assert_eq!(metrics.array_syncs.load(Ordering::Relaxed), 0);
    Ok(())
}

#[test]
fn syncs_are_batched_per_turn_and_keep_order() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let mut store = turn_store(metrics.clone(), 3);
    let live = store.live_array_for("person")?;
    let everyone = people(&mut store, 10);
    for person in &everyone {
        store.set_loaded(&person.lid, true)?;
    }
    assert!(store.arrays().array(live)?.is_empty());
    assert_eq!(store.arrays().array(live)?.pending().len(), 10);

    assert_eq!(store.end_turn()?, 1);
    assert_eq!(store.arrays().array(live)?.members().len(), 10);
    assert_eq!(store.array_members(live)?, everyone);
    assert_eq!(metrics.array_syncs.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.array_members_added.load(Ordering::Relaxed), 10);

    store.set_loaded(&everyone[3].lid, false)?;
    store.set_loaded(&everyone[7].lid, false)?;
    store.end_turn()?;
    let remaining = store.array_members(live)?;
    assert_eq!(remaining.len(), 8);
    assert!(!remaining.contains(&everyone[3]));
    assert_eq!(remaining[3], everyone[4]);
    Ok(())
}

#[test]
fn live_array_created_late_sees_earlier_loads() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let mut store = turn_store(metrics, 4);
    let everyone = people(&mut store, 3);
    for person in &everyone {
        store.set_loaded(&person.lid, true)?;
    }
    let live = store.live_array_for("person")?;
    assert_eq!(store.array_members(live)?, everyone);
    Ok(())
}

#[test]
fn reading_an_array_pulls_pending_changes() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let mut store = turn_store(metrics, 4);
    let live = store.live_array_for("person")?;
    let everyone = people(&mut store, 2);
    store.set_loaded(&everyone[0].lid, true)?;
    // no end_turn: the read syncs on demand
    assert_eq!(store.array_members(live)?, vec![everyone[0].clone()]);
    Ok(())
}

#[test]
fn managed_arrays_follow_unloads() -> Result<()> {
    let mut store = Store::new(Arc::new(StaticSchema::new()), StoreOptions::new());
    let everyone = people(&mut store, 3);
    let query = store.create_managed_array(
        ManagedArrayConfig::new("person")
            .query(json!({ "filter": { "name": "a*" } }))
            .identities(everyone.iter().map(|p| p.lid.clone()))
            .meta(json!({ "total": 3 })),
    );
    let arrays = store.arrays();
    assert_eq!(arrays.array(query)?.members().len(), 3);
    assert_eq!(arrays.array(query)?.meta(), Some(&json!({ "total": 3 })));

    store.unload_record(&everyone[1].lid)?;
    assert_eq!(
        store.array_members(query)?,
        vec![everyone[0].clone(), everyone[2].clone()]
    );

    store.set_loaded(&everyone[0].lid, false)?;
    assert_eq!(store.array_members(query)?, vec![everyone[2].clone()]);
    Ok(())
}

#[test]
fn populate_replaces_and_reports() -> Result<()> {
    let mut store = Store::new(Arc::new(StaticSchema::new()), StoreOptions::new());
    let everyone = people(&mut store, 4);
    let query = store.create_managed_array(
        ManagedArrayConfig::new("person")
            .identities([everyone[0].lid.clone(), everyone[1].lid.clone()]),
    );
    let seen = Rc::new(RefCell::new(Vec::<ArrayDelta>::new()));
    let sink = Rc::clone(&seen);
    let token =
        store.subscribe_array(query, move |_, delta| sink.borrow_mut().push(delta.clone()))?;

    store.set_array_updating(query, true)?;
    store.populate(query, &everyone[1..], Some(json!({ "page": 2 })))?;
    assert_eq!(store.array_members(query)?, everyone[1..].to_vec());
    {
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].removed, vec![everyone[0].lid.clone()]);
        assert_eq!(seen[0].added.len(), 2);
    }

    assert!(store.unsubscribe_array(token));
    assert!(store.destroy_array(query));
    assert!(store.array_members(query).is_err());
    Ok(())
}

#[test]
fn query_member_reloaded_within_a_turn_stays() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let mut store = turn_store(metrics, 8);
    let everyone = people(&mut store, 2);
    for person in &everyone {
        store.set_loaded(&person.lid, true)?;
    }
    let live = store.live_array_for("person")?;
    let query = store.create_managed_array(
        ManagedArrayConfig::new("person").identities(everyone.iter().map(|p| p.lid.clone())),
    );
    store.end_turn()?;

    store.set_loaded(&everyone[0].lid, false)?;
    store.set_loaded(&everyone[0].lid, true)?;
    store.end_turn()?;

    assert_eq!(store.array_members(live)?, everyone);
    assert_eq!(store.array_members(query)?, everyone);
    Ok(())
}

#[test]
fn reloading_a_member_then_unloading_it_removes_it() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let mut store = turn_store(metrics, 8);
    let live = store.live_array_for("person")?;
    let person = store.identifier(&IdentifierRef::new("person", "1"));
    store.set_loaded(&person.lid, true)?;
    store.end_turn()?;
    assert_eq!(store.array_members(live)?, vec![person.clone()]);

    store.set_loaded(&person.lid, true)?;
    store.set_loaded(&person.lid, false)?;
    store.end_turn()?;
    assert!(store.array_members(live)?.is_empty());
    Ok(())
}
