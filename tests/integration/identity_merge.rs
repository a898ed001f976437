#![allow(clippy::all)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use penumbra::{
    CacheError, IdentifierRef, LocalId, Namespace, RelationshipData, RelationshipDefinition,
    RelationshipPayload, ResourceRef, Result, StaticSchema, Store, StoreOptions,
};

fn store() -> Store {
    let schema = StaticSchema::new()
        .with(RelationshipDefinition::has_many("user", "posts", "post").inverse("author"))
        .with(RelationshipDefinition::belongs_to("post", "author", "user").inverse("posts"));
    Store::new(Arc::new(schema), StoreOptions::new())
}

#[test]
fn one_identity_per_type_and_id() {
    let mut store = store();
    let first = store.identifier(&IdentifierRef::new("user", "1"));
    let again = store.identifier(&IdentifierRef::new("user", "1"));
    let other_type = store.identifier(&IdentifierRef::new("post", "1"));
    assert_eq!(first, again);
    assert_ne!(first.lid, other_type.lid);
    assert_eq!(store.registry().len(), 2);
    assert!(store.registry().metrics().hit_rate() > 0.0);
}

#[test]
fn saving_a_draft_that_collides_routes_through_merge() -> Result<()> {
    let mut store = store();
    let draft = store.create_record_identity("user");
    let draft_key = draft.key();
    store.push(
        "post",
        "10",
        "author",
        RelationshipPayload::one(ResourceRef::new("user", draft_key.id.as_str())),
    )?;

    // the server told us about user 7 through another payload first
    let server = store.identifier(&IdentifierRef::new("user", "7"));
    store.push("post", "11", "author", RelationshipPayload::one(ResourceRef::new("user", "7")))?;

    let err = store.assign_id(&draft.lid, "7").unwrap_err();
    match err {
        CacheError::IdentityCollision { existing, incoming, .. } => {
            assert_eq!(existing, server.lid);
            assert_eq!(incoming, draft.lid);
        }
        other => panic!("expected collision, got {other}"),
    }

    let kept = store.merge(&server.lid, &draft.lid)?;
    assert_eq!(kept.lid, draft.lid);
    assert_eq!(kept.id.as_deref(), Some("7"));
    assert_eq!(store.resolve(&server.lid), Some(kept.clone()));
    assert_eq!(
        store.peek_identifier(&IdentifierRef::new("user", "7")).map(|i| i.lid),
        Some(draft.lid.clone())
    );

    // members already known to the kept identity come first
    let posts = store.get("user", "7", "posts")?;
    assert_eq!(
        posts.members(),
        &[ResourceRef::new("post", "11"), ResourceRef::new("post", "10")]
    );
    for post in ["10", "11"] {
        assert_eq!(
            store.get("post", post, "author")?.data,
            Some(RelationshipData::One(ResourceRef::new("user", "7")))
        );
    }
    Ok(())
}

#[test]
fn merged_identity_subscribers() -> Result<()> {
    let mut store = store();
    let stale = store.identifier(&IdentifierRef::new("user", "1"));
    let kept = store.create_record_identity("user");
    let log = Rc::new(RefCell::new(Vec::<(LocalId, Namespace)>::new()));
    for lid in [&stale.lid, &kept.lid] {
        let sink = Rc::clone(&log);
        store.subscribe(lid, move |identity, namespace, _| {
            sink.borrow_mut().push((identity.lid.clone(), namespace))
        });
    }

    store.merge(&stale.lid, &kept.lid)?;
    assert_eq!(
        *log.borrow(),
        vec![
            (stale.lid.clone(), Namespace::Identity),
            (kept.lid.clone(), Namespace::Identity),
        ]
    );

    // subscribing through the stale alias lands on the kept identity
    let late = Rc::new(RefCell::new(0usize));
    let counter = Rc::clone(&late);
    store.subscribe(&stale.lid, move |_, _, _| *counter.borrow_mut() += 1);
    assert!(store.notify(&kept.lid, Namespace::State, None)?);
    assert_eq!(*late.borrow(), 1);
    Ok(())
}

#[test]
fn irreconcilable_merges_are_refused() {
    let mut store = store();
    let one = store.identifier(&IdentifierRef::new("user", "1"));
    let two = store.identifier(&IdentifierRef::new("user", "2"));
    let post = store.identifier(&IdentifierRef::new("post", "1"));
    assert!(matches!(
        store.merge(&one.lid, &two.lid),
        Err(CacheError::IrreconcilableMerge { .. })
    ));
    assert!(matches!(
        store.merge(&one.lid, &post.lid),
        Err(CacheError::IrreconcilableMerge { .. })
    ));
    assert!(matches!(
        store.merge(&LocalId::new("@lid:missing-1"), &one.lid),
        Err(CacheError::UnknownIdentity(_))
    ));
    assert_eq!(store.registry().len(), 3);
}

#[test]
fn reassigning_a_different_id_is_fatal() -> Result<()> {
    let mut store = store();
    let draft = store.create_record_identity("user");
    store.assign_id(&draft.lid, "3")?;
    assert!(store.assign_id(&draft.lid, "3").is_ok());
    assert!(matches!(
        store.assign_id(&draft.lid, "4"),
        Err(CacheError::IdMismatch { .. })
    ));
    Ok(())
}

#[test]
fn forgotten_lids_are_not_reused() -> Result<()> {
    let mut store = store();
    let first = store.create_record_identity("user");
    store.unload_record(&first.lid)?;
    let second = store.create_record_identity("user");
    assert_ne!(first.lid, second.lid);
    assert!(store.resolve(&first.lid).is_none());
    Ok(())
}
