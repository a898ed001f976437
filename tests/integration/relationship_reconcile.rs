#![allow(clippy::all)]

use std::sync::{Arc, Once};

use penumbra::{
    RelationshipData, RelationshipPayload, ResourceRef, Result, StaticSchema, Store, StoreOptions,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const SCHEMA: &str = r#"
[[relationship]]
owner = "person"
name = "hobbies"
kind = "has-many"
type = "hobby"
inverse = "user"

[[relationship]]
owner = "hobby"
name = "user"
kind = "belongs-to"
type = "person"
inverse = "hobbies"

[[relationship]]
owner = "person"
name = "friends"
kind = "has-many"
type = "person"
inverse = "friends"

[[relationship]]
owner = "comment"
name = "commentable"
kind = "belongs-to"
type = "commentable"
inverse = "comments"
polymorphic = true

[[relationship]]
owner = "post"
name = "comments"
kind = "has-many"
type = "comment"
inverse = "commentable"

[[relationship]]
owner = "video"
name = "comments"
kind = "has-many"
type = "comment"
inverse = "commentable"

[abstract]
commentable = ["post", "video"]
"#;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("penumbra=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

fn store() -> Result<Store> {
    init_tracing();
    let schema = StaticSchema::from_toml_str(SCHEMA)?;
    Ok(Store::new(Arc::new(schema), StoreOptions::new()))
}

fn r(ty: &str, id: &str) -> ResourceRef {
    ResourceRef::new(ty, id)
}

#[test]
fn explicit_empty_wins_and_propagates() -> Result<()> {
    let mut store = store()?;

    store.push("person", "1", "hobbies", RelationshipPayload::many([r("hobby", "2")]))?;
    // the inverse is derived from the collection push
    assert_eq!(
        store.get("hobby", "2", "user")?.data,
        Some(RelationshipData::One(r("person", "1")))
    );

    store.push("hobby", "2", "user", RelationshipPayload::default())?;
    assert_eq!(
        store.get("hobby", "2", "user")?.data,
        Some(RelationshipData::One(r("person", "1")))
    );
    assert_eq!(store.get("person", "1", "hobbies")?.members(), &[r("hobby", "2")]);

    store.push("person", "1", "hobbies", RelationshipPayload::many([]))?;
    assert_eq!(store.get("hobby", "2", "user")?.data, Some(RelationshipData::Empty));
    assert_eq!(
        store.get("person", "1", "hobbies")?.data,
        Some(RelationshipData::Many(Vec::new()))
    );
    Ok(())
}

#[test]
fn writes_apply_in_arrival_order() -> Result<()> {
    let mut store = store()?;
    store.push("hobby", "1", "user", RelationshipPayload::one(r("person", "a")))?;
    store.push("hobby", "1", "user", RelationshipPayload::one(r("person", "b")))?;
    store.push("hobby", "1", "user", RelationshipPayload::one(r("person", "c")))?;
    assert_eq!(store.pending_writes(), 3);

    assert_eq!(
        store.get("hobby", "1", "user")?.data,
        Some(RelationshipData::One(r("person", "c")))
    );
    assert_eq!(store.pending_writes(), 0);
    assert!(store.get("person", "a", "hobbies")?.members().is_empty());
    assert!(store.get("person", "b", "hobbies")?.members().is_empty());
    assert_eq!(store.get("person", "c", "hobbies")?.members(), &[r("hobby", "1")]);
    Ok(())
}

#[test]
fn both_directions_converge() -> Result<()> {
    let mut store = store()?;
    store.push("hobby", "1", "user", RelationshipPayload::one(r("person", "1")))?;
    store.push("hobby", "2", "user", RelationshipPayload::one(r("person", "1")))?;
    let inferred = store.get("person", "1", "hobbies")?;
    assert!(!inferred.is_complete());
    assert_eq!(inferred.members(), &[r("hobby", "1"), r("hobby", "2")]);

    store.push(
        "person",
        "1",
        "hobbies",
        RelationshipPayload::many([r("hobby", "2"), r("hobby", "3")]).meta(json!({ "count": 2 })),
    )?;
    let canonical = store.get("person", "1", "hobbies")?;
    assert!(canonical.is_complete());
    assert_eq!(canonical.partial_data, None);
    assert_eq!(canonical.members(), &[r("hobby", "2"), r("hobby", "3")]);
    assert_eq!(store.get("hobby", "1", "user")?.data, Some(RelationshipData::Empty));
    assert_eq!(
        store.get("hobby", "3", "user")?.data,
        Some(RelationshipData::One(r("person", "1")))
    );

    store.push("person", "1", "hobbies", RelationshipPayload::default().meta(json!({ "page": 1 })))?;
    let merged = store.get("person", "1", "hobbies")?;
    assert_eq!(merged.members(), &[r("hobby", "2"), r("hobby", "3")]);
    assert_eq!(merged.meta, Some(json!({ "page": 1 })));
    Ok(())
}

#[test]
fn self_referential_friendship() -> Result<()> {
    let mut store = store()?;
    store.push(
        "person",
        "1",
        "friends",
        RelationshipPayload::many([r("person", "1"), r("person", "2"), r("person", "3")]),
    )?;
    assert_eq!(store.get("person", "2", "friends")?.members(), &[r("person", "1")]);
    assert_eq!(store.get("person", "3", "friends")?.members(), &[r("person", "1")]);
    assert_eq!(
        store.get("person", "1", "friends")?.members(),
        &[r("person", "1"), r("person", "2"), r("person", "3")]
    );
    Ok(())
}

#[test]
fn polymorphic_owner_reaches_each_concrete_type() -> Result<()> {
    let mut store = store()?;
    store.push("comment", "1", "commentable", RelationshipPayload::one(r("post", "1")))?;
    store.push("comment", "2", "commentable", RelationshipPayload::one(r("video", "1")))?;
    store.push("comment", "3", "commentable", RelationshipPayload::one(r("post", "1")))?;
    assert_eq!(
        store.get("post", "1", "comments")?.members(),
        &[r("comment", "1"), r("comment", "3")]
    );
    assert_eq!(store.get("video", "1", "comments")?.members(), &[r("comment", "2")]);

    store.push("comment", "1", "commentable", RelationshipPayload::one(r("video", "1")))?;
    assert_eq!(store.get("post", "1", "comments")?.members(), &[r("comment", "3")]);
    assert_eq!(
        store.get("video", "1", "comments")?.members(),
        &[r("comment", "2"), r("comment", "1")]
    );
    Ok(())
}

#[test]
fn unload_relationship_drops_one_view() -> Result<()> {
    let mut store = store()?;
    store.push("person", "1", "hobbies", RelationshipPayload::many([r("hobby", "2")]))?;
    let removed = store.unload_relationship("person", "1", "hobbies")?;
    assert!(removed.is_some());
    assert_eq!(store.get("person", "1", "hobbies")?, RelationshipPayload::default());
    assert_eq!(
        store.get("hobby", "2", "user")?.data,
        Some(RelationshipData::One(r("person", "1")))
    );
    Ok(())
}

#[test]
fn payload_json_round_trip_through_store() -> Result<()> {
    let mut store = store()?;
    let incoming = json!({
        "data": [{ "type": "hobby", "id": "9" }],
        "links": { "related": "/people/1/hobbies" }
    });
    store.push("person", "1", "hobbies", RelationshipPayload::from_json(&incoming)?)?;
    assert_eq!(store.get("person", "1", "hobbies")?.to_json(), incoming);
    assert_eq!(
        store.get("hobby", "9", "user")?.to_json(),
        json!({ "data": { "type": "person", "id": "1" } })
    );
    Ok(())
}
