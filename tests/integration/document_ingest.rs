#![allow(clippy::all)]

use std::sync::Arc;

use penumbra::{
    CacheError, IdentifierRef, RelationshipData, ResourceRef, Result, StaticSchema, Store,
    StoreOptions,
};
use serde_json::json;

const SCHEMA: &str = r#"{
  "relationship": [
    { "owner": "article", "name": "author", "kind": "belongs-to", "type": "person", "inverse": "articles" },
    { "owner": "person", "name": "articles", "kind": "has-many", "type": "article", "inverse": "author" },
    { "owner": "article", "name": "comments", "kind": "has-many", "type": "comment", "inverse": "article" },
    { "owner": "comment", "name": "article", "kind": "belongs-to", "type": "article", "inverse": "comments" }
  ]
}"#;

fn store() -> Result<Store> {
    let schema = StaticSchema::from_json_str(SCHEMA)?;
    Ok(Store::new(Arc::new(schema), StoreOptions::new()))
}

fn r(ty: &str, id: &str) -> ResourceRef {
    ResourceRef::new(ty, id)
}

#[test]
fn compound_document_links_both_sides() -> Result<()> {
    let mut store = store()?;
    let primary = store.push_document(&json!({
        "data": [{
            "type": "article",
            "id": "1",
            "attributes": { "title": "JSON:API paints my bikeshed!" },
            "relationships": {
                "author": { "data": { "type": "person", "id": "9" } },
                "comments": {
                    "data": [
                        { "type": "comment", "id": "5" },
                        { "type": "comment", "id": "12" }
                    ]
                }
            }
        }],
        "included": [
            {
                "type": "person",
                "id": "9",
                "relationships": {
                    "articles": { "data": [{ "type": "article", "id": "1" }] }
                }
            },
            { "type": "comment", "id": "5" },
            { "type": "comment", "id": "12" }
        ]
    }))?;

    assert_eq!(primary.len(), 1);
    assert_eq!(primary[0].id.as_deref(), Some("1"));

    let articles = store.get("person", "9", "articles")?;
    assert!(articles.is_complete());
    assert_eq!(articles.members(), &[r("article", "1")]);
    assert_eq!(
        store.get("comment", "12", "article")?.data,
        Some(RelationshipData::One(r("article", "1")))
    );
    assert_eq!(
        store.get("article", "1", "comments")?.members(),
        &[r("comment", "5"), r("comment", "12")]
    );

    let comments = store.live_array_for("comment")?;
    let ids: Vec<Option<String>> = store
        .array_members(comments)?
        .into_iter()
        .map(|identity| identity.id.map(|id| id.to_string()))
        .collect();
    assert_eq!(ids, vec![Some("5".to_string()), Some("12".to_string())]);
    Ok(())
}

#[test]
fn lid_linkage_survives_the_save() -> Result<()> {
    let mut store = store()?;
    let draft_lid = "@lid:article-draft";
    store.push_document(&json!({
        "data": {
            "type": "article",
            "lid": draft_lid,
            "relationships": {
                "author": { "data": { "type": "person", "id": "9" } }
            }
        },
        "included": [{
            "type": "person",
            "id": "9",
            "relationships": {
                "articles": { "data": [{ "type": "article", "lid": draft_lid }] }
            }
        }]
    }))?;
    assert_eq!(
        store.get("person", "9", "articles")?.members(),
        &[r("article", draft_lid)]
    );

    let saved = store.push_resource(&json!({ "type": "article", "id": "3", "lid": draft_lid }))?;
    assert_eq!(saved.lid.as_str(), draft_lid);
    assert_eq!(saved.id.as_deref(), Some("3"));
    assert_eq!(
        store.get("person", "9", "articles")?.members(),
        &[r("article", "3")]
    );
    assert_eq!(
        store.get("article", "3", "author")?.data,
        Some(RelationshipData::One(r("person", "9")))
    );

    let articles = store.live_array_for("article")?;
    assert_eq!(store.array_members(articles)?, vec![saved]);
    Ok(())
}

#[test]
fn numeric_ids_are_stringified() -> Result<()> {
    let mut store = store()?;
    let primary = store.push_document(&json!({
        "data": {
            "type": "person",
            "id": 42,
            "relationships": { "articles": { "data": [{ "type": "article", "id": 7 }] } }
        }
    }))?;
    assert_eq!(primary[0].id.as_deref(), Some("42"));
    assert!(store
        .peek_identifier(&IdentifierRef::new("article", "7"))
        .is_some());
    assert_eq!(
        store.get("article", "7", "author")?.data,
        Some(RelationshipData::One(r("person", "42")))
    );
    Ok(())
}

#[test]
fn empty_documents_are_accepted() -> Result<()> {
    let mut store = store()?;
    assert!(store.push_document(&json!({ "data": null }))?.is_empty());
    assert!(store.push_document(&json!({ "meta": { "total": 0 } }))?.is_empty());
    assert!(store.push_document(&json!({ "data": [] }))?.is_empty());
    assert!(store.registry().is_empty());
    Ok(())
}

#[test]
fn malformed_documents_are_rejected() -> Result<()> {
    let mut store = store()?;
    let malformed = [
        json!([]),
        json!({ "data": "article" }),
        json!({ "data": { "id": "1" } }),
        json!({ "data": { "type": "article" } }),
        json!({ "data": { "type": "article", "id": ["1"] } }),
        json!({ "data": { "type": "article", "id": "1", "relationships": [] } }),
        json!({ "data": null, "included": {} }),
        json!({
            "data": {
                "type": "article",
                "id": "1",
                "relationships": { "author": { "data": "person" } }
            }
        }),
    ];
    for document in &malformed {
        assert!(
            matches!(store.push_document(document), Err(CacheError::InvalidPayload(_))),
            "accepted {document}"
        );
    }

    let unknown = store.push_document(&json!({
        "data": {
            "type": "article",
            "id": "2",
            "relationships": { "editor": { "data": null } }
        }
    }));
    assert!(matches!(unknown, Err(CacheError::UnknownRelationship { .. })));
    Ok(())
}
