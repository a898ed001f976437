use std::slice;

use serde_json::{Map, Value};

use crate::types::{CacheError, ResourceRef, Result};

/// Canonical relationship data. Absence (`undefined`) is modelled by wrapping
/// this in `Option`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationshipData {
    /// Explicit `null`.
    Empty,
    /// A single reference.
    One(ResourceRef),
    /// A list of references; `[]` is an explicit empty collection.
    Many(Vec<ResourceRef>),
}

impl RelationshipData {
    /// References named by the data, in order.
    pub fn refs(&self) -> &[ResourceRef] {
        match self {
            RelationshipData::Empty => &[],
            RelationshipData::One(target) => slice::from_ref(target),
            RelationshipData::Many(targets) => targets,
        }
    }

    /// Returns `true` when `target` is referenced.
    pub fn contains(&self, target: &ResourceRef) -> bool {
        self.refs().contains(target)
    }

    /// Decodes JSON:API resource linkage (`null`, an identifier object or an array).
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(RelationshipData::Empty),
            Value::Object(object) => Ok(RelationshipData::One(ref_from_json(object)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(object) => ref_from_json(object),
                    _ => Err(CacheError::InvalidPayload(
                        "relationship array members must be identifier objects".into(),
                    )),
                })
                .collect::<Result<Vec<_>>>()
                .map(RelationshipData::Many),
            _ => Err(CacheError::InvalidPayload(
                "relationship data must be null, an object or an array".into(),
            )),
        }
    }

    /// Encodes the data as JSON:API resource linkage.
    pub fn to_json(&self) -> Value {
        match self {
            RelationshipData::Empty => Value::Null,
            RelationshipData::One(target) => ref_to_json(target),
            RelationshipData::Many(targets) => {
                Value::Array(targets.iter().map(ref_to_json).collect())
            }
        }
    }
}

fn ref_from_json(object: &Map<String, Value>) -> Result<ResourceRef> {
    let ty = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CacheError::InvalidPayload("resource identifier without type".into()))?;
    let id = match object.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => object
            .get("lid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                CacheError::InvalidPayload(format!("resource identifier of type '{ty}' without id"))
            })?,
    };
    Ok(ResourceRef::new(ty, id))
}

fn ref_to_json(target: &ResourceRef) -> Value {
    let mut object = Map::new();
    object.insert("type".into(), Value::String(target.ty.clone()));
    object.insert("id".into(), Value::String(target.id.clone()));
    Value::Object(object)
}

/// One directional view of a relationship for one resource.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelationshipPayload {
    /// Canonical data; `None` means nothing is known.
    pub data: Option<RelationshipData>,
    /// Relationship-level meta.
    pub meta: Option<Value>,
    /// Relationship-level links.
    pub links: Option<Value>,
    /// Collection membership inferred from the inverse side only.
    ///
    /// Never authoritative; dropped as soon as `data` is known.
    pub partial_data: Option<Vec<ResourceRef>>,
}

impl RelationshipPayload {
    /// Payload carrying `data`.
    pub fn with_data(data: RelationshipData) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Payload pointing at a single resource.
    pub fn one(target: ResourceRef) -> Self {
        Self::with_data(RelationshipData::One(target))
    }

    /// Payload listing `targets`.
    pub fn many(targets: impl IntoIterator<Item = ResourceRef>) -> Self {
        Self::with_data(RelationshipData::Many(targets.into_iter().collect()))
    }

    /// Payload with an explicit `null`.
    pub fn null() -> Self {
        Self::with_data(RelationshipData::Empty)
    }

    /// Sets `meta`.
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Sets `links`.
    pub fn links(mut self, links: Value) -> Self {
        self.links = Some(links);
        self
    }

    /// Whether canonical data has been received.
    pub fn is_complete(&self) -> bool {
        self.data.is_some()
    }

    /// Best-known members: canonical data when present, otherwise inferred members.
    pub fn members(&self) -> &[ResourceRef] {
        match (&self.data, &self.partial_data) {
            (Some(data), _) => data.refs(),
            (None, Some(partial)) => partial,
            (None, None) => &[],
        }
    }

    /// Decodes a JSON:API relationship object (`{ data?, meta?, links? }`).
    ///
    /// An absent `data` member stays unknown; `"data": null` is an explicit empty.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            CacheError::InvalidPayload("relationship payload must be an object".into())
        })?;
        let data = object
            .get("data")
            .map(RelationshipData::from_json)
            .transpose()?;
        Ok(Self {
            data,
            meta: object.get("meta").cloned(),
            links: object.get("links").cloned(),
            partial_data: None,
        })
    }

    /// Encodes the payload; unknown members are omitted.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        if let Some(data) = &self.data {
            object.insert("data".into(), data.to_json());
        }
        if let Some(meta) = &self.meta {
            object.insert("meta".into(), meta.clone());
        }
        if let Some(links) = &self.links {
            object.insert("links".into(), links.clone());
        }
        if let Some(partial) = &self.partial_data {
            object.insert(
                "partialData".into(),
                Value::Array(partial.iter().map(ref_to_json).collect()),
            );
        }
        Value::Object(object)
    }
}
