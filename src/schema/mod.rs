#![forbid(unsafe_code)]

//! Relationship schema lookups.
//!
//! The cache never parses schema declarations itself; it asks a
//! [`SchemaService`] for relationship definitions the first time a relationship
//! is touched and memoizes the answer as a [`RelationshipPairInfo`].

mod pair;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::{CacheError, Result};

pub use pair::{
    Cardinality, Polymorphism, Reflexivity, RelationshipPairInfo, ResolvedPair, Side, SideInfo,
};

/// Declared kind of a relationship field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    /// Single reference (`belongsTo`).
    BelongsTo,
    /// Collection of references (`hasMany`).
    HasMany,
}

impl RelationshipKind {
    /// Maps the declared kind onto a pair side cardinality.
    pub fn cardinality(self) -> Cardinality {
        match self {
            RelationshipKind::BelongsTo => Cardinality::Singular,
            RelationshipKind::HasMany => Cardinality::Collection,
        }
    }
}

/// One relationship field as declared on its owning type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    /// Owning resource type.
    pub owner: String,
    /// Field name on the owning type.
    pub name: String,
    /// Singular or collection.
    pub kind: RelationshipKind,
    /// Declared target type; the abstract base for polymorphic relationships.
    #[serde(rename = "type")]
    pub target: String,
    /// Name of the inverse field on the target type, if any.
    #[serde(default)]
    pub inverse: Option<String>,
    /// Whether concrete subtypes of `target` may fill this relationship.
    #[serde(default)]
    pub polymorphic: bool,
}

impl RelationshipDefinition {
    /// Declares a singular relationship.
    pub fn belongs_to(
        owner: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::declare(owner, name, RelationshipKind::BelongsTo, target)
    }

    /// Declares a collection relationship.
    pub fn has_many(
        owner: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::declare(owner, name, RelationshipKind::HasMany, target)
    }

    fn declare(
        owner: impl Into<String>,
        name: impl Into<String>,
        kind: RelationshipKind,
        target: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            kind,
            target: target.into(),
            inverse: None,
            polymorphic: false,
        }
    }

    /// Sets the inverse field name.
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    /// Marks the relationship as polymorphic.
    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }
}

/// Source of relationship definitions.
pub trait SchemaService {
    /// Returns the definition of `owner.name`, if declared.
    fn relationship(&self, owner: &str, name: &str) -> Option<RelationshipDefinition>;

    /// Returns every relationship declared on `owner`.
    fn relationships_of(&self, owner: &str) -> Vec<RelationshipDefinition>;

    /// Whether `concrete` may fill a polymorphic relationship declared against `base`.
    fn is_subtype(&self, concrete: &str, base: &str) -> bool {
        concrete == base
    }
}

#[derive(Debug, Default, Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "relationship")]
    relationships: Vec<RelationshipDefinition>,
    #[serde(default, rename = "abstract")]
    abstract_types: BTreeMap<String, Vec<String>>,
}

/// In-memory [`SchemaService`] built programmatically or loaded from TOML / JSON.
///
/// ```toml
/// [[relationship]]
/// owner = "person"
/// name = "hobbies"
/// kind = "has-many"
/// type = "hobby"
/// inverse = "user"
///
/// [abstract]
/// commentable = ["post", "video"]
/// ```
///
/// Lookups against an abstract type fall back to the first concrete subtype
/// declaring the field, so polymorphic inverses only need declaring once per
/// concrete type.
#[derive(Clone, Debug, Default)]
pub struct StaticSchema {
    relationships: FxHashMap<(String, String), RelationshipDefinition>,
    subtypes: BTreeMap<String, BTreeSet<String>>,
}

impl StaticSchema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a relationship definition, replacing any previous one with the same owner and name.
    pub fn with(mut self, definition: RelationshipDefinition) -> Self {
        self.define(definition);
        self
    }

    /// Declares `base` as an abstract type implemented by `concrete`.
    pub fn with_abstract<I, S>(mut self, base: impl Into<String>, concrete: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subtypes
            .entry(base.into())
            .or_default()
            .extend(concrete.into_iter().map(Into::into));
        self
    }

    /// Adds a relationship definition in place.
    pub fn define(&mut self, definition: RelationshipDefinition) {
        self.relationships.insert(
            (definition.owner.clone(), definition.name.clone()),
            definition,
        );
    }

    /// Parses a TOML schema document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: SchemaFile = toml::from_str(source)?;
        Self::from_file(file)
    }

    /// Parses a JSON schema document with the same layout as the TOML form.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let file: SchemaFile = serde_json::from_str(source)?;
        Self::from_file(file)
    }

    /// Reads a TOML schema file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|err| CacheError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&source)
    }

    fn from_file(file: SchemaFile) -> Result<Self> {
        let mut schema = StaticSchema::new();
        for definition in file.relationships {
            if definition.owner.is_empty() || definition.name.is_empty() {
                return Err(CacheError::Config(
                    "relationship owner and name must be non-empty".into(),
                ));
            }
            schema.define(definition);
        }
        for (base, concrete) in file.abstract_types {
            schema = schema.with_abstract(base, concrete);
        }
        Ok(schema)
    }
}

impl SchemaService for StaticSchema {
    fn relationship(&self, owner: &str, name: &str) -> Option<RelationshipDefinition> {
        if let Some(definition) = self
            .relationships
            .get(&(owner.to_string(), name.to_string()))
        {
            return Some(definition.clone());
        }
        let concrete = self.subtypes.get(owner)?;
        concrete.iter().find_map(|ty| {
            self.relationships
                .get(&(ty.clone(), name.to_string()))
                .map(|definition| RelationshipDefinition {
                    owner: owner.to_string(),
                    ..definition.clone()
                })
        })
    }

    fn relationships_of(&self, owner: &str) -> Vec<RelationshipDefinition> {
        let mut found: Vec<_> = self
            .relationships
            .values()
            .filter(|definition| definition.owner == owner)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    fn is_subtype(&self, concrete: &str, base: &str) -> bool {
        concrete == base
            || self
                .subtypes
                .get(base)
                .is_some_and(|types| types.contains(concrete))
    }
}
