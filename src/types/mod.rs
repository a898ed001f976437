#![forbid(unsafe_code)]

//! Shared vocabulary: identities, resource references and the crate error type.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Permanent local identifier assigned to a resource the first time it is seen.
///
/// A `LocalId` never changes for the lifetime of the resource and is never
/// handed out twice by the same registry.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Arc<str>);

impl LocalId {
    /// Wraps an existing local id string.
    pub fn new(value: impl AsRef<str>) -> Self {
        LocalId(Arc::from(value.as_ref()))
    }

    /// Returns the local id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalId {
    fn from(value: &str) -> Self {
        LocalId::new(value)
    }
}

/// Snapshot of a resource identity as known by the registry.
///
/// `id` is the server-assigned id and may be absent for client-created
/// resources. The snapshot does not track later `assign_id` calls; re-read it
/// from the registry when the id may have changed.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize)]
pub struct ResourceIdentity {
    /// Resource type name.
    #[serde(rename = "type")]
    pub ty: Arc<str>,
    /// Server id, if one has been assigned.
    pub id: Option<Arc<str>>,
    /// Permanent local id.
    pub lid: LocalId,
}

impl ResourceIdentity {
    /// Key used by the relationship payload store for this resource.
    ///
    /// Resources without a server id are keyed by their local id.
    pub fn key(&self) -> ResourceRef {
        let id = match &self.id {
            Some(id) => id.to_string(),
            None => self.lid.to_string(),
        };
        ResourceRef::new(self.ty.as_ref(), id)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{} ({})", self.ty, id, self.lid),
            None => write!(f, "{}:<new> ({})", self.ty, self.lid),
        }
    }
}

/// Lookup request accepted by [`crate::identity::IdentifierRegistry::get_or_create`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct IdentifierRef {
    /// Resource type name.
    #[serde(rename = "type")]
    pub ty: String,
    /// Server id, when known.
    #[serde(default)]
    pub id: Option<String>,
    /// Local id, when the caller already holds one.
    #[serde(default)]
    pub lid: Option<String>,
}

impl IdentifierRef {
    /// Reference by type and server id.
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: Some(id.into()),
            lid: None,
        }
    }

    /// Reference by type and local id only.
    pub fn local(ty: impl Into<String>, lid: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: None,
            lid: Some(lid.into()),
        }
    }
}

/// Raw `(type, id)` pair as found in relationship payloads.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource type name.
    #[serde(rename = "type")]
    pub ty: String,
    /// Resource id (server id, or local id for unsaved resources).
    pub id: String,
}

impl ResourceRef {
    /// Builds a reference from a type and id.
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ty, self.id)
    }
}

/// Errors raised by the cache core.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The schema service has no definition for the relationship.
    #[error("unknown relationship '{owner}.{name}'")]
    UnknownRelationship {
        /// Owning type.
        owner: String,
        /// Relationship name.
        name: String,
    },
    /// A relationship was addressed through a pair it does not belong to.
    #[error("relationship '{ty}.{name}' is not part of the resolved pair")]
    NotInPair {
        /// Requested type.
        ty: String,
        /// Requested relationship name.
        name: String,
    },
    /// A notification key was supplied for a namespace that does not take one.
    #[error("notification key is only valid for attributes and relationships (got {namespace})")]
    InvalidNotificationKey {
        /// Offending namespace.
        namespace: &'static str,
    },
    /// Attempted to replace an already assigned server id.
    #[error("identity {lid} already has id '{current}', refusing to assign '{requested}'")]
    IdMismatch {
        /// Identity being updated.
        lid: LocalId,
        /// Id already assigned.
        current: String,
        /// Id the caller tried to assign.
        requested: String,
    },
    /// Another live identity already owns the `(type, id)` pair.
    #[error("identity collision on {ty}:{id} between {existing} and {incoming}; merge required")]
    IdentityCollision {
        /// Resource type.
        ty: String,
        /// Contested id.
        id: String,
        /// Identity currently owning the id.
        existing: LocalId,
        /// Identity that requested the id.
        incoming: LocalId,
    },
    /// Two identities cannot be merged.
    #[error("cannot merge {stale} into {kept}: {reason}")]
    IrreconcilableMerge {
        /// Identity that would have been discarded.
        stale: LocalId,
        /// Identity that would have been kept.
        kept: LocalId,
        /// Why the merge was refused.
        reason: &'static str,
    },
    /// The local id is not known to the registry.
    #[error("unknown identity {0}")]
    UnknownIdentity(LocalId),
    /// The array handle does not refer to a live array.
    #[error("unknown record array {0}")]
    UnknownArray(u64),
    /// A payload did not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// JSON decoding failure.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// TOML decoding failure.
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CacheError>;
