//! Penumbra: the consistency core of a client-side normalized resource cache.
//!
//! A [`Store`] ingests partial, out-of-order resource payloads and keeps a
//! consistent graph of uniquely identified resources:
//!
//! - [`identity`] assigns one stable [`ResourceIdentity`] per resource and
//!   merges colliding identities;
//! - [`relationships`] derives and repairs the inverse side of every pushed
//!   relationship, lazily on the next read;
//! - [`arrays`] maintains live and query-result record arrays with batched,
//!   cancel-aware membership deltas;
//! - [`notify`] tells subscribers which identity, namespace and key changed.

#![warn(missing_docs)]

pub mod arrays;
pub mod identity;
pub mod metrics;
pub mod notify;
pub mod relationships;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod types;

pub use arrays::{
    ArrayDelta, ArrayId, ArrayKind, ArrayMembershipTracker, ChangeOp, ChangeSet,
    ManagedArrayConfig, TrackedArray,
};
pub use identity::IdentifierRegistry;
pub use metrics::{default_metrics, CacheMetrics, CounterMetrics, NoopMetrics};
pub use notify::{Namespace, NotificationBuffer, NotificationHub, SubscriptionToken};
pub use relationships::{
    EdgeChange, PendingEdgeWrite, RelationshipData, RelationshipPayload, RelationshipPayloadStore,
};
pub use scheduler::{Dispatch, ImmediateScheduler, Job, Scheduler, TurnScheduler};
pub use schema::{
    Cardinality, Polymorphism, Reflexivity, RelationshipDefinition, RelationshipKind,
    RelationshipPairInfo, SchemaService, Side, SideInfo, StaticSchema,
};
pub use store::{Store, StoreOptions};
pub use types::{CacheError, IdentifierRef, LocalId, ResourceIdentity, ResourceRef, Result};
