#![forbid(unsafe_code)]

//! Identity-keyed change notification.
//!
//! [`NotificationHub`] fans out synchronously; [`NotificationBuffer`] collects
//! notifications during a turn so the store can dispatch each distinct
//! `(identity, namespace, key)` once.

mod buffer;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::metrics::CacheMetrics;
use crate::types::{CacheError, LocalId, ResourceIdentity, Result};

pub use buffer::{NotificationBuffer, PendingNotification};

/// Part of a resource a notification is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Attribute values.
    Attributes,
    /// Relationship payloads.
    Relationships,
    /// The identity itself (id assigned, merged, unloaded).
    Identity,
    /// Validation or request errors.
    Errors,
    /// Resource-level meta.
    Meta,
    /// Lifecycle state.
    State,
}

impl Namespace {
    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Attributes => "attributes",
            Namespace::Relationships => "relationships",
            Namespace::Identity => "identity",
            Namespace::Errors => "errors",
            Namespace::Meta => "meta",
            Namespace::State => "state",
        }
    }

    /// Whether notifications in this namespace may name a field.
    pub fn accepts_key(self) -> bool {
        matches!(self, Namespace::Attributes | Namespace::Relationships)
    }

    /// Rejects a key on namespaces that do not take one.
    pub fn check_key(self, key: Option<&str>) -> Result<()> {
        if key.is_some() && !self.accepts_key() {
            return Err(CacheError::InvalidNotificationKey {
                namespace: self.as_str(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle returned by [`NotificationHub::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Subscriber callback: `(identity, namespace, key)`.
pub type Callback = Box<dyn FnMut(&ResourceIdentity, Namespace, Option<&str>)>;

/// Identifier-keyed subscriber registry with synchronous fan-out.
pub struct NotificationHub {
    subscribers: FxHashMap<LocalId, IndexMap<SubscriptionToken, Callback>>,
    owners: FxHashMap<SubscriptionToken, LocalId>,
    next_token: u64,
    metrics: Arc<dyn CacheMetrics>,
}

impl NotificationHub {
    /// Creates a hub with no subscribers.
    pub fn new(metrics: Arc<dyn CacheMetrics>) -> Self {
        Self {
            subscribers: FxHashMap::default(),
            owners: FxHashMap::default(),
            next_token: 1,
            metrics,
        }
    }

    /// Registers `callback` for changes to `lid`. Callbacks run in subscription order.
    pub fn subscribe(
        &mut self,
        lid: &LocalId,
        callback: impl FnMut(&ResourceIdentity, Namespace, Option<&str>) + 'static,
    ) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        self.subscribers
            .entry(lid.clone())
            .or_default()
            .insert(token, Box::new(callback));
        self.owners.insert(token, lid.clone());
        trace!(lid = %lid, token = token.0, "notify.subscribe");
        token
    }

    /// Removes a subscription; returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let Some(lid) = self.owners.remove(&token) else {
            return false;
        };
        if let Some(callbacks) = self.subscribers.get_mut(&lid) {
            callbacks.shift_remove(&token);
            if callbacks.is_empty() {
                self.subscribers.remove(&lid);
            }
        }
        true
    }

    /// Invokes every callback registered for `identity`.
    ///
    /// Returns `Ok(false)` when nobody is subscribed. Supplying a `key` for a
    /// namespace other than attributes or relationships is an error.
    pub fn notify(
        &mut self,
        identity: &ResourceIdentity,
        namespace: Namespace,
        key: Option<&str>,
    ) -> Result<bool> {
        namespace.check_key(key)?;
        let Some(callbacks) = self.subscribers.get_mut(&identity.lid) else {
            trace!(identity = %identity, namespace = %namespace, "no subscribers");
            self.metrics.notified(0);
            return Ok(false);
        };
        let delivered = callbacks.len();
        for callback in callbacks.values_mut() {
            callback(identity, namespace, key);
        }
        self.metrics.notified(delivered);
        trace!(
            identity = %identity,
            namespace = %namespace,
            key,
            delivered,
            "notify.dispatch"
        );
        Ok(delivered > 0)
    }

    /// Number of callbacks registered for `lid`.
    pub fn subscriber_count(&self, lid: &LocalId) -> usize {
        self.subscribers.get(lid).map_or(0, IndexMap::len)
    }

    /// Drops every subscription of `lid`; returns how many were removed.
    pub fn drop_identity(&mut self, lid: &LocalId) -> usize {
        let Some(callbacks) = self.subscribers.remove(lid) else {
            return 0;
        };
        for token in callbacks.keys() {
            self.owners.remove(token);
        }
        callbacks.len()
    }

    /// Drops every subscription.
    pub fn clear(&mut self) {
        self.subscribers.clear();
        self.owners.clear();
    }
}
