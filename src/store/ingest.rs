use serde_json::{Map, Value};
use tracing::debug;

use super::Store;
use crate::relationships::RelationshipPayload;
use crate::scheduler::Job;
use crate::types::{CacheError, IdentifierRef, ResourceIdentity, Result};

fn identifier_from_json(object: &Map<String, Value>) -> Result<IdentifierRef> {
    let ty = object
        .get("type")
        .and_then(Value::as_str)
        .filter(|ty| !ty.is_empty())
        .ok_or_else(|| CacheError::InvalidPayload("resource object without type".into()))?;
    let id = match object.get("id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        Some(Value::Null) | None => None,
        Some(_) => {
            return Err(CacheError::InvalidPayload(format!(
                "resource of type '{ty}' has a non-scalar id"
            )))
        }
    };
    let lid = object.get("lid").and_then(Value::as_str).map(str::to_string);
    if id.is_none() && lid.is_none() {
        return Err(CacheError::InvalidPayload(format!(
            "resource of type '{ty}' has neither id nor lid"
        )));
    }
    Ok(IdentifierRef {
        ty: ty.to_string(),
        id,
        lid,
    })
}

impl Store {
    /// Ingests one JSON:API resource object.
    ///
    /// Registers its identity (assigning the server id to a known local id
    /// when both are given), pushes every relationship object it carries and
    /// marks it loaded for the live array of its type.
    pub fn push_resource(&mut self, resource: &Value) -> Result<ResourceIdentity> {
        let object = resource
            .as_object()
            .ok_or_else(|| CacheError::InvalidPayload("resource must be an object".into()))?;
        let reference = identifier_from_json(object)?;
        let mut identity = self.registry.get_or_create(&reference);
        if let Some(id) = reference.id.as_deref() {
            if identity.id.as_deref() != Some(id) {
                identity = self.assign_id(&identity.lid, id)?;
            }
        }

        let mut pushed = 0usize;
        if let Some(relationships) = object.get("relationships") {
            let relationships = relationships.as_object().ok_or_else(|| {
                CacheError::InvalidPayload("relationships member must be an object".into())
            })?;
            let key = identity.key();
            for (name, relationship) in relationships {
                self.register_linkage(relationship.get("data"))?;
                let payload = RelationshipPayload::from_json(relationship)?;
                self.push(&key.ty, &key.id, name, payload)?;
                pushed += 1;
            }
        }

        self.arrays.identifier_added(&identity);
        self.request(Job::SyncArrays)?;
        debug!(identity = %identity, relationships = pushed, "store.push_resource");
        Ok(identity)
    }

    /// Ingests a JSON:API document (`{ data, included }`).
    ///
    /// Returns the identities of the primary data, in order.
    pub fn push_document(&mut self, document: &Value) -> Result<Vec<ResourceIdentity>> {
        let object = document
            .as_object()
            .ok_or_else(|| CacheError::InvalidPayload("document must be an object".into()))?;
        let mut primary = Vec::new();
        match object.get("data") {
            Some(Value::Array(resources)) => {
                for resource in resources {
                    primary.push(self.push_resource(resource)?);
                }
            }
            Some(Value::Null) | None => {}
            Some(resource) => primary.push(self.push_resource(resource)?),
        }
        if let Some(included) = object.get("included") {
            let included = included.as_array().ok_or_else(|| {
                CacheError::InvalidPayload("included member must be an array".into())
            })?;
            for resource in included {
                self.push_resource(resource)?;
            }
        }
        Ok(primary)
    }

    /// Registers identities named by lid-only linkage so later lookups find them.
    fn register_linkage(&mut self, data: Option<&Value>) -> Result<()> {
        let members: Vec<&Value> = match data {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(item @ Value::Object(_)) => vec![item],
            _ => return Ok(()),
        };
        for member in members {
            if let Some(object) = member.as_object() {
                let reference = identifier_from_json(object)?;
                if reference.id.is_none() {
                    self.registry.get_or_create(&reference);
                }
            }
        }
        Ok(())
    }
}
