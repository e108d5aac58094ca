//! Entity types held by the local store.

use crate::{query::QueryKey, CollectionName, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Attribute map of an entity.
pub type Attributes = Map<String, Value>;

/// Relationship name to related entity IDs (e.g. `members`).
pub type Relationships = BTreeMap<String, BTreeSet<EntityId>>;

/// Origin of an entity's last write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created or modified locally
    Local,
    /// Received from the remote API
    Remote,
}

/// Metadata associated with an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// When the entity first reached the store (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the entity was last written (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Whether the last write was local or came from the remote
    pub origin: Origin,
}

impl Metadata {
    /// Metadata for an entity created on this device.
    pub fn new_local(timestamp: Timestamp) -> Self {
        Self {
            created_at: timestamp,
            updated_at: timestamp,
            origin: Origin::Local,
        }
    }

    /// Metadata for an entity first seen in a remote payload.
    pub fn new_remote(timestamp: Timestamp) -> Self {
        Self {
            created_at: timestamp,
            updated_at: timestamp,
            origin: Origin::Remote,
        }
    }

    /// Record a modification.
    pub fn touch(&mut self, timestamp: Timestamp, origin: Origin) {
        self.updated_at = timestamp;
        self.origin = origin;
    }
}

/// An entity as the remote API returns it.
///
/// Only the attributes and relationships present here are written on upsert;
/// everything else on the stored entity is preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPayload {
    pub id: EntityId,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Relationships>,
}

impl EntityPayload {
    /// Build a payload from an id and a JSON object. Non-object values yield
    /// an empty attribute set.
    pub fn new(id: impl Into<EntityId>, attributes: Value) -> Self {
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Attributes::new(),
        };
        Self {
            id: id.into(),
            attributes,
            relationships: None,
        }
    }

    /// Attach a relationship.
    pub fn with_relationship<I, S>(mut self, name: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        self.relationships
            .get_or_insert_with(Relationships::new)
            .insert(name.into(), ids.into_iter().map(Into::into).collect());
        self
    }
}

/// A domain object in the local store (a channel, a message, a member).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Stable identifier
    pub id: EntityId,
    /// Collection this entity belongs to
    pub collection: CollectionName,
    /// Mutable attribute set
    pub attributes: Attributes,
    /// Relationships to other entities
    #[serde(default)]
    pub relationships: Relationships,
    /// Queries the remote has confirmed this entity belongs to
    #[serde(default)]
    pub linked_queries: BTreeSet<QueryKey>,
    /// Created locally and not yet claimed by the query linker
    #[serde(default)]
    pub linkage_pending: bool,
    /// Entity metadata
    pub metadata: Metadata,
}

impl Entity {
    /// A locally created entity, waiting for the linker to find its queries.
    pub fn new_local(
        id: impl Into<EntityId>,
        collection: impl Into<CollectionName>,
        attributes: Value,
        timestamp: Timestamp,
    ) -> Self {
        let payload = EntityPayload::new(id, attributes);
        Self {
            id: payload.id,
            collection: collection.into(),
            attributes: payload.attributes,
            relationships: Relationships::new(),
            linked_queries: BTreeSet::new(),
            linkage_pending: true,
            metadata: Metadata::new_local(timestamp),
        }
    }

    /// An entity first seen in a remote payload.
    pub fn from_payload(
        collection: impl Into<CollectionName>,
        payload: EntityPayload,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: payload.id,
            collection: collection.into(),
            attributes: payload.attributes,
            relationships: payload.relationships.unwrap_or_default(),
            linked_queries: BTreeSet::new(),
            linkage_pending: false,
            metadata: Metadata::new_remote(timestamp),
        }
    }

    /// Merge a remote payload into this entity.
    ///
    /// Attributes and relationships missing from the payload keep their
    /// local values; linkage and creation time are never touched.
    pub fn merge_payload(&mut self, payload: EntityPayload, timestamp: Timestamp) {
        for (key, value) in payload.attributes {
            self.attributes.insert(key, value);
        }
        if let Some(relationships) = payload.relationships {
            for (name, ids) in relationships {
                self.relationships.insert(name, ids);
            }
        }
        self.metadata.touch(timestamp, Origin::Remote);
    }

    /// Apply a local attribute patch. A `null` value removes the attribute.
    pub fn patch(&mut self, attributes: Attributes, timestamp: Timestamp) {
        for (key, value) in attributes {
            if value.is_null() {
                self.attributes.remove(&key);
            } else {
                self.attributes.insert(key, value);
            }
        }
        self.metadata.touch(timestamp, Origin::Local);
    }

    /// Whether the entity belongs to the given query.
    pub fn is_linked_to(&self, key: &QueryKey) -> bool {
        self.linked_queries.contains(key)
    }

    /// Whether the entity is waiting for the linker: created locally and
    /// claimed by no query.
    pub fn awaits_linkage(&self) -> bool {
        self.linkage_pending && self.linked_queries.is_empty()
    }

    /// Whether the visible content differs from another snapshot of the
    /// same entity. Linkage bookkeeping and timestamps are ignored.
    pub fn content_differs(&self, other: &Entity) -> bool {
        self.attributes != other.attributes || self.relationships != other.relationships
    }

    /// Look up a field by name; `id` resolves to the entity id.
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == "id" {
            return Some(Value::String(self.id.clone()));
        }
        self.attributes.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn local_entity_awaits_linkage() {
        let entity = Entity::new_local("c1", "channels", json!({"name": "general"}), 1000);

        assert_eq!(entity.id, "c1");
        assert_eq!(entity.collection, "channels");
        assert!(entity.linkage_pending);
        assert!(entity.awaits_linkage());
        assert_eq!(entity.metadata.origin, Origin::Local);
    }

    #[test]
    fn merge_preserves_missing_fields() {
        let payload = EntityPayload::new("c1", json!({"name": "general", "muted": true}))
            .with_relationship("members", ["u1", "u2"]);
        let mut entity = Entity::from_payload("channels", payload, 1000);
        entity.linked_queries.insert(QueryKey::from_raw("q"));

        entity.merge_payload(EntityPayload::new("c1", json!({"name": "random"})), 2000);

        assert_eq!(entity.attributes["name"], json!("random"));
        assert_eq!(entity.attributes["muted"], json!(true));
        assert_eq!(entity.relationships["members"].len(), 2);
        assert!(entity.is_linked_to(&QueryKey::from_raw("q")));
        assert_eq!(entity.metadata.created_at, 1000);
        assert_eq!(entity.metadata.updated_at, 2000);
    }

    #[test]
    fn merge_replaces_present_relationships() {
        let payload = EntityPayload::new("c1", json!({})).with_relationship("members", ["u1"]);
        let mut entity = Entity::from_payload("channels", payload, 1000);

        let update = EntityPayload::new("c1", json!({})).with_relationship("members", ["u2"]);
        entity.merge_payload(update, 2000);

        let members: Vec<_> = entity.relationships["members"].iter().cloned().collect();
        assert_eq!(members, vec!["u2".to_string()]);
    }

    #[test]
    fn patch_removes_null_attributes() {
        let mut entity = Entity::new_local("c1", "channels", json!({"name": "a", "topic": "t"}), 1);
        let patch = json!({"topic": null, "name": "b"});
        entity.patch(patch.as_object().cloned().unwrap_or_default(), 2);

        assert_eq!(entity.field("name"), Some(json!("b")));
        assert_eq!(entity.field("topic"), None);
        assert_eq!(entity.field("id"), Some(json!("c1")));
    }

    #[test]
    fn content_differs_ignores_linkage() {
        let a = Entity::new_local("c1", "channels", json!({"name": "a"}), 1);
        let mut b = a.clone();
        b.linked_queries.insert(QueryKey::from_raw("q"));
        b.metadata.updated_at = 99;
        assert!(!a.content_differs(&b));

        b.attributes.insert("name".into(), json!("b"));
        assert!(a.content_differs(&b));
    }

    #[test]
    fn serialization_roundtrip() {
        let entity = Entity::new_local("c1", "channels", json!({"name": "general"}), 1000);
        let json = serde_json::to_string(&entity).unwrap();
        let parsed: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(entity, parsed);
    }
}
