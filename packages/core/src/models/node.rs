//! Node Data Structures
//!
//! This module defines the raw node record shared by both storage backends
//! and the `AssembledNode` read-model returned to callers.
//!
//! # Architecture
//!
//! - **Raw vs assembled**: `NodeRecord` is exactly what the engine persists.
//!   `AssembledNode` is derived on every read from the record, its property
//!   bindings and its supertag memberships - it is never cached at the
//!   adapter layer.
//! - **Soft delete**: `delete_node` only stamps `deleted_at`. Lookup methods
//!   (`find_node_by_id`, `find_node_by_system_id`) return soft-deleted
//!   records unchanged; `assemble_node` and every query path exclude them.
//! - **Opaque ids**: id formats differ per engine. Cross-backend equivalence
//!   is defined over `content`, `properties` and `supertags`, never ids.

use crate::models::value::PropertyValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw node record as persisted by a storage engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Unique identifier (engine-specific format)
    pub id: String,

    /// Optional display text
    pub content: Option<String>,

    /// Lowercased copy of `content`, maintained on every content write and
    /// used for case-insensitive substring search
    pub content_plain: Option<String>,

    /// Optional globally unique stable key
    pub system_id: Option<String>,

    /// Optional weak back-reference to a parent node (ownership by
    /// convention only, never enforced)
    pub owner_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker; `None` means the node is active
    pub deleted_at: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// Whether this record has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Options accepted by `create_node`.
///
/// `supertag_id` names a supertag by system id; when present the membership
/// is established as part of the create and the corresponding events fire in
/// order (`node:created`, then `supertag:added`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeOptions {
    pub content: Option<String>,
    pub system_id: Option<String>,
    pub owner_id: Option<String>,
    pub supertag_id: Option<String>,
}

/// One stored `(node, field) -> value` association, joined with its field
/// definition so callers never see bare field ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyBinding {
    /// Id of the field definition record
    pub field_node_id: String,

    /// Stable field key
    pub field_system_id: String,

    /// Field display name (the grouping key in `AssembledNode.properties`)
    pub field_name: String,

    /// Decoded value (see [`PropertyValue::from_json`])
    pub value: PropertyValue,

    /// Position within the field's value list (insertion order)
    pub order: i64,
}

/// One property entry of an assembled node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledProperty {
    pub value: PropertyValue,
    pub order: i64,
    pub field_system_id: String,
    pub field_name: String,
}

/// One supertag membership of an assembled node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupertagRef {
    /// Stable supertag key
    pub system_id: String,

    /// Supertag display name
    pub content: String,

    /// Membership position
    pub order: i64,
}

/// Fully materialized read-model of a node.
///
/// Properties are grouped by the field's display NAME, not its system id;
/// a node with zero properties carries an empty map, not an absent one.
/// Entries within a field appear in the order the adapter returned them
/// (insertion order); callers needing a deterministic sequence across
/// concurrent writers must sort by `order` themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledNode {
    pub id: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub properties: BTreeMap<String, Vec<AssembledProperty>>,
    pub supertags: Vec<SupertagRef>,
}

impl AssembledNode {
    /// Whether any binding (own or injected default) exists for the field.
    pub fn has_field(&self, field_system_id: &str) -> bool {
        self.properties
            .values()
            .flatten()
            .any(|p| p.field_system_id == field_system_id)
    }

    /// All values bound to the given field, across grouping keys.
    pub fn field_values(&self, field_system_id: &str) -> Vec<&PropertyValue> {
        self.properties
            .values()
            .flatten()
            .filter(|p| p.field_system_id == field_system_id)
            .map(|p| &p.value)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembled_with(properties: Vec<AssembledProperty>) -> AssembledNode {
        let mut map: BTreeMap<String, Vec<AssembledProperty>> = BTreeMap::new();
        for p in properties {
            map.entry(p.field_name.clone()).or_default().push(p);
        }
        AssembledNode {
            id: "n1".to_string(),
            content: Some("Node".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            properties: map,
            supertags: Vec::new(),
        }
    }

    #[test]
    fn test_has_field_checks_system_id_not_name() {
        let node = assembled_with(vec![AssembledProperty {
            value: PropertyValue::Text("x".to_string()),
            order: 0,
            field_system_id: "SYS.description".to_string(),
            field_name: "Description".to_string(),
        }]);

        assert!(node.has_field("SYS.description"));
        assert!(!node.has_field("Description"));
        assert!(!node.has_field("SYS.status"));
    }

    #[test]
    fn test_field_values_collects_all_bindings() {
        let node = assembled_with(vec![
            AssembledProperty {
                value: PropertyValue::Text("a".to_string()),
                order: 0,
                field_system_id: "SYS.tag".to_string(),
                field_name: "Tag".to_string(),
            },
            AssembledProperty {
                value: PropertyValue::Text("b".to_string()),
                order: 1,
                field_system_id: "SYS.tag".to_string(),
                field_name: "Tag".to_string(),
            },
        ]);

        let values = node.field_values("SYS.tag");
        assert_eq!(values.len(), 2);
    }
}
