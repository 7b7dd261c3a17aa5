//! Schema Metadata
//!
//! Field and supertag definitions are schema metadata, not user content.
//! They share the id space with nodes but are created and queried through
//! dedicated contract methods (`create_field`, `create_supertag`, ...),
//! which is also the path the seeding tooling drives in bulk.

use crate::models::value::{PropertyValue, ValueType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A field definition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Id of the definition record itself
    pub node_id: String,

    /// Stable key, e.g. a namespaced path identifier (`SYS.description`)
    pub system_id: String,

    /// Display name; the grouping key when assembling properties
    pub name: String,

    /// Declared value type, fixed at creation
    pub value_type: ValueType,
}

/// One entry of a supertag's field schema.
///
/// `default_value` is kept as raw JSON here; it is decoded against the
/// field's declared type when the inheritance resolver materializes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefault {
    pub field_system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// A supertag definition record.
///
/// `extends` names at most one parent supertag by system id - supertag
/// inheritance is a single chain, never a DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupertagDef {
    /// Id of the definition record itself
    pub node_id: String,

    /// Stable key
    pub system_id: String,

    /// Display name
    pub name: String,

    /// Parent supertag system id, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Ordered field defaults contributed to tagged nodes
    #[serde(default)]
    pub field_schema: Vec<FieldDefault>,
}

/// Input to `create_supertag`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupertagSpec {
    pub system_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default)]
    pub field_schema: Vec<FieldDefault>,
}

/// A field default resolved through the inheritance chain, keyed by field
/// system id in `get_supertag_field_definitions` results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFieldDefault {
    pub field_node_id: String,
    pub field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<PropertyValue>,
}

/// Discriminator for edges in the shared relation storage.
///
/// `HasSupertag` backs node-supertag membership and is the only kind whose
/// changes emit supertag events; the remaining kinds are generic semantic
/// relations between nodes and never emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    HasSupertag,
    PartOf,
    References,
    DependencyOf,
    TaggedWith,
}

impl RelationKind {
    /// Wire name stored in the relation discriminator column/field.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::HasSupertag => "has_supertag",
            RelationKind::PartOf => "part_of",
            RelationKind::References => "references",
            RelationKind::DependencyOf => "dependency_of",
            RelationKind::TaggedWith => "tagged_with",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relation_kind_wire_names() {
        assert_eq!(RelationKind::HasSupertag.as_str(), "has_supertag");
        assert_eq!(RelationKind::PartOf.as_str(), "part_of");
        assert_eq!(RelationKind::References.as_str(), "references");
        assert_eq!(RelationKind::DependencyOf.as_str(), "dependency_of");
        assert_eq!(RelationKind::TaggedWith.as_str(), "tagged_with");
    }

    #[test]
    fn test_field_schema_serialization_round_trip() {
        let def = SupertagDef {
            node_id: "st-1".to_string(),
            system_id: "SYS.tool".to_string(),
            name: "Tool".to_string(),
            extends: Some("SYS.item".to_string()),
            field_schema: vec![FieldDefault {
                field_system_id: "SYS.description".to_string(),
                default_value: Some(json!("inherited-desc")),
            }],
        };

        let encoded = serde_json::to_string(&def).unwrap();
        let decoded: SupertagDef = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, def);
    }

    #[test]
    fn test_field_default_without_value_omits_key() {
        let entry = FieldDefault {
            field_system_id: "SYS.status".to_string(),
            default_value: None,
        };
        let encoded = serde_json::to_value(&entry).unwrap();
        assert!(encoded.get("defaultValue").is_none());
    }
}
