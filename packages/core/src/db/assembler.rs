//! Node Assembler
//!
//! Pure transformation from a raw node record plus its property bindings and
//! supertag memberships into the [`AssembledNode`] read-model. Both backends
//! call through here so grouping semantics cannot drift between engines.

use crate::models::{
    AssembledNode, AssembledProperty, NodeRecord, PropertyBinding, SupertagRef,
};
use std::collections::BTreeMap;

/// Build the read-model for one node.
///
/// Bindings are grouped by the field's display NAME (not its system id) and
/// kept in the order the adapter returned them. A node with zero properties
/// yields an empty map.
pub fn assemble(
    record: NodeRecord,
    bindings: Vec<PropertyBinding>,
    supertags: Vec<SupertagRef>,
) -> AssembledNode {
    let mut properties: BTreeMap<String, Vec<AssembledProperty>> = BTreeMap::new();
    for binding in bindings {
        properties
            .entry(binding.field_name.clone())
            .or_default()
            .push(AssembledProperty {
                value: binding.value,
                order: binding.order,
                field_system_id: binding.field_system_id,
                field_name: binding.field_name,
            });
    }

    AssembledNode {
        id: record.id,
        content: record.content,
        created_at: record.created_at,
        updated_at: record.updated_at,
        deleted_at: record.deleted_at,
        properties,
        supertags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PropertyValue;
    use chrono::Utc;

    fn record(id: &str) -> NodeRecord {
        let now = Utc::now();
        NodeRecord {
            id: id.to_string(),
            content: Some("content".to_string()),
            content_plain: Some("content".to_string()),
            system_id: None,
            owner_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn binding(field_system_id: &str, field_name: &str, value: &str, order: i64) -> PropertyBinding {
        PropertyBinding {
            field_node_id: format!("field-{field_system_id}"),
            field_system_id: field_system_id.to_string(),
            field_name: field_name.to_string(),
            value: PropertyValue::Text(value.to_string()),
            order,
        }
    }

    #[test]
    fn test_groups_by_field_display_name() {
        let assembled = assemble(
            record("n1"),
            vec![
                binding("SYS.alias", "Alias", "rg", 0),
                binding("SYS.alias", "Alias", "ripgrep", 1),
                binding("SYS.status", "Status", "active", 0),
            ],
            Vec::new(),
        );

        assert_eq!(assembled.properties.len(), 2);
        let aliases = &assembled.properties["Alias"];
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases[0].value, PropertyValue::Text("rg".to_string()));
        assert_eq!(aliases[1].value, PropertyValue::Text("ripgrep".to_string()));
        assert_eq!(assembled.properties["Status"].len(), 1);
    }

    #[test]
    fn test_zero_properties_yields_empty_map() {
        let assembled = assemble(record("n1"), Vec::new(), Vec::new());
        assert!(assembled.properties.is_empty());
        assert!(assembled.supertags.is_empty());
    }

    #[test]
    fn test_supertags_pass_through_in_order() {
        let tags = vec![
            SupertagRef {
                system_id: "SYS.item".to_string(),
                content: "Item".to_string(),
                order: 0,
            },
            SupertagRef {
                system_id: "SYS.tool".to_string(),
                content: "Tool".to_string(),
                order: 1,
            },
        ];
        let assembled = assemble(record("n1"), Vec::new(), tags.clone());
        assert_eq!(assembled.supertags, tags);
    }
}
