//! Query Service Tests
//!
//! Filter composition, soft-delete exclusion, limit/count behavior and
//! determinism, run against both backends through the shared evaluator.

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use toolspace_core::db::{MutationBus, NodeStore, RelationalStore, SurrealStore};
use toolspace_core::models::{CreateNodeOptions, PropertyValue, SupertagSpec, ValueType};
use toolspace_core::services::{PropertyOp, QueryDefinition, QueryFilter, QueryService};

async fn backends(temp: &TempDir) -> anyhow::Result<Vec<(&'static str, Arc<dyn NodeStore>)>> {
    let relational: Arc<dyn NodeStore> = Arc::new(
        RelationalStore::new(temp.path().join("flat.db"), Arc::new(MutationBus::new())).await?,
    );
    let graph: Arc<dyn NodeStore> = Arc::new(
        SurrealStore::new(temp.path().join("graph.db"), Arc::new(MutationBus::new())).await?,
    );
    Ok(vec![("relational", relational), ("graph", graph)])
}

/// The 3-node fixture: Active Item [Item, active], Inactive Item
/// [Item, inactive], Active Command [Command, active].
async fn seed_fixture(store: &dyn NodeStore) -> anyhow::Result<()> {
    store
        .create_field("SYS.status", "Status", ValueType::Select)
        .await?;
    for (system_id, name) in [("SYS.item", "Item"), ("SYS.command", "Command")] {
        store
            .create_supertag(SupertagSpec {
                system_id: system_id.to_string(),
                name: name.to_string(),
                ..Default::default()
            })
            .await?;
    }

    for (content, tag, status) in [
        ("Active Item", "SYS.item", "active"),
        ("Inactive Item", "SYS.item", "inactive"),
        ("Active Command", "SYS.command", "active"),
    ] {
        let id = store
            .create_node(CreateNodeOptions {
                content: Some(content.to_string()),
                supertag_id: Some(tag.to_string()),
                ..Default::default()
            })
            .await?;
        store
            .set_property(&id, "SYS.status", PropertyValue::Text(status.to_string()))
            .await?;
    }
    Ok(())
}

fn supertag_filter(id: &str) -> QueryFilter {
    QueryFilter::Supertag {
        supertag_id: id.to_string(),
        include_inherited: false,
    }
}

fn status_filter(value: &str) -> QueryFilter {
    QueryFilter::Property {
        field_id: "SYS.status".to_string(),
        op: PropertyOp::Eq,
        value: json!(value),
    }
}

#[tokio::test]
async fn test_filters_are_and_combined() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    for (kind, store) in backends(&temp).await? {
        seed_fixture(store.as_ref()).await?;
        let service = QueryService::new(Arc::clone(&store));

        let result = service
            .evaluate(&QueryDefinition {
                filters: vec![supertag_filter("SYS.item"), status_filter("active")],
                limit: None,
            })
            .await?;

        let contents: Vec<&str> = result
            .nodes
            .iter()
            .filter_map(|n| n.content.as_deref())
            .collect();
        assert_eq!(contents, vec!["Active Item"], "{kind}");
        assert_eq!(result.total_count, 1, "{kind}");
    }
    Ok(())
}

#[tokio::test]
async fn test_soft_deleted_nodes_never_match() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    for (kind, store) in backends(&temp).await? {
        seed_fixture(store.as_ref()).await?;
        let service = QueryService::new(Arc::clone(&store));

        let before = service
            .evaluate(&QueryDefinition {
                filters: vec![supertag_filter("SYS.item")],
                limit: None,
            })
            .await?;
        assert_eq!(before.total_count, 2, "{kind}");

        let victim = before
            .nodes
            .iter()
            .find(|n| n.content.as_deref() == Some("Active Item"))
            .unwrap()
            .id
            .clone();
        store.delete_node(&victim).await?;

        let after = service
            .evaluate(&QueryDefinition {
                filters: vec![supertag_filter("SYS.item")],
                limit: None,
            })
            .await?;
        assert_eq!(after.total_count, 1, "{kind}");
        assert!(
            after.nodes.iter().all(|n| n.id != victim),
            "{kind}: deleted node excluded regardless of filters"
        );

        // Also excluded from an unfiltered scan
        let all = service
            .evaluate(&QueryDefinition {
                filters: Vec::new(),
                limit: None,
            })
            .await?;
        assert!(all.nodes.iter().all(|n| n.id != victim), "{kind}");
    }
    Ok(())
}

#[tokio::test]
async fn test_total_count_is_pre_limit() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    for (kind, store) in backends(&temp).await? {
        store
            .create_supertag(SupertagSpec {
                system_id: "SYS.item".to_string(),
                name: "Item".to_string(),
                ..Default::default()
            })
            .await?;
        for i in 0..5 {
            store
                .create_node(CreateNodeOptions {
                    content: Some(format!("Item {i}")),
                    supertag_id: Some("SYS.item".to_string()),
                    ..Default::default()
                })
                .await?;
        }

        let service = QueryService::new(Arc::clone(&store));
        let result = service
            .evaluate(&QueryDefinition {
                filters: vec![supertag_filter("SYS.item")],
                limit: Some(2),
            })
            .await?;

        assert_eq!(result.nodes.len(), 2, "{kind}: limit truncates the node list");
        assert_eq!(result.total_count, 5, "{kind}: count is taken before the limit");
    }
    Ok(())
}

#[tokio::test]
async fn test_content_filter_case_sensitivity() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    for (kind, store) in backends(&temp).await? {
        for content in ["Ripgrep Tool", "another tool", "unrelated"] {
            store
                .create_node(CreateNodeOptions {
                    content: Some(content.to_string()),
                    ..Default::default()
                })
                .await?;
        }
        let service = QueryService::new(Arc::clone(&store));

        let insensitive = service
            .evaluate(&QueryDefinition {
                filters: vec![QueryFilter::Content {
                    query: "TOOL".to_string(),
                    case_sensitive: false,
                }],
                limit: None,
            })
            .await?;
        assert_eq!(insensitive.total_count, 2, "{kind}");

        let sensitive = service
            .evaluate(&QueryDefinition {
                filters: vec![QueryFilter::Content {
                    query: "Tool".to_string(),
                    case_sensitive: true,
                }],
                limit: None,
            })
            .await?;
        assert_eq!(sensitive.total_count, 1, "{kind}");
        assert_eq!(
            sensitive.nodes[0].content.as_deref(),
            Some("Ripgrep Tool"),
            "{kind}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_has_field_existence_and_negation() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    for (kind, store) in backends(&temp).await? {
        store
            .create_field("SYS.notes", "Notes", ValueType::Text)
            .await?;

        let with_notes = store
            .create_node(CreateNodeOptions {
                content: Some("documented".to_string()),
                ..Default::default()
            })
            .await?;
        store
            .set_property(&with_notes, "SYS.notes", PropertyValue::Text("n".to_string()))
            .await?;
        let without_notes = store
            .create_node(CreateNodeOptions {
                content: Some("bare".to_string()),
                ..Default::default()
            })
            .await?;

        let service = QueryService::new(Arc::clone(&store));

        let has = service
            .evaluate(&QueryDefinition {
                filters: vec![QueryFilter::HasField {
                    field_id: "SYS.notes".to_string(),
                    negate: false,
                }],
                limit: None,
            })
            .await?;
        assert_eq!(has.total_count, 1, "{kind}");
        assert_eq!(has.nodes[0].id, with_notes, "{kind}");

        let lacks = service
            .evaluate(&QueryDefinition {
                filters: vec![QueryFilter::HasField {
                    field_id: "SYS.notes".to_string(),
                    negate: true,
                }],
                limit: None,
            })
            .await?;
        assert_eq!(lacks.total_count, 1, "{kind}");
        assert_eq!(lacks.nodes[0].id, without_notes, "{kind}");
    }
    Ok(())
}

#[tokio::test]
async fn test_unknown_supertag_yields_empty_result() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    for (kind, store) in backends(&temp).await? {
        store.create_node(CreateNodeOptions::default()).await?;
        let service = QueryService::new(Arc::clone(&store));

        for include_inherited in [false, true] {
            let result = service
                .evaluate(&QueryDefinition {
                    filters: vec![QueryFilter::Supertag {
                        supertag_id: "SYS.ghost".to_string(),
                        include_inherited,
                    }],
                    limit: None,
                })
                .await?;
            assert_eq!(result.total_count, 0, "{kind}");
            assert!(result.nodes.is_empty(), "{kind}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_inherited_supertag_filter() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    for (kind, store) in backends(&temp).await? {
        for (system_id, name, extends) in [
            ("SYS.item", "Item", None),
            ("SYS.tool", "Tool", Some("SYS.item")),
        ] {
            store
                .create_supertag(SupertagSpec {
                    system_id: system_id.to_string(),
                    name: name.to_string(),
                    extends: extends.map(|s: &str| s.to_string()),
                    field_schema: Vec::new(),
                })
                .await?;
        }
        store
            .create_node(CreateNodeOptions {
                content: Some("Tagged as tool".to_string()),
                supertag_id: Some("SYS.tool".to_string()),
                ..Default::default()
            })
            .await?;

        let service = QueryService::new(Arc::clone(&store));

        let literal = service
            .evaluate(&QueryDefinition {
                filters: vec![supertag_filter("SYS.item")],
                limit: None,
            })
            .await?;
        assert_eq!(literal.total_count, 0, "{kind}: literal match misses the subtype");

        let inherited = service
            .evaluate(&QueryDefinition {
                filters: vec![QueryFilter::Supertag {
                    supertag_id: "SYS.item".to_string(),
                    include_inherited: true,
                }],
                limit: None,
            })
            .await?;
        assert_eq!(inherited.total_count, 1, "{kind}: is-a match finds it");
    }
    Ok(())
}

#[tokio::test]
async fn test_evaluation_is_deterministic() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    for (kind, store) in backends(&temp).await? {
        seed_fixture(store.as_ref()).await?;
        let service = QueryService::new(Arc::clone(&store));

        let query = QueryDefinition {
            filters: vec![status_filter("active")],
            limit: Some(10),
        };
        let first = service.evaluate(&query).await?;
        let second = service.evaluate(&query).await?;

        let first_ids: Vec<&str> = first.nodes.iter().map(|n| n.id.as_str()).collect();
        let second_ids: Vec<&str> = second.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(first_ids, second_ids, "{kind}");
        assert_eq!(first.total_count, second.total_count, "{kind}");
    }
    Ok(())
}
