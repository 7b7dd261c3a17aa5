//! Event Emission Tests
//!
//! Verifies that every successful write emits exactly its specified events,
//! in order, after the write - and that no-ops and generic relations emit
//! nothing. Runs against both backends since each adapter owns its emission
//! call sites.

use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use toolspace_core::db::{
    MutationBus, MutationEvent, NodeStore, RelationalStore, SurrealStore,
};
use toolspace_core::models::{CreateNodeOptions, PropertyValue, RelationKind, SupertagSpec, ValueType};

const BACKENDS: [&str; 2] = ["relational", "graph"];

async fn store_with_bus(
    temp: &TempDir,
    kind: &str,
) -> anyhow::Result<(Arc<dyn NodeStore>, Arc<MutationBus>)> {
    let bus = Arc::new(MutationBus::new());
    let store: Arc<dyn NodeStore> = match kind {
        "relational" => Arc::new(
            RelationalStore::new(temp.path().join(format!("{kind}.db")), Arc::clone(&bus)).await?,
        ),
        _ => Arc::new(
            SurrealStore::new(temp.path().join(format!("{kind}.db")), Arc::clone(&bus)).await?,
        ),
    };
    Ok((store, bus))
}

/// Collect every event the bus delivers from this point on.
fn recorder(bus: &MutationBus) -> Arc<Mutex<Vec<MutationEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

fn event_types(events: &Arc<Mutex<Vec<MutationEvent>>>) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(|e| e.event_type()).collect()
}

#[tokio::test]
async fn test_create_with_supertag_emits_created_then_added() -> anyhow::Result<()> {
    for kind in BACKENDS {
        let temp = TempDir::new()?;
        let (store, bus) = store_with_bus(&temp, kind).await?;
        store
            .create_supertag(SupertagSpec {
                system_id: "SYS.tool".to_string(),
                name: "Tool".to_string(),
                ..Default::default()
            })
            .await?;

        let events = recorder(&bus);
        let id = store
            .create_node(CreateNodeOptions {
                content: Some("X".to_string()),
                supertag_id: Some("SYS.tool".to_string()),
                ..Default::default()
            })
            .await?;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2, "{kind}: exactly two events");
        match &events[0] {
            MutationEvent::NodeCreated { node_id, after, .. } => {
                assert_eq!(node_id, &id, "{kind}");
                assert_eq!(after.as_deref(), Some("X"), "{kind}");
            }
            other => panic!("{kind}: expected node:created first, got {:?}", other),
        }
        match &events[1] {
            MutationEvent::SupertagAdded {
                node_id,
                supertag_system_id,
                ..
            } => {
                assert_eq!(node_id, &id, "{kind}: same node id on both events");
                assert_eq!(supertag_system_id, "SYS.tool", "{kind}");
            }
            other => panic!("{kind}: expected supertag:added second, got {:?}", other),
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_update_carries_before_and_after() -> anyhow::Result<()> {
    for kind in BACKENDS {
        let temp = TempDir::new()?;
        let (store, bus) = store_with_bus(&temp, kind).await?;
        let id = store
            .create_node(CreateNodeOptions {
                content: Some("old".to_string()),
                ..Default::default()
            })
            .await?;

        let events = recorder(&bus);
        store.update_node_content(&id, "new").await?;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1, "{kind}");
        match &events[0] {
            MutationEvent::NodeUpdated {
                node_id,
                before,
                after,
                ..
            } => {
                assert_eq!(node_id, &id, "{kind}");
                assert_eq!(before.as_deref(), Some("old"), "{kind}");
                assert_eq!(after.as_deref(), Some("new"), "{kind}");
            }
            other => panic!("{kind}: expected node:updated, got {:?}", other),
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_emits_once_then_never_again() -> anyhow::Result<()> {
    for kind in BACKENDS {
        let temp = TempDir::new()?;
        let (store, bus) = store_with_bus(&temp, kind).await?;
        let id = store.create_node(CreateNodeOptions::default()).await?;

        let events = recorder(&bus);
        store.delete_node(&id).await?;
        store.delete_node(&id).await?;
        store.delete_node("never-existed").await?;

        assert_eq!(
            event_types(&events),
            vec!["node:deleted"],
            "{kind}: only the first effective delete emits"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_property_lifecycle_events() -> anyhow::Result<()> {
    for kind in BACKENDS {
        let temp = TempDir::new()?;
        let (store, bus) = store_with_bus(&temp, kind).await?;
        store
            .create_field("SYS.alias", "Alias", ValueType::Text)
            .await?;
        let id = store.create_node(CreateNodeOptions::default()).await?;

        let events = recorder(&bus);
        store
            .set_property(&id, "SYS.alias", PropertyValue::Text("rg".to_string()))
            .await?;
        store
            .add_property_value(&id, "SYS.alias", PropertyValue::Text("ripgrep".to_string()))
            .await?;
        store.clear_property(&id, "SYS.alias").await?;
        // Clearing an already-empty field is a silent no-op
        store.clear_property(&id, "SYS.alias").await?;

        assert_eq!(
            event_types(&events),
            vec!["property:set", "property:added", "property:removed"],
            "{kind}"
        );
        for event in events.lock().unwrap().iter() {
            assert_eq!(event.node_id(), id, "{kind}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_duplicate_membership_changes_emit_nothing() -> anyhow::Result<()> {
    for kind in BACKENDS {
        let temp = TempDir::new()?;
        let (store, bus) = store_with_bus(&temp, kind).await?;
        store
            .create_supertag(SupertagSpec {
                system_id: "SYS.item".to_string(),
                name: "Item".to_string(),
                ..Default::default()
            })
            .await?;
        let id = store.create_node(CreateNodeOptions::default()).await?;

        let events = recorder(&bus);
        assert!(store.add_node_supertag(&id, "SYS.item").await?);
        assert!(!store.add_node_supertag(&id, "SYS.item").await?);
        assert!(store.remove_node_supertag(&id, "SYS.item").await?);
        assert!(!store.remove_node_supertag(&id, "SYS.item").await?);

        assert_eq!(
            event_types(&events),
            vec!["supertag:added", "supertag:removed"],
            "{kind}: boolean no-ops emit nothing"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_generic_relations_never_emit() -> anyhow::Result<()> {
    for kind in BACKENDS {
        let temp = TempDir::new()?;
        let (store, bus) = store_with_bus(&temp, kind).await?;
        let a = store.create_node(CreateNodeOptions::default()).await?;
        let b = store.create_node(CreateNodeOptions::default()).await?;

        let events = recorder(&bus);
        for relation in [
            RelationKind::PartOf,
            RelationKind::References,
            RelationKind::DependencyOf,
            RelationKind::TaggedWith,
        ] {
            store.add_relation(&a, &b, relation).await?;
            store.remove_relation(&a, &b, relation).await?;
        }

        assert!(
            events.lock().unwrap().is_empty(),
            "{kind}: semantic relations are not membership changes"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_purge_emits_nothing() -> anyhow::Result<()> {
    for kind in BACKENDS {
        let temp = TempDir::new()?;
        let (store, bus) = store_with_bus(&temp, kind).await?;
        let id = store.create_node(CreateNodeOptions::default()).await?;

        let events = recorder(&bus);
        store.purge_node(&id).await?;
        assert!(
            events.lock().unwrap().is_empty(),
            "{kind}: the admin purge path bypasses the event bus"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_and_clear_stop_delivery() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let (store, bus) = store_with_bus(&temp, "relational").await?;

    let first = Arc::new(Mutex::new(0usize));
    let first_count = Arc::clone(&first);
    let subscription = bus.subscribe(move |_| *first_count.lock().unwrap() += 1);

    let second = Arc::new(Mutex::new(0usize));
    let second_count = Arc::clone(&second);
    bus.subscribe(move |_| *second_count.lock().unwrap() += 1);

    store.create_node(CreateNodeOptions::default()).await?;
    assert!(bus.unsubscribe(subscription));
    store.create_node(CreateNodeOptions::default()).await?;

    assert_eq!(*first.lock().unwrap(), 1);
    assert_eq!(*second.lock().unwrap(), 2);

    bus.clear();
    store.create_node(CreateNodeOptions::default()).await?;
    assert_eq!(*second.lock().unwrap(), 2, "cleared bus delivers nothing");
    Ok(())
}
