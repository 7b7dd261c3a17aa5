//! Mutation Events
//!
//! This module defines the mutation events emitted by the storage backends
//! after every successful write, and the synchronous in-process bus carrying
//! them. Downstream layers (live views, cache invalidation) subscribe to stay
//! in sync without coupling to a backend implementation.
//!
//! # Architecture
//!
//! The bus is an explicit, constructed instance injected into each adapter at
//! the composition root - never ambient global state. Subscribers run inline
//! on the writer's call path, in registration order, after the underlying
//! write commits. There is no persistence or replay: subscribers present at
//! emission time are the only recipients.
//!
//! # Emission rules
//!
//! - Compound `create_node` with a supertag emits `node:created` first, then
//!   `supertag:added`, both carrying the same node id.
//! - Only `has_supertag` membership changes emit supertag events; generic
//!   semantic relations (`part_of`, `references`, `dependency_of`,
//!   `tagged_with`) never do.
//! - Idempotent no-ops (duplicate tag, absent removal, delete of an already
//!   deleted node, clear of an empty field) emit nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A structured notification describing one committed write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum MutationEvent {
    /// A node was created
    #[serde(rename = "node:created")]
    NodeCreated {
        node_id: String,
        after: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A node's content changed
    #[serde(rename = "node:updated")]
    NodeUpdated {
        node_id: String,
        before: Option<String>,
        after: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A node was soft-deleted
    #[serde(rename = "node:deleted")]
    NodeDeleted {
        node_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A field's value list was replaced
    #[serde(rename = "property:set")]
    PropertySet {
        node_id: String,
        field_system_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A value was appended to a field's value list
    #[serde(rename = "property:added")]
    PropertyAdded {
        node_id: String,
        field_system_id: String,
        timestamp: DateTime<Utc>,
    },

    /// All values of a field were removed
    #[serde(rename = "property:removed")]
    PropertyRemoved {
        node_id: String,
        field_system_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A supertag membership was established
    #[serde(rename = "supertag:added")]
    SupertagAdded {
        node_id: String,
        supertag_system_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A supertag membership was removed
    #[serde(rename = "supertag:removed")]
    SupertagRemoved {
        node_id: String,
        supertag_system_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl MutationEvent {
    /// Wire name of the event kind.
    pub fn event_type(&self) -> &'static str {
        match self {
            MutationEvent::NodeCreated { .. } => "node:created",
            MutationEvent::NodeUpdated { .. } => "node:updated",
            MutationEvent::NodeDeleted { .. } => "node:deleted",
            MutationEvent::PropertySet { .. } => "property:set",
            MutationEvent::PropertyAdded { .. } => "property:added",
            MutationEvent::PropertyRemoved { .. } => "property:removed",
            MutationEvent::SupertagAdded { .. } => "supertag:added",
            MutationEvent::SupertagRemoved { .. } => "supertag:removed",
        }
    }

    /// Id of the node the event concerns.
    pub fn node_id(&self) -> &str {
        match self {
            MutationEvent::NodeCreated { node_id, .. }
            | MutationEvent::NodeUpdated { node_id, .. }
            | MutationEvent::NodeDeleted { node_id, .. }
            | MutationEvent::PropertySet { node_id, .. }
            | MutationEvent::PropertyAdded { node_id, .. }
            | MutationEvent::PropertyRemoved { node_id, .. }
            | MutationEvent::SupertagAdded { node_id, .. }
            | MutationEvent::SupertagRemoved { node_id, .. } => node_id,
        }
    }
}

type SubscriberFn = Arc<dyn Fn(&MutationEvent) + Send + Sync>;

/// Handle returned by [`MutationBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<(u64, SubscriberFn)>,
}

/// Synchronous in-process publish/subscribe channel for mutation events.
///
/// Subscribers are invoked in registration order for each emission. The lock
/// is released before callbacks run, so a subscriber may subscribe or
/// unsubscribe from within its own callback without deadlocking.
#[derive(Default)]
pub struct MutationBus {
    inner: Mutex<BusInner>,
}

impl MutationBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns the id needed to unsubscribe.
    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&MutationEvent) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(subscriber)));
        SubscriptionId(id)
    }

    /// Remove a subscriber; returns `false` if the id was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id.0);
        inner.subscribers.len() != before
    }

    /// Drop all subscribers (test/reset hook).
    pub fn clear(&self) {
        self.lock().subscribers.clear();
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Deliver an event to all current subscribers, in registration order.
    pub fn emit(&self, event: &MutationEvent) {
        let subscribers: Vec<SubscriberFn> = self
            .lock()
            .subscribers
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for subscriber in subscribers {
            subscriber(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_created(id: &str) -> MutationEvent {
        MutationEvent::NodeCreated {
            node_id: id.to_string(),
            after: Some("content".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_subscribers_invoked_in_registration_order() {
        let bus = MutationBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |_event| seen.lock().unwrap().push(tag));
        }

        bus.emit(&node_created("n1"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = MutationBus::new();
        let count = Arc::new(Mutex::new(0));

        let id = {
            let count = Arc::clone(&count);
            bus.subscribe(move |_event| *count.lock().unwrap() += 1)
        };

        bus.emit(&node_created("n1"));
        assert!(bus.unsubscribe(id));
        bus.emit(&node_created("n2"));

        assert_eq!(*count.lock().unwrap(), 1);
        // Second unsubscribe of the same id reports nothing removed
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_clear_removes_all_subscribers() {
        let bus = MutationBus::new();
        bus.subscribe(|_event| {});
        bus.subscribe(|_event| {});
        assert_eq!(bus.subscriber_count(), 2);

        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_type_wire_names() {
        let event = MutationEvent::SupertagAdded {
            node_id: "n1".to_string(),
            supertag_system_id: "SYS.tool".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_type(), "supertag:added");
        assert_eq!(event.node_id(), "n1");
    }

    /// Contract test: documents the exact JSON format consumers rely on.
    ///
    /// Serde's `#[serde(tag = "type")]` produces an INTERNALLY-TAGGED format
    /// where the discriminator is merged with the payload fields (NOT nested).
    #[test]
    fn test_event_serialization_contract() {
        let event = MutationEvent::PropertySet {
            node_id: "n1".to_string(),
            field_system_id: "SYS.status".to_string(),
            timestamp: Utc::now(),
        };

        let parsed: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();

        assert_eq!(parsed.get("type").unwrap(), "property:set");
        assert_eq!(parsed.get("nodeId").unwrap(), "n1");
        assert_eq!(parsed.get("fieldSystemId").unwrap(), "SYS.status");
        assert!(parsed.get("timestamp").is_some());
    }
}
