//! NodeStore Trait - Storage Engine Abstraction
//!
//! This module defines the `NodeStore` trait that abstracts node, field and
//! supertag persistence. The trait enables two interchangeable backend
//! implementations (libsql relational-flat, SurrealDB graph-native) behind
//! one contract, selected at startup by the facade.
//!
//! # Architecture
//!
//! - **Abstraction point**: between the facade/services and the engine
//!   implementation. Business code never sees SQL or SurrealQL.
//! - **Cross-backend equivalence**: identical operation sequences must yield
//!   `AssembledNode`s with equal `content`, `properties` and `supertags`
//!   across both backends (ids and timestamps excluded - formats differ).
//! - **Inheritance resolution**: the `*_with_inheritance` operations and the
//!   ancestor walks are provided methods built on the required primitives,
//!   so there is exactly one resolver implementation shared by all engines.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: all methods are async to cover both the embedded
//!    libsql engine and the RocksDB-backed SurrealDB engine.
//! 2. **System-id addressing**: fields and supertags are addressed by their
//!    stable `system_id`, never by raw record ids, so callers stay portable
//!    across backends.
//! 3. **Error handling**: typed [`crate::db::StoreError`] taxonomy; opaque
//!    engine failures travel in `StoreError::Engine` unchanged.
//! 4. **No internal coordination**: each operation is a single request
//!    against the engine; read-modify-write races (e.g. computing the next
//!    value `order`) are delegated to external serialization.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use toolspace_core::db::{MutationBus, NodeStore, RelationalStore};
//! use toolspace_core::models::CreateNodeOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Arc::new(MutationBus::new());
//!     let store: Arc<dyn NodeStore> =
//!         Arc::new(RelationalStore::new(PathBuf::from("./data/toolspace.db"), bus).await?);
//!
//!     let node_id = store
//!         .create_node(CreateNodeOptions {
//!             content: Some("ripgrep".to_string()),
//!             ..Default::default()
//!         })
//!         .await?;
//!     let assembled = store.assemble_node(&node_id).await?;
//!     println!("created {:?}", assembled.map(|n| n.content));
//!     Ok(())
//! }
//! ```

use crate::db::error::StoreResult;
use crate::db::inheritance;
use crate::models::{
    AssembledNode, CreateNodeOptions, FieldDef, NodeRecord, PropertyBinding, PropertyValue,
    RelationKind, ResolvedFieldDefault, SupertagDef, SupertagRef, SupertagSpec, ValueType,
};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Abstraction layer for node, field and supertag persistence.
///
/// Implementations must be `Send + Sync` so the single process-wide adapter
/// instance can be shared across async tasks.
#[async_trait]
pub trait NodeStore: Send + Sync {
    //
    // NODE OPERATIONS
    //

    /// Create a new node and return its id.
    ///
    /// When `options.supertag_id` is present the membership is established as
    /// part of the call: the supertag is resolved BEFORE any write (so an
    /// unknown tag fails the whole operation), and the events fire in order
    /// `node:created` then `supertag:added`.
    ///
    /// # Errors
    ///
    /// - `DuplicateSystemId` if `options.system_id` collides
    /// - `SupertagNotFound` if `options.supertag_id` does not resolve
    async fn create_node(&self, options: CreateNodeOptions) -> StoreResult<String>;

    /// Get the raw record by id. Does NOT filter on `deleted_at`; callers
    /// needing "active only" use [`NodeStore::assemble_node`].
    async fn find_node_by_id(&self, id: &str) -> StoreResult<Option<NodeRecord>>;

    /// Get the raw record by stable system id. Does NOT filter on
    /// `deleted_at`.
    async fn find_node_by_system_id(&self, system_id: &str) -> StoreResult<Option<NodeRecord>>;

    /// Replace a node's display content (refreshes the lowercased search
    /// copy and `updated_at`). Emits `node:updated` with before/after values.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` if the node does not exist.
    async fn update_node_content(&self, id: &str, content: &str) -> StoreResult<()>;

    /// Soft-delete a node by stamping `deleted_at`. Idempotent: deleting a
    /// missing or already-deleted node succeeds silently and emits nothing;
    /// the first effective delete emits `node:deleted`.
    async fn delete_node(&self, id: &str) -> StoreResult<()>;

    /// Hard-delete a node, its property bindings and its relations in both
    /// directions. Admin cleanup path: bypasses the soft-delete filter and
    /// emits no events. Idempotent.
    async fn purge_node(&self, id: &str) -> StoreResult<()>;

    /// All node records ordered by id, optionally including soft-deleted
    /// ones. Primitive for the query evaluator.
    async fn list_nodes(&self, include_deleted: bool) -> StoreResult<Vec<NodeRecord>>;

    /// Substring search over node content. Case-insensitive matches run
    /// against the maintained lowercase copy. Soft-deleted nodes excluded.
    async fn search_nodes_by_content(
        &self,
        query: &str,
        case_sensitive: bool,
    ) -> StoreResult<Vec<NodeRecord>>;

    //
    // ASSEMBLY
    //

    /// Materialize the full read-model for a node.
    ///
    /// Returns `None` for missing AND for soft-deleted nodes. Rebuilt on
    /// every call; adapters never cache assembled nodes.
    async fn assemble_node(&self, id: &str) -> StoreResult<Option<AssembledNode>>;

    /// All property bindings of a node, joined with their field definitions,
    /// ordered by field name then value order.
    async fn get_property_bindings(&self, node_id: &str) -> StoreResult<Vec<PropertyBinding>>;

    //
    // FIELD & PROPERTY OPERATIONS
    //

    /// Create a field definition and return its record id.
    ///
    /// # Errors
    ///
    /// `DuplicateSystemId` if the system id is taken.
    async fn create_field(
        &self,
        system_id: &str,
        name: &str,
        value_type: ValueType,
    ) -> StoreResult<String>;

    /// Look up a field definition by system id.
    async fn find_field_by_system_id(&self, system_id: &str) -> StoreResult<Option<FieldDef>>;

    /// Full replace: discard every prior value of the field on this node and
    /// store the single new value at order 0. Emits `property:set`.
    ///
    /// # Errors
    ///
    /// `FieldNotFound` / `NodeNotFound`.
    async fn set_property(
        &self,
        node_id: &str,
        field_system_id: &str,
        value: PropertyValue,
    ) -> StoreResult<()>;

    /// Append a value after the field's current maximum order, preserving
    /// relative insertion order. Emits `property:added`.
    ///
    /// # Errors
    ///
    /// `FieldNotFound` / `NodeNotFound`.
    async fn add_property_value(
        &self,
        node_id: &str,
        field_system_id: &str,
        value: PropertyValue,
    ) -> StoreResult<()>;

    /// Remove every binding of the field on this node. Emits
    /// `property:removed` only when at least one binding existed.
    ///
    /// # Errors
    ///
    /// `FieldNotFound` / `NodeNotFound`.
    async fn clear_property(&self, node_id: &str, field_system_id: &str) -> StoreResult<()>;

    /// Store a node reference under the given field: `set_property` /
    /// `add_property_value` specialized to [`PropertyValue::NodeRef`].
    async fn link_nodes(
        &self,
        from_id: &str,
        field_system_id: &str,
        to_id: &str,
        append: bool,
    ) -> StoreResult<()> {
        let value = PropertyValue::NodeRef(to_id.to_string());
        if append {
            self.add_property_value(from_id, field_system_id, value)
                .await
        } else {
            self.set_property(from_id, field_system_id, value).await
        }
    }

    //
    // SUPERTAG OPERATIONS
    //

    /// Create a supertag definition and return its record id. The `extends`
    /// reference is not validated at creation time (bulk seeding may create
    /// children before parents); chain walks tolerate dangling parents.
    ///
    /// # Errors
    ///
    /// `DuplicateSystemId` if the system id is taken.
    async fn create_supertag(&self, spec: SupertagSpec) -> StoreResult<String>;

    /// Look up a supertag definition by system id.
    async fn find_supertag_by_system_id(
        &self,
        system_id: &str,
    ) -> StoreResult<Option<SupertagDef>>;

    /// All supertag definitions ordered by system id. Primitive for the
    /// inheritance resolver's descendant scans.
    async fn list_supertags(&self) -> StoreResult<Vec<SupertagDef>>;

    /// Establish a membership. Returns `false` (and emits nothing) when the
    /// node already holds the tag; emits `supertag:added` otherwise.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` / `SupertagNotFound`.
    async fn add_node_supertag(
        &self,
        node_id: &str,
        supertag_system_id: &str,
    ) -> StoreResult<bool>;

    /// Remove a membership. Returns `false` (and emits nothing) when absent,
    /// including when the supertag system id itself does not resolve; emits
    /// `supertag:removed` otherwise.
    async fn remove_node_supertag(
        &self,
        node_id: &str,
        supertag_system_id: &str,
    ) -> StoreResult<bool>;

    /// Memberships of a node in membership order.
    async fn get_node_supertags(&self, node_id: &str) -> StoreResult<Vec<SupertagRef>>;

    /// Active nodes holding any of the given supertags (OR semantics), or
    /// all of them when `match_all`. Soft-deleted nodes excluded; result
    /// ordered by node id.
    async fn get_nodes_by_supertags(
        &self,
        supertag_system_ids: &[String],
        match_all: bool,
    ) -> StoreResult<Vec<NodeRecord>>;

    //
    // GENERIC RELATIONS
    //

    /// Add a semantic relation between two nodes. Returns `false` on
    /// duplicate. Never emits events - only `has_supertag` membership
    /// changes (through the dedicated accessors above) do.
    async fn add_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: RelationKind,
    ) -> StoreResult<bool>;

    /// Remove a semantic relation. Returns `false` when absent. Never emits.
    async fn remove_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: RelationKind,
    ) -> StoreResult<bool>;

    /// Target ids of outgoing relations of the given kind, ordered.
    async fn get_outgoing_relations(
        &self,
        node_id: &str,
        kind: RelationKind,
    ) -> StoreResult<Vec<String>>;

    /// Source ids of incoming relations of the given kind, ordered.
    async fn get_incoming_relations(
        &self,
        node_id: &str,
        kind: RelationKind,
    ) -> StoreResult<Vec<String>>;

    //
    // INHERITANCE-AWARE OPERATIONS (provided)
    //
    // Implemented once over the required primitives so both backends share
    // the exact same resolution semantics.
    //

    /// Ancestors of a supertag, nearest first, following `extends` edges.
    ///
    /// The walk is bounded: a visited set breaks cycles, and `max_depth`
    /// defaults to [`inheritance::DEFAULT_MAX_DEPTH`] when `None`. A dangling
    /// `extends` reference terminates the walk silently.
    ///
    /// # Errors
    ///
    /// `SupertagNotFound` if the starting tag is unknown.
    async fn get_ancestor_supertags(
        &self,
        supertag_system_id: &str,
        max_depth: Option<usize>,
    ) -> StoreResult<Vec<SupertagDef>> {
        inheritance::ancestor_chain(self, supertag_system_id, max_depth).await
    }

    /// Field defaults merged across the tag's own schema and its ancestor
    /// chain, keyed by field system id. The closest definition in the chain
    /// wins; entries whose field does not resolve are skipped.
    async fn get_supertag_field_definitions(
        &self,
        supertag_system_id: &str,
    ) -> StoreResult<BTreeMap<String, ResolvedFieldDefault>> {
        inheritance::field_definitions(self, supertag_system_id).await
    }

    /// "Is-a" lookup: active nodes tagged with the given supertag or with
    /// any supertag whose ancestor chain includes it.
    async fn get_nodes_by_supertag_with_inheritance(
        &self,
        supertag_system_id: &str,
    ) -> StoreResult<Vec<NodeRecord>> {
        inheritance::nodes_with_inheritance(self, supertag_system_id).await
    }

    /// [`NodeStore::assemble_node`] plus inherited field defaults: for every
    /// resolved default whose field the node does not bind itself, the value
    /// is injected at order 0. The node's own value - even an empty string -
    /// always wins; the first membership supplying a default for a field
    /// wins over later memberships.
    async fn assemble_node_with_inheritance(
        &self,
        id: &str,
    ) -> StoreResult<Option<AssembledNode>> {
        inheritance::assemble_with_inheritance(self, id).await
    }

    //
    // LIFECYCLE
    //

    /// Durability hook: WAL checkpoint for the relational engine, safe no-op
    /// for engines that persist eagerly.
    async fn save(&self) -> StoreResult<()>;

    /// Flush and release engine resources on shutdown.
    async fn close(&self) -> StoreResult<()>;
}
