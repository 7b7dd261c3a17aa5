//! Store Service - Backend Selection Facade
//!
//! Thin stateless wrapper that picks one storage backend by configuration,
//! initializes it lazily on first `init()`, and delegates every contract
//! method. All calls fail fast with [`StoreError::NotInitialized`] before
//! initialization.
//!
//! The facade holds the single process-wide adapter instance; the mutation
//! bus is constructed at the composition root and handed in explicitly, so
//! neither the bus nor the adapter is ambient global state.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolspace_core::db::MutationBus;
//! use toolspace_core::models::CreateNodeOptions;
//! use toolspace_core::services::{StoreConfig, StoreService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = StoreService::new();
//!     let bus = Arc::new(MutationBus::new());
//!     service.init(&StoreConfig::from_env()?, bus).await?;
//!
//!     let id = service
//!         .create_node(CreateNodeOptions {
//!             content: Some("fd".to_string()),
//!             ..Default::default()
//!         })
//!         .await?;
//!     println!("created node {}", id);
//!     Ok(())
//! }
//! ```

use crate::db::{
    MutationBus, NodeStore, RelationalStore, StoreError, StoreResult, SurrealStore,
};
use crate::models::{
    AssembledNode, CreateNodeOptions, FieldDef, NodeRecord, PropertyBinding, PropertyValue,
    RelationKind, ResolvedFieldDefault, SupertagDef, SupertagRef, SupertagSpec, ValueType,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Environment variable naming the backend (`relational` or `graph`).
pub const BACKEND_ENV: &str = "TOOLSPACE_BACKEND";

/// Environment variable naming the database path.
pub const DB_PATH_ENV: &str = "TOOLSPACE_DB_PATH";

const DEFAULT_DB_PATH: &str = "./data/toolspace.db";

/// The two interchangeable storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Flat tables on embedded libsql
    Relational,
    /// Records and edges on embedded SurrealDB
    Graph,
}

impl BackendKind {
    /// Parse the configuration selector.
    pub fn parse(value: &str) -> StoreResult<Self> {
        match value {
            "relational" => Ok(BackendKind::Relational),
            "graph" => Ok(BackendKind::Graph),
            other => Err(StoreError::InvalidBackend {
                value: other.to_string(),
            }),
        }
    }

    /// Selector string for this backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Relational => "relational",
            BackendKind::Graph => "graph",
        }
    }
}

/// Store configuration: the backend selector is the only runtime flag that
/// affects the core.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub db_path: PathBuf,
}

impl StoreConfig {
    /// Read configuration from the environment, defaulting to the
    /// relational backend and `./data/toolspace.db`.
    pub fn from_env() -> StoreResult<Self> {
        let backend = match std::env::var(BACKEND_ENV) {
            Ok(value) => BackendKind::parse(&value)?,
            Err(_) => BackendKind::Relational,
        };
        let db_path = std::env::var(DB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
        Ok(Self { backend, db_path })
    }
}

/// Facade over the selected storage backend.
#[derive(Default)]
pub struct StoreService {
    store: OnceLock<Arc<dyn NodeStore>>,
}

impl StoreService {
    /// Create an uninitialized facade.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct and adopt the configured backend. Idempotent: later calls
    /// are no-ops once a backend is in place.
    pub async fn init(&self, config: &StoreConfig, bus: Arc<MutationBus>) -> StoreResult<()> {
        if self.store.get().is_some() {
            return Ok(());
        }

        tracing::info!(
            "initializing {} store at {}",
            config.backend.as_str(),
            config.db_path.display()
        );
        let store: Arc<dyn NodeStore> = match config.backend {
            BackendKind::Relational => {
                Arc::new(RelationalStore::new(config.db_path.clone(), bus).await?)
            }
            BackendKind::Graph => Arc::new(SurrealStore::new(config.db_path.clone(), bus).await?),
        };

        // A racing init may have won; first writer wins either way.
        let _ = self.store.set(store);
        Ok(())
    }

    /// Adopt an externally constructed backend (tests, embedded callers).
    /// Idempotent like `init`.
    pub fn init_with_backend(&self, store: Arc<dyn NodeStore>) {
        let _ = self.store.set(store);
    }

    /// Whether a backend has been adopted.
    pub fn is_initialized(&self) -> bool {
        self.store.get().is_some()
    }

    /// Shared handle to the adopted backend, for composing services
    /// (e.g. `QueryService`) on top of the same instance.
    pub fn backend(&self) -> StoreResult<Arc<dyn NodeStore>> {
        self.store
            .get()
            .cloned()
            .ok_or(StoreError::NotInitialized)
    }

    fn store(&self) -> StoreResult<&Arc<dyn NodeStore>> {
        self.store.get().ok_or(StoreError::NotInitialized)
    }

    //
    // Delegated contract methods
    //

    pub async fn create_node(&self, options: CreateNodeOptions) -> StoreResult<String> {
        self.store()?.create_node(options).await
    }

    pub async fn find_node_by_id(&self, id: &str) -> StoreResult<Option<NodeRecord>> {
        self.store()?.find_node_by_id(id).await
    }

    pub async fn find_node_by_system_id(
        &self,
        system_id: &str,
    ) -> StoreResult<Option<NodeRecord>> {
        self.store()?.find_node_by_system_id(system_id).await
    }

    pub async fn update_node_content(&self, id: &str, content: &str) -> StoreResult<()> {
        self.store()?.update_node_content(id, content).await
    }

    pub async fn delete_node(&self, id: &str) -> StoreResult<()> {
        self.store()?.delete_node(id).await
    }

    pub async fn purge_node(&self, id: &str) -> StoreResult<()> {
        self.store()?.purge_node(id).await
    }

    pub async fn list_nodes(&self, include_deleted: bool) -> StoreResult<Vec<NodeRecord>> {
        self.store()?.list_nodes(include_deleted).await
    }

    pub async fn search_nodes_by_content(
        &self,
        query: &str,
        case_sensitive: bool,
    ) -> StoreResult<Vec<NodeRecord>> {
        self.store()?
            .search_nodes_by_content(query, case_sensitive)
            .await
    }

    pub async fn assemble_node(&self, id: &str) -> StoreResult<Option<AssembledNode>> {
        self.store()?.assemble_node(id).await
    }

    pub async fn assemble_node_with_inheritance(
        &self,
        id: &str,
    ) -> StoreResult<Option<AssembledNode>> {
        self.store()?.assemble_node_with_inheritance(id).await
    }

    pub async fn get_property_bindings(&self, node_id: &str) -> StoreResult<Vec<PropertyBinding>> {
        self.store()?.get_property_bindings(node_id).await
    }

    pub async fn create_field(
        &self,
        system_id: &str,
        name: &str,
        value_type: ValueType,
    ) -> StoreResult<String> {
        self.store()?.create_field(system_id, name, value_type).await
    }

    pub async fn find_field_by_system_id(&self, system_id: &str) -> StoreResult<Option<FieldDef>> {
        self.store()?.find_field_by_system_id(system_id).await
    }

    pub async fn set_property(
        &self,
        node_id: &str,
        field_system_id: &str,
        value: PropertyValue,
    ) -> StoreResult<()> {
        self.store()?
            .set_property(node_id, field_system_id, value)
            .await
    }

    pub async fn add_property_value(
        &self,
        node_id: &str,
        field_system_id: &str,
        value: PropertyValue,
    ) -> StoreResult<()> {
        self.store()?
            .add_property_value(node_id, field_system_id, value)
            .await
    }

    pub async fn clear_property(&self, node_id: &str, field_system_id: &str) -> StoreResult<()> {
        self.store()?.clear_property(node_id, field_system_id).await
    }

    pub async fn link_nodes(
        &self,
        from_id: &str,
        field_system_id: &str,
        to_id: &str,
        append: bool,
    ) -> StoreResult<()> {
        self.store()?
            .link_nodes(from_id, field_system_id, to_id, append)
            .await
    }

    pub async fn create_supertag(&self, spec: SupertagSpec) -> StoreResult<String> {
        self.store()?.create_supertag(spec).await
    }

    pub async fn find_supertag_by_system_id(
        &self,
        system_id: &str,
    ) -> StoreResult<Option<SupertagDef>> {
        self.store()?.find_supertag_by_system_id(system_id).await
    }

    pub async fn list_supertags(&self) -> StoreResult<Vec<SupertagDef>> {
        self.store()?.list_supertags().await
    }

    pub async fn add_node_supertag(
        &self,
        node_id: &str,
        supertag_system_id: &str,
    ) -> StoreResult<bool> {
        self.store()?
            .add_node_supertag(node_id, supertag_system_id)
            .await
    }

    pub async fn remove_node_supertag(
        &self,
        node_id: &str,
        supertag_system_id: &str,
    ) -> StoreResult<bool> {
        self.store()?
            .remove_node_supertag(node_id, supertag_system_id)
            .await
    }

    pub async fn get_node_supertags(&self, node_id: &str) -> StoreResult<Vec<SupertagRef>> {
        self.store()?.get_node_supertags(node_id).await
    }

    pub async fn get_nodes_by_supertags(
        &self,
        supertag_system_ids: &[String],
        match_all: bool,
    ) -> StoreResult<Vec<NodeRecord>> {
        self.store()?
            .get_nodes_by_supertags(supertag_system_ids, match_all)
            .await
    }

    pub async fn get_nodes_by_supertag_with_inheritance(
        &self,
        supertag_system_id: &str,
    ) -> StoreResult<Vec<NodeRecord>> {
        self.store()?
            .get_nodes_by_supertag_with_inheritance(supertag_system_id)
            .await
    }

    pub async fn get_ancestor_supertags(
        &self,
        supertag_system_id: &str,
        max_depth: Option<usize>,
    ) -> StoreResult<Vec<SupertagDef>> {
        self.store()?
            .get_ancestor_supertags(supertag_system_id, max_depth)
            .await
    }

    pub async fn get_supertag_field_definitions(
        &self,
        supertag_system_id: &str,
    ) -> StoreResult<BTreeMap<String, ResolvedFieldDefault>> {
        self.store()?
            .get_supertag_field_definitions(supertag_system_id)
            .await
    }

    pub async fn add_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: RelationKind,
    ) -> StoreResult<bool> {
        self.store()?.add_relation(from_id, to_id, kind).await
    }

    pub async fn remove_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: RelationKind,
    ) -> StoreResult<bool> {
        self.store()?.remove_relation(from_id, to_id, kind).await
    }

    pub async fn get_outgoing_relations(
        &self,
        node_id: &str,
        kind: RelationKind,
    ) -> StoreResult<Vec<String>> {
        self.store()?.get_outgoing_relations(node_id, kind).await
    }

    pub async fn get_incoming_relations(
        &self,
        node_id: &str,
        kind: RelationKind,
    ) -> StoreResult<Vec<String>> {
        self.store()?.get_incoming_relations(node_id, kind).await
    }

    pub async fn save(&self) -> StoreResult<()> {
        self.store()?.save().await
    }

    pub async fn close(&self) -> StoreResult<()> {
        self.store()?.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(
            BackendKind::parse("relational").unwrap(),
            BackendKind::Relational
        );
        assert_eq!(BackendKind::parse("graph").unwrap(), BackendKind::Graph);
        match BackendKind::parse("postgres") {
            Err(StoreError::InvalidBackend { value }) => assert_eq!(value, "postgres"),
            other => panic!("expected InvalidBackend, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fails_fast_before_init() {
        let service = StoreService::new();
        match service.find_node_by_id("any").await {
            Err(StoreError::NotInitialized) => {}
            other => panic!("expected NotInitialized, got {:?}", other.map(|_| ())),
        }
        assert!(!service.is_initialized());
    }

    #[tokio::test]
    async fn test_init_is_idempotent() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let service = StoreService::new();
        let bus = Arc::new(MutationBus::new());
        let config = StoreConfig {
            backend: BackendKind::Relational,
            db_path: temp_dir.path().join("facade.db"),
        };

        service.init(&config, Arc::clone(&bus)).await?;
        let id = service.create_node(CreateNodeOptions::default()).await?;

        // Second init is a no-op; existing data stays reachable
        service.init(&config, bus).await?;
        assert!(service.find_node_by_id(&id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_init_with_backend_injection() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let bus = Arc::new(MutationBus::new());
        let store = Arc::new(
            RelationalStore::new(temp_dir.path().join("injected.db"), bus).await?,
        );

        let service = StoreService::new();
        service.init_with_backend(store);
        assert!(service.is_initialized());
        assert!(service.find_node_by_id("missing").await?.is_none());
        Ok(())
    }
}
