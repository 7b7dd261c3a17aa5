//! Store Error Types
//!
//! One taxonomy shared by both storage backends and the facade. The core
//! never swallows errors: every failure surfaces to the caller, and the only
//! non-error "nothing happened" conditions are the boolean returns of the
//! membership/relation operations.

use thiserror::Error;

/// Errors surfaced by the node store contract.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A node id did not resolve where the caller expected existence
    #[error("node not found: {id}")]
    NodeNotFound { id: String },

    /// A field system id did not resolve (e.g. `set_property` on an
    /// unknown field)
    #[error("field not found: {system_id}")]
    FieldNotFound { system_id: String },

    /// A supertag system id did not resolve (e.g. `add_node_supertag`
    /// with an unknown tag)
    #[error("supertag not found: {system_id}")]
    SupertagNotFound { system_id: String },

    /// A unique `system_id` collided on create
    #[error("system id already in use: {system_id}")]
    DuplicateSystemId { system_id: String },

    /// The facade was used before `init()`/`init_with_backend()`
    #[error("store not initialized: call init() or init_with_backend() first")]
    NotInitialized,

    /// The backend selector carried an unknown value
    #[error("unknown storage backend '{value}': expected 'relational' or 'graph'")]
    InvalidBackend { value: String },

    /// Opaque failure from the underlying storage client, propagated
    /// unchanged with context
    #[error("storage engine error: {0}")]
    Engine(#[from] anyhow::Error),
}

impl StoreError {
    /// Create a node-not-found error
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    /// Create a field-not-found error
    pub fn field_not_found(system_id: impl Into<String>) -> Self {
        Self::FieldNotFound {
            system_id: system_id.into(),
        }
    }

    /// Create a supertag-not-found error
    pub fn supertag_not_found(system_id: impl Into<String>) -> Self {
        Self::SupertagNotFound {
            system_id: system_id.into(),
        }
    }

    /// Create a duplicate-system-id error
    pub fn duplicate_system_id(system_id: impl Into<String>) -> Self {
        Self::DuplicateSystemId {
            system_id: system_id.into(),
        }
    }

    /// Create an engine error with context
    pub fn engine(context: impl Into<String>) -> Self {
        Self::Engine(anyhow::anyhow!(context.into()))
    }
}

/// Result alias used across the storage layer.
pub type StoreResult<T> = Result<T, StoreError>;
