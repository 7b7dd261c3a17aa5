//! Toolspace Core Graph Storage Layer
//!
//! This crate provides the node/property-graph storage abstraction behind
//! the Toolspace dashboard: typed entities ("nodes") with dynamic,
//! multi-valued properties ("fields") and a tag-based classification system
//! ("supertags") with single-chain inheritance.
//!
//! # Architecture
//!
//! - **One contract, two engines**: the [`db::NodeStore`] trait is
//!   implemented by a flat relational backend (libsql) and a graph-native
//!   backend (SurrealDB); both must produce behaviorally identical results.
//! - **Derived read-model**: every read assembles nodes from raw rows/edges;
//!   nothing is cached at the adapter layer.
//! - **Synchronous mutation events**: each successful write emits on an
//!   injected [`db::MutationBus`] for live views and cache invalidation.
//! - **Facade selection**: [`services::StoreService`] picks the backend from
//!   configuration and fails fast before initialization.
//!
//! # Modules
//!
//! - [`models`] - Records, schema metadata and the `AssembledNode` read-model
//! - [`db`] - Store contract, both engine adapters, assembler, inheritance
//!   resolver, event bus
//! - [`services`] - Query evaluator and the backend-selection facade

pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use db::*;
pub use models::*;
pub use services::*;
