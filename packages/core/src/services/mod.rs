//! Service Layer
//!
//! Backend-agnostic services composed over the store contract: the query
//! evaluator and the backend-selection facade.

pub mod query_service;
pub mod store_service;

pub use query_service::{
    PropertyOp, QueryDefinition, QueryFilter, QueryResult, QueryService, DEFAULT_QUERY_LIMIT,
};
pub use store_service::{BackendKind, StoreConfig, StoreService, BACKEND_ENV, DB_PATH_ENV};
