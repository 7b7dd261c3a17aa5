//! Storage Layer
//!
//! Everything below the service layer: the `NodeStore` contract, its two
//! engine implementations, the pure node assembler, the inheritance
//! resolver and the mutation event bus.
//!
//! # Architecture
//!
//! Two interchangeable backends implement the same contract:
//!
//! - [`RelationalStore`] - flat tables on embedded libsql
//! - [`SurrealStore`] - records and edges on embedded SurrealDB (RocksDB)
//!
//! The facade picks one at startup; everything above the contract is
//! backend-agnostic, and the parametric test suite in `tests/` holds both
//! implementations to identical observable behavior.

pub mod assembler;
mod error;
pub mod events;
pub mod inheritance;
mod node_store;
mod relational_store;
mod surreal_store;

pub use error::{StoreError, StoreResult};
pub use events::{MutationBus, MutationEvent, SubscriptionId};
pub use node_store::NodeStore;
pub use relational_store::RelationalStore;
pub use surreal_store::SurrealStore;
