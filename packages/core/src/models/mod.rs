//! Data structures for the Toolspace graph store.
//!
//! Raw persistence records (`NodeRecord`, `PropertyBinding`), schema metadata
//! (`FieldDef`, `SupertagDef`) and the derived read-model (`AssembledNode`)
//! shared by every storage backend.

pub mod node;
pub mod schema;
pub mod value;

pub use node::{
    AssembledNode, AssembledProperty, CreateNodeOptions, NodeRecord, PropertyBinding, SupertagRef,
};
pub use schema::{
    FieldDef, FieldDefault, RelationKind, ResolvedFieldDefault, SupertagDef, SupertagSpec,
};
pub use value::{PropertyValue, ValueType};
