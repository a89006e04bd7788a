//! Entity model and type-graph resolution.
//!
//! The planner only sees type descriptors ([`TypeRef`]) and the graph
//! returned by a [`TypeGraphProvider`]. [`Schema`] is the reference provider.

mod entity;
mod field;
mod graph;
mod relation;
mod schema;

pub use entity::{EntityDef, TypeInfo, TypeRef};
pub use field::{FieldDef, FieldShape};
pub use graph::{Link, TypeEdge, TypeGraph, TypeGraphProvider, TypeState};
pub use relation::{Cardinality, CollectionKind, RelationDef};
pub use schema::Schema;

pub(crate) use schema::join_path;
