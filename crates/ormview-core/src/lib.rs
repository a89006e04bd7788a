//! ORMVIEW Core - view planning, split-query dispatch, and object graph
//! reconstitution.
//!
//! A [`View`] names an entity and the dotted attribute paths to fetch. The
//! planner turns it into an [`AggregateTree`] of query trees, splitting
//! independent to-many collections and subtype-specific data into separate
//! queries correlated by identifier. Dispatchers run those queries against a
//! [`SessionFactory`] and the reconstitutor stitches the rows back into one
//! object graph.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod plan;
pub mod resolve;
pub mod store;
pub mod value;

pub use catalog::{
    Cardinality, CollectionKind, EntityDef, FieldDef, Link, RelationDef, Schema, TypeGraph,
    TypeGraphProvider, TypeRef,
};
pub use dispatch::{
    BranchFailure, Correlation, DispatchConfig, DispatchMode, DispatchReport, Dispatcher,
    ParallelDispatcher, SerialDispatcher, Session, SessionFactory, SideTables,
};
pub use error::Error;
pub use fetch::{FetchConfig, FetchResult, Fetcher};
pub use plan::{
    AggregateTree, CustomQuery, InterKind, PlanCache, PlanConfig, PlanExplain, Planner,
    QuerySynthesizer, QueryTree, SplitStrategy, TreeId, View,
};
pub use resolve::{
    GraphFactory, Node, NodeRef, ObjectFactory, QueryTreeInvocation, ResolutionMode, TreeState,
};
pub use store::{MemorySession, MemoryStore};
pub use value::{Key, Row, Value};
