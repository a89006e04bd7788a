//! Query planning.
//!
//! A [`View`] is planned into an [`AggregateTree`]: a forest of
//! [`QueryTree`]s, each executable in one round trip, joined by inter-query
//! edges that carry identifiers from parent results into child queries.

mod aggregate;
mod builder;
mod cache;
mod counts;
mod explain;
mod fragment;
mod join_table;
mod planner;
mod split_anchor;
mod split_root;
mod split_subtype;
mod synthesis;
mod tree;
mod view;

pub use aggregate::{AggregateTree, InterEdge, InterEdgeId, InterKind, JoinMechanism, TreeId};
pub use builder::PlanBuilder;
pub use cache::{CacheStats, PlanCache, ViewFingerprint};
pub use counts::{branch_count, compute_collection_counts, needs_split};
pub use explain::{EdgeSummary, FragmentSummary, PlanExplain, TreeSummary};
pub use fragment::{FragmentId, IntraEdge, QueryFragment};
pub use join_table::JoinTableAmender;
pub use planner::{PlanConfig, Planner, SplitStrategy};
pub use split_anchor::SplitToAnchor;
pub use split_root::SplitToRoot;
pub use split_subtype::SplitSubtype;
pub use synthesis::{ExplainSynthesizer, QuerySynthesizer};
pub use tree::{ColumnKind, CustomQuery, PostAction, QueryField, QueryHandle, QueryTree};
pub use view::{SubView, View};
