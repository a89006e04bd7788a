//! Per-fetch execution state.
//!
//! A [`QueryTreeInvocation`] is created for one execution of an aggregate
//! tree and shared by every dispatcher worker. It tracks tree states, the
//! correlation identifiers each parent produced for each outgoing edge, the
//! row deltas awaiting reconstitution, and the identity map.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::plan::{AggregateTree, InterEdgeId, TreeId};
use crate::value::{Key, Row};

use super::identity::IdentityMap;
use super::row_diff::{RowDelta, RowDiffer};

static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

/// Dispatch state of one query tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeState {
    /// Not started.
    Pending,
    /// Query running.
    Running,
    /// Query ran and its rows were accepted.
    Completed,
    /// Not run: an ancestor produced no correlation identifiers or failed.
    Skipped,
    /// The query or its post actions failed.
    Failed,
}

impl fmt::Display for TreeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TreeState::Pending => "PENDING",
            TreeState::Running => "RUNNING",
            TreeState::Completed => "COMPLETED",
            TreeState::Skipped => "SKIPPED",
            TreeState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Ordered set of correlation identifiers.
#[derive(Debug, Default, Clone)]
struct IdSet {
    seen: HashSet<Key>,
    ordered: Vec<Key>,
}

impl IdSet {
    fn insert(&mut self, key: Key) {
        if self.seen.insert(key.clone()) {
            self.ordered.push(key);
        }
    }
}

/// Shared state of one aggregate-tree execution.
pub struct QueryTreeInvocation<O> {
    invocation_ids: HashMap<TreeId, u64>,
    states: DashMap<TreeId, TreeState>,
    executions: DashMap<TreeId, usize>,
    id_sets: DashMap<InterEdgeId, IdSet>,
    differs: DashMap<TreeId, RowDiffer>,
    deltas: DashMap<TreeId, Vec<RowDelta>>,
    identity: IdentityMap<O>,
}

impl<O: Clone> QueryTreeInvocation<O> {
    /// Create the state for executing `aggregate`. Every tree starts pending
    /// and receives a unique invocation id.
    pub fn new(aggregate: &AggregateTree) -> Self {
        let states = DashMap::new();
        let mut invocation_ids = HashMap::new();
        for tree in aggregate.tree_ids() {
            states.insert(tree, TreeState::Pending);
            invocation_ids.insert(tree, NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed));
        }
        Self {
            invocation_ids,
            states,
            executions: DashMap::new(),
            id_sets: DashMap::new(),
            differs: DashMap::new(),
            deltas: DashMap::new(),
            identity: IdentityMap::new(aggregate.resolution()),
        }
    }

    /// Invocation id of a tree, used to tag join side-table rows.
    pub fn invocation_id(&self, tree: TreeId) -> u64 {
        self.invocation_ids.get(&tree).copied().unwrap_or(0)
    }

    /// Current state of a tree.
    pub fn state(&self, tree: TreeId) -> TreeState {
        self.states
            .get(&tree)
            .map(|s| *s)
            .unwrap_or(TreeState::Pending)
    }

    /// Set the state of a tree.
    pub fn set_state(&self, tree: TreeId, state: TreeState) {
        self.states.insert(tree, state);
    }

    /// Snapshot of every tree's state.
    pub fn states(&self) -> BTreeMap<TreeId, TreeState> {
        self.states.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    /// Mark `tree` and all its descendants skipped. Returns how many trees
    /// were marked.
    pub fn skip_subtree(&self, aggregate: &AggregateTree, tree: TreeId) -> usize {
        let descendants = aggregate.descendants(tree);
        self.set_state(tree, TreeState::Skipped);
        for child in &descendants {
            self.set_state(*child, TreeState::Skipped);
        }
        1 + descendants.len()
    }

    /// Count one query execution of `tree`.
    pub fn record_execution(&self, tree: TreeId) {
        *self.executions.entry(tree).or_insert(0) += 1;
    }

    /// Query executions per tree.
    pub fn executions(&self) -> BTreeMap<TreeId, usize> {
        self.executions.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    /// Correlation identifiers the parent of `edge` produced, in first-seen order.
    pub fn ids_for(&self, edge: InterEdgeId) -> Vec<Key> {
        self.id_sets
            .get(&edge)
            .map(|set| set.ordered.clone())
            .unwrap_or_default()
    }

    /// Feed result rows of `tree` through its row differ, recording deltas
    /// and the correlation identifiers seen on every outgoing edge.
    pub fn accept_rows(&self, aggregate: &AggregateTree, tree: TreeId, rows: Vec<Row>) -> usize {
        let listeners: Vec<(InterEdgeId, usize)> = aggregate
            .out_edges(tree)
            .into_iter()
            .filter_map(|edge| aggregate.correlation_position(edge).map(|p| (edge, p)))
            .collect();

        let count = rows.len();
        let mut differ = self
            .differs
            .entry(tree)
            .or_insert_with(|| RowDiffer::new(tree.to_string(), aggregate.tree(tree).fields()));
        let mut accepted = Vec::with_capacity(count);

        for row in rows {
            for &(edge, position) in &listeners {
                if let Some(key) = row.get(position).and_then(|v| v.as_key()) {
                    self.id_sets.entry(edge).or_default().insert(key);
                }
            }
            accepted.push(differ.diff(row));
        }
        drop(differ);

        self.deltas.entry(tree).or_default().extend(accepted);
        count
    }

    /// Number of rows accepted for `tree`.
    pub fn row_count(&self, tree: TreeId) -> usize {
        self.deltas.get(&tree).map(|d| d.len()).unwrap_or(0)
    }

    /// Remove and return the accumulated deltas of `tree`.
    pub fn take_deltas(&self, tree: TreeId) -> Vec<RowDelta> {
        self.deltas.remove(&tree).map(|(_, d)| d).unwrap_or_default()
    }

    /// Identity map shared by every tree of this invocation.
    pub fn identity(&self) -> &IdentityMap<O> {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, RelationDef, Schema};
    use crate::plan::{PlanBuilder, View};
    use crate::resolve::ResolutionMode;
    use crate::value::Value;

    fn plan() -> AggregateTree {
        let schema = Schema::new(1)
            .with_entity(EntityDef::new("User", "id").with_scalars(["id", "name"]))
            .with_entity(EntityDef::new("Post", "id").with_scalars(["id", "title"]))
            .with_relation(RelationDef::one_to_many("posts", "User", "Post"));
        let view = View::new("User")
            .with_paths(["name", "posts"])
            .with_subview("posts", View::new("Post").with_paths(["title"]));
        let mut agg = PlanBuilder::new(&schema)
            .build(&view, ResolutionMode::Shared)
            .unwrap();
        agg.resolve_fields();
        agg
    }

    #[test]
    fn test_accept_rows_collects_correlation_ids() {
        let agg = plan();
        let invocation: QueryTreeInvocation<()> = QueryTreeInvocation::new(&agg);
        let rows = vec![
            vec![Value::Int(1), Value::from("a"), Value::Int(10)],
            vec![Value::Int(1), Value::from("a"), Value::Int(11)],
            vec![Value::Int(2), Value::from("b"), Value::Null],
            vec![Value::Int(3), Value::from("c"), Value::Int(10)],
        ];
        assert_eq!(invocation.accept_rows(&agg, TreeId(0), rows), 4);

        let edge = agg.out_edges(TreeId(0))[0];
        assert_eq!(invocation.ids_for(edge), vec![Key::Int(10), Key::Int(11)]);
        assert_eq!(invocation.row_count(TreeId(0)), 4);

        let deltas = invocation.take_deltas(TreeId(0));
        assert_eq!(deltas[1].prefix, "posts");
        assert_eq!(invocation.row_count(TreeId(0)), 0);
    }

    #[test]
    fn test_states_and_skip() {
        let agg = plan();
        let invocation: QueryTreeInvocation<()> = QueryTreeInvocation::new(&agg);
        assert_eq!(invocation.state(TreeId(1)), TreeState::Pending);
        assert_ne!(invocation.invocation_id(TreeId(0)), invocation.invocation_id(TreeId(1)));

        assert_eq!(invocation.skip_subtree(&agg, TreeId(0)), 2);
        assert_eq!(invocation.state(TreeId(1)), TreeState::Skipped);
        assert_eq!(TreeState::Skipped.to_string(), "SKIPPED");
    }
}
