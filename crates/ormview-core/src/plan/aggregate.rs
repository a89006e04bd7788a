//! Aggregate trees: forests of query trees joined by inter-query edges.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::error::Error;
use crate::resolve::ResolutionMode;

use super::fragment::FragmentId;
use super::tree::{PostAction, QueryTree};

/// Stable handle of a query tree inside an [`AggregateTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub(crate) usize);

impl TreeId {
    /// Arena index of the tree.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Stable handle of an inter-query edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterEdgeId(pub(crate) usize);

impl fmt::Display for InterEdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// What an inter-query edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterKind {
    /// The child fetches more data for entities produced by the parent.
    Association,
    /// The child fetches subtype-specific data for entities produced by the parent.
    Inheritance,
}

/// How a child query is restricted to its parent's identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinMechanism {
    /// Identifiers interpolated into the child query, in batches.
    InList,
    /// Identifiers copied into a shared side table keyed by invocation id.
    JoinTable {
        /// Side table name.
        table: String,
    },
    /// Child query re-selects the parent's identifiers as a correlated
    /// sub-query. Only valid within the session that ran the parent.
    Subquery,
}

/// Directed dependency between two query trees.
#[derive(Debug, Clone, PartialEq)]
pub struct InterEdge {
    /// Parent tree.
    pub from: TreeId,
    /// Child tree.
    pub to: TreeId,
    /// Relation name, for display only.
    pub name: String,
    /// Fragment in the parent whose identifiers correlate the child.
    pub source: FragmentId,
    /// Root fragment of the child, denoting the same entity as `source`.
    pub target: FragmentId,
    /// Edge kind.
    pub kind: InterKind,
    /// Column of a custom parent carrying the identifiers, when it is not the
    /// source fragment's own identifier column.
    pub source_column: Option<String>,
}

/// A forest of query trees; the unit of execution for one view fetch.
///
/// Cloning is deep: fragments, edges and actions are all owned, so a cached
/// plan can be copied for concurrent requests.
#[derive(Debug, Clone)]
pub struct AggregateTree {
    trees: Vec<QueryTree>,
    edges: Vec<InterEdge>,
    resolution: ResolutionMode,
}

impl AggregateTree {
    /// Create an empty aggregate tree.
    pub fn new(resolution: ResolutionMode) -> Self {
        Self {
            trees: Vec::new(),
            edges: Vec::new(),
            resolution,
        }
    }

    /// Object resolution mode for this aggregate.
    pub fn resolution(&self) -> ResolutionMode {
        self.resolution
    }

    /// Change the object resolution mode.
    pub fn set_resolution(&mut self, resolution: ResolutionMode) {
        self.resolution = resolution;
    }

    /// Add a tree.
    pub fn add_tree(&mut self, tree: QueryTree) -> TreeId {
        self.trees.push(tree);
        TreeId(self.trees.len() - 1)
    }

    /// Add an inter-query edge.
    pub fn connect(&mut self, edge: InterEdge) -> InterEdgeId {
        self.edges.push(edge);
        InterEdgeId(self.edges.len() - 1)
    }

    /// Get a tree.
    pub fn tree(&self, id: TreeId) -> &QueryTree {
        &self.trees[id.0]
    }

    /// Get a tree mutably.
    pub fn tree_mut(&mut self, id: TreeId) -> &mut QueryTree {
        &mut self.trees[id.0]
    }

    /// All tree ids.
    pub fn tree_ids(&self) -> impl Iterator<Item = TreeId> {
        (0..self.trees.len()).map(TreeId)
    }

    /// Number of trees (vertices).
    pub fn vertex_count(&self) -> usize {
        self.trees.len()
    }

    /// Get an edge.
    pub fn edge(&self, id: InterEdgeId) -> &InterEdge {
        &self.edges[id.0]
    }

    /// All edge ids.
    pub fn edge_ids(&self) -> impl Iterator<Item = InterEdgeId> {
        (0..self.edges.len()).map(InterEdgeId)
    }

    /// Outgoing edges of a tree.
    pub fn out_edges(&self, tree: TreeId) -> Vec<InterEdgeId> {
        self.edge_ids()
            .filter(|&e| self.edges[e.0].from == tree)
            .collect()
    }

    /// The single incoming edge of a non-root tree.
    pub fn in_edge(&self, tree: TreeId) -> Option<InterEdgeId> {
        self.edge_ids().find(|&e| self.edges[e.0].to == tree)
    }

    /// Trees with no incoming edge.
    pub fn roots(&self) -> Vec<TreeId> {
        self.tree_ids()
            .filter(|&t| self.in_edge(t).is_none())
            .collect()
    }

    /// Children of a tree.
    pub fn children(&self, tree: TreeId) -> Vec<TreeId> {
        self.out_edges(tree)
            .into_iter()
            .map(|e| self.edges[e.0].to)
            .collect()
    }

    /// Every tree below `tree`, breadth first.
    pub fn descendants(&self, tree: TreeId) -> Vec<TreeId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<TreeId> = self.children(tree).into();
        while let Some(next) = queue.pop_front() {
            out.push(next);
            queue.extend(self.children(next));
        }
        out
    }

    /// All trees, breadth first from the roots.
    pub fn bfs_order(&self) -> Vec<TreeId> {
        let mut out = Vec::new();
        for root in self.roots() {
            out.push(root);
            out.extend(self.descendants(root));
        }
        out
    }

    /// Move edges sourced from fragments that were relocated into another tree.
    pub(crate) fn rehome_sources(
        &mut self,
        old_tree: TreeId,
        mapping: &HashMap<FragmentId, FragmentId>,
        new_tree: TreeId,
    ) {
        for edge in &mut self.edges {
            if edge.from == old_tree {
                if let Some(&moved) = mapping.get(&edge.source) {
                    edge.from = new_tree;
                    edge.source = moved;
                }
            }
        }
    }

    /// Check the structural invariants: every edge references existing trees,
    /// every non-root tree has exactly one incoming edge, and the forest is acyclic.
    pub fn validate(&self) -> Result<(), Error> {
        let mut incoming = vec![0usize; self.trees.len()];
        for edge in &self.edges {
            if edge.from.0 >= self.trees.len() || edge.to.0 >= self.trees.len() {
                return Err(Error::InvalidPlan(format!(
                    "edge '{}' references a missing tree",
                    edge.name
                )));
            }
            incoming[edge.to.0] += 1;
        }
        if let Some(idx) = incoming.iter().position(|&n| n > 1) {
            return Err(Error::InvalidPlan(format!(
                "query tree {} has {} incoming edges",
                TreeId(idx),
                incoming[idx]
            )));
        }

        let reachable: HashSet<TreeId> = self.bfs_order().into_iter().collect();
        if reachable.len() != self.trees.len() || self.roots().is_empty() {
            return Err(Error::InvalidPlan(
                "aggregate tree contains a cycle".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate resolved fields for every tree.
    pub fn resolve_fields(&mut self) {
        for tree in &mut self.trees {
            tree.resolve_fields();
        }
    }

    /// Position, in the parent's rows, of the column correlating `edge`.
    pub fn correlation_position(&self, edge: InterEdgeId) -> Option<usize> {
        let edge = self.edge(edge);
        let parent = self.tree(edge.from);
        match &edge.source_column {
            Some(column) => parent
                .fields_of(edge.source)
                .find(|f| &f.name == column)
                .map(|f| f.position),
            None => parent.identifier_position(edge.source),
        }
    }

    /// Decide how the child of `edge` is correlated with its parent.
    ///
    /// Computed lazily at dispatch time: a join side table when the parent
    /// populates one for this edge, a correlated sub-query when the caller's
    /// session can see the parent's results, and an identifier list otherwise.
    pub fn join_mechanism(&self, edge: InterEdgeId, allow_subquery: bool) -> JoinMechanism {
        let parent = self.tree(self.edge(edge).from);
        for action in parent.actions() {
            let PostAction::PopulateJoinTable { edge: e, table } = action;
            if *e == edge {
                return JoinMechanism::JoinTable {
                    table: table.clone(),
                };
            }
        }
        if allow_subquery && self.tree(self.edge(edge).to).custom_query().is_none() {
            JoinMechanism::Subquery
        } else {
            JoinMechanism::InList
        }
    }
}
