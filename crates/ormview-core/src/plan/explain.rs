//! Plan explanation.
//!
//! Renders an aggregate tree as a serializable document: trees with their
//! fragments, columns and query text, and the inter-query edges with the
//! join mechanism each would use.

use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::aggregate::{AggregateTree, InterKind, JoinMechanism};

/// Explanation of one fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentSummary {
    /// Fragment alias.
    pub alias: String,
    /// Entity type name.
    pub entity: String,
    /// Path from the aggregate root.
    pub path: String,
    /// Requested scalar fields.
    pub fields: Vec<String>,
    /// Requested primitive collections.
    pub collections: Vec<String>,
    /// Whether the fragment re-fetches an entity owned by a parent query.
    pub mirror: bool,
}

/// Explanation of one query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSummary {
    /// Tree id.
    pub id: String,
    /// Root entity type.
    pub entity: String,
    /// Fragments in pre-order.
    pub fragments: Vec<FragmentSummary>,
    /// Resolved column paths in row order.
    pub columns: Vec<String>,
    /// Synthesized query text, if synthesis ran.
    pub query: Option<String>,
    /// Custom query name, if any.
    pub custom: Option<String>,
    /// Inner-join semantics.
    pub inner: bool,
}

/// Explanation of one inter-query edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSummary {
    /// Parent tree id.
    pub from: String,
    /// Child tree id.
    pub to: String,
    /// Relation name.
    pub name: String,
    /// `association` or `inheritance`.
    pub kind: String,
    /// Path of the correlating parent fragment.
    pub source_path: String,
    /// Join mechanism: `in_list`, `join_table:<name>` or `subquery`.
    pub mechanism: String,
}

/// Explanation of a whole plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExplain {
    /// Trees in breadth-first order.
    pub trees: Vec<TreeSummary>,
    /// Inter-query edges.
    pub edges: Vec<EdgeSummary>,
}

impl PlanExplain {
    /// Describe `aggregate`, resolving join mechanisms as the dispatcher would.
    pub fn new(aggregate: &AggregateTree, allow_subquery: bool) -> Self {
        let trees = aggregate
            .bfs_order()
            .into_iter()
            .map(|id| {
                let tree = aggregate.tree(id);
                let root = tree.fragment(tree.root());
                TreeSummary {
                    id: id.to_string(),
                    entity: root.entity.name().to_string(),
                    fragments: tree
                        .pre_order()
                        .into_iter()
                        .map(|f| {
                            let fragment = tree.fragment(f);
                            FragmentSummary {
                                alias: fragment.alias.clone(),
                                entity: fragment.entity.name().to_string(),
                                path: fragment.path.clone(),
                                fields: fragment.fields.clone(),
                                collections: fragment.collections.clone(),
                                mirror: fragment.mirror,
                            }
                        })
                        .collect(),
                    columns: tree.fields().iter().map(|f| f.path.clone()).collect(),
                    query: tree.handle().map(|h| h.text().to_string()),
                    custom: tree.custom_query().map(|c| c.name.clone()),
                    inner: tree.is_inner(),
                }
            })
            .collect();

        let edges = aggregate
            .edge_ids()
            .map(|id| {
                let edge = aggregate.edge(id);
                let mechanism = match aggregate.join_mechanism(id, allow_subquery) {
                    JoinMechanism::InList => "in_list".to_string(),
                    JoinMechanism::JoinTable { table } => format!("join_table:{table}"),
                    JoinMechanism::Subquery => "subquery".to_string(),
                };
                EdgeSummary {
                    from: edge.from.to_string(),
                    to: edge.to.to_string(),
                    name: edge.name.clone(),
                    kind: match edge.kind {
                        InterKind::Association => "association".to_string(),
                        InterKind::Inheritance => "inheritance".to_string(),
                    },
                    source_path: aggregate.tree(edge.from).fragment(edge.source).path.clone(),
                    mechanism,
                }
            })
            .collect();

        Self { trees, edges }
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidPlan(e.to_string()))
    }

    /// Human-readable multi-line summary.
    pub fn explanation(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("Aggregate of {} query tree(s)", self.trees.len()));
        for tree in &self.trees {
            let label = match &tree.custom {
                Some(name) => format!("custom '{name}'"),
                None => format!("{} fragment(s)", tree.fragments.len()),
            };
            lines.push(format!(
                "  {} {} [{}], {} column(s){}",
                tree.id,
                tree.entity,
                label,
                tree.columns.len(),
                if tree.inner { ", inner" } else { "" }
            ));
        }
        for edge in &self.edges {
            lines.push(format!(
                "  {} -> {} via '{}' at '{}' ({}, {})",
                edge.from, edge.to, edge.name, edge.source_path, edge.kind, edge.mechanism
            ));
        }
        lines.join("\n")
    }
}

impl AggregateTree {
    /// Describe this plan. `allow_subquery` selects the join mechanisms a
    /// serial dispatcher with sub-queries enabled would use.
    pub fn explain(&self, allow_subquery: bool) -> PlanExplain {
        PlanExplain::new(self, allow_subquery)
    }
}
