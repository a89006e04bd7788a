//! Root-correlated splitting.
//!
//! Every extra collection branch is carved into a new query tree whose root
//! is a copy of the aggregate root, so the new tree is correlated with the
//! original by the root identifier alone. The path from the root down to the
//! split point is re-created in the new tree as identity-only fragments.

use std::collections::{HashMap, VecDeque};

use crate::error::Error;

use super::aggregate::{AggregateTree, InterEdge, InterKind, TreeId};
use super::counts::{branch_count, collection_edges, compute_collection_counts};
use super::fragment::{FragmentId, IntraEdge};
use super::tree::QueryTree;

/// One branch carved off a split point.
enum Branch {
    Collection(String),
    Edge(IntraEdge),
}

/// Splits trees into root-correlated trees with at most one collection branch.
pub struct SplitToRoot;

impl SplitToRoot {
    /// Split every tree of `aggregate` until no fragment joins parallel
    /// collections. Returns the number of trees created.
    ///
    /// Fails with [`Error::UnsupportedSplit`] when a tree that needs
    /// splitting contains subtype fragments.
    pub fn apply(aggregate: &mut AggregateTree) -> Result<usize, Error> {
        let mut created = 0;
        let mut queue: VecDeque<TreeId> = aggregate.tree_ids().collect();

        while let Some(tree_id) = queue.pop_front() {
            if aggregate.tree(tree_id).custom_query().is_some() {
                continue;
            }
            loop {
                compute_collection_counts(aggregate.tree_mut(tree_id));
                let tree = aggregate.tree(tree_id);
                let Some(split_point) = tree
                    .pre_order()
                    .into_iter()
                    .find(|&f| branch_count(tree, f) >= 2)
                else {
                    break;
                };
                if tree.has_subtype_edges() {
                    return Err(Error::UnsupportedSplit(format!(
                        "query tree {} has subtype fragments and cannot be split to the root",
                        tree_id
                    )));
                }

                let new_trees = Self::split_at(aggregate, tree_id, split_point);
                created += new_trees.len();
                queue.extend(new_trees);
            }
        }

        if created > 0 {
            tracing::debug!(created, "split to root");
        }
        Ok(created)
    }

    /// Carve every simple collection and every collection edge after the
    /// first out of `split_point`.
    fn split_at(aggregate: &mut AggregateTree, tree_id: TreeId, split_point: FragmentId) -> Vec<TreeId> {
        let source = aggregate.tree(tree_id).clone();
        let fragment = source.fragment(split_point);

        let mut branches: Vec<Branch> = fragment
            .collections
            .iter()
            .cloned()
            .map(Branch::Collection)
            .collect();
        branches.extend(
            collection_edges(&source, split_point)
                .into_iter()
                .skip(1)
                .map(Branch::Edge),
        );

        let mut chain = source.ancestors(split_point);
        chain.push(split_point);

        let mut new_trees = Vec::with_capacity(branches.len());
        for branch in branches {
            let (mut tree, tail) = Self::identity_chain(&source, &chain);

            let mut moved = HashMap::new();
            let name = match &branch {
                Branch::Collection(name) => {
                    tree.fragment_mut(tail).collections.push(name.clone());
                    aggregate
                        .tree_mut(tree_id)
                        .fragment_mut(split_point)
                        .collections
                        .retain(|c| c != name);
                    name.clone()
                }
                Branch::Edge(edge) => {
                    moved = source.copy_subtree_into(edge.to, &mut tree, tail, edge.link.clone());
                    aggregate.tree_mut(tree_id).detach(edge.to);
                    edge.link.label().to_string()
                }
            };

            let target = tree.root();
            let new_id = aggregate.add_tree(tree);
            aggregate.rehome_sources(tree_id, &moved, new_id);
            aggregate.connect(InterEdge {
                from: tree_id,
                to: new_id,
                name,
                source: source.root(),
                target,
                kind: InterKind::Association,
                source_column: None,
            });
            new_trees.push(new_id);
        }
        new_trees
    }

    /// Build a new tree of identity-only copies of `chain` (root first).
    /// Returns the tree and the copy of the last fragment.
    fn identity_chain(source: &QueryTree, chain: &[FragmentId]) -> (QueryTree, FragmentId) {
        let mut tree = QueryTree::new(
            source.aggregate_type().clone(),
            source.fragment(chain[0]).identity_copy(),
        );
        let mut tail = tree.root();
        for &old in &chain[1..] {
            let copy = tree.add_fragment(source.fragment(old).identity_copy());
            if let Some(edge) = source.parent_edge(old) {
                tree.connect(tail, copy, edge.link.clone());
            }
            tail = copy;
        }
        (tree, tail)
    }
}
