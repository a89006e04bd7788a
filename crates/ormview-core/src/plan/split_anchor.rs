//! Anchor-correlated splitting.
//!
//! The splitter looks for the deepest fragment that still joins more than one
//! independent to-many branch (the anchor) and moves every such branch into a
//! new query tree rooted at a copy of the anchor. New trees are correlated
//! with the original by the anchor's identifier and inner-join their
//! fragments, since a row without the branch carries nothing new.

use std::collections::{HashMap, VecDeque};

use crate::error::Error;

use super::aggregate::{AggregateTree, InterEdge, InterKind, TreeId};
use super::counts::{collection_edges, compute_collection_counts};
use super::fragment::FragmentId;
use super::tree::QueryTree;

/// Splits trees into anchor-correlated trees.
pub struct SplitToAnchor;

impl SplitToAnchor {
    /// Split every tree of `aggregate` until no fragment joins parallel
    /// collections. Returns the number of trees created.
    pub fn apply(aggregate: &mut AggregateTree) -> Result<usize, Error> {
        let mut created = 0;
        let mut queue: VecDeque<TreeId> = aggregate.tree_ids().collect();

        while let Some(tree_id) = queue.pop_front() {
            if aggregate.tree(tree_id).custom_query().is_some() {
                continue;
            }

            compute_collection_counts(aggregate.tree_mut(tree_id));
            let root = aggregate.tree(tree_id).root();
            let mut stack = vec![root];

            while let Some(start) = stack.pop() {
                let tree = aggregate.tree(tree_id);
                if tree.fragment(start).parallel_collection_count <= 1 {
                    continue;
                }

                let anchor = Self::find_anchor(tree, start);
                let new_trees = Self::split_branches(aggregate, tree_id, anchor);
                created += new_trees.len();
                queue.extend(new_trees);

                // Walk back up: ancestors still joining parallel branches are
                // revisited, nearest first.
                let tree = aggregate.tree_mut(tree_id);
                compute_collection_counts(tree);
                for ancestor in tree.ancestors(anchor) {
                    if tree.fragment(ancestor).parallel_collection_count > 1 {
                        stack.push(ancestor);
                    }
                }
            }
        }

        if created > 0 {
            tracing::debug!(created, "split to anchor");
        }
        Ok(created)
    }

    /// Descend from `start` to the deepest fragment whose children each carry
    /// at most one branch.
    fn find_anchor(tree: &QueryTree, start: FragmentId) -> FragmentId {
        let mut current = start;
        while let Some(next) = tree
            .children(current)
            .map(|e| e.to)
            .find(|&c| tree.fragment(c).parallel_collection_count > 1)
        {
            current = next;
        }
        current
    }

    /// Move every collection branch of `anchor` into its own tree.
    fn split_branches(aggregate: &mut AggregateTree, tree_id: TreeId, anchor: FragmentId) -> Vec<TreeId> {
        let source = aggregate.tree(tree_id).clone();
        let anchor_fragment = source.fragment(anchor);
        let mut new_trees = Vec::new();

        for collection in &anchor_fragment.collections {
            let mut root = anchor_fragment.identity_copy();
            root.collections.push(collection.clone());
            let mut tree = QueryTree::new(source.aggregate_type().clone(), root);
            tree.set_inner(true);

            let target = tree.root();
            let new_id = aggregate.add_tree(tree);
            aggregate.connect(InterEdge {
                from: tree_id,
                to: new_id,
                name: collection.clone(),
                source: anchor,
                target,
                kind: InterKind::Association,
                source_column: None,
            });
            new_trees.push(new_id);
        }
        aggregate
            .tree_mut(tree_id)
            .fragment_mut(anchor)
            .collections
            .clear();

        for edge in collection_edges(&source, anchor) {
            let mut tree = QueryTree::new(source.aggregate_type().clone(), anchor_fragment.identity_copy());
            tree.set_inner(true);
            let under = tree.root();
            let moved: HashMap<FragmentId, FragmentId> =
                source.copy_subtree_into(edge.to, &mut tree, under, edge.link.clone());
            aggregate.tree_mut(tree_id).detach(edge.to);

            let target = tree.root();
            let new_id = aggregate.add_tree(tree);
            aggregate.rehome_sources(tree_id, &moved, new_id);
            aggregate.connect(InterEdge {
                from: tree_id,
                to: new_id,
                name: edge.link.label().to_string(),
                source: anchor,
                target,
                kind: InterKind::Association,
                source_column: None,
            });
            new_trees.push(new_id);
        }

        tracing::trace!(
            tree = %tree_id,
            anchor = %anchor,
            path = %source.fragment(anchor).path,
            created = new_trees.len(),
            "split at anchor"
        );
        new_trees
    }
}
