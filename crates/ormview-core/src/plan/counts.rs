//! Parallel-collection detection.
//!
//! Two to-many paths that do not nest inside each other multiply rows when
//! they are joined in one query. Counts are computed bottom-up per fragment:
//!
//! - `simple_collection_count` is the number of primitive-collection paths in
//!   the fragment's subtree.
//! - `parallel_collection_count` is the number of independent to-many
//!   branches in the subtree. A to-many child contributes at least one branch
//!   even when its own subtree has none; a to-one child contributes whatever
//!   its subtree contributes.
//!
//! A tree needs splitting when any fragment counts more than one branch.

use super::fragment::{FragmentId, IntraEdge};
use super::tree::QueryTree;

/// Recompute both counts for every reachable fragment of `tree`.
pub fn compute_collection_counts(tree: &mut QueryTree) {
    if tree.custom_query().is_some() {
        return;
    }

    for id in tree.pre_order().into_iter().rev() {
        let own = tree.fragment(id).collections.len();
        let mut simple = own;
        let mut parallel = own;
        for edge in tree.children(id) {
            let child = tree.fragment(edge.to);
            simple += child.simple_collection_count;
            parallel += contribution(tree, edge);
        }
        let fragment = tree.fragment_mut(id);
        fragment.simple_collection_count = simple;
        fragment.parallel_collection_count = parallel;
    }
}

/// Number of independent to-many branches `edge` adds to its parent.
pub fn contribution(tree: &QueryTree, edge: &IntraEdge) -> usize {
    let child = tree.fragment(edge.to).parallel_collection_count;
    if edge.link.is_to_many() {
        child.max(1)
    } else {
        child
    }
}

/// Direct branches of a fragment: its own primitive collections plus every
/// child edge leading to at least one to-many path.
pub fn branch_count(tree: &QueryTree, id: FragmentId) -> usize {
    tree.fragment(id).collections.len()
        + tree
            .children(id)
            .filter(|e| contribution(tree, e) > 0)
            .count()
}

/// Child edges of `id` that lead to a to-many path, in insertion order.
pub fn collection_edges(tree: &QueryTree, id: FragmentId) -> Vec<IntraEdge> {
    tree.children(id)
        .filter(|e| contribution(tree, e) > 0)
        .cloned()
        .collect()
}

/// Whether any fragment joins more than one independent to-many branch.
pub fn needs_split(tree: &QueryTree) -> bool {
    tree.pre_order()
        .into_iter()
        .any(|id| tree.fragment(id).parallel_collection_count > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, Link, RelationDef, Schema, TypeGraphProvider};
    use crate::plan::QueryFragment;

    fn schema() -> Schema {
        Schema::new(1)
            .with_entity(
                EntityDef::new("User", "id")
                    .with_scalars(["id", "name"])
                    .with_field(FieldDef::collection("tags")),
            )
            .with_entity(EntityDef::new("Post", "id").with_scalars(["id", "title"]))
            .with_entity(EntityDef::new("Profile", "id").with_field(FieldDef::collection("aliases")))
    }

    fn user_tree(schema: &Schema) -> QueryTree {
        let user = schema.type_ref("User").unwrap();
        QueryTree::new(user.clone(), QueryFragment::new(user, ""))
    }

    #[test]
    fn test_single_to_many_does_not_split() {
        let schema = schema();
        let mut tree = user_tree(&schema);
        let posts = tree.add_fragment(QueryFragment::new(schema.type_ref("Post").unwrap(), "posts"));
        tree.connect(
            tree.root(),
            posts,
            Link::Relation(RelationDef::one_to_many("posts", "User", "Post")),
        );

        compute_collection_counts(&mut tree);
        assert_eq!(tree.fragment(tree.root()).parallel_collection_count, 1);
        assert!(!needs_split(&tree));
    }

    #[test]
    fn test_two_collections_split() {
        let schema = schema();
        let mut tree = user_tree(&schema);
        tree.fragment_mut(FragmentId(0)).collections.push("tags".into());
        let posts = tree.add_fragment(QueryFragment::new(schema.type_ref("Post").unwrap(), "posts"));
        tree.connect(
            tree.root(),
            posts,
            Link::Relation(RelationDef::one_to_many("posts", "User", "Post")),
        );

        compute_collection_counts(&mut tree);
        let root = tree.fragment(tree.root());
        assert_eq!(root.parallel_collection_count, 2);
        assert_eq!(root.simple_collection_count, 1);
        assert_eq!(branch_count(&tree, tree.root()), 2);
        assert!(needs_split(&tree));
    }

    #[test]
    fn test_to_one_child_carries_collection() {
        let schema = schema();
        let mut tree = user_tree(&schema);
        tree.fragment_mut(FragmentId(0)).collections.push("tags".into());
        let mut profile = QueryFragment::new(schema.type_ref("Profile").unwrap(), "profile");
        profile.collections.push("aliases".into());
        let profile = tree.add_fragment(profile);
        tree.connect(
            tree.root(),
            profile,
            Link::Relation(RelationDef::one_to_one("profile", "User", "Profile")),
        );

        compute_collection_counts(&mut tree);
        assert_eq!(tree.fragment(tree.root()).parallel_collection_count, 2);
        assert_eq!(tree.fragment(profile).parallel_collection_count, 1);
        assert_eq!(collection_edges(&tree, tree.root()).len(), 1);
    }

    #[test]
    fn test_nested_collections_are_not_parallel() {
        let schema = schema();
        let mut tree = user_tree(&schema);
        let mut posts = QueryFragment::new(schema.type_ref("Post").unwrap(), "posts");
        posts.fields.push("title".into());
        let posts = tree.add_fragment(posts);
        tree.connect(
            tree.root(),
            posts,
            Link::Relation(RelationDef::one_to_many("posts", "User", "Post")),
        );
        let author = tree.add_fragment(QueryFragment::new(schema.type_ref("User").unwrap(), "posts.author"));
        tree.connect(
            posts,
            author,
            Link::Relation(RelationDef::one_to_one("author", "Post", "User")),
        );

        compute_collection_counts(&mut tree);
        assert_eq!(tree.fragment(tree.root()).parallel_collection_count, 1);
        assert_eq!(tree.fragment(posts).parallel_collection_count, 0);
    }
}
