//! Plan builder: turns a view into the initial aggregate tree.
//!
//! The builder asks the type-graph provider for the states reachable from the
//! view's requested paths and creates one fragment per state and one
//! intra-query edge per type-graph edge. Every sub-view becomes its own query
//! tree, joined to its parent by an inter-query edge anchored at the parent
//! fragment for the sub-view's path.

use std::collections::HashMap;

use crate::catalog::{join_path, TypeGraphProvider, TypeRef};
use crate::error::Error;
use crate::resolve::ResolutionMode;

use super::aggregate::{AggregateTree, InterEdge, InterKind, TreeId};
use super::fragment::{FragmentId, QueryFragment};
use super::tree::QueryTree;
use super::view::View;

/// Builds unsplit aggregate trees from views.
pub struct PlanBuilder<'a> {
    provider: &'a dyn TypeGraphProvider,
    max_depth: usize,
}

impl<'a> PlanBuilder<'a> {
    /// Create a builder backed by a type-graph provider.
    pub fn new(provider: &'a dyn TypeGraphProvider) -> Self {
        Self {
            provider,
            max_depth: 8,
        }
    }

    /// Limit sub-view nesting.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Build the aggregate tree for a view: one query tree per (sub)view.
    pub fn build(&self, view: &View, resolution: ResolutionMode) -> Result<AggregateTree, Error> {
        if view.depth() > self.max_depth {
            return Err(Error::InvalidPlan(format!(
                "view depth {} exceeds maximum allowed depth {}",
                view.depth(),
                self.max_depth
            )));
        }

        let aggregate_type = self.provider.type_ref(&view.entity)?;
        let mut aggregate = AggregateTree::new(resolution);
        self.build_view(&mut aggregate, &aggregate_type, view, "")?;
        Ok(aggregate)
    }

    /// Build the tree for one view anchored at `anchor`, then its sub-views.
    fn build_view(
        &self,
        aggregate: &mut AggregateTree,
        aggregate_type: &TypeRef,
        view: &View,
        anchor: &str,
    ) -> Result<TreeId, Error> {
        let entity = self.provider.type_ref(&view.entity)?;

        let (tree, anchors) = match &view.custom {
            Some(custom) => {
                let mut fragment = QueryFragment::new(entity.clone(), anchor);
                fragment.fields = custom
                    .columns
                    .iter()
                    .filter(|c| !c.contains('.') && c.as_str() != entity.identity_field())
                    .cloned()
                    .collect();
                let mut tree = QueryTree::custom(aggregate_type.clone(), fragment, custom.clone());
                let anchors = self.custom_anchors(&mut tree, &entity, view, anchor)?;
                (tree, anchors)
            }
            None => self.build_generated(aggregate_type, &entity, view, anchor)?,
        };

        let tree_id = aggregate.add_tree(tree);
        tracing::debug!(
            tree = %tree_id,
            entity = %entity,
            anchor,
            custom = view.custom.is_some(),
            "built query tree"
        );

        for sub in &view.subviews {
            let (source, source_column) =
                self.correlation_source(aggregate.tree(tree_id), &anchors, &sub.anchor, &sub.view)?;

            let child_anchor = join_path(anchor, &sub.anchor);
            let child = self.build_view(aggregate, aggregate_type, &sub.view, &child_anchor)?;
            let target = aggregate.tree(child).root();
            aggregate.tree_mut(child).fragment_mut(target).mirror = true;
            aggregate.connect(InterEdge {
                from: tree_id,
                to: child,
                name: sub.anchor.clone(),
                source,
                target,
                kind: InterKind::Association,
                source_column,
            });
        }

        Ok(tree_id)
    }

    /// Create fragments and intra-query edges from the resolved type graph.
    fn build_generated(
        &self,
        aggregate_type: &TypeRef,
        entity: &TypeRef,
        view: &View,
        anchor: &str,
    ) -> Result<(QueryTree, HashMap<String, FragmentId>), Error> {
        let graph = self.provider.resolve(entity, &view.paths)?;

        let mut ids: Vec<FragmentId> = Vec::with_capacity(graph.states.len());
        let mut tree: Option<QueryTree> = None;

        for state in &graph.states {
            let mut fragment = QueryFragment::new(state.entity.clone(), join_path(anchor, &state.path));
            if fragment.is_populated() {
                fragment.fields = state.fields.clone();
                fragment.collections = state.collections.clone();
            }
            match tree.as_mut() {
                None => {
                    let t = QueryTree::new(aggregate_type.clone(), fragment);
                    ids.push(t.root());
                    tree = Some(t);
                }
                Some(t) => ids.push(t.add_fragment(fragment)),
            }
        }

        let mut tree = tree.ok_or_else(|| {
            Error::InvalidPlan(format!("type graph for '{}' has no root state", view.entity))
        })?;
        for edge in &graph.edges {
            tree.connect(ids[edge.from], ids[edge.to], edge.link.clone());
        }

        // Sub-view anchors resolve to the non-refined state at their path.
        let mut anchors = HashMap::new();
        for sub in &view.subviews {
            if let Some(state) = graph.state_at(&sub.anchor) {
                if graph.states[state].entity.is_open() {
                    continue;
                }
                anchors.insert(sub.anchor.clone(), ids[state]);
            }
        }

        Ok((tree, anchors))
    }

    /// Give a custom tree one identifier-only fragment per directly related
    /// sub-view anchor whose identifier column the query declares, so the
    /// related objects are linked to the custom query's objects.
    fn custom_anchors(
        &self,
        tree: &mut QueryTree,
        entity: &TypeRef,
        view: &View,
        anchor: &str,
    ) -> Result<HashMap<String, FragmentId>, Error> {
        let mut anchors = HashMap::new();
        let Some(custom) = tree.custom_query().cloned() else {
            return Ok(anchors);
        };

        for sub in &view.subviews {
            if sub.anchor.contains('.') {
                continue;
            }
            let sub_type = self.provider.type_ref(&sub.view.entity)?;
            let column = join_path(&sub.anchor, sub_type.identity_field());
            if !custom.columns.contains(&column) {
                continue;
            }

            let graph = self.provider.resolve(entity, std::slice::from_ref(&sub.anchor))?;
            let Some(edge) = graph
                .edges_from(0)
                .find(|e| !e.link.is_subtype() && graph.states[e.to].path == sub.anchor)
            else {
                continue;
            };
            let fragment = QueryFragment::new(
                graph.states[edge.to].entity.clone(),
                join_path(anchor, &sub.anchor),
            );
            let root = tree.root();
            let id = tree.add_fragment(fragment);
            tree.connect(root, id, edge.link.clone());
            anchors.insert(sub.anchor.clone(), id);
        }
        Ok(anchors)
    }

    /// Find the parent fragment (and column, for custom parents) carrying the
    /// identifier a sub-view is correlated on.
    fn correlation_source(
        &self,
        parent: &QueryTree,
        anchors: &HashMap<String, FragmentId>,
        anchor: &str,
        sub: &View,
    ) -> Result<(FragmentId, Option<String>), Error> {
        let missing = || Error::MissingCorrelationId {
            anchor: anchor.to_string(),
        };

        if let Some(&fragment) = anchors.get(anchor) {
            return Ok((fragment, None));
        }

        match parent.custom_query() {
            Some(custom) => {
                let sub_type = self.provider.type_ref(&sub.entity)?;
                let column = join_path(anchor, sub_type.identity_field());
                if custom.columns.iter().any(|c| c == &column) {
                    Ok((parent.root(), Some(column)))
                } else {
                    Err(missing())
                }
            }
            None => Err(missing()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, RelationDef, Schema};
    use crate::plan::CustomQuery;

    fn create_test_schema() -> Schema {
        // User -> Posts -> Comments, User -> tags
        let user = EntityDef::new("User", "id")
            .with_scalars(["id", "name", "email"])
            .with_field(FieldDef::collection("tags"));
        let post = EntityDef::new("Post", "id").with_scalars(["id", "title", "body"]);
        let comment = EntityDef::new("Comment", "id").with_scalars(["id", "text"]);

        Schema::new(1)
            .with_entity(user)
            .with_entity(post)
            .with_entity(comment)
            .with_relation(RelationDef::one_to_many("posts", "User", "Post"))
            .with_relation(RelationDef::one_to_many("comments", "Post", "Comment"))
            .with_relation(RelationDef::one_to_one("author", "Post", "User"))
    }

    #[test]
    fn test_simple_view_single_tree() {
        let schema = create_test_schema();
        let view = View::new("User").with_paths(["name", "posts.title", "posts.comments.text"]);

        let plan = PlanBuilder::new(&schema)
            .build(&view, ResolutionMode::Shared)
            .unwrap();

        assert_eq!(plan.vertex_count(), 1);
        let tree = plan.tree(TreeId(0));
        assert_eq!(tree.fragment_count(), 3);
        let paths: Vec<&str> = tree
            .pre_order()
            .into_iter()
            .map(|f| tree.fragment(f).path.as_str())
            .collect();
        assert_eq!(paths, vec!["", "posts", "posts.comments"]);
    }

    #[test]
    fn test_subview_creates_correlated_tree() {
        let schema = create_test_schema();
        let view = View::new("User")
            .with_paths(["name", "posts"])
            .with_subview("posts", View::new("Post").with_paths(["title", "comments.text"]));

        let plan = PlanBuilder::new(&schema)
            .build(&view, ResolutionMode::Shared)
            .unwrap();

        assert_eq!(plan.vertex_count(), 2);
        let edge = plan.edge(plan.out_edges(TreeId(0))[0]);
        assert_eq!(edge.to, TreeId(1));
        assert_eq!(plan.tree(TreeId(0)).fragment(edge.source).path, "posts");

        let child = plan.tree(TreeId(1));
        assert!(child.fragment(child.root()).mirror);
        assert_eq!(child.fragment(child.root()).path, "posts");
        assert_eq!(child.fragment_count(), 2);
    }

    #[test]
    fn test_subview_without_anchor_identifier_fails() {
        let schema = create_test_schema();
        let view = View::new("User")
            .with_paths(["name"])
            .with_subview("posts", View::new("Post").with_paths(["title"]));

        let result = PlanBuilder::new(&schema).build(&view, ResolutionMode::Shared);
        assert!(matches!(result, Err(Error::MissingCorrelationId { .. })));
    }

    #[test]
    fn test_custom_parent_requires_correlation_column() {
        let schema = create_test_schema();
        let sub = View::new("Post").with_paths(["title"]);

        let ok = View::new("User")
            .with_custom(CustomQuery::new("active_users", ["id", "name", "posts.id"]))
            .with_subview("posts", sub.clone());
        let plan = PlanBuilder::new(&schema)
            .build(&ok, ResolutionMode::Shared)
            .unwrap();
        let edge = plan.edge(plan.out_edges(TreeId(0))[0]);
        let parent = plan.tree(TreeId(0));
        assert_eq!(edge.source_column, None);
        assert_eq!(parent.fragment(edge.source).path, "posts");
        assert_eq!(parent.fragment(parent.root()).fields, vec!["name"]);

        let missing = View::new("User")
            .with_custom(CustomQuery::new("active_users", ["id", "name"]))
            .with_subview("posts", sub);
        let result = PlanBuilder::new(&schema).build(&missing, ResolutionMode::Shared);
        assert!(matches!(result, Err(Error::MissingCorrelationId { .. })));
    }

    #[test]
    fn test_depth_limit_enforced() {
        let schema = create_test_schema();
        let view = View::new("User").with_paths(["posts"]).with_subview(
            "posts",
            View::new("Post")
                .with_paths(["comments"])
                .with_subview("comments", View::new("Comment").with_paths(["text"])),
        );

        let result = PlanBuilder::new(&schema)
            .with_max_depth(2)
            .build(&view, ResolutionMode::Shared);
        assert!(matches!(result, Err(Error::InvalidPlan(_))));
    }

    #[test]
    fn test_unknown_entity_fails() {
        let schema = create_test_schema();
        let result = PlanBuilder::new(&schema).build(&View::new("Nope"), ResolutionMode::Shared);
        assert!(matches!(result, Err(Error::UnknownEntity(_))));
    }
}
