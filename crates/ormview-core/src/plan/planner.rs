//! Planning pipeline.
//!
//! A view is planned in fixed stages: build the unsplit aggregate tree, split
//! parallel collections (and subtypes) according to the configured strategy,
//! register join-table population, generate resolved fields, and validate.

use crate::catalog::TypeGraphProvider;
use crate::dispatch::SideTables;
use crate::error::Error;
use crate::resolve::ResolutionMode;

use super::aggregate::AggregateTree;
use super::builder::PlanBuilder;
use super::join_table::JoinTableAmender;
use super::split_anchor::SplitToAnchor;
use super::split_root::SplitToRoot;
use super::split_subtype::SplitSubtype;
use super::view::View;

/// How parallel collections are split into separate query trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SplitStrategy {
    /// New trees are correlated with the aggregate root.
    ToRoot,
    /// New trees are correlated with the deepest common fragment. Subtype
    /// fragments are split into inheritance trees as well.
    #[default]
    ToAnchor,
    /// Keep every view in one query per (sub)view.
    None,
}

/// Configuration for planning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanConfig {
    /// Splitting strategy.
    pub split: SplitStrategy,
    /// Object resolution mode recorded on the plan.
    pub resolution: ResolutionMode,
    /// Shared side table for custom child queries.
    pub join_table: Option<String>,
    /// Maximum sub-view nesting depth.
    pub max_depth: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            split: SplitStrategy::default(),
            resolution: ResolutionMode::default(),
            join_table: None,
            max_depth: 8,
        }
    }
}

impl PlanConfig {
    /// Set the split strategy.
    pub fn with_split(mut self, split: SplitStrategy) -> Self {
        self.split = split;
        self
    }

    /// Set the resolution mode.
    pub fn with_resolution(mut self, resolution: ResolutionMode) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the shared join side table.
    pub fn with_join_table(mut self, table: impl Into<String>) -> Self {
        self.join_table = Some(table.into());
        self
    }

    /// Set the maximum sub-view depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Plans views into executable aggregate trees.
pub struct Planner<'a> {
    provider: &'a dyn TypeGraphProvider,
    side_tables: &'a dyn SideTables,
    config: PlanConfig,
}

impl<'a> Planner<'a> {
    /// Create a planner.
    pub fn new(
        provider: &'a dyn TypeGraphProvider,
        side_tables: &'a dyn SideTables,
        config: PlanConfig,
    ) -> Self {
        Self {
            provider,
            side_tables,
            config,
        }
    }

    /// Planning configuration.
    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    /// Plan a view.
    pub fn plan(&self, view: &View) -> Result<AggregateTree, Error> {
        let mut aggregate = PlanBuilder::new(self.provider)
            .with_max_depth(self.config.max_depth)
            .build(view, self.config.resolution)?;

        match self.config.split {
            SplitStrategy::None => {}
            SplitStrategy::ToRoot => {
                SplitToRoot::apply(&mut aggregate)?;
            }
            SplitStrategy::ToAnchor => {
                // Moving a subtype out can leave a tree that splits again,
                // and vice versa; run both to a fixed point.
                loop {
                    let anchored = SplitToAnchor::apply(&mut aggregate)?;
                    let subtypes = SplitSubtype::apply(&mut aggregate)?;
                    if anchored + subtypes == 0 {
                        break;
                    }
                }
            }
        }

        JoinTableAmender::new(self.config.join_table.as_deref(), self.side_tables)
            .apply(&mut aggregate)?;
        aggregate.resolve_fields();
        aggregate.validate()?;

        tracing::debug!(
            entity = %view.entity,
            trees = aggregate.vertex_count(),
            split = ?self.config.split,
            "planned view"
        );
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, RelationDef, Schema};
    use crate::plan::{InterKind, TreeId};

    struct NoTables;

    impl SideTables for NoTables {
        fn has_side_table(&self, _name: &str) -> bool {
            false
        }
    }

    fn schema() -> Schema {
        Schema::new(1)
            .with_entity(
                EntityDef::new("User", "id")
                    .with_scalars(["id", "name"])
                    .with_field(FieldDef::collection("tags")),
            )
            .with_entity(EntityDef::new("Post", "id").with_scalars(["id", "title"]))
            .with_entity(EntityDef::new("Pet", "id").with_scalars(["id", "name"]))
            .with_entity(EntityDef::new("Dog", "id").extends("Pet").with_scalars(["breed"]))
            .with_relation(RelationDef::one_to_many("posts", "User", "Post"))
            .with_relation(RelationDef::one_to_many("pets", "User", "Pet"))
    }

    #[test]
    fn test_plan_resolves_fields() {
        let schema = schema();
        let planner = Planner::new(&schema, &NoTables, PlanConfig::default());
        let plan = planner
            .plan(&View::new("User").with_paths(["name", "posts.title"]))
            .unwrap();

        assert_eq!(plan.vertex_count(), 1);
        assert_eq!(plan.tree(TreeId(0)).fields().len(), 4);
    }

    #[test]
    fn test_anchor_strategy_splits_collections_and_subtypes() {
        let schema = schema();
        let planner = Planner::new(&schema, &NoTables, PlanConfig::default());
        let plan = planner
            .plan(&View::new("User").with_paths(["tags", "posts.title", "pets.name", "pets.breed"]))
            .unwrap();

        // tags, posts and pets each move out of the root; Dog moves out of pets.
        assert_eq!(plan.vertex_count(), 5);
        let inheritance = plan
            .edge_ids()
            .filter(|&e| plan.edge(e).kind == InterKind::Inheritance)
            .count();
        assert_eq!(inheritance, 1);
        for tree in plan.tree_ids() {
            assert!(!plan.tree(tree).has_subtype_edges());
        }
    }

    #[test]
    fn test_root_strategy_rejects_subtypes() {
        let schema = schema();
        let planner = Planner::new(
            &schema,
            &NoTables,
            PlanConfig::default().with_split(SplitStrategy::ToRoot),
        );
        let result = planner.plan(&View::new("User").with_paths(["tags", "pets.breed"]));
        assert!(matches!(result, Err(Error::UnsupportedSplit(_))));
    }

    #[test]
    fn test_no_split_strategy_keeps_single_tree() {
        let schema = schema();
        let planner = Planner::new(
            &schema,
            &NoTables,
            PlanConfig::default().with_split(SplitStrategy::None),
        );
        let plan = planner
            .plan(&View::new("User").with_paths(["tags", "posts.title"]))
            .unwrap();
        assert_eq!(plan.vertex_count(), 1);
    }
}
