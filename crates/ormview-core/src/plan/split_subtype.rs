//! Subtype splitting.
//!
//! Every subtype fragment is moved, with its subtree, into a query tree of
//! its own joined back to the supertype fragment by an inheritance edge.
//! Nested subtypes are split again from the new tree.

use std::collections::VecDeque;

use crate::error::Error;

use super::aggregate::{AggregateTree, InterEdge, InterKind, TreeId};

/// Moves subtype fragments into inheritance-correlated trees.
pub struct SplitSubtype;

impl SplitSubtype {
    /// Split every subtype edge of `aggregate`. Returns the number of trees created.
    pub fn apply(aggregate: &mut AggregateTree) -> Result<usize, Error> {
        let mut created = 0;
        let mut queue: VecDeque<TreeId> = aggregate.tree_ids().collect();

        while let Some(tree_id) = queue.pop_front() {
            loop {
                let tree = aggregate.tree(tree_id);
                let live = tree.pre_order();
                let Some(edge) = tree
                    .edges()
                    .iter()
                    .find(|e| e.link.is_subtype() && live.contains(&e.from))
                    .cloned()
                else {
                    break;
                };

                let (mut subtree, moved) = tree.extract_subtree(edge.to);
                let target = subtree.root();
                subtree.fragment_mut(target).mirror = true;
                let name = subtree.fragment(target).entity.name().to_string();

                aggregate.tree_mut(tree_id).detach(edge.to);
                let new_id = aggregate.add_tree(subtree);
                aggregate.rehome_sources(tree_id, &moved, new_id);
                aggregate.connect(InterEdge {
                    from: tree_id,
                    to: new_id,
                    name,
                    source: edge.from,
                    target,
                    kind: InterKind::Inheritance,
                    source_column: None,
                });

                created += 1;
                queue.push_back(new_id);
            }
        }

        if created > 0 {
            tracing::debug!(created, "split subtypes");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, RelationDef, Schema};
    use crate::plan::{PlanBuilder, View};
    use crate::resolve::ResolutionMode;

    fn schema() -> Schema {
        Schema::new(1)
            .with_entity(EntityDef::new("Owner", "id").with_scalars(["id", "name"]))
            .with_entity(EntityDef::new("Pet", "id").with_scalars(["id", "name"]))
            .with_entity(
                EntityDef::new("Dog", "id")
                    .extends("Pet")
                    .with_scalars(["breed"]),
            )
            .with_entity(
                EntityDef::new("Puppy", "id")
                    .extends("Dog")
                    .with_scalars(["age"]),
            )
            .with_relation(RelationDef::one_to_one("pet", "Owner", "Pet"))
    }

    #[test]
    fn test_subtype_becomes_inheritance_tree() {
        let view = View::new("Owner").with_paths(["name", "pet.name", "pet.breed"]);
        let mut agg = PlanBuilder::new(&schema())
            .build(&view, ResolutionMode::Shared)
            .unwrap();
        assert!(agg.tree(TreeId(0)).has_subtype_edges());

        let created = SplitSubtype::apply(&mut agg).unwrap();
        assert_eq!(created, 1);
        assert!(!agg.tree(TreeId(0)).has_subtype_edges());

        let edge = agg.edge(agg.in_edge(TreeId(1)).unwrap());
        assert_eq!(edge.kind, InterKind::Inheritance);
        assert_eq!(agg.tree(TreeId(0)).fragment(edge.source).path, "pet");

        let dog = agg.tree(TreeId(1));
        let root = dog.fragment(dog.root());
        assert_eq!(root.entity.name(), "Dog");
        assert_eq!(root.fields, vec!["breed"]);
        assert!(root.mirror);
        agg.validate().unwrap();
    }

    #[test]
    fn test_nested_subtypes_split_recursively() {
        let view = View::new("Owner").with_paths(["pet.name", "pet.breed", "pet.age"]);
        let mut agg = PlanBuilder::new(&schema())
            .build(&view, ResolutionMode::Shared)
            .unwrap();

        let created = SplitSubtype::apply(&mut agg).unwrap();
        assert_eq!(created, 2);
        assert_eq!(agg.children(TreeId(1)), vec![TreeId(2)]);
        let puppy = agg.tree(TreeId(2));
        assert_eq!(puppy.fragment(puppy.root()).entity.name(), "Puppy");
        assert_eq!(
            agg.edge(agg.in_edge(TreeId(2)).unwrap()).kind,
            InterKind::Inheritance
        );
    }
}
