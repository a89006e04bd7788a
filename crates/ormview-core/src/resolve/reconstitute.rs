//! Object reconstitution.
//!
//! Deltas recorded during dispatch are applied tree by tree. Trees holding
//! subtype data are visited first (deepest first), then the remaining trees
//! top-down, breadth first. Within a tree, each delta walks the fragments in
//! pre-order; a fragment whose columns changed either continues the object
//! of the previous row or resolves a fresh one through the identity map.

use std::collections::{HashMap, HashSet};

use crate::catalog::{Link, TypeRef};
use crate::error::Error;
use crate::plan::{AggregateTree, ColumnKind, FragmentId, InterKind, QueryTree, TreeId};
use crate::value::{Key, Value};

use super::identity::{IdentityKey, ResolutionMode};
use super::invocation::{QueryTreeInvocation, TreeState};
use super::object::ObjectFactory;
use super::row_diff::RowDelta;

/// Order in which trees are reconstituted: inheritance targets first,
/// deepest first, then every other tree breadth first from the roots.
pub fn visit_order(aggregate: &AggregateTree) -> Vec<TreeId> {
    let bfs = aggregate.bfs_order();
    let is_inheritance = |tree: &TreeId| {
        aggregate
            .in_edge(*tree)
            .is_some_and(|e| aggregate.edge(e).kind == InterKind::Inheritance)
    };

    let mut order: Vec<TreeId> = bfs.iter().rev().filter(|t| is_inheritance(t)).copied().collect();
    order.extend(bfs.iter().filter(|t| !is_inheritance(t)).copied());
    order
}

/// Column layout of one fragment.
struct FragmentLayout {
    id: FragmentId,
    parent: Option<FragmentId>,
    link: Option<Link>,
    entity: TypeRef,
    path: String,
    mirror: bool,
    identifier: usize,
    discriminator: Option<usize>,
    slot: Option<usize>,
    scalars: Vec<(String, usize)>,
    elements: Vec<(String, usize)>,
    positions: Vec<usize>,
}

impl FragmentLayout {
    fn is_subtype(&self) -> bool {
        self.link.as_ref().is_some_and(Link::is_subtype)
    }
}

fn layouts(tree: &QueryTree) -> Vec<FragmentLayout> {
    let mut out = Vec::new();
    for id in tree.pre_order() {
        let fragment = tree.fragment(id);
        let Some(identifier) = tree.identifier_position(id) else {
            continue;
        };
        let edge = tree.parent_edge(id);
        let mut layout = FragmentLayout {
            id,
            parent: edge.map(|e| e.from),
            link: edge.map(|e| e.link.clone()),
            entity: fragment.entity.clone(),
            path: fragment.path.clone(),
            mirror: fragment.mirror,
            identifier,
            discriminator: None,
            slot: None,
            scalars: Vec::new(),
            elements: Vec::new(),
            positions: Vec::new(),
        };
        for field in tree.fields_of(id) {
            layout.positions.push(field.position);
            match field.kind {
                ColumnKind::Identifier | ColumnKind::Correlation => {}
                ColumnKind::Discriminator => layout.discriminator = Some(field.position),
                ColumnKind::ListIndex | ColumnKind::MapKey => layout.slot = Some(field.position),
                ColumnKind::Scalar => layout.scalars.push((field.name.clone(), field.position)),
                ColumnKind::Element => layout.elements.push((field.name.clone(), field.position)),
            }
        }
        out.push(layout);
    }
    out
}

/// Applies recorded deltas to objects produced by an [`ObjectFactory`].
pub struct Reconstitutor<'a, F: ObjectFactory> {
    aggregate: &'a AggregateTree,
    invocation: &'a QueryTreeInvocation<F::Object>,
    factory: &'a F,
}

impl<'a, F: ObjectFactory> Reconstitutor<'a, F> {
    /// Create a reconstitutor.
    pub fn new(
        aggregate: &'a AggregateTree,
        invocation: &'a QueryTreeInvocation<F::Object>,
        factory: &'a F,
    ) -> Self {
        Self {
            aggregate,
            invocation,
            factory,
        }
    }

    /// Materialize every completed tree. Returns the root objects, with their
    /// identifiers, in row order.
    pub fn run(&self) -> Result<Vec<(Key, F::Object)>, Error> {
        let distinct = self.invocation.identity().mode() == ResolutionMode::Distinct;
        let mut roots = Vec::new();
        let mut replay = Vec::new();
        for tree in visit_order(self.aggregate) {
            if self.invocation.state(tree) != TreeState::Completed {
                continue;
            }
            let deltas = self.invocation.take_deltas(tree);
            let applied = deltas.len();
            if distinct && self.is_inheritance_target(tree) {
                replay.push((tree, deltas.clone()));
            }
            self.apply_tree(tree, deltas, 0, &mut roots)?;
            tracing::trace!(tree = %tree, rows = applied, "reconstituted tree");
        }

        // Subtype trees ran before their owners and only reached the first
        // occurrence of each entity; give the later occurrences the same rows.
        for (tree, deltas) in replay {
            self.apply_tree(tree, deltas, 1, &mut roots)?;
            tracing::trace!(tree = %tree, "replayed subtype tree for later occurrences");
        }
        Ok(roots)
    }

    fn is_inheritance_target(&self, tree: TreeId) -> bool {
        self.aggregate
            .in_edge(tree)
            .is_some_and(|e| self.aggregate.edge(e).kind == InterKind::Inheritance)
    }

    /// Apply the deltas of one tree. Mirror fragments apply to every
    /// occurrence of their entity except the first `skip_mirrored`.
    fn apply_tree(
        &self,
        tree_id: TreeId,
        deltas: Vec<RowDelta>,
        skip_mirrored: usize,
        roots: &mut Vec<(Key, F::Object)>,
    ) -> Result<(), Error> {
        let tree = self.aggregate.tree(tree_id);
        let layouts = layouts(tree);
        let collects_roots = self.aggregate.in_edge(tree_id).is_none();
        let identity = self.invocation.identity();
        let distinct = identity.mode() == ResolutionMode::Distinct;

        // Objects each fragment resolved to on the previous row. More than one
        // only in distinct mode, below a mirror with several occurrences.
        let mut current: HashMap<FragmentId, Vec<F::Object>> = HashMap::new();
        let mut previous_ids: HashMap<FragmentId, Key> = HashMap::new();
        let mut previous: Option<RowDelta> = None;
        let mut seen_roots: HashSet<Key> = HashSet::new();

        for delta in deltas {
            let mut fresh: HashSet<FragmentId> = HashSet::new();

            for layout in &layouts {
                if !layout.positions.iter().any(|&p| delta.is_changed(p)) {
                    continue;
                }

                let parents = match layout.parent {
                    Some(parent) => {
                        let parents = current.get(&parent).cloned().unwrap_or_default();
                        if parents.is_empty() {
                            current.remove(&layout.id);
                            previous_ids.remove(&layout.id);
                            continue;
                        }
                        Some(parents)
                    }
                    None => None,
                };

                let Some(key) = delta.value(layout.identifier).as_key() else {
                    current.remove(&layout.id);
                    previous_ids.remove(&layout.id);
                    continue;
                };

                let is_fresh = previous_ids.get(&layout.id) != Some(&key)
                    || current.get(&layout.id).map_or(true, Vec::is_empty)
                    || layout.parent.is_some_and(|p| fresh.contains(&p));

                let objects = if !is_fresh {
                    let objects = current.get(&layout.id).cloned().unwrap_or_default();
                    for object in &objects {
                        self.continue_object(object, layout, &delta, previous.as_ref());
                    }
                    objects
                } else if layout.is_subtype() {
                    // Same entity as the supertype fragment, seen through its subtype.
                    let Some(objects) = parents else {
                        return Err(Error::InvalidPlan(format!(
                            "subtype fragment at '{}' has no supertype fragment",
                            layout.path
                        )));
                    };
                    for object in &objects {
                        self.populate(object, layout, &delta);
                    }
                    objects
                } else {
                    let type_name = layout
                        .discriminator
                        .and_then(|p| delta.value(p).as_str().map(str::to_string))
                        .unwrap_or_else(|| layout.entity.name().to_string());
                    let identity_key =
                        IdentityKey::new(key.clone(), layout.entity.family(), layout.path.clone());
                    let create = || self.factory.create(&type_name, &key);

                    let objects: Vec<F::Object> = if layout.mirror {
                        identity
                            .lookup_or_create(identity_key, create)
                            .into_iter()
                            .skip(skip_mirrored)
                            .collect()
                    } else {
                        match &parents {
                            None => vec![identity.resolve_owned(identity_key, create).0],
                            Some(parents) => parents
                                .iter()
                                .map(|parent| {
                                    let (object, _) =
                                        identity.resolve_owned(identity_key.clone(), &create);
                                    self.link(parent, layout, &object, &delta);
                                    object
                                })
                                .collect(),
                        }
                    };
                    for object in &objects {
                        self.populate(object, layout, &delta);
                    }

                    if collects_roots
                        && layout.parent.is_none()
                        && (distinct || seen_roots.insert(key.clone()))
                    {
                        if let Some(object) = objects.first() {
                            roots.push((key.clone(), object.clone()));
                        }
                    }
                    objects
                };

                if is_fresh {
                    fresh.insert(layout.id);
                }
                previous_ids.insert(layout.id, key);
                current.insert(layout.id, objects);
            }

            previous = Some(delta);
        }
        Ok(())
    }

    fn link(&self, parent: &F::Object, layout: &FragmentLayout, child: &F::Object, delta: &RowDelta) {
        if let Some(Link::Relation(relation)) = &layout.link {
            let slot = layout.slot.map(|p| delta.value(p));
            self.factory
                .link(parent, &relation.name, child, slot, relation.is_to_many());
        }
    }

    /// Apply every scalar and element column of a freshly resolved object.
    fn populate(&self, object: &F::Object, layout: &FragmentLayout, delta: &RowDelta) {
        for (name, position) in &layout.scalars {
            self.factory.apply_field(object, name, delta.value(*position));
        }
        for (name, position) in &layout.elements {
            let value = delta.value(*position);
            if !value.is_null() {
                self.factory.append_element(object, name, value);
            }
        }
    }

    /// Apply the changed columns of an object carried over from the previous
    /// row. Every element column in the changed set is one more element, even
    /// when it repeats the previous value.
    fn continue_object(
        &self,
        object: &F::Object,
        layout: &FragmentLayout,
        delta: &RowDelta,
        previous: Option<&RowDelta>,
    ) {
        for (name, position) in &layout.scalars {
            let value = delta.value(*position);
            if previous.map_or(true, |p| p.value(*position) != value) {
                self.factory.apply_field(object, name, value);
            }
        }
        for (name, position) in &layout.elements {
            let value: &Value = delta.value(*position);
            if delta.is_changed(*position) && !value.is_null() {
                self.factory.append_element(object, name, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, RelationDef, Schema};
    use crate::plan::{PlanBuilder, SplitSubtype, SplitToRoot, View};
    use crate::resolve::{GraphFactory, NodeRef};
    use std::sync::Arc;

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

    fn plan(view: View, mode: ResolutionMode) -> AggregateTree {
        let mut agg = PlanBuilder::new(&schema()).build(&view, mode).unwrap();
        SplitSubtype::apply(&mut agg).unwrap();
        agg.resolve_fields();
        agg
    }

    fn complete(invocation: &QueryTreeInvocation<NodeRef>, agg: &AggregateTree) {
        for tree in agg.tree_ids() {
            invocation.set_state(tree, TreeState::Completed);
        }
    }

    #[test]
    fn test_visit_order_inheritance_first() {
        let agg = plan(
            View::new("User").with_paths(["name", "pets.breed"]),
            ResolutionMode::Shared,
        );
        assert_eq!(visit_order(&agg), vec![TreeId(1), TreeId(0)]);
    }

    #[test]
    fn test_rows_become_objects() {
        let agg = plan(
            View::new("User").with_paths(["name", "tags", "posts.title"]),
            ResolutionMode::Shared,
        );
        // Columns: id, name, tags, posts.id, posts.title
        let rows = vec![
            vec![Value::Int(1), Value::from("ann"), Value::from("x"), Value::Int(10), Value::from("p10")],
            vec![Value::Int(1), Value::from("ann"), Value::from("x"), Value::Int(11), Value::from("p11")],
            vec![Value::Int(2), Value::from("bob"), Value::Null, Value::Null, Value::Null],
        ];
        let invocation = QueryTreeInvocation::new(&agg);
        invocation.accept_rows(&agg, TreeId(0), rows);
        complete(&invocation, &agg);

        let roots = Reconstitutor::new(&agg, &invocation, &GraphFactory).run().unwrap();
        assert_eq!(roots.len(), 2);
        let ann = &roots[0].1;
        assert_eq!(ann.field("name"), Some(Value::from("ann")));
        assert_eq!(ann.collection("tags"), vec![Value::from("x")]);
        assert_eq!(ann.linked("posts").len(), 2);
        let bob = &roots[1].1;
        assert!(bob.linked("posts").is_empty());
        assert!(bob.collection("tags").is_empty());
    }

    #[test]
    fn test_duplicate_rows_repeat_elements() {
        let agg = plan(
            View::new("User").with_paths(["name", "tags"]),
            ResolutionMode::Shared,
        );
        let rows = vec![
            vec![Value::Int(1), Value::from("ann"), Value::from("x")],
            vec![Value::Int(1), Value::from("ann"), Value::from("x")],
            vec![Value::Int(1), Value::from("ann"), Value::from("y")],
        ];
        let invocation = QueryTreeInvocation::new(&agg);
        invocation.accept_rows(&agg, TreeId(0), rows);
        complete(&invocation, &agg);

        let roots = Reconstitutor::new(&agg, &invocation, &GraphFactory).run().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(
            roots[0].1.collection("tags"),
            vec![Value::from("x"), Value::from("x"), Value::from("y")]
        );
        assert_eq!(roots[0].1.field("name"), Some(Value::from("ann")));
    }

    #[test]
    fn test_shared_and_distinct_identity() {
        let view = View::new("User").with_paths(["name", "posts.title"]);
        // Two users share post 10.
        let rows = || {
            vec![
                vec![Value::Int(1), Value::from("ann"), Value::Int(10), Value::from("p")],
                vec![Value::Int(2), Value::from("bob"), Value::Int(10), Value::from("p")],
            ]
        };

        let shared = plan(view.clone(), ResolutionMode::Shared);
        let invocation = QueryTreeInvocation::new(&shared);
        invocation.accept_rows(&shared, TreeId(0), rows());
        complete(&invocation, &shared);
        let roots = Reconstitutor::new(&shared, &invocation, &GraphFactory).run().unwrap();
        assert!(Arc::ptr_eq(&roots[0].1.linked("posts")[0], &roots[1].1.linked("posts")[0]));

        let distinct = plan(view, ResolutionMode::Distinct);
        let invocation = QueryTreeInvocation::new(&distinct);
        invocation.accept_rows(&distinct, TreeId(0), rows());
        complete(&invocation, &distinct);
        let roots = Reconstitutor::new(&distinct, &invocation, &GraphFactory).run().unwrap();
        assert!(!Arc::ptr_eq(&roots[0].1.linked("posts")[0], &roots[1].1.linked("posts")[0]));
    }

    #[test]
    fn test_split_collection_merges_into_root_object() {
        let mut agg = PlanBuilder::new(&schema())
            .build(
                &View::new("User").with_paths(["name", "tags", "posts.title"]),
                ResolutionMode::Shared,
            )
            .unwrap();
        SplitToRoot::apply(&mut agg).unwrap();
        agg.resolve_fields();
        assert_eq!(agg.vertex_count(), 2);

        let invocation = QueryTreeInvocation::new(&agg);
        invocation.accept_rows(
            &agg,
            TreeId(0),
            vec![
                vec![Value::Int(1), Value::from("ann"), Value::Int(10), Value::from("p10")],
                vec![Value::Int(1), Value::from("ann"), Value::Int(11), Value::from("p11")],
            ],
        );
        invocation.accept_rows(
            &agg,
            TreeId(1),
            vec![
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(1), Value::from("b")],
                vec![Value::Int(1), Value::from("c")],
            ],
        );
        complete(&invocation, &agg);

        let roots = Reconstitutor::new(&agg, &invocation, &GraphFactory).run().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].1.linked("posts").len(), 2);
        assert_eq!(roots[0].1.collection("tags").len(), 3);
    }
}
