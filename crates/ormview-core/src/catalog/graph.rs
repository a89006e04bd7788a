//! Type-graph provider contract.
//!
//! A provider turns a root type and a set of requested dotted paths into a
//! graph of reachable states. A state is a (type, path) pair; an edge is
//! either a navigable relation or an inheritance link to a subtype state at
//! the same path.

use super::entity::TypeRef;
use super::relation::RelationDef;
use crate::error::Error;

/// Label of an edge between two states, or between two fragments of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Link {
    /// Navigable relation.
    Relation(RelationDef),
    /// Untyped inheritance link from a supertype to one of its subtypes.
    Subtype,
}

impl Link {
    /// Whether following this link can multiply rows.
    pub fn is_to_many(&self) -> bool {
        match self {
            Link::Relation(rel) => rel.is_to_many(),
            Link::Subtype => false,
        }
    }

    /// Whether this is an inheritance link.
    pub fn is_subtype(&self) -> bool {
        matches!(self, Link::Subtype)
    }

    /// Relation definition, if navigable.
    pub fn relation(&self) -> Option<&RelationDef> {
        match self {
            Link::Relation(rel) => Some(rel),
            Link::Subtype => None,
        }
    }

    /// Display label.
    pub fn label(&self) -> &str {
        match self {
            Link::Relation(rel) => &rel.name,
            Link::Subtype => "<subtype>",
        }
    }
}

/// A (type, path) state reached by the requested paths.
#[derive(Debug, Clone)]
pub struct TypeState {
    /// Entity type at this state.
    pub entity: TypeRef,
    /// Dotted path from the root ("" for the root).
    pub path: String,
    /// Requested scalar field names, in request order.
    pub fields: Vec<String>,
    /// Requested primitive-collection field names.
    pub collections: Vec<String>,
}

/// Edge between two states.
#[derive(Debug, Clone)]
pub struct TypeEdge {
    /// Source state index.
    pub from: usize,
    /// Target state index.
    pub to: usize,
    /// Edge label.
    pub link: Link,
}

/// Graph of states reachable from a root type. State 0 is the root.
#[derive(Debug, Clone)]
pub struct TypeGraph {
    /// All states; index 0 is the root.
    pub states: Vec<TypeState>,
    /// All edges, in discovery order.
    pub edges: Vec<TypeEdge>,
}

impl TypeGraph {
    /// Create a graph with just the root state.
    pub fn new(root: TypeRef) -> Self {
        Self {
            states: vec![TypeState {
                entity: root,
                path: String::new(),
                fields: Vec::new(),
                collections: Vec::new(),
            }],
            edges: Vec::new(),
        }
    }

    /// Follow (or create) the edge `link` out of `from`, landing on a state of `entity` at `path`.
    pub fn step(&mut self, from: usize, link: Link, entity: TypeRef, path: String) -> usize {
        if let Some(edge) = self
            .edges
            .iter()
            .find(|e| e.from == from && e.link == link && self.states[e.to].entity == entity)
        {
            return edge.to;
        }

        let to = self.states.len();
        self.states.push(TypeState {
            entity,
            path,
            fields: Vec::new(),
            collections: Vec::new(),
        });
        self.edges.push(TypeEdge { from, to, link });
        to
    }

    /// Outgoing edges of a state.
    pub fn edges_from(&self, state: usize) -> impl Iterator<Item = &TypeEdge> {
        self.edges.iter().filter(move |e| e.from == state)
    }

    /// Find the state at `path` that is not a subtype refinement of another state.
    pub fn state_at(&self, path: &str) -> Option<usize> {
        (0..self.states.len()).find(|&idx| {
            self.states[idx].path == path
                && !self.edges.iter().any(|e| e.to == idx && e.link.is_subtype())
        })
    }
}

/// Resolves requested attribute paths into a [`TypeGraph`].
pub trait TypeGraphProvider: Send + Sync {
    /// Look up the descriptor for an entity name.
    fn type_ref(&self, entity: &str) -> Result<TypeRef, Error>;

    /// Resolve `paths` (dotted, relative to `root`) into a graph of states.
    fn resolve(&self, root: &TypeRef, paths: &[String]) -> Result<TypeGraph, Error>;

    /// Version of the metadata, used to invalidate cached plans.
    fn version(&self) -> u64 {
        0
    }
}
