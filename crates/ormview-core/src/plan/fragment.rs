//! Query fragments and intra-query edges.

use std::fmt;

use crate::catalog::{Link, TypeRef};

/// Stable handle of a fragment inside its owning [`QueryTree`](super::QueryTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(pub(crate) usize);

impl FragmentId {
    /// Arena index of the fragment.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// One entity-type access point within a single query.
#[derive(Debug, Clone)]
pub struct QueryFragment {
    /// Entity type fetched by this fragment.
    pub entity: TypeRef,
    /// Alias, unique within the owning query.
    pub alias: String,
    /// Dotted path from the aggregate root to this fragment.
    pub path: String,
    /// Requested scalar field names.
    pub fields: Vec<String>,
    /// Requested primitive-collection field names.
    pub collections: Vec<String>,
    /// Primitive-collection paths in this fragment's subtree.
    pub simple_collection_count: usize,
    /// Independent to-many paths in this fragment's subtree.
    pub parallel_collection_count: usize,
    /// The fragment re-fetches an entity owned by a parent query (a correlation
    /// copy). Its object is looked up rather than linked to a parent.
    pub mirror: bool,
}

impl QueryFragment {
    /// Create an empty fragment for `entity` at `path`.
    pub fn new(entity: TypeRef, path: impl Into<String>) -> Self {
        Self {
            entity,
            alias: String::new(),
            path: path.into(),
            fields: Vec::new(),
            collections: Vec::new(),
            simple_collection_count: 0,
            parallel_collection_count: 0,
            mirror: false,
        }
    }

    /// Copy carrying only the identity of this fragment (no requested fields).
    pub fn identity_copy(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            alias: String::new(),
            path: self.path.clone(),
            fields: Vec::new(),
            collections: Vec::new(),
            simple_collection_count: 0,
            parallel_collection_count: 0,
            mirror: true,
        }
    }

    /// Whether field generation populates this fragment.
    pub fn is_populated(&self) -> bool {
        !self.entity.is_open()
    }
}

/// Directed edge between two fragments of the same query.
#[derive(Debug, Clone, PartialEq)]
pub struct IntraEdge {
    /// Parent fragment.
    pub from: FragmentId,
    /// Child fragment.
    pub to: FragmentId,
    /// Relation (or inheritance link) connecting them.
    pub link: Link,
}
