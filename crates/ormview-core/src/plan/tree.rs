//! Query trees: everything fetchable in one round trip.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::catalog::{join_path, CollectionKind, Link, TypeRef};

use super::aggregate::InterEdgeId;
use super::fragment::{FragmentId, IntraEdge, QueryFragment};

/// Role of a column in a result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// The fragment's identifier.
    Identifier,
    /// Concrete type name of the row's entity.
    Discriminator,
    /// Position of the entity inside an ordered parent collection.
    ListIndex,
    /// Key of the entity inside a keyed parent collection.
    MapKey,
    /// A requested scalar field.
    Scalar,
    /// One element of a primitive collection.
    Element,
    /// A column of a custom query carrying a descendant's identifier.
    Correlation,
}

/// A resolved, globally positioned column of a [`QueryTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryField {
    /// Fragment the column belongs to.
    pub fragment: FragmentId,
    /// Field name on the fragment (or marker name).
    pub name: String,
    /// Full dotted path from the aggregate root.
    pub path: String,
    /// Entity boundary the column belongs to, used by row diffing.
    pub scope: String,
    /// Column role.
    pub kind: ColumnKind,
    /// Position of the column in result rows.
    pub position: usize,
}

/// Opaque handle produced by query-text synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryHandle(Arc<str>);

impl QueryHandle {
    /// Wrap synthesized query text.
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    /// The synthesized query text.
    pub fn text(&self) -> &str {
        &self.0
    }
}

/// An externally authored query standing in for a generated one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomQuery {
    /// Name the data store knows the query by.
    pub name: String,
    /// Declared result columns. Dotted names carry identifiers of descendants.
    pub columns: Vec<String>,
    /// Whether the query is a full graph query that accepts an injected
    /// correlation predicate.
    pub graph_query: bool,
    /// Whether the query populates a temp table visible only to its own session.
    pub session_temp_table: bool,
}

impl CustomQuery {
    /// Create a custom query declaring `columns`.
    pub fn new<'a>(name: impl Into<String>, columns: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(str::to_string).collect(),
            graph_query: false,
            session_temp_table: false,
        }
    }

    /// Mark the query as a full graph query.
    pub fn as_graph_query(mut self) -> Self {
        self.graph_query = true;
        self
    }

    /// Mark the query as populating a session-bound temp table.
    pub fn with_session_temp_table(mut self) -> Self {
        self.session_temp_table = true;
        self
    }
}

/// Action run after a tree's query completes and before its children run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Copy the correlation identifiers for `edge` into a side table, tagged
    /// with the child tree's invocation id.
    PopulateJoinTable {
        /// Outgoing inter-query edge whose child reads the side table.
        edge: InterEdgeId,
        /// Side table name.
        table: String,
    },
}

/// A tree of fragments executable as one query.
///
/// Fragments live in an arena; detached fragments stay in the arena but are
/// unreachable from the root and ignored by every traversal.
#[derive(Debug, Clone)]
pub struct QueryTree {
    aggregate_type: TypeRef,
    fragments: Vec<QueryFragment>,
    edges: Vec<IntraEdge>,
    root: FragmentId,
    fields: Vec<QueryField>,
    handle: Option<QueryHandle>,
    actions: Vec<PostAction>,
    custom: Option<CustomQuery>,
    inner: bool,
}

impl QueryTree {
    /// Create a tree whose root is `root`.
    pub fn new(aggregate_type: TypeRef, root: QueryFragment) -> Self {
        let mut tree = Self {
            aggregate_type,
            fragments: Vec::new(),
            edges: Vec::new(),
            root: FragmentId(0),
            fields: Vec::new(),
            handle: None,
            actions: Vec::new(),
            custom: None,
            inner: false,
        };
        tree.root = tree.add_fragment(root);
        tree
    }

    /// Create a single-fragment tree for a custom query.
    pub fn custom(aggregate_type: TypeRef, root: QueryFragment, query: CustomQuery) -> Self {
        let mut tree = Self::new(aggregate_type, root);
        tree.custom = Some(query);
        tree
    }

    /// Aggregate (root) type of the view this tree belongs to.
    pub fn aggregate_type(&self) -> &TypeRef {
        &self.aggregate_type
    }

    /// Root fragment.
    pub fn root(&self) -> FragmentId {
        self.root
    }

    /// Add a fragment, assigning it a unique alias.
    pub fn add_fragment(&mut self, mut fragment: QueryFragment) -> FragmentId {
        let id = FragmentId(self.fragments.len());
        fragment.alias = format!("t{}", id.0);
        self.fragments.push(fragment);
        id
    }

    /// Connect two fragments.
    pub fn connect(&mut self, from: FragmentId, to: FragmentId, link: Link) {
        self.edges.push(IntraEdge { from, to, link });
    }

    /// Get a fragment.
    pub fn fragment(&self, id: FragmentId) -> &QueryFragment {
        &self.fragments[id.0]
    }

    /// Get a fragment mutably.
    pub fn fragment_mut(&mut self, id: FragmentId) -> &mut QueryFragment {
        &mut self.fragments[id.0]
    }

    /// Outgoing edges of a fragment, in insertion order.
    pub fn children(&self, id: FragmentId) -> impl Iterator<Item = &IntraEdge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// The edge into a fragment, if it is not the root.
    pub fn parent_edge(&self, id: FragmentId) -> Option<&IntraEdge> {
        self.edges.iter().find(|e| e.to == id)
    }

    /// All live intra-query edges.
    pub fn edges(&self) -> &[IntraEdge] {
        &self.edges
    }

    /// Reachable fragments in pre-order (parent before children).
    pub fn pre_order(&self) -> Vec<FragmentId> {
        self.subtree(self.root)
    }

    /// Fragments of the subtree rooted at `id`, in pre-order.
    pub fn subtree(&self, id: FragmentId) -> Vec<FragmentId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            let children: Vec<FragmentId> = self.children(current).map(|e| e.to).collect();
            stack.extend(children.into_iter().rev());
        }
        order
    }

    /// Chain of fragments from the root down to (excluding) `id`.
    pub fn ancestors(&self, id: FragmentId) -> Vec<FragmentId> {
        let mut chain = Vec::new();
        let mut current = id;
        while let Some(edge) = self.parent_edge(current) {
            chain.push(edge.from);
            current = edge.from;
        }
        chain.reverse();
        chain
    }

    /// Number of reachable fragments.
    pub fn fragment_count(&self) -> usize {
        self.pre_order().len()
    }

    /// Whether any reachable fragment has subtype children.
    pub fn has_subtype_edges(&self) -> bool {
        let live: HashSet<FragmentId> = self.pre_order().into_iter().collect();
        self.edges
            .iter()
            .any(|e| e.link.is_subtype() && live.contains(&e.from))
    }

    /// Copy the subtree rooted at `child` into `target`, hanging it under
    /// `under` with `link`. Returns the old-to-new fragment mapping.
    pub(crate) fn copy_subtree_into(
        &self,
        child: FragmentId,
        target: &mut QueryTree,
        under: FragmentId,
        link: Link,
    ) -> HashMap<FragmentId, FragmentId> {
        let mut mapping = HashMap::new();
        for old in self.subtree(child) {
            let new = target.add_fragment(self.fragment(old).clone());
            mapping.insert(old, new);
        }
        target.connect(under, mapping[&child], link);
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (mapping.get(&edge.from), mapping.get(&edge.to)) {
                target.connect(from, to, edge.link.clone());
            }
        }
        mapping
    }

    /// Copy the subtree rooted at `id` into a new tree of its own.
    pub(crate) fn extract_subtree(&self, id: FragmentId) -> (QueryTree, HashMap<FragmentId, FragmentId>) {
        let mut tree = QueryTree::new(self.aggregate_type.clone(), self.fragment(id).clone());
        let mut mapping = HashMap::from([(id, tree.root())]);
        let under = tree.root();
        let children: Vec<IntraEdge> = self.children(id).cloned().collect();
        for edge in children {
            mapping.extend(self.copy_subtree_into(edge.to, &mut tree, under, edge.link));
        }
        (tree, mapping)
    }

    /// Detach the subtree rooted at `child` from this tree.
    pub(crate) fn detach(&mut self, child: FragmentId) {
        let gone: HashSet<FragmentId> = self.subtree(child).into_iter().collect();
        self.edges.retain(|e| !gone.contains(&e.to));
    }

    /// Resolved, positioned columns (empty until [`resolve_fields`](Self::resolve_fields) runs).
    pub fn fields(&self) -> &[QueryField] {
        &self.fields
    }

    /// Columns belonging to one fragment.
    pub fn fields_of(&self, id: FragmentId) -> impl Iterator<Item = &QueryField> {
        self.fields.iter().filter(move |f| f.fragment == id)
    }

    /// Position of a fragment's identifier column.
    pub fn identifier_position(&self, id: FragmentId) -> Option<usize> {
        self.fields_of(id)
            .find(|f| f.kind == ColumnKind::Identifier)
            .map(|f| f.position)
    }

    /// Position of the column with the given full path.
    pub fn position_of(&self, path: &str) -> Option<usize> {
        self.fields.iter().find(|f| f.path == path).map(|f| f.position)
    }

    /// Generate the globally ordered column list.
    ///
    /// Columns are emitted per fragment in pre-order, so every fragment's
    /// columns form one contiguous block.
    pub fn resolve_fields(&mut self) {
        let mut fields = Vec::new();

        if let Some(custom) = &self.custom {
            let root = self.fragment(self.root);
            let related: Vec<FragmentId> = self.pre_order().into_iter().skip(1).collect();
            for column in &custom.columns {
                let mut fragment = self.root;
                let (kind, scope) = if column == root.entity.identity_field() {
                    (ColumnKind::Identifier, root.path.clone())
                } else if let Some((prefix, name)) = column.rsplit_once('.') {
                    let scope = join_path(&root.path, prefix);
                    match related.iter().find(|&&id| {
                        let f = self.fragment(id);
                        f.path == scope && f.entity.identity_field() == name
                    }) {
                        Some(&id) => {
                            fragment = id;
                            (ColumnKind::Identifier, scope)
                        }
                        None => (ColumnKind::Correlation, scope),
                    }
                } else {
                    (ColumnKind::Scalar, root.path.clone())
                };
                fields.push(QueryField {
                    fragment,
                    name: column.clone(),
                    path: join_path(&root.path, column),
                    scope,
                    kind,
                    position: fields.len(),
                });
            }
            self.fields = fields;
            return;
        }

        for id in self.pre_order() {
            let fragment = self.fragment(id);
            if !fragment.is_populated() {
                continue;
            }
            let path = &fragment.path;
            let mut push = |name: &str, scope: String, kind: ColumnKind| {
                let position = fields.len();
                fields.push(QueryField {
                    fragment: id,
                    name: name.to_string(),
                    path: join_path(path, name),
                    scope,
                    kind,
                    position,
                });
            };

            push(
                fragment.entity.identity_field(),
                path.clone(),
                ColumnKind::Identifier,
            );
            if fragment.entity.has_subtypes() {
                push("@type", path.clone(), ColumnKind::Discriminator);
            }
            match self
                .parent_edge(id)
                .and_then(|e| e.link.relation())
                .map(|r| r.kind)
            {
                Some(CollectionKind::List) => push("@index", path.clone(), ColumnKind::ListIndex),
                Some(CollectionKind::Map) => push("@key", path.clone(), ColumnKind::MapKey),
                _ => {}
            }
            for name in &fragment.fields {
                push(name, path.clone(), ColumnKind::Scalar);
            }
            for name in &fragment.collections {
                push(name, join_path(path, name), ColumnKind::Element);
            }
        }

        self.fields = fields;
    }

    /// Synthesized query handle.
    pub fn handle(&self) -> Option<&QueryHandle> {
        self.handle.as_ref()
    }

    /// Attach the synthesized query handle.
    pub fn set_handle(&mut self, handle: QueryHandle) {
        self.handle = Some(handle);
    }

    /// Post-execution actions.
    pub fn actions(&self) -> &[PostAction] {
        &self.actions
    }

    /// Register a post-execution action (idempotent).
    pub fn add_action(&mut self, action: PostAction) {
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
    }

    /// Custom query standing in for this tree, if any.
    pub fn custom_query(&self) -> Option<&CustomQuery> {
        self.custom.as_ref()
    }

    /// Whether non-root fragments must be inner-joined to the root.
    pub fn is_inner(&self) -> bool {
        self.inner
    }

    /// Require non-root fragments to be present (inner-join semantics).
    pub fn set_inner(&mut self, inner: bool) {
        self.inner = inner;
    }

    /// Whether this tree populates a session-bound temp table.
    pub fn populates_session_table(&self) -> bool {
        self.custom.as_ref().is_some_and(|c| c.session_temp_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, RelationDef, Schema, TypeGraphProvider};

    fn schema() -> Schema {
        Schema::new(1)
            .with_entity(
                EntityDef::new("User", "id")
                    .with_scalars(["id", "name"])
                    .with_field(FieldDef::collection("tags")),
            )
            .with_entity(EntityDef::new("Post", "id").with_scalars(["id", "title"]))
            .with_relation(RelationDef::list("posts", "User", "Post"))
    }

    fn sample_tree() -> QueryTree {
        let schema = schema();
        let user = schema.type_ref("User").unwrap();
        let post = schema.type_ref("Post").unwrap();

        let mut root = QueryFragment::new(user.clone(), "");
        root.fields.push("name".into());
        root.collections.push("tags".into());
        let mut tree = QueryTree::new(user, root);

        let mut posts = QueryFragment::new(post, "posts");
        posts.fields.push("title".into());
        let posts = tree.add_fragment(posts);
        let rel = RelationDef::list("posts", "User", "Post");
        tree.connect(tree.root(), posts, Link::Relation(rel));
        tree
    }

    #[test]
    fn test_aliases_are_unique() {
        let tree = sample_tree();
        assert_eq!(tree.fragment(FragmentId(0)).alias, "t0");
        assert_eq!(tree.fragment(FragmentId(1)).alias, "t1");
    }

    #[test]
    fn test_resolve_fields_contiguous_blocks() {
        let mut tree = sample_tree();
        tree.resolve_fields();

        let paths: Vec<&str> = tree.fields().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["id", "name", "tags", "posts.id", "posts.@index", "posts.title"]
        );
        assert_eq!(tree.identifier_position(FragmentId(1)), Some(3));
        assert_eq!(tree.fields()[2].scope, "tags");
        assert_eq!(tree.fields()[2].kind, ColumnKind::Element);
        assert_eq!(tree.fields()[4].kind, ColumnKind::ListIndex);
    }

    #[test]
    fn test_copy_and_detach_subtree() {
        let tree = sample_tree();
        let mut original = tree.clone();
        let mut target = QueryTree::new(
            tree.aggregate_type().clone(),
            tree.fragment(tree.root()).identity_copy(),
        );
        let posts = FragmentId(1);
        let link = tree.parent_edge(posts).unwrap().link.clone();
        let under = target.root();
        let mapping = original.copy_subtree_into(posts, &mut target, under, link);
        original.detach(posts);

        assert_eq!(original.fragment_count(), 1);
        assert_eq!(target.fragment_count(), 2);
        assert_eq!(target.fragment(mapping[&posts]).path, "posts");
        assert!(target.fragment(target.root()).mirror);
    }

    #[test]
    fn test_custom_tree_columns() {
        let schema = schema();
        let user = schema.type_ref("User").unwrap();
        let query = CustomQuery::new("top_users", ["id", "name", "posts.id"]);
        let mut tree = QueryTree::custom(user.clone(), QueryFragment::new(user, ""), query);
        tree.resolve_fields();

        let kinds: Vec<ColumnKind> = tree.fields().iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![ColumnKind::Identifier, ColumnKind::Scalar, ColumnKind::Correlation]
        );
        assert_eq!(tree.position_of("posts.id"), Some(2));
    }

    #[test]
    fn test_custom_tree_related_identifier() {
        let schema = schema();
        let user = schema.type_ref("User").unwrap();
        let post = schema.type_ref("Post").unwrap();
        let query = CustomQuery::new("top_users", ["id", "posts.id", "name"]);
        let mut tree = QueryTree::custom(user.clone(), QueryFragment::new(user, ""), query);
        let posts = tree.add_fragment(QueryFragment::new(post, "posts"));
        tree.connect(
            tree.root(),
            posts,
            Link::Relation(RelationDef::list("posts", "User", "Post")),
        );
        tree.resolve_fields();

        assert_eq!(tree.fields()[1].kind, ColumnKind::Identifier);
        assert_eq!(tree.identifier_position(posts), Some(1));
        assert_eq!(tree.fields()[1].scope, "posts");
    }
}
