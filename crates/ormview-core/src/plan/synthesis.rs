//! Query-text synthesis.
//!
//! The dispatcher only needs an opaque [`QueryHandle`] per tree; how the text
//! is produced is up to the data store integration. [`ExplainSynthesizer`]
//! renders a readable pseudo-SQL form used by the in-memory store and by
//! plan explanations.

use std::fmt::Write as _;

use crate::error::Error;

use super::tree::{QueryHandle, QueryTree};

/// Turns a query tree into an executable handle.
pub trait QuerySynthesizer: Send + Sync {
    /// Synthesize the query for `tree`. Called after field resolution.
    fn synthesize(&self, tree: &QueryTree) -> Result<QueryHandle, Error>;
}

/// Renders pseudo-SQL for a tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainSynthesizer;

impl QuerySynthesizer for ExplainSynthesizer {
    fn synthesize(&self, tree: &QueryTree) -> Result<QueryHandle, Error> {
        let root = tree.fragment(tree.root());
        let mut sql = String::new();

        if let Some(custom) = tree.custom_query() {
            let _ = write!(sql, "CALL {}({})", custom.name, custom.columns.join(", "));
            if root.mirror && custom.graph_query {
                let _ = write!(sql, " WHERE {} IN (:correlation)", root.entity.identity_field());
            }
            return Ok(QueryHandle::new(sql));
        }

        if tree.fields().is_empty() {
            return Err(Error::InvalidPlan(format!(
                "query tree rooted at '{}' has no resolved fields",
                root.entity
            )));
        }

        let columns: Vec<String> = tree
            .fields()
            .iter()
            .map(|f| format!("{}.{}", tree.fragment(f.fragment).alias, f.name))
            .collect();
        let _ = write!(sql, "SELECT {} FROM {} {}", columns.join(", "), root.entity, root.alias);

        let join = if tree.is_inner() { "JOIN" } else { "LEFT JOIN" };
        for id in tree.pre_order().into_iter().skip(1) {
            let Some(edge) = tree.parent_edge(id) else {
                continue;
            };
            let parent = tree.fragment(edge.from);
            let child = tree.fragment(id);
            match edge.link.relation() {
                Some(rel) => {
                    let _ = write!(
                        sql,
                        " {join} {} {} ON {}.{} = {}",
                        child.entity, child.alias, parent.alias, rel.name, child.alias
                    );
                }
                None => {
                    let _ = write!(
                        sql,
                        " {join} {} {} ON {} IS {}",
                        child.entity, child.alias, child.alias, parent.alias
                    );
                }
            }
        }

        if root.mirror {
            let _ = write!(
                sql,
                " WHERE {}.{} IN (:correlation)",
                root.alias,
                root.entity.identity_field()
            );
        }

        let order: Vec<String> = tree
            .pre_order()
            .into_iter()
            .filter(|&id| tree.fragment(id).is_populated())
            .map(|id| {
                let f = tree.fragment(id);
                format!("{}.{}", f.alias, f.entity.identity_field())
            })
            .collect();
        let _ = write!(sql, " ORDER BY {}", order.join(", "));

        Ok(QueryHandle::new(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, Link, RelationDef, Schema, TypeGraphProvider};
    use crate::plan::{CustomQuery, QueryFragment};

    fn schema() -> Schema {
        Schema::new(1)
            .with_entity(EntityDef::new("User", "id").with_scalars(["id", "name"]))
            .with_entity(EntityDef::new("Post", "id").with_scalars(["id", "title"]))
    }

    #[test]
    fn test_synthesize_generated_tree() {
        let schema = schema();
        let user = schema.type_ref("User").unwrap();
        let mut root = QueryFragment::new(user.clone(), "");
        root.fields.push("name".into());
        let mut tree = QueryTree::new(user, root);
        let mut posts = QueryFragment::new(schema.type_ref("Post").unwrap(), "posts");
        posts.fields.push("title".into());
        let posts = tree.add_fragment(posts);
        tree.connect(
            tree.root(),
            posts,
            Link::Relation(RelationDef::one_to_many("posts", "User", "Post")),
        );
        tree.resolve_fields();

        let handle = ExplainSynthesizer.synthesize(&tree).unwrap();
        assert_eq!(
            handle.text(),
            "SELECT t0.id, t0.name, t1.id, t1.title FROM User t0 \
             LEFT JOIN Post t1 ON t0.posts = t1 ORDER BY t0.id, t1.id"
        );
    }

    #[test]
    fn test_synthesize_custom_tree() {
        let schema = schema();
        let user = schema.type_ref("User").unwrap();
        let mut tree = QueryTree::custom(
            user.clone(),
            QueryFragment::new(user, ""),
            CustomQuery::new("top_users", ["id", "name"]),
        );
        tree.resolve_fields();

        let handle = ExplainSynthesizer.synthesize(&tree).unwrap();
        assert_eq!(handle.text(), "CALL top_users(id, name)");
    }

    #[test]
    fn test_unresolved_tree_rejected() {
        let schema = schema();
        let user = schema.type_ref("User").unwrap();
        let tree = QueryTree::new(user.clone(), QueryFragment::new(user, ""));
        assert!(ExplainSynthesizer.synthesize(&tree).is_err());
    }
}
