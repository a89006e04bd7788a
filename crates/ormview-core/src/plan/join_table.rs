//! Join-table amending.
//!
//! A custom child query that is not a full graph query cannot take an
//! injected identifier predicate. Its parent instead copies the correlation
//! identifiers into a shared side table, and the child reads them from there
//! by invocation id.

use crate::dispatch::SideTables;
use crate::error::Error;

use super::aggregate::AggregateTree;
use super::tree::PostAction;

/// Registers join-table population on parents of non-graph custom queries.
pub struct JoinTableAmender<'a> {
    table: Option<&'a str>,
    side_tables: &'a dyn SideTables,
}

impl<'a> JoinTableAmender<'a> {
    /// Create an amender using `table` as the shared side table.
    pub fn new(table: Option<&'a str>, side_tables: &'a dyn SideTables) -> Self {
        Self { table, side_tables }
    }

    /// Amend every qualifying edge. Returns the number of edges amended.
    ///
    /// Fails with [`Error::MissingJoinTable`] when an edge needs a side table
    /// and none is configured or the store does not know it.
    pub fn apply(&self, aggregate: &mut AggregateTree) -> Result<usize, Error> {
        let mut amended = 0;
        let edges: Vec<_> = aggregate.edge_ids().collect();

        for edge_id in edges {
            let edge = aggregate.edge(edge_id);
            let needs_table = aggregate
                .tree(edge.to)
                .custom_query()
                .is_some_and(|c| !c.graph_query);
            if !needs_table {
                continue;
            }

            let table = self
                .table
                .ok_or_else(|| Error::MissingJoinTable("<unconfigured>".to_string()))?;
            if !self.side_tables.has_side_table(table) {
                return Err(Error::MissingJoinTable(table.to_string()));
            }

            let parent = edge.from;
            aggregate.tree_mut(parent).add_action(PostAction::PopulateJoinTable {
                edge: edge_id,
                table: table.to_string(),
            });
            amended += 1;
        }

        Ok(amended)
    }
}
