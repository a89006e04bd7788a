//! Data-store session contract.

use crate::error::Error;
use crate::plan::{QueryTree, TreeId};
use crate::value::{Key, Row};

/// Knows which shared side tables exist in the data store.
pub trait SideTables {
    /// Whether a side table named `name` exists.
    fn has_side_table(&self, name: &str) -> bool;
}

/// How a child query is restricted to its parent's identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// Root query: no restriction.
    None,
    /// Only entities whose identifier is in the list.
    InList(Vec<Key>),
    /// Only entities whose identifier was copied into `table` under `invocation_id`.
    JoinTable {
        /// Side table name.
        table: String,
        /// Invocation id of the child tree.
        invocation_id: u64,
    },
    /// Only entities whose identifier appears in column `position` of the
    /// rows the same session produced for `parent`.
    Subquery {
        /// Parent tree.
        parent: TreeId,
        /// Column position in the parent's rows.
        position: usize,
    },
}

/// One connection to the data store. Sessions are never shared between
/// dispatcher workers.
pub trait Session {
    /// Bootstrap the session before running a query (per-thread setup).
    fn init_for_query(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Run the query of `tree` restricted by `correlation`, returning rows
    /// positioned per the tree's resolved fields and sorted by every
    /// fragment's identifier from the root down.
    fn execute(&mut self, id: TreeId, tree: &QueryTree, correlation: &Correlation) -> Result<Vec<Row>, Error>;

    /// Copy `ids` into the shared side table `table`, tagged with `invocation_id`.
    fn populate_join_table(&mut self, table: &str, invocation_id: u64, ids: &[Key]) -> Result<(), Error>;
}

/// Opens sessions; shared by every dispatcher worker.
pub trait SessionFactory: SideTables + Send + Sync {
    /// Session type.
    type Session: Session;

    /// Open a new session.
    fn open_session(&self) -> Result<Self::Session, Error>;
}
