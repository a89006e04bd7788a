//! Query-tree dispatch.
//!
//! A dispatcher walks an [`AggregateTree`] top down, running each query tree
//! once its parent has completed. Rows are fed into the shared
//! [`QueryTreeInvocation`], which records deltas for reconstitution and the
//! correlation identifiers each child needs.

mod latch;
mod parallel;
mod serial;
mod session;

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::Error;
use crate::plan::{AggregateTree, JoinMechanism, PostAction, TreeId};
use crate::resolve::{QueryTreeInvocation, TreeState};

pub use latch::CompletionCounter;
pub use parallel::ParallelDispatcher;
pub use serial::SerialDispatcher;
pub use session::{Correlation, Session, SessionFactory, SideTables};

/// Default worker count of the parallel dispatcher.
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of correlation identifiers per in-list query.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// How query trees are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// One thread, one session, breadth first.
    #[default]
    Serial,
    /// A fixed pool of workers, each with its own session.
    Parallel {
        /// Worker count.
        workers: usize,
    },
}

impl DispatchMode {
    /// Parallel dispatch with the default worker count.
    pub fn parallel() -> Self {
        DispatchMode::Parallel {
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Scheduling mode.
    pub mode: DispatchMode,
    /// Maximum correlation identifiers per in-list query.
    pub batch_size: usize,
    /// Whether the serial dispatcher may correlate children with a
    /// sub-query over the parent's results.
    pub allow_subquery: bool,
    /// Whether a fetch with failed branches still returns its partial result.
    pub allow_partial: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            allow_subquery: false,
            allow_partial: false,
        }
    }
}

impl DispatchConfig {
    /// Serial dispatch with default settings.
    pub fn serial() -> Self {
        Self::default()
    }

    /// Parallel dispatch with `workers` workers.
    pub fn parallel(workers: usize) -> Self {
        Self::default().with_mode(DispatchMode::Parallel { workers })
    }

    /// Set the scheduling mode.
    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the in-list batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Allow correlated sub-queries in serial dispatch.
    pub fn with_subquery(mut self, allow: bool) -> Self {
        self.allow_subquery = allow;
        self
    }

    /// Accept partial results when branches fail.
    pub fn with_partial(mut self, allow: bool) -> Self {
        self.allow_partial = allow;
        self
    }
}

/// A query tree whose execution failed during parallel dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchFailure {
    /// The failed tree. Its descendants are reported as skipped.
    pub tree: TreeId,
    /// Error or panic message.
    pub error: String,
}

/// Outcome of dispatching one aggregate tree.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Final state of every tree.
    pub states: BTreeMap<TreeId, TreeState>,
    /// Branches that failed.
    pub failures: Vec<BranchFailure>,
    /// Query executions per tree; more than one when identifiers were batched.
    pub executions: BTreeMap<TreeId, usize>,
    /// Rows accepted per tree.
    pub rows: BTreeMap<TreeId, usize>,
}

impl DispatchReport {
    pub(crate) fn collect<O: Clone>(
        aggregate: &AggregateTree,
        invocation: &QueryTreeInvocation<O>,
        failures: Vec<BranchFailure>,
    ) -> Self {
        Self {
            states: invocation.states(),
            failures,
            executions: invocation.executions(),
            rows: aggregate
                .tree_ids()
                .map(|tree| (tree, invocation.row_count(tree)))
                .collect(),
        }
    }

    /// State of a tree.
    pub fn state(&self, tree: TreeId) -> TreeState {
        self.states.get(&tree).copied().unwrap_or(TreeState::Pending)
    }

    /// Query executions of a tree.
    pub fn executions_of(&self, tree: TreeId) -> usize {
        self.executions.get(&tree).copied().unwrap_or(0)
    }

    /// Rows accepted for a tree.
    pub fn rows_of(&self, tree: TreeId) -> usize {
        self.rows.get(&tree).copied().unwrap_or(0)
    }

    /// Trees in `state`.
    pub fn trees_in(&self, state: TreeState) -> Vec<TreeId> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(t, _)| *t)
            .collect()
    }

    /// Whether every tree either completed or was skipped for lack of
    /// correlation identifiers.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
            && self
                .states
                .values()
                .all(|s| matches!(s, TreeState::Completed | TreeState::Skipped))
    }

    /// Total rows accepted across all trees.
    pub fn total_rows(&self) -> usize {
        self.rows.values().sum()
    }
}

/// Executes the query trees of an aggregate tree against a data store.
pub trait Dispatcher {
    /// Run every tree of `aggregate`, feeding rows into `invocation`.
    ///
    /// Trees whose parent produced no correlation identifiers are skipped
    /// together with their subtrees; that is not an error.
    fn dispatch<O, F>(
        &self,
        aggregate: &AggregateTree,
        invocation: &QueryTreeInvocation<O>,
        sessions: &F,
    ) -> Result<DispatchReport, Error>
    where
        O: Clone + Send + Sync,
        F: SessionFactory;
}

/// Result of running one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TreeOutcome {
    /// The query ran; its children may be scheduled.
    Completed {
        /// Rows accepted.
        rows: usize,
    },
    /// The parent produced no identifiers; the subtree must be skipped.
    Skipped,
}

/// Build the correlations `tree` must be executed with. `None` means the
/// parent produced no identifiers.
fn correlations<O: Clone>(
    aggregate: &AggregateTree,
    invocation: &QueryTreeInvocation<O>,
    tree: TreeId,
    batch_size: usize,
    allow_subquery: bool,
) -> Result<Option<Vec<Correlation>>, Error> {
    let Some(edge) = aggregate.in_edge(tree) else {
        return Ok(Some(vec![Correlation::None]));
    };

    let ids = invocation.ids_for(edge);
    if ids.is_empty() {
        return Ok(None);
    }

    let correlations = match aggregate.join_mechanism(edge, allow_subquery) {
        JoinMechanism::InList => ids
            .chunks(batch_size.max(1))
            .map(|chunk| Correlation::InList(chunk.to_vec()))
            .collect(),
        JoinMechanism::JoinTable { table } => vec![Correlation::JoinTable {
            table,
            invocation_id: invocation.invocation_id(tree),
        }],
        JoinMechanism::Subquery => {
            let position = aggregate.correlation_position(edge).ok_or_else(|| {
                Error::InvalidPlan(format!(
                    "edge {} has no correlation column in its parent",
                    edge
                ))
            })?;
            vec![Correlation::Subquery {
                parent: aggregate.edge(edge).from,
                position,
            }]
        }
    };
    Ok(Some(correlations))
}

/// Run one query tree on `session`: resolve its correlation, execute its
/// query once per correlation batch, accept the rows, then run its post
/// actions. Shared by both dispatchers.
pub(crate) fn run_tree<O, S>(
    aggregate: &AggregateTree,
    invocation: &QueryTreeInvocation<O>,
    session: &mut S,
    tree: TreeId,
    config: &DispatchConfig,
    allow_subquery: bool,
) -> Result<TreeOutcome, Error>
where
    O: Clone,
    S: Session,
{
    let Some(correlations) =
        correlations(aggregate, invocation, tree, config.batch_size, allow_subquery)?
    else {
        return Ok(TreeOutcome::Skipped);
    };

    invocation.set_state(tree, TreeState::Running);
    session.init_for_query()?;

    let query = aggregate.tree(tree);
    let mut rows = 0;
    for correlation in &correlations {
        let batch = session.execute(tree, query, correlation)?;
        invocation.record_execution(tree);
        rows += invocation.accept_rows(aggregate, tree, batch);
    }

    for action in query.actions() {
        match action {
            PostAction::PopulateJoinTable { edge, table } => {
                let child = aggregate.edge(*edge).to;
                let ids = invocation.ids_for(*edge);
                session.populate_join_table(table, invocation.invocation_id(child), &ids)?;
                debug!(tree = %tree, child = %child, table = %table, ids = ids.len(), "Populated join side table");
            }
        }
    }

    invocation.set_state(tree, TreeState::Completed);
    debug!(
        tree = %tree,
        batches = correlations.len(),
        rows,
        "Query tree completed"
    );
    Ok(TreeOutcome::Completed { rows })
}
