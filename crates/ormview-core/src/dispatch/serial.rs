//! Single-session breadth-first dispatcher.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::plan::AggregateTree;
use crate::resolve::{QueryTreeInvocation, TreeState};

use super::{run_tree, DispatchConfig, DispatchReport, Dispatcher, SessionFactory, TreeOutcome};

/// Runs every tree on one session, strictly in breadth-first order.
///
/// Errors are fatal: the first failing tree aborts the dispatch. Use this
/// dispatcher when the whole fetch must observe one transaction.
#[derive(Debug, Clone, Default)]
pub struct SerialDispatcher {
    config: DispatchConfig,
}

impl SerialDispatcher {
    /// Create a serial dispatcher.
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }
}

impl Dispatcher for SerialDispatcher {
    fn dispatch<O, F>(
        &self,
        aggregate: &AggregateTree,
        invocation: &QueryTreeInvocation<O>,
        sessions: &F,
    ) -> Result<DispatchReport, Error>
    where
        O: Clone + Send + Sync,
        F: SessionFactory,
    {
        let mut session = sessions.open_session()?;
        let mut queue: VecDeque<_> = aggregate.roots().into();

        while let Some(tree) = queue.pop_front() {
            match run_tree(
                aggregate,
                invocation,
                &mut session,
                tree,
                &self.config,
                self.config.allow_subquery,
            ) {
                Ok(TreeOutcome::Completed { .. }) => queue.extend(aggregate.children(tree)),
                Ok(TreeOutcome::Skipped) => {
                    let skipped = invocation.skip_subtree(aggregate, tree);
                    debug!(tree = %tree, skipped, "Parent produced no identifiers, skipping subtree");
                }
                Err(e) => {
                    invocation.set_state(tree, TreeState::Failed);
                    warn!(tree = %tree, error = %e, "Serial dispatch aborted");
                    return Err(e);
                }
            }
        }

        let report = DispatchReport::collect(aggregate, invocation, Vec::new());
        info!(
            trees = aggregate.vertex_count(),
            executions = report.executions.values().sum::<usize>(),
            "Serial dispatch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, RelationDef, Schema};
    use crate::dispatch::{Correlation, Session, SideTables};
    use crate::plan::{PlanBuilder, QueryTree, TreeId, View};
    use crate::resolve::ResolutionMode;
    use crate::value::{Key, Row, Value};
    use parking_lot::Mutex;

    /// Session returning canned rows per tree and recording correlations.
    struct Scripted {
        rows: Vec<Vec<Row>>,
        seen: Mutex<Vec<(TreeId, Correlation)>>,
    }

    struct ScriptedSession<'a>(&'a Scripted);

    impl SideTables for Scripted {
        fn has_side_table(&self, _name: &str) -> bool {
            false
        }
    }

    impl<'a> Session for ScriptedSession<'a> {
        fn execute(
            &mut self,
            id: TreeId,
            _tree: &QueryTree,
            correlation: &Correlation,
        ) -> Result<Vec<Row>, Error> {
            self.0.seen.lock().push((id, correlation.clone()));
            Ok(self.0.rows.get(id.index()).cloned().unwrap_or_default())
        }

        fn populate_join_table(&mut self, _: &str, _: u64, _: &[Key]) -> Result<(), Error> {
            Ok(())
        }
    }

    impl<'s> SessionFactory for &'s Scripted {
        type Session = ScriptedSession<'s>;

        fn open_session(&self) -> Result<Self::Session, Error> {
            Ok(ScriptedSession(*self))
        }
    }

    impl<'s> SideTables for &'s Scripted {
        fn has_side_table(&self, name: &str) -> bool {
            (**self).has_side_table(name)
        }
    }

    fn plan() -> AggregateTree {
        let schema = Schema::new(1)
            .with_entity(EntityDef::new("User", "id").with_scalars(["id", "name"]))
            .with_entity(EntityDef::new("Post", "id").with_scalars(["id", "title"]))
            .with_relation(RelationDef::one_to_many("posts", "User", "Post"));
        let view = View::new("User")
            .with_paths(["name", "posts"])
            .with_subview("posts", View::new("Post").with_paths(["title"]));
        let mut agg = PlanBuilder::new(&schema)
            .build(&view, ResolutionMode::Shared)
            .unwrap();
        agg.resolve_fields();
        agg
    }

    #[test]
    fn test_child_runs_once_per_batch() {
        let agg = plan();
        let scripted = Scripted {
            rows: vec![
                vec![
                    vec![Value::Int(1), Value::from("a"), Value::Int(10)],
                    vec![Value::Int(1), Value::from("a"), Value::Int(11)],
                    vec![Value::Int(2), Value::from("b"), Value::Int(12)],
                ],
                Vec::new(),
            ],
            seen: Mutex::new(Vec::new()),
        };
        let invocation: QueryTreeInvocation<()> = QueryTreeInvocation::new(&agg);
        let dispatcher = SerialDispatcher::new(DispatchConfig::serial().with_batch_size(2));

        let report = dispatcher.dispatch(&agg, &invocation, &&scripted).unwrap();
        assert_eq!(report.executions_of(TreeId(0)), 1);
        assert_eq!(report.executions_of(TreeId(1)), 2);
        assert!(report.is_complete());

        let seen = scripted.seen.lock();
        assert_eq!(seen[0], (TreeId(0), Correlation::None));
        assert_eq!(
            seen[1],
            (TreeId(1), Correlation::InList(vec![Key::Int(10), Key::Int(11)]))
        );
        assert_eq!(seen[2], (TreeId(1), Correlation::InList(vec![Key::Int(12)])));
    }

    #[test]
    fn test_empty_parent_skips_child() {
        let agg = plan();
        let scripted = Scripted {
            rows: Vec::new(),
            seen: Mutex::new(Vec::new()),
        };
        let invocation: QueryTreeInvocation<()> = QueryTreeInvocation::new(&agg);
        let report = SerialDispatcher::default()
            .dispatch(&agg, &invocation, &&scripted)
            .unwrap();

        assert_eq!(report.state(TreeId(0)), TreeState::Completed);
        assert_eq!(report.state(TreeId(1)), TreeState::Skipped);
        assert_eq!(report.executions_of(TreeId(1)), 0);
        assert_eq!(scripted.seen.lock().len(), 1);
    }

    #[test]
    fn test_subquery_correlation_when_allowed() {
        let agg = plan();
        let scripted = Scripted {
            rows: vec![vec![vec![Value::Int(1), Value::from("a"), Value::Int(10)]]],
            seen: Mutex::new(Vec::new()),
        };
        let invocation: QueryTreeInvocation<()> = QueryTreeInvocation::new(&agg);
        SerialDispatcher::new(DispatchConfig::serial().with_subquery(true))
            .dispatch(&agg, &invocation, &&scripted)
            .unwrap();

        let seen = scripted.seen.lock();
        assert_eq!(
            seen[1].1,
            Correlation::Subquery {
                parent: TreeId(0),
                position: 2
            }
        );
    }
}
