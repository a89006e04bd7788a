//! Worker-pool dispatcher.
//!
//! Every query tree is an independent job. A worker that completes a tree
//! queues the tree's children before counting the tree down, so the
//! completion counter can only reach zero once every tree has completed,
//! been skipped, or failed.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::plan::{AggregateTree, TreeId};
use crate::resolve::{QueryTreeInvocation, TreeState};

use super::latch::CompletionCounter;
use super::{
    run_tree, BranchFailure, DispatchConfig, DispatchReport, Dispatcher, SessionFactory,
    TreeOutcome, DEFAULT_WORKERS,
};

enum Job {
    Run(TreeId),
    Stop,
}

/// Runs query trees on a fixed pool of workers, each with its own session.
///
/// A failing or panicking tree is recorded as a [`BranchFailure`]; its
/// subtree is skipped and the other branches keep running.
#[derive(Debug, Clone)]
pub struct ParallelDispatcher {
    workers: usize,
    config: DispatchConfig,
}

impl Default for ParallelDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS, DispatchConfig::default())
    }
}

impl ParallelDispatcher {
    /// Create a dispatcher with `workers` workers (at least one).
    pub fn new(workers: usize, config: DispatchConfig) -> Self {
        Self {
            workers: workers.max(1),
            config,
        }
    }

    /// Worker count.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Reject trees that depend on state visible only to one session.
    pub fn check(aggregate: &AggregateTree) -> Result<(), Error> {
        for tree in aggregate.tree_ids() {
            if aggregate.tree(tree).populates_session_table() {
                return Err(Error::SessionBoundParallel {
                    tree: tree.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Dispatcher for ParallelDispatcher {
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
        Self::check(aggregate)?;

        let counter = CompletionCounter::new(aggregate.vertex_count());
        let failures = Mutex::new(Vec::new());
        let (tx, rx) = mpsc::channel();
        let rx = Mutex::new(rx);

        for root in aggregate.roots() {
            tx.send(Job::Run(root))
                .map_err(|_| Error::Session("dispatch queue closed".to_string()))?;
        }

        thread::scope(|scope| {
            for worker in 0..self.workers {
                let pool = Pool {
                    aggregate,
                    invocation,
                    sessions,
                    config: &self.config,
                    counter: &counter,
                    failures: &failures,
                    tx: tx.clone(),
                    rx: &rx,
                };
                scope.spawn(move || pool.worker_loop(worker));
            }

            counter.wait();
            for _ in 0..self.workers {
                let _ = tx.send(Job::Stop);
            }
        });

        let failures = failures.into_inner();
        info!(
            trees = aggregate.vertex_count(),
            workers = self.workers,
            failed = failures.len(),
            "Parallel dispatch finished"
        );
        Ok(DispatchReport::collect(aggregate, invocation, failures))
    }
}

/// What one worker shares with the rest of the pool.
struct Pool<'a, O, F> {
    aggregate: &'a AggregateTree,
    invocation: &'a QueryTreeInvocation<O>,
    sessions: &'a F,
    config: &'a DispatchConfig,
    counter: &'a CompletionCounter,
    failures: &'a Mutex<Vec<BranchFailure>>,
    tx: Sender<Job>,
    rx: &'a Mutex<Receiver<Job>>,
}

impl<'a, O, F> Pool<'a, O, F>
where
    O: Clone + Send + Sync,
    F: SessionFactory,
{
    fn worker_loop(self, worker: usize) {
        let mut session: Option<F::Session> = None;

        loop {
            let job = self.rx.lock().recv();
            let tree = match job {
                Ok(Job::Run(tree)) => tree,
                Ok(Job::Stop) | Err(_) => break,
            };

            debug!(worker, tree = %tree, "Worker picked up query tree");
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let session = self.session(&mut session)?;
                run_tree(self.aggregate, self.invocation, session, tree, self.config, false)
            }));

            match outcome {
                Ok(Ok(TreeOutcome::Completed { .. })) => {
                    for child in self.aggregate.children(tree) {
                        if self.tx.send(Job::Run(child)).is_err() {
                            let lost = self.invocation.skip_subtree(self.aggregate, child);
                            self.counter.done(lost);
                        }
                    }
                    self.counter.done(1);
                }
                Ok(Ok(TreeOutcome::Skipped)) => {
                    let skipped = self.invocation.skip_subtree(self.aggregate, tree);
                    debug!(tree = %tree, skipped, "Parent produced no identifiers, skipping subtree");
                    self.counter.done(skipped);
                }
                Ok(Err(e)) => self.fail(tree, e.to_string()),
                Err(payload) => {
                    session = None;
                    self.fail(tree, panic_message(payload.as_ref()));
                }
            }
        }
    }

    /// Open the worker's session on first use.
    fn session<'s>(&self, slot: &'s mut Option<F::Session>) -> Result<&'s mut F::Session, Error> {
        if slot.is_none() {
            *slot = Some(self.sessions.open_session()?);
        }
        slot.as_mut()
            .ok_or_else(|| Error::Session("worker session unavailable".to_string()))
    }

    fn fail(&self, tree: TreeId, message: String) {
        error!(tree = %tree, error = %message, "Query tree branch failed");
        let descendants = self.aggregate.descendants(tree);
        self.invocation.set_state(tree, TreeState::Failed);
        for child in &descendants {
            self.invocation.set_state(*child, TreeState::Skipped);
        }
        self.failures.lock().push(BranchFailure {
            tree,
            error: message,
        });
        self.counter.done(1 + descendants.len());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic: <non-string payload>".to_string()
    }
}
