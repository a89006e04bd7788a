//! View fetching.
//!
//! [`Fetcher`] ties the stages together: plan the view (through the plan
//! cache), synthesize each tree's query, dispatch the trees against a data
//! store, and reconstitute the rows into objects.

use std::time::Instant;

use tracing::info;

use crate::catalog::TypeGraphProvider;
use crate::dispatch::{
    DispatchConfig, DispatchMode, DispatchReport, Dispatcher, ParallelDispatcher,
    SerialDispatcher, SessionFactory,
};
use crate::error::Error;
use crate::plan::{
    AggregateTree, ExplainSynthesizer, PlanCache, PlanConfig, PlanExplain, Planner,
    QuerySynthesizer, View, ViewFingerprint,
};
use crate::resolve::{ObjectFactory, QueryTreeInvocation, Reconstitutor};
use crate::value::Key;

/// Default number of cached plans.
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Settings for a [`Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Planning settings.
    pub plan: PlanConfig,
    /// Dispatch settings.
    pub dispatch: DispatchConfig,
    /// Maximum cached plans. Zero disables caching.
    pub cache_capacity: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            plan: PlanConfig::default(),
            dispatch: DispatchConfig::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl FetchConfig {
    /// Set the planning settings.
    pub fn with_plan(mut self, plan: PlanConfig) -> Self {
        self.plan = plan;
        self
    }

    /// Set the dispatch settings.
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Set the plan cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

/// Objects produced by one fetch.
#[derive(Debug)]
pub struct FetchResult<O> {
    /// Root objects in identifier order.
    pub roots: Vec<O>,
    /// Per-tree states, executions and failures.
    pub report: DispatchReport,
    /// Identifier of the last root object, for cursor-style continuation.
    pub cursor: Option<Key>,
}

impl<O> FetchResult<O> {
    /// Whether every branch ran. False only when partial results were allowed.
    pub fn is_complete(&self) -> bool {
        self.report.is_complete()
    }
}

/// Plans, dispatches and reconstitutes view fetches against one data store.
pub struct Fetcher<'a, S> {
    provider: &'a dyn TypeGraphProvider,
    sessions: &'a S,
    synthesizer: Box<dyn QuerySynthesizer>,
    cache: PlanCache,
    config: FetchConfig,
}

impl<'a, S: SessionFactory> Fetcher<'a, S> {
    /// Create a fetcher using [`ExplainSynthesizer`] for query text.
    pub fn new(provider: &'a dyn TypeGraphProvider, sessions: &'a S, config: FetchConfig) -> Self {
        Self {
            provider,
            sessions,
            synthesizer: Box::new(ExplainSynthesizer),
            cache: PlanCache::new(config.cache_capacity),
            config,
        }
    }

    /// Replace the query synthesizer.
    pub fn with_synthesizer(mut self, synthesizer: impl QuerySynthesizer + 'static) -> Self {
        self.synthesizer = Box::new(synthesizer);
        self.cache.clear();
        self
    }

    /// Fetch settings.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// The plan cache.
    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Plan `view`, reusing a cached plan when the view's shape and the
    /// metadata version match.
    pub fn plan(&self, view: &View) -> Result<AggregateTree, Error> {
        let fingerprint = ViewFingerprint::new(view, &self.config.plan);
        let version = self.provider.version();
        if let Some(plan) = self.cache.get(&fingerprint, version) {
            return Ok(plan);
        }

        let mut plan = Planner::new(self.provider, self.sessions, self.config.plan.clone()).plan(view)?;
        let trees: Vec<_> = plan.tree_ids().collect();
        for tree in trees {
            let handle = self.synthesizer.synthesize(plan.tree(tree))?;
            plan.tree_mut(tree).set_handle(handle);
        }

        self.cache.insert(fingerprint, plan.clone(), version);
        Ok(plan)
    }

    /// Fetch `view`, materializing objects through `factory`.
    pub fn fetch<F: ObjectFactory>(&self, view: &View, factory: &F) -> Result<FetchResult<F::Object>, Error> {
        let plan = self.plan(view)?;
        self.execute(&plan, factory)
    }

    /// Dispatch a planned aggregate tree and reconstitute its rows.
    ///
    /// Fails with [`Error::BranchFailed`] when a parallel branch failed and
    /// partial results are not allowed.
    pub fn execute<F: ObjectFactory>(
        &self,
        plan: &AggregateTree,
        factory: &F,
    ) -> Result<FetchResult<F::Object>, Error> {
        let started = Instant::now();
        let invocation = QueryTreeInvocation::new(plan);
        let dispatch = &self.config.dispatch;

        let report = match dispatch.mode {
            DispatchMode::Serial => {
                SerialDispatcher::new(dispatch.clone()).dispatch(plan, &invocation, self.sessions)?
            }
            DispatchMode::Parallel { workers } => ParallelDispatcher::new(workers, dispatch.clone())
                .dispatch(plan, &invocation, self.sessions)?,
        };

        if let Some(first) = report.failures.first() {
            if !dispatch.allow_partial {
                return Err(Error::BranchFailed {
                    count: report.failures.len(),
                    first: format!("{}: {}", first.tree, first.error),
                });
            }
        }

        let resolved = Reconstitutor::new(plan, &invocation, factory).run()?;
        let cursor = resolved.last().map(|(key, _)| key.clone());
        let roots: Vec<F::Object> = resolved.into_iter().map(|(_, object)| object).collect();

        info!(
            trees = plan.vertex_count(),
            rows = report.total_rows(),
            roots = roots.len(),
            failed = report.failures.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "View fetch complete"
        );

        Ok(FetchResult {
            roots,
            report,
            cursor,
        })
    }

    /// Explain the plan for `view` with the join mechanisms this fetcher's
    /// dispatcher would use.
    pub fn explain(&self, view: &View) -> Result<PlanExplain, Error> {
        let allow_subquery =
            self.config.dispatch.allow_subquery && self.config.dispatch.mode == DispatchMode::Serial;
        Ok(self.plan(view)?.explain(allow_subquery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, RelationDef, Schema};
    use crate::resolve::GraphFactory;
    use crate::store::MemoryStore;
    use crate::value::Value;

    fn store() -> MemoryStore {
        let schema = Schema::new(3)
            .with_entity(EntityDef::new("User", "id").with_scalars(["id", "name"]))
            .with_entity(EntityDef::new("Post", "id").with_scalars(["id", "title"]))
            .with_relation(RelationDef::one_to_many("posts", "User", "Post"));
        let store = MemoryStore::new(schema);
        store.insert("User", 1, [("name", Value::from("al"))]).unwrap();
        store.insert("User", 2, [("name", Value::from("bo"))]).unwrap();
        store.insert("Post", 10, [("title", Value::from("hi"))]).unwrap();
        store.link("User", 1, "posts", 10).unwrap();
        store
    }

    #[test]
    fn test_plan_is_cached() {
        let store = store();
        let fetcher = Fetcher::new(store.schema(), &store, FetchConfig::default());
        let view = View::new("User").with_paths(["name", "posts.title"]);

        let first = fetcher.plan(&view).unwrap();
        let second = fetcher.plan(&view).unwrap();
        assert_eq!(first.vertex_count(), second.vertex_count());
        assert_eq!(fetcher.cache().stats().hits, 1);
        assert!(first.tree(first.roots()[0]).handle().is_some());
    }

    #[test]
    fn test_fetch_returns_roots_and_cursor() {
        let store = store();
        let fetcher = Fetcher::new(store.schema(), &store, FetchConfig::default());
        let result = fetcher
            .fetch(&View::new("User").with_paths(["name", "posts.title"]), &GraphFactory)
            .unwrap();

        assert_eq!(result.roots.len(), 2);
        assert_eq!(result.cursor, Some(Key::Int(2)));
        assert!(result.is_complete());
        assert_eq!(result.roots[0].linked("posts").len(), 1);
    }

    #[test]
    fn test_explain_uses_dispatch_settings() {
        let store = store();
        let config = FetchConfig::default().with_dispatch(DispatchConfig::serial().with_subquery(true));
        let fetcher = Fetcher::new(store.schema(), &store, config);
        let view = View::new("User")
            .with_paths(["name", "posts"])
            .with_subview("posts", View::new("Post").with_paths(["title"]));

        let explain = fetcher.explain(&view).unwrap();
        assert_eq!(explain.edges[0].mechanism, "subquery");
    }
}
