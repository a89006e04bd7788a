//! Plan cache.
//!
//! Planning a view walks the type graph and runs the splitters; the result
//! only depends on the view's shape and the planning configuration, so plans
//! are cached by a fingerprint of both and handed out as deep copies.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::RwLock;

use super::aggregate::AggregateTree;
use super::planner::PlanConfig;
use super::view::View;

/// Fingerprint of a view and the configuration it was planned with.
///
/// Requested paths are hashed in sorted order: permuting them yields an
/// equivalent plan.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ViewFingerprint {
    hash: u64,
}

impl ViewFingerprint {
    /// Compute the fingerprint of `view` planned under `config`.
    pub fn new(view: &View, config: &PlanConfig) -> Self {
        let mut hasher = DefaultHasher::new();
        Self::hash_view(view, &mut hasher);
        config.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
        }
    }

    fn hash_view<H: Hasher>(view: &View, hasher: &mut H) {
        view.entity.hash(hasher);

        let mut paths: Vec<&str> = view.paths.iter().map(String::as_str).collect();
        paths.sort_unstable();
        paths.hash(hasher);

        view.custom.hash(hasher);

        view.subviews.len().hash(hasher);
        for sub in &view.subviews {
            sub.anchor.hash(hasher);
            Self::hash_view(&sub.view, hasher);
        }
    }
}

/// Hit, miss and eviction counts of a [`PlanCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to plan.
    pub misses: u64,
    /// Plans dropped to make room.
    pub evictions: u64,
}

struct Slot {
    plan: AggregateTree,
    hits: AtomicU64,
}

/// Plans built against one schema version.
struct Generation {
    schema_version: u64,
    plans: HashMap<ViewFingerprint, Slot>,
}

/// Thread-safe plan cache keyed by view fingerprint.
///
/// All plans belong to the newest schema version seen; a newer version drops
/// them. When full, the least-hit plan is evicted, the smaller one first
/// among equally hit plans.
pub struct PlanCache {
    generation: RwLock<Generation>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PlanCache {
    /// Create a cache holding at most `capacity` plans. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            generation: RwLock::new(Generation {
                schema_version: 0,
                plans: HashMap::new(),
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Copy of the plan cached for `fingerprint` under `schema_version`.
    pub fn get(&self, fingerprint: &ViewFingerprint, schema_version: u64) -> Option<AggregateTree> {
        let generation = self.generation.read();
        if generation.schema_version == schema_version {
            if let Some(slot) = generation.plans.get(fingerprint) {
                slot.hits.fetch_add(1, AtomicOrdering::Relaxed);
                self.hits.fetch_add(1, AtomicOrdering::Relaxed);
                return Some(slot.plan.clone());
            }
        }
        let stale = generation.schema_version < schema_version;
        drop(generation);

        if stale {
            self.advance(schema_version);
        }
        self.misses.fetch_add(1, AtomicOrdering::Relaxed);
        None
    }

    /// Cache `plan`. Plans for an older schema version than the cache holds
    /// are dropped.
    pub fn insert(&self, fingerprint: ViewFingerprint, plan: AggregateTree, schema_version: u64) {
        if self.capacity == 0 {
            return;
        }
        self.advance(schema_version);

        let mut generation = self.generation.write();
        if generation.schema_version != schema_version {
            return;
        }
        if generation.plans.len() >= self.capacity && !generation.plans.contains_key(&fingerprint) {
            let victim = generation
                .plans
                .iter()
                .min_by_key(|(_, slot)| (slot.hits.load(AtomicOrdering::Relaxed), slot.plan.vertex_count()))
                .map(|(fingerprint, _)| fingerprint.clone());
            if let Some(victim) = victim {
                generation.plans.remove(&victim);
                self.evictions.fetch_add(1, AtomicOrdering::Relaxed);
            }
        }
        generation.plans.insert(
            fingerprint,
            Slot {
                plan,
                hits: AtomicU64::new(0),
            },
        );
    }

    /// Move to `schema_version` if it is newer, dropping every cached plan.
    fn advance(&self, schema_version: u64) {
        let mut generation = self.generation.write();
        if schema_version > generation.schema_version {
            let dropped = generation.plans.len();
            generation.schema_version = schema_version;
            generation.plans.clear();
            tracing::debug!(schema_version, dropped, "plan cache moved to new schema version");
        }
    }

    /// Drop every cached plan, keeping the schema version.
    pub fn clear(&self) {
        self.generation.write().plans.clear();
    }

    /// Counters so far.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(AtomicOrdering::Relaxed),
            misses: self.misses.load(AtomicOrdering::Relaxed),
            evictions: self.evictions.load(AtomicOrdering::Relaxed),
        }
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.generation.read().plans.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
