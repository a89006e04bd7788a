//! Identity map.
//!
//! Objects are keyed by (identifier, hierarchy family, anchor path). Keying
//! on the family rather than the concrete type lets a subtype query and its
//! supertype query resolve the same object.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::value::Key;

/// How repeated occurrences of an entity are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResolutionMode {
    /// Occurrences with the same key resolve to one object; the result is a graph.
    #[default]
    Shared,
    /// Every occurrence produces a new object; the result is a strict tree.
    Distinct,
}

/// Key of one object in the identity map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    /// Entity identifier.
    pub id: Key,
    /// Root type of the entity's inheritance hierarchy.
    pub family: String,
    /// Path from the aggregate root the entity was reached at.
    pub path: String,
}

impl IdentityKey {
    /// Build a key.
    pub fn new(id: Key, family: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id,
            family: family.into(),
            path: path.into(),
        }
    }
}

struct Slot<O> {
    /// Occurrences in creation order. Shared mode keeps exactly one.
    objects: Vec<O>,
    /// Whether an owning occurrence has taken the first object. Mirrors
    /// create unclaimed objects; the first owner claims them.
    claimed: bool,
}

/// Concurrent identity map shared by every tree of one invocation.
pub struct IdentityMap<O> {
    mode: ResolutionMode,
    slots: DashMap<IdentityKey, Slot<O>>,
}

impl<O: Clone> IdentityMap<O> {
    /// Create an empty map.
    pub fn new(mode: ResolutionMode) -> Self {
        Self {
            mode,
            slots: DashMap::new(),
        }
    }

    /// Resolution mode.
    pub fn mode(&self) -> ResolutionMode {
        self.mode
    }

    /// Every occurrence of `key`, creating one unclaimed object if absent.
    ///
    /// Used for fragments that re-fetch an entity owned elsewhere: their
    /// columns belong to each occurrence the owning trees produced.
    pub fn lookup_or_create(&self, key: IdentityKey, create: impl FnOnce() -> O) -> Vec<O> {
        match self.slots.entry(key) {
            Entry::Occupied(slot) => slot.get().objects.clone(),
            Entry::Vacant(slot) => {
                let object = create();
                slot.insert(Slot {
                    objects: vec![object.clone()],
                    claimed: false,
                });
                vec![object]
            }
        }
    }

    /// Resolve an owning occurrence of `key`.
    ///
    /// Shared mode returns the existing object when there is one. Distinct
    /// mode only reuses an object nobody owns yet and otherwise appends a
    /// new occurrence.
    pub fn resolve_owned(&self, key: IdentityKey, create: impl FnOnce() -> O) -> (O, bool) {
        match self.slots.entry(key) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if self.mode == ResolutionMode::Shared || !entry.claimed {
                    entry.claimed = true;
                    if let Some(object) = entry.objects.first() {
                        return (object.clone(), false);
                    }
                }
                let object = create();
                entry.objects.push(object.clone());
                (object, true)
            }
            Entry::Vacant(slot) => {
                let object = create();
                slot.insert(Slot {
                    objects: vec![object.clone()],
                    claimed: true,
                });
                (object, true)
            }
        }
    }

    /// Occurrences of `key` without creating any.
    pub fn occurrences(&self, key: &IdentityKey) -> Vec<O> {
        self.slots
            .get(key)
            .map(|slot| slot.objects.clone())
            .unwrap_or_default()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(id: i64) -> IdentityKey {
        IdentityKey::new(Key::Int(id), "Pet", "pets")
    }

    #[test]
    fn test_shared_mode_reuses_objects() {
        let map: IdentityMap<Arc<i64>> = IdentityMap::new(ResolutionMode::Shared);
        let (a, created_a) = map.resolve_owned(key(1), || Arc::new(1));
        let (b, created_b) = map.resolve_owned(key(1), || Arc::new(2));

        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_distinct_mode_creates_per_occurrence() {
        let map: IdentityMap<Arc<i64>> = IdentityMap::new(ResolutionMode::Distinct);
        let (a, _) = map.resolve_owned(key(1), || Arc::new(1));
        let (b, created) = map.resolve_owned(key(1), || Arc::new(1));

        assert!(created);
        assert!(!Arc::ptr_eq(&a, &b));
        let all = map.occurrences(&key(1));
        assert_eq!(all.len(), 2);
        assert!(Arc::ptr_eq(&all[0], &a));
        assert!(Arc::ptr_eq(&all[1], &b));
        // A later mirror sees every occurrence.
        assert_eq!(map.lookup_or_create(key(1), || Arc::new(9)).len(), 2);
    }

    #[test]
    fn test_distinct_owner_claims_mirror_object() {
        let map: IdentityMap<Arc<i64>> = IdentityMap::new(ResolutionMode::Distinct);
        let mirror = map.lookup_or_create(key(7), || Arc::new(7));
        let (owner, created) = map.resolve_owned(key(7), || Arc::new(0));

        assert!(!created);
        assert!(Arc::ptr_eq(&mirror[0], &owner));
        assert!(map.resolve_owned(key(7), || Arc::new(0)).1);
        assert_eq!(map.occurrences(&key(7)).len(), 2);
    }

    #[test]
    fn test_shared_mirror_sees_single_object() {
        let map: IdentityMap<Arc<i64>> = IdentityMap::new(ResolutionMode::Shared);
        map.resolve_owned(key(3), || Arc::new(3));
        map.resolve_owned(key(3), || Arc::new(4));
        assert_eq!(map.lookup_or_create(key(3), || Arc::new(5)).len(), 1);
        assert!(map.occurrences(&key(4)).is_empty());
    }

    #[test]
    fn test_keys_distinguish_paths() {
        let map: IdentityMap<Arc<i64>> = IdentityMap::new(ResolutionMode::Shared);
        map.resolve_owned(IdentityKey::new(Key::Int(1), "User", ""), || Arc::new(1));
        map.resolve_owned(IdentityKey::new(Key::Int(1), "User", "friends"), || Arc::new(1));
        assert_eq!(map.len(), 2);
    }
}
