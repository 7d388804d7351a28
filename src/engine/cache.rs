//! Query result cache.
//!
//! Matching a query against the archetype table costs one signature test per
//! archetype. Simulations issue the same few queries every tick, so the world
//! caches the matching archetype list per [`QueryKey`].
//!
//! ## Invalidation
//!
//! Archetypes are never destroyed, and an archetype's composition never
//! changes, so a cached list can only become stale when a new archetype is
//! created. The default [`InvalidationPolicy::Clear`] drops every entry at that
//! point. [`InvalidationPolicy::Incremental`] instead appends the new archetype
//! to each entry it matches; both yield identical query results.
//!
//! ## Bounding
//!
//! [`CachePolicy::Bounded`] caps the entry count. Each hit stamps the entry
//! with a monotonically increasing tick; inserting past the cap evicts the
//! entry with the oldest stamp.
//!
//! ## Concurrency
//!
//! The cache is internally synchronized with a `parking_lot::Mutex`, so
//! systems running in parallel may query concurrently. The lock is never held
//! while matching runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::config::{CachePolicy, InvalidationPolicy};
use crate::engine::types::{ArchetypeID, Signature};


/// Canonical query signature.
///
/// `additional` holds the types required only by the terminal operation
/// (fetched or modified) but not named in `with`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// Explicit inclusion set.
    pub include: Signature,
    /// Exclusion set.
    pub exclude: Signature,
    /// Types required by the terminal operation beyond `include`.
    pub additional: Signature,
}

impl QueryKey {
    /// Effective inclusion set.
    #[inline]
    pub fn required(&self) -> Signature {
        self.include.union(&self.additional)
    }

    /// Returns `true` if a composition satisfies the key.
    #[inline]
    pub fn matches(&self, composition: &Signature) -> bool {
        composition.contains_all(&self.required()) && !composition.intersects(&self.exclude)
    }
}

/// Counters describing cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to match.
    pub misses: u64,
    /// Entries dropped to respect the bound.
    pub evictions: u64,
    /// Archetype creations that cleared or patched the cache.
    pub invalidations: u64,
    /// Live entries.
    pub entries: usize,
}

struct Entry {
    archetypes: Arc<[ArchetypeID]>,
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<QueryKey, Entry>,
    tick: u64,
    stats: CacheStats,
}

/// Cache from query signature to matching archetype ids.
pub struct QueryCache {
    policy: CachePolicy,
    invalidation: InvalidationPolicy,
    inner: Mutex<Inner>,
}

impl QueryCache {
    /// Creates an empty cache.
    pub fn new(policy: CachePolicy, invalidation: InvalidationPolicy) -> Self {
        Self { policy, invalidation, inner: Mutex::new(Inner::default()) }
    }

    /// Sizing policy.
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Returns the cached list for `key`, or computes, stores and returns it.
    pub fn get_or_compute(
        &self,
        key: &QueryKey,
        compute: impl FnOnce() -> Vec<ArchetypeID>,
    ) -> Arc<[ArchetypeID]> {
        if self.policy == CachePolicy::Disabled {
            self.inner.lock().stats.misses += 1;
            return compute().into();
        }

        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.tick += 1;
            let tick = inner.tick;
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.last_used = tick;
                let archetypes = Arc::clone(&entry.archetypes);
                inner.stats.hits += 1;
                return archetypes;
            }
            inner.stats.misses += 1;
        }

        let archetypes: Arc<[ArchetypeID]> = compute().into();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let CachePolicy::Bounded(limit) = self.policy {
            if limit == 0 {
                return archetypes;
            }
            while inner.entries.len() >= limit && !inner.entries.contains_key(key) {
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(key, _)| *key);
                match oldest {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                        inner.stats.evictions += 1;
                    }
                    None => break,
                }
            }
        }
        inner.tick += 1;
        let last_used = inner.tick;
        inner
            .entries
            .insert(*key, Entry { archetypes: Arc::clone(&archetypes), last_used });
        archetypes
    }

    /// Reacts to the creation of archetype `id` with composition `signature`.
    pub fn on_archetype_created(&self, id: ArchetypeID, signature: &Signature) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.entries.is_empty() {
            return;
        }
        inner.stats.invalidations += 1;
        match self.invalidation {
            InvalidationPolicy::Clear => {
                debug!(archetype = id, dropped = inner.entries.len(), "query cache cleared");
                inner.entries.clear();
            }
            InvalidationPolicy::Incremental => {
                let mut patched = 0usize;
                for (key, entry) in inner.entries.iter_mut() {
                    if key.matches(signature) {
                        let mut archetypes = entry.archetypes.to_vec();
                        archetypes.push(id);
                        entry.archetypes = archetypes.into();
                        patched += 1;
                    }
                }
                debug!(archetype = id, patched, "query cache patched");
            }
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats { entries: inner.entries.len(), ..inner.stats }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(include: &[u16], exclude: &[u16]) -> QueryKey {
        QueryKey {
            include: Signature::from_ids(include),
            exclude: Signature::from_ids(exclude),
            additional: Signature::new(),
        }
    }

    #[test]
    fn second_lookup_hits() {
        let cache = QueryCache::new(CachePolicy::Unbounded, InvalidationPolicy::Clear);
        let k = key(&[1], &[]);
        assert_eq!(&*cache.get_or_compute(&k, || vec![0, 2]), &[0, 2]);
        assert_eq!(&*cache.get_or_compute(&k, || unreachable!()), &[0, 2]);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn creation_clears_entries() {
        let cache = QueryCache::new(CachePolicy::Unbounded, InvalidationPolicy::Clear);
        let k = key(&[1], &[]);
        cache.get_or_compute(&k, || vec![0]);
        cache.on_archetype_created(5, &Signature::from_ids(&[7]));
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(&*cache.get_or_compute(&k, || vec![0]), &[0]);
    }

    #[test]
    fn incremental_patches_matching_entries_only() {
        let cache = QueryCache::new(CachePolicy::Unbounded, InvalidationPolicy::Incremental);
        let wants_one = key(&[1], &[]);
        let excludes_two = key(&[1], &[2]);
        cache.get_or_compute(&wants_one, || vec![0]);
        cache.get_or_compute(&excludes_two, || vec![0]);

        cache.on_archetype_created(3, &Signature::from_ids(&[1, 2]));

        assert_eq!(&*cache.get_or_compute(&wants_one, || unreachable!()), &[0, 3]);
        assert_eq!(&*cache.get_or_compute(&excludes_two, || unreachable!()), &[0]);
    }

    #[test]
    fn bounded_cache_evicts_least_recently_used() {
        let cache = QueryCache::new(CachePolicy::Bounded(2), InvalidationPolicy::Clear);
        let (a, b, c) = (key(&[1], &[]), key(&[2], &[]), key(&[3], &[]));
        cache.get_or_compute(&a, || vec![1]);
        cache.get_or_compute(&b, || vec![2]);
        cache.get_or_compute(&a, || unreachable!());
        cache.get_or_compute(&c, || vec![3]);

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(&*cache.get_or_compute(&a, || unreachable!()), &[1]);
        assert_eq!(&*cache.get_or_compute(&b, || vec![20]), &[20]);
    }

    #[test]
    fn disabled_cache_always_computes() {
        let cache = QueryCache::new(CachePolicy::Disabled, InvalidationPolicy::Clear);
        let k = key(&[], &[]);
        cache.get_or_compute(&k, || vec![1]);
        assert_eq!(&*cache.get_or_compute(&k, || vec![2]), &[2]);
        assert_eq!(cache.stats().hits, 0);
    }
}
