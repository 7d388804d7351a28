//! World and scheduler configuration.
//!
//! Both configs are plain values with sensible defaults and builder-style
//! `with_*` setters. With the `serde` feature they (de)serialize, so a
//! simulation can load them from whatever file format it already uses.
//!
//! ```
//! # use columnar_ecs::engine::config::{WorldConfig, StorageMode, CachePolicy};
//! let config = WorldConfig::default()
//!     .with_storage(StorageMode::Decomposed)
//!     .with_cache(CachePolicy::Bounded(64))
//!     .with_initial_capacity(1024);
//! assert!(config.validate().is_ok());
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::error::StructuralError;
use crate::engine::types::{DEFAULT_GROWTH_FACTOR, DEFAULT_INITIAL_CAPACITY};


/// How archetypes store component values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StorageMode {
    /// One boxed column per component type.
    #[default]
    Boxed,
    /// Decomposable types are stored as primitive field columns.
    Decomposed,
}

/// What decomposed storage does with types that have no decomposition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DecompositionPolicy {
    /// Store them boxed.
    #[default]
    FallbackToBoxed,
    /// Refuse them with `UnsupportedFieldShape`.
    Reject,
}

/// Archetype matching algorithm used by queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MatchStrategy {
    /// Word-wise bit operations on signatures.
    #[default]
    Bitset,
    /// Sorted-set operations on id lists.
    Naive,
}

/// Query cache sizing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CachePolicy {
    /// Every query rescans the archetype table.
    Disabled,
    /// Entries are kept until invalidated.
    #[default]
    Unbounded,
    /// At most `n` entries; the least recently used is evicted first.
    Bounded(usize),
}

/// What happens to cached entries when an archetype is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InvalidationPolicy {
    /// Drop every entry.
    #[default]
    Clear,
    /// Append the new archetype to the entries it matches.
    Incremental,
}

/// Configuration of a [`World`](crate::engine::world::World).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WorldConfig {
    /// Storage variant.
    pub storage: StorageMode,
    /// Treatment of non-decomposable types under decomposed storage.
    pub decomposition: DecompositionPolicy,
    /// Slots allocated when an archetype is created.
    pub initial_capacity: usize,
    /// Capacity multiplier applied when an archetype is full. Must exceed 1.
    pub growth_factor: f64,
    /// Archetype matching algorithm.
    pub matcher: MatchStrategy,
    /// Query cache sizing.
    pub cache: CachePolicy,
    /// Query cache invalidation.
    pub invalidation: InvalidationPolicy,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            storage: StorageMode::default(),
            decomposition: DecompositionPolicy::default(),
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            matcher: MatchStrategy::default(),
            cache: CachePolicy::default(),
            invalidation: InvalidationPolicy::default(),
        }
    }
}

impl WorldConfig {
    /// Sets the storage variant.
    pub fn with_storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the decomposition policy.
    pub fn with_decomposition(mut self, policy: DecompositionPolicy) -> Self {
        self.decomposition = policy;
        self
    }

    /// Sets the initial archetype capacity.
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the growth factor.
    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Sets the matching algorithm.
    pub fn with_matcher(mut self, matcher: MatchStrategy) -> Self {
        self.matcher = matcher;
        self
    }

    /// Sets the cache policy.
    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the invalidation policy.
    pub fn with_invalidation(mut self, invalidation: InvalidationPolicy) -> Self {
        self.invalidation = invalidation;
        self
    }

    /// Rejects values the storage layer cannot work with.
    pub fn validate(&self) -> Result<(), StructuralError> {
        if self.initial_capacity == 0 {
            return Err(StructuralError::InvalidConfig {
                reason: "initial_capacity must be at least 1".into(),
            });
        }
        if !(self.growth_factor > 1.0 && self.growth_factor.is_finite()) {
            return Err(StructuralError::InvalidConfig {
                reason: format!("growth_factor must be a finite value above 1, got {}", self.growth_factor),
            });
        }
        Ok(())
    }
}

/// Configuration of a [`Scheduler`](crate::engine::scheduler::Scheduler).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// Run the systems of a stage concurrently. When `false` they run one
    /// after another on the calling thread, in declaration order.
    pub parallel: bool,
    /// Size of a dedicated worker pool. `None` uses rayon's global pool.
    pub worker_threads: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { parallel: true, worker_threads: None }
    }
}

impl SchedulerConfig {
    /// Enables or disables parallel stage execution.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Requests a dedicated pool of `threads` workers.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }
}
