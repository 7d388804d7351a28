//! # Columnar ECS
//!
//! Archetype-based Entity-Component-System storage with a conflict-driven
//! parallel scheduler, built for large simulations.
//!
//! ## Design Goals
//! - Archetype column storage, optionally decomposed into primitive arrays
//! - Cached query matching over composition bitsets
//! - Race-free parallel stages derived from declared component access
//! - Explicit, typed errors for every misuse
//!
//! ## Example
//!
//! ```
//! use columnar_ecs::prelude::*;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Position { x: f32, y: f32 }
//! #[derive(Clone, Debug, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! world.register::<Position>().unwrap();
//! world.register::<Velocity>().unwrap();
//! let e = world
//!     .spawn((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0, dy: 2.0 }))
//!     .unwrap();
//!
//! let mut scheduler = Scheduler::new();
//! scheduler
//!     .add_fn(
//!         "movement",
//!         AccessSets::new().read::<Velocity>().write::<Position>(),
//!         Phase::Update,
//!         |ctx| {
//!             ctx.query().modify_with::<(Velocity,), Position>(|_, (v,), p| {
//!                 p.x += v.dx;
//!                 p.y += v.dy;
//!             })?;
//!             Ok(())
//!         },
//!     )
//!     .unwrap();
//! scheduler.build().unwrap();
//! scheduler.execute(&mut world).unwrap();
//!
//! assert_eq!(world.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::{SpawnBatch, World};

pub use engine::entity::Entity;

pub use engine::component::{
    Bundle,
    BundleEntry,
    Component,
    ComponentRegistry,
    IntoBundle,
};

pub use engine::primitive::{
    Decompose,
    FieldDesc,
    Primitive,
    PrimitiveKind,
};

pub use engine::archetype::{
    Archetype,
    ComponentReader,
    ComponentWriter,
};

pub use engine::query::{QueryBuilder, QueryData, QueryFilter};
pub use engine::cache::CacheStats;

pub use engine::systems::{FnSystem, Phase, System, SystemContext};
pub use engine::scheduler::{Scheduler, ShutdownHandle, Stage};

pub use engine::commands::Command;

pub use engine::config::{
    CachePolicy,
    DecompositionPolicy,
    InvalidationPolicy,
    MatchStrategy,
    SchedulerConfig,
    StorageMode,
    WorldConfig,
};

pub use engine::error::{
    AccessError,
    ECSError,
    ECSResult,
    ExecutionError,
    FieldError,
    ScheduleError,
    StructuralError,
};

pub use engine::types::{
    AccessSets,
    ArchetypeID,
    ComponentID,
    Signature,
    SystemID,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used ECS types.
///
/// Import with:
/// ```rust
/// use columnar_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::decomposable;
    pub use crate::{
        AccessSets,
        Bundle,
        CachePolicy,
        Command,
        Component,
        Decompose,
        ECSError,
        ECSResult,
        Entity,
        FnSystem,
        IntoBundle,
        Phase,
        QueryBuilder,
        Scheduler,
        SchedulerConfig,
        StorageMode,
        System,
        SystemContext,
        World,
        WorldConfig,
    };
}
