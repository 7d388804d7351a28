//! System Abstractions
//!
//! This module defines the unit of scheduled work.
//!
//! A **system** is a piece of logic that operates over the world. Systems:
//! - declare which components they read, write and filter out,
//! - carry a [`Phase`] tag,
//! - are grouped into conflict-free stages by the scheduler,
//! - receive a [`SystemContext`] wrapping a shared `&World`.
//!
//! ## Thread Safety
//!
//! Systems never receive `&mut World`. Inside a stage they may read and write
//! component *values* through queries and `set_component`; structural changes
//! are recorded through [`SystemContext::defer`] (or its shorthands) and
//! applied at the next stage barrier.
//!
//! ## Function-backed Systems
//!
//! [`FnSystem`] wraps a closure, which is the preferred way to define most
//! simulation logic:
//!
//! ```
//! use columnar_ecs::prelude::*;
//!
//! #[derive(Clone)] struct Wealth(f32);
//! #[derive(Clone)] struct Rate(f32);
//!
//! let produce = FnSystem::new(
//!     "produce",
//!     AccessSets::new().read::<Rate>().write::<Wealth>(),
//!     |ctx| {
//!         ctx.query().modify_with::<(Rate,), Wealth>(|_, (rate,), wealth| wealth.0 += rate.0)?;
//!         Ok(())
//!     },
//! );
//! assert_eq!(produce.name(), "produce");
//! ```

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::commands::Command;
use crate::engine::component::{Component, IntoBundle};
use crate::engine::entity::Entity;
use crate::engine::error::ECSResult;
use crate::engine::query::QueryBuilder;
use crate::engine::types::AccessSets;
use crate::engine::world::World;


/// Coarse execution phase of a system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Phase {
    /// One-off initialisation.
    Startup,
    /// Per-tick simulation logic.
    #[default]
    Update,
    /// End-of-tick bookkeeping.
    Cleanup,
}

impl Phase {
    /// Every phase, in execution order.
    pub const ALL: [Phase; 3] = [Phase::Startup, Phase::Update, Phase::Cleanup];
}

/// View of the world handed to a running system.
pub struct SystemContext<'w> {
    world: &'w World,
    system: &'w str,
}

impl<'w> SystemContext<'w> {
    /// Binds a context for the system named `system`.
    pub fn new(world: &'w World, system: &'w str) -> Self {
        Self { world, system }
    }

    /// The shared world.
    #[inline]
    pub fn world(&self) -> &'w World {
        self.world
    }

    /// Name of the running system.
    #[inline]
    pub fn system_name(&self) -> &str {
        self.system
    }

    /// Starts a query.
    #[inline]
    pub fn query(&self) -> QueryBuilder<'w> {
        self.world.query()
    }

    /// Records a structural command for the next stage barrier.
    #[inline]
    pub fn defer(&self, command: Command) {
        self.world.defer(command);
    }

    /// Deferred spawn.
    pub fn spawn(&self, bundle: impl IntoBundle) {
        self.defer(Command::spawn(bundle));
    }

    /// Deferred destroy.
    pub fn despawn(&self, entity: Entity) {
        self.defer(Command::despawn(entity));
    }

    /// Deferred component addition.
    pub fn add_component<T: Component>(&self, entity: Entity, value: T) {
        self.defer(Command::add(entity, value));
    }

    /// Deferred component removal.
    pub fn remove_component<T: Component>(&self, entity: Entity) {
        self.defer(Command::remove::<T>(entity));
    }
}

/// A unit of executable logic operating on the world.
///
/// The declared [`AccessSets`] must cover every component the system touches:
/// the scheduler only keeps systems apart when their declarations conflict.
pub trait System: Send + Sync {
    /// Unique name, used for ordering constraints and diagnostics.
    fn name(&self) -> &str;

    /// Declared component access.
    fn access(&self) -> AccessSets;

    /// Execution phase.
    fn phase(&self) -> Phase {
        Phase::Update
    }

    /// Executes the system.
    fn run(&self, ctx: &SystemContext<'_>) -> ECSResult<()>;
}

/// Closure-backed [`System`].
pub struct FnSystem<F> {
    name: String,
    access: AccessSets,
    phase: Phase,
    f: F,
}

impl<F> FnSystem<F>
where
    F: Fn(&SystemContext<'_>) -> ECSResult<()> + Send + Sync,
{
    /// Creates an [`Phase::Update`] system.
    pub fn new(name: impl Into<String>, access: AccessSets, f: F) -> Self {
        Self { name: name.into(), access, phase: Phase::Update, f }
    }

    /// Moves the system to `phase`.
    pub fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(&SystemContext<'_>) -> ECSResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> AccessSets {
        self.access.clone()
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn run(&self, ctx: &SystemContext<'_>) -> ECSResult<()> {
        (self.f)(ctx)
    }
}

impl<F> fmt::Debug for FnSystem<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSystem")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("phase", &self.phase)
            .finish()
    }
}
