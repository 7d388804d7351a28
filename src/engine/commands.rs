//! # Commands
//!
//! Deferred structural mutations.
//!
//! ## Purpose
//! Systems run against a shared `&World` and may not change compositions
//! directly, since a migration would move rows out from under concurrently
//! running systems. Instead they record a [`Command`]; the scheduler applies
//! the queue at the next stage barrier, when no system is running.
//!
//! ## Invariants
//! - Commands are applied in the order they were recorded.
//! - A failing command does not prevent later commands from being applied.
//! - Component values are carried type-erased and resolved against the
//!   world's registry when applied.

use std::any::{type_name, TypeId};
use std::fmt;

use crate::engine::component::{Bundle, BundleEntry, Component, IntoBundle};
use crate::engine::entity::Entity;


/// A deferred structural mutation.
pub enum Command {
    /// Spawns a new entity.
    Spawn {
        /// Initial components.
        bundle: Bundle,
    },
    /// Destroys an entity.
    Despawn {
        /// Target entity.
        entity: Entity,
    },
    /// Adds a component to an entity.
    Add {
        /// Target entity.
        entity: Entity,
        /// The erased value.
        component: BundleEntry,
    },
    /// Removes a component from an entity, dropping its value.
    Remove {
        /// Target entity.
        entity: Entity,
        /// Type of the component.
        type_id: TypeId,
        /// Name of the component type.
        name: &'static str,
    },
}

impl Command {
    /// Deferred spawn.
    pub fn spawn(bundle: impl IntoBundle) -> Self {
        Self::Spawn { bundle: bundle.into_bundle() }
    }

    /// Deferred destroy.
    pub fn despawn(entity: Entity) -> Self {
        Self::Despawn { entity }
    }

    /// Deferred component addition.
    pub fn add<T: Component>(entity: Entity, value: T) -> Self {
        Self::Add { entity, component: BundleEntry::new(value) }
    }

    /// Deferred component removal.
    pub fn remove<T: Component>(entity: Entity) -> Self {
        Self::Remove { entity, type_id: TypeId::of::<T>(), name: type_name::<T>() }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { bundle } => f.debug_struct("Spawn").field("bundle", bundle).finish(),
            Self::Despawn { entity } => f.debug_struct("Despawn").field("entity", entity).finish(),
            Self::Add { entity, component } => f
                .debug_struct("Add")
                .field("entity", entity)
                .field("component", component)
                .finish(),
            Self::Remove { entity, name, .. } => f
                .debug_struct("Remove")
                .field("entity", entity)
                .field("component", name)
                .finish(),
        }
    }
}
