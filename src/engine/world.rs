//! # World
//!
//! The [`World`] owns every piece of entity state:
//!
//! * the [`ComponentRegistry`] mapping Rust types to component ids,
//! * the [`Entities`] allocator and its entity → archetype index,
//! * the archetype table, keyed by composition,
//! * the query cache,
//! * the queue of deferred [`Command`]s.
//!
//! ## Structural mutation
//!
//! Spawning places an entity in the archetype of its initial composition,
//! creating that archetype on first sight. Adding or removing a component
//! reads the entity's full component map out of its archetype (swap-removing
//! it), adjusts the map, and inserts it into the archetype of the new
//! composition. Destroying removes the entity and retires its id.
//!
//! All structural operations take `&mut World`. Value reads and writes, and
//! queries, take `&World`, which is what systems receive while a schedule
//! runs. Structural changes requested from `&World` go through
//! [`World::defer`] and are applied by [`World::apply_deferred_commands`].
//!
//! ## Archetype creation
//!
//! Archetypes are never destroyed, so the table only grows. Every creation
//! notifies the query cache, which either clears or patches its entries.
//!
//! ## Example
//! ```
//! use columnar_ecs::prelude::*;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Health(i32);
//! #[derive(Clone)]
//! struct Poisoned;
//!
//! let mut world = World::new();
//! world.register::<Health>()?;
//! world.register::<Poisoned>()?;
//!
//! let e = world.spawn((Health(10),))?;
//! world.add_component(e, Poisoned)?;
//! assert_eq!(world.query().with::<Poisoned>().count(), 1);
//!
//! world.remove_component::<Poisoned>(e)?;
//! assert_eq!(world.get_component::<Health>(e)?, Health(10));
//! # Ok::<(), columnar_ecs::engine::error::ECSError>(())
//! ```

use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::engine::archetype::Archetype;
use crate::engine::cache::{CacheStats, QueryCache};
use crate::engine::commands::Command;
use crate::engine::component::{
    Bundle, BundleEntry, Component, ComponentMap, ComponentRegistry, ErasedComponent, IntoBundle,
};
use crate::engine::config::WorldConfig;
use crate::engine::entity::{Entities, Entity};
use crate::engine::error::{ECSError, ECSResult, FieldError, StructuralError};
use crate::engine::primitive::Decompose;
use crate::engine::query::{QueryBuilder, QueryFilter};
use crate::engine::types::{ArchetypeID, ComponentID, Signature};


fn signature_of(components: &ComponentMap) -> Signature {
    let mut signature = Signature::new();
    for &component_id in components.keys() {
        signature.set(component_id);
    }
    signature
}

/// Container of all entities, components and archetypes of one simulation.
pub struct World {
    config: WorldConfig,
    registry: ComponentRegistry,
    entities: Entities,
    archetypes: Vec<Archetype>,
    by_composition: HashMap<Signature, ArchetypeID>,
    cache: QueryCache,
    deferred: Mutex<Vec<Command>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates a world with the default configuration.
    pub fn new() -> Self {
        Self::build(WorldConfig::default())
    }

    /// Creates a world with `config`, after validating it.
    pub fn with_config(config: WorldConfig) -> ECSResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: WorldConfig) -> Self {
        Self {
            cache: QueryCache::new(config.cache, config.invalidation),
            config,
            registry: ComponentRegistry::new(),
            entities: Entities::new(),
            archetypes: Vec::new(),
            by_composition: HashMap::new(),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Component registry.
    #[inline]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Registers `T` for boxed storage. Idempotent.
    pub fn register<T: Component>(&mut self) -> ECSResult<ComponentID> {
        Ok(self.registry.register::<T>()?)
    }

    /// Registers `T` with its primitive field decomposition. Idempotent.
    pub fn register_decomposed<T: Component + Decompose>(&mut self) -> ECSResult<ComponentID> {
        Ok(self.registry.register_decomposed::<T>()?)
    }

    /// Id of `T`, if registered.
    #[inline]
    pub fn component_id<T: 'static>(&self) -> Option<ComponentID> {
        self.registry.id_of::<T>()
    }

    // ─── Archetype table ────────────────────────────────────────────────

    fn archetype_for(&mut self, signature: Signature) -> ECSResult<ArchetypeID> {
        if let Some(&id) = self.by_composition.get(&signature) {
            return Ok(id);
        }
        let id = ArchetypeID::try_from(self.archetypes.len())
            .map_err(|_| StructuralError::InvalidConfig { reason: "archetype table is full".into() })?;
        let archetype = Archetype::new(id, signature, &self.registry, &self.config)?;
        self.archetypes.push(archetype);
        self.by_composition.insert(signature, id);
        self.cache.on_archetype_created(id, &signature);
        debug!(
            archetype = id,
            composition = ?signature,
            total = self.archetypes.len(),
            "archetype created"
        );
        Ok(id)
    }

    /// Archetype `id`.
    #[inline]
    pub fn archetype(&self, id: ArchetypeID) -> Option<&Archetype> {
        self.archetypes.get(id as usize)
    }

    /// Every archetype, in creation order.
    #[inline]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Number of distinct compositions observed so far.
    #[inline]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Archetype storing `entity`, if live.
    #[inline]
    pub fn archetype_of(&self, entity: Entity) -> Option<ArchetypeID> {
        self.entities.archetype_of(entity)
    }

    fn locate(&self, entity: Entity) -> Result<ArchetypeID, StructuralError> {
        self.entities
            .archetype_of(entity)
            .ok_or(StructuralError::NoSuchEntity { entity })
    }

    // ─── Entities ───────────────────────────────────────────────────────

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entity is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns `true` if `entity` is live.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Spawns an entity carrying `bundle`.
    ///
    /// Fails if a type is unregistered or listed twice.
    pub fn spawn(&mut self, bundle: impl IntoBundle) -> ECSResult<Entity> {
        let components = self.registry.resolve(bundle.into_bundle())?;
        self.spawn_components(components)
    }

    fn spawn_components(&mut self, components: ComponentMap) -> ECSResult<Entity> {
        let archetype_id = self.archetype_for(signature_of(&components))?;
        let entity = self.entities.alloc(archetype_id)?;
        if let Err(err) = self.archetypes[archetype_id as usize].add_entity(entity, components) {
            self.entities.free(entity);
            return Err(err);
        }
        trace!(%entity, archetype = archetype_id, "spawned");
        Ok(entity)
    }

    /// Starts a batch spawn of `count` entities.
    ///
    /// ```
    /// # use columnar_ecs::prelude::*;
    /// # #[derive(Clone)] struct Wealth(f32);
    /// let mut world = World::new();
    /// world.register::<Wealth>()?;
    /// let agents = world.spawn_batch(100).with(|i| Wealth(i as f32)).spawn()?;
    /// assert_eq!(agents.len(), 100);
    /// # Ok::<(), columnar_ecs::engine::error::ECSError>(())
    /// ```
    pub fn spawn_batch(&mut self, count: usize) -> SpawnBatch<'_> {
        SpawnBatch { world: self, count, factories: Vec::new() }
    }

    /// Destroys `entity`, dropping its components and retiring its id.
    pub fn destroy(&mut self, entity: Entity) -> ECSResult<()> {
        let archetype_id = self.locate(entity)?;
        self.archetypes[archetype_id as usize].remove_entity(entity)?;
        self.entities.free(entity);
        trace!(%entity, "destroyed");
        Ok(())
    }

    // ─── Composition changes ────────────────────────────────────────────

    /// Attaches `value` to `entity`, migrating it to the archetype of its new
    /// composition.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let component_id = self.registry.require::<T>()?;
        self.insert_erased(entity, component_id, type_name::<T>(), Box::new(value))
    }

    /// Detaches and returns `entity`'s `T` value. Removing the last component
    /// leaves the entity alive in the empty archetype.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> ECSResult<T> {
        let component_id = self.registry.require::<T>()?;
        let value = self.take_erased(entity, component_id, type_name::<T>())?;
        value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| FieldError::ValueType { expected: type_name::<T>() }.into())
    }

    fn insert_erased(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        name: &'static str,
        value: ErasedComponent,
    ) -> ECSResult<()> {
        let source = self.locate(entity)?;
        let mut signature = *self.archetypes[source as usize].signature();
        if signature.has(component_id) {
            return Err(StructuralError::ComponentAlreadyPresent { entity, component: name }.into());
        }
        signature.set(component_id);
        let target = self.archetype_for(signature)?;

        let mut components = self.archetypes[source as usize].remove_entity(entity)?;
        components.insert(component_id, value);
        self.migrate(entity, target, components)
    }

    fn take_erased(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        name: &'static str,
    ) -> ECSResult<ErasedComponent> {
        let source = self.locate(entity)?;
        let mut signature = *self.archetypes[source as usize].signature();
        if !signature.has(component_id) {
            return Err(StructuralError::MissingComponent { entity, component: name }.into());
        }
        signature.clear(component_id);
        let target = self.archetype_for(signature)?;

        let mut components = self.archetypes[source as usize].remove_entity(entity)?;
        let value = components
            .remove(&component_id)
            .ok_or(StructuralError::MissingComponent { entity, component: name })?;
        self.migrate(entity, target, components)?;
        Ok(value)
    }

    fn migrate(
        &mut self,
        entity: Entity,
        target: ArchetypeID,
        components: ComponentMap,
    ) -> ECSResult<()> {
        if let Err(err) = self.archetypes[target as usize].add_entity(entity, components) {
            error!(%entity, archetype = target, %err, "migration failed, entity dropped");
            self.entities.free(entity);
            return Err(err);
        }
        self.entities.relocate(entity, target)?;
        trace!(%entity, archetype = target, "migrated");
        Ok(())
    }

    // ─── Values ─────────────────────────────────────────────────────────

    /// Clone of `entity`'s `T` value.
    pub fn get_component<T: Component>(&self, entity: Entity) -> ECSResult<T> {
        let component_id = self.registry.require::<T>()?;
        let archetype_id = self.locate(entity)?;
        self.archetypes[archetype_id as usize].get_component(entity, component_id)
    }

    /// Overwrites `entity`'s `T` value in place. The composition is
    /// unchanged, so this is allowed from `&World`.
    pub fn set_component<T: Component>(&self, entity: Entity, value: T) -> ECSResult<()> {
        let component_id = self.registry.require::<T>()?;
        let archetype_id = self.locate(entity)?;
        self.archetypes[archetype_id as usize].set_component(entity, component_id, value)
    }

    /// Returns `true` if `entity` carries `T`.
    pub fn has_component<T: 'static>(&self, entity: Entity) -> ECSResult<bool> {
        let archetype_id = self.locate(entity)?;
        Ok(self
            .registry
            .id_of::<T>()
            .is_some_and(|id| self.archetypes[archetype_id as usize].has(id)))
    }

    /// Sorted component ids of `entity`'s composition.
    pub fn composition(&self, entity: Entity) -> ECSResult<Vec<ComponentID>> {
        let archetype_id = self.locate(entity)?;
        Ok(self.archetypes[archetype_id as usize].composition().to_vec())
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// Starts a query.
    #[inline]
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Archetypes matching `filter`, served from the cache when possible.
    pub fn matching_archetypes(&self, filter: &QueryFilter) -> Arc<[ArchetypeID]> {
        let strategy = self.config.matcher;
        self.cache.get_or_compute(filter.key(), || {
            self.archetypes
                .iter()
                .filter(|archetype| filter.matches(strategy, archetype))
                .map(Archetype::id)
                .collect()
        })
    }

    /// Query cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ─── Deferred commands ──────────────────────────────────────────────

    /// Queues `command` for the next [`World::apply_deferred_commands`].
    pub fn defer(&self, command: Command) {
        self.deferred.lock().push(command);
    }

    /// Number of queued commands.
    pub fn pending_commands(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Applies every queued command in recording order.
    ///
    /// A failing command is logged and skipped; the first failure is returned
    /// once the queue is drained. On success returns the number applied.
    pub fn apply_deferred_commands(&mut self) -> ECSResult<usize> {
        let commands = std::mem::take(self.deferred.get_mut());
        if commands.is_empty() {
            return Ok(0);
        }
        let total = commands.len();
        let mut first_error: Option<ECSError> = None;
        for command in commands {
            let described = format!("{command:?}");
            if let Err(err) = self.apply(command) {
                warn!(command = %described, %err, "deferred command failed");
                first_error.get_or_insert(err);
            }
        }
        debug!(total, "applied deferred commands");
        match first_error {
            Some(err) => Err(err),
            None => Ok(total),
        }
    }

    fn apply(&mut self, command: Command) -> ECSResult<()> {
        match command {
            Command::Spawn { bundle } => self.spawn(bundle).map(|_| ()),
            Command::Despawn { entity } => self.destroy(entity),
            Command::Add { entity, component } => {
                let BundleEntry { type_id, name, value } = component;
                let component_id = self
                    .registry
                    .id_of_type(type_id)
                    .ok_or(StructuralError::UnregisteredComponent { component: name })?;
                self.insert_erased(entity, component_id, name, value)
            }
            Command::Remove { entity, type_id, name } => {
                let component_id = self
                    .registry
                    .id_of_type(type_id)
                    .ok_or(StructuralError::UnregisteredComponent { component: name })?;
                self.take_erased(entity, component_id, name).map(drop)
            }
        }
    }
}

type Factory<'w> = Box<dyn FnMut(usize) -> BundleEntry + 'w>;

/// Builder returned by [`World::spawn_batch`].
pub struct SpawnBatch<'w> {
    world: &'w mut World,
    count: usize,
    factories: Vec<Factory<'w>>,
}

impl<'w> SpawnBatch<'w> {
    /// Adds a component whose value for the `i`-th entity is `factory(i)`.
    pub fn with<T: Component>(mut self, mut factory: impl FnMut(usize) -> T + 'w) -> Self {
        self.factories.push(Box::new(move |index| BundleEntry::new(factory(index))));
        self
    }

    /// Spawns the batch, returning the new entities in order.
    pub fn spawn(mut self) -> ECSResult<Vec<Entity>> {
        let mut spawned = Vec::with_capacity(self.count);
        for index in 0..self.count {
            let mut bundle = Bundle::new();
            for factory in self.factories.iter_mut() {
                bundle.push_entry(factory(index));
            }
            let components = self.world.registry.resolve(bundle)?;
            if index == 0 {
                let archetype_id = self.world.archetype_for(signature_of(&components))?;
                self.world.archetypes[archetype_id as usize].reserve(self.count);
            }
            spawned.push(self.world.spawn_components(components)?);
        }
        debug!(count = self.count, "batch spawned");
        Ok(spawned)
    }
}
