//! # Archetype storage
//!
//! An [`Archetype`] owns every entity whose composition is exactly its
//! composition, and stores their component values densely.
//!
//! ## Layout
//!
//! * `entities[i]` is the entity occupying slot `i`.
//! * Each component type has one column. A column is either
//!   * **boxed**: an [`Attribute<T>`] behind a column-level `RwLock`, or
//!   * **decomposed**: a list of [`FieldColumn`]s inside the archetype's
//!     shared [`PrimitiveArrays`].
//! * Slot `i` of every column belongs to `entities[i]`.
//!
//! ## Structural operations
//!
//! `add_entity` appends at slot `len`. `remove_entity` swap-removes: the last
//! slot's values move into the hole in every column, the moved entity's index
//! entry is updated, and the removed values are handed back as a
//! [`ComponentMap`] so the world can migrate them to another archetype. Both
//! run in O(columns + fields), independent of the number of entities.
//!
//! Capacity starts at the configured initial capacity and is multiplied by
//! the growth factor whenever it runs out. In the decomposed variant growth
//! rebuilds the shared arrays and relocates every field column.
//!
//! ## Concurrency model
//!
//! Structural operations take `&mut self`. Value reads and writes take
//! `&self`:
//!
//! * boxed columns are locked per column with `try_read`/`try_write`; a column
//!   already held in an incompatible mode yields [`AccessError::ColumnBusy`]
//!   rather than blocking, since under a correctly declared schedule that can
//!   only be an undeclared overlap;
//! * decomposed columns are atomic cells and take no lock.

use std::any::{type_name, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::engine::component::{
    Component, ComponentMap, ComponentRegistry, DecompositionFns, ErasedComponent,
};
use crate::engine::config::{DecompositionPolicy, StorageMode, WorldConfig};
use crate::engine::entity::Entity;
use crate::engine::error::{AccessError, ECSResult, FieldError, StructuralError};
use crate::engine::primitive::{FieldColumn, FieldSink, FieldSource, PrimitiveArrays};
use crate::engine::storage::{Attribute, TypeErasedAttribute};
use crate::engine::types::{ArchetypeID, ComponentID, Signature, SlotID};


enum ColumnStorage {
    Boxed(RwLock<Box<dyn TypeErasedAttribute>>),
    Decomposed { fields: Vec<FieldColumn>, fns: DecompositionFns },
}

struct Column {
    name: &'static str,
    type_id: TypeId,
    storage: ColumnStorage,
}

/// Storage unit for all entities sharing one composition.
pub struct Archetype {
    id: ArchetypeID,
    signature: Signature,
    composition: Vec<ComponentID>,
    columns: Vec<Column>,
    entities: Vec<Entity>,
    slots: HashMap<Entity, SlotID>,
    capacity: usize,
    growth_factor: f64,
    arrays: PrimitiveArrays,
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("composition", &self.composition)
            .field("len", &self.entities.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Archetype {
    /// Creates an empty archetype for `signature`.
    ///
    /// Every member of the signature must be registered. Under
    /// [`StorageMode::Decomposed`], types registered with a decomposition get
    /// field columns; the others are boxed or rejected according to the
    /// configured [`DecompositionPolicy`].
    pub fn new(
        id: ArchetypeID,
        signature: Signature,
        registry: &ComponentRegistry,
        config: &WorldConfig,
    ) -> Result<Self, StructuralError> {
        let capacity = config.initial_capacity.max(1);
        let composition = signature.to_ids();
        let mut arrays = PrimitiveArrays::new(capacity);
        let mut columns = Vec::with_capacity(composition.len());

        for &component_id in &composition {
            let desc = registry.desc(component_id).ok_or(StructuralError::UnregisteredComponent {
                component: "<unknown id>",
            })?;
            let storage = match (config.storage, desc.decomposition()) {
                (StorageMode::Decomposed, Some(fns)) => ColumnStorage::Decomposed {
                    fields: arrays.allocate(fns.fields, 0),
                    fns: *fns,
                },
                (StorageMode::Decomposed, None)
                    if config.decomposition == DecompositionPolicy::Reject =>
                {
                    return Err(StructuralError::UnsupportedFieldShape { component: desc.name });
                }
                _ => ColumnStorage::Boxed(RwLock::new(desc.new_column(capacity))),
            };
            columns.push(Column { name: desc.name, type_id: desc.type_id, storage });
        }

        Ok(Self {
            id,
            signature,
            composition,
            columns,
            entities: Vec::with_capacity(capacity),
            slots: HashMap::with_capacity(capacity),
            capacity,
            growth_factor: config.growth_factor,
            arrays,
        })
    }

    /// Index of this archetype in the world's table.
    #[inline]
    pub fn id(&self) -> ArchetypeID {
        self.id
    }

    /// Composition as a bitset.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Composition as a sorted id list.
    #[inline]
    pub fn composition(&self) -> &[ComponentID] {
        &self.composition
    }

    /// Returns `true` if the composition contains `component_id`.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        self.signature.has(component_id)
    }

    /// Number of stored entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entity is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Allocated slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stored entities in slot order.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Slot of `entity`, if stored here.
    #[inline]
    pub fn slot_of(&self, entity: Entity) -> Option<SlotID> {
        self.slots.get(&entity).copied()
    }

    /// Returns `true` if `entity` is stored here.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.slots.contains_key(&entity)
    }

    /// Field columns of `component_id`, if it is stored decomposed.
    pub fn field_columns(&self, component_id: ComponentID) -> Option<&[FieldColumn]> {
        match &self.column(component_id)?.storage {
            ColumnStorage::Decomposed { fields, .. } => Some(fields),
            ColumnStorage::Boxed(_) => None,
        }
    }

    /// Shared primitive arrays.
    #[inline]
    pub fn arrays(&self) -> &PrimitiveArrays {
        &self.arrays
    }

    fn column(&self, component_id: ComponentID) -> Option<&Column> {
        self.composition
            .binary_search(&component_id)
            .ok()
            .map(|index| &self.columns[index])
    }

    fn require_slot(&self, entity: Entity) -> Result<SlotID, StructuralError> {
        self.slot_of(entity)
            .ok_or(StructuralError::EntityNotInArchetype { entity, archetype: self.id })
    }

    fn require_column<T: Component>(
        &self,
        entity: Entity,
        component_id: ComponentID,
    ) -> Result<&Column, StructuralError> {
        self.column(component_id)
            .ok_or(StructuralError::MissingComponent { entity, component: type_name::<T>() })
    }

    /// Ensures room for `additional` more entities.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.entities.len() + additional;
        if needed <= self.capacity {
            return;
        }
        let mut capacity = self.capacity;
        while capacity < needed {
            let grown = (capacity as f64 * self.growth_factor).ceil() as usize;
            capacity = grown.max(capacity + 1);
        }
        trace!(archetype = self.id, from = self.capacity, to = capacity, "growing archetype");

        let live = self.entities.len();
        self.arrays.grow(capacity, live);
        for column in &mut self.columns {
            if let ColumnStorage::Boxed(lock) = &mut column.storage {
                lock.get_mut().reserve_total(capacity);
            }
        }
        self.entities.reserve(capacity - live);
        self.capacity = capacity;
    }

    /// Appends `entity` with the given component values.
    ///
    /// The map's key set must equal the composition exactly and each value
    /// must have its key's type. Nothing is modified on failure.
    pub fn add_entity(&mut self, entity: Entity, components: ComponentMap) -> ECSResult<SlotID> {
        if self.slots.contains_key(&entity) {
            return Err(StructuralError::EntityAlreadyPresent { entity, archetype: self.id }.into());
        }
        if !components.keys().copied().eq(self.composition.iter().copied()) {
            return Err(StructuralError::CompositionMismatch {
                expected: self.composition.clone(),
                found: components.keys().copied().collect(),
            }
            .into());
        }
        for (column, value) in self.columns.iter().zip(components.values()) {
            if (**value).type_id() != column.type_id {
                return Err(FieldError::ValueType { expected: column.name }.into());
            }
        }

        self.reserve(1);
        let slot = self.entities.len();
        let values: Vec<ErasedComponent> = components.into_values().collect();

        // Field cells past the live range are unobserved, so a failed
        // decomposition leaves the archetype untouched.
        for (column, value) in self.columns.iter().zip(values.iter()) {
            if let ColumnStorage::Decomposed { fields, fns } = &column.storage {
                let mut sink = FieldSink::new(&self.arrays, fields, slot, column.name);
                (fns.decompose)(&**value, &mut sink)?;
                sink.finish()?;
            }
        }
        for (column, value) in self.columns.iter_mut().zip(values) {
            if let ColumnStorage::Boxed(lock) = &mut column.storage {
                lock.get_mut().push_dyn(value)?;
            }
        }
        self.entities.push(entity);
        self.slots.insert(entity, slot);
        trace!(archetype = self.id, %entity, slot, "entity added");
        Ok(slot)
    }

    /// Removes `entity`, returning its full component map.
    ///
    /// The last slot is moved into the vacated one so storage stays dense.
    /// Decomposed values are rebuilt before any column shrinks, so nothing is
    /// modified on failure.
    pub fn remove_entity(&mut self, entity: Entity) -> ECSResult<ComponentMap> {
        let slot = self.require_slot(entity)?;
        let len = self.entities.len();
        let last = len - 1;
        let mut components = ComponentMap::new();

        for (&component_id, column) in self.composition.iter().zip(self.columns.iter_mut()) {
            match &mut column.storage {
                ColumnStorage::Boxed(lock) => {
                    let stored = lock.get_mut().len();
                    if stored != len {
                        return Err(AccessError::SlotOutOfBounds { slot: last, len: stored }.into());
                    }
                }
                ColumnStorage::Decomposed { fields, fns } => {
                    let mut source = FieldSource::new(&self.arrays, fields, slot, column.name);
                    components.insert(component_id, (fns.recompose_boxed)(&mut source)?);
                }
            }
        }

        for (&component_id, column) in self.composition.iter().zip(self.columns.iter_mut()) {
            match &mut column.storage {
                ColumnStorage::Boxed(lock) => {
                    components.insert(component_id, lock.get_mut().swap_remove_dyn(slot)?);
                }
                ColumnStorage::Decomposed { fields, .. } => {
                    if slot != last {
                        self.arrays.move_slot(fields, last, slot);
                    } else {
                        self.arrays.clear_slot(fields, slot);
                    }
                }
            }
        }

        self.slots.remove(&entity);
        self.entities.swap_remove(slot);
        if let Some(&moved) = self.entities.get(slot) {
            self.slots.insert(moved, slot);
        }
        trace!(archetype = self.id, %entity, slot, "entity removed");
        Ok(components)
    }

    /// Clone of `entity`'s `T` value.
    pub fn get_component<T: Component>(
        &self,
        entity: Entity,
        component_id: ComponentID,
    ) -> ECSResult<T> {
        let slot = self.require_slot(entity)?;
        self.require_column::<T>(entity, component_id)?;
        self.reader::<T>(component_id)?.get(slot)
    }

    /// Overwrites `entity`'s `T` value in place.
    pub fn set_component<T: Component>(
        &self,
        entity: Entity,
        component_id: ComponentID,
        value: T,
    ) -> ECSResult<()> {
        let slot = self.require_slot(entity)?;
        self.require_column::<T>(entity, component_id)?;
        self.writer::<T>(component_id)?.set(slot, value)
    }

    /// Read cursor over the `T` column.
    pub fn reader<T: Component>(&self, component_id: ComponentID) -> ECSResult<ComponentReader<'_, T>> {
        let column = self
            .column(component_id)
            .ok_or(AccessError::TypeMismatch { expected: type_name::<T>() })?;
        let view = match &column.storage {
            ColumnStorage::Boxed(lock) => {
                let guard = lock
                    .try_read()
                    .ok_or(AccessError::ColumnBusy { component: column.name })?;
                let mapped = RwLockReadGuard::try_map(guard, |col| {
                    (**col)
                        .as_any()
                        .downcast_ref::<Attribute<T>>()
                        .map(Attribute::as_slice)
                })
                .map_err(|_| AccessError::TypeMismatch { expected: type_name::<T>() })?;
                ReadView::Boxed(mapped)
            }
            ColumnStorage::Decomposed { fields, fns } => {
                if column.type_id != TypeId::of::<T>() {
                    return Err(AccessError::TypeMismatch { expected: type_name::<T>() }.into());
                }
                ReadView::Decomposed(FieldView {
                    arrays: &self.arrays,
                    fields,
                    fns: *fns,
                    component: column.name,
                })
            }
        };
        Ok(ComponentReader { view, len: self.entities.len(), cursor: 0 })
    }

    /// Write cursor over the `T` column.
    pub fn writer<T: Component>(&self, component_id: ComponentID) -> ECSResult<ComponentWriter<'_, T>> {
        let column = self
            .column(component_id)
            .ok_or(AccessError::TypeMismatch { expected: type_name::<T>() })?;
        let view = match &column.storage {
            ColumnStorage::Boxed(lock) => {
                let guard = lock
                    .try_write()
                    .ok_or(AccessError::ColumnBusy { component: column.name })?;
                let mapped =
                    RwLockWriteGuard::try_map(guard, |col| {
                        (**col)
                            .as_any_mut()
                            .downcast_mut::<Attribute<T>>()
                            .map(Attribute::as_mut_slice)
                    })
                    .map_err(|_| AccessError::TypeMismatch { expected: type_name::<T>() })?;
                WriteView::Boxed(mapped)
            }
            ColumnStorage::Decomposed { fields, fns } => {
                if column.type_id != TypeId::of::<T>() {
                    return Err(AccessError::TypeMismatch { expected: type_name::<T>() }.into());
                }
                WriteView::Decomposed(FieldView {
                    arrays: &self.arrays,
                    fields,
                    fns: *fns,
                    component: column.name,
                })
            }
        };
        Ok(ComponentWriter { view, len: self.entities.len() })
    }
}

struct FieldView<'a> {
    arrays: &'a PrimitiveArrays,
    fields: &'a [FieldColumn],
    fns: DecompositionFns,
    component: &'static str,
}

impl FieldView<'_> {
    fn load<T: Component>(&self, slot: SlotID) -> ECSResult<T> {
        let mut source = FieldSource::new(self.arrays, self.fields, slot, self.component);
        let mut out: Option<T> = None;
        (self.fns.recompose_into)(&mut source, &mut out)?;
        out.ok_or_else(|| FieldError::ValueType { expected: type_name::<T>() }.into())
    }

    fn store<T: Component>(&self, slot: SlotID, value: &T) -> ECSResult<()> {
        let mut sink = FieldSink::new(self.arrays, self.fields, slot, self.component);
        (self.fns.decompose)(value, &mut sink)?;
        sink.finish()?;
        Ok(())
    }
}

enum ReadView<'a, T> {
    Boxed(MappedRwLockReadGuard<'a, [T]>),
    Decomposed(FieldView<'a>),
}

/// Read cursor over one column of an archetype.
///
/// Holds the column's read lock (boxed storage) for as long as it lives.
/// Iterating yields every value in slot order.
pub struct ComponentReader<'a, T> {
    view: ReadView<'a, T>,
    len: usize,
    cursor: usize,
}

impl<'a, T: Component> ComponentReader<'a, T> {
    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the column is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Value at `slot`, borrowed where the storage allows it.
    pub fn fetch(&self, slot: SlotID) -> ECSResult<Cow<'_, T>> {
        if slot >= self.len {
            return Err(AccessError::SlotOutOfBounds { slot, len: self.len }.into());
        }
        match &self.view {
            ReadView::Boxed(values) => values
                .get(slot)
                .map(Cow::Borrowed)
                .ok_or_else(|| AccessError::SlotOutOfBounds { slot, len: values.len() }.into()),
            ReadView::Decomposed(fields) => fields.load::<T>(slot).map(Cow::Owned),
        }
    }

    /// Clone of the value at `slot`.
    pub fn get(&self, slot: SlotID) -> ECSResult<T> {
        self.fetch(slot).map(Cow::into_owned)
    }
}

impl<'a, T: Component> Iterator for ComponentReader<'a, T> {
    type Item = ECSResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.len {
            return None;
        }
        let item = self.get(self.cursor);
        self.cursor += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.cursor;
        (remaining, Some(remaining))
    }
}

enum WriteView<'a, T> {
    Boxed(MappedRwLockWriteGuard<'a, [T]>),
    Decomposed(FieldView<'a>),
}

/// Write cursor over one column of an archetype.
///
/// Holds the column's write lock (boxed storage) for as long as it lives.
pub struct ComponentWriter<'a, T> {
    view: WriteView<'a, T>,
    len: usize,
}

impl<'a, T: Component> ComponentWriter<'a, T> {
    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the column is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, slot: SlotID) -> ECSResult<()> {
        if slot >= self.len {
            return Err(AccessError::SlotOutOfBounds { slot, len: self.len }.into());
        }
        Ok(())
    }

    /// Clone of the value at `slot`.
    pub fn get(&self, slot: SlotID) -> ECSResult<T> {
        self.check(slot)?;
        match &self.view {
            WriteView::Boxed(values) => values
                .get(slot)
                .cloned()
                .ok_or_else(|| AccessError::SlotOutOfBounds { slot, len: values.len() }.into()),
            WriteView::Decomposed(fields) => fields.load(slot),
        }
    }

    /// Replaces the value at `slot`.
    pub fn set(&mut self, slot: SlotID, value: T) -> ECSResult<()> {
        self.check(slot)?;
        match &mut self.view {
            WriteView::Boxed(values) => {
                let len = values.len();
                let cell = values.get_mut(slot).ok_or(AccessError::SlotOutOfBounds { slot, len })?;
                *cell = value;
                Ok(())
            }
            WriteView::Decomposed(fields) => fields.store(slot, &value),
        }
    }

    /// Applies `f` to the value at `slot` in place.
    pub fn update<R>(&mut self, slot: SlotID, f: impl FnOnce(&mut T) -> R) -> ECSResult<R> {
        self.check(slot)?;
        match &mut self.view {
            WriteView::Boxed(values) => {
                let len = values.len();
                let cell = values.get_mut(slot).ok_or(AccessError::SlotOutOfBounds { slot, len })?;
                Ok(f(cell))
            }
            WriteView::Decomposed(fields) => {
                let mut value: T = fields.load(slot)?;
                let result = f(&mut value);
                fields.store(slot, &value)?;
                Ok(result)
            }
        }
    }
}
