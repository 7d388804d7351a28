//! # Component Registry
//!
//! This module assigns stable [`ComponentID`] values to Rust component types
//! and keeps, per type, the type-erased functions archetypes need to build and
//! operate on its storage.
//!
//! ## Purpose
//! Archetypes store heterogeneous columns behind trait objects. The registry
//! is the bridge between a typed API (`world.spawn((Position, Velocity))`) and
//! that erased storage: it maps `TypeId` to `ComponentID`, and records for each
//! id a column factory and, for decomposable types, the accessor functions that
//! move values in and out of primitive field columns.
//!
//! ## Design
//! - The registry is owned by a world. There is no process-global state, so
//!   two worlds may assign different ids to the same type.
//! - Registration is explicit and idempotent. Registering an already known
//!   type returns its existing id.
//! - `register_decomposed` additionally records the type's [`Decompose`]
//!   table. Archetypes created afterwards may store the type as field columns.
//!
//! ## Invariants
//! - Ids are dense in `[0, COMPONENT_CAP)` and never reused within a world.
//! - Every registered id has a column factory.
//!
//! ## Bundles
//! A [`Bundle`] is an ordered list of erased component values used to spawn
//! an entity. Tuples of up to eight components convert into bundles through
//! [`IntoBundle`].

use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::engine::error::{FieldError, StructuralError};
use crate::engine::primitive::{Decompose, FieldDesc, FieldSink, FieldSource};
use crate::engine::storage::{Attribute, TypeErasedAttribute};
use crate::engine::types::{ComponentID, COMPONENT_CAP};


/// Marker for types usable as components.
///
/// Implemented for every `Clone + Send + Sync + 'static` type.
pub trait Component: Any + Clone + Send + Sync {}

impl<T: Any + Clone + Send + Sync> Component for T {}

/// A component value with its type erased.
pub type ErasedComponent = Box<dyn Any + Send + Sync>;

/// The full component set of one entity, keyed and ordered by id.
pub type ComponentMap = BTreeMap<ComponentID, ErasedComponent>;

type ColumnFactory = fn(usize) -> Box<dyn TypeErasedAttribute>;

fn new_column<T: Component>(capacity: usize) -> Box<dyn TypeErasedAttribute> {
    Box::new(Attribute::<T>::with_capacity(capacity))
}

/// Accessor functions for a type stored as primitive field columns.
#[derive(Clone, Copy)]
pub struct DecompositionFns {
    /// Declared fields.
    pub fields: &'static [FieldDesc],
    /// Writes an erased value of the type into a sink.
    pub decompose: fn(&dyn Any, &mut FieldSink<'_>) -> Result<(), FieldError>,
    /// Rebuilds a boxed value from a source.
    pub recompose_boxed: fn(&mut FieldSource<'_>) -> Result<ErasedComponent, FieldError>,
    /// Rebuilds a value into an `Option<T>` passed as `&mut dyn Any`.
    pub recompose_into: fn(&mut FieldSource<'_>, &mut dyn Any) -> Result<(), FieldError>,
}

impl fmt::Debug for DecompositionFns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecompositionFns").field("fields", &self.fields).finish()
    }
}

fn decompose_erased<T: Component + Decompose>(
    value: &dyn Any,
    sink: &mut FieldSink<'_>,
) -> Result<(), FieldError> {
    let value = value
        .downcast_ref::<T>()
        .ok_or(FieldError::ValueType { expected: type_name::<T>() })?;
    value.decompose(sink)
}

fn recompose_boxed<T: Component + Decompose>(
    source: &mut FieldSource<'_>,
) -> Result<ErasedComponent, FieldError> {
    Ok(Box::new(T::recompose(source)?))
}

fn recompose_into<T: Component + Decompose>(
    source: &mut FieldSource<'_>,
    out: &mut dyn Any,
) -> Result<(), FieldError> {
    let slot = out
        .downcast_mut::<Option<T>>()
        .ok_or(FieldError::ValueType { expected: type_name::<T>() })?;
    *slot = Some(T::recompose(source)?);
    Ok(())
}

/// Runtime description of a registered component type.
#[derive(Clone, Debug)]
pub struct ComponentDesc {
    /// Assigned id.
    pub id: ComponentID,
    /// Rust type name.
    pub name: &'static str,
    /// Rust type id.
    pub type_id: TypeId,
    new_column: ColumnFactory,
    decomposition: Option<DecompositionFns>,
}

impl ComponentDesc {
    /// Builds an empty boxed column for this type.
    pub fn new_column(&self, capacity: usize) -> Box<dyn TypeErasedAttribute> {
        (self.new_column)(capacity)
    }

    /// Field accessors, if the type was registered as decomposable.
    pub fn decomposition(&self) -> Option<&DecompositionFns> {
        self.decomposition.as_ref()
    }
}

impl fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Per-world table of registered component types.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    descs: Vec<ComponentDesc>,
    by_type: HashMap<TypeId, ComponentID>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert<T: Component>(
        &mut self,
        decomposition: Option<DecompositionFns>,
    ) -> Result<ComponentID, StructuralError> {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            if decomposition.is_some() {
                self.descs[id as usize].decomposition = decomposition;
            }
            return Ok(id);
        }
        if self.descs.len() >= COMPONENT_CAP {
            return Err(StructuralError::ComponentCapacity { capacity: COMPONENT_CAP });
        }
        let id = self.descs.len() as ComponentID;
        self.descs.push(ComponentDesc {
            id,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            new_column: new_column::<T>,
            decomposition,
        });
        self.by_type.insert(TypeId::of::<T>(), id);
        Ok(id)
    }

    /// Registers `T` for boxed column storage.
    pub fn register<T: Component>(&mut self) -> Result<ComponentID, StructuralError> {
        self.insert::<T>(None)
    }

    /// Registers `T` together with its primitive field decomposition.
    pub fn register_decomposed<T: Component + Decompose>(
        &mut self,
    ) -> Result<ComponentID, StructuralError> {
        self.insert::<T>(Some(DecompositionFns {
            fields: T::FIELDS,
            decompose: decompose_erased::<T>,
            recompose_boxed: recompose_boxed::<T>,
            recompose_into: recompose_into::<T>,
        }))
    }

    /// Id of `T`, if registered.
    #[inline]
    pub fn id_of<T: 'static>(&self) -> Option<ComponentID> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Id of `T`, or an [`StructuralError::UnregisteredComponent`] error.
    #[inline]
    pub fn require<T: 'static>(&self) -> Result<ComponentID, StructuralError> {
        self.id_of::<T>()
            .ok_or(StructuralError::UnregisteredComponent { component: type_name::<T>() })
    }

    /// Id of the type with `type_id`, if registered.
    #[inline]
    pub fn id_of_type(&self, type_id: TypeId) -> Option<ComponentID> {
        self.by_type.get(&type_id).copied()
    }

    /// Description of `id`.
    #[inline]
    pub fn desc(&self, id: ComponentID) -> Option<&ComponentDesc> {
        self.descs.get(id as usize)
    }

    /// Type name of `id`, or `"<unregistered>"`.
    pub fn name_of(&self, id: ComponentID) -> &'static str {
        self.desc(id).map(|desc| desc.name).unwrap_or("<unregistered>")
    }

    /// Number of registered types.
    #[inline]
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Resolves the entries of a bundle into a component map.
    ///
    /// Fails on unregistered types and on types listed more than once.
    pub fn resolve(&self, bundle: Bundle) -> Result<ComponentMap, StructuralError> {
        let mut map = ComponentMap::new();
        for entry in bundle.entries {
            let id = self
                .id_of_type(entry.type_id)
                .ok_or(StructuralError::UnregisteredComponent { component: entry.name })?;
            if map.insert(id, entry.value).is_some() {
                return Err(StructuralError::DuplicateComponent { component: entry.name });
            }
        }
        Ok(map)
    }
}

/// One erased value inside a [`Bundle`].
pub struct BundleEntry {
    /// Rust type id of the value.
    pub type_id: TypeId,
    /// Rust type name of the value.
    pub name: &'static str,
    /// The value.
    pub value: ErasedComponent,
}

impl BundleEntry {
    /// Erases `value`.
    pub fn new<T: Component>(value: T) -> Self {
        Self { type_id: TypeId::of::<T>(), name: type_name::<T>(), value: Box::new(value) }
    }
}

impl fmt::Debug for BundleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Ordered list of component values used to spawn an entity.
#[derive(Debug, Default)]
pub struct Bundle {
    entries: Vec<BundleEntry>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a component value.
    #[inline]
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Appends a component value in place.
    #[inline]
    pub fn insert<T: Component>(&mut self, value: T) {
        self.entries.push(BundleEntry::new(value));
    }

    /// Appends an already erased entry.
    #[inline]
    pub fn push_entry(&mut self, entry: BundleEntry) {
        self.entries.push(entry);
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the bundle holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Conversion into a [`Bundle`].
pub trait IntoBundle {
    /// Performs the conversion.
    fn into_bundle(self) -> Bundle;
}

impl IntoBundle for Bundle {
    fn into_bundle(self) -> Bundle {
        self
    }
}

impl IntoBundle for () {
    fn into_bundle(self) -> Bundle {
        Bundle::new()
    }
}

macro_rules! tuple_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> IntoBundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_bundle(self) -> Bundle {
                let ($($name,)+) = self;
                let mut bundle = Bundle::new();
                $( bundle.insert($name); )+
                bundle
            }
        }
    };
}

tuple_bundle!(A);
tuple_bundle!(A, B);
tuple_bundle!(A, B, C);
tuple_bundle!(A, B, C, D);
tuple_bundle!(A, B, C, D, E);
tuple_bundle!(A, B, C, D, E, F);
tuple_bundle!(A, B, C, D, E, F, G);
tuple_bundle!(A, B, C, D, E, F, G, H);
