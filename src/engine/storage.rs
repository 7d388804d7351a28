//! Dense attribute columns and their type-erased interface.
//!
//! [`Attribute<T>`] is the boxed-storage column: a contiguous `Vec<T>` holding
//! one value per archetype slot. Slot `i` of every column of an archetype
//! belongs to the same entity, so columns must be mutated in lock step by the
//! owning archetype.
//!
//! # Core operations
//!
//! - **Append**: `push` writes at slot `len`.
//! - **Remove**: `swap_remove` deletes a slot in `O(1)` by moving the last
//!   value into it. Dense packing is preserved; order is not.
//!
//! # Type erasure
//!
//! Archetypes hold columns as `Box<dyn TypeErasedAttribute>`. The erased
//! interface moves values as [`ErasedComponent`] boxes and exposes `as_any`
//! for downcasting back to `Attribute<T>` on typed access paths.

use std::any::{type_name, Any, TypeId};

use crate::engine::component::{Component, ErasedComponent};
use crate::engine::error::{AccessError, FieldError};


/// Dense column of component values.
#[derive(Debug, Clone)]
pub struct Attribute<T> {
    values: Vec<T>,
}

impl<T> Default for Attribute<T> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T> Attribute<T> {
    /// Creates an empty column with room for `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { values: Vec::with_capacity(capacity) }
    }

    /// Number of stored values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the column is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Appends a value.
    #[inline]
    pub fn push(&mut self, value: T) {
        self.values.push(value);
    }

    /// Removes slot `slot`, moving the last value into it.
    #[inline]
    pub fn swap_remove(&mut self, slot: usize) -> Option<T> {
        (slot < self.values.len()).then(|| self.values.swap_remove(slot))
    }

    /// Value at `slot`.
    #[inline]
    pub fn get(&self, slot: usize) -> Option<&T> {
        self.values.get(slot)
    }

    /// Mutable value at `slot`.
    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.values.get_mut(slot)
    }

    /// All values, in slot order.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// All values, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Reserves room for at least `capacity` values in total.
    pub fn reserve_total(&mut self, capacity: usize) {
        if capacity > self.values.len() {
            self.values.reserve(capacity - self.values.len());
        }
    }
}

/// Type-erased view of an [`Attribute<T>`].
pub trait TypeErasedAttribute: Any + Send + Sync {
    /// Number of stored values.
    fn len(&self) -> usize;

    /// Returns `true` if the column is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;

    /// Name of the element type.
    fn element_type_name(&self) -> &'static str;

    /// Upcast for typed downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Appends an erased value. Fails without modifying the column if the
    /// value has another type.
    fn push_dyn(&mut self, value: ErasedComponent) -> Result<(), FieldError>;

    /// Swap-removes slot `slot`, returning its value.
    fn swap_remove_dyn(&mut self, slot: usize) -> Result<ErasedComponent, AccessError>;

    /// Clones the value at `slot` into a box.
    fn clone_dyn(&self, slot: usize) -> Result<ErasedComponent, AccessError>;

    /// Reserves room for at least `capacity` values in total.
    fn reserve_total(&mut self, capacity: usize);
}

impl<T: Component> TypeErasedAttribute for Attribute<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn element_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn push_dyn(&mut self, value: ErasedComponent) -> Result<(), FieldError> {
        let value = value
            .downcast::<T>()
            .map_err(|_| FieldError::ValueType { expected: type_name::<T>() })?;
        self.values.push(*value);
        Ok(())
    }

    fn swap_remove_dyn(&mut self, slot: usize) -> Result<ErasedComponent, AccessError> {
        let len = self.values.len();
        self.swap_remove(slot)
            .map(|value| Box::new(value) as ErasedComponent)
            .ok_or(AccessError::SlotOutOfBounds { slot, len })
    }

    fn clone_dyn(&self, slot: usize) -> Result<ErasedComponent, AccessError> {
        self.values
            .get(slot)
            .map(|value| Box::new(value.clone()) as ErasedComponent)
            .ok_or(AccessError::SlotOutOfBounds { slot, len: self.values.len() })
    }

    fn reserve_total(&mut self, capacity: usize) {
        Attribute::reserve_total(self, capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_remove_moves_last_into_hole() {
        let mut column = Attribute::with_capacity(4);
        for v in [10, 20, 30, 40] {
            column.push(v);
        }
        assert_eq!(column.swap_remove(1), Some(20));
        assert_eq!(column.as_slice(), &[10, 40, 30]);
        assert_eq!(column.swap_remove(7), None);
    }

    #[test]
    fn erased_push_rejects_foreign_types() {
        let mut column: Box<dyn TypeErasedAttribute> = Box::new(Attribute::<u8>::default());
        assert!(column.push_dyn(Box::new(5u8)).is_ok());
        assert!(column.push_dyn(Box::new("text")).is_err());
        assert_eq!(column.len(), 1);

        let removed = column.swap_remove_dyn(0).unwrap();
        assert_eq!(removed.downcast_ref::<u8>(), Some(&5));
        assert!(matches!(
            column.swap_remove_dyn(0),
            Err(AccessError::SlotOutOfBounds { slot: 0, len: 0 })
        ));
    }
}
