//! Core identifiers, component signatures and access declarations.
//!
//! This module defines the small value types shared by every other part of the
//! engine: numeric identifiers, the [`Signature`] bitset that describes a
//! composition, and the [`AccessSets`] declaration a system uses to tell the
//! scheduler which component types it touches.
//!
//! ## Signatures
//!
//! A composition is a *set* of component types. Its canonical form is the
//! sorted list of [`ComponentID`]s; [`Signature`] is the equivalent fixed-size
//! bitset of `u64` words. Two compositions are equal exactly when their
//! signatures are equal, so the world keys archetypes by signature and the
//! query cache keys entries by signature triples.
//!
//! Signatures:
//!
//! - are `Copy` and hash in O(words),
//! - support subset and disjointness tests with word-wise bit operations,
//! - iterate their members in ascending id order.
//!
//! ## Access Declarations
//!
//! [`AccessSets`] records three type-sets per system: the types it reads, the
//! types it writes, and the types it filters out. Two declarations conflict
//! when they write a common type, or when one writes a type the other reads.
//! Exclusion never causes a conflict, since an excluded type is never touched.
//!
//! Access sets are keyed by Rust [`TypeId`] rather than by [`ComponentID`],
//! so systems can be declared before any world exists.

use std::any::{type_name, TypeId};
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};


/// Identifier of a registered component type, assigned by the world's registry.
pub type ComponentID = u16;
/// Index of an archetype inside the world's archetype table.
pub type ArchetypeID = u32;
/// Dense position of an entity inside its archetype.
pub type SlotID = usize;
/// Index of a system inside a scheduler, in declaration order.
pub type SystemID = usize;

/// Maximum number of component types a single world can register.
pub const COMPONENT_CAP: usize = 256;
/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_WORDS: usize = (COMPONENT_CAP + 63) / 64;

/// Initial per-archetype slot capacity.
pub const DEFAULT_INITIAL_CAPACITY: usize = 16;
/// Multiplicative growth factor applied when an archetype runs out of slots.
pub const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

/// Bitset representing a set of component types.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Signature {
    words: [u64; SIGNATURE_WORDS],
}

impl Signature {
    /// Creates an empty signature.
    #[inline]
    pub const fn new() -> Self {
        Self { words: [0u64; SIGNATURE_WORDS] }
    }

    /// Builds a signature from a list of component ids. Duplicates are ignored.
    pub fn from_ids(component_ids: &[ComponentID]) -> Self {
        let mut signature = Self::new();
        for &component_id in component_ids {
            signature.set(component_id);
        }
        signature
    }

    #[inline]
    fn locate(component_id: ComponentID) -> (usize, u64) {
        let index = component_id as usize;
        (index / 64, 1u64 << (index % 64))
    }

    /// Sets the bit corresponding to `component_id`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let (word, bit) = Self::locate(component_id);
        self.words[word] |= bit;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let (word, bit) = Self::locate(component_id);
        self.words[word] &= !bit;
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let (word, bit) = Self::locate(component_id);
        self.words[word] & bit != 0
    }

    /// Returns `true` if every member of `other` is also a member of `self`.
    #[inline]
    pub fn contains_all(&self, other: &Signature) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(mine, theirs)| mine & theirs == *theirs)
    }

    /// Returns `true` if the two signatures share at least one member.
    #[inline]
    pub fn intersects(&self, other: &Signature) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(mine, theirs)| mine & theirs != 0)
    }

    /// Returns the union of both signatures.
    #[inline]
    pub fn union(&self, other: &Signature) -> Signature {
        let mut words = self.words;
        for (word, theirs) in words.iter_mut().zip(other.words.iter()) {
            *word |= theirs;
        }
        Signature { words }
    }

    /// Returns the members of `self` that are not in `other`.
    #[inline]
    pub fn difference(&self, other: &Signature) -> Signature {
        let mut words = self.words;
        for (word, theirs) in words.iter_mut().zip(other.words.iter()) {
            *word &= !theirs;
        }
        Signature { words }
    }

    /// Returns `true` if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Iterates over all component ids set in this signature, ascending.
    pub fn iter(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some((base + tz) as ComponentID)
                })
            })
    }

    /// Canonical sorted id list for this signature.
    pub fn to_ids(&self) -> Vec<ComponentID> {
        self.iter().collect()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Set of component types keyed by [`TypeId`], remembering type names for
/// diagnostics.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TypeSet {
    types: BTreeMap<TypeId, &'static str>,
}

impl TypeSet {
    /// Adds `T` to the set.
    pub fn insert<T: 'static>(&mut self) {
        self.types.insert(TypeId::of::<T>(), type_name::<T>());
    }

    /// Returns `true` if `T` is a member.
    pub fn contains<T: 'static>(&self) -> bool {
        self.types.contains_key(&TypeId::of::<T>())
    }

    /// Returns `true` if the type with `type_id` is a member.
    pub fn contains_id(&self, type_id: TypeId) -> bool {
        self.types.contains_key(&type_id)
    }

    /// Returns `true` if both sets share at least one type.
    pub fn intersects(&self, other: &TypeSet) -> bool {
        let (small, large) = if self.types.len() <= other.types.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.types.keys().any(|type_id| large.types.contains_key(type_id))
    }

    /// Number of member types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Names of the member types, in `TypeId` order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.values().copied()
    }
}

impl fmt::Debug for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Declares the component access of a system.
///
/// ## Conflict rule
/// Two declarations conflict when `W ∩ W`, `W ∩ R` or `R ∩ W` is non-empty.
/// The `exclude` set only narrows which entities a system visits and never
/// participates in conflict detection.
///
/// ## Example
/// ```
/// # use columnar_ecs::engine::types::AccessSets;
/// struct Velocity;
/// struct Position;
/// let integrate = AccessSets::new().read::<Velocity>().write::<Position>();
/// let render = AccessSets::new().read::<Position>();
/// assert!(integrate.conflicts_with(&render));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessSets {
    /// Components read by the system.
    pub read: TypeSet,
    /// Components written by the system.
    pub write: TypeSet,
    /// Components the system filters out.
    pub exclude: TypeSet,
}

impl AccessSets {
    /// Creates an empty declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares read-only access to `T`.
    pub fn read<T: 'static>(mut self) -> Self {
        self.read.insert::<T>();
        self
    }

    /// Declares mutable access to `T`.
    pub fn write<T: 'static>(mut self) -> Self {
        self.write.insert::<T>();
        self
    }

    /// Declares that `T` is filtered out.
    pub fn exclude<T: 'static>(mut self) -> Self {
        self.exclude.insert::<T>();
        self
    }

    /// Returns `true` if this access set conflicts with another.
    #[inline]
    pub fn conflicts_with(&self, other: &AccessSets) -> bool {
        self.write.intersects(&other.write)
            || self.write.intersects(&other.read)
            || self.read.intersects(&other.write)
    }
}
