//! Entity handles and the per-world entity allocator.
//!
//! An [`Entity`] is an `(id, generation)` pair. Ids are dense indices into the
//! allocator's tables; the generation distinguishes successive occupants of the
//! same id. Destroying an entity bumps the generation of its id and pushes the
//! id onto a free list, so a handle kept past destruction never aliases the
//! entity that later reuses the id.
//!
//! The allocator also records which archetype currently stores each live
//! entity. The slot inside that archetype is owned by the archetype itself.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::error::StructuralError;
use crate::engine::types::ArchetypeID;


/// Opaque handle identifying one simulated object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Entity {
    id: u32,
    generation: u32,
}

impl Entity {
    /// Builds a handle from raw parts.
    #[inline]
    pub const fn from_raw(id: u32, generation: u32) -> Self {
        Self { id, generation }
    }

    /// Dense id of the handle.
    #[inline]
    pub const fn id(self) -> u32 {
        self.id
    }

    /// Generation of the handle.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.generation)
    }
}

#[derive(Clone, Copy, Debug)]
struct Record {
    generation: u32,
    archetype: Option<ArchetypeID>,
}

/// Allocator issuing entity handles and tracking their archetype.
#[derive(Debug, Default)]
pub struct Entities {
    records: Vec<Record>,
    free: Vec<u32>,
    live: usize,
}

impl Entities {
    /// Creates an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new handle located in `archetype`. Retired ids are reused
    /// with their bumped generation.
    pub fn alloc(&mut self, archetype: ArchetypeID) -> Result<Entity, StructuralError> {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = u32::try_from(self.records.len())
                    .map_err(|_| StructuralError::EntityCapacity)?;
                self.records.push(Record { generation: 0, archetype: None });
                id
            }
        };
        let record = &mut self.records[id as usize];
        record.archetype = Some(archetype);
        self.live += 1;
        Ok(Entity::from_raw(id, record.generation))
    }

    /// Retires `entity`. Returns `false` if the handle was not live.
    pub fn free(&mut self, entity: Entity) -> bool {
        match self.records.get_mut(entity.id as usize) {
            Some(record) if record.generation == entity.generation && record.archetype.is_some() => {
                record.generation = record.generation.wrapping_add(1);
                record.archetype = None;
                self.free.push(entity.id);
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if `entity` refers to a live entity.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.archetype_of(entity).is_some()
    }

    /// Archetype currently storing `entity`, if the handle is live.
    #[inline]
    pub fn archetype_of(&self, entity: Entity) -> Option<ArchetypeID> {
        self.records
            .get(entity.id as usize)
            .filter(|record| record.generation == entity.generation)
            .and_then(|record| record.archetype)
    }

    /// Records that `entity` moved to `archetype`.
    pub fn relocate(&mut self, entity: Entity, archetype: ArchetypeID) -> Result<(), StructuralError> {
        match self.records.get_mut(entity.id as usize) {
            Some(record) if record.generation == entity.generation && record.archetype.is_some() => {
                record.archetype = Some(archetype);
                Ok(())
            }
            _ => Err(StructuralError::NoSuchEntity { entity }),
        }
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no entity is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
