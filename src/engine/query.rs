//! Query construction, archetype matching and typed iteration.
//!
//! A query selects the entities whose composition contains every type of an
//! inclusion set and none of an exclusion set. Because every entity of an
//! archetype shares its composition, matching is done per archetype, and the
//! matching archetype list is memoized by the world's query cache.
//!
//! ## Builder
//! ```ignore
//! let moving = world
//!     .query()
//!     .with::<Position>()
//!     .without::<Frozen>()
//!     .count();
//! ```
//! `with`/`without` are idempotent. Including a type that was never registered
//! makes the query match nothing; excluding one excludes nothing.
//!
//! ## Terminal operations
//! Terminal operations name the component types they touch (`for_each::<(A, B)>`,
//! `modify::<T>`). Those types are folded into the effective inclusion set, so
//! entities lacking them are skipped rather than faulted.
//!
//! ## Matching
//! Two matchers exist and always agree:
//! * [`MatchStrategy::Bitset`]: word-wise subset and disjointness tests on
//!   [`Signature`]s.
//! * [`MatchStrategy::Naive`]: merge walks over sorted id lists.
//!
//! ## Concurrency
//! Queries take `&World`. Readers hold column read locks and writers hold
//! column write locks for the duration of one archetype, so concurrent queries
//! on disjoint or read-only columns proceed in parallel, and an undeclared
//! overlap surfaces as [`AccessError::ColumnBusy`].

use std::any::{type_name, TypeId};
use std::sync::Arc;

use rayon::prelude::*;

use crate::engine::archetype::{Archetype, ComponentReader};
use crate::engine::cache::QueryKey;
use crate::engine::component::{Component, ComponentRegistry};
use crate::engine::config::MatchStrategy;
use crate::engine::entity::Entity;
use crate::engine::error::{AccessError, ECSResult};
use crate::engine::types::{ArchetypeID, ComponentID, Signature, SlotID};
use crate::engine::world::World;


/// Resolved inclusion/exclusion sets of a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFilter {
    key: QueryKey,
    required: Vec<ComponentID>,
    excluded: Vec<ComponentID>,
}

impl QueryFilter {
    /// Builds a filter from inclusion and exclusion id lists.
    pub fn new(include: &[ComponentID], exclude: &[ComponentID]) -> Self {
        Self::from_key(QueryKey {
            include: Signature::from_ids(include),
            exclude: Signature::from_ids(exclude),
            additional: Signature::new(),
        })
    }

    /// Builds a filter from a cache key.
    pub fn from_key(key: QueryKey) -> Self {
        Self {
            required: key.required().to_ids(),
            excluded: key.exclude.to_ids(),
            key,
        }
    }

    /// Cache key of the filter.
    #[inline]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Bitset matcher.
    #[inline]
    pub fn matches_bitset(&self, composition: &Signature) -> bool {
        self.key.matches(composition)
    }

    /// Sorted-set matcher. `composition` must be sorted ascending.
    pub fn matches_naive(&self, composition: &[ComponentID]) -> bool {
        sorted_subset(&self.required, composition) && sorted_disjoint(&self.excluded, composition)
    }

    /// Tests `archetype` with the chosen matcher.
    #[inline]
    pub fn matches(&self, strategy: MatchStrategy, archetype: &Archetype) -> bool {
        match strategy {
            MatchStrategy::Bitset => self.matches_bitset(archetype.signature()),
            MatchStrategy::Naive => self.matches_naive(archetype.composition()),
        }
    }
}

fn sorted_subset(needles: &[ComponentID], haystack: &[ComponentID]) -> bool {
    let mut rest = haystack.iter();
    needles.iter().all(|needle| rest.by_ref().any(|candidate| candidate == needle))
}

fn sorted_disjoint(left: &[ComponentID], right: &[ComponentID]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => return false,
        }
    }
    true
}

/// A tuple of component types fetched together by a query.
///
/// Implemented for tuples `(A,)` through `(A, B, C, D, E, F)`. Items are
/// clones of the stored values.
pub trait QueryData: 'static {
    /// Column readers held while one archetype is visited.
    type Readers<'w>: Sync
    where
        Self: 'w;

    /// Values handed to the callback for one entity.
    type Item: Send;

    /// Rust type ids of the members.
    fn type_ids() -> Vec<TypeId>;

    /// Registered ids of the members, `None` if one is unregistered.
    fn component_ids(registry: &ComponentRegistry) -> Option<Vec<ComponentID>>;

    /// Opens a reader per member on `archetype`. `ids` comes from
    /// [`QueryData::component_ids`].
    fn readers<'w>(archetype: &'w Archetype, ids: &[ComponentID]) -> ECSResult<Self::Readers<'w>>;

    /// Reads the members at `slot`.
    fn fetch(readers: &Self::Readers<'_>, slot: SlotID) -> ECSResult<Self::Item>;
}

macro_rules! query_tuple {
    ($(($name:ident, $idx:tt)),+) => {
        impl<$($name: Component),+> QueryData for ($($name,)+) {
            type Readers<'w> = ($(ComponentReader<'w, $name>,)+)
            where
                Self: 'w;

            type Item = ($($name,)+);

            fn type_ids() -> Vec<TypeId> {
                vec![$(TypeId::of::<$name>()),+]
            }

            fn component_ids(registry: &ComponentRegistry) -> Option<Vec<ComponentID>> {
                Some(vec![$(registry.id_of::<$name>()?),+])
            }

            fn readers<'w>(
                archetype: &'w Archetype,
                ids: &[ComponentID],
            ) -> ECSResult<Self::Readers<'w>> {
                Ok(($(archetype.reader::<$name>(ids[$idx])?,)+))
            }

            fn fetch(readers: &Self::Readers<'_>, slot: SlotID) -> ECSResult<Self::Item> {
                Ok(($(readers.$idx.get(slot)?,)+))
            }
        }
    };
}

query_tuple!((A, 0));
query_tuple!((A, 0), (B, 1));
query_tuple!((A, 0), (B, 1), (C, 2));
query_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
query_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
query_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));

/// Builder and executor of queries over a [`World`].
///
/// The builder is cheap and `Clone`; terminal operations borrow it, so one
/// built query may be executed repeatedly.
#[derive(Clone)]
pub struct QueryBuilder<'w> {
    world: &'w World,
    include: Signature,
    exclude: Signature,
    unsatisfiable: bool,
}

impl<'w> QueryBuilder<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self { world, include: Signature::new(), exclude: Signature::new(), unsatisfiable: false }
    }

    /// Requires `T`.
    pub fn with<T: 'static>(mut self) -> Self {
        match self.world.registry().id_of::<T>() {
            Some(id) => self.include.set(id),
            None => self.unsatisfiable = true,
        }
        self
    }

    /// Rejects entities carrying `T`.
    pub fn without<T: 'static>(mut self) -> Self {
        if let Some(id) = self.world.registry().id_of::<T>() {
            self.exclude.set(id);
        }
        self
    }

    /// Requires every id in `ids`.
    pub fn with_ids(mut self, ids: &[ComponentID]) -> Self {
        for &id in ids {
            self.include.set(id);
        }
        self
    }

    /// Rejects entities carrying any id in `ids`.
    pub fn without_ids(mut self, ids: &[ComponentID]) -> Self {
        for &id in ids {
            self.exclude.set(id);
        }
        self
    }

    /// Filter for a terminal operation touching `touched`.
    fn filter(&self, touched: &[ComponentID]) -> Option<QueryFilter> {
        if self.unsatisfiable {
            return None;
        }
        let additional = Signature::from_ids(touched).difference(&self.include);
        Some(QueryFilter::from_key(QueryKey {
            include: self.include,
            exclude: self.exclude,
            additional,
        }))
    }

    fn archetypes_for(&self, touched: &[ComponentID]) -> Arc<[ArchetypeID]> {
        match self.filter(touched) {
            Some(filter) => self.world.matching_archetypes(&filter),
            None => Arc::from(Vec::new()),
        }
    }

    fn visit(&self, archetypes: &[ArchetypeID]) -> Vec<&'w Archetype> {
        archetypes.iter().filter_map(|&id| self.world.archetype(id)).collect()
    }

    /// Ids of the matching archetypes.
    pub fn archetypes(&self) -> Arc<[ArchetypeID]> {
        self.archetypes_for(&[])
    }

    /// Matching entities, archetype by archetype in dense order.
    pub fn entities(&self) -> Vec<Entity> {
        let archetypes = self.archetypes();
        self.visit(&archetypes)
            .into_iter()
            .flat_map(|archetype| archetype.entities().iter().copied())
            .collect()
    }

    /// Number of matching entities.
    pub fn count(&self) -> usize {
        let archetypes = self.archetypes();
        self.visit(&archetypes).into_iter().map(Archetype::len).sum()
    }

    /// Returns `true` if at least one entity matches.
    pub fn any(&self) -> bool {
        let archetypes = self.archetypes();
        self.visit(&archetypes).into_iter().any(|archetype| !archetype.is_empty())
    }

    /// Calls `f` with every matching entity and its `Q` values.
    pub fn for_each<Q: QueryData>(&self, mut f: impl FnMut(Entity, Q::Item)) -> ECSResult<()> {
        let Some(ids) = Q::component_ids(self.world.registry()) else {
            return Ok(());
        };
        let archetypes = self.archetypes_for(&ids);
        for archetype in self.visit(&archetypes) {
            let readers = Q::readers(archetype, &ids)?;
            for (slot, &entity) in archetype.entities().iter().enumerate() {
                f(entity, Q::fetch(&readers, slot)?);
            }
        }
        Ok(())
    }

    /// Like [`QueryBuilder::for_each`], visiting the entities of each
    /// archetype in parallel on the rayon pool.
    pub fn par_for_each<Q: QueryData>(
        &self,
        f: impl Fn(Entity, Q::Item) + Send + Sync,
    ) -> ECSResult<()> {
        let Some(ids) = Q::component_ids(self.world.registry()) else {
            return Ok(());
        };
        let archetypes = self.archetypes_for(&ids);
        for archetype in self.visit(&archetypes) {
            let readers = Q::readers(archetype, &ids)?;
            archetype
                .entities()
                .par_iter()
                .enumerate()
                .try_for_each(|(slot, &entity)| -> ECSResult<()> {
                    f(entity, Q::fetch(&readers, slot)?);
                    Ok(())
                })?;
        }
        Ok(())
    }

    /// Collects every matching entity with clones of its `Q` values.
    pub fn results<Q: QueryData>(&self) -> ECSResult<Vec<(Entity, Q::Item)>> {
        let mut out = Vec::new();
        self.for_each::<Q>(|entity, item| out.push((entity, item)))?;
        Ok(out)
    }

    /// Applies `f` to the `T` value of every matching entity. Returns the
    /// number of values visited.
    pub fn modify<T: Component>(&self, mut f: impl FnMut(&mut T)) -> ECSResult<usize> {
        self.modify_if::<T>(|_| true, |value| f(value))
    }

    /// Applies `f` to the `T` values for which `predicate` holds. Returns the
    /// number of values modified.
    pub fn modify_if<T: Component>(
        &self,
        mut predicate: impl FnMut(&T) -> bool,
        mut f: impl FnMut(&mut T),
    ) -> ECSResult<usize> {
        let Some(id) = self.world.registry().id_of::<T>() else {
            return Ok(0);
        };
        let archetypes = self.archetypes_for(&[id]);
        let mut modified = 0;
        for archetype in self.visit(&archetypes) {
            let mut writer = archetype.writer::<T>(id)?;
            for slot in 0..writer.len() {
                let hit = writer.update(slot, |value| {
                    let hit = predicate(value);
                    if hit {
                        f(value);
                    }
                    hit
                })?;
                modified += usize::from(hit);
            }
        }
        Ok(modified)
    }

    /// Transforms the `T` value of every matching entity using the entity's
    /// `Q` values as read-only input.
    ///
    /// Fails with [`AccessError::ReadWriteOverlap`] if `Q` contains `T`.
    pub fn modify_with<Q: QueryData, T: Component>(
        &self,
        mut f: impl FnMut(Entity, Q::Item, &mut T),
    ) -> ECSResult<usize> {
        if Q::type_ids().contains(&TypeId::of::<T>()) {
            return Err(AccessError::ReadWriteOverlap { component: type_name::<T>() }.into());
        }
        let registry = self.world.registry();
        let (Some(read_ids), Some(write_id)) = (Q::component_ids(registry), registry.id_of::<T>())
        else {
            return Ok(0);
        };
        let mut touched = read_ids.clone();
        touched.push(write_id);

        let archetypes = self.archetypes_for(&touched);
        let mut modified = 0;
        for archetype in self.visit(&archetypes) {
            let readers = Q::readers(archetype, &read_ids)?;
            let mut writer = archetype.writer::<T>(write_id)?;
            for (slot, &entity) in archetype.entities().iter().enumerate() {
                let item = Q::fetch(&readers, slot)?;
                writer.update(slot, |value| f(entity, item, value))?;
                modified += 1;
            }
        }
        Ok(modified)
    }
}
