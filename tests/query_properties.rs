mod common;

use std::collections::BTreeSet;

use proptest::prelude::*;

use columnar_ecs::engine::query::QueryFilter;
use columnar_ecs::engine::types::{ComponentID, Signature};
use columnar_ecs::prelude::*;
use columnar_ecs::{CachePolicy, InvalidationPolicy, MatchStrategy};

use common::{world, Frozen, Health, Position, Velocity};

fn id_set(max: ComponentID) -> impl Strategy<Value = BTreeSet<ComponentID>> {
    prop::collection::btree_set(0..max, 0..8)
}

proptest! {
    #[test]
    fn bitset_and_naive_matchers_agree(
        composition in id_set(64),
        include in id_set(64),
        exclude in id_set(64),
    ) {
        let composition: Vec<ComponentID> = composition.into_iter().collect();
        let include: Vec<ComponentID> = include.into_iter().collect();
        let exclude: Vec<ComponentID> = exclude.into_iter().collect();
        let filter = QueryFilter::new(&include, &exclude);

        let expected = include.iter().all(|id| composition.contains(id))
            && !exclude.iter().any(|id| composition.contains(id));

        prop_assert_eq!(filter.matches_bitset(&Signature::from_ids(&composition)), expected);
        prop_assert_eq!(filter.matches_naive(&composition), expected);
    }
}

#[derive(Clone, Debug)]
enum Op {
    Spawn { mask: u8 },
    Add { pick: usize, kind: u8 },
    Remove { pick: usize, kind: u8 },
    Destroy { pick: usize },
    Query { include: u8, exclude: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..16).prop_map(|mask| Op::Spawn { mask }),
        (any::<usize>(), 0u8..4).prop_map(|(pick, kind)| Op::Add { pick, kind }),
        (any::<usize>(), 0u8..4).prop_map(|(pick, kind)| Op::Remove { pick, kind }),
        any::<usize>().prop_map(|pick| Op::Destroy { pick }),
        (0u8..16, 0u8..16).prop_map(|(include, exclude)| Op::Query { include, exclude }),
    ]
}

fn ids_of(world: &World, mask: u8) -> Vec<ComponentID> {
    let all = [
        world.component_id::<Position>(),
        world.component_id::<Velocity>(),
        world.component_id::<Health>(),
        world.component_id::<Frozen>(),
    ];
    all.iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .filter_map(|(_, id)| *id)
        .collect()
}

fn add(world: &mut World, entity: Entity, kind: u8) -> ECSResult<()> {
    match kind {
        0 => world.add_component(entity, Position { x: 0.0, y: 0.0 }),
        1 => world.add_component(entity, Velocity { dx: 0.0, dy: 0.0 }),
        2 => world.add_component(entity, Health { hp: 1 }),
        _ => world.add_component(entity, Frozen),
    }
}

fn remove(world: &mut World, entity: Entity, kind: u8) -> ECSResult<()> {
    match kind {
        0 => world.remove_component::<Position>(entity).map(drop),
        1 => world.remove_component::<Velocity>(entity).map(drop),
        2 => world.remove_component::<Health>(entity).map(drop),
        _ => world.remove_component::<Frozen>(entity).map(drop),
    }
}

fn bundle(mask: u8) -> Bundle {
    let mut bundle = Bundle::new();
    if mask & 1 != 0 {
        bundle.insert(Position { x: 0.0, y: 0.0 });
    }
    if mask & 2 != 0 {
        bundle.insert(Velocity { dx: 0.0, dy: 0.0 });
    }
    if mask & 4 != 0 {
        bundle.insert(Health { hp: 1 });
    }
    if mask & 8 != 0 {
        bundle.insert(Frozen);
    }
    bundle
}

/// Replays `ops`, returning the sorted entity list of every query.
fn replay(config: WorldConfig, ops: &[Op]) -> Vec<Vec<Entity>> {
    let mut world = world(config);
    let mut live: Vec<Entity> = Vec::new();
    let mut answers = Vec::new();

    for op in ops {
        match *op {
            Op::Spawn { mask } => live.push(world.spawn(bundle(mask)).unwrap()),
            Op::Add { pick, kind } if !live.is_empty() => {
                let _ = add(&mut world, live[pick % live.len()], kind);
            }
            Op::Remove { pick, kind } if !live.is_empty() => {
                let _ = remove(&mut world, live[pick % live.len()], kind);
            }
            Op::Destroy { pick } if !live.is_empty() => {
                let entity = live.swap_remove(pick % live.len());
                world.destroy(entity).unwrap();
            }
            Op::Query { include, exclude } => {
                let mut found = world
                    .query()
                    .with_ids(&ids_of(&world, include))
                    .without_ids(&ids_of(&world, exclude))
                    .entities();
                found.sort_unstable();

                let mut expected: Vec<Entity> = live
                    .iter()
                    .copied()
                    .filter(|&e| {
                        let composition = world.composition(e).unwrap();
                        ids_of(&world, include).iter().all(|id| composition.contains(id))
                            && !ids_of(&world, exclude).iter().any(|id| composition.contains(id))
                    })
                    .collect();
                expected.sort_unstable();

                assert_eq!(found, expected);
                answers.push(found);
            }
            _ => {}
        }
    }
    answers
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cache_policies_are_transparent(ops in prop::collection::vec(op(), 1..60)) {
        let reference = replay(WorldConfig::default().with_cache(CachePolicy::Disabled), &ops);

        let variants = [
            WorldConfig::default(),
            WorldConfig::default().with_cache(CachePolicy::Bounded(2)),
            WorldConfig::default().with_invalidation(InvalidationPolicy::Incremental),
            WorldConfig::default()
                .with_matcher(MatchStrategy::Naive)
                .with_storage(StorageMode::Decomposed),
        ];
        for config in variants {
            prop_assert_eq!(&replay(config, &ops), &reference);
        }
    }
}
