mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use columnar_ecs::prelude::*;
use columnar_ecs::{AccessError, InvalidationPolicy, MatchStrategy};

use common::{storage_configs, world, Frozen, Health, Inventory, Name, Position, Velocity};

fn p(x: f32) -> Position {
    Position { x, y: 0.0 }
}

fn v(dx: f32) -> Velocity {
    Velocity { dx, dy: 0.0 }
}

#[test]
fn with_without_selects_expected_compositions() {
    for config in storage_configs() {
        for matcher in [MatchStrategy::Bitset, MatchStrategy::Naive] {
            let mut world = world(config.clone().with_matcher(matcher));
            let only_p = world.spawn((p(1.0),)).unwrap();
            let p_v = world.spawn((p(2.0), v(1.0))).unwrap();
            let _p_v_h = world.spawn((p(3.0), v(1.0), Health { hp: 10 })).unwrap();

            let found: BTreeSet<Entity> =
                world.query().with::<Position>().without::<Health>().entities().into_iter().collect();
            assert_eq!(found, BTreeSet::from([only_p, p_v]), "{matcher:?}");
        }
    }
}

#[test]
fn duplicate_filters_are_idempotent() {
    let mut world = world(WorldConfig::default());
    world.spawn((p(1.0), v(1.0))).unwrap();
    world.spawn((p(1.0), Frozen)).unwrap();

    let once = world.query().with::<Position>().without::<Frozen>().count();
    let twice = world
        .query()
        .with::<Position>()
        .with::<Position>()
        .without::<Frozen>()
        .without::<Frozen>()
        .count();
    assert_eq!(once, 1);
    assert_eq!(once, twice);
}

#[test]
fn unregistered_types_include_nothing_and_exclude_nothing() {
    #[derive(Clone)]
    struct Ghost;

    let mut world = world(WorldConfig::default());
    world.spawn((p(1.0),)).unwrap();

    assert_eq!(world.query().with::<Ghost>().count(), 0);
    assert!(!world.query().with::<Ghost>().any());
    assert_eq!(world.query().without::<Ghost>().count(), 1);
}

#[test]
fn terminal_types_are_required_not_faulted() {
    for config in storage_configs() {
        let mut world = world(config);
        world.spawn((p(1.0),)).unwrap();
        world.spawn((p(2.0), v(10.0))).unwrap();

        let rows = world.query().results::<(Position, Velocity)>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, (p(2.0), v(10.0)));

        let visited = world.query().modify::<Velocity>(|vel| vel.dx *= 2.0).unwrap();
        assert_eq!(visited, 1);
        assert_eq!(world.query().results::<(Velocity,)>().unwrap()[0].1 .0.dx, 20.0);
    }
}

#[test]
fn modify_with_reads_inputs_and_writes_target() {
    for config in storage_configs() {
        let mut world = world(config);
        let entities: Vec<Entity> =
            (0..20).map(|i| world.spawn((p(i as f32), v(1.5))).unwrap()).collect();
        world.spawn((p(100.0),)).unwrap();

        let moved = world
            .query()
            .modify_with::<(Velocity,), Position>(|_, (vel,), pos| pos.x += vel.dx)
            .unwrap();
        assert_eq!(moved, 20);
        for (i, &e) in entities.iter().enumerate() {
            assert_eq!(world.get_component::<Position>(e).unwrap().x, i as f32 + 1.5);
        }
    }
}

#[test]
fn modify_with_rejects_overlapping_access() {
    let mut world = world(WorldConfig::default());
    world.spawn((p(1.0),)).unwrap();

    let err = world
        .query()
        .modify_with::<(Position,), Position>(|_, _, _| {})
        .unwrap_err();
    assert!(matches!(err, ECSError::Access(AccessError::ReadWriteOverlap { .. })));
}

#[test]
fn modify_if_counts_only_hits() {
    let mut world = world(WorldConfig::default().with_storage(StorageMode::Decomposed));
    for hp in [0, 5, 0, 7] {
        world.spawn((Health { hp },)).unwrap();
    }
    let revived = world.query().modify_if::<Health>(|h| h.hp == 0, |h| h.hp = 1).unwrap();
    assert_eq!(revived, 2);
    assert_eq!(world.query().modify_if::<Health>(|h| h.hp == 0, |_| {}).unwrap(), 0);
}

#[test]
fn strings_round_trip_through_queries() {
    for config in storage_configs() {
        let mut world = world(config);
        world.spawn((Name { label: "alpha".into(), rank: 1 }, Inventory(vec![7]))).unwrap();

        world.query().modify::<Name>(|name| name.label.push_str("-prime")).unwrap();

        let rows = world.query().results::<(Name, Inventory)>().unwrap();
        assert_eq!(rows[0].1 .0.label, "alpha-prime");
        assert_eq!(rows[0].1 .1, Inventory(vec![7]));
    }
}

#[test]
fn par_for_each_visits_every_match() {
    for config in storage_configs() {
        let mut world = world(config);
        world.spawn_batch(500).with(|i| Health { hp: i as i32 }).spawn().unwrap();
        world.spawn_batch(300).with(|i| Health { hp: i as i32 }).with(|_| Frozen).spawn().unwrap();

        let seen = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);
        world
            .query()
            .without::<Frozen>()
            .par_for_each::<(Health,)>(|_, (health,)| {
                seen.fetch_add(1, Ordering::Relaxed);
                total.fetch_add(health.hp as usize, Ordering::Relaxed);
            })
            .unwrap();

        assert_eq!(seen.into_inner(), 500);
        assert_eq!(total.into_inner(), (0..500).sum::<usize>());
    }
}

#[test]
fn cache_serves_repeated_queries_and_clears_on_new_archetypes() {
    let mut world = world(WorldConfig::default());
    world.spawn((p(1.0),)).unwrap();

    assert_eq!(world.query().with::<Position>().count(), 1);
    assert_eq!(world.query().with::<Position>().count(), 1);
    let stats = world.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);

    world.spawn((p(2.0), v(0.0))).unwrap();
    assert_eq!(world.cache_stats().entries, 0);
    assert_eq!(world.query().with::<Position>().count(), 2);
}

#[test]
fn incremental_invalidation_matches_clearing() {
    let mut clear = world(WorldConfig::default());
    let mut incremental =
        world(WorldConfig::default().with_invalidation(InvalidationPolicy::Incremental));

    for world in [&mut clear, &mut incremental] {
        world.spawn((p(1.0),)).unwrap();
        assert_eq!(world.query().with::<Position>().without::<Frozen>().count(), 1);
        world.spawn((p(1.0), v(1.0))).unwrap();
        world.spawn((p(1.0), Frozen)).unwrap();
    }

    for world in [&clear, &incremental] {
        assert_eq!(world.query().with::<Position>().without::<Frozen>().count(), 2);
    }
    assert!(incremental.cache_stats().hits >= 1);
}

#[test]
fn writer_on_busy_column_fails_fast() {
    let mut world = world(WorldConfig::default());
    world.spawn((Inventory(vec![1]),)).unwrap();

    let result = world.query().for_each::<(Inventory,)>(|_, _| {
        let nested = world.query().modify::<Inventory>(|inv| inv.0.push(2));
        assert!(matches!(nested, Err(ECSError::Access(AccessError::ColumnBusy { .. }))));
    });
    assert!(result.is_ok());
}
