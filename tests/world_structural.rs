mod common;

use columnar_ecs::prelude::*;
use columnar_ecs::{StructuralError, WorldConfig};

use common::{storage_configs, world, Frozen, Health, Inventory, Name, Position, Velocity};

fn structural(err: ECSError) -> StructuralError {
    match err {
        ECSError::Structural(inner) => inner,
        other => panic!("expected a structural error, got {other:?}"),
    }
}

#[test]
fn add_component_extends_composition() {
    for config in storage_configs() {
        let mut world = world(config);
        let e = world.spawn((Position { x: 1.0, y: 2.0 },)).unwrap();
        let before = world.composition(e).unwrap();

        world.add_component(e, Velocity { dx: 3.0, dy: 4.0 }).unwrap();

        assert_eq!(world.get_component::<Velocity>(e).unwrap(), Velocity { dx: 3.0, dy: 4.0 });
        assert_eq!(world.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });

        let mut expected = before;
        expected.push(world.component_id::<Velocity>().unwrap());
        expected.sort_unstable();
        assert_eq!(world.composition(e).unwrap(), expected);
    }
}

#[test]
fn remove_component_returns_value_and_keeps_others() {
    for config in storage_configs() {
        let mut world = world(config);
        let e = world
            .spawn((Position { x: 1.0, y: 1.0 }, Inventory(vec![1, 2, 3])))
            .unwrap();

        let inventory = world.remove_component::<Inventory>(e).unwrap();
        assert_eq!(inventory, Inventory(vec![1, 2, 3]));
        assert!(!world.has_component::<Inventory>(e).unwrap());
        assert_eq!(world.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 1.0 });
    }
}

#[test]
fn removing_last_component_keeps_entity_alive() {
    let mut world = world(WorldConfig::default());
    let e = world.spawn((Health { hp: 5 },)).unwrap();
    world.remove_component::<Health>(e).unwrap();

    assert!(world.contains(e));
    assert!(world.composition(e).unwrap().is_empty());
    world.add_component(e, Health { hp: 6 }).unwrap();
    assert_eq!(world.get_component::<Health>(e).unwrap().hp, 6);
}

#[test]
fn structural_misuse_is_reported() {
    let mut world = world(WorldConfig::default());
    let e = world.spawn((Health { hp: 1 },)).unwrap();

    assert!(matches!(
        structural(world.spawn((Health { hp: 1 }, Health { hp: 2 })).unwrap_err()),
        StructuralError::DuplicateComponent { .. }
    ));
    assert!(matches!(
        structural(world.add_component(e, Health { hp: 2 }).unwrap_err()),
        StructuralError::ComponentAlreadyPresent { .. }
    ));
    assert!(matches!(
        structural(world.remove_component::<Velocity>(e).unwrap_err()),
        StructuralError::MissingComponent { .. }
    ));
    assert!(matches!(
        structural(world.get_component::<Position>(e).unwrap_err()),
        StructuralError::MissingComponent { .. }
    ));

    #[derive(Clone)]
    struct Unregistered;
    assert!(matches!(
        structural(world.spawn((Unregistered,)).unwrap_err()),
        StructuralError::UnregisteredComponent { .. }
    ));

    world.destroy(e).unwrap();
    assert!(matches!(
        structural(world.get_component::<Health>(e).unwrap_err()),
        StructuralError::NoSuchEntity { .. }
    ));
    assert!(matches!(
        structural(world.destroy(e).unwrap_err()),
        StructuralError::NoSuchEntity { .. }
    ));
}

#[test]
fn stale_handles_do_not_alias_reused_ids() {
    let mut world = world(WorldConfig::default());
    let old = world.spawn((Health { hp: 1 },)).unwrap();
    world.destroy(old).unwrap();
    let new = world.spawn((Health { hp: 2 },)).unwrap();

    assert_eq!(old.id(), new.id());
    assert_ne!(old, new);
    assert!(!world.contains(old));
    assert_eq!(world.get_component::<Health>(new).unwrap().hp, 2);
}

#[test]
fn swap_remove_preserves_remaining_values() {
    for config in storage_configs() {
        let mut world = world(config);
        let entities: Vec<Entity> = (0..10)
            .map(|i| {
                world
                    .spawn((
                        Position { x: i as f32, y: -(i as f32) },
                        Name { label: format!("agent-{i}"), rank: i },
                    ))
                    .unwrap()
            })
            .collect();
        let archetype = world.archetype_of(entities[0]).unwrap();

        world.destroy(entities[3]).unwrap();

        assert_eq!(world.archetype(archetype).unwrap().len(), 9);
        for (i, &e) in entities.iter().enumerate().filter(|(i, _)| *i != 3) {
            assert_eq!(world.get_component::<Position>(e).unwrap().x, i as f32);
            assert_eq!(world.get_component::<Name>(e).unwrap().label, format!("agent-{i}"));
        }
        assert_eq!(
            world.archetype(archetype).unwrap().slot_of(entities[9]),
            Some(3),
            "last entity fills the hole"
        );
    }
}

#[test]
fn archetypes_are_keyed_by_composition() {
    let mut world = world(WorldConfig::default());
    world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { dx: 0.0, dy: 0.0 })).unwrap();
    world.spawn((Velocity { dx: 0.0, dy: 0.0 }, Position { x: 0.0, y: 0.0 })).unwrap();
    world.spawn((Position { x: 0.0, y: 0.0 },)).unwrap();
    let e = world.spawn((Position { x: 0.0, y: 0.0 },)).unwrap();
    assert_eq!(world.archetype_count(), 2);

    world.add_component(e, Velocity { dx: 0.0, dy: 0.0 }).unwrap();
    assert_eq!(world.archetype_count(), 2);

    world.add_component(e, Frozen).unwrap();
    assert_eq!(world.archetype_count(), 3);
}

#[test]
fn set_component_overwrites_in_place() {
    for config in storage_configs() {
        let mut world = world(config);
        let e = world.spawn((Name { label: "a".into(), rank: 1 }, Frozen)).unwrap();
        let archetype = world.archetype_of(e);

        world.set_component(e, Name { label: "b".into(), rank: 2 }).unwrap();

        assert_eq!(world.get_component::<Name>(e).unwrap(), Name { label: "b".into(), rank: 2 });
        assert_eq!(world.archetype_of(e), archetype);
    }
}

#[test]
fn storage_grows_past_initial_capacity() {
    for config in storage_configs() {
        let mut world = world(config.with_initial_capacity(2).with_growth_factor(1.5));
        let entities: Vec<Entity> = (0..50)
            .map(|i| world.spawn((Health { hp: i }, Position { x: i as f32, y: 0.0 })).unwrap())
            .collect();

        for (i, &e) in entities.iter().enumerate() {
            assert_eq!(world.get_component::<Health>(e).unwrap().hp, i as i32);
            assert_eq!(world.get_component::<Position>(e).unwrap().x, i as f32);
        }
        let archetype = world.archetype(world.archetype_of(entities[0]).unwrap()).unwrap();
        assert!(archetype.capacity() >= 50);
    }
}

#[test]
fn invalid_configuration_is_rejected() {
    assert!(World::with_config(WorldConfig::default().with_growth_factor(1.0)).is_err());
    assert!(World::with_config(WorldConfig::default().with_initial_capacity(0)).is_err());
}

#[test]
fn spawn_batch_uses_factories() {
    let mut world = world(WorldConfig::default().with_storage(StorageMode::Decomposed));
    let agents = world
        .spawn_batch(64)
        .with(|i| Health { hp: i as i32 })
        .with(|i| Position { x: i as f32 * 0.5, y: 0.0 })
        .spawn()
        .unwrap();

    assert_eq!(agents.len(), 64);
    assert_eq!(world.len(), 64);
    assert_eq!(world.archetype_count(), 1);
    assert_eq!(world.get_component::<Position>(agents[10]).unwrap().x, 5.0);
}

#[test]
fn deferred_commands_apply_in_order_and_report_first_failure() {
    let mut world = world(WorldConfig::default());
    let e = world.spawn((Health { hp: 1 },)).unwrap();

    world.defer(Command::add(e, Frozen));
    world.defer(Command::add(e, Frozen));
    world.defer(Command::spawn((Health { hp: 9 },)));
    world.defer(Command::remove::<Health>(e));
    assert_eq!(world.pending_commands(), 4);

    let err = world.apply_deferred_commands().unwrap_err();
    assert!(matches!(structural(err), StructuralError::ComponentAlreadyPresent { .. }));

    assert_eq!(world.pending_commands(), 0);
    assert_eq!(world.len(), 2);
    assert!(world.has_component::<Frozen>(e).unwrap());
    assert!(!world.has_component::<Health>(e).unwrap());
}
