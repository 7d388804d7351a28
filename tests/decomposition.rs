mod common;

use columnar_ecs::engine::primitive::{FieldSink, FieldSource};
use columnar_ecs::prelude::*;
use columnar_ecs::{DecompositionPolicy, FieldDesc, FieldError, PrimitiveKind, StructuralError};

use common::{init_tracing, Health, Inventory, Name, Position, Velocity};

#[derive(Clone, Debug, PartialEq)]
struct Everything {
    tiny: i8,
    short: i16,
    int: i32,
    long: i64,
    single: f32,
    double: f64,
    flag: bool,
    letter: char,
    text: String,
}
decomposable!(Everything {
    tiny: i8,
    short: i16,
    int: i32,
    long: i64,
    single: f32,
    double: f64,
    flag: bool,
    letter: char,
    text: String,
});

/// Declares two fields but only ever writes one.
#[derive(Clone, Debug, PartialEq)]
struct Truncated {
    a: i32,
    b: i32,
}

impl Decompose for Truncated {
    const FIELDS: &'static [FieldDesc] = &[
        FieldDesc { name: "a", kind: PrimitiveKind::I32 },
        FieldDesc { name: "b", kind: PrimitiveKind::I32 },
    ];

    fn decompose(&self, sink: &mut FieldSink<'_>) -> Result<(), FieldError> {
        sink.put(self.a)
    }

    fn recompose(source: &mut FieldSource<'_>) -> Result<Self, FieldError> {
        Ok(Self { a: source.take()?, b: source.take()? })
    }
}

/// Stores an `i32` but reads it back as an `i64`.
#[derive(Clone, Debug, PartialEq)]
struct Misread {
    v: i32,
}

impl Decompose for Misread {
    const FIELDS: &'static [FieldDesc] = &[FieldDesc { name: "v", kind: PrimitiveKind::I32 }];

    fn decompose(&self, sink: &mut FieldSink<'_>) -> Result<(), FieldError> {
        sink.put(self.v)
    }

    fn recompose(source: &mut FieldSource<'_>) -> Result<Self, FieldError> {
        let wide: i64 = source.take()?;
        Ok(Self { v: wide as i32 })
    }
}

fn decomposed_world() -> World {
    init_tracing();
    let mut world =
        World::with_config(WorldConfig::default().with_storage(StorageMode::Decomposed)).unwrap();
    world.register_decomposed::<Position>().unwrap();
    world.register_decomposed::<Velocity>().unwrap();
    world.register_decomposed::<Health>().unwrap();
    world.register_decomposed::<Name>().unwrap();
    world.register_decomposed::<Everything>().unwrap();
    world.register::<Inventory>().unwrap();
    world
}

fn sample(i: i64) -> Everything {
    Everything {
        tiny: -(i as i8),
        short: i as i16 * 100,
        int: i as i32 * -7,
        long: i * 1_000_000_007,
        single: i as f32 / 3.0,
        double: i as f64 * std::f64::consts::PI,
        flag: i % 2 == 0,
        letter: char::from_u32('a' as u32 + i as u32).unwrap(),
        text: format!("value #{i}"),
    }
}

#[test]
fn every_primitive_kind_round_trips() {
    let mut world = decomposed_world();
    let entities: Vec<Entity> = (0..20).map(|i| world.spawn((sample(i),)).unwrap()).collect();

    for (i, &e) in entities.iter().enumerate() {
        assert_eq!(world.get_component::<Everything>(e).unwrap(), sample(i as i64));
    }
}

#[test]
fn field_columns_are_laid_out_per_kind() {
    let mut world = decomposed_world();
    let e = world
        .spawn((Position { x: 1.0, y: 2.0 }, Velocity { dx: 3.0, dy: 4.0 }, Health { hp: 5 }))
        .unwrap();
    let archetype = world.archetype(world.archetype_of(e).unwrap()).unwrap();
    let capacity = archetype.capacity();

    let position = archetype.field_columns(world.component_id::<Position>().unwrap()).unwrap();
    let velocity = archetype.field_columns(world.component_id::<Velocity>().unwrap()).unwrap();
    let health = archetype.field_columns(world.component_id::<Health>().unwrap()).unwrap();

    let mut f32_ordinals: Vec<usize> =
        position.iter().chain(velocity.iter()).map(|column| column.ordinal).collect();
    f32_ordinals.sort_unstable();
    assert_eq!(f32_ordinals, vec![0, 1, 2, 3]);
    assert_eq!(health[0].kind, PrimitiveKind::I32);
    assert_eq!(health[0].offset(capacity), 0);
    assert_eq!(archetype.arrays().columns_of(PrimitiveKind::F32), 4);
    assert_eq!(archetype.arrays().array(PrimitiveKind::F32).len(), 4 * capacity);
}

#[test]
fn growth_relocates_every_column() {
    init_tracing();
    let mut world = World::with_config(
        WorldConfig::default()
            .with_storage(StorageMode::Decomposed)
            .with_initial_capacity(1)
            .with_growth_factor(2.0),
    )
    .unwrap();
    world.register_decomposed::<Position>().unwrap();
    world.register_decomposed::<Name>().unwrap();

    let entities: Vec<Entity> = (0..33)
        .map(|i| {
            world
                .spawn((Position { x: i as f32, y: 1.0 }, Name { label: format!("n{i}"), rank: i }))
                .unwrap()
        })
        .collect();

    let archetype = world.archetype(world.archetype_of(entities[0]).unwrap()).unwrap();
    assert_eq!(archetype.capacity(), 64);
    for (i, &e) in entities.iter().enumerate() {
        assert_eq!(world.get_component::<Position>(e).unwrap().x, i as f32);
        assert_eq!(world.get_component::<Name>(e).unwrap().label, format!("n{i}"));
    }
}

#[test]
fn non_decomposable_types_fall_back_to_boxed() {
    let mut world = decomposed_world();
    let e = world.spawn((Health { hp: 1 }, Inventory(vec![4, 5]))).unwrap();
    let archetype = world.archetype(world.archetype_of(e).unwrap()).unwrap();

    assert!(archetype.field_columns(world.component_id::<Health>().unwrap()).is_some());
    assert!(archetype.field_columns(world.component_id::<Inventory>().unwrap()).is_none());
    assert_eq!(world.get_component::<Inventory>(e).unwrap(), Inventory(vec![4, 5]));
}

#[test]
fn strict_policy_rejects_non_decomposable_types() {
    init_tracing();
    let mut world = World::with_config(
        WorldConfig::default()
            .with_storage(StorageMode::Decomposed)
            .with_decomposition(DecompositionPolicy::Reject),
    )
    .unwrap();
    world.register_decomposed::<Health>().unwrap();
    world.register::<Inventory>().unwrap();

    assert!(world.spawn((Health { hp: 1 },)).is_ok());
    let err = world.spawn((Health { hp: 1 }, Inventory(vec![]))).unwrap_err();
    assert!(matches!(err, ECSError::Structural(StructuralError::UnsupportedFieldShape { .. })));
    assert_eq!(world.len(), 1);
}

#[test]
fn incomplete_decomposition_leaves_archetype_consistent() {
    let mut world = decomposed_world();
    world.register_decomposed::<Truncated>().unwrap();

    let err = world.spawn((Truncated { a: 1, b: 2 }, Inventory(vec![9]))).unwrap_err();
    assert!(matches!(err, ECSError::Field(FieldError::Incomplete { written: 1, declared: 2, .. })));
    assert!(world.is_empty());

    let ok = world.spawn((Health { hp: 3 }, Inventory(vec![1]))).unwrap();
    assert_eq!(world.get_component::<Inventory>(ok).unwrap(), Inventory(vec![1]));
}

#[test]
fn failed_recompose_on_removal_leaves_archetype_consistent() {
    let mut world = decomposed_world();
    world.register_decomposed::<Misread>().unwrap();

    let a = world.spawn((Misread { v: 1 }, Inventory(vec![1]))).unwrap();
    let b = world.spawn((Misread { v: 2 }, Inventory(vec![2]))).unwrap();

    let err = world.destroy(a).unwrap_err();
    assert!(matches!(err, ECSError::Field(FieldError::KindMismatch { field: "v", .. })));

    assert_eq!(world.len(), 2);
    assert_eq!(world.get_component::<Inventory>(a).unwrap(), Inventory(vec![1]));
    assert_eq!(world.get_component::<Inventory>(b).unwrap(), Inventory(vec![2]));
    let archetype = world.archetype(world.archetype_of(b).unwrap()).unwrap();
    assert_eq!(archetype.len(), 2);
    assert_eq!(archetype.slot_of(a), Some(0));
    assert_eq!(archetype.slot_of(b), Some(1));
}

#[test]
fn migration_between_decomposed_archetypes_keeps_values() {
    let mut world = decomposed_world();
    let e = world.spawn((Name { label: "mover".into(), rank: 3 },)).unwrap();
    let other = world.spawn((Name { label: "stays".into(), rank: 4 },)).unwrap();

    world.add_component(e, Position { x: 7.0, y: 8.0 }).unwrap();
    world.add_component(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
    let velocity = world.remove_component::<Velocity>(e).unwrap();

    assert_eq!(velocity, Velocity { dx: 1.0, dy: 1.0 });
    assert_eq!(world.get_component::<Name>(e).unwrap(), Name { label: "mover".into(), rank: 3 });
    assert_eq!(world.get_component::<Position>(e).unwrap(), Position { x: 7.0, y: 8.0 });
    assert_eq!(world.get_component::<Name>(other).unwrap().label, "stays");
}
