//! Components and helpers shared by the integration tests.

#![allow(dead_code)]

use columnar_ecs::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
decomposable!(Position { x: f32, y: f32 });

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}
decomposable!(Velocity { dx: f32, dy: f32 });

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Health {
    pub hp: i32,
}
decomposable!(Health { hp: i32 });

#[derive(Clone, Debug, PartialEq)]
pub struct Name {
    pub label: String,
    pub rank: i64,
}
decomposable!(Name { label: String, rank: i64 });

#[derive(Clone, Debug, PartialEq)]
pub struct Inventory(pub Vec<u32>);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frozen;

/// Routes engine logs to the test harness. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// World with every shared component registered.
///
/// `Position`, `Velocity`, `Health` and `Name` carry decompositions;
/// `Inventory` and `Frozen` are always boxed.
pub fn world(config: WorldConfig) -> World {
    init_tracing();
    let mut world = World::with_config(config).expect("valid config");
    world.register_decomposed::<Position>().unwrap();
    world.register_decomposed::<Velocity>().unwrap();
    world.register_decomposed::<Health>().unwrap();
    world.register_decomposed::<Name>().unwrap();
    world.register::<Inventory>().unwrap();
    world.register::<Frozen>().unwrap();
    world
}

/// One configuration per storage mode.
pub fn storage_configs() -> [WorldConfig; 2] {
    [
        WorldConfig::default(),
        WorldConfig::default().with_storage(StorageMode::Decomposed),
    ]
}
