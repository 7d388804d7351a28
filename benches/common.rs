#![allow(dead_code)]

use columnar_ecs::prelude::*;

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
decomposable!(Position { x: f32, y: f32 });

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}
decomposable!(Wealth { value: f32 });

#[derive(Clone, Copy)]
pub struct Productivity {
    pub rate: f32,
}
decomposable!(Productivity { rate: f32 });

pub fn make_world(storage: StorageMode) -> World {
    let mut world = World::with_config(WorldConfig::default().with_storage(storage))
        .expect("default config is valid");
    world.register_decomposed::<Position>().expect("register Position");
    world.register_decomposed::<Wealth>().expect("register Wealth");
    world.register_decomposed::<Productivity>().expect("register Productivity");
    world
}

pub fn populate(world: &mut World, agent_count: usize) -> ECSResult<Vec<Entity>> {
    world
        .spawn_batch(agent_count)
        .with(|i| Position { x: i as f32, y: 0.0 })
        .with(|_| Wealth { value: 100.0 })
        .with(|i| Productivity { rate: 1.0 + (i % 7) as f32 })
        .spawn()
}
