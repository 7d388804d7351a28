use std::hint::black_box;

use criterion::*;
use columnar_ecs::prelude::*;

mod common;
use common::*;

fn iterate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");

    for storage in [StorageMode::Boxed, StorageMode::Decomposed] {
        let mut world = make_world(storage);
        populate(&mut world, AGENTS_MED).expect("populate failed");

        group.bench_function(format!("for_each_read_{storage:?}"), |b| {
            b.iter(|| {
                let mut total = 0.0f32;
                world
                    .query()
                    .for_each::<(Wealth,)>(|_, (w,)| total += w.value)
                    .expect("query failed");
                black_box(total)
            });
        });

        group.bench_function(format!("par_for_each_read_{storage:?}"), |b| {
            b.iter(|| {
                world
                    .query()
                    .par_for_each::<(Position, Wealth)>(|_, (p, w)| {
                        black_box(p.x * w.value);
                    })
                    .expect("query failed");
            });
        });

        group.bench_function(format!("modify_with_{storage:?}"), |b| {
            b.iter(|| {
                world
                    .query()
                    .modify_with::<(Productivity,), Wealth>(|_, (p,), w| w.value += p.rate)
                    .expect("query failed")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);
