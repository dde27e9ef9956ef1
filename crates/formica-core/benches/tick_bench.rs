use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use formica_core::{ColonyConfig, Simulation};
use formica_geom::{Shape, ShapeTag, Vec2};
use std::time::Duration;

const BOUNDS: (f32, f32) = (800.0, 600.0);
const DT: f32 = 1.0 / 60.0;

fn wall(center: Vec2, half_w: f32, half_h: f32) -> Shape {
    Shape::polygon(
        ShapeTag::Obstacle,
        center,
        vec![
            Vec2::new(-half_w, -half_h),
            Vec2::new(half_w, -half_h),
            Vec2::new(half_w, half_h),
            Vec2::new(-half_w, half_h),
        ],
    )
}

fn build_sim(agents: usize) -> Simulation {
    let config = ColonyConfig {
        ant_count: agents,
        nest_position: Vec2::new(400.0, 300.0),
        rng_seed: Some(0xBEEF),
        history_capacity: 1,
        ..ColonyConfig::default()
    };
    let mut sim = Simulation::new(config).expect("sim");
    sim.add_obstacle(wall(Vec2::new(400.0, -20.0), 420.0, 20.0));
    sim.add_obstacle(wall(Vec2::new(400.0, 620.0), 420.0, 20.0));
    sim.add_obstacle(wall(Vec2::new(-20.0, 300.0), 20.0, 320.0));
    sim.add_obstacle(wall(Vec2::new(820.0, 300.0), 20.0, 320.0));
    sim.add_food(Vec2::new(650.0, 300.0), 30.0, 500)
        .expect("food");
    // Drain the staggered spawner before measuring.
    for _ in 0..agents {
        sim.step(DT, BOUNDS);
    }
    sim
}

fn bench_colony_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("colony_step");
    group.sample_size(20);
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(8));
    for &agents in &[250usize, 1000, 4000] {
        group.bench_function(format!("steps16_agents{agents}"), |b| {
            b.iter_batched(
                || build_sim(agents),
                |mut sim| {
                    for _ in 0..16 {
                        sim.step(DT, BOUNDS);
                    }
                    sim
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_colony_step);
criterion_main!(benches);
