//! Headless foraging run: spawns a colony in a walled arena with one food
//! patch and prints per-second metrics.
//!
//! ```sh
//! cargo run --example forage
//! ```

use formica_core::{ColonyConfig, Simulation};
use formica_geom::{Shape, ShapeTag, Vec2};

const BOUNDS: (f32, f32) = (400.0, 400.0);
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

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("formica_core=info")),
        )
        .init();

    let config = ColonyConfig {
        ant_count: 200,
        nest_position: Vec2::new(200.0, 200.0),
        nest_radius: 15.0,
        nest_visible_radius: 120.0,
        ant_radius: 3.0,
        rng_seed: Some(42),
        ..ColonyConfig::default()
    };
    let mut sim = Simulation::new(config).expect("simulation");
    sim.add_obstacle(wall(Vec2::new(200.0, -20.0), 220.0, 20.0));
    sim.add_obstacle(wall(Vec2::new(200.0, 420.0), 220.0, 20.0));
    sim.add_obstacle(wall(Vec2::new(-20.0, 200.0), 20.0, 220.0));
    sim.add_obstacle(wall(Vec2::new(420.0, 200.0), 20.0, 220.0));
    let food = sim
        .add_food(Vec2::new(320.0, 200.0), 25.0, 200)
        .expect("food patch");

    for second in 1..=120u32 {
        let mut counts = Default::default();
        for _ in 0..60 {
            counts = sim.step(DT, BOUNDS).counts;
        }
        let carrying = sim
            .history()
            .last()
            .map_or(0, |summary| summary.carrying);
        println!(
            "t={second:>3}s agents={:>3} on_screen={:>3} pheromones={:>5} carrying={:>3} food_left={}",
            counts.active_agents,
            counts.agents_on_screen,
            counts.active_pheromones,
            carrying,
            sim.food_remaining(food).unwrap_or(0),
        );
        if sim.food_remaining(food).is_none() {
            println!("patch exhausted after {second}s");
            break;
        }
    }
}
