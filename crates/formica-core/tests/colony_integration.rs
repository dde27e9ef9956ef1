use formica_core::{ColonyConfig, Simulation, TickSummary, spawn_layout_worker};
use formica_geom::{Shape, ShapeTag, Vec2};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const BOUNDS: (f32, f32) = (400.0, 400.0);
const DT: f32 = 1.0 / 30.0;

fn arena_config(seed: u64) -> ColonyConfig {
    ColonyConfig {
        ant_count: 100,
        nest_position: Vec2::new(200.0, 200.0),
        nest_radius: 15.0,
        nest_visible_radius: 120.0,
        ant_radius: 3.0,
        ant_scale_range: (0.9, 1.1),
        speed_range: (40.0, 60.0),
        max_speed: 70.0,
        pheromone_lifespan: 10.0,
        emission_interval: 0.25,
        max_trail_fuel: 64,
        rng_seed: Some(seed),
        history_capacity: 64,
        ..ColonyConfig::default()
    }
}

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

fn enclose_arena(sim: &mut Simulation) {
    sim.add_obstacle(wall(Vec2::new(200.0, -20.0), 220.0, 20.0));
    sim.add_obstacle(wall(Vec2::new(200.0, 420.0), 220.0, 20.0));
    sim.add_obstacle(wall(Vec2::new(-20.0, 200.0), 20.0, 220.0));
    sim.add_obstacle(wall(Vec2::new(420.0, 200.0), 20.0, 220.0));
}

fn run_history_and_positions(
    mut sim: Simulation,
    steps: usize,
) -> (Vec<TickSummary>, Vec<Vec2>) {
    for _ in 0..steps {
        sim.step(DT, BOUNDS);
    }
    let positions = sim
        .ants()
        .iter_handles()
        .map(|id| sim.ant(id).expect("snapshot").position)
        .collect();
    (sim.history().copied().collect(), positions)
}

#[test]
fn identical_seeds_produce_identical_runs() {
    let make = |seed| {
        let mut sim = Simulation::new(arena_config(seed)).expect("sim");
        enclose_arena(&mut sim);
        sim.add_food(Vec2::new(320.0, 200.0), 25.0, 40).expect("food");
        sim
    };
    let (history_a, positions_a) = run_history_and_positions(make(0xDEADBEEF), 300);
    let (history_b, positions_b) = run_history_and_positions(make(0xDEADBEEF), 300);
    assert_eq!(
        history_a, history_b,
        "identical seeds should produce identical histories"
    );
    assert_eq!(
        positions_a, positions_b,
        "identical seeds should produce identical agent positions"
    );

    let (_, positions_c) = run_history_and_positions(make(0xF00DF00D), 300);
    assert_ne!(
        positions_a, positions_c,
        "different seeds should diverge somewhere"
    );
}

#[test]
fn worker_layout_merge_matches_inline_construction() {
    let config = arena_config(11);
    let cancel = Arc::new(AtomicBool::new(false));
    let rx = spawn_layout_worker(&config, cancel);
    let layout = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("worker layout");

    let merged = Simulation::with_field_layout(config.clone(), layout).expect("merged sim");
    let inline = Simulation::new(config).expect("inline sim");

    let (history_a, positions_a) = run_history_and_positions(merged, 120);
    let (history_b, positions_b) = run_history_and_positions(inline, 120);
    assert_eq!(
        history_a, history_b,
        "worker-computed layout must behave like the inline build"
    );
    assert_eq!(positions_a, positions_b);
}

#[test]
fn cancelled_layout_worker_sends_nothing() {
    let config = arena_config(11);
    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::Relaxed);
    let rx = spawn_layout_worker(&config, cancel);
    assert!(
        rx.recv_timeout(Duration::from_secs(2)).is_err(),
        "cancelled worker must not deliver a layout"
    );
}

#[test]
fn layout_capacity_mismatch_is_rejected() {
    let config = arena_config(3);
    let mut small = config.clone();
    small.ant_count = 1;
    let cancel = Arc::new(AtomicBool::new(false));
    let rx = spawn_layout_worker(&small, cancel);
    let layout = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("worker layout");
    assert!(Simulation::with_field_layout(config, layout).is_err());
}

#[test]
fn colony_forages_the_food_patch() {
    let mut sim = Simulation::new(arena_config(0xA57)).expect("sim");
    enclose_arena(&mut sim);
    let food = sim.add_food(Vec2::new(320.0, 200.0), 25.0, 40).expect("food");

    let mut saw_pickup = false;
    for _ in 0..3500 {
        let events = sim.step(DT, BOUNDS);
        if events
            .carry_events
            .iter()
            .any(|e| matches!(e, formica_core::CarryEvent::Attached { .. }))
        {
            saw_pickup = true;
        }
    }

    assert_eq!(sim.agent_count(), 100, "spawn drain must complete");
    assert!(saw_pickup, "at least one agent must pick up a unit");
    let remaining = sim.food_remaining(food).unwrap_or(0);
    assert!(
        remaining < 40,
        "the patch must measurably shrink, got {remaining}"
    );
    let last = sim.history().last().expect("history");
    assert_eq!(last.counts.active_agents, 100);
    assert!(
        last.counts.active_pheromones > 0,
        "foraging colonies keep live trails"
    );
}
