//! Core colony state and the per-tick simulation driver.
//!
//! The [`Simulation`] owns every body: agent shapes live in the broad-phase
//! [`Bvh`], trail markers in the fixed-capacity [`FieldIndex`], and per-agent
//! state in dense SoA columns behind generational handles. A host render
//! loop drives [`Simulation::step`] with a time delta and world bounds and
//! reads back positions, counts, and events.

use formica_geom::{Shape, ShapeTag, Vec2, sat, sat::Contact};
use formica_index::{Bvh, FieldIndex, FieldLayout, IndexError, ShapeKey, TrailKind};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use thiserror::Error;
use tracing::{debug, info};

new_key_type! {
    /// Stable handle for agents.
    pub struct AntId;
    /// Stable handle for food patches.
    pub struct FoodId;
}

/// Where expired or never-placed trail markers are parked, far outside any
/// sane world bounds.
const FIELD_PARK: Vec2 = Vec2::new(-1.0e6, -1.0e6);

/// Errors raised when constructing or mutating colony state.
#[derive(Debug, Error)]
pub enum ColonyError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Propagated spatial-index error.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Static configuration for a colony.
///
/// All values are plain numerics validated at construction; see
/// [`ColonyConfig::validate`] for the accepted ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColonyConfig {
    /// Number of agents the staggered spawner will create.
    pub ant_count: usize,
    /// World position of the nest center.
    pub nest_position: Vec2,
    /// Radius of the nest body.
    pub nest_radius: f32,
    /// Radius of the area in which carrying agents home in on the nest.
    pub nest_visible_radius: f32,
    /// Base collision radius of an agent before its individual scale.
    pub ant_radius: f32,
    /// Per-agent scale factor range sampled at spawn.
    pub ant_scale_range: (f32, f32),
    /// Target speed range sampled at spawn, world units per second.
    pub speed_range: (f32, f32),
    /// Hard cap on agent speed.
    pub max_speed: f32,
    /// Rate at which speed interpolates toward the target, per second.
    pub speed_interp_rate: f32,
    /// Trail marker lifespan in seconds.
    pub pheromone_lifespan: f32,
    /// Seconds between global emission ticks.
    pub emission_interval: f32,
    /// Emissions an agent can make before returning to the nest to refuel.
    pub max_trail_fuel: u32,
    /// Sensor probe radius as a multiple of the agent's effective radius.
    pub sensor_radius_multiplier: f32,
    /// Weight of the pheromone steering signal.
    pub steering_sensitivity: f32,
    /// Half-range of the instantaneous per-tick wander rotation, radians.
    pub wander_jitter: f32,
    /// Mean seconds between randomized turn events.
    pub random_turn_interval: f32,
    /// Bound on the randomized turn angle, radians.
    pub random_turn_max_angle: f32,
    /// Exponential pull of the residual turn vector toward zero, per second.
    pub turn_decay_rate: f32,
    /// AABB inflation applied when storing bodies in the spatial index.
    pub shape_padding: f32,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            ant_count: 300,
            nest_position: Vec2::new(400.0, 300.0),
            nest_radius: 25.0,
            nest_visible_radius: 100.0,
            ant_radius: 4.0,
            ant_scale_range: (0.8, 1.2),
            speed_range: (40.0, 60.0),
            max_speed: 70.0,
            speed_interp_rate: 2.0,
            pheromone_lifespan: 20.0,
            emission_interval: 0.25,
            max_trail_fuel: 64,
            sensor_radius_multiplier: 9.0,
            steering_sensitivity: 0.6,
            wander_jitter: 0.12,
            random_turn_interval: 1.5,
            random_turn_max_angle: std::f32::consts::FRAC_PI_2,
            turn_decay_rate: 1.4,
            shape_padding: 5.0,
            rng_seed: None,
            history_capacity: 256,
        }
    }
}

impl ColonyConfig {
    /// Validates every configuration value, rejecting the colony before any
    /// index is built.
    pub fn validate(&self) -> Result<(), ColonyError> {
        if self.ant_count == 0 {
            return Err(ColonyError::InvalidConfig("ant_count must be positive"));
        }
        if self.nest_radius <= 0.0 {
            return Err(ColonyError::InvalidConfig("nest_radius must be positive"));
        }
        if self.nest_visible_radius <= self.nest_radius {
            return Err(ColonyError::InvalidConfig(
                "nest_visible_radius must exceed nest_radius",
            ));
        }
        if self.ant_radius <= 0.0 {
            return Err(ColonyError::InvalidConfig("ant_radius must be positive"));
        }
        if self.ant_scale_range.0 <= 0.0 || self.ant_scale_range.0 > self.ant_scale_range.1 {
            return Err(ColonyError::InvalidConfig(
                "ant_scale_range must be positive and ordered",
            ));
        }
        if self.speed_range.0 <= 0.0 || self.speed_range.0 > self.speed_range.1 {
            return Err(ColonyError::InvalidConfig(
                "speed_range must be positive and ordered",
            ));
        }
        if self.speed_range.1 > self.max_speed {
            return Err(ColonyError::InvalidConfig(
                "speed_range cannot exceed max_speed",
            ));
        }
        if self.speed_interp_rate <= 0.0 {
            return Err(ColonyError::InvalidConfig(
                "speed_interp_rate must be positive",
            ));
        }
        if self.pheromone_lifespan <= 0.0 {
            return Err(ColonyError::InvalidConfig(
                "pheromone_lifespan must be positive",
            ));
        }
        if self.emission_interval <= 0.0 {
            return Err(ColonyError::InvalidConfig(
                "emission_interval must be positive",
            ));
        }
        if self.max_trail_fuel == 0 {
            return Err(ColonyError::InvalidConfig(
                "max_trail_fuel must be positive",
            ));
        }
        if self.sensor_radius_multiplier <= 0.0 {
            return Err(ColonyError::InvalidConfig(
                "sensor_radius_multiplier must be positive",
            ));
        }
        if self.steering_sensitivity < 0.0
            || self.wander_jitter < 0.0
            || self.turn_decay_rate < 0.0
            || self.shape_padding < 0.0
        {
            return Err(ColonyError::InvalidConfig(
                "steering, jitter, decay, and padding must be non-negative",
            ));
        }
        if self.random_turn_interval <= 0.0 {
            return Err(ColonyError::InvalidConfig(
                "random_turn_interval must be positive",
            ));
        }
        if self.random_turn_max_angle <= 0.0
            || self.random_turn_max_angle > std::f32::consts::PI
        {
            return Err(ColonyError::InvalidConfig(
                "random_turn_max_angle must be in (0, pi]",
            ));
        }
        if self.history_capacity == 0 {
            return Err(ColonyError::InvalidConfig(
                "history_capacity must be positive",
            ));
        }
        Ok(())
    }

    /// Pheromone pool size: every agent emitting at the configured interval
    /// for a full marker lifespan fits without overwriting a live marker.
    #[must_use]
    pub fn pheromone_pool_capacity(&self) -> usize {
        let per_agent = (self.pheromone_lifespan / self.emission_interval).ceil() as usize;
        self.ant_count * per_agent.max(1)
    }

    /// Returns the configured RNG seed, generating one from entropy if
    /// absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Spawn-time fields for a single agent.
#[derive(Debug, Clone, Copy)]
struct AntSeed {
    shape: ShapeKey,
    direction: Vec2,
    target_speed: f32,
    trail_fuel: u32,
    turn_timer: f32,
}

/// Collection of per-agent columns for hot-path iteration.
#[derive(Debug, Default)]
pub struct AntColumns {
    directions: Vec<Vec2>,
    speeds: Vec<f32>,
    target_speeds: Vec<f32>,
    carrying: Vec<bool>,
    trail_fuel: Vec<u32>,
    turn_timers: Vec<f32>,
    turn_offsets: Vec<Vec2>,
    shapes: Vec<ShapeKey>,
}

impl AntColumns {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            directions: Vec::with_capacity(capacity),
            speeds: Vec::with_capacity(capacity),
            target_speeds: Vec::with_capacity(capacity),
            carrying: Vec::with_capacity(capacity),
            trail_fuel: Vec::with_capacity(capacity),
            turn_timers: Vec::with_capacity(capacity),
            turn_offsets: Vec::with_capacity(capacity),
            shapes: Vec::with_capacity(capacity),
        }
    }

    /// Number of active rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.directions.len()
    }

    /// Returns true when no rows are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, seed: AntSeed) {
        self.directions.push(seed.direction);
        self.speeds.push(0.0);
        self.target_speeds.push(seed.target_speed);
        self.carrying.push(false);
        self.trail_fuel.push(seed.trail_fuel);
        self.turn_timers.push(seed.turn_timer);
        self.turn_offsets.push(Vec2::ZERO);
        self.shapes.push(seed.shape);
        self.debug_assert_coherent();
    }

    fn clear(&mut self) {
        self.directions.clear();
        self.speeds.clear();
        self.target_speeds.clear();
        self.carrying.clear();
        self.trail_fuel.clear();
        self.turn_timers.clear();
        self.turn_offsets.clear();
        self.shapes.clear();
    }

    /// Immutable access to direction vectors.
    #[must_use]
    pub fn directions(&self) -> &[Vec2] {
        &self.directions
    }

    /// Immutable access to current speeds.
    #[must_use]
    pub fn speeds(&self) -> &[f32] {
        &self.speeds
    }

    /// Immutable access to target speeds.
    #[must_use]
    pub fn target_speeds(&self) -> &[f32] {
        &self.target_speeds
    }

    /// Immutable access to carry flags.
    #[must_use]
    pub fn carrying(&self) -> &[bool] {
        &self.carrying
    }

    /// Immutable access to remaining trail fuel.
    #[must_use]
    pub fn trail_fuel(&self) -> &[u32] {
        &self.trail_fuel
    }

    /// Immutable access to shape correlation keys.
    #[must_use]
    pub fn shapes(&self) -> &[ShapeKey] {
        &self.shapes
    }

    #[inline]
    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.directions.len(), self.speeds.len());
        debug_assert_eq!(self.directions.len(), self.target_speeds.len());
        debug_assert_eq!(self.directions.len(), self.carrying.len());
        debug_assert_eq!(self.directions.len(), self.trail_fuel.len());
        debug_assert_eq!(self.directions.len(), self.turn_timers.len());
        debug_assert_eq!(self.directions.len(), self.turn_offsets.len());
        debug_assert_eq!(self.directions.len(), self.shapes.len());
    }
}

/// Dense SoA storage with generational handles for agent access.
///
/// Agents are created by the staggered spawner and destroyed only at colony
/// teardown, so the arena supports insertion and wholesale clearing only.
#[derive(Debug, Default)]
pub struct AntArena {
    slots: SlotMap<AntId, usize>,
    handles: Vec<AntId>,
    columns: AntColumns,
}

impl AntArena {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: SlotMap::with_capacity_and_key(capacity),
            handles: Vec::with_capacity(capacity),
            columns: AntColumns::with_capacity(capacity),
        }
    }

    /// Number of active agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true when no agents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns true if `id` refers to a live agent.
    #[must_use]
    pub fn contains(&self, id: AntId) -> bool {
        self.slots.contains_key(id)
    }

    /// Returns the dense index for `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: AntId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Iterate over active agent handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = AntId> + '_ {
        self.handles.iter().copied()
    }

    /// Borrow the underlying column storage.
    #[must_use]
    pub fn columns(&self) -> &AntColumns {
        &self.columns
    }

    fn columns_mut(&mut self) -> &mut AntColumns {
        &mut self.columns
    }

    fn handle_at(&self, index: usize) -> AntId {
        self.handles[index]
    }

    fn insert(&mut self, seed: AntSeed) -> AntId {
        let index = self.columns.len();
        self.columns.push(seed);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.handles.clear();
        self.columns.clear();
    }
}

/// Combined snapshot of an agent's state for host consumption.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AntSnapshot {
    pub id: AntId,
    pub position: Vec2,
    pub direction: Vec2,
    pub speed: f32,
    pub target_speed: f32,
    pub carrying: bool,
    pub trail_fuel: u32,
}

/// A harvestable food patch tracked by the colony.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FoodPatch {
    /// Collision shape correlated by key.
    pub shape: ShapeKey,
    /// Patch center.
    pub position: Vec2,
    /// Initial radius; the shape shrinks proportionally to `remaining`.
    pub radius: f32,
    /// Units available at creation.
    pub initial: u32,
    /// Units left to harvest.
    pub remaining: u32,
}

impl FoodPatch {
    /// Whether the patch has been harvested dry.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}

/// What a shape in the spatial index belongs to; the per-agent update
/// dispatches on this instead of consulting scattered id maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyOwner {
    Ant(AntId),
    Food(FoodId),
    Nest,
    NestArea,
    Obstacle,
}

/// Carried-resource attach/detach notification for render sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CarryEvent {
    Attached { ant: AntId, food: FoodId },
    Detached { ant: AntId },
}

/// Per-tick counters published for display.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickCounts {
    pub active_agents: usize,
    pub agents_on_screen: usize,
    pub active_pheromones: usize,
}

/// Events emitted after processing a tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TickEvents {
    pub tick: Tick,
    pub spawned: Vec<AntId>,
    pub food_removed: Vec<FoodId>,
    pub carry_events: Vec<CarryEvent>,
    pub counts: TickCounts,
}

/// Aggregate retained in the bounded in-memory history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: Tick,
    pub counts: TickCounts,
    pub carrying: usize,
    pub food_remaining: u32,
}

/// Staggered spawn state: one agent per tick, cancellable between units.
#[derive(Debug)]
struct SpawnQueue {
    remaining: usize,
    cancel: Arc<AtomicBool>,
}

impl SpawnQueue {
    fn new(count: usize) -> Self {
        Self {
            remaining: count,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim one unit of spawn work; the cancel flag is consulted first.
    fn take_one(&mut self) -> bool {
        if self.remaining == 0 || self.cancel.load(Ordering::Relaxed) {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

/// Compute the pheromone pool's initial tree layout on a worker thread.
///
/// The layout is independent of per-tick state; the receiver hands it to
/// [`Simulation::with_field_layout`], which is the merge point. The cancel
/// flag is consulted before the unit of work and again before the send.
pub fn spawn_layout_worker(
    config: &ColonyConfig,
    cancel: Arc<AtomicBool>,
) -> mpsc::Receiver<FieldLayout> {
    let capacity = config.pheromone_pool_capacity();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let layout = FieldLayout::build(capacity, FIELD_PARK);
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        debug!(capacity, "field layout computed off-thread");
        let _ = tx.send(layout);
    });
    rx
}

/// The simulation driver: owns every body and advances the colony one tick
/// at a time.
pub struct Simulation {
    config: ColonyConfig,
    tick: Tick,
    rng: SmallRng,
    bvh: Bvh,
    field: FieldIndex,
    ants: AntArena,
    food: SlotMap<FoodId, FoodPatch>,
    owners: SecondaryMap<ShapeKey, BodyOwner>,
    nest_shape: ShapeKey,
    nest_area_shape: ShapeKey,
    spawn: SpawnQueue,
    emission_timer: f32,
    history: VecDeque<TickSummary>,
    scratch: Vec<ShapeKey>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tick", &self.tick)
            .field("agents", &self.ants.len())
            .field("food_patches", &self.food.len())
            .field("active_pheromones", &self.field.active_count())
            .finish()
    }
}

impl Simulation {
    /// Build a simulation, computing the pheromone pool layout inline.
    pub fn new(config: ColonyConfig) -> Result<Self, ColonyError> {
        config.validate()?;
        let field = FieldIndex::new(
            config.pheromone_pool_capacity(),
            config.pheromone_lifespan,
            FIELD_PARK,
        )?;
        Self::with_field(config, field)
    }

    /// Build a simulation from a worker-computed field layout; see
    /// [`spawn_layout_worker`]. The main tick loop cannot start before the
    /// merge completes because construction is the merge.
    pub fn with_field_layout(
        config: ColonyConfig,
        layout: FieldLayout,
    ) -> Result<Self, ColonyError> {
        config.validate()?;
        if layout.capacity() != config.pheromone_pool_capacity() {
            return Err(ColonyError::InvalidConfig(
                "field layout capacity does not match configuration",
            ));
        }
        let field = FieldIndex::from_layout(layout, config.pheromone_lifespan)?;
        Self::with_field(config, field)
    }

    fn with_field(config: ColonyConfig, field: FieldIndex) -> Result<Self, ColonyError> {
        let rng = config.seeded_rng();
        let mut bvh = Bvh::new();
        let mut owners = SecondaryMap::new();

        let nest_shape = bvh.insert(
            Shape::circle(ShapeTag::Nest, config.nest_position, config.nest_radius)
                .with_padding(config.shape_padding),
        );
        owners.insert(nest_shape, BodyOwner::Nest);
        let nest_area_shape = bvh.insert(
            Shape::circle(
                ShapeTag::NestVisibleArea,
                config.nest_position,
                config.nest_visible_radius,
            )
            .with_padding(config.shape_padding),
        );
        owners.insert(nest_area_shape, BodyOwner::NestArea);

        info!(
            ants = config.ant_count,
            pool = field.capacity(),
            "colony constructed"
        );
        Ok(Self {
            spawn: SpawnQueue::new(config.ant_count),
            ants: AntArena::with_capacity(config.ant_count),
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            tick: Tick::zero(),
            rng,
            bvh,
            field,
            food: SlotMap::with_key(),
            owners,
            nest_shape,
            nest_area_shape,
            emission_timer: 0.0,
            scratch: Vec::new(),
        })
    }

    /// Register a host-provided obstacle (or other static body).
    pub fn add_obstacle(&mut self, shape: Shape) -> ShapeKey {
        let key = self.bvh.insert(shape);
        self.owners.insert(key, BodyOwner::Obstacle);
        key
    }

    /// Add a harvestable food patch.
    pub fn add_food(
        &mut self,
        position: Vec2,
        radius: f32,
        amount: u32,
    ) -> Result<FoodId, ColonyError> {
        if radius <= 0.0 || amount == 0 {
            return Err(ColonyError::InvalidConfig(
                "food patch requires positive radius and amount",
            ));
        }
        let shape = Shape::circle(ShapeTag::Food, position, radius)
            .with_padding(self.config.shape_padding);
        let key = self.bvh.insert(shape);
        let id = self.food.insert(FoodPatch {
            shape: key,
            position,
            radius,
            initial: amount,
            remaining: amount,
        });
        self.owners.insert(key, BodyOwner::Food(id));
        Ok(id)
    }

    /// Execute one simulation tick and return the emitted events.
    pub fn step(&mut self, dt: f32, bounds: (f32, f32)) -> TickEvents {
        let mut events = TickEvents {
            tick: self.tick.next(),
            ..TickEvents::default()
        };

        self.emission_timer += dt;
        let emit = self.emission_timer >= self.config.emission_interval;
        if emit {
            self.emission_timer -= self.config.emission_interval;
        }

        self.stage_spawn(&mut events);
        self.stage_integrate(dt);
        self.bvh.update();
        self.stage_interact(dt, bounds, emit, &mut events);
        self.field.decay(dt);
        self.stage_metrics(&mut events);

        self.tick = events.tick;
        events
    }

    /// Drain at most one queued spawn, yielding back to the host loop.
    fn stage_spawn(&mut self, events: &mut TickEvents) {
        if !self.spawn.take_one() {
            return;
        }
        let scale = self
            .rng
            .random_range(self.config.ant_scale_range.0..=self.config.ant_scale_range.1);
        let target_speed = self
            .rng
            .random_range(self.config.speed_range.0..=self.config.speed_range.1);
        let direction = Vec2::from_angle(
            self.rng
                .random_range(-std::f32::consts::PI..std::f32::consts::PI),
        );
        let offset_angle = self
            .rng
            .random_range(-std::f32::consts::PI..std::f32::consts::PI);
        let offset_len = self.rng.random_range(0.0..=self.config.nest_radius * 0.5);
        let position = self.config.nest_position + Vec2::from_angle(offset_angle) * offset_len;

        let shape = Shape::circle(ShapeTag::Agent, position, self.config.ant_radius * scale)
            .with_padding(self.config.shape_padding);
        let key = self.bvh.insert(shape);
        let turn_timer = self
            .rng
            .random_range(self.config.random_turn_interval * 0.5..self.config.random_turn_interval * 1.5);
        let id = self.ants.insert(AntSeed {
            shape: key,
            direction,
            target_speed,
            trail_fuel: self.config.max_trail_fuel,
            turn_timer,
        });
        self.owners.insert(key, BodyOwner::Ant(id));
        events.spawned.push(id);
        if self.spawn.remaining == 0 {
            info!(count = self.ants.len(), "colony spawn complete");
        }
    }

    /// Advance every agent along its heading.
    fn stage_integrate(&mut self, dt: f32) {
        for idx in 0..self.ants.len() {
            let key = self.ants.columns().shapes[idx];
            let delta =
                self.ants.columns().directions[idx] * (self.ants.columns().speeds[idx] * dt);
            self.bvh.get_mut(key).translate(delta);
        }
    }

    /// The per-agent update: potentials query, narrow-phase dispatch by
    /// owner, steering blend, speed interpolation, trail emission.
    fn stage_interact(&mut self, dt: f32, bounds: (f32, f32), emit: bool, events: &mut TickEvents) {
        let config = self.config.clone();
        let nest = config.nest_position;
        let mut potentials = std::mem::take(&mut self.scratch);

        for idx in 0..self.ants.len() {
            let id = self.ants.handle_at(idx);
            let (key, mut direction, mut speed, target_speed) = {
                let c = self.ants.columns();
                (
                    c.shapes[idx],
                    c.directions[idx],
                    c.speeds[idx],
                    c.target_speeds[idx],
                )
            };
            let (mut carrying, mut fuel, mut turn_timer, mut turn_offset) = {
                let c = self.ants.columns();
                (
                    c.carrying[idx],
                    c.trail_fuel[idx],
                    c.turn_timers[idx],
                    c.turn_offsets[idx],
                )
            };
            let (mut position, my_radius) = self
                .bvh
                .get(key)
                .as_circle()
                .expect("agent bodies are circles");

            potentials.clear();
            self.bvh.potentials(key, &mut potentials);

            let mut correction = Vec2::ZERO;
            let mut steer_target: Option<Vec2> = None;
            let mut suppress_turn = false;
            let mut suppress_wander = false;
            let mut suppress_sense = false;
            let mut contact = Contact::default();

            for &cand in &potentials {
                if !sat::test(self.bvh.get(key), self.bvh.get(cand), Some(&mut contact)) {
                    continue;
                }
                let owner = self
                    .owners
                    .get(cand)
                    .copied()
                    .unwrap_or(BodyOwner::Obstacle);
                match owner {
                    BodyOwner::Ant(other) => {
                        let other_carrying = self
                            .ants
                            .index_of(other)
                            .map(|i| self.ants.columns().carrying[i])
                            .unwrap_or(false);
                        if !carrying && !other_carrying {
                            // Symmetric: the other agent applies its own half
                            // when its turn comes.
                            correction -= contact.axis * (contact.overlap * 0.5);
                            suppress_turn = true;
                        }
                    }
                    BodyOwner::Nest => {
                        if carrying {
                            carrying = false;
                            events.carry_events.push(CarryEvent::Detached { ant: id });
                            direction = -direction;
                        } else {
                            fuel = config.max_trail_fuel;
                        }
                    }
                    BodyOwner::NestArea => {
                        if carrying {
                            steer_target = Some((nest - position).normalize_or(direction));
                            suppress_wander = true;
                            suppress_sense = true;
                        }
                    }
                    BodyOwner::Food(food_id) => {
                        let Some(patch) = self.food.get_mut(food_id) else {
                            continue;
                        };
                        if patch.remaining == 0 {
                            continue;
                        }
                        let deep = contact.a_in_b || contact.overlap >= my_radius;
                        if !carrying && deep {
                            patch.remaining -= 1;
                            carrying = true;
                            fuel = config.max_trail_fuel;
                            direction = (nest - position).normalize_or(-direction);
                            events.carry_events.push(CarryEvent::Attached {
                                ant: id,
                                food: food_id,
                            });
                            if patch.remaining == 0 {
                                let shape_key = patch.shape;
                                self.owners.remove(shape_key);
                                let _ = self.bvh.remove(shape_key);
                                self.food.remove(food_id);
                                events.food_removed.push(food_id);
                                debug!(food = ?food_id, "food patch depleted");
                            } else {
                                let scale = patch.remaining as f32 / patch.initial as f32;
                                let shape_key = patch.shape;
                                let shape = self.bvh.get_mut(shape_key);
                                shape.set_scale(scale);
                                shape.refresh();
                            }
                        } else if !carrying {
                            // Shallow contact: bend toward the patch center.
                            let center = patch.position;
                            steer_target
                                .get_or_insert((center - position).normalize_or(direction));
                        }
                    }
                    BodyOwner::Obstacle => {
                        correction -= contact.axis * contact.overlap;
                        let normal = -contact.axis;
                        direction = (direction - normal * (2.0 * direction.dot(normal)))
                            .normalize_or(-direction);
                        suppress_turn = true;
                        suppress_wander = true;
                        suppress_sense = true;
                    }
                }
            }

            // Corrections land before steering so this tick's resolution
            // affects which pheromones the agent senses.
            if correction != Vec2::ZERO {
                let shape = self.bvh.get_mut(key);
                shape.translate(correction);
                shape.refresh();
                position += correction;
            }

            turn_timer -= dt;
            if turn_timer <= 0.0 {
                turn_timer = self.rng.random_range(
                    config.random_turn_interval * 0.5..config.random_turn_interval * 1.5,
                );
                if !suppress_turn {
                    let angle = self
                        .rng
                        .random_range(-config.random_turn_max_angle..config.random_turn_max_angle);
                    turn_offset = direction.rotated(angle);
                }
            }
            turn_offset = turn_offset * (-config.turn_decay_rate * dt).exp();

            let mut desired = steer_target.unwrap_or(direction);
            if !suppress_wander {
                if config.wander_jitter > 0.0 {
                    let jitter = self.rng.random_range(-config.wander_jitter..config.wander_jitter);
                    desired = desired.rotated(jitter);
                }
                desired += turn_offset;
            }
            if !suppress_sense {
                let seeking = if carrying {
                    TrailKind::Nest
                } else {
                    TrailKind::Food
                };
                let sensor_radius = my_radius * config.sensor_radius_multiplier;
                let trail = self.field.sense(position, direction, seeking, sensor_radius);
                desired += trail * config.steering_sensitivity;
            }
            // A zero blend keeps the previous heading.
            direction = desired.normalize_or(direction);

            speed += (target_speed - speed) * (config.speed_interp_rate * dt).min(1.0);
            speed = speed.min(config.max_speed);

            if emit && fuel > 0 {
                let kind = if carrying {
                    TrailKind::Food
                } else {
                    TrailKind::Nest
                };
                let strength = fuel as f32 / config.max_trail_fuel as f32;
                self.field.place(position, kind, strength);
                fuel -= 1;
            }

            if position.x >= 0.0
                && position.x <= bounds.0
                && position.y >= 0.0
                && position.y <= bounds.1
            {
                events.counts.agents_on_screen += 1;
            }

            let c = self.ants.columns_mut();
            c.directions[idx] = direction;
            c.speeds[idx] = speed;
            c.carrying[idx] = carrying;
            c.trail_fuel[idx] = fuel;
            c.turn_timers[idx] = turn_timer;
            c.turn_offsets[idx] = turn_offset;
        }

        self.scratch = potentials;
    }

    fn stage_metrics(&mut self, events: &mut TickEvents) {
        events.counts.active_agents = self.ants.len();
        events.counts.active_pheromones = self.field.active_count();
        let summary = TickSummary {
            tick: events.tick,
            counts: events.counts,
            carrying: self
                .ants
                .columns()
                .carrying
                .iter()
                .filter(|&&c| c)
                .count(),
            food_remaining: self.food.values().map(|p| p.remaining).sum(),
        };
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    /// Immutable access to configuration.
    #[must_use]
    pub fn config(&self) -> &ColonyConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Read-only access to the agent arena.
    #[must_use]
    pub fn ants(&self) -> &AntArena {
        &self.ants
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.ants.len()
    }

    /// Spawns still queued behind the staggered drain.
    #[must_use]
    pub fn pending_spawns(&self) -> usize {
        self.spawn.remaining
    }

    /// Stop the staggered spawn drain; already-spawned agents are
    /// unaffected.
    pub fn cancel_spawns(&self) {
        self.spawn.cancel.store(true, Ordering::Relaxed);
    }

    /// Cancellation flag shared with the spawn drain, for host-side
    /// teardown paths.
    #[must_use]
    pub fn spawn_cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.spawn.cancel)
    }

    /// Read-only access to the broad-phase index, for render sync.
    #[must_use]
    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    /// Read-only access to the pheromone field, for render sync.
    #[must_use]
    pub fn field(&self) -> &FieldIndex {
        &self.field
    }

    /// Iterate over retained tick summaries.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Iterate over live food patches.
    pub fn food_patches(&self) -> impl Iterator<Item = (FoodId, &FoodPatch)> {
        self.food.iter()
    }

    /// Units left in a patch, if it still exists.
    #[must_use]
    pub fn food_remaining(&self, id: FoodId) -> Option<u32> {
        self.food.get(id).map(|p| p.remaining)
    }

    /// Snapshot an agent's state.
    #[must_use]
    pub fn ant(&self, id: AntId) -> Option<AntSnapshot> {
        let idx = self.ants.index_of(id)?;
        let c = self.ants.columns();
        let position = self.bvh.get(c.shapes[idx]).center();
        Some(AntSnapshot {
            id,
            position,
            direction: c.directions[idx],
            speed: c.speeds[idx],
            target_speed: c.target_speeds[idx],
            carrying: c.carrying[idx],
            trail_fuel: c.trail_fuel[idx],
        })
    }

    /// Reposition an agent (host tooling and scenario setup).
    pub fn move_ant(&mut self, id: AntId, position: Vec2) {
        if let Some(idx) = self.ants.index_of(id) {
            let key = self.ants.columns().shapes[idx];
            let shape = self.bvh.get_mut(key);
            shape.set_position(position);
            shape.refresh();
        }
    }

    /// Overwrite an agent's heading; zero-length input is ignored.
    pub fn set_ant_heading(&mut self, id: AntId, heading: Vec2) {
        if let Some(idx) = self.ants.index_of(id) {
            let current = self.ants.columns().directions[idx];
            self.ants.columns_mut().directions[idx] = heading.normalize_or(current);
        }
    }

    /// Overwrite an agent's carry flag (host tooling and scenario setup).
    pub fn set_ant_carrying(&mut self, id: AntId, carrying: bool) {
        if let Some(idx) = self.ants.index_of(id) {
            self.ants.columns_mut().carrying[idx] = carrying;
        }
    }

    /// Nest body key, for render correlation.
    #[must_use]
    pub const fn nest_shape(&self) -> ShapeKey {
        self.nest_shape
    }

    /// Nest visible-area key, for render correlation.
    #[must_use]
    pub const fn nest_area_shape(&self) -> ShapeKey {
        self.nest_area_shape
    }

    /// Destroy all agents and stop any pending spawns.
    pub fn teardown(&mut self) {
        self.cancel_spawns();
        let keys: Vec<ShapeKey> = self.ants.columns().shapes.to_vec();
        for key in keys {
            self.owners.remove(key);
            let _ = self.bvh.remove(key);
        }
        self.ants.clear();
        info!("colony torn down");
    }
}
