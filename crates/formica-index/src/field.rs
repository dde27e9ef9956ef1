//! Pheromone field index: a fixed-capacity variant of the BVH operating over
//! flat numeric buffers.
//!
//! Trail markers churn at thousands of inserts per second, so the pool never
//! allocates per marker: parallel fixed-size buffers hold marker state, and
//! the tree itself is stored as flat parent/left/right link arrays with one
//! permanent leaf per pool slot. Unused slots are parked far outside world
//! bounds so their stale geometry can never match a query.

use crate::IndexError;
use formica_geom::{Aabb, Shape, ShapeTag, Vec2};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Half-extent of a marker's leaf box in the tree.
const MARKER_EXTENT: f32 = 1.0;

const NONE: i32 = -1;

/// Trail category laid and sensed by agents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TrailKind {
    /// Laid by carrying agents; leads toward food.
    Food,
    /// Laid by searching agents; leads toward the nest.
    Nest,
}

impl TrailKind {
    /// Shape tag equivalent, for render-side categorization.
    #[must_use]
    pub const fn tag(self) -> ShapeTag {
        match self {
            Self::Food => ShapeTag::PheromoneFood,
            Self::Nest => ShapeTag::PheromoneNest,
        }
    }
}

/// Precomputed initial tree layout over parked placeholder leaves.
///
/// Building the layout touches no per-tick state, so it can run on a worker
/// thread; [`FieldIndex::from_layout`] merges the buffers back.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    capacity: usize,
    park: Vec2,
    parent: Vec<i32>,
    left: Vec<i32>,
    right: Vec<i32>,
    min_x: Vec<f32>,
    min_y: Vec<f32>,
    max_x: Vec<f32>,
    max_y: Vec<f32>,
    root: i32,
    free: Vec<i32>,
}

impl FieldLayout {
    /// Lay out a balanced tree of `capacity` placeholder leaves parked at
    /// `park`, pairing nodes bottom-up.
    #[must_use]
    pub fn build(capacity: usize, park: Vec2) -> Self {
        let node_count = 2 * capacity;
        let mut layout = Self {
            capacity,
            park,
            parent: vec![NONE; node_count],
            left: vec![NONE; node_count],
            right: vec![NONE; node_count],
            min_x: vec![0.0; node_count],
            min_y: vec![0.0; node_count],
            max_x: vec![0.0; node_count],
            max_y: vec![0.0; node_count],
            root: NONE,
            free: Vec::new(),
        };
        let park_box = Aabb::from_circle(park, MARKER_EXTENT);
        for slot in 0..capacity {
            layout.set_aabb(slot, &park_box);
        }

        let mut next_branch = capacity;
        let mut level: Vec<usize> = (0..capacity).collect();
        while level.len() > 1 {
            let mut parents = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                if let [a, b] = *pair {
                    let branch = next_branch;
                    next_branch += 1;
                    layout.left[branch] = a as i32;
                    layout.right[branch] = b as i32;
                    layout.parent[a] = branch as i32;
                    layout.parent[b] = branch as i32;
                    let union = layout.aabb(a).union(&layout.aabb(b));
                    layout.set_aabb(branch, &union);
                    parents.push(branch);
                } else {
                    parents.push(pair[0]);
                }
            }
            level = parents;
        }
        layout.root = level.first().map_or(NONE, |&n| n as i32);
        layout.free = (next_branch..node_count).rev().map(|n| n as i32).collect();
        layout
    }

    /// Number of pool slots the layout was built for.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn aabb(&self, node: usize) -> Aabb {
        Aabb::new(
            self.min_x[node],
            self.min_y[node],
            self.max_x[node],
            self.max_y[node],
        )
    }

    fn set_aabb(&mut self, node: usize, aabb: &Aabb) {
        self.min_x[node] = aabb.min_x;
        self.min_y[node] = aabb.min_y;
        self.max_x[node] = aabb.max_x;
        self.max_y[node] = aabb.max_y;
    }
}

/// Fixed-capacity pheromone pool plus its tree, all in flat buffers.
///
/// Slots are ring-allocated: the cursor advances monotonically and the next
/// slot is overwritten regardless of whether its previous marker has fully
/// decayed. Undersized pools therefore degrade by evicting the oldest marker
/// early rather than failing.
#[derive(Debug)]
pub struct FieldIndex {
    capacity: usize,
    lifespan: f32,
    park: Vec2,
    // Marker columns, indexed by slot id.
    pos_x: Vec<f32>,
    pos_y: Vec<f32>,
    strength: Vec<f32>,
    remaining: Vec<f32>,
    kind: Vec<TrailKind>,
    cursor: usize,
    active: Vec<u32>,
    active_slot: Vec<i32>,
    hot_evictions: u64,
    // Tree links and node boxes; nodes `0..capacity` are the leaves.
    parent: Vec<i32>,
    left: Vec<i32>,
    right: Vec<i32>,
    min_x: Vec<f32>,
    min_y: Vec<f32>,
    max_x: Vec<f32>,
    max_y: Vec<f32>,
    root: i32,
    free: Vec<i32>,
    stack: Vec<i32>,
}

impl FieldIndex {
    /// Build a pool of `capacity` slots with the given marker lifespan,
    /// computing the initial layout inline.
    pub fn new(capacity: usize, lifespan: f32, park: Vec2) -> Result<Self, IndexError> {
        if capacity == 0 {
            return Err(IndexError::InvalidConfig("field capacity must be positive"));
        }
        Self::from_layout(FieldLayout::build(capacity, park), lifespan)
    }

    /// Merge a (possibly worker-computed) layout into a ready pool.
    pub fn from_layout(layout: FieldLayout, lifespan: f32) -> Result<Self, IndexError> {
        if layout.capacity == 0 {
            return Err(IndexError::InvalidConfig("field capacity must be positive"));
        }
        if lifespan <= 0.0 {
            return Err(IndexError::InvalidConfig("marker lifespan must be positive"));
        }
        let capacity = layout.capacity;
        Ok(Self {
            capacity,
            lifespan,
            park: layout.park,
            pos_x: vec![layout.park.x; capacity],
            pos_y: vec![layout.park.y; capacity],
            strength: vec![0.0; capacity],
            remaining: vec![0.0; capacity],
            kind: vec![TrailKind::Nest; capacity],
            cursor: 0,
            active: Vec::with_capacity(capacity),
            active_slot: vec![NONE; capacity],
            hot_evictions: 0,
            parent: layout.parent,
            left: layout.left,
            right: layout.right,
            min_x: layout.min_x,
            min_y: layout.min_y,
            max_x: layout.max_x,
            max_y: layout.max_y,
            root: layout.root,
            free: layout.free,
            stack: Vec::new(),
        })
    }

    /// Pool slot count.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured marker lifespan in seconds.
    #[must_use]
    pub const fn lifespan(&self) -> f32 {
        self.lifespan
    }

    /// Number of markers currently alive.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Slot ids of currently alive markers, for render sync.
    #[must_use]
    pub fn active_slots(&self) -> &[u32] {
        &self.active
    }

    /// How many still-alive markers have been overwritten by the ring
    /// cursor; non-zero means the pool is undersized for the current load.
    #[must_use]
    pub const fn hot_evictions(&self) -> u64 {
        self.hot_evictions
    }

    /// Marker world position.
    #[must_use]
    pub fn position(&self, slot: usize) -> Vec2 {
        Vec2::new(self.pos_x[slot], self.pos_y[slot])
    }

    /// Marker trail category.
    #[must_use]
    pub fn kind(&self, slot: usize) -> TrailKind {
        self.kind[slot]
    }

    /// Remaining intensity in `[0, strength]`, linear in remaining life.
    /// Returns zero for expired or never-placed slots.
    #[must_use]
    pub fn alpha(&self, slot: usize) -> f32 {
        if self.active_slot[slot] == NONE {
            return 0.0;
        }
        self.strength[slot] * (self.remaining[slot] / self.lifespan).clamp(0.0, 1.0)
    }

    /// Write a marker into the next ring slot and move its leaf to the new
    /// position. Returns the slot id.
    pub fn place(&mut self, position: Vec2, kind: TrailKind, strength: f32) -> usize {
        let slot = self.cursor;
        self.cursor = (self.cursor + 1) % self.capacity;
        if self.active_slot[slot] != NONE {
            // Ring wrapped onto a live marker: bounded degradation, the
            // oldest marker is evicted early.
            self.hot_evictions += 1;
            self.deactivate(slot);
        }
        self.pos_x[slot] = position.x;
        self.pos_y[slot] = position.y;
        self.strength[slot] = strength;
        self.remaining[slot] = self.lifespan;
        self.kind[slot] = kind;
        self.move_leaf(slot, position);
        self.activate(slot);
        slot
    }

    /// Age every active marker by `dt` seconds; expired markers are parked
    /// back outside world bounds and dropped from the active set.
    pub fn decay(&mut self, dt: f32) {
        for i in (0..self.active.len()).rev() {
            let slot = self.active[i] as usize;
            self.remaining[slot] -= dt;
            if self.remaining[slot] <= 0.0 {
                self.deactivate(slot);
                let park = self.park;
                self.pos_x[slot] = park.x;
                self.pos_y[slot] = park.y;
                self.move_leaf(slot, park);
            }
        }
    }

    /// Probe the field ahead of `position` along `facing` and return the
    /// direction toward the strongest in-range marker of the sought kind, or
    /// the zero vector when none is found.
    pub fn sense(
        &mut self,
        position: Vec2,
        facing: Vec2,
        seeking: TrailKind,
        sensor_radius: f32,
    ) -> Vec2 {
        let probe_center = position + facing * sensor_radius;
        // Transient probe shape; only its AABB and radius are consulted.
        let probe = Shape::circle(ShapeTag::Sensor, probe_center, sensor_radius);
        let query = *probe.aabb();
        let radius_sq = sensor_radius * sensor_radius;

        let mut stack = std::mem::take(&mut self.stack);
        stack.clear();
        if self.root != NONE {
            stack.push(self.root);
        }
        let mut best: Option<(usize, OrderedFloat<f32>)> = None;
        while let Some(node) = stack.pop() {
            let n = node as usize;
            if !self.node_aabb(n).overlaps(&query) {
                continue;
            }
            if self.is_leaf(node) {
                if self.active_slot[n] == NONE || self.kind[n] != seeking {
                    continue;
                }
                if probe_center.distance_sq(self.position(n)) > radius_sq {
                    continue;
                }
                let intensity = OrderedFloat(self.alpha(n));
                if best.is_none_or(|(_, b)| intensity > b) {
                    best = Some((n, intensity));
                }
            } else {
                stack.push(self.left[n]);
                stack.push(self.right[n]);
            }
        }
        self.stack = stack;

        match best {
            Some((slot, _)) => (self.position(slot) - position).normalize_or(Vec2::ZERO),
            None => Vec2::ZERO,
        }
    }

    /// Walk the tree checking union and parent-link invariants; every pool
    /// slot must be reachable exactly once.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.root == NONE {
            return Err(IndexError::Corrupt("field tree has no root"));
        }
        let mut reached = 0usize;
        let mut stack = vec![(self.root, NONE)];
        while let Some((node, parent)) = stack.pop() {
            let n = node as usize;
            if self.parent[n] != parent {
                return Err(IndexError::Corrupt("field parent link mismatch"));
            }
            if self.is_leaf(node) {
                reached += 1;
                continue;
            }
            let union = self
                .node_aabb(self.left[n] as usize)
                .union(&self.node_aabb(self.right[n] as usize));
            if union != self.node_aabb(n) {
                return Err(IndexError::Corrupt("field branch AABB is not its union"));
            }
            stack.push((self.left[n], node));
            stack.push((self.right[n], node));
        }
        if reached != self.capacity {
            return Err(IndexError::Corrupt("unreachable field leaves"));
        }
        Ok(())
    }

    fn is_leaf(&self, node: i32) -> bool {
        (node as usize) < self.capacity
    }

    fn node_aabb(&self, node: usize) -> Aabb {
        Aabb::new(
            self.min_x[node],
            self.min_y[node],
            self.max_x[node],
            self.max_y[node],
        )
    }

    fn set_node_aabb(&mut self, node: usize, aabb: &Aabb) {
        self.min_x[node] = aabb.min_x;
        self.min_y[node] = aabb.min_y;
        self.max_x[node] = aabb.max_x;
        self.max_y[node] = aabb.max_y;
    }

    fn activate(&mut self, slot: usize) {
        debug_assert_eq!(self.active_slot[slot], NONE);
        self.active_slot[slot] = self.active.len() as i32;
        self.active.push(slot as u32);
    }

    fn deactivate(&mut self, slot: usize) {
        let at = self.active_slot[slot];
        debug_assert!(at != NONE);
        self.active.swap_remove(at as usize);
        if let Some(&moved) = self.active.get(at as usize) {
            self.active_slot[moved as usize] = at;
        }
        self.active_slot[slot] = NONE;
    }

    fn move_leaf(&mut self, slot: usize, position: Vec2) {
        self.detach(slot as i32);
        let aabb = Aabb::from_circle(position, MARKER_EXTENT);
        self.set_node_aabb(slot, &aabb);
        self.attach(slot as i32);
    }

    fn refit(&mut self, mut node: i32) {
        while node != NONE {
            let n = node as usize;
            let union = self
                .node_aabb(self.left[n] as usize)
                .union(&self.node_aabb(self.right[n] as usize));
            self.set_node_aabb(n, &union);
            node = self.parent[n];
        }
    }

    fn detach(&mut self, leaf: i32) {
        let parent = self.parent[leaf as usize];
        if parent == NONE {
            debug_assert_eq!(self.root, leaf, "stale field root");
            self.root = NONE;
            return;
        }
        let p = parent as usize;
        let sibling = if self.left[p] == leaf {
            self.right[p]
        } else {
            self.left[p]
        };
        let grandparent = self.parent[p];
        self.parent[sibling as usize] = grandparent;
        if grandparent == NONE {
            self.root = sibling;
        } else {
            let gp = grandparent as usize;
            if self.left[gp] == parent {
                self.left[gp] = sibling;
            } else {
                self.right[gp] = sibling;
            }
            self.refit(grandparent);
        }
        self.free.push(parent);
        self.parent[leaf as usize] = NONE;
    }

    fn attach(&mut self, leaf: i32) {
        if self.root == NONE {
            self.root = leaf;
            self.parent[leaf as usize] = NONE;
            return;
        }
        let leaf_aabb = self.node_aabb(leaf as usize);

        let mut parent = NONE;
        let mut cursor = self.root;
        while !self.is_leaf(cursor) {
            let n = cursor as usize;
            let left = self.left[n];
            let right = self.right[n];
            let left_aabb = self.node_aabb(left as usize);
            let right_aabb = self.node_aabb(right as usize);
            let left_growth = left_aabb.union(&leaf_aabb).area() - left_aabb.area();
            let right_growth = right_aabb.union(&leaf_aabb).area() - right_aabb.area();
            parent = cursor;
            cursor = if left_growth <= right_growth {
                left
            } else {
                right
            };
        }

        let branch = self.free.pop().expect("field branch pool exhausted");
        let b = branch as usize;
        self.left[b] = cursor;
        self.right[b] = leaf;
        self.parent[b] = parent;
        let union = self.node_aabb(cursor as usize).union(&leaf_aabb);
        self.set_node_aabb(b, &union);
        if parent == NONE {
            self.root = branch;
        } else {
            let p = parent as usize;
            if self.left[p] == cursor {
                self.left[p] = branch;
            } else {
                self.right[p] = branch;
            }
        }
        self.parent[cursor as usize] = branch;
        self.parent[leaf as usize] = branch;
        self.refit(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARK: Vec2 = Vec2::new(-1.0e6, -1.0e6);

    fn field(capacity: usize, lifespan: f32) -> FieldIndex {
        FieldIndex::new(capacity, lifespan, PARK).expect("field")
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(matches!(
            FieldIndex::new(0, 1.0, PARK),
            Err(IndexError::InvalidConfig(_))
        ));
        assert!(matches!(
            FieldIndex::new(8, 0.0, PARK),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn layout_merge_matches_inline_build() {
        let layout = FieldLayout::build(16, PARK);
        assert_eq!(layout.capacity(), 16);
        let merged = FieldIndex::from_layout(layout, 5.0).expect("merged");
        assert_eq!(merged.capacity(), 16);
        assert_eq!(merged.active_count(), 0);
        merged.validate().expect("merged tree valid");
    }

    #[test]
    fn intensity_decays_linearly_and_expires() {
        let mut field = field(8, 10.0);
        let slot = field.place(Vec2::new(3.0, 4.0), TrailKind::Food, 0.8);
        assert_eq!(field.active_count(), 1);
        assert!((field.alpha(slot) - 0.8).abs() < 1e-6);

        field.decay(4.0);
        assert!((field.alpha(slot) - 0.8 * 0.6).abs() < 1e-6);

        field.decay(6.0);
        assert_eq!(field.active_count(), 0);
        assert_eq!(field.alpha(slot), 0.0);
        field.validate().expect("tree valid after expiry");
    }

    #[test]
    fn ring_cursor_evicts_oldest_markers() {
        let mut field = field(4, 100.0);
        for i in 0..6 {
            field.place(Vec2::new(i as f32 * 10.0, 0.0), TrailKind::Nest, 1.0);
        }
        assert_eq!(field.active_count(), 4);
        assert_eq!(field.hot_evictions(), 2);
        // Slots 0 and 1 were overwritten by the 5th and 6th markers.
        assert_eq!(field.position(0), Vec2::new(40.0, 0.0));
        assert_eq!(field.position(1), Vec2::new(50.0, 0.0));
        field.validate().expect("tree valid after wrap");
    }

    #[test]
    fn expired_markers_do_not_match_queries() {
        let mut field = field(8, 1.0);
        field.place(Vec2::new(10.0, 0.0), TrailKind::Food, 1.0);
        field.decay(2.0);
        let steer = field.sense(Vec2::ZERO, Vec2::new(1.0, 0.0), TrailKind::Food, 20.0);
        assert_eq!(steer, Vec2::ZERO);
    }

    #[test]
    fn sense_prefers_strongest_matching_marker() {
        let mut field = field(8, 10.0);
        field.place(Vec2::new(20.0, 5.0), TrailKind::Food, 0.3);
        let strong = field.place(Vec2::new(20.0, -5.0), TrailKind::Food, 0.9);
        field.place(Vec2::new(20.0, 0.0), TrailKind::Nest, 1.0);

        let steer = field.sense(Vec2::ZERO, Vec2::new(1.0, 0.0), TrailKind::Food, 25.0);
        let expected = (field.position(strong) - Vec2::ZERO).normalize_or(Vec2::ZERO);
        assert!((steer.x - expected.x).abs() < 1e-6);
        assert!((steer.y - expected.y).abs() < 1e-6);
        assert!(steer.y < 0.0, "must head toward the stronger marker");
    }

    #[test]
    fn sense_ignores_markers_behind_the_probe() {
        let mut field = field(8, 10.0);
        // Marker behind the agent relative to its facing.
        field.place(Vec2::new(-30.0, 0.0), TrailKind::Food, 1.0);
        let steer = field.sense(Vec2::ZERO, Vec2::new(1.0, 0.0), TrailKind::Food, 10.0);
        assert_eq!(steer, Vec2::ZERO);
    }

    #[test]
    fn churn_preserves_tree_invariants() {
        let mut field = field(32, 2.0);
        for step in 0..500usize {
            let x = (step % 37) as f32 * 3.0;
            let y = (step % 23) as f32 * 5.0;
            let kind = if step % 2 == 0 {
                TrailKind::Food
            } else {
                TrailKind::Nest
            };
            field.place(Vec2::new(x, y), kind, 1.0);
            field.decay(0.05);
            if step % 64 == 0 {
                field.validate().expect("invariants during churn");
            }
        }
        field.validate().expect("invariants after churn");
        assert!(field.active_count() <= field.capacity());
    }

    #[test]
    fn single_slot_pool_round_trips() {
        let mut field = field(1, 1.0);
        field.place(Vec2::new(5.0, 5.0), TrailKind::Food, 1.0);
        assert_eq!(field.active_count(), 1);
        field.place(Vec2::new(6.0, 6.0), TrailKind::Food, 1.0);
        assert_eq!(field.active_count(), 1);
        assert_eq!(field.hot_evictions(), 1);
        field.decay(2.0);
        assert_eq!(field.active_count(), 0);
        field.validate().expect("single-slot tree valid");
    }
}
