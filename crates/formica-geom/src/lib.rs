//! Geometry primitives shared across the formica workspace.
//!
//! Shapes carry cached world-space data (points, edges, normals, AABB) and a
//! dirty flag. Mutating setters mark a shape dirty; [`Shape::refresh`]
//! recomputes the caches. Readers assert freshness, so any position/angle/
//! scale mutation must be followed by a refresh before the next query.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

pub mod sat;

/// 2D vector over `f32`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    /// The zero vector.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector for a heading angle in radians.
    #[must_use]
    pub fn from_angle(angle: f32) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    /// Dot product.
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Counter-clockwise perpendicular.
    #[must_use]
    pub const fn perp(self) -> Self {
        Self::new(-self.y, self.x)
    }

    /// Squared length.
    #[must_use]
    pub fn length_sq(self) -> f32 {
        self.dot(self)
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    /// Squared distance to `other`.
    #[must_use]
    pub fn distance_sq(self, other: Self) -> f32 {
        (other - self).length_sq()
    }

    /// Unit vector in this direction, or `fallback` when the length is too
    /// small to normalize. Direction consumers rely on this never producing
    /// a zero vector from a non-zero fallback.
    #[must_use]
    pub fn normalize_or(self, fallback: Self) -> Self {
        let len_sq = self.length_sq();
        if len_sq > f32::EPSILON * f32::EPSILON {
            self * (1.0 / len_sq.sqrt())
        } else {
            fallback
        }
    }

    /// Rotate by `angle` radians.
    #[must_use]
    pub fn rotated(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    /// Component-wise scale.
    #[must_use]
    pub const fn scaled_by(self, scale: Self) -> Self {
        Self::new(self.x * scale.x, self.y * scale.y)
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Aabb {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Aabb {
    /// Construct from explicit bounds.
    #[must_use]
    pub const fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounding box of a circle.
    #[must_use]
    pub fn from_circle(center: Vec2, radius: f32) -> Self {
        Self::new(
            center.x - radius,
            center.y - radius,
            center.x + radius,
            center.y + radius,
        )
    }

    /// Bounding box of a non-empty point set.
    #[must_use]
    pub fn from_points(points: &[Vec2]) -> Self {
        let first = points.first().copied().unwrap_or(Vec2::ZERO);
        let mut aabb = Self::new(first.x, first.y, first.x, first.y);
        for p in &points[1.min(points.len())..] {
            aabb.min_x = aabb.min_x.min(p.x);
            aabb.min_y = aabb.min_y.min(p.y);
            aabb.max_x = aabb.max_x.max(p.x);
            aabb.max_y = aabb.max_y.max(p.y);
        }
        aabb
    }

    /// Smallest box containing both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Whether the boxes overlap (touching counts).
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Whether `other` lies entirely inside `self`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Whether a point lies inside the box.
    #[must_use]
    pub fn contains_point(&self, p: Vec2) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    /// Box area; used as the insertion cost metric.
    #[must_use]
    pub fn area(&self) -> f32 {
        (self.max_x - self.min_x) * (self.max_y - self.min_y)
    }

    /// Box grown by `padding` on every side.
    #[must_use]
    pub fn inflate(&self, padding: f32) -> Self {
        Self::new(
            self.min_x - padding,
            self.min_y - padding,
            self.max_x + padding,
            self.max_y + padding,
        )
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// Body category carried by every shape; collision response dispatches on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ShapeTag {
    Agent,
    Obstacle,
    Nest,
    NestVisibleArea,
    Food,
    PheromoneFood,
    PheromoneNest,
    Sensor,
}

impl ShapeTag {
    /// Whether the tag denotes a pheromone trail marker.
    #[must_use]
    pub const fn is_trail(self) -> bool {
        matches!(self, Self::PheromoneFood | Self::PheromoneNest)
    }
}

/// Geometry payload of a shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShapeKind {
    Circle {
        center: Vec2,
        radius: f32,
        scale: f32,
    },
    Polygon {
        local: Vec<Vec2>,
        position: Vec2,
        angle: f32,
        scale: Vec2,
        #[serde(skip)]
        world: Vec<Vec2>,
        #[serde(skip)]
        edges: Vec<Vec2>,
        #[serde(skip)]
        normals: Vec<Vec2>,
    },
}

/// A collidable body: tag + padding header over a circle or convex polygon
/// payload, with a cached AABB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    tag: ShapeTag,
    padding: f32,
    kind: ShapeKind,
    #[serde(skip)]
    aabb: Aabb,
    #[serde(skip, default = "dirty_default")]
    dirty: bool,
}

fn dirty_default() -> bool {
    true
}

impl Shape {
    /// Construct a circle shape with its caches populated.
    #[must_use]
    pub fn circle(tag: ShapeTag, center: Vec2, radius: f32) -> Self {
        let mut shape = Self {
            tag,
            padding: 0.0,
            kind: ShapeKind::Circle {
                center,
                radius,
                scale: 1.0,
            },
            aabb: Aabb::default(),
            dirty: true,
        };
        shape.refresh();
        shape
    }

    /// Construct a convex polygon shape from local-space points.
    ///
    /// One point is a degenerate point body; two points a segment. Points of
    /// closed polygons may wind either way.
    #[must_use]
    pub fn polygon(tag: ShapeTag, position: Vec2, local: Vec<Vec2>) -> Self {
        assert!(!local.is_empty(), "polygon requires at least one point");
        let mut shape = Self {
            tag,
            padding: 0.0,
            kind: ShapeKind::Polygon {
                local,
                position,
                angle: 0.0,
                scale: Vec2::new(1.0, 1.0),
                world: Vec::new(),
                edges: Vec::new(),
                normals: Vec::new(),
            },
            aabb: Aabb::default(),
            dirty: true,
        };
        shape.refresh();
        shape
    }

    /// Set the AABB inflation the spatial index applies when storing this
    /// shape's fat bounds.
    #[must_use]
    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = padding;
        self
    }

    #[must_use]
    pub const fn tag(&self) -> ShapeTag {
        self.tag
    }

    #[must_use]
    pub const fn padding(&self) -> f32 {
        self.padding
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Cached tight AABB. Must not be read while dirty.
    #[must_use]
    pub fn aabb(&self) -> &Aabb {
        debug_assert!(!self.dirty, "AABB read from a stale shape");
        &self.aabb
    }

    /// Reference position: circle center or polygon transform origin.
    #[must_use]
    pub fn center(&self) -> Vec2 {
        match &self.kind {
            ShapeKind::Circle { center, .. } => *center,
            ShapeKind::Polygon { position, .. } => *position,
        }
    }

    /// Circle view: `(center, effective radius)`, or `None` for polygons.
    #[must_use]
    pub fn as_circle(&self) -> Option<(Vec2, f32)> {
        match &self.kind {
            ShapeKind::Circle {
                center,
                radius,
                scale,
            } => Some((*center, radius * scale)),
            ShapeKind::Polygon { .. } => None,
        }
    }

    /// Move the shape to an absolute position.
    pub fn set_position(&mut self, new_position: Vec2) {
        match &mut self.kind {
            ShapeKind::Circle { center, .. } => *center = new_position,
            ShapeKind::Polygon { position, .. } => *position = new_position,
        }
        self.dirty = true;
    }

    /// Move the shape by a delta.
    pub fn translate(&mut self, delta: Vec2) {
        let target = self.center() + delta;
        self.set_position(target);
    }

    /// Rotate a polygon; a no-op for circles.
    pub fn set_angle(&mut self, new_angle: f32) {
        if let ShapeKind::Polygon { angle, .. } = &mut self.kind {
            *angle = new_angle;
            self.dirty = true;
        }
    }

    /// Current rotation angle (always zero for circles).
    #[must_use]
    pub fn angle(&self) -> f32 {
        match &self.kind {
            ShapeKind::Circle { .. } => 0.0,
            ShapeKind::Polygon { angle, .. } => *angle,
        }
    }

    /// Apply a uniform scale factor.
    pub fn set_scale(&mut self, factor: f32) {
        match &mut self.kind {
            ShapeKind::Circle { scale, .. } => *scale = factor,
            ShapeKind::Polygon { scale, .. } => *scale = Vec2::new(factor, factor),
        }
        self.dirty = true;
    }

    /// World-space points. Circles expose none.
    #[must_use]
    pub fn world_points(&self) -> &[Vec2] {
        debug_assert!(!self.dirty, "world points read from a stale shape");
        match &self.kind {
            ShapeKind::Circle { .. } => &[],
            ShapeKind::Polygon { world, .. } => world,
        }
    }

    /// Unit edge normals. Empty for circles and single points.
    #[must_use]
    pub fn normals(&self) -> &[Vec2] {
        debug_assert!(!self.dirty, "normals read from a stale shape");
        match &self.kind {
            ShapeKind::Circle { .. } => &[],
            ShapeKind::Polygon { normals, .. } => normals,
        }
    }

    /// Convex containment test against the polygon's world points. Circles
    /// and degenerate polygons contain no points.
    #[must_use]
    pub fn contains_point(&self, p: Vec2) -> bool {
        let points = self.world_points();
        if points.len() < 3 {
            return false;
        }
        let mut sign = 0.0f32;
        for i in 0..points.len() {
            let a = points[i];
            let b = points[(i + 1) % points.len()];
            let edge = b - a;
            let cross = edge.x * (p.y - a.y) - edge.y * (p.x - a.x);
            if cross.abs() <= f32::EPSILON {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Recompute cached world coordinates, edges, normals, and AABB.
    pub fn refresh(&mut self) {
        if !self.dirty {
            return;
        }
        match &mut self.kind {
            ShapeKind::Circle {
                center,
                radius,
                scale,
            } => {
                self.aabb = Aabb::from_circle(*center, *radius * *scale);
            }
            ShapeKind::Polygon {
                local,
                position,
                angle,
                scale,
                world,
                edges,
                normals,
            } => {
                world.clear();
                world.extend(
                    local
                        .iter()
                        .map(|p| *position + p.scaled_by(*scale).rotated(*angle)),
                );
                edges.clear();
                normals.clear();
                let n = world.len();
                let edge_count = match n {
                    0 | 1 => 0,
                    2 => 1,
                    _ => n,
                };
                for i in 0..edge_count {
                    let edge = world[(i + 1) % n] - world[i];
                    edges.push(edge);
                    normals.push(edge.perp().normalize_or(Vec2::new(1.0, 0.0)));
                }
                self.aabb = Aabb::from_points(world);
            }
        }
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_or_keeps_fallback_for_zero_input() {
        let fallback = Vec2::new(0.0, -1.0);
        assert_eq!(Vec2::ZERO.normalize_or(fallback), fallback);
        let unit = Vec2::new(3.0, 4.0).normalize_or(fallback);
        assert!((unit.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn aabb_union_and_overlap() {
        let a = Aabb::new(0.0, 0.0, 2.0, 2.0);
        let b = Aabb::new(1.0, 1.0, 3.0, 3.0);
        let c = Aabb::new(5.0, 5.0, 6.0, 6.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        let u = a.union(&b);
        assert_eq!(u, Aabb::new(0.0, 0.0, 3.0, 3.0));
        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert!(!u.contains(&c));
    }

    #[test]
    fn aabb_inflate_grows_every_side() {
        let fat = Aabb::new(-1.0, -1.0, 1.0, 1.0).inflate(0.5);
        assert_eq!(fat, Aabb::new(-1.5, -1.5, 1.5, 1.5));
        assert!(fat.contains(&Aabb::new(-1.0, -1.0, 1.0, 1.0)));
    }

    #[test]
    fn circle_refresh_tracks_scale() {
        let mut shape = Shape::circle(ShapeTag::Food, Vec2::new(10.0, 0.0), 4.0);
        assert_eq!(*shape.aabb(), Aabb::new(6.0, -4.0, 14.0, 4.0));
        shape.set_scale(0.5);
        assert!(shape.is_dirty());
        shape.refresh();
        assert_eq!(*shape.aabb(), Aabb::new(8.0, -2.0, 12.0, 2.0));
        let (center, radius) = shape.as_circle().expect("circle");
        assert_eq!(center, Vec2::new(10.0, 0.0));
        assert!((radius - 2.0).abs() < 1e-6);
    }

    #[test]
    fn polygon_caches_world_points_and_normals() {
        let mut square = Shape::polygon(
            ShapeTag::Obstacle,
            Vec2::new(1.0, 1.0),
            vec![
                Vec2::new(-1.0, -1.0),
                Vec2::new(1.0, -1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(-1.0, 1.0),
            ],
        );
        assert_eq!(square.world_points().len(), 4);
        assert_eq!(square.normals().len(), 4);
        assert_eq!(*square.aabb(), Aabb::new(0.0, 0.0, 2.0, 2.0));
        assert!(square.contains_point(Vec2::new(1.0, 1.0)));
        assert!(!square.contains_point(Vec2::new(3.0, 1.0)));

        square.set_angle(std::f32::consts::FRAC_PI_4);
        square.refresh();
        let half_diag = std::f32::consts::SQRT_2;
        let aabb = *square.aabb();
        assert!((aabb.max_x - (1.0 + half_diag)).abs() < 1e-5);
        assert!((aabb.min_x - (1.0 - half_diag)).abs() < 1e-5);
    }

    #[test]
    fn segment_polygon_has_one_edge() {
        let segment = Shape::polygon(
            ShapeTag::Obstacle,
            Vec2::ZERO,
            vec![Vec2::new(0.0, 0.0), Vec2::new(4.0, 0.0)],
        );
        assert_eq!(segment.normals().len(), 1);
        assert_eq!(segment.normals()[0], Vec2::new(0.0, 1.0));
    }

    #[test]
    fn translate_marks_dirty_until_refresh() {
        let mut shape = Shape::circle(ShapeTag::Agent, Vec2::ZERO, 1.0);
        shape.translate(Vec2::new(2.0, 0.0));
        assert!(shape.is_dirty());
        shape.refresh();
        assert_eq!(shape.center(), Vec2::new(2.0, 0.0));
        assert_eq!(*shape.aabb(), Aabb::new(1.0, -1.0, 3.0, 1.0));
    }

    #[test]
    fn tag_serde_round_trip() {
        let json = serde_json::to_string(&ShapeTag::NestVisibleArea).expect("serialize");
        let tag: ShapeTag = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(tag, ShapeTag::NestVisibleArea);
        assert!(ShapeTag::PheromoneFood.is_trail());
        assert!(!ShapeTag::Agent.is_trail());
    }
}
