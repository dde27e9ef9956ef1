//! Narrow-phase overlap tests: circle/circle, circle/polygon, and
//! polygon/polygon via the separating-axis theorem.
//!
//! Every test reports the signed minimal overlap and a unit resolution axis
//! pointing from `a` toward `b`, so callers resolve with
//! `a.position -= overlap * axis`. A cheap AABB check runs before any exact
//! geometry.

use crate::{Shape, Vec2};

/// Result buffer for a narrow-phase test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Penetration depth along `axis`.
    pub overlap: f32,
    /// Unit resolution axis pointing from `a` toward `b`.
    pub axis: Vec2,
    /// `a` lies entirely inside `b`.
    pub a_in_b: bool,
    /// `b` lies entirely inside `a`.
    pub b_in_a: bool,
}

impl Default for Contact {
    fn default() -> Self {
        Self {
            overlap: 0.0,
            axis: Vec2::new(1.0, 0.0),
            a_in_b: false,
            b_in_a: false,
        }
    }
}

/// Exact overlap test between two refreshed shapes.
///
/// Returns `true` when the shapes overlap; `out`, when provided, receives the
/// contact data for the colliding case and is left untouched otherwise.
pub fn test(a: &Shape, b: &Shape, out: Option<&mut Contact>) -> bool {
    debug_assert!(
        !a.is_dirty() && !b.is_dirty(),
        "narrow-phase requires refreshed shapes"
    );
    if !a.aabb().overlaps(b.aabb()) {
        return false;
    }

    let mut contact = Contact::default();
    let hit = match (a.as_circle(), b.as_circle()) {
        (Some((ca, ra)), Some((cb, rb))) => circle_circle(ca, ra, cb, rb, &mut contact),
        (Some((ca, ra)), None) => circle_polygon(ca, ra, b, false, &mut contact),
        (None, Some((cb, rb))) => circle_polygon(cb, rb, a, true, &mut contact),
        (None, None) => polygon_polygon(a, b, &mut contact),
    };
    if hit {
        if let Some(out) = out {
            *out = contact;
        }
    }
    hit
}

fn circle_circle(ca: Vec2, ra: f32, cb: Vec2, rb: f32, contact: &mut Contact) -> bool {
    let delta = cb - ca;
    let radius_sum = ra + rb;
    let dist_sq = delta.length_sq();
    if dist_sq > radius_sum * radius_sum {
        return false;
    }
    let dist = dist_sq.sqrt();
    if dist > 0.0 {
        contact.axis = delta * (1.0 / dist);
        contact.overlap = radius_sum - dist;
    } else {
        // Coincident centers: resolve along +x by convention.
        contact.axis = Vec2::new(1.0, 0.0);
        contact.overlap = radius_sum;
    }
    contact.a_in_b = dist + ra <= rb;
    contact.b_in_a = dist + rb <= ra;
    true
}

/// Closest point on the segment `p..q` to `point`, via clamped projection.
/// The clamp is what makes the vertex regions fall out correctly.
fn closest_on_segment(point: Vec2, p: Vec2, q: Vec2) -> Vec2 {
    let seg = q - p;
    let len_sq = seg.length_sq();
    if len_sq <= f32::EPSILON {
        return p;
    }
    let t = ((point - p).dot(seg) / len_sq).clamp(0.0, 1.0);
    p + seg * t
}

fn circle_polygon(
    center: Vec2,
    radius: f32,
    poly: &Shape,
    flipped: bool,
    contact: &mut Contact,
) -> bool {
    let points = poly.world_points();
    let hit = if points.len() == 1 {
        circle_circle(center, radius, points[0], 0.0, contact)
    } else {
        circle_polygon_boundary(center, radius, poly, points, contact)
    };
    if hit && flipped {
        contact.axis = -contact.axis;
        std::mem::swap(&mut contact.a_in_b, &mut contact.b_in_a);
    }
    hit
}

fn circle_polygon_boundary(
    center: Vec2,
    radius: f32,
    poly: &Shape,
    points: &[Vec2],
    contact: &mut Contact,
) -> bool {
    let n = points.len();
    let segment_count = if n == 2 { 1 } else { n };
    let mut best_dist_sq = f32::INFINITY;
    let mut best = points[0];
    for i in 0..segment_count {
        let candidate = closest_on_segment(center, points[i], points[(i + 1) % n]);
        let dist_sq = center.distance_sq(candidate);
        if dist_sq < best_dist_sq {
            best_dist_sq = dist_sq;
            best = candidate;
        }
    }

    let boundary_dist = best_dist_sq.sqrt();
    if poly.contains_point(center) {
        // Center inside: push the circle out through the nearest boundary
        // point. The axis points a->b, i.e. deeper into the polygon.
        contact.overlap = radius + boundary_dist;
        contact.axis = (center - best).normalize_or(Vec2::new(1.0, 0.0));
        contact.a_in_b = boundary_dist >= radius;
    } else {
        if boundary_dist > radius {
            return false;
        }
        contact.overlap = radius - boundary_dist;
        contact.axis = (best - center).normalize_or(Vec2::new(1.0, 0.0));
        contact.a_in_b = false;
    }
    contact.b_in_a = points
        .iter()
        .all(|p| center.distance_sq(*p) <= radius * radius);
    true
}

fn centroid(points: &[Vec2]) -> Vec2 {
    let sum = points.iter().fold(Vec2::ZERO, |acc, p| acc + *p);
    sum * (1.0 / points.len() as f32)
}

fn project(points: &[Vec2], axis: Vec2) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for p in points {
        let d = p.dot(axis);
        min = min.min(d);
        max = max.max(d);
    }
    (min, max)
}

/// Segment end "faces" have the edge direction as their normal; closed
/// polygons and points contribute nothing extra.
fn segment_axis(shape: &Shape) -> Option<Vec2> {
    let points = shape.world_points();
    if points.len() == 2 {
        Some((points[1] - points[0]).normalize_or(Vec2::new(1.0, 0.0)))
    } else {
        None
    }
}

fn polygon_polygon(a: &Shape, b: &Shape, contact: &mut Contact) -> bool {
    let pa = a.world_points();
    let pb = b.world_points();

    if pa.len() == 1 && pb.len() == 1 {
        // Two point bodies collide only on exact coordinate equality.
        if pa[0] == pb[0] {
            contact.overlap = 0.0;
            contact.axis = Vec2::new(1.0, 0.0);
            contact.a_in_b = true;
            contact.b_in_a = true;
            return true;
        }
        return false;
    }

    let mut best_overlap = f32::INFINITY;
    let mut best_axis = Vec2::new(1.0, 0.0);
    let mut a_in_b = true;
    let mut b_in_a = true;

    let axes = a
        .normals()
        .iter()
        .chain(b.normals().iter())
        .copied()
        .chain(segment_axis(a))
        .chain(segment_axis(b));
    for axis in axes {
        let (min_a, max_a) = project(pa, axis);
        let (min_b, max_b) = project(pb, axis);
        if max_a < min_b || max_b < min_a {
            return false;
        }
        let mut overlap = max_a.min(max_b) - min_a.max(min_b);
        let a_within = min_a >= min_b && max_a <= max_b;
        let b_within = min_b >= min_a && max_b <= max_a;
        if a_within || b_within {
            // One projection contains the other: the minimal translation
            // along this axis also has to clear the shorter interval.
            overlap += (min_a - min_b).abs().min((max_a - max_b).abs());
        }
        if !a_within {
            a_in_b = false;
        }
        if !b_within {
            b_in_a = false;
        }
        if overlap < best_overlap {
            best_overlap = overlap;
            best_axis = axis;
        }
    }

    if best_axis.dot(centroid(pb) - centroid(pa)) < 0.0 {
        best_axis = -best_axis;
    }
    contact.overlap = best_overlap;
    contact.axis = best_axis;
    contact.a_in_b = a_in_b;
    contact.b_in_a = b_in_a;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShapeTag;

    fn circle(center: Vec2, radius: f32) -> Shape {
        Shape::circle(ShapeTag::Agent, center, radius)
    }

    fn square(center: Vec2, half: f32) -> Shape {
        Shape::polygon(
            ShapeTag::Obstacle,
            center,
            vec![
                Vec2::new(-half, -half),
                Vec2::new(half, -half),
                Vec2::new(half, half),
                Vec2::new(-half, half),
            ],
        )
    }

    #[test]
    fn circles_report_overlap_and_direction() {
        let a = circle(Vec2::ZERO, 5.0);
        let b = circle(Vec2::new(8.0, 0.0), 5.0);
        let mut contact = Contact::default();
        assert!(test(&a, &b, Some(&mut contact)));
        assert!((contact.overlap - 2.0).abs() < 1e-6);
        assert!((contact.axis.x - 1.0).abs() < 1e-6);
        assert!(contact.axis.y.abs() < 1e-6);
        assert!(!contact.a_in_b);
        assert!(!contact.b_in_a);
    }

    #[test]
    fn separated_circles_do_not_collide() {
        let a = circle(Vec2::ZERO, 5.0);
        let b = circle(Vec2::new(11.0, 0.0), 5.0);
        assert!(!test(&a, &b, None));
    }

    #[test]
    fn contained_circle_sets_containment_flag() {
        let a = circle(Vec2::new(1.0, 0.0), 1.0);
        let b = circle(Vec2::ZERO, 5.0);
        let mut contact = Contact::default();
        assert!(test(&a, &b, Some(&mut contact)));
        assert!(contact.a_in_b);
        assert!(!contact.b_in_a);
    }

    #[test]
    fn coincident_circles_resolve_along_x() {
        let a = circle(Vec2::ZERO, 2.0);
        let b = circle(Vec2::ZERO, 3.0);
        let mut contact = Contact::default();
        assert!(test(&a, &b, Some(&mut contact)));
        assert_eq!(contact.axis, Vec2::new(1.0, 0.0));
        assert!((contact.overlap - 5.0).abs() < 1e-6);
        assert!(contact.a_in_b);
    }

    #[test]
    fn circle_touching_polygon_face() {
        let c = circle(Vec2::new(0.0, 2.5), 1.0);
        let p = square(Vec2::ZERO, 2.0);
        let mut contact = Contact::default();
        assert!(test(&c, &p, Some(&mut contact)));
        assert!((contact.overlap - 0.5).abs() < 1e-5);
        // The circle sits above the square; resolution pushes it further up.
        assert!((contact.axis.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn circle_near_polygon_vertex_uses_vertex_distance() {
        // Closest feature is the corner (2, 2).
        let c = circle(Vec2::new(3.0, 3.0), 1.0);
        let p = square(Vec2::ZERO, 2.0);
        assert!(!test(&c, &p, None), "corner distance sqrt(2) > 1");

        let closer = circle(Vec2::new(2.5, 2.5), 1.0);
        let mut contact = Contact::default();
        assert!(test(&closer, &p, Some(&mut contact)));
        let expected = 1.0 - std::f32::consts::SQRT_2 * 0.5;
        assert!((contact.overlap - expected).abs() < 1e-5);
        let diag = std::f32::consts::FRAC_1_SQRT_2;
        assert!((contact.axis.x + diag).abs() < 1e-5);
        assert!((contact.axis.y + diag).abs() < 1e-5);
    }

    #[test]
    fn circle_center_inside_polygon_pushes_out() {
        let c = circle(Vec2::new(0.0, 1.5), 0.5);
        let p = square(Vec2::ZERO, 2.0);
        let mut contact = Contact::default();
        assert!(test(&c, &p, Some(&mut contact)));
        // Nearest face is the top (y = 2), half a unit away.
        assert!((contact.overlap - 1.0).abs() < 1e-5);
        assert!((contact.axis.y + 1.0).abs() < 1e-5);
        // Applying position -= overlap * axis exits the polygon.
        let resolved = Vec2::new(0.0, 1.5) - contact.axis * contact.overlap;
        assert!((resolved.y - 2.5).abs() < 1e-5);
    }

    #[test]
    fn disjoint_squares_are_separated() {
        let a = square(Vec2::ZERO, 1.0);
        let b = square(Vec2::new(5.0, 0.0), 1.0);
        assert!(!test(&a, &b, None));
    }

    #[test]
    fn overlapping_squares_use_minimal_penetration_axis() {
        let a = square(Vec2::ZERO, 1.0);
        let b = square(Vec2::new(1.5, 0.25), 1.0);
        let mut contact = Contact::default();
        assert!(test(&a, &b, Some(&mut contact)));
        // Deeper on y, so the minimal axis is x, oriented a->b.
        assert!((contact.overlap - 0.5).abs() < 1e-5);
        assert!((contact.axis.x - 1.0).abs() < 1e-5);
        assert!(contact.axis.y.abs() < 1e-5);
        assert!(!contact.a_in_b);
        assert!(!contact.b_in_a);
    }

    #[test]
    fn nested_squares_report_containment() {
        let inner = square(Vec2::new(0.1, 0.0), 0.5);
        let outer = square(Vec2::ZERO, 3.0);
        let mut contact = Contact::default();
        assert!(test(&inner, &outer, Some(&mut contact)));
        assert!(contact.a_in_b);
        assert!(!contact.b_in_a);
    }

    #[test]
    fn segment_collides_with_square_through_end_axis() {
        let seg = Shape::polygon(
            ShapeTag::Obstacle,
            Vec2::ZERO,
            vec![Vec2::new(-3.0, 0.0), Vec2::new(3.0, 0.0)],
        );
        let hit = square(Vec2::new(2.0, 0.5), 1.0);
        assert!(test(&seg, &hit, None));
        let miss = square(Vec2::new(5.0, 0.0), 1.0);
        assert!(!test(&seg, &miss, None));
    }

    #[test]
    fn point_bodies_use_coordinate_equality() {
        let p1 = Shape::polygon(ShapeTag::Sensor, Vec2::ZERO, vec![Vec2::new(1.0, 1.0)]);
        let p2 = Shape::polygon(ShapeTag::Sensor, Vec2::ZERO, vec![Vec2::new(1.0, 1.0)]);
        let p3 = Shape::polygon(ShapeTag::Sensor, Vec2::ZERO, vec![Vec2::new(1.0, 1.01)]);
        let mut contact = Contact::default();
        assert!(test(&p1, &p2, Some(&mut contact)));
        assert!(contact.a_in_b && contact.b_in_a);
        assert!(!test(&p1, &p3, None));
    }

    #[test]
    fn point_inside_square_collides() {
        let point = Shape::polygon(ShapeTag::Sensor, Vec2::ZERO, vec![Vec2::new(0.25, 0.0)]);
        let sq = square(Vec2::ZERO, 1.0);
        let mut contact = Contact::default();
        assert!(test(&point, &sq, Some(&mut contact)));
        assert!(contact.overlap > 0.0);
    }

    #[test]
    fn flipped_circle_polygon_negates_axis() {
        let c = circle(Vec2::new(0.0, 2.5), 1.0);
        let p = square(Vec2::ZERO, 2.0);
        let mut forward = Contact::default();
        let mut flipped = Contact::default();
        assert!(test(&c, &p, Some(&mut forward)));
        assert!(test(&p, &c, Some(&mut flipped)));
        assert!((forward.overlap - flipped.overlap).abs() < 1e-6);
        assert_eq!(forward.axis, -flipped.axis);
    }
}
