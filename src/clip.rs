//! Homogeneous clipping of triangles against the near and far planes.
//!
//! Clipping happens in clip space, before the perspective divide, and tests the `w` component
//! against the plane distance: with the projection from [`crate::math::perspective`] a vertex
//! sits on the near plane exactly when `w == znear`.

use nalgebra::vector;

use crate::math::{Vec3, Vec4};

/// Near clipping can add one vertex to a triangle and far clipping one more.
pub const POINT_LIST_CAPACITY: usize = 5;

/// Which side of a clip plane survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepSide {
    Beyond, // w > plane, used for the near plane.
    Before, // w < plane, used for the far plane.
}

impl KeepSide {
    fn sign(self) -> f32 {
        return match self {
            KeepSide::Beyond => 1.0,
            KeepSide::Before => -1.0,
        };
    }

    /// Non-finite `w` counts as outside.
    fn is_inside(self, w: f32, plane: f32) -> bool {
        return w.is_finite() && self.sign() * (w - plane) > 0.0;
    }
}

/// Polygon in clip space together with the barycentric coordinates of every vertex relative to
/// the triangle it was clipped from.
#[derive(Debug, Clone, Copy)]
pub struct PointList {
    positions: [Vec4; POINT_LIST_CAPACITY],
    weights: [Vec3; POINT_LIST_CAPACITY], // Barycentric coordinates in the source triangle.
    len: usize,
}

impl Default for PointList {
    fn default() -> Self {
        return Self {
            positions: [Vec4::zeros(); POINT_LIST_CAPACITY],
            weights: [Vec3::zeros(); POINT_LIST_CAPACITY],
            len: 0,
        };
    }
}

impl PointList {
    pub fn new() -> Self {
        return Self::default();
    }

    /// Starting point of the pipeline: the three vertices of a triangle, each with the unit
    /// barycentric coordinate of its corner.
    pub fn triangle(a: Vec4, b: Vec4, c: Vec4) -> Self {
        let mut list = Self::new();
        list.add_point(a, vector![1.0, 0.0, 0.0]);
        list.add_point(b, vector![0.0, 1.0, 0.0]);
        list.add_point(c, vector![0.0, 0.0, 1.0]);
        return list;
    }

    /// Appends a vertex. Panics past [`POINT_LIST_CAPACITY`], which the near-then-far clipping
    /// of a triangle never reaches.
    pub fn add_point(&mut self, position: Vec4, weight: Vec3) {
        assert!(self.len < POINT_LIST_CAPACITY, "point list overflow");
        self.positions[self.len] = position;
        self.weights[self.len] = weight;
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        return self.len;
    }

    pub fn is_empty(&self) -> bool {
        return self.len == 0;
    }

    /// Fan triangulation needs at least three vertices.
    pub fn is_drawable(&self) -> bool {
        return self.len >= 3;
    }

    pub fn position(&self, index: usize) -> Vec4 {
        return self.positions[..self.len][index];
    }

    pub fn weight(&self, index: usize) -> Vec3 {
        return self.weights[..self.len][index];
    }

    pub fn positions(&self) -> &[Vec4] {
        return &self.positions[..self.len];
    }

    pub fn weights(&self) -> &[Vec3] {
        return &self.weights[..self.len];
    }
}

/// Point where the edge (p1, p2) crosses the plane, found by weighting each end with the other
/// end's distance to the plane. Positions and barycentric weights are interpolated alike.
pub fn intersect(p1: Vec4, weight1: Vec3, p2: Vec4, weight2: Vec3, plane: f32) -> (Vec4, Vec3) {
    let distance1 = (p1.w - plane).abs();
    let distance2 = (p2.w - plane).abs();
    let total = distance1 + distance2;
    let position = (p1 * distance2 + p2 * distance1) / total;
    let weight = (weight1 * distance2 + weight2 * distance1) / total;
    return (position, weight);
}

/// Clips a convex polygon against a single plane. Edges are walked as (previous, current) so a
/// polygon that lies entirely inside comes out unchanged and in the same order.
///
/// `w` is affine over a convex polygon, so the inside vertices form one run and the walk sees
/// at most two inside/outside transitions: the output has at most one vertex more than the
/// input. Non-finite `w` counts as outside and never enters the output, which keeps near then
/// far clipping of a triangle within [`POINT_LIST_CAPACITY`].
pub fn clip_polygon(input: &PointList, plane: f32, keep: KeepSide) -> PointList {
    let mut output = PointList::new();
    let n = input.len();
    for i in 0..n {
        let prev = (i + n - 1) % n;
        let (p1, weight1) = (input.position(prev), input.weight(prev));
        let (p2, weight2) = (input.position(i), input.weight(i));
        let inside1 = keep.is_inside(p1.w, plane);
        let inside2 = keep.is_inside(p2.w, plane);

        match (inside1, inside2) {
            (false, false) => {}
            (true, true) => output.add_point(p2, weight2),
            (true, false) => {
                let (position, weight) = intersect(p1, weight1, p2, weight2, plane);
                output.add_point(position, weight);
            }
            (false, true) => {
                let (position, weight) = intersect(p1, weight1, p2, weight2, plane);
                output.add_point(position, weight);
                output.add_point(p2, weight2);
            }
        }
    }
    return output;
}

pub fn clip_near(input: &PointList, znear: f32) -> PointList {
    return clip_polygon(input, znear, KeepSide::Beyond);
}

pub fn clip_far(input: &PointList, zfar: f32) -> PointList {
    return clip_polygon(input, zfar, KeepSide::Before);
}

/// Near plane first, then far plane. The result holds 0 to 5 vertices.
pub fn clip_triangle(triangle: &PointList, znear: f32, zfar: f32) -> PointList {
    return clip_far(&clip_near(triangle, znear), zfar);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, epsilon: f32) -> bool {
        return (a - b).abs() < epsilon;
    }

    #[test]
    fn inside_triangle_is_unchanged() {
        let a = vector![0.0, 0.0, 0.5, 1.0];
        let b = vector![1.0, 0.0, 0.5, 2.0];
        let c = vector![0.0, 1.0, 0.5, 3.0];
        let list = PointList::triangle(a, b, c);
        let clipped = clip_triangle(&list, 0.1, 100.0);

        assert_eq!(clipped.len(), 3);
        assert_eq!(clipped.positions(), list.positions());
        assert_eq!(clipped.weights(), list.weights());
    }

    #[test]
    fn triangle_behind_near_plane_is_empty() {
        let list = PointList::triangle(
            vector![0.0, 0.0, -1.0, -1.0],
            vector![1.0, 0.0, -1.0, 0.05],
            vector![0.0, 1.0, -1.0, -3.0],
        );
        assert!(clip_near(&list, 0.1).is_empty());
    }

    #[test]
    fn triangle_past_far_plane_is_empty() {
        let list = PointList::triangle(
            vector![0.0, 0.0, 1.0, 11.0],
            vector![1.0, 0.0, 1.0, 12.0],
            vector![0.0, 1.0, 1.0, 10.0],
        );
        let clipped = clip_triangle(&list, 0.1, 10.0);
        assert!(clipped.is_empty());
        assert!(!clipped.is_drawable());
    }

    #[test]
    fn intersection_is_midpoint_for_symmetric_edge() {
        let (position, weight) = intersect(
            vector![2.0, 4.0, 1.0, 1.0],
            vector![1.0, 0.0, 0.0],
            vector![0.0, 0.0, -1.0, -1.0],
            vector![0.0, 1.0, 0.0],
            0.0,
        );
        assert!(approx_eq(position.x, 1.0, 1e-5));
        assert!(approx_eq(position.y, 2.0, 1e-5));
        assert!(approx_eq(position.z, 0.0, 1e-5));
        assert!(approx_eq(position.w, 0.0, 1e-5));
        assert!(approx_eq(weight.x, 0.5, 1e-5) && approx_eq(weight.y, 0.5, 1e-5));
    }

    #[test]
    fn one_vertex_behind_near_plane_gives_quad() {
        let list = PointList::triangle(
            vector![0.0, 0.0, -10.0, -5.0],
            vector![1.0, 0.0, 0.5, 1.0],
            vector![0.0, 1.0, 0.5, 2.0],
        );
        let clipped = clip_near(&list, 0.1);
        assert_eq!(clipped.len(), 4);

        // Two new vertices sit exactly on the plane, the originals survive untouched.
        let on_plane = clipped.positions().iter().filter(|p| approx_eq(p.w, 0.1, 1e-5)).count();
        assert_eq!(on_plane, 2);
        assert!(clipped.positions().contains(&list.position(1)));
        assert!(clipped.positions().contains(&list.position(2)));
        for weight in clipped.weights() {
            assert!(approx_eq(weight.sum(), 1.0, 1e-5));
        }
    }

    #[test]
    fn near_and_far_clipping_gives_pentagon() {
        let list = PointList::triangle(
            vector![0.0, 0.0, 0.0, -1.0],
            vector![1.0, 0.0, 0.0, 5.0],
            vector![0.0, 1.0, 0.0, 20.0],
        );
        let clipped = clip_triangle(&list, 0.1, 10.0);
        assert_eq!(clipped.len(), 5);
        for position in clipped.positions() {
            assert!(position.w > 0.1 - 1e-5 && position.w < 10.0 + 1e-5);
        }
    }

    #[test]
    fn nan_vertices_are_outside() {
        let list = PointList::triangle(
            vector![0.0, 0.0, 0.0, f32::NAN],
            vector![1.0, 0.0, 0.0, f32::NAN],
            vector![0.0, 1.0, 0.0, f32::NAN],
        );
        assert!(clip_near(&list, 0.1).is_empty());
    }

    #[test]
    fn infinite_vertex_is_clipped_away() {
        let list = PointList::triangle(
            vector![0.0, 0.0, 0.0, 1.0],
            vector![1.0, 0.0, 0.0, f32::INFINITY],
            vector![0.0, 1.0, 0.0, 1.0],
        );
        let near = clip_near(&list, 0.1);
        assert_eq!(near.len(), 4);
        assert!(near.positions().iter().all(|p| !p.w.is_infinite()));
        assert_eq!(near.positions().iter().filter(|p| p.w == 1.0).count(), 2);

        let clipped = clip_triangle(&list, 0.1, 100.0);
        assert!(clipped.len() <= POINT_LIST_CAPACITY);
        assert!(clipped.positions().iter().all(|p| !p.w.is_infinite()));
    }
}
