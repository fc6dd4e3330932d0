//! Perspective-correct scanline rasterization of clipped polygons.
//!
//! A clipped polygon is fanned into triangles around its first vertex. Each triangle gets a
//! double precision barycentric basis and y-sorted edges; every scanline between the lowest and
//! highest vertex is bounded by the long edge and whichever short edge is active, and each pixel
//! center inside those bounds is tested against the basis, depth tested and handed on.
//!
//! Coverage is evaluated at pixel centers. Everything here runs on the calling thread; draws
//! are expected to arrive one after another since blended fragments depend on submission order.

use std::ops::ControlFlow;

use nalgebra::vector;

use crate::clip::{PointList, POINT_LIST_CAPACITY};
use crate::image::Canvas;
use crate::math::{Vec2, Vec3, Vec4};

/// Tolerance of the barycentric inside test and of the depth comparison. Without it pixels on
/// an edge shared by two triangles can be dropped by both.
pub const EPSILON: f64 = 1e-6;

/// Value the depth buffer is cleared to.
pub const FAR_DEPTH: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: usize,
    pub height: usize,
}

impl Viewport {
    pub fn new(width: usize, height: usize) -> Self {
        return Self { width, height };
    }

    pub fn pixel_count(&self) -> usize {
        return self.width * self.height;
    }

    pub fn aspect(&self) -> f32 {
        return self.width as f32 / self.height as f32;
    }

    /// NDC [-1, 1] x [-1, 1] to pixel space with y growing downward. z stays in NDC.
    pub fn to_screen(&self, ndc: Vec3) -> (f64, f64, f64) {
        let x = (ndc.x as f64 + 1.0) * 0.5 * self.width as f64;
        let y = (1.0 - ndc.y as f64) * 0.5 * self.height as f64;
        return (x, y, ndc.z as f64);
    }
}

/// Polygon vertex after the perspective divide and the viewport transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenVertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,     // NDC depth.
    pub inv_w: f64, // 1 / clip-space w, used for perspective correction.
    pub weight: Vec3, // Barycentric coordinate in the unclipped source triangle.
}

impl ScreenVertex {
    pub fn new(x: f64, y: f64, z: f64, inv_w: f64, weight: Vec3) -> Self {
        return Self { x, y, z, inv_w, weight };
    }
}

/// Clipped polygon in device space, ready for fan triangulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenPolygon {
    vertices: [ScreenVertex; POINT_LIST_CAPACITY],
    len: usize,
}

impl ScreenPolygon {
    pub fn new() -> Self {
        return Self::default();
    }

    /// Perspective divide and viewport transform of every clipped vertex.
    pub fn from_clipped(list: &PointList, viewport: Viewport) -> Self {
        let mut polygon = Self::new();
        for (position, weight) in list.positions().iter().zip(list.weights()) {
            let inv_w = 1.0 / position.w;
            let (x, y, z) = viewport.to_screen(position.xyz() * inv_w);
            polygon.push(ScreenVertex::new(x, y, z, inv_w as f64, *weight));
        }
        return polygon;
    }

    pub fn push(&mut self, vertex: ScreenVertex) {
        assert!(self.len < POINT_LIST_CAPACITY, "screen polygon overflow");
        self.vertices[self.len] = vertex;
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        return self.len;
    }

    pub fn is_empty(&self) -> bool {
        return self.len == 0;
    }

    pub fn vertices(&self) -> &[ScreenVertex] {
        return &self.vertices[..self.len];
    }

    /// Shoelace area in pixel space. Since y points down, polygons that are counter-clockwise
    /// in NDC come out negative.
    pub fn signed_area(&self) -> f64 {
        let vertices = self.vertices();
        let mut area = 0.0;
        for i in 0..vertices.len() {
            let p = vertices[i];
            let q = vertices[(i + 1) % vertices.len()];
            area += p.x * q.y - q.x * p.y;
        }
        return 0.5 * area;
    }

    pub fn is_front_facing(&self) -> bool {
        return self.signed_area() < 0.0;
    }

    /// Fan around vertex 0: (0, i - 1, i) for i in [2, len).
    fn fan(&self) -> impl Iterator<Item = (ScreenVertex, ScreenVertex, ScreenVertex)> + '_ {
        let vertices = self.vertices();
        return (2..vertices.len()).map(move |i| (vertices[0], vertices[i - 1], vertices[i]));
    }
}

/// Everything the fragment stage gets to know about a pixel that passed the depth test.
#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub x: usize,
    pub y: usize,
    pub index: usize,      // x + y * width, also the G-buffer slot.
    pub depth: f64,
    pub barycentric: Vec3, // Perspective-correct, relative to the unclipped source triangle.
    pub screen: Vec2,      // Pixel center normalized to [0, 1].
}

/// Raw barycentric inside test. NaN fails every comparison, so a broken basis rejects pixels
/// instead of drawing them.
pub fn is_inside(u: f64, v: f64) -> bool {
    return u >= -EPSILON && v >= -EPSILON && u + v <= 1.0 + EPSILON;
}

/// Depth test against the stored value. NaN depth never passes.
pub fn passes_depth(z: f64, stored: f64) -> bool {
    return z > -1.0 && z < 1.0 && z < stored + EPSILON;
}

/// Per-triangle precomputation: the affine barycentric basis and the y-sorted corners.
struct TriangleSetup {
    a: ScreenVertex,
    b: ScreenVertex,
    c: ScreenVertex,
    edge_b: (f64, f64), // b - a
    edge_c: (f64, f64), // c - a
    inverse: f64,       // 1 / cross(edge_b, edge_c)
    low: (f64, f64),
    mid: (f64, f64),
    high: (f64, f64),
}

impl TriangleSetup {
    /// `None` for zero-area or non-finite triangles, which would otherwise produce a NaN basis.
    fn new(a: ScreenVertex, b: ScreenVertex, c: ScreenVertex) -> Option<Self> {
        let edge_b = (b.x - a.x, b.y - a.y);
        let edge_c = (c.x - a.x, c.y - a.y);
        let determinant = edge_b.0 * edge_c.1 - edge_b.1 * edge_c.0;
        if !determinant.is_finite() || determinant == 0.0 {
            return None;
        }

        let mut corners = [(a.x, a.y), (b.x, b.y), (c.x, c.y)];
        corners.sort_by(|p, q| p.1.total_cmp(&q.1));

        return Some(Self {
            a,
            b,
            c,
            edge_b,
            edge_c,
            inverse: 1.0 / determinant,
            low: corners[0],
            mid: corners[1],
            high: corners[2],
        });
    }

    /// (u, v) such that p = a + v * (b - a) + u * (c - a).
    fn barycentric(&self, px: f64, py: f64) -> (f64, f64) {
        let d = (px - self.a.x, py - self.a.y);
        let v = (d.0 * self.edge_c.1 - d.1 * self.edge_c.0) * self.inverse;
        let u = (self.edge_b.0 * d.1 - self.edge_b.1 * d.0) * self.inverse;
        return (u, v);
    }

    fn depth(&self, u: f64, v: f64) -> f64 {
        return self.a.z * (1.0 - u - v) + self.b.z * v + self.c.z * u;
    }

    /// Affine weights divided by each corner's w, renormalized, then used to mix the corners'
    /// source-triangle coordinates.
    fn source_barycentric(&self, u: f64, v: f64) -> Vec3 {
        let wa = (1.0 - u - v) * self.a.inv_w;
        let wb = v * self.b.inv_w;
        let wc = u * self.c.inv_w;
        let sum = wa + wb + wc;
        let (wa, wb, wc) = ((wa / sum) as f32, (wb / sum) as f32, (wc / sum) as f32);
        return self.a.weight * wa + self.b.weight * wb + self.c.weight * wc;
    }

    /// Left and right x of the triangle on the horizontal line `y`, unordered.
    fn row_span(&self, y: f64) -> (f64, f64) {
        fn edge_x(p: (f64, f64), q: (f64, f64), y: f64) -> f64 {
            let dy = q.1 - p.1;
            if dy == 0.0 {
                return p.0;
            }
            return p.0 + (q.0 - p.0) * (y - p.1) / dy;
        }

        let long = edge_x(self.low, self.high, y);
        let short = if y < self.mid.1 {
            edge_x(self.low, self.mid, y)
        } else {
            edge_x(self.mid, self.high, y)
        };
        return (long, short);
    }

    /// Calls `visit(x, y, u, v)` for every pixel whose center is inside the triangle, stopping
    /// early on `Break`.
    fn scan<F>(&self, viewport: Viewport, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(usize, usize, f64, f64) -> ControlFlow<()>,
    {
        let y_start = self.low.1.floor().max(0.0) as usize;
        let y_end = self.high.1.ceil().min(viewport.height as f64).max(0.0) as usize;
        for y in y_start..y_end {
            let center_y = y as f64 + 0.5;
            let (mut left, mut right) = self.row_span(center_y.clamp(self.low.1, self.high.1));
            if left > right {
                std::mem::swap(&mut left, &mut right);
            }
            let x_start = left.floor().max(0.0) as usize;
            let x_end = right.ceil().min(viewport.width as f64).max(0.0) as usize;
            for x in x_start..x_end {
                let (u, v) = self.barycentric(x as f64 + 0.5, center_y);
                if !is_inside(u, v) {
                    continue;
                }
                if let ControlFlow::Break(()) = visit(x, y, u, v) {
                    return ControlFlow::Break(());
                }
            }
        }
        return ControlFlow::Continue(());
    }
}

fn for_each_triangle<F>(polygon: &ScreenPolygon, mut visit: F) -> ControlFlow<()>
where
    F: FnMut(&TriangleSetup) -> ControlFlow<()>,
{
    for (a, b, c) in polygon.fan() {
        let setup = match TriangleSetup::new(a, b, c) {
            Some(setup) => setup,
            None => continue, // Degenerate, nothing to cover.
        };
        if let ControlFlow::Break(()) = visit(&setup) {
            return ControlFlow::Break(());
        }
    }
    return ControlFlow::Continue(());
}

/// Full shading: depth test, depth write, fragment callback and alpha blend into the canvas.
/// Returns the number of fragments written.
pub fn rasterize<F>(
    polygon: &ScreenPolygon,
    viewport: Viewport,
    depth_buffer: &mut [f64],
    canvas: &mut Canvas,
    mut shade: F,
) -> usize
where
    F: FnMut(&Fragment) -> Vec4,
{
    let mut written = 0;
    let inv_width = 1.0 / viewport.width as f32;
    let inv_height = 1.0 / viewport.height as f32;
    let _ = for_each_triangle(polygon, |setup| {
        return setup.scan(viewport, |x, y, u, v| {
            let index = x + y * viewport.width;
            let z = setup.depth(u, v);
            if !passes_depth(z, depth_buffer[index]) {
                return ControlFlow::Continue(());
            }
            depth_buffer[index] = z;
            let fragment = Fragment {
                x,
                y,
                index,
                depth: z,
                barycentric: setup.source_barycentric(u, v),
                screen: vector![(x as f32 + 0.5) * inv_width, (y as f32 + 0.5) * inv_height],
            };
            let color = shade(&fragment);
            canvas.blend(index, color);
            written += 1;
            return ControlFlow::Continue(());
        });
    });
    return written;
}

/// Depth-only variant for shadow maps and depth pre-passes. Returns the number of depth writes.
pub fn rasterize_depth(polygon: &ScreenPolygon, viewport: Viewport, depth_buffer: &mut [f64]) -> usize {
    let mut written = 0;
    let _ = for_each_triangle(polygon, |setup| {
        return setup.scan(viewport, |x, y, u, v| {
            let index = x + y * viewport.width;
            let z = setup.depth(u, v);
            if passes_depth(z, depth_buffer[index]) {
                depth_buffer[index] = z;
                written += 1;
            }
            return ControlFlow::Continue(());
        });
    });
    return written;
}

/// Occlusion query: true as soon as one pixel would pass the depth test. Writes nothing.
pub fn query_depth(polygon: &ScreenPolygon, viewport: Viewport, depth_buffer: &[f64]) -> bool {
    let flow = for_each_triangle(polygon, |setup| {
        return setup.scan(viewport, |x, y, u, v| {
            let index = x + y * viewport.width;
            if passes_depth(setup.depth(u, v), depth_buffer[index]) {
                return ControlFlow::Break(());
            }
            return ControlFlow::Continue(());
        });
    });
    return flow.is_break();
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: usize = 100;

    fn polygon(points: &[(f64, f64, f64, f64)]) -> ScreenPolygon {
        let weights = [vector![1.0, 0.0, 0.0], vector![0.0, 1.0, 0.0], vector![0.0, 0.0, 1.0]];
        let mut polygon = ScreenPolygon::new();
        for (i, &(x, y, z, w)) in points.iter().enumerate() {
            polygon.push(ScreenVertex::new(x, y, z, 1.0 / w, weights[i % 3]));
        }
        return polygon;
    }

    fn depth_buffer() -> Vec<f64> {
        return vec![FAR_DEPTH; SIZE * SIZE];
    }

    #[test]
    fn covers_only_the_triangle() {
        let viewport = Viewport::new(SIZE, SIZE);
        let mut depth = depth_buffer();
        let triangle = polygon(&[(10.0, 10.0, 0.0, 1.0), (50.0, 10.0, 0.0, 1.0), (10.0, 50.0, 0.0, 1.0)]);
        let written = rasterize_depth(&triangle, viewport, &mut depth);
        assert!(written > 0);

        for y in 0..SIZE {
            for x in 0..SIZE {
                let (cx, cy) = (x as f64 + 0.5, y as f64 + 0.5);
                let covered = depth[x + y * SIZE] < 1.0;
                let inside = cx >= 10.0 && cy >= 10.0 && cx + cy <= 60.0;
                let near_edge = cx + cy > 59.0 && cx + cy < 61.0;
                if !near_edge {
                    assert_eq!(covered, inside, "pixel ({}, {})", x, y);
                }
            }
        }
        assert!(depth[20 + 20 * SIZE] < 1.0);
        assert_eq!(depth[45 + 45 * SIZE], 1.0);
        assert_eq!(depth[5 + 5 * SIZE], 1.0);
    }

    #[test]
    fn centroid_gets_perspective_correct_weights() {
        let viewport = Viewport::new(SIZE, SIZE);
        let mut depth = depth_buffer();
        let mut canvas = Canvas::new(SIZE, SIZE);
        // Centroid lands exactly on the center of pixel (20, 20); the third vertex is twice as far.
        let triangle = polygon(&[(10.5, 10.5, 0.0, 1.0), (40.5, 10.5, 0.0, 1.0), (10.5, 40.5, 0.0, 2.0)]);
        let mut sampled = None;
        rasterize(&triangle, viewport, &mut depth, &mut canvas, |fragment| {
            if fragment.x == 20 && fragment.y == 20 {
                sampled = Some(fragment.barycentric);
            }
            return vector![1.0, 1.0, 1.0, 1.0];
        });

        let sampled = sampled.expect("centroid pixel was not shaded");
        assert!((sampled.x - 0.4).abs() < 1e-4, "{:?}", sampled);
        assert!((sampled.y - 0.4).abs() < 1e-4, "{:?}", sampled);
        assert!((sampled.z - 0.2).abs() < 1e-4, "{:?}", sampled);
    }

    #[test]
    fn second_pass_keeps_depth_but_blends_again() {
        let viewport = Viewport::new(SIZE, SIZE);
        let mut depth = depth_buffer();
        let mut canvas = Canvas::new(SIZE, SIZE);
        canvas.clear(vector![0.0, 0.0, 0.0, 1.0]);
        let triangle = polygon(&[(10.0, 10.0, 0.25, 1.0), (50.0, 10.0, 0.25, 1.0), (10.0, 50.0, 0.25, 1.0)]);
        let red = |_: &Fragment| -> Vec4 { vector![1.0, 0.0, 0.0, 0.5] };

        rasterize(&triangle, viewport, &mut depth, &mut canvas, red);
        let depth_after_first = depth.clone();
        let color_after_first = canvas.pixel(20, 20);
        rasterize(&triangle, viewport, &mut depth, &mut canvas, red);

        assert_eq!(depth, depth_after_first);
        assert!((color_after_first.x - 0.5).abs() < 1e-6);
        assert!((canvas.pixel(20, 20).x - 0.75).abs() < 1e-6);
    }

    #[test]
    fn degenerate_triangle_touches_nothing() {
        let viewport = Viewport::new(SIZE, SIZE);
        let mut depth = depth_buffer();
        let line = polygon(&[(10.0, 10.0, 0.0, 1.0), (30.0, 30.0, 0.0, 1.0), (50.0, 50.0, 0.0, 1.0)]);
        assert_eq!(rasterize_depth(&line, viewport, &mut depth), 0);

        let broken = polygon(&[(f64::NAN, 10.0, 0.0, 1.0), (30.0, 30.0, 0.0, 1.0), (50.0, 10.0, 0.0, 1.0)]);
        assert_eq!(rasterize_depth(&broken, viewport, &mut depth), 0);
        assert!(depth.iter().all(|&z| z == FAR_DEPTH));
    }

    #[test]
    fn depth_outside_ndc_range_is_rejected() {
        let viewport = Viewport::new(SIZE, SIZE);
        let mut depth = depth_buffer();
        let behind = polygon(&[(10.0, 10.0, -1.5, 1.0), (50.0, 10.0, -1.5, 1.0), (10.0, 50.0, -1.5, 1.0)]);
        assert_eq!(rasterize_depth(&behind, viewport, &mut depth), 0);
    }

    #[test]
    fn query_stops_without_writing() {
        let viewport = Viewport::new(SIZE, SIZE);
        let mut depth = depth_buffer();
        let far = polygon(&[(10.0, 10.0, 0.8, 1.0), (50.0, 10.0, 0.8, 1.0), (10.0, 50.0, 0.8, 1.0)]);
        let near = polygon(&[(0.0, 0.0, 0.2, 1.0), (90.0, 0.0, 0.2, 1.0), (0.0, 90.0, 0.2, 1.0)]);

        assert!(query_depth(&far, viewport, &depth));
        assert!(depth.iter().all(|&z| z == FAR_DEPTH));

        rasterize_depth(&near, viewport, &mut depth);
        assert!(!query_depth(&far, viewport, &depth));
    }

    #[test]
    fn quad_fan_covers_both_halves() {
        let viewport = Viewport::new(SIZE, SIZE);
        let mut depth = depth_buffer();
        let mut quad = ScreenPolygon::new();
        for &(x, y) in &[(10.0, 10.0), (60.0, 10.0), (60.0, 60.0), (10.0, 60.0)] {
            quad.push(ScreenVertex::new(x, y, 0.0, 1.0, Vec3::zeros()));
        }
        rasterize_depth(&quad, viewport, &mut depth);
        // Pixels on the shared diagonal are written twice, coverage still counts them once.
        assert_eq!(depth.iter().filter(|&&z| z < FAR_DEPTH).count(), 50 * 50);
    }

    #[test]
    fn winding_follows_ndc_orientation() {
        let viewport = Viewport::new(SIZE, SIZE);
        let list = PointList::triangle(
            vector![-0.5, -0.5, 0.0, 1.0],
            vector![0.5, -0.5, 0.0, 1.0],
            vector![0.0, 0.5, 0.0, 1.0],
        );
        let polygon = ScreenPolygon::from_clipped(&list, viewport);
        assert!(polygon.is_front_facing());
        assert!((polygon.vertices()[2].y - 25.0).abs() < 1e-9);
    }
}
