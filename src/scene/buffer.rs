//! Per-frame render targets: depth buffer, color canvas, optional G-buffer and the shadow map
//! produced by a depth-only pass from the light.

use log::{debug, warn};
use nalgebra::vector;

use crate::image::Canvas;
use crate::math::{Mat4, Vec3, Vec4};
use crate::raster::{Viewport, EPSILON, FAR_DEPTH};

use super::Camera;

/// Surface attributes written by the fragment stage for deferred lighting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GBufferTexel {
    pub normal: Vec3,         // World space, unit length.
    pub specular: Vec3,       // Already lit specular contribution.
    pub irradiance: Vec3,     // Light reaching the surface, multiplied with albedo on resolve.
    pub world_position: Vec3,
    pub covered: bool,        // False until a fragment lands on this pixel.
}

/// One [`GBufferTexel`] per pixel, same layout as the depth buffer.
#[derive(Debug, Clone, Default)]
pub struct GBuffer {
    texels: Vec<GBufferTexel>,
}

impl GBuffer {
    pub fn new(pixel_count: usize) -> Self {
        return Self {
            texels: vec![GBufferTexel::default(); pixel_count],
        };
    }

    pub fn resize(&mut self, pixel_count: usize) {
        if self.texels.len() != pixel_count {
            self.texels = vec![GBufferTexel::default(); pixel_count];
        }
    }

    pub fn clear(&mut self) {
        self.texels.fill(GBufferTexel::default());
    }

    pub fn texels(&self) -> &[GBufferTexel] {
        return &self.texels[..];
    }

    pub fn texel(&self, index: usize) -> &GBufferTexel {
        return &self.texels[index];
    }

    pub fn texel_mut(&mut self, index: usize) -> &mut GBufferTexel {
        return &mut self.texels[index];
    }
}

/// Counters collected between `begin_frame` and `end_frame`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub triangles: usize,  // Submitted to the vertex stage.
    pub clipped: usize,    // Fully removed by the near/far planes.
    pub culled: usize,     // Removed by back-face culling.
    pub rasterized: usize, // Reached the rasterizer.
    pub fragments: usize,  // Depth writes.
}

/// Everything one frame draws into. Replaces the global depth buffer and canvas: all draws of a
/// frame receive the same context, and `begin_frame` resets it.
#[derive(Debug, Clone)]
pub struct FrameContext {
    viewport: Viewport,
    depth: Vec<f64>,
    canvas: Canvas,
    gbuffer: Option<GBuffer>,
    stats: FrameStats,
    in_frame: bool,
    pub clear_color: Vec4,
}

impl FrameContext {
    pub fn new(viewport: Viewport) -> Self {
        return Self {
            viewport,
            depth: vec![FAR_DEPTH; viewport.pixel_count()],
            canvas: Canvas::new(viewport.width, viewport.height),
            gbuffer: None,
            stats: FrameStats::default(),
            in_frame: false,
            clear_color: vector![0.0, 0.0, 0.0, 1.0],
        };
    }

    /// Enables the G-buffer, shaders that know about it will fill it instead of lighting in place.
    pub fn with_gbuffer(mut self) -> Self {
        self.gbuffer = Some(GBuffer::new(self.viewport.pixel_count()));
        return self;
    }

    /// Resizes the targets when the viewport changed, then clears depth to the far value, the
    /// canvas to `clear_color` and the G-buffer to uncovered texels.
    pub fn begin_frame(&mut self, viewport: Viewport) {
        if self.in_frame {
            warn!("begin_frame called twice without end_frame, previous frame is discarded");
        }
        if viewport != self.viewport {
            debug!("Resizing frame targets to {}x{}", viewport.width, viewport.height);
            self.viewport = viewport;
            self.depth = vec![FAR_DEPTH; viewport.pixel_count()];
        }
        self.depth.fill(FAR_DEPTH);
        self.canvas.resize(viewport.width, viewport.height);
        self.canvas.clear(self.clear_color);
        if let Some(gbuffer) = self.gbuffer.as_mut() {
            gbuffer.resize(viewport.pixel_count());
            gbuffer.clear();
        }
        self.stats = FrameStats::default();
        self.in_frame = true;
    }

    pub fn end_frame(&mut self) -> FrameStats {
        if !self.in_frame {
            warn!("end_frame called without begin_frame");
        }
        self.in_frame = false;
        debug!(
            "Frame done: {} triangles, {} clipped, {} culled, {} rasterized, {} fragments",
            self.stats.triangles,
            self.stats.clipped,
            self.stats.culled,
            self.stats.rasterized,
            self.stats.fragments
        );
        return self.stats;
    }

    pub fn viewport(&self) -> Viewport {
        return self.viewport;
    }

    pub fn depth(&self) -> &[f64] {
        return &self.depth[..];
    }

    pub fn canvas(&self) -> &Canvas {
        return &self.canvas;
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        return &mut self.canvas;
    }

    pub fn gbuffer(&self) -> Option<&GBuffer> {
        return self.gbuffer.as_ref();
    }

    pub fn stats(&self) -> FrameStats {
        return self.stats;
    }

    /// Canvas and G-buffer borrowed together, for the deferred resolve.
    pub fn canvas_and_gbuffer(&mut self) -> (&mut Canvas, Option<&GBuffer>) {
        return (&mut self.canvas, self.gbuffer.as_ref());
    }

    /// Split borrow of all targets for the draw loop.
    pub(crate) fn targets(&mut self) -> (&mut [f64], &mut Canvas, Option<&mut GBuffer>, &mut FrameStats) {
        return (&mut self.depth[..], &mut self.canvas, self.gbuffer.as_mut(), &mut self.stats);
    }
}

/// Depth as seen from a light, plus the transform from world space into it.
#[derive(Debug, Clone)]
pub struct ShadowMap {
    view_projection: Mat4,
    viewport: Viewport,
    depth: Vec<f64>,
    pub bias: f64,
}

impl ShadowMap {
    pub fn new(camera: &Camera, viewport: Viewport, depth: Vec<f64>) -> Self {
        return Self {
            view_projection: camera.view_projection(),
            viewport,
            depth,
            bias: 0.002,
        };
    }

    pub fn viewport(&self) -> Viewport {
        return self.viewport;
    }

    pub fn depth(&self) -> &[f64] {
        return &self.depth[..];
    }

    /// Fraction of a 3x3 neighbourhood in the map that sees `world_position`: 1 is fully lit.
    /// Points outside the light frustum count as lit.
    pub fn visibility(&self, world_position: Vec3) -> f32 {
        let clip = self.view_projection * vector![world_position.x, world_position.y, world_position.z, 1.0];
        if !(clip.w > EPSILON as f32) {
            return 1.0;
        }
        let ndc = clip.xyz() / clip.w;
        let (x, y, z) = self.viewport.to_screen(ndc);
        if !(z > -1.0 && z < 1.0) {
            return 1.0;
        }
        let (cx, cy) = (x.floor() as i64, y.floor() as i64);
        let mut lit = 0;
        let mut total = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (sx, sy) = (cx + dx, cy + dy);
                if sx < 0 || sy < 0 || sx >= self.viewport.width as i64 || sy >= self.viewport.height as i64 {
                    continue;
                }
                total += 1;
                let stored = self.depth[sx as usize + sy as usize * self.viewport.width];
                if z - self.bias <= stored {
                    lit += 1;
                }
            }
        }
        if total == 0 {
            return 1.0;
        }
        return lit as f32 / total as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_frame_clears_and_resizes() {
        let mut frame = FrameContext::new(Viewport::new(4, 4)).with_gbuffer();
        frame.clear_color = vector![0.1, 0.2, 0.3, 1.0];
        frame.begin_frame(Viewport::new(8, 2));
        assert_eq!(frame.depth().len(), 16);
        assert!(frame.depth().iter().all(|&z| z == FAR_DEPTH));
        assert_eq!(frame.canvas().pixel(7, 1), vector![0.1, 0.2, 0.3, 1.0]);
        assert_eq!(frame.gbuffer().map(|g| g.texels().len()), Some(16));

        let (depth, _, gbuffer, stats) = frame.targets();
        depth[3] = 0.5;
        if let Some(gbuffer) = gbuffer {
            gbuffer.texel_mut(3).covered = true;
        }
        stats.triangles = 7;
        assert_eq!(frame.end_frame().triangles, 7);

        frame.begin_frame(Viewport::new(8, 2));
        assert_eq!(frame.depth()[3], FAR_DEPTH);
        assert!(!frame.gbuffer().map_or(true, |g| g.texel(3).covered));
        assert_eq!(frame.stats(), FrameStats::default());
    }

    #[test]
    fn shadow_map_compares_against_stored_depth() {
        let camera = Camera::perspective(
            vector![0.0, 0.0, 5.0],
            Vec3::zeros(),
            vector![0.0, 1.0, 0.0],
            1.0,
            1.0,
            0.1,
            100.0,
        );
        let viewport = Viewport::new(16, 16);
        let occluder = camera.view_projection() * vector![0.0, 0.0, 1.0, 1.0];
        let occluder_depth = (occluder.z / occluder.w) as f64;
        let shadow = ShadowMap::new(&camera, viewport, vec![occluder_depth; viewport.pixel_count()]);

        assert_eq!(shadow.visibility(vector![0.0, 0.0, 2.0]), 1.0);
        assert_eq!(shadow.visibility(vector![0.0, 0.0, -1.0]), 0.0);
        // Behind the light.
        assert_eq!(shadow.visibility(vector![0.0, 0.0, 10.0]), 1.0);
    }
}
