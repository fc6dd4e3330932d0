//! Draw submission: vertex stage, geometry stage, near/far clipping, viewport transform,
//! optional back-face culling and rasterization, one triangle at a time and in submission order.

use log::{debug, trace};
use nalgebra::vector;

use crate::clip::{clip_triangle, PointList};
use crate::math::Vec3;
use crate::raster::{query_depth, rasterize, rasterize_depth, ScreenPolygon, Viewport};
use crate::scene::buffer::{FrameContext, ShadowMap};
use crate::scene::shader::{DepthShader, Shader, Uniforms};
use crate::scene::util::to_hom_point;
use crate::scene::{Camera, Instance, Mesh};

/// What the rasterizer does with covered pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterMode {
    Shaded,    // Depth test and write, fragment stage, blend into the canvas.
    DepthOnly, // Depth test and write only.
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back, // Drops triangles wound clockwise on screen.
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawState {
    pub mode: RasterMode,
    pub cull: CullMode,
}

impl Default for DrawState {
    fn default() -> Self {
        return Self {
            mode: RasterMode::Shaded,
            cull: CullMode::None,
        };
    }
}

impl DrawState {
    pub fn depth_only() -> Self {
        return Self {
            mode: RasterMode::DepthOnly,
            cull: CullMode::None,
        };
    }

    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.cull = cull;
        return self;
    }
}

/// Runs every triangle of `mesh` through an already bound `shader`.
pub fn draw_mesh(frame: &mut FrameContext, camera: &Camera, mesh: &Mesh, shader: &mut dyn Shader, state: DrawState) {
    let viewport = frame.viewport();
    let (depth, canvas, mut gbuffer, stats) = frame.targets();

    for triangle in 0..mesh.triangle_count() {
        stats.triangles += 1;
        let mut positions = [
            shader.vertex(mesh, triangle, 0),
            shader.vertex(mesh, triangle, 1),
            shader.vertex(mesh, triangle, 2),
        ];
        shader.geometry(&mut positions);

        let source = PointList::triangle(positions[0], positions[1], positions[2]);
        let clipped = clip_triangle(&source, camera.znear, camera.zfar);
        if !clipped.is_drawable() {
            stats.clipped += 1;
            continue;
        }

        let polygon = ScreenPolygon::from_clipped(&clipped, viewport);
        if state.cull == CullMode::Back && !polygon.is_front_facing() {
            stats.culled += 1;
            continue;
        }

        stats.rasterized += 1;
        stats.fragments += match state.mode {
            RasterMode::Shaded => rasterize(&polygon, viewport, depth, canvas, |fragment| {
                let texel = gbuffer.as_deref_mut().map(|g| g.texel_mut(fragment.index));
                return shader.fragment(fragment, texel);
            }),
            RasterMode::DepthOnly => rasterize_depth(&polygon, viewport, depth),
        };
    }
}

/// Binds the per-instance uniforms and draws the instance's mesh.
pub fn draw_instance(
    frame: &mut FrameContext,
    camera: &Camera,
    instance: &Instance,
    shader: &mut dyn Shader,
    state: DrawState,
) {
    shader.bind(&Uniforms::new(camera, instance));
    draw_mesh(frame, camera, &instance.mesh, shader, state);
}

/// Draws all instances in order with the same shader and state.
pub fn draw_scene(
    frame: &mut FrameContext,
    camera: &Camera,
    instances: &[Instance],
    shader: &mut dyn Shader,
    state: DrawState,
) {
    for instance in instances {
        draw_instance(frame, camera, instance, shader, state);
    }
    trace!("Submitted {} instances", instances.len());
}

/// The 12 triangles of the box spanned by `lo` and `hi`.
fn box_triangles(lo: Vec3, hi: Vec3) -> [[Vec3; 3]; 12] {
    let corner = |i: usize| {
        vector![
            if i & 1 == 0 { lo.x } else { hi.x },
            if i & 2 == 0 { lo.y } else { hi.y },
            if i & 4 == 0 { lo.z } else { hi.z }
        ]
    };
    const FACES: [[usize; 4]; 6] = [
        [0, 2, 6, 4], // -x
        [1, 5, 7, 3], // +x
        [0, 4, 5, 1], // -y
        [2, 3, 7, 6], // +y
        [0, 1, 3, 2], // -z
        [4, 6, 7, 5], // +z
    ];
    let mut triangles = [[Vec3::zeros(); 3]; 12];
    for (i, face) in FACES.iter().enumerate() {
        triangles[2 * i] = [corner(face[0]), corner(face[1]), corner(face[2])];
        triangles[2 * i + 1] = [corner(face[0]), corner(face[2]), corner(face[3])];
    }
    return triangles;
}

/// Occlusion query: would any pixel of the instance's bounding box pass the depth test against
/// what the frame already holds? Nothing is written. Empty meshes are never visible.
pub fn is_instance_visible(frame: &FrameContext, camera: &Camera, instance: &Instance) -> bool {
    let (lo, hi) = match instance.mesh.bounds() {
        Some(bounds) => bounds,
        None => return false,
    };
    let mvp = camera.view_projection() * instance.model_matrix();
    let viewport = frame.viewport();
    for triangle in box_triangles(lo, hi).iter() {
        let source = PointList::triangle(
            mvp * to_hom_point(triangle[0]),
            mvp * to_hom_point(triangle[1]),
            mvp * to_hom_point(triangle[2]),
        );
        let clipped = clip_triangle(&source, camera.znear, camera.zfar);
        if !clipped.is_drawable() {
            continue;
        }
        let polygon = ScreenPolygon::from_clipped(&clipped, viewport);
        if query_depth(&polygon, viewport, frame.depth()) {
            return true;
        }
    }
    return false;
}

/// Depth-only render of `instances` from `light`, kept as a shadow map.
pub fn render_shadow_map(light: &Camera, instances: &[Instance], viewport: Viewport) -> ShadowMap {
    let mut frame = FrameContext::new(viewport);
    frame.begin_frame(viewport);
    let mut shader = DepthShader::default();
    draw_scene(&mut frame, light, instances, &mut shader, DrawState::depth_only());
    let stats = frame.end_frame();
    debug!("Shadow map {}x{} from {} triangles", viewport.width, viewport.height, stats.triangles);
    return ShadowMap::new(light, viewport, frame.depth().to_vec());
}
