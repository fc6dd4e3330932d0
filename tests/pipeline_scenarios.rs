use std::sync::Arc;

use nalgebra::vector;

use tiny_rasterizer::clip::{clip_triangle, PointList};
use tiny_rasterizer::ibl::cubemap::CubeFace;
use tiny_rasterizer::ibl::{gaussian_weights, EnvironmentSource, Prefilter};
use tiny_rasterizer::image::{Canvas, Texture};
use tiny_rasterizer::math::{Vec3, Vec4};
use tiny_rasterizer::pipeline::{draw_scene, is_instance_visible, render_shadow_map, CullMode, DrawState};
use tiny_rasterizer::post::{resolve_lighting, tone_map};
use tiny_rasterizer::raster::{rasterize, rasterize_depth, Fragment, ScreenPolygon, ScreenVertex, Viewport, FAR_DEPTH};
use tiny_rasterizer::scene::buffer::FrameContext;
use tiny_rasterizer::scene::shader::{DirectionalLight, LitShader, UnlitShader};
use tiny_rasterizer::scene::{Camera, Instance, Mesh};

fn feq(a: f64, b: f64, epsilon: f64) -> bool {
    return (a - b).abs() < epsilon;
}

fn screen_triangle(points: [(f64, f64); 3], z: f64) -> ScreenPolygon {
    let mut polygon = ScreenPolygon::new();
    let weights = [vector![1.0, 0.0, 0.0], vector![0.0, 1.0, 0.0], vector![0.0, 0.0, 1.0]];
    for (&(x, y), weight) in points.iter().zip(weights) {
        polygon.push(ScreenVertex::new(x, y, z, 1.0, weight));
    }
    return polygon;
}

#[test]
fn nearer_full_screen_triangle_wins_in_either_order() {
    let viewport = Viewport::new(64, 48);
    let (w, h) = (viewport.width as f64, viewport.height as f64);
    let far = screen_triangle([(0.0, 0.0), (2.0 * w, 0.0), (0.0, 2.0 * h)], 0.9);
    let near = screen_triangle([(w, h), (w, -h), (-w, h)], 0.1);

    for order in [[&far, &near], [&near, &far]] {
        let mut depth = vec![FAR_DEPTH; viewport.pixel_count()];
        for polygon in order {
            rasterize_depth(polygon, viewport, &mut depth);
        }
        assert!(depth.iter().all(|&z| feq(z, 0.1, 1e-12)));
    }
}

#[test]
fn blending_twice_is_not_idempotent() {
    let viewport = Viewport::new(16, 16);
    let triangle = screen_triangle([(0.0, 0.0), (32.0, 0.0), (0.0, 32.0)], 0.5);
    let mut depth = vec![FAR_DEPTH; viewport.pixel_count()];
    let mut canvas = Canvas::new(16, 16);
    canvas.clear(vector![0.0, 0.0, 0.0, 1.0]);
    let translucent = |_: &Fragment| -> Vec4 { vector![1.0, 1.0, 1.0, 0.5] };

    rasterize(&triangle, viewport, &mut depth, &mut canvas, translucent);
    let depth_once = depth.clone();
    let once = canvas.pixel(4, 4);
    rasterize(&triangle, viewport, &mut depth, &mut canvas, translucent);

    assert_eq!(depth, depth_once);
    assert!(feq(once.x as f64, 0.5, 1e-6));
    assert!(feq(canvas.pixel(4, 4).x as f64, 0.75, 1e-6));
}

#[test]
fn vertex_deep_behind_near_plane_gives_quad() {
    let list = PointList::triangle(
        vector![0.0, 0.0, -10.0, -5.0],
        vector![1.0, 0.0, 0.5, 1.0],
        vector![0.0, 1.0, 0.5, 2.0],
    );
    let clipped = clip_triangle(&list, 0.1, 100.0);
    assert_eq!(clipped.len(), 4);
    let on_plane = clipped.positions().iter().filter(|p| feq(p.w as f64, 0.1, 1e-5)).count();
    assert_eq!(on_plane, 2);
}

#[test]
fn unit_sigma_weight_table_sums_to_one() {
    let weights = gaussian_weights(1.0);
    let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
    assert!(feq(total as f64, 1.0, 1e-6));
}

fn camera(viewport: Viewport) -> Camera {
    return Camera::perspective(
        vector![0.0, 0.0, 4.0],
        Vec3::zeros(),
        vector![0.0, 1.0, 0.0],
        1.0,
        viewport.aspect(),
        0.1,
        20.0,
    );
}

fn quad(size: f32) -> Arc<Mesh> {
    let positions = vec![
        vector![-size, -size, 0.0],
        vector![size, -size, 0.0],
        vector![size, size, 0.0],
        vector![-size, size, 0.0],
    ];
    let uvs = vec![vector![0.0, 1.0], vector![1.0, 1.0], vector![1.0, 0.0], vector![0.0, 0.0]];
    return Arc::new(Mesh::indexed(positions, vec![0, 1, 2, 0, 2, 3]).with_uvs(uvs));
}

#[test]
fn deferred_frame_matches_forward_frame() {
    let viewport = Viewport::new(40, 30);
    let camera = camera(viewport);
    let texture = Arc::new(Texture::solid(vector![0.8, 0.6, 0.4, 1.0]));
    let instances = vec![Instance::new(quad(1.0)).with_texture(texture)];
    let light = DirectionalLight {
        direction: vector![0.3, 0.4, 1.0],
        color: Vec3::repeat(1.0),
    };
    let state = DrawState::default().with_cull(CullMode::Back);

    let mut forward = FrameContext::new(viewport);
    forward.begin_frame(viewport);
    draw_scene(&mut forward, &camera, &instances, &mut LitShader::new(light), state);
    forward.end_frame();

    let mut deferred = FrameContext::new(viewport).with_gbuffer();
    deferred.begin_frame(viewport);
    draw_scene(&mut deferred, &camera, &instances, &mut LitShader::new(light), state);
    let (canvas, gbuffer) = deferred.canvas_and_gbuffer();
    resolve_lighting(canvas, gbuffer.unwrap(), None);
    let stats = deferred.end_frame();

    assert_eq!(stats.triangles, 2);
    assert!(stats.fragments > 0);
    for (a, b) in forward.canvas().pixels().iter().zip(deferred.canvas().pixels()) {
        assert!((a - b).norm() < 1e-4);
    }
    // Center is lit, the corner shows the clear color.
    assert!(forward.canvas().pixel(20, 15).x > 0.1);
    assert_eq!(forward.canvas().pixel(0, 0), vector![0.0, 0.0, 0.0, 1.0]);
    assert_eq!(tone_map(forward.canvas(), 1.0).dimensions(), (40, 30));
}

#[test]
fn shadowed_floor_is_darker_than_open_floor() {
    let viewport = Viewport::new(48, 48);
    let camera = Camera::perspective(
        vector![0.0, 6.0, 6.0],
        Vec3::zeros(),
        vector![0.0, 1.0, 0.0],
        1.0,
        1.0,
        0.1,
        40.0,
    );
    let mut floor = Instance::new(quad(3.0));
    floor.rotation = vector![-std::f32::consts::FRAC_PI_2, 0.0, 0.0];
    let mut blocker = Instance::new(quad(0.75));
    blocker.position = vector![0.0, 1.5, 0.0];
    blocker.rotation = vector![-std::f32::consts::FRAC_PI_2, 0.0, 0.0];
    let instances = vec![floor, blocker];

    let light_camera = Camera::directional_light(vector![0.0, 1.0, 0.0], Vec3::zeros(), 8.0, 1.0);
    let shadow = Arc::new(render_shadow_map(&light_camera, &instances, Viewport::new(128, 128)));
    assert_eq!(shadow.visibility(vector![0.0, 0.0, 0.0]), 0.0);
    assert_eq!(shadow.visibility(vector![2.5, 0.0, 2.5]), 1.0);

    let light = DirectionalLight {
        direction: vector![0.0, 1.0, 0.0],
        color: Vec3::repeat(1.0),
    };
    let mut frame = FrameContext::new(viewport);
    frame.begin_frame(viewport);
    let mut shader = LitShader::new(light).with_shadow(shadow);
    draw_scene(&mut frame, &camera, &instances[..1], &mut shader, DrawState::default());
    frame.end_frame();

    // Project two floor points to find their pixels.
    let pixel_of = |p: Vec3| {
        let clip = camera.view_projection() * vector![p.x, p.y, p.z, 1.0];
        let (x, y, _) = viewport.to_screen(clip.xyz() / clip.w);
        return frame.canvas().pixel(x as usize, y as usize);
    };
    let shadowed = pixel_of(vector![0.0, 0.0, 0.0]);
    let open = pixel_of(vector![2.2, 0.0, 2.2]);
    assert!(shadowed.x < open.x);
}

#[test]
fn occlusion_query_respects_frame_depth() {
    let viewport = Viewport::new(32, 32);
    let camera = camera(viewport);
    let mut wall = Instance::new(quad(4.0));
    wall.position = vector![0.0, 0.0, 1.0];
    let mut behind = Instance::new(quad(0.3));
    behind.position = vector![0.0, 0.0, -2.0];

    let mut frame = FrameContext::new(viewport);
    frame.begin_frame(viewport);
    assert!(is_instance_visible(&frame, &camera, &behind));
    draw_scene(&mut frame, &camera, &[wall], &mut UnlitShader::default(), DrawState::default());
    assert!(!is_instance_visible(&frame, &camera, &behind));
    frame.end_frame();
}

#[test]
fn prefiltered_environment_feeds_lookups() {
    let mut texels = Vec::new();
    for y in 0..8 {
        for _ in 0..16 {
            let value = if y < 4 { 1.0 } else { 0.0 };
            texels.push(vector![value, value, value, 1.0]);
        }
    }
    let source = EnvironmentSource::Equirectangular(Texture::new(16, 8, texels));
    let map = Prefilter::new(2).prefilter(Arc::new(source), 16);
    assert_eq!(map.mip_count(), 5);

    let up = map.sample_roughness(vector![0.0, 1.0, 0.0], 0.0);
    let down = map.sample_roughness(vector![0.0, -1.0, 0.0], 0.0);
    assert!(up.x > 0.9 && down.x < 0.1);

    // Rougher lookups of the horizon mix both halves.
    let horizon = map.sample_roughness(vector![1.0, 0.0, 0.0], 1.0);
    assert!(horizon.x > 0.05 && horizon.x < 0.95);
    assert!(map.level(4).face(CubeFace::PositiveY)[0].x < 1.0);
}
