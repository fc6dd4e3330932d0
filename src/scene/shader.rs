//! Programmable stages of the pipeline. A shader is bound once per instance, its vertex stage
//! runs for the three corners of each triangle, the optional geometry stage may rewrite the
//! transformed triangle, and the fragment stage runs for every pixel that passes the depth test.
//!
//! Varyings live inside the shader: the vertex stage stores per-corner values in slot 0..3 and
//! the fragment stage blends them with the fragment's barycentric coordinates.

use std::sync::Arc;

use nalgebra::vector;

use crate::ibl::cubemap::CubeMap;
use crate::image::Texture;
use crate::math::{Mat3, Mat4, Vec2, Vec3, Vec4};
use crate::raster::Fragment;

use super::buffer::{GBufferTexel, ShadowMap};
use super::util::{interpolate2, interpolate3, interpolate4, normal_matrix, normalize_or, reflect, to_hom_point};
use super::{Camera, Instance, Mesh};

/// Per-instance constants handed to [`Shader::bind`].
#[derive(Debug, Clone)]
pub struct Uniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub model_view_projection: Mat4,
    pub normal_matrix: Mat3, // Inverse transpose of the model matrix, for world space normals.
    pub camera_position: Vec3,
    pub textures: Vec<Arc<Texture>>,
}

impl Default for Uniforms {
    fn default() -> Self {
        return Self {
            model: Mat4::identity(),
            view: Mat4::identity(),
            projection: Mat4::identity(),
            model_view_projection: Mat4::identity(),
            normal_matrix: Mat3::identity(),
            camera_position: Vec3::zeros(),
            textures: Vec::new(),
        };
    }
}

impl Uniforms {
    pub fn new(camera: &Camera, instance: &Instance) -> Self {
        let model = instance.model_matrix();
        return Self {
            model,
            view: camera.view,
            projection: camera.projection,
            model_view_projection: camera.projection * camera.view * model,
            normal_matrix: normal_matrix(&model),
            camera_position: camera.position,
            textures: instance.textures.clone(),
        };
    }

    pub fn texture(&self, slot: usize) -> Option<&Texture> {
        return self.textures.get(slot).map(|texture| texture.as_ref());
    }

    /// Texture in `slot` sampled at `uv`, white when nothing is bound there.
    pub fn sample(&self, slot: usize, uv: Vec2) -> Vec4 {
        return match self.texture(slot) {
            Some(texture) => texture.sample(uv),
            None => Vec4::repeat(1.0),
        };
    }
}

pub trait Shader {
    /// Called once per instance before any of its triangles.
    fn bind(&mut self, uniforms: &Uniforms);

    /// Clip-space position of corner `slot` (0..3) of `triangle`.
    fn vertex(&mut self, mesh: &Mesh, triangle: usize, slot: usize) -> Vec4;

    /// May rewrite the clip-space triangle before clipping. Identity by default.
    fn geometry(&mut self, _positions: &mut [Vec4; 3]) {}

    /// Color of a fragment that passed the depth test. `gbuffer` is the texel of this pixel when
    /// the frame carries a G-buffer.
    fn fragment(&mut self, fragment: &Fragment, gbuffer: Option<&mut GBufferTexel>) -> Vec4;
}

/// Texture times vertex color times tint, no lighting.
#[derive(Debug, Clone)]
pub struct UnlitShader {
    pub tint: Vec4,
    uniforms: Uniforms,
    uvs: [Vec2; 3],
    colors: [Vec4; 3],
}

impl UnlitShader {
    pub fn new(tint: Vec4) -> Self {
        return Self {
            tint,
            uniforms: Uniforms::default(),
            uvs: [Vec2::zeros(); 3],
            colors: [Vec4::zeros(); 3],
        };
    }
}

impl Default for UnlitShader {
    fn default() -> Self {
        return Self::new(Vec4::repeat(1.0));
    }
}

impl Shader for UnlitShader {
    fn bind(&mut self, uniforms: &Uniforms) {
        self.uniforms = uniforms.clone();
    }

    fn vertex(&mut self, mesh: &Mesh, triangle: usize, slot: usize) -> Vec4 {
        self.uvs[slot] = mesh.uv(triangle, slot);
        self.colors[slot] = mesh.color(triangle, slot);
        return self.uniforms.model_view_projection * to_hom_point(mesh.position(triangle, slot));
    }

    fn fragment(&mut self, fragment: &Fragment, _gbuffer: Option<&mut GBufferTexel>) -> Vec4 {
        let uv = interpolate2(&self.uvs, fragment.barycentric);
        let color = interpolate4(&self.colors, fragment.barycentric);
        return self.uniforms.sample(0, uv).component_mul(&color).component_mul(&self.tint);
    }
}

/// Position only. Meant for [`crate::pipeline::RasterMode::DepthOnly`] passes such as shadow
/// maps, where the fragment stage never runs.
#[derive(Debug, Clone, Default)]
pub struct DepthShader {
    model_view_projection: Mat4,
}

impl Shader for DepthShader {
    fn bind(&mut self, uniforms: &Uniforms) {
        self.model_view_projection = uniforms.model_view_projection;
    }

    fn vertex(&mut self, mesh: &Mesh, triangle: usize, slot: usize) -> Vec4 {
        return self.model_view_projection * to_hom_point(mesh.position(triangle, slot));
    }

    fn fragment(&mut self, _fragment: &Fragment, _gbuffer: Option<&mut GBufferTexel>) -> Vec4 {
        return Vec4::zeros();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DirectionalLight {
    pub direction: Vec3, // Towards the light.
    pub color: Vec3,
}

/// Lambert diffuse plus Blinn-Phong specular from one directional light, with optional shadow
/// map and image based ambient/reflection from a prefiltered cube map.
///
/// Without a G-buffer the result is lit in place. With one, the fragment stage stores normal,
/// irradiance, specular and position there and returns the bare albedo; the lighting is then
/// applied by [`crate::post::resolve_lighting`].
#[derive(Debug, Clone)]
pub struct LitShader {
    pub light: DirectionalLight,
    pub ambient: Vec3,
    pub specular_strength: f32,
    pub shininess: f32,
    pub reflectivity: f32, // Weight of the environment reflection.
    pub roughness: f32,    // Picks the prefiltered level for reflections.
    pub shadow: Option<Arc<ShadowMap>>,
    pub environment: Option<Arc<CubeMap>>,
    uniforms: Uniforms,
    world_positions: [Vec3; 3],
    normals: [Vec3; 3],
    uvs: [Vec2; 3],
    colors: [Vec4; 3],
}

impl LitShader {
    pub fn new(light: DirectionalLight) -> Self {
        return Self {
            light,
            ambient: Vec3::repeat(0.1),
            specular_strength: 0.5,
            shininess: 32.0,
            reflectivity: 0.2,
            roughness: 0.5,
            shadow: None,
            environment: None,
            uniforms: Uniforms::default(),
            world_positions: [Vec3::zeros(); 3],
            normals: [Vec3::zeros(); 3],
            uvs: [Vec2::zeros(); 3],
            colors: [Vec4::zeros(); 3],
        };
    }

    pub fn with_shadow(mut self, shadow: Arc<ShadowMap>) -> Self {
        self.shadow = Some(shadow);
        return self;
    }

    pub fn with_environment(mut self, environment: Arc<CubeMap>) -> Self {
        self.environment = Some(environment);
        return self;
    }
}

impl Shader for LitShader {
    fn bind(&mut self, uniforms: &Uniforms) {
        self.uniforms = uniforms.clone();
    }

    fn vertex(&mut self, mesh: &Mesh, triangle: usize, slot: usize) -> Vec4 {
        let world = self.uniforms.model * to_hom_point(mesh.position(triangle, slot));
        self.world_positions[slot] = world.xyz();
        self.normals[slot] = self.uniforms.normal_matrix * mesh.normal(triangle, slot);
        self.uvs[slot] = mesh.uv(triangle, slot);
        self.colors[slot] = mesh.color(triangle, slot);
        return self.uniforms.projection * self.uniforms.view * world;
    }

    fn fragment(&mut self, fragment: &Fragment, gbuffer: Option<&mut GBufferTexel>) -> Vec4 {
        let bar = fragment.barycentric;
        let position = interpolate3(&self.world_positions, bar);
        let normal = normalize_or(interpolate3(&self.normals, bar), vector![0.0, 0.0, 1.0]);
        let uv = interpolate2(&self.uvs, bar);
        let albedo = self.uniforms.sample(0, uv).component_mul(&interpolate4(&self.colors, bar));

        let to_light = normalize_or(self.light.direction, vector![0.0, 1.0, 0.0]);
        let to_eye = normalize_or(self.uniforms.camera_position - position, normal);
        let visibility = match &self.shadow {
            Some(shadow) => shadow.visibility(position),
            None => 1.0,
        };

        let diffuse = self.light.color * (normal.dot(&to_light).max(0.0) * visibility);
        let half = normalize_or(to_light + to_eye, normal);
        let highlight = normal.dot(&half).max(0.0).powf(self.shininess) * self.specular_strength;
        let mut specular = self.light.color * (highlight * visibility);
        let mut ambient = self.ambient;
        if let Some(environment) = &self.environment {
            // The blurriest level stands in for irradiance.
            ambient = ambient.component_mul(&environment.sample_roughness(normal, 1.0));
            let reflected = reflect(-to_eye, normal);
            specular += environment.sample_roughness(reflected, self.roughness) * self.reflectivity;
        }
        let irradiance = ambient + diffuse;

        if let Some(texel) = gbuffer {
            *texel = GBufferTexel {
                normal,
                specular,
                irradiance,
                world_position: position,
                covered: true,
            };
            return albedo;
        }
        let rgb = albedo.xyz().component_mul(&irradiance) + specular;
        return vector![rgb.x, rgb.y, rgb.z, albedo.w];
    }
}

/// Wraps another shader and flattens every triangle to the depth of its centroid, so it faces
/// the camera with unchanged screen footprint.
#[derive(Debug, Clone, Default)]
pub struct Billboard<S> {
    pub inner: S,
}

impl<S: Shader> Billboard<S> {
    pub fn new(inner: S) -> Self {
        return Self { inner };
    }
}

impl<S: Shader> Shader for Billboard<S> {
    fn bind(&mut self, uniforms: &Uniforms) {
        self.inner.bind(uniforms);
    }

    fn vertex(&mut self, mesh: &Mesh, triangle: usize, slot: usize) -> Vec4 {
        return self.inner.vertex(mesh, triangle, slot);
    }

    fn geometry(&mut self, positions: &mut [Vec4; 3]) {
        self.inner.geometry(positions);
        let centroid = (positions[0] + positions[1] + positions[2]) / 3.0;
        // Corners behind the eye have no meaningful screen position to keep.
        if !(centroid.w > 0.0) || positions.iter().any(|p| !(p.w > 0.0)) {
            return;
        }
        for p in positions.iter_mut() {
            let scale = centroid.w / p.w;
            *p = vector![p.x * scale, p.y * scale, centroid.z, centroid.w];
        }
    }

    fn fragment(&mut self, fragment: &Fragment, gbuffer: Option<&mut GBufferTexel>) -> Vec4 {
        return self.inner.fragment(fragment, gbuffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Instance;

    fn camera() -> Camera {
        return Camera::perspective(
            vector![0.0, 0.0, 3.0],
            Vec3::zeros(),
            vector![0.0, 1.0, 0.0],
            1.0,
            1.0,
            0.1,
            10.0,
        );
    }

    fn fragment(barycentric: Vec3) -> Fragment {
        return Fragment {
            x: 0,
            y: 0,
            index: 0,
            depth: 0.0,
            barycentric,
            screen: Vec2::zeros(),
        };
    }

    fn triangle() -> Arc<Mesh> {
        let mesh = Mesh::direct(vec![
            vector![-1.0, -1.0, 0.0],
            vector![1.0, -1.0, 0.0],
            vector![0.0, 1.0, 0.0],
        ])
        .with_colors(vec![
            vector![1.0, 0.0, 0.0, 1.0],
            vector![0.0, 1.0, 0.0, 1.0],
            vector![0.0, 0.0, 1.0, 1.0],
        ]);
        return Arc::new(mesh);
    }

    #[test]
    fn unlit_interpolates_vertex_colors() {
        let instance = Instance::new(triangle());
        let mut shader = UnlitShader::default();
        shader.bind(&Uniforms::new(&camera(), &instance));
        for slot in 0..3 {
            shader.vertex(&instance.mesh, 0, slot);
        }
        let color = shader.fragment(&fragment(vector![0.5, 0.5, 0.0]), None);
        assert!((color - vector![0.5, 0.5, 0.0, 1.0]).norm() < 1e-6);
    }

    #[test]
    fn lit_fills_gbuffer_when_present() {
        let instance = Instance::new(triangle());
        let light = DirectionalLight {
            direction: vector![0.0, 0.0, 1.0],
            color: Vec3::repeat(1.0),
        };
        let mut shader = LitShader::new(light);
        shader.bind(&Uniforms::new(&camera(), &instance));
        for slot in 0..3 {
            shader.vertex(&instance.mesh, 0, slot);
        }

        let mut texel = GBufferTexel::default();
        let albedo = shader.fragment(&fragment(Vec3::repeat(1.0 / 3.0)), Some(&mut texel));
        assert!(texel.covered);
        assert!((texel.normal - vector![0.0, 0.0, 1.0]).norm() < 1e-6);
        // Ambient 0.1 plus full diffuse.
        assert!((texel.irradiance.x - 1.1).abs() < 1e-5);
        assert!((albedo.w - 1.0).abs() < 1e-6);

        let forward = shader.fragment(&fragment(Vec3::repeat(1.0 / 3.0)), None);
        let expected = albedo.xyz() * 1.1 + texel.specular;
        assert!((forward.xyz() - expected).norm() < 1e-5);
    }

    #[test]
    fn billboard_flattens_depth_and_keeps_footprint() {
        let mut shader = Billboard::new(UnlitShader::default());
        let mut positions = [
            vector![0.0, 0.0, 0.5, 1.0],
            vector![2.0, 0.0, 0.7, 2.0],
            vector![0.0, 3.0, 0.9, 3.0],
        ];
        let before: Vec<Vec2> = positions.iter().map(|p| p.xy() / p.w).collect();
        shader.geometry(&mut positions);
        for (p, ndc) in positions.iter().zip(before) {
            assert!((p.w - 2.0).abs() < 1e-6);
            assert!((p.z - 0.7).abs() < 1e-6);
            assert!((p.xy() / p.w - ndc).norm() < 1e-6);
        }
    }
}
