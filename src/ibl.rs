//! Image based lighting prefilter.
//!
//! The source environment is first projected onto the six faces of a cube at the base
//! resolution. Every further mip level is produced by a separable spherical Gaussian: a
//! latitudinal pass that samples along great circles through a pole axis, then a longitudinal
//! pass that samples along the circle of constant latitude around the same axis. The pole axis
//! changes from level to level so the directional artifacts of the separation do not stack up.
//!
//! Each face of a pass is an independent job on a thread pool.

pub mod cubemap;

use std::f32::consts::PI;
use std::path::Path;
use std::sync::{mpsc, Arc};

use anyhow::Result;
use log::{debug, info};
use nalgebra::vector;
use threadpool::ThreadPool;

use crate::image::{Texture, Wrap};
use crate::math::{checked_normalize, rotate_about_axis, Vec3};

use cubemap::{texel_direction, CubeFace, CubeLevel, CubeMap, FACE_COUNT};

/// Size of the one-sided Gaussian weight table.
pub const WEIGHT_COUNT: usize = 20;

pub const POLE_AXIS_COUNT: usize = 10;

/// Ten unit directions spread evenly over a hemisphere: the vertices of a dodecahedron with
/// antipodal pairs merged, built from the golden ratio.
pub fn pole_axes() -> [Vec3; POLE_AXIS_COUNT] {
    let phi = (1.0 + 5f32.sqrt()) / 2.0;
    let inv = 1.0 / phi;
    let axes: [Vec3; POLE_AXIS_COUNT] = [
        vector![1.0, 1.0, 1.0],
        vector![1.0, 1.0, -1.0],
        vector![1.0, -1.0, 1.0],
        vector![-1.0, 1.0, 1.0],
        vector![0.0, inv, phi],
        vector![0.0, inv, -phi],
        vector![inv, phi, 0.0],
        vector![-inv, phi, 0.0],
        vector![phi, 0.0, inv],
        vector![phi, 0.0, -inv],
    ];
    return axes.map(|axis| axis.normalize());
}

/// Axis used for blur level `lod` (1-based), cycling through [`pole_axes`].
pub fn pole_axis(lod: u32) -> Vec3 {
    return pole_axes()[lod.saturating_sub(1) as usize % POLE_AXIS_COUNT];
}

/// Blur width in radians for level `lod` blurred from a level of `size` texels. The first
/// level stays narrow since it stands for near-mirror reflection.
pub fn sigma_radians(lod: u32, size: usize) -> f32 {
    if lod == 1 {
        return 2.0 / size as f32;
    }
    return 3f32.sqrt() / size as f32;
}

/// Angle between neighbouring taps for a face of `size` texels. A single texel face would
/// divide by zero and gets a half turn instead.
pub fn angular_step(size: usize) -> f32 {
    if size <= 1 {
        return PI;
    }
    return PI / (2 * size - 2) as f32;
}

/// Taps on each side of the center needed to cover three sigma, capped by the weight table.
pub fn sample_count(sigma: f32) -> usize {
    let count = (1.0 + (3.0 * sigma).floor()).max(1.0);
    return (count as usize).min(WEIGHT_COUNT);
}

/// One-sided Gaussian `exp(-0.5 * (i / sigma)^2)`, scaled so `w[0] + 2 * sum(w[1..])` is 1.
pub fn gaussian_weights(sigma: f32) -> [f32; WEIGHT_COUNT] {
    let mut weights = [0.0; WEIGHT_COUNT];
    if !(sigma > 0.0) {
        weights[0] = 1.0;
        return weights;
    }
    for (i, weight) in weights.iter_mut().enumerate() {
        let x = i as f32 / sigma;
        *weight = (-0.5 * x * x).exp();
    }
    let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
    for weight in weights.iter_mut() {
        *weight /= total;
    }
    return weights;
}

/// Value of a named blur uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    Vec3(Vec3),
}

/// Uniform block of one face draw of a blur pass, as a GPU backend would bind it.
#[derive(Debug, Clone, PartialEq)]
pub struct BlurUniforms {
    pub face: u32,
    pub samples: u32,
    pub latitudinal: bool,
    pub d_theta: f32,
    pub lod: u32,
    pub pole_axis: Vec3,
    pub map: u32, // Texture unit of the level being blurred.
    pub weights: [f32; WEIGHT_COUNT],
}

impl BlurUniforms {
    /// Name/value pairs in binding order, `weights[i]` expanded per element.
    pub fn bindings(&self) -> Vec<(String, UniformValue)> {
        let mut bindings = vec![
            ("face".to_string(), UniformValue::Int(self.face as i32)),
            ("samples".to_string(), UniformValue::Int(self.samples as i32)),
            ("latitudinal".to_string(), UniformValue::Bool(self.latitudinal)),
            ("d_theta".to_string(), UniformValue::Float(self.d_theta)),
            ("lod".to_string(), UniformValue::Int(self.lod as i32)),
            ("pole_axis".to_string(), UniformValue::Vec3(self.pole_axis)),
            ("map".to_string(), UniformValue::Int(self.map as i32)),
        ];
        for (i, weight) in self.weights.iter().enumerate() {
            bindings.push((format!("weights[{}]", i), UniformValue::Float(*weight)));
        }
        return bindings;
    }
}

/// One of the two directional passes of a blur level.
#[derive(Debug, Clone, PartialEq)]
pub struct BlurPass {
    pub latitudinal: bool,
    pub lod: u32,
    pub size: usize,    // Resolution of the faces written.
    pub d_theta: f32,   // Angle between taps.
    pub sigma: f32,     // In taps.
    pub samples: usize, // Taps per side, center included.
    pub weights: [f32; WEIGHT_COUNT],
    pub pole_axis: Vec3,
}

impl BlurPass {
    fn new(latitudinal: bool, lod: u32, sigma_radians: f32, step_size: usize, size: usize) -> Self {
        let d_theta = angular_step(step_size);
        let sigma = sigma_radians / d_theta;
        return Self {
            latitudinal,
            lod,
            size,
            d_theta,
            sigma,
            samples: sample_count(sigma),
            weights: gaussian_weights(sigma),
            pole_axis: pole_axis(lod),
        };
    }

    pub fn uniforms(&self, face: CubeFace) -> BlurUniforms {
        return BlurUniforms {
            face: face.index() as u32,
            samples: self.samples as u32,
            latitudinal: self.latitudinal,
            d_theta: self.d_theta,
            lod: self.lod,
            pole_axis: self.pole_axis,
            map: 0,
            weights: self.weights,
        };
    }

    /// Blurred value of `source` around `direction`. Taps past `samples` are skipped and the
    /// result is divided by the weight actually used.
    pub fn blur_texel(&self, source: &CubeLevel, direction: Vec3) -> Vec3 {
        let across = self.pole_axis.cross(&direction);
        let sin_theta = across.norm();
        let (axis, step) = if self.latitudinal {
            let axis = if sin_theta > 1e-4 {
                across / sin_theta
            } else {
                // On the pole any great circle through it will do.
                checked_normalize(direction.cross(&vector![1.0, 0.0, 0.0]))
                    .or_else(|| checked_normalize(direction.cross(&vector![0.0, 1.0, 0.0])))
                    .unwrap_or(vector![0.0, 0.0, 1.0])
            };
            (axis, self.d_theta)
        } else {
            if sin_theta <= 1e-4 {
                // Rotating about the pole does not move a point on it.
                return source.sample(direction);
            }
            (self.pole_axis, (self.d_theta / sin_theta).min(PI))
        };

        let mut color = source.sample(direction) * self.weights[0];
        let mut total = self.weights[0];
        for i in 1..self.samples {
            let angle = i as f32 * step;
            let weight = self.weights[i];
            color += source.sample(rotate_about_axis(direction, axis, angle)) * weight;
            color += source.sample(rotate_about_axis(direction, axis, -angle)) * weight;
            total += 2.0 * weight;
        }
        return color / total;
    }
}

/// Both passes producing mip level `lod`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlurStep {
    pub lod: u32,
    pub sigma_radians: f32,
    pub latitudinal: BlurPass,
    pub longitudinal: BlurPass,
}

/// Blur steps for a chain starting at `base_size`, one per level down to a single texel.
pub fn blur_plan(base_size: usize) -> Vec<BlurStep> {
    let mut steps = Vec::new();
    if base_size < 2 {
        return steps;
    }
    let lod_count = usize::BITS - 1 - base_size.leading_zeros();
    let mut size = base_size;
    for lod in 1..=lod_count {
        let sigma_radians = sigma_radians(lod, size);
        let half = size / 2;
        steps.push(BlurStep {
            lod,
            sigma_radians,
            latitudinal: BlurPass::new(true, lod, sigma_radians, size, half),
            longitudinal: BlurPass::new(false, lod, sigma_radians, half, half),
        });
        size = half;
    }
    return steps;
}

/// Environment to be prefiltered.
#[derive(Debug, Clone)]
pub enum EnvironmentSource {
    Faces(Box<[Texture; FACE_COUNT]>), // In [`CubeFace::ALL`] order.
    Equirectangular(Texture),
    Cube(CubeMap),
}

impl EnvironmentSource {
    pub fn load_equirectangular<P: AsRef<Path>>(path: P) -> Result<Self> {
        let texture = Texture::load(path)?.with_wrap(Wrap::Repeat, Wrap::Clamp);
        return Ok(EnvironmentSource::Equirectangular(texture));
    }

    /// Radiance arriving from `direction`. Longitude wraps around, latitude stops at the poles
    /// and cube faces stop at their edges, whatever wrap modes the textures carry.
    pub fn sample(&self, direction: Vec3) -> Vec3 {
        return match self {
            EnvironmentSource::Faces(faces) => {
                let (face, u, v) = CubeFace::from_direction(direction);
                faces[face.index()].sample_wrapped(vector![u, v], Wrap::Clamp, Wrap::Clamp).xyz()
            }
            EnvironmentSource::Equirectangular(texture) => {
                let direction = checked_normalize(direction).unwrap_or(vector![0.0, 0.0, -1.0]);
                let longitude = direction.x.atan2(-direction.z);
                let u = 0.5 + longitude / (2.0 * PI);
                let v = direction.y.clamp(-1.0, 1.0).acos() / PI;
                texture.sample_wrapped(vector![u, v], Wrap::Repeat, Wrap::Clamp).xyz()
            }
            EnvironmentSource::Cube(map) => map.level(0).sample(direction),
        };
    }
}

/// Runs projection and blur passes, one job per cube face.
pub struct Prefilter {
    pool: ThreadPool,
}

impl Prefilter {
    pub fn new(threads: usize) -> Self {
        return Self {
            pool: ThreadPool::new(threads.max(1)),
        };
    }

    /// One worker per core, at most one per face.
    pub fn with_available_threads() -> Self {
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        return Self::new(threads.min(FACE_COUNT));
    }

    fn run_faces<F>(&self, size: usize, texel: F) -> CubeLevel
    where
        F: Fn(CubeFace, Vec3) -> Vec3 + Send + Sync + 'static,
    {
        let job = Arc::new(texel);
        let (sender, receiver) = mpsc::channel();
        for face in CubeFace::ALL {
            let texel = Arc::clone(&job);
            let sender = sender.clone();
            self.pool.execute(move || {
                let mut texels = Vec::with_capacity(size * size);
                for y in 0..size {
                    for x in 0..size {
                        texels.push((*texel)(face, texel_direction(face, x, y, size)));
                    }
                }
                // The receiver lives until every sender is gone.
                let _ = sender.send((face.index(), texels));
            });
        }
        drop(sender);

        let mut faces = vec![Vec::new(); FACE_COUNT];
        for (index, texels) in receiver.iter() {
            faces[index] = texels;
        }
        return CubeLevel::from_faces(size, faces);
    }

    /// Stage 1: the source seen through every texel center of a `size` cube.
    pub fn project(&self, source: Arc<EnvironmentSource>, size: usize) -> CubeLevel {
        return self.run_faces(size, move |_, direction| source.sample(direction));
    }

    /// One directional pass reading `source` and writing faces of `pass.size`.
    pub fn blur(&self, source: Arc<CubeLevel>, pass: &BlurPass) -> CubeLevel {
        let size = pass.size;
        let pass = pass.clone();
        return self.run_faces(size, move |_, direction| pass.blur_texel(&source, direction));
    }

    /// Full chain: projection at `base_size`, then one blurred level per halving.
    pub fn prefilter(&self, source: Arc<EnvironmentSource>, base_size: usize) -> CubeMap {
        info!("Projecting environment onto {}x{} cube faces", base_size, base_size);
        let mut previous = Arc::new(self.project(source, base_size));
        let mut map = CubeMap::new(previous.as_ref().clone());
        for step in blur_plan(base_size) {
            debug!(
                "lod {}: {} -> {}, sigma {:.4} rad, {} + {} taps",
                step.lod,
                previous.size(),
                step.longitudinal.size,
                step.sigma_radians,
                step.latitudinal.samples,
                step.longitudinal.samples
            );
            let intermediate = Arc::new(self.blur(previous, &step.latitudinal));
            let level = self.blur(intermediate, &step.longitudinal);
            map.push_level(level.clone());
            previous = Arc::new(level);
        }
        info!("Prefiltered environment into {} mip levels", map.mip_count());
        return map;
    }
}
