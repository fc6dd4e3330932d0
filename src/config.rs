//! Render settings read from a JSON file. Every field has a default, so a partial (or empty)
//! object is a valid config.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use nalgebra::vector;
use serde::{Deserialize, Serialize};

use crate::math::{Vec3, Vec4};
use crate::raster::Viewport;
use crate::scene::Camera;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub up: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        return Self {
            position: [0.0, 0.0, 3.0],
            target: [0.0, 0.0, 0.0],
            up: [0.0, 1.0, 0.0],
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub direction: [f32; 3], // Towards the light.
    pub color: [f32; 3],
}

impl Default for LightConfig {
    fn default() -> Self {
        return Self {
            direction: [1.0, 1.0, 1.0],
            color: [1.0, 1.0, 1.0],
        };
    }
}

/// Environment map to prefilter for image based lighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub path: String, // Equirectangular image.
    pub size: usize,  // Base cube face resolution, a power of two.
    pub roughness: f32,
    pub reflectivity: f32,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        return Self {
            path: String::new(),
            size: 64,
            roughness: 0.5,
            reflectivity: 0.2,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub position: [f32; 3],
    pub rotation: [f32; 3], // Degrees.
    pub scale: [f32; 3],
}

impl Default for InstanceConfig {
    fn default() -> Self {
        return Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: usize,
    pub height: usize,
    pub fov: f32, // Vertical, degrees.
    pub znear: f32,
    pub zfar: f32,
    pub camera: CameraConfig,
    pub light: LightConfig,
    pub ambient: [f32; 3],
    pub clear_color: [f32; 4],
    pub exposure: f32,
    pub shadow_map_size: usize,
    pub ambient_occlusion: bool,
    pub fxaa: bool,
    pub environment: Option<EnvironmentConfig>,
    pub instances: Vec<InstanceConfig>, // Empty means a single instance at the origin.
}

impl Default for RenderConfig {
    fn default() -> Self {
        return Self {
            width: 800,
            height: 800,
            fov: 45.0,
            znear: 0.1,
            zfar: 100.0,
            camera: CameraConfig::default(),
            light: LightConfig::default(),
            ambient: [0.1, 0.1, 0.1],
            clear_color: [0.0, 0.0, 0.0, 1.0],
            exposure: 1.0,
            shadow_map_size: 1024,
            ambient_occlusion: true,
            fxaa: true,
            environment: None,
            instances: Vec::new(),
        };
    }
}

fn to_vec3(v: [f32; 3]) -> Vec3 {
    return vector![v[0], v[1], v[2]];
}

impl RenderConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: RenderConfig =
            serde_json::from_str(&text).with_context(|| format!("failed to parse config '{}'", path.display()))?;
        info!("Loaded config {}", path.display());
        return Ok(config);
    }

    pub fn viewport(&self) -> Viewport {
        return Viewport::new(self.width, self.height);
    }

    pub fn camera(&self) -> Camera {
        return Camera::perspective(
            to_vec3(self.camera.position),
            to_vec3(self.camera.target),
            to_vec3(self.camera.up),
            self.fov.to_radians(),
            self.viewport().aspect(),
            self.znear,
            self.zfar,
        );
    }

    /// Light camera framing the scene around the view target.
    pub fn light_camera(&self) -> Camera {
        let target = to_vec3(self.camera.target);
        let distance = (to_vec3(self.camera.position) - target).norm().max(1.0) * 2.0;
        return Camera::directional_light(self.light_direction(), target, distance, 45f32.to_radians());
    }

    pub fn light_direction(&self) -> Vec3 {
        return to_vec3(self.light.direction);
    }

    pub fn light_color(&self) -> Vec3 {
        return to_vec3(self.light.color);
    }

    pub fn ambient(&self) -> Vec3 {
        return to_vec3(self.ambient);
    }

    pub fn clear_color(&self) -> Vec4 {
        let [r, g, b, a] = self.clear_color;
        return vector![r, g, b, a];
    }

    /// (position, rotation in radians, scale) per instance.
    pub fn placements(&self) -> Vec<(Vec3, Vec3, Vec3)> {
        if self.instances.is_empty() {
            return vec![(Vec3::zeros(), Vec3::zeros(), Vec3::repeat(1.0))];
        }
        return self
            .instances
            .iter()
            .map(|instance| {
                let rotation = to_vec3(instance.rotation).map(|degrees| degrees.to_radians());
                (to_vec3(instance.position), rotation, to_vec3(instance.scale))
            })
            .collect();
    }
}
