//! What gets drawn: meshes as flat attribute arrays, instances placing a shared mesh in the
//! world, and the camera looking at them.

pub mod buffer;
pub mod shader;
pub mod util;

use std::sync::Arc;

use nalgebra::vector;

use crate::image::Texture;
use crate::math::{self, checked_normalize, Mat4, Vec2, Vec3, Vec4};

/// Per-attribute face indices of an indexed mesh. An empty array falls back to the position
/// indices, which is the common case of a single shared index buffer.
#[derive(Debug, Clone, Default)]
pub struct MeshIndices {
    pub positions: Vec<usize>,
    pub normals: Vec<usize>,
    pub uvs: Vec<usize>,
    pub colors: Vec<usize>,
}

/// Triangle soup or indexed triangles. Attribute arrays other than positions may be empty,
/// lookups then return a neutral value.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub colors: Vec<Vec4>,
    pub indices: Option<MeshIndices>, // None means every 3 consecutive vertices form a triangle.
}

#[derive(Debug, Clone, Copy)]
enum Attribute {
    Position,
    Normal,
    Uv,
    Color,
}

impl Mesh {
    /// Non-indexed mesh, attributes are read at the same position as the vertex.
    pub fn direct(positions: Vec<Vec3>) -> Self {
        return Self {
            positions,
            ..Default::default()
        };
    }

    /// Indexed mesh sharing one index buffer between all attributes.
    pub fn indexed(positions: Vec<Vec3>, indices: Vec<usize>) -> Self {
        return Self {
            positions,
            indices: Some(MeshIndices {
                positions: indices,
                ..Default::default()
            }),
            ..Default::default()
        };
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = normals;
        return self;
    }

    pub fn with_uvs(mut self, uvs: Vec<Vec2>) -> Self {
        self.uvs = uvs;
        return self;
    }

    pub fn with_colors(mut self, colors: Vec<Vec4>) -> Self {
        self.colors = colors;
        return self;
    }

    pub fn triangle_count(&self) -> usize {
        return match &self.indices {
            Some(indices) => indices.positions.len() / 3,
            None => self.positions.len() / 3,
        };
    }

    fn attribute_index(&self, attribute: Attribute, triangle: usize, slot: usize) -> usize {
        let corner = triangle * 3 + slot;
        let indices = match &self.indices {
            Some(indices) => indices,
            None => return corner,
        };
        let table = match attribute {
            Attribute::Position => &indices.positions,
            Attribute::Normal => &indices.normals,
            Attribute::Uv => &indices.uvs,
            Attribute::Color => &indices.colors,
        };
        if table.is_empty() {
            return indices.positions[corner];
        }
        return table[corner];
    }

    pub fn position(&self, triangle: usize, slot: usize) -> Vec3 {
        return self.positions[self.attribute_index(Attribute::Position, triangle, slot)];
    }

    /// Falls back to the face normal when the mesh carries no normals.
    pub fn normal(&self, triangle: usize, slot: usize) -> Vec3 {
        if self.normals.is_empty() {
            return self.face_normal(triangle);
        }
        return self.normals[self.attribute_index(Attribute::Normal, triangle, slot)];
    }

    pub fn uv(&self, triangle: usize, slot: usize) -> Vec2 {
        if self.uvs.is_empty() {
            return Vec2::zeros();
        }
        return self.uvs[self.attribute_index(Attribute::Uv, triangle, slot)];
    }

    pub fn color(&self, triangle: usize, slot: usize) -> Vec4 {
        if self.colors.is_empty() {
            return Vec4::repeat(1.0);
        }
        return self.colors[self.attribute_index(Attribute::Color, triangle, slot)];
    }

    /// Counter-clockwise winding gives the outward normal. Zero for degenerate triangles.
    pub fn face_normal(&self, triangle: usize) -> Vec3 {
        let a = self.position(triangle, 0);
        let b = self.position(triangle, 1);
        let c = self.position(triangle, 2);
        return checked_normalize((b - a).cross(&(c - a))).unwrap_or_else(Vec3::zeros);
    }

    /// Axis aligned bounds of all positions, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.positions.first()?;
        let bounds = self.positions.iter().fold((first, first), |(lo, hi), p| (lo.inf(p), hi.sup(p)));
        return Some(bounds);
    }
}

/// A mesh placed in the world. Meshes and textures are shared between instances.
#[derive(Debug, Clone)]
pub struct Instance {
    pub position: Vec3,
    pub rotation: Vec3, // Euler angles in radians, applied as Rx * Ry * Rz.
    pub scale: Vec3,
    pub mesh: Arc<Mesh>,
    pub textures: Vec<Arc<Texture>>,
}

impl Instance {
    pub fn new(mesh: Arc<Mesh>) -> Self {
        return Self {
            position: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::repeat(1.0),
            mesh,
            textures: Vec::new(),
        };
    }

    pub fn with_texture(mut self, texture: Arc<Texture>) -> Self {
        self.textures.push(texture);
        return self;
    }

    pub fn model_matrix(&self) -> Mat4 {
        return math::model_matrix(self.position, self.rotation, self.scale);
    }
}

/// View and projection plus the clip plane distances the clipper tests `w` against.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub position: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
    pub znear: f32,
    pub zfar: f32,
}

impl Camera {
    pub fn perspective(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        aspect: f32,
        znear: f32,
        zfar: f32,
    ) -> Self {
        return Self {
            position,
            view: math::look_at(position, target, up),
            projection: math::perspective(fov_y, aspect, znear, zfar),
            znear,
            zfar,
        };
    }

    /// Stand-in for a directional light: a narrow perspective camera placed `distance` away from
    /// `target` along `direction` (which points towards the light).
    pub fn directional_light(direction: Vec3, target: Vec3, distance: f32, fov_y: f32) -> Self {
        let direction = checked_normalize(direction).unwrap_or(vector![0.0, 1.0, 0.0]);
        let up = if direction.y.abs() > 0.99 { vector![0.0, 0.0, 1.0] } else { vector![0.0, 1.0, 0.0] };
        return Self::perspective(
            target + direction * distance,
            target,
            up,
            fov_y,
            1.0,
            distance * 0.05,
            distance * 2.0,
        );
    }

    pub fn view_projection(&self) -> Mat4 {
        return self.projection * self.view;
    }
}
