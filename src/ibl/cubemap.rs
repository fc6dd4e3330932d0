//! CPU cube map with a mip chain, used as the target of the prefilter and as the environment
//! the lit shader samples.

use nalgebra::vector;

use crate::math::{checked_normalize, Vec3};

pub const FACE_COUNT: usize = 6;

/// Faces in the usual +X, -X, +Y, -Y, +Z, -Z order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; FACE_COUNT] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn index(self) -> usize {
        return self as usize;
    }

    /// Unnormalized direction through face coordinates `s`, `t` in [-1, 1], `t` growing
    /// downward in the face image.
    pub fn direction(self, s: f32, t: f32) -> Vec3 {
        return match self {
            CubeFace::PositiveX => vector![1.0, -t, -s],
            CubeFace::NegativeX => vector![-1.0, -t, s],
            CubeFace::PositiveY => vector![s, 1.0, t],
            CubeFace::NegativeY => vector![s, -1.0, -t],
            CubeFace::PositiveZ => vector![s, -t, 1.0],
            CubeFace::NegativeZ => vector![-s, -t, -1.0],
        };
    }

    /// Face hit by `direction` and the face coordinates in [0, 1] of the hit.
    pub fn from_direction(direction: Vec3) -> (CubeFace, f32, f32) {
        let (ax, ay, az) = (direction.x.abs(), direction.y.abs(), direction.z.abs());
        let (face, sc, tc, major) = if ax >= ay && ax >= az {
            if direction.x > 0.0 {
                (CubeFace::PositiveX, -direction.z, -direction.y, ax)
            } else {
                (CubeFace::NegativeX, direction.z, -direction.y, ax)
            }
        } else if ay >= az {
            if direction.y > 0.0 {
                (CubeFace::PositiveY, direction.x, direction.z, ay)
            } else {
                (CubeFace::NegativeY, direction.x, -direction.z, ay)
            }
        } else if direction.z > 0.0 {
            (CubeFace::PositiveZ, direction.x, -direction.y, az)
        } else {
            (CubeFace::NegativeZ, -direction.x, -direction.y, az)
        };
        if !(major > 0.0) {
            return (CubeFace::PositiveX, 0.5, 0.5);
        }
        return (face, 0.5 * (sc / major + 1.0), 0.5 * (tc / major + 1.0));
    }
}

/// Unit direction through the center of texel (`x`, `y`) of a `size` sized face.
pub fn texel_direction(face: CubeFace, x: usize, y: usize, size: usize) -> Vec3 {
    let s = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
    let t = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
    let direction = face.direction(s, t);
    return checked_normalize(direction).unwrap_or(direction);
}

/// One mip level: six square faces of linear RGB, row-major.
#[derive(Debug, Clone)]
pub struct CubeLevel {
    size: usize,
    faces: Vec<Vec<Vec3>>,
}

impl CubeLevel {
    pub fn new(size: usize) -> Self {
        return Self {
            size,
            faces: vec![vec![Vec3::zeros(); size * size]; FACE_COUNT],
        };
    }

    /// `faces` in [`CubeFace::ALL`] order, each `size * size` texels.
    pub fn from_faces(size: usize, faces: Vec<Vec<Vec3>>) -> Self {
        assert_eq!(faces.len(), FACE_COUNT, "a cube level has six faces");
        assert!(faces.iter().all(|f| f.len() == size * size), "face size mismatch");
        return Self { size, faces };
    }

    pub fn size(&self) -> usize {
        return self.size;
    }

    pub fn face(&self, face: CubeFace) -> &[Vec3] {
        return &self.faces[face.index()][..];
    }

    pub fn texel(&self, face: CubeFace, x: usize, y: usize) -> Vec3 {
        return self.faces[face.index()][x + y * self.size];
    }

    pub fn set_texel(&mut self, face: CubeFace, x: usize, y: usize, color: Vec3) {
        self.faces[face.index()][x + y * self.size] = color;
    }

    /// Bilinear lookup inside the face the direction hits. Filtering stops at face edges.
    pub fn sample(&self, direction: Vec3) -> Vec3 {
        if self.size == 0 {
            return Vec3::zeros();
        }
        let (face, u, v) = CubeFace::from_direction(direction);
        let last = self.size as f32 - 1.0;
        let x = (u * self.size as f32 - 0.5).clamp(0.0, last);
        let y = (v * self.size as f32 - 0.5).clamp(0.0, last);
        let (x0, y0) = (x.floor() as usize, y.floor() as usize);
        let (x1, y1) = ((x0 + 1).min(self.size - 1), (y0 + 1).min(self.size - 1));
        let (tx, ty) = (x - x0 as f32, y - y0 as f32);
        let top = self.texel(face, x0, y0) * (1.0 - tx) + self.texel(face, x1, y0) * tx;
        let bottom = self.texel(face, x0, y1) * (1.0 - tx) + self.texel(face, x1, y1) * tx;
        return top * (1.0 - ty) + bottom * ty;
    }
}

/// Mip chain, level 0 is the sharpest. Each level is half the size of the previous one.
#[derive(Debug, Clone)]
pub struct CubeMap {
    levels: Vec<CubeLevel>,
}

impl CubeMap {
    pub fn new(base: CubeLevel) -> Self {
        return Self { levels: vec![base] };
    }

    pub fn push_level(&mut self, level: CubeLevel) {
        self.levels.push(level);
    }

    pub fn levels(&self) -> &[CubeLevel] {
        return &self.levels[..];
    }

    pub fn level(&self, lod: usize) -> &CubeLevel {
        return &self.levels[lod];
    }

    pub fn mip_count(&self) -> usize {
        return self.levels.len();
    }

    pub fn base_size(&self) -> usize {
        return self.levels[0].size();
    }

    /// Trilinear lookup: `lod` is clamped to the chain and blended between neighbouring levels.
    pub fn sample_lod(&self, direction: Vec3, lod: f32) -> Vec3 {
        let max_lod = (self.levels.len() - 1) as f32;
        let lod = if lod.is_nan() { 0.0 } else { lod.clamp(0.0, max_lod) };
        let lower = lod.floor() as usize;
        let upper = (lower + 1).min(self.levels.len() - 1);
        let t = lod - lower as f32;
        let a = self.levels[lower].sample(direction);
        if t == 0.0 || upper == lower {
            return a;
        }
        return a * (1.0 - t) + self.levels[upper].sample(direction) * t;
    }

    /// Roughness 0 reads the sharpest level, 1 the blurriest.
    pub fn sample_roughness(&self, direction: Vec3, roughness: f32) -> Vec3 {
        let max_lod = (self.levels.len() - 1) as f32;
        return self.sample_lod(direction, roughness.clamp(0.0, 1.0) * max_lod);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_lookup_inverts_face_direction() {
        for face in CubeFace::ALL {
            for &(s, t) in &[(0.0, 0.0), (0.5, -0.25), (-0.75, 0.6)] {
                let (hit, u, v) = CubeFace::from_direction(face.direction(s, t) * 3.0);
                assert_eq!(hit, face);
                assert!((u * 2.0 - 1.0 - s).abs() < 1e-6);
                assert!((v * 2.0 - 1.0 - t).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn texel_directions_are_unit_and_on_their_face() {
        for face in CubeFace::ALL {
            let direction = texel_direction(face, 0, 3, 4);
            assert!((direction.norm() - 1.0).abs() < 1e-6);
            assert_eq!(CubeFace::from_direction(direction).0, face);
        }
    }

    #[test]
    fn level_sampling_hits_the_right_face() {
        let mut level = CubeLevel::new(2);
        for y in 0..2 {
            for x in 0..2 {
                level.set_texel(CubeFace::NegativeY, x, y, vector![0.0, 0.0, 1.0]);
            }
        }
        assert_eq!(level.sample(vector![0.1, -1.0, 0.2]), vector![0.0, 0.0, 1.0]);
        assert_eq!(level.sample(vector![0.0, 1.0, 0.0]), Vec3::zeros());
    }

    #[test]
    fn lod_blends_between_levels() {
        let mut base = CubeLevel::new(2);
        let mut top = CubeLevel::new(1);
        for face in CubeFace::ALL {
            for y in 0..2 {
                for x in 0..2 {
                    base.set_texel(face, x, y, Vec3::repeat(1.0));
                }
            }
            top.set_texel(face, 0, 0, Vec3::repeat(3.0));
        }
        let mut map = CubeMap::new(base);
        map.push_level(top);
        let direction = vector![0.3, 0.2, 1.0];
        assert_eq!(map.sample_lod(direction, 0.0), Vec3::repeat(1.0));
        assert!((map.sample_lod(direction, 0.5) - Vec3::repeat(2.0)).norm() < 1e-6);
        assert_eq!(map.sample_roughness(direction, 7.0), Vec3::repeat(3.0));
    }
}
