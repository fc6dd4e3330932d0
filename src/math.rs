//! Vector and matrix kernel shared by the clipper, the rasterizer and the IBL engine.
//!
//! Storage and arithmetic come from nalgebra. What lives here are the pieces the renderer
//! wants spelled out: closed-form cofactor determinants and inverses for the small square
//! matrices, axis-angle rotation and the transform constructors.

use nalgebra as na;
use na::{matrix, vector, SMatrix, SVector};

pub type Vec2 = na::Vector2<f32>;
pub type Vec3 = na::Vector3<f32>;
pub type Vec4 = na::Vector4<f32>;

/// Row-major addressed (`m[(row, col)]`) fixed size matrix.
pub type Mat<const R: usize, const C: usize> = SMatrix<f32, R, C>;
pub type Mat2 = Mat<2, 2>;
pub type Mat3 = Mat<3, 3>;
pub type Mat4 = Mat<4, 4>;

/// Normalization that returns `None` for zero-length or non-finite vectors instead of
/// producing NaN components.
pub fn checked_normalize<const D: usize>(v: SVector<f32, D>) -> Option<SVector<f32, D>> {
    let norm = v.norm();
    if norm > 0.0 && norm.is_finite() {
        return Some(v / norm);
    }
    return None;
}

/// Counter-clockwise rotation of a 2D vector by `angle` radians.
pub fn rotate_2d(v: Vec2, angle: f32) -> Vec2 {
    let (s, c) = angle.sin_cos();
    return vector![c * v.x - s * v.y, s * v.x + c * v.y];
}

/// Rotation of `v` around a unit `axis` by `angle` radians (Rodrigues' formula).
pub fn rotate_about_axis(v: Vec3, axis: Vec3, angle: f32) -> Vec3 {
    let (s, c) = angle.sin_cos();
    return v * c + axis.cross(&v) * s + axis * (axis.dot(&v) * (1.0 - c));
}

pub fn determinant2(m: &Mat2) -> f32 {
    return m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
}

/// Determinant of the 2x2 matrix left after removing `row` and `col`.
fn minor3(m: &Mat3, row: usize, col: usize) -> f32 {
    let mut sub = Mat2::zeros();
    let mut sub_row = 0;
    for r in (0..3).filter(|&r| r != row) {
        let mut sub_col = 0;
        for c in (0..3).filter(|&c| c != col) {
            sub[(sub_row, sub_col)] = m[(r, c)];
            sub_col += 1;
        }
        sub_row += 1;
    }
    return determinant2(&sub);
}

fn cofactor3(m: &Mat3, row: usize, col: usize) -> f32 {
    let minor = minor3(m, row, col);
    return if (row + col) % 2 == 0 { minor } else { -minor };
}

/// Cofactor expansion along the first row.
pub fn determinant3(m: &Mat3) -> f32 {
    return (0..3).map(|c| m[(0, c)] * cofactor3(m, 0, c)).sum();
}

/// Determinant of the 3x3 matrix left after removing `row` and `col`.
fn minor4(m: &Mat4, row: usize, col: usize) -> f32 {
    let mut sub = Mat3::zeros();
    let mut sub_row = 0;
    for r in (0..4).filter(|&r| r != row) {
        let mut sub_col = 0;
        for c in (0..4).filter(|&c| c != col) {
            sub[(sub_row, sub_col)] = m[(r, c)];
            sub_col += 1;
        }
        sub_row += 1;
    }
    return determinant3(&sub);
}

fn cofactor4(m: &Mat4, row: usize, col: usize) -> f32 {
    let minor = minor4(m, row, col);
    return if (row + col) % 2 == 0 { minor } else { -minor };
}

/// Cofactor expansion along the first row.
pub fn determinant4(m: &Mat4) -> f32 {
    return (0..4).map(|c| m[(0, c)] * cofactor4(m, 0, c)).sum();
}

/// Closed-form inverse. The reciprocal of the determinant is taken unconditionally, so a
/// singular matrix comes back full of infinities and NaNs rather than as an error.
pub fn inverse2(m: &Mat2) -> Mat2 {
    let inv_det = 1.0 / determinant2(m);
    return matrix![ m[(1, 1)] * inv_det, -m[(0, 1)] * inv_det;
                   -m[(1, 0)] * inv_det,  m[(0, 0)] * inv_det];
}

/// Adjugate over determinant, see [`inverse2`] for the singular case.
pub fn inverse3(m: &Mat3) -> Mat3 {
    let inv_det = 1.0 / determinant3(m);
    let mut inverse = Mat3::zeros();
    for row in 0..3 {
        for col in 0..3 {
            // Adjugate is the transposed cofactor matrix.
            inverse[(col, row)] = cofactor3(m, row, col) * inv_det;
        }
    }
    return inverse;
}

/// Adjugate over determinant, see [`inverse2`] for the singular case.
pub fn inverse4(m: &Mat4) -> Mat4 {
    let inv_det = 1.0 / determinant4(m);
    let mut inverse = Mat4::zeros();
    for row in 0..4 {
        for col in 0..4 {
            inverse[(col, row)] = cofactor4(m, row, col) * inv_det;
        }
    }
    return inverse;
}

pub fn translation(offset: Vec3) -> Mat4 {
    return matrix![1.0, 0.0, 0.0, offset.x;
                   0.0, 1.0, 0.0, offset.y;
                   0.0, 0.0, 1.0, offset.z;
                   0.0, 0.0, 0.0, 1.0];
}

pub fn scaling(scale: Vec3) -> Mat4 {
    return matrix![scale.x, 0.0,     0.0,     0.0;
                   0.0,     scale.y, 0.0,     0.0;
                   0.0,     0.0,     scale.z, 0.0;
                   0.0,     0.0,     0.0,     1.0];
}

pub fn rotation_x(angle: f32) -> Mat4 {
    let (s, c) = angle.sin_cos();
    return matrix![1.0, 0.0, 0.0, 0.0;
                   0.0, c,   -s,  0.0;
                   0.0, s,   c,   0.0;
                   0.0, 0.0, 0.0, 1.0];
}

pub fn rotation_y(angle: f32) -> Mat4 {
    let (s, c) = angle.sin_cos();
    return matrix![c,   0.0, s,   0.0;
                   0.0, 1.0, 0.0, 0.0;
                   -s,  0.0, c,   0.0;
                   0.0, 0.0, 0.0, 1.0];
}

pub fn rotation_z(angle: f32) -> Mat4 {
    let (s, c) = angle.sin_cos();
    return matrix![c,   -s,  0.0, 0.0;
                   s,   c,   0.0, 0.0;
                   0.0, 0.0, 1.0, 0.0;
                   0.0, 0.0, 0.0, 1.0];
}

/// Model matrix of an instance: scale first, then the Euler rotation composed as Rx * Ry * Rz,
/// then the translation.
pub fn model_matrix(position: Vec3, rotation: Vec3, scale: Vec3) -> Mat4 {
    let rotation = rotation_x(rotation.x) * rotation_y(rotation.y) * rotation_z(rotation.z);
    return translation(position) * rotation * scaling(scale);
}

/// Right-handed view matrix, the camera looks down its local -z.
pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    let forward = checked_normalize(target - eye).unwrap_or(vector![0.0, 0.0, -1.0]);
    let side = checked_normalize(forward.cross(&up)).unwrap_or(vector![1.0, 0.0, 0.0]);
    let new_up = side.cross(&forward);
    return matrix![ side.x,     side.y,     side.z,    -side.dot(&eye);
                    new_up.x,   new_up.y,   new_up.z,  -new_up.dot(&eye);
                   -forward.x, -forward.y, -forward.z,  forward.dot(&eye);
                    0.0,        0.0,        0.0,        1.0];
}

/// OpenGL style projection: clip-space w is the view distance, so `w == znear` on the near
/// plane and NDC z runs from -1 (near) to 1 (far).
pub fn perspective(fov_y: f32, aspect: f32, znear: f32, zfar: f32) -> Mat4 {
    let f = 1.0 / (fov_y / 2.0).tan();
    let depth = znear - zfar;
    return matrix![f / aspect, 0.0, 0.0,                    0.0;
                   0.0,        f,   0.0,                    0.0;
                   0.0,        0.0, (zfar + znear) / depth, 2.0 * zfar * znear / depth;
                   0.0,        0.0, -1.0,                   0.0];
}
