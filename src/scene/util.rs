use nalgebra::vector;

use crate::math::{checked_normalize, Mat3, Mat4, Vec2, Vec3, Vec4};

/// Transformation of a point to homogenous coordinates.
pub fn to_hom_point(v: Vec3) -> Vec4 {
    return vector![v.x, v.y, v.z, 1.0];
}

/// Transformation of a direction to homogenous coordinates.
pub fn to_hom_vector(v: Vec3) -> Vec4 {
    return vector![v.x, v.y, v.z, 0.0];
}

/// Perspective divide.
pub fn from_hom_point(v: Vec4) -> Vec3 {
    return vector![v.x / v.w, v.y / v.w, v.z / v.w];
}

/// Upper left 3x3 of the inverse transpose, the matrix normals transform with.
pub fn normal_matrix(model: &Mat4) -> Mat3 {
    let linear: Mat3 = model.fixed_slice::<3, 3>(0, 0).into_owned();
    return crate::math::inverse3(&linear).transpose();
}

/// Linear blend of the three per-vertex values of a triangle.
pub fn interpolate3(values: &[Vec3; 3], barycentric: Vec3) -> Vec3 {
    return values[0] * barycentric.x + values[1] * barycentric.y + values[2] * barycentric.z;
}

pub fn interpolate2(values: &[Vec2; 3], barycentric: Vec3) -> Vec2 {
    return values[0] * barycentric.x + values[1] * barycentric.y + values[2] * barycentric.z;
}

pub fn interpolate4(values: &[Vec4; 3], barycentric: Vec3) -> Vec4 {
    return values[0] * barycentric.x + values[1] * barycentric.y + values[2] * barycentric.z;
}

/// Mirror of `incident` around the unit normal `normal`.
pub fn reflect(incident: Vec3, normal: Vec3) -> Vec3 {
    return incident - normal * (2.0 * incident.dot(&normal));
}

/// Normalizes, or keeps `fallback` for vectors that cannot be normalized.
pub fn normalize_or(v: Vec3, fallback: Vec3) -> Vec3 {
    return checked_normalize(v).unwrap_or(fallback);
}
