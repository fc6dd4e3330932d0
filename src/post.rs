//! Screen-space passes run after the draws of a frame, and conversion of the float canvas into
//! displayable 8-bit images.

use std::f32::consts::PI;
use std::path::Path;

use anyhow::{Context, Result};
use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use log::info;
use nalgebra::vector;

use crate::image::Canvas;
use crate::math::Vec4;
use crate::raster::{Viewport, FAR_DEPTH};
use crate::scene::buffer::GBuffer;

/// Exposure, Reinhard and gamma 2.2 encoding of the canvas.
pub fn tone_map(canvas: &Canvas, exposure: f32) -> RgbImage {
    let encode = |value: f32| {
        let exposed = (value * exposure).max(0.0);
        let mapped = exposed / (1.0 + exposed);
        return (mapped.powf(1.0 / 2.2) * 255.0).round().clamp(0.0, 255.0) as u8;
    };
    let mut image = RgbImage::new(canvas.width() as u32, canvas.height() as u32);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let color = canvas.pixel(x as usize, y as usize);
        *pixel = Rgb([encode(color.x), encode(color.y), encode(color.z)]);
    }
    return image;
}

/// Depth buffer as a grey image, nearest covered pixel white and farthest black. Uncovered
/// pixels stay black.
pub fn depth_image(depth: &[f64], viewport: Viewport) -> GrayImage {
    let covered = depth.iter().copied().filter(|&z| z < FAR_DEPTH);
    let (min, max) = covered.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), z| (lo.min(z), hi.max(z)));
    let range = if max > min { max - min } else { 1.0 };
    let mut image = GrayImage::new(viewport.width as u32, viewport.height as u32);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let z = depth[x as usize + y as usize * viewport.width];
        let value = if z < FAR_DEPTH { 255.0 * (1.0 - (z - min) / range) } else { 0.0 };
        *pixel = Luma([value.round().clamp(0.0, 255.0) as u8]);
    }
    return image;
}

/// Deferred lighting: every covered pixel's albedo in the canvas is multiplied by the stored
/// irradiance (scaled by `occlusion` when given) and the stored specular is added.
pub fn resolve_lighting(canvas: &mut Canvas, gbuffer: &GBuffer, occlusion: Option<&[f32]>) {
    for (index, (pixel, texel)) in canvas.pixels_mut().iter_mut().zip(gbuffer.texels()).enumerate() {
        if !texel.covered {
            continue;
        }
        let ambient = occlusion.map_or(1.0, |factors| factors[index]);
        let rgb = pixel.xyz().component_mul(&texel.irradiance) * ambient + texel.specular;
        *pixel = vector![rgb.x, rgb.y, rgb.z, pixel.w];
    }
}

/// Parameters of [`ambient_occlusion`].
#[derive(Debug, Clone, Copy)]
pub struct OcclusionSettings {
    pub samples: usize,      // Ring samples around each pixel.
    pub pixel_radius: f32,   // Screen-space ring radius.
    pub world_radius: f32,   // Neighbours farther away than this do not occlude.
    pub bias: f32,           // Ignores neighbours almost in the tangent plane.
}

impl Default for OcclusionSettings {
    fn default() -> Self {
        return Self {
            samples: 16,
            pixel_radius: 6.0,
            world_radius: 0.5,
            bias: 0.05,
        };
    }
}

/// Screen-space ambient occlusion from the G-buffer positions and normals. Each covered pixel
/// looks at a ring of neighbours; those above its tangent plane and within `world_radius`
/// darken it. Returns one factor per pixel, 1 meaning unoccluded.
pub fn ambient_occlusion(gbuffer: &GBuffer, viewport: Viewport, settings: OcclusionSettings) -> Vec<f32> {
    let mut factors = vec![1.0; viewport.pixel_count()];
    if settings.samples == 0 {
        return factors;
    }
    let angle_step = 2.0 * PI / settings.samples as f32;
    for y in 0..viewport.height {
        for x in 0..viewport.width {
            let index = x + y * viewport.width;
            let center = gbuffer.texel(index);
            if !center.covered {
                continue;
            }
            let mut occlusion = 0.0;
            for i in 0..settings.samples {
                let angle = angle_step * i as f32;
                // Alternating radii pick up both tight creases and wider cavities.
                let radius = if i % 2 == 0 { settings.pixel_radius } else { 0.5 * settings.pixel_radius };
                let sx = x as f32 + angle.cos() * radius;
                let sy = y as f32 + angle.sin() * radius;
                if sx < 0.0 || sy < 0.0 || sx >= viewport.width as f32 || sy >= viewport.height as f32 {
                    continue;
                }
                let neighbour = gbuffer.texel(sx as usize + sy as usize * viewport.width);
                if !neighbour.covered {
                    continue;
                }
                let offset = neighbour.world_position - center.world_position;
                let distance = offset.norm();
                if distance < 1e-6 || distance > settings.world_radius {
                    continue;
                }
                let facing = (center.normal.dot(&offset) / distance - settings.bias).max(0.0);
                occlusion += facing * (1.0 - distance / settings.world_radius);
            }
            factors[index] = (1.0 - occlusion / settings.samples as f32).clamp(0.0, 1.0);
        }
    }
    return factors;
}

/// Contrast below this never counts as an edge.
const FXAA_EDGE_THRESHOLD_MIN: f32 = 0.0312;
/// Contrast relative to the brightest neighbour needed for an edge.
const FXAA_EDGE_THRESHOLD: f32 = 0.125;
const FXAA_SUBPIXEL_QUALITY: f32 = 0.75;
const FXAA_SEARCH_STEPS: i64 = 8;

/// Perceptual luma of a linear color.
fn luma(color: Vec4) -> f32 {
    return color.xyz().dot(&vector![0.299, 0.587, 0.114]).max(0.0).sqrt();
}

/// Fast approximate anti-aliasing over the canvas. Pixels whose luma neighbourhood crosses an
/// edge are blended towards the neighbour across that edge, by how far they sit from the end
/// of the edge and by how much they stick out of their 3x3 neighbourhood. Flat areas are left
/// as they are.
pub fn fxaa(canvas: &mut Canvas) {
    let (width, height) = (canvas.width() as i64, canvas.height() as i64);
    if width == 0 || height == 0 {
        return;
    }
    let source = canvas.pixels().to_vec();
    let lumas: Vec<f32> = source.iter().map(|&color| luma(color)).collect();
    let at = |x: i64, y: i64| (x.clamp(0, width - 1) + y.clamp(0, height - 1) * width) as usize;
    let l = |x: i64, y: i64| lumas[at(x, y)];

    let output = canvas.pixels_mut();
    for y in 0..height {
        for x in 0..width {
            let m = l(x, y);
            let (n, s, w, e) = (l(x, y - 1), l(x, y + 1), l(x - 1, y), l(x + 1, y));
            let lmin = m.min(n).min(s).min(w).min(e);
            let lmax = m.max(n).max(s).max(w).max(e);
            let range = lmax - lmin;
            if range < FXAA_EDGE_THRESHOLD_MIN.max(lmax * FXAA_EDGE_THRESHOLD) {
                continue;
            }
            let (nw, ne, sw, se) = (l(x - 1, y - 1), l(x + 1, y - 1), l(x - 1, y + 1), l(x + 1, y + 1));

            let edge_horizontal =
                (-2.0 * w + nw + sw).abs() + 2.0 * (-2.0 * m + n + s).abs() + (-2.0 * e + ne + se).abs();
            let edge_vertical =
                (-2.0 * n + nw + ne).abs() + 2.0 * (-2.0 * m + w + e).abs() + (-2.0 * s + sw + se).abs();
            let horizontal = edge_horizontal >= edge_vertical;

            // Step across the edge towards the steeper side, and the direction along it.
            let (negative, positive) = if horizontal { (n, s) } else { (w, e) };
            let towards_negative = (negative - m).abs() >= (positive - m).abs();
            let (side, step) = if towards_negative { (negative, -1) } else { (positive, 1) };
            let (across_x, across_y) = if horizontal { (0, step) } else { (step, 0) };
            let (along_x, along_y) = if horizontal { (1, 0) } else { (0, 1) };
            let gradient = 0.25 * (negative - m).abs().max((positive - m).abs());
            let local_average = 0.5 * (side + m);

            // Walk both ways along the edge until the averaged luma leaves it.
            let edge_end = |direction: i64| {
                let mut distance = 1;
                let mut delta = 0.0;
                while distance <= FXAA_SEARCH_STEPS {
                    let (px, py) = (x + along_x * direction * distance, y + along_y * direction * distance);
                    delta = 0.5 * (l(px, py) + l(px + across_x, py + across_y)) - local_average;
                    if delta.abs() >= gradient {
                        break;
                    }
                    distance += 1;
                }
                return (distance.min(FXAA_SEARCH_STEPS) as f32, delta);
            };
            let (distance_negative, delta_negative) = edge_end(-1);
            let (distance_positive, delta_positive) = edge_end(1);
            let (closest, delta_closest) = if distance_negative < distance_positive {
                (distance_negative, delta_negative)
            } else {
                (distance_positive, delta_positive)
            };
            let pixel_offset = 0.5 - closest / (distance_negative + distance_positive);
            let correct_variation = (delta_closest < 0.0) != (m < local_average);
            let edge_offset = if correct_variation { pixel_offset } else { 0.0 };

            let average = (2.0 * (n + s + w + e) + nw + ne + sw + se) / 12.0;
            let subpixel = ((average - m).abs() / range).clamp(0.0, 1.0);
            let subpixel = (-2.0 * subpixel + 3.0) * subpixel * subpixel;
            let subpixel_offset = subpixel * subpixel * FXAA_SUBPIXEL_QUALITY;

            let offset = edge_offset.max(subpixel_offset);
            let center = source[at(x, y)];
            let neighbour = source[at(x + across_x, y + across_y)];
            output[at(x, y)] = center * (1.0 - offset) + neighbour * offset;
        }
    }
}

pub fn save_png<P: AsRef<Path>>(image: &RgbImage, path: P) -> Result<()> {
    let path = path.as_ref();
    image
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed to write image '{}'", path.display()))?;
    info!("Saved {}x{} image to {}", image.width(), image.height(), path.display());
    return Ok(());
}
