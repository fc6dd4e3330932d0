//! Pixel containers: the float RGBA canvas the rasterizer draws into and sampled textures.
//!
//! Both store linear-light RGBA as flat row-major arrays with (0, 0) at the top left, the same
//! orientation the viewport transform produces, so no row flipping happens anywhere.

use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use log::info;
use nalgebra::vector;

use crate::math::{Vec2, Vec4};

/// Color target of the software path.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<Vec4>, // Storing flat array.
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        return Self {
            width,
            height,
            pixels: vec![Vec4::zeros(); width * height],
        };
    }

    pub fn width(&self) -> usize {
        return self.width;
    }

    pub fn height(&self) -> usize {
        return self.height;
    }

    /// Reallocates only when the size actually changes; contents are undefined afterwards until
    /// the next [`Canvas::clear`].
    pub fn resize(&mut self, width: usize, height: usize) {
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            self.pixels = vec![Vec4::zeros(); width * height];
        }
    }

    pub fn clear(&mut self, color: Vec4) {
        self.pixels.fill(color);
    }

    pub fn pixels(&self) -> &[Vec4] {
        return &self.pixels[..];
    }

    pub fn pixels_mut(&mut self) -> &mut [Vec4] {
        return &mut self.pixels[..];
    }

    pub fn pixel(&self, x: usize, y: usize) -> Vec4 {
        return self.pixels[x + y * self.width];
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, color: Vec4) {
        self.pixels[x + y * self.width] = color;
    }

    /// Alpha blend of `color` over the pixel at `index`: rgb goes `dst * (1 - a) + src * a`,
    /// alpha composes with the usual "over" rule.
    pub fn blend(&mut self, index: usize, color: Vec4) {
        let dst = self.pixels[index];
        let a = color.w;
        let rgb = dst.xyz() * (1.0 - a) + color.xyz() * a;
        self.pixels[index] = vector![rgb.x, rgb.y, rgb.z, a + dst.w * (1.0 - a)];
    }
}

/// How texels are picked for a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Bilinear,
}

/// What happens to coordinates outside [0, 1], chosen per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    Repeat,
    Clamp,
}

impl Wrap {
    fn apply(self, coord: i64, size: usize) -> usize {
        let size = size as i64;
        return match self {
            Wrap::Repeat => coord.rem_euclid(size) as usize,
            Wrap::Clamp => coord.clamp(0, size - 1) as usize,
        };
    }
}

/// Decoded image in linear RGBA, sampled with `uv` in [0, 1] and v = 0 at the top row.
#[derive(Debug, Clone)]
pub struct Texture {
    width: usize,
    height: usize,
    texels: Vec<Vec4>,
    pub filter: Filter,
    pub wrap_u: Wrap,
    pub wrap_v: Wrap,
}

impl Texture {
    /// `texels` has to hold exactly `width * height` entries.
    pub fn new(width: usize, height: usize, texels: Vec<Vec4>) -> Self {
        assert_eq!(texels.len(), width * height, "texel count does not match texture size");
        return Self {
            width,
            height,
            texels,
            filter: Filter::Bilinear,
            wrap_u: Wrap::Repeat,
            wrap_v: Wrap::Repeat,
        };
    }

    pub fn with_wrap(mut self, wrap_u: Wrap, wrap_v: Wrap) -> Self {
        self.wrap_u = wrap_u;
        self.wrap_v = wrap_v;
        return self;
    }

    /// 1x1 texture, handy as a default binding.
    pub fn solid(color: Vec4) -> Self {
        return Self::new(1, 1, vec![color]);
    }

    /// 8-bit images are assumed to be sRGB encoded and are decoded to linear light; float
    /// images (HDR, EXR) are taken as linear already.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let is_float = matches!(image, DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_));
        let rgba = image.into_rgba32f();
        let (width, height) = (rgba.width() as usize, rgba.height() as usize);
        let texels = rgba
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                if is_float {
                    return vector![r, g, b, a];
                }
                return vector![srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b), a];
            })
            .collect();
        return Self::new(width, height, texels);
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path).with_context(|| format!("failed to load texture '{}'", path.display()))?;
        info!("Loaded texture {} ({}x{})", path.display(), image.width(), image.height());
        return Ok(Self::from_dynamic(image));
    }

    pub fn width(&self) -> usize {
        return self.width;
    }

    pub fn height(&self) -> usize {
        return self.height;
    }

    pub fn texel(&self, x: i64, y: i64) -> Vec4 {
        return self.wrapped_texel(x, y, (self.wrap_u, self.wrap_v));
    }

    fn wrapped_texel(&self, x: i64, y: i64, (wrap_u, wrap_v): (Wrap, Wrap)) -> Vec4 {
        let x = wrap_u.apply(x, self.width);
        let y = wrap_v.apply(y, self.height);
        return self.texels[x + y * self.width];
    }

    pub fn sample(&self, uv: Vec2) -> Vec4 {
        return self.sample_wrapped(uv, self.wrap_u, self.wrap_v);
    }

    /// Lookup with the given wrap modes in place of the texture's own.
    pub fn sample_wrapped(&self, uv: Vec2, wrap_u: Wrap, wrap_v: Wrap) -> Vec4 {
        let wrap = (wrap_u, wrap_v);
        return match self.filter {
            Filter::Nearest => self.sample_nearest(uv, wrap),
            Filter::Bilinear => self.sample_bilinear(uv, wrap),
        };
    }

    fn sample_nearest(&self, uv: Vec2, wrap: (Wrap, Wrap)) -> Vec4 {
        let x = (uv.x * self.width as f32).floor() as i64;
        let y = (uv.y * self.height as f32).floor() as i64;
        return self.wrapped_texel(x, y, wrap);
    }

    fn sample_bilinear(&self, uv: Vec2, wrap: (Wrap, Wrap)) -> Vec4 {
        // Texel centers sit at half-integer coordinates.
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (tx, ty) = (x - x0, y - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);
        let texel = |x, y| self.wrapped_texel(x, y, wrap);
        let top = texel(x0, y0) * (1.0 - tx) + texel(x0 + 1, y0) * tx;
        let bottom = texel(x0, y0 + 1) * (1.0 - tx) + texel(x0 + 1, y0 + 1) * tx;
        return top * (1.0 - ty) + bottom * ty;
    }
}

fn srgb_to_linear(value: f32) -> f32 {
    return value.max(0.0).powf(2.2);
}
