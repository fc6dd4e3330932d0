//! Software rendering core: homogeneous clipping, perspective-correct scanline rasterization,
//! a shader-stage pipeline driving them, and an image based lighting prefilter.

pub mod clip;
pub mod config;
pub mod ibl;
pub mod image;
pub mod math;
pub mod pipeline;
pub mod post;
pub mod raster;
pub mod scene;
