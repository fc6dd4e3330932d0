use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time;

use anyhow::{bail, Context};
use image::{DynamicImage, RgbImage};
use log::{info, warn};
use nalgebra::vector;
use obj::{load_obj, Obj, TexturedVertex};
use show_image::{create_window, event, ImageInfo, ImageView, WindowOptions};

use tiny_rasterizer::config::RenderConfig;
use tiny_rasterizer::ibl::cubemap::CubeMap;
use tiny_rasterizer::ibl::{EnvironmentSource, Prefilter};
use tiny_rasterizer::image::Texture;
use tiny_rasterizer::math::Vec3;
use tiny_rasterizer::pipeline::{draw_scene, render_shadow_map, CullMode, DrawState};
use tiny_rasterizer::post::{ambient_occlusion, depth_image, fxaa, resolve_lighting, save_png, tone_map, OcclusionSettings};
use tiny_rasterizer::raster::Viewport;
use tiny_rasterizer::scene::buffer::FrameContext;
use tiny_rasterizer::scene::shader::{Billboard, DepthShader, DirectionalLight, LitShader, UnlitShader};
use tiny_rasterizer::scene::{Camera, Instance, Mesh};

pub struct Params {
    pub print_fps: bool,
    pub asset_path: PathBuf,
    pub shader_pipeline_name: String,
    pub config: RenderConfig,
    pub output: Option<PathBuf>, // Renders a single frame into this file instead of opening a window.
}

/// Passes making up a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Unlit,     // Texture only.
    Lit,       // Forward lighting.
    Shadow,    // Shadow map pass, then forward lighting.
    Deferred,  // Shadow map, G-buffer fill, SSAO and lighting resolve.
    Billboard, // Camera facing triangles, unlit.
    Depth,     // Depth buffer view, nearest white.
}

impl FromStr for Pipeline {
    type Err = anyhow::Error;

    fn from_str(name: &str) -> anyhow::Result<Self> {
        return Ok(match name {
            "unlit" | "default" => Pipeline::Unlit,
            "lit" | "phong" => Pipeline::Lit,
            "shadow" => Pipeline::Shadow,
            "deferred" | "occlusion" => Pipeline::Deferred,
            "billboard" => Pipeline::Billboard,
            "depth" => Pipeline::Depth,
            _ => bail!(
                "unknown shader pipeline '{}', expected one of unlit, lit, shadow, deferred, billboard, depth",
                name
            ),
        });
    }
}

/// Helper, defining exit event to be an Escape key press.
fn is_exit_event(window_event: event::WindowEvent) -> bool {
    if let event::WindowEvent::KeyboardInput(event) = window_event {
        if event.input.key_code == Some(event::VirtualKeyCode::Escape) && event.input.state.is_released() {
            return true;
        }
    }

    return false;
}

/// OBJ texture coordinates grow upwards, textures are stored top row first.
fn load_mesh(path: &Path) -> anyhow::Result<Mesh> {
    let file = File::open(path).with_context(|| format!("failed to open model '{}'", path.display()))?;
    let model: Obj<TexturedVertex, u32> =
        load_obj(BufReader::new(file)).with_context(|| format!("failed to parse model '{}'", path.display()))?;

    let positions = model.vertices.iter().map(|v| vector![v.position[0], v.position[1], v.position[2]]).collect();
    let normals = model.vertices.iter().map(|v| vector![v.normal[0], v.normal[1], v.normal[2]]).collect();
    let uvs = model.vertices.iter().map(|v| vector![v.texture[0], 1.0 - v.texture[1]]).collect();
    let indices: Vec<usize> = model.indices.iter().map(|&i| i as usize).collect();
    info!("Loaded {}: {} vertices, {} triangles", path.display(), model.vertices.len(), indices.len() / 3);

    return Ok(Mesh::indexed(positions, indices).with_normals(normals).with_uvs(uvs));
}

/// Diffuse texture sitting next to the model as `<stem>_diffuse.tga`, if there is one.
fn load_diffuse(model_path: &Path) -> anyhow::Result<Option<Arc<Texture>>> {
    let stem = model_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let path = model_path.with_file_name(format!("{}_diffuse.tga", stem));
    if !path.exists() {
        warn!("No diffuse texture at {}, rendering untextured", path.display());
        return Ok(None);
    }
    return Ok(Some(Arc::new(Texture::load(&path)?)));
}

struct Renderer {
    config: RenderConfig,
    pipeline: Pipeline,
    camera: Camera,
    instances: Vec<Instance>,
    base_rotations: Vec<Vec3>,
    environment: Option<Arc<CubeMap>>,
    frame: FrameContext,
}

impl Renderer {
    fn new(params: &Params) -> anyhow::Result<Self> {
        let config = params.config.clone();
        let pipeline: Pipeline = params.shader_pipeline_name.parse()?;
        let mesh = Arc::new(load_mesh(&params.asset_path)?);
        let diffuse = load_diffuse(&params.asset_path)?;

        let mut instances = Vec::new();
        let mut base_rotations = Vec::new();
        for (position, rotation, scale) in config.placements() {
            let mut instance = Instance::new(Arc::clone(&mesh));
            instance.position = position;
            instance.rotation = rotation;
            instance.scale = scale;
            if let Some(texture) = &diffuse {
                instance = instance.with_texture(Arc::clone(texture));
            }
            instances.push(instance);
            base_rotations.push(rotation);
        }

        let lit = matches!(pipeline, Pipeline::Lit | Pipeline::Shadow | Pipeline::Deferred);
        let environment = match (&config.environment, lit) {
            (Some(settings), true) => {
                let source = EnvironmentSource::load_equirectangular(&settings.path)?;
                let map = Prefilter::with_available_threads().prefilter(Arc::new(source), settings.size);
                Some(Arc::new(map))
            }
            _ => None,
        };

        let mut frame = FrameContext::new(config.viewport());
        if pipeline == Pipeline::Deferred {
            frame = frame.with_gbuffer();
        }
        frame.clear_color = config.clear_color();

        info!("Rendering {} instance(s) with the {:?} pipeline", instances.len(), pipeline);
        return Ok(Self {
            camera: config.camera(),
            config,
            pipeline,
            instances,
            base_rotations,
            environment,
            frame,
        });
    }

    fn lit_shader(&self) -> LitShader {
        let mut shader = LitShader::new(DirectionalLight {
            direction: self.config.light_direction(),
            color: self.config.light_color(),
        });
        shader.ambient = self.config.ambient();
        if let (Some(environment), Some(settings)) = (&self.environment, &self.config.environment) {
            shader = shader.with_environment(Arc::clone(environment));
            shader.roughness = settings.roughness;
            shader.reflectivity = settings.reflectivity;
        }
        if matches!(self.pipeline, Pipeline::Shadow | Pipeline::Deferred) {
            let size = self.config.shadow_map_size;
            let shadow = render_shadow_map(&self.config.light_camera(), &self.instances, Viewport::new(size, size));
            shader = shader.with_shadow(Arc::new(shadow));
        }
        return shader;
    }

    /// One frame with every instance turned by `spin` radians around y.
    fn render(&mut self, spin: f32) -> RgbImage {
        for (instance, base) in self.instances.iter_mut().zip(&self.base_rotations) {
            instance.rotation = vector![base.x, base.y + spin, base.z];
        }
        let viewport = self.config.viewport();
        let state = DrawState::default().with_cull(CullMode::Back);

        self.frame.begin_frame(viewport);
        match self.pipeline {
            Pipeline::Unlit => {
                let mut shader = UnlitShader::default();
                draw_scene(&mut self.frame, &self.camera, &self.instances, &mut shader, state);
            }
            Pipeline::Billboard => {
                let mut shader = Billboard::new(UnlitShader::default());
                draw_scene(&mut self.frame, &self.camera, &self.instances, &mut shader, DrawState::default());
            }
            Pipeline::Lit | Pipeline::Shadow | Pipeline::Deferred => {
                let mut shader = self.lit_shader();
                draw_scene(&mut self.frame, &self.camera, &self.instances, &mut shader, state);
            }
            Pipeline::Depth => {
                let mut shader = DepthShader::default();
                let state = DrawState::depth_only().with_cull(CullMode::Back);
                draw_scene(&mut self.frame, &self.camera, &self.instances, &mut shader, state);
                self.frame.end_frame();
                return DynamicImage::ImageLuma8(depth_image(self.frame.depth(), viewport)).to_rgb8();
            }
        }

        if self.pipeline == Pipeline::Deferred {
            let occlusion = match (self.config.ambient_occlusion, self.frame.gbuffer()) {
                (true, Some(gbuffer)) => Some(ambient_occlusion(gbuffer, viewport, OcclusionSettings::default())),
                _ => None,
            };
            let (canvas, gbuffer) = self.frame.canvas_and_gbuffer();
            if let Some(gbuffer) = gbuffer {
                resolve_lighting(canvas, gbuffer, occlusion.as_deref());
            }
        }
        if self.config.fxaa {
            fxaa(self.frame.canvas_mut());
        }
        self.frame.end_frame();

        return tone_map(self.frame.canvas(), self.config.exposure);
    }
}

/// Actualy launches the window, showing images, or renders one frame to `params.output`.
pub fn run(params: Params) -> Result<(), Box<dyn std::error::Error>> {
    let mut renderer = Renderer::new(&params)?;

    if let Some(output) = &params.output {
        let image = renderer.render(0.0);
        save_png(&image, output)?;
        return Ok(());
    }

    let (width, height) = (params.config.width as u32, params.config.height as u32);
    let window_options: WindowOptions = WindowOptions {
        size: Some([width, height]),
        ..Default::default()
    };
    let window = create_window("output", window_options)?;
    let event_channel = window.event_channel()?;

    let mut exit = false;
    let time_begin = time::Instant::now();
    let mut frame_counter_time_begin = time::Instant::now();
    let mut frame_counter: u32 = 0;
    while !exit {
        let passed_time = time::Instant::now().duration_since(time_begin).as_secs_f32();
        let image = renderer.render(passed_time);
        let image_data = ImageView::new(ImageInfo::rgb8(width, height), image.as_raw());
        window.set_image("image", image_data)?;

        // Unloading all the garbage from event channel, that has piled up, looking for exit event.
        exit = event_channel.try_iter().any(is_exit_event);

        if params.print_fps {
            // Counting frames to printout stats every seconds.
            frame_counter += 1;
            if time::Instant::now().duration_since(frame_counter_time_begin).as_secs_f32() > 1.0 {
                println!("FPS --- {}", frame_counter);
                frame_counter_time_begin = time::Instant::now();
                frame_counter = 0;
            }
        }
    }

    return Ok(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_names() {
        assert_eq!("lit".parse::<Pipeline>().unwrap(), Pipeline::Lit);
        assert_eq!("default".parse::<Pipeline>().unwrap(), Pipeline::Unlit);
        assert_eq!("occlusion".parse::<Pipeline>().unwrap(), Pipeline::Deferred);
        assert_eq!("depth".parse::<Pipeline>().unwrap(), Pipeline::Depth);
        let error = "toon".parse::<Pipeline>().unwrap_err();
        assert!(error.to_string().contains("unknown shader pipeline 'toon'"));
    }

    #[test]
    fn missing_model_is_reported() {
        let error = load_mesh(Path::new("/nonexistent/model.obj")).unwrap_err();
        assert!(error.to_string().contains("failed to open model"));
    }
}
