mod app;

use std::path::PathBuf;

use clap::Parser;

use tiny_rasterizer::config::RenderConfig;

/// Software rasterizer with programmable shader stages, shadow maps and image based lighting.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Wavefront OBJ model to render.
    #[clap(short = 'p', long, default_value = "assets/diablo/diablo3_pose.obj")]
    asset_path: PathBuf,

    /// Shader pipeline: unlit, lit, shadow, deferred, billboard or depth.
    #[clap(short = 's', long = "shader", default_value = "lit")]
    shader_pipeline_name: String,

    /// JSON render config, defaults are used for anything missing.
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// Render a single frame into this PNG instead of opening a window.
    #[clap(short = 'o', long)]
    output: Option<PathBuf>,

    #[clap(long)]
    print_fps: bool,
}

#[show_image::main]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };

    let params = app::Params {
        print_fps: args.print_fps,
        asset_path: args.asset_path,
        shader_pipeline_name: args.shader_pipeline_name,
        config,
        output: args.output,
    };

    app::run(params)?;

    return Ok(());
}
