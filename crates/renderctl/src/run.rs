use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::Mat4;
use propstore::MemoryProperties;
use renderengine::gpu::{Gpu, RecordingGpu, TextureTarget};
use renderengine::stereo::{build_warp_mesh, WarpMesh, WarpParams};
use renderengine::{
    synthesize, CompositionEngine, CompositorMode, Eye, Mesh, ProgramCache, Rect, Rotation,
    StateKey, StereoOptions, Texture,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{FrameArgs, OutputFormat, ShaderArgs, TextureArg, WarpArgs};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn shader(args: ShaderArgs) -> Result<()> {
    let key = args.key.unwrap_or_else(|| key_from_flags(&args));
    if key.has_dispersion() && !key.has_deform() {
        tracing::warn!("dispersion has no effect without deform");
    }
    let sources = synthesize(key);
    println!("// key {key}");
    println!("// vertex shader");
    print!("{}", sources.vertex);
    println!("// fragment shader");
    print!("{}", sources.fragment);
    Ok(())
}

fn key_from_flags(args: &ShaderArgs) -> StateKey {
    let texture = match args.texture {
        TextureArg::Off => StateKey::TEXTURE_OFF,
        TextureArg::Ext => StateKey::TEXTURE_EXT,
        TextureArg::Texture2d => StateKey::TEXTURE_2D,
    };
    let flag = |enabled: bool, on: u32| if enabled { on } else { 0 };
    StateKey::default()
        .set(StateKey::TEXTURE_MASK, texture)
        .set(StateKey::BLEND_MASK, flag(args.premultiplied, StateKey::BLEND_PREMULT))
        .set(StateKey::OPACITY_MASK, flag(args.opaque, StateKey::OPACITY_OPAQUE))
        .set(
            StateKey::PLANE_ALPHA_MASK,
            flag(args.plane_alpha, StateKey::PLANE_ALPHA_LT_ONE),
        )
        .set(
            StateKey::COLOR_MATRIX_MASK,
            flag(args.color_matrix, StateKey::COLOR_MATRIX_ON),
        )
        .set(StateKey::DEFORM_MASK, flag(args.deform, StateKey::DEFORM_ON))
        .set(
            StateKey::DISPERSION_MASK,
            flag(args.dispersion, StateKey::DISPERSION_ON),
        )
}

pub fn prime() -> Result<()> {
    let mut gpu = RecordingGpu::new();
    let cache = ProgramCache::new(&mut gpu);
    println!(
        "Primed {} programs ({} shaders compiled, {} programs linked)",
        cache.len(),
        gpu.shaders_compiled(),
        gpu.programs_linked()
    );
    for (key, program) in cache.iter() {
        let status = if program.is_valid() { "ok" } else { "invalid" };
        println!("  {status:<7} {key}");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct Bounds {
    min: [f32; 2],
    max: [f32; 2],
}

impl From<([f32; 2], [f32; 2])> for Bounds {
    fn from((min, max): ([f32; 2], [f32; 2])) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Serialize)]
struct WarpSummary {
    orientation: i32,
    height_scale: f32,
    ipd_offset: f32,
    ipd_scale: f32,
    target_width: u32,
    target_height: u32,
    grid_columns: u32,
    grid_rows: u32,
    vertex_count: u32,
    left: Bounds,
    right: Bounds,
    uv: Bounds,
}

impl WarpSummary {
    fn new(params: &WarpParams, options: &StereoOptions, mesh: &WarpMesh) -> Self {
        let (target_width, target_height) = params.target_size(options);
        let (grid_columns, grid_rows) = mesh.grid();
        Self {
            orientation: params.orientation.raw(),
            height_scale: params.height_scale,
            ipd_offset: params.ipd_offset,
            ipd_scale: params.effective_ipd_scale(),
            target_width,
            target_height,
            grid_columns,
            grid_rows,
            vertex_count: mesh.vertex_count(),
            left: mesh.left_bounds().into(),
            right: mesh.right_bounds().into(),
            uv: mesh.uv_bounds().into(),
        }
    }

    fn print_text(&self) {
        println!("Warp mesh:");
        println!("  orientation:   {}", self.orientation);
        println!("  height scale:  {}", self.height_scale);
        println!("  ipd offset:    {}", self.ipd_offset);
        println!("  ipd scale:     {}", self.ipd_scale);
        println!(
            "  eye target:    {}x{}",
            self.target_width, self.target_height
        );
        println!(
            "  grid:          {}x{} ({} vertices)",
            self.grid_columns, self.grid_rows, self.vertex_count
        );
        for (name, bounds) in [("left", &self.left), ("right", &self.right), ("uv", &self.uv)] {
            println!(
                "  {name:<6} bounds: ({:.3}, {:.3}) .. ({:.3}, {:.3})",
                bounds.min[0], bounds.min[1], bounds.max[0], bounds.max[1]
            );
        }
    }
}

pub fn warp(args: WarpArgs) -> Result<()> {
    let properties = load_properties(args.properties.as_deref())?;
    let options = StereoOptions::default();
    let params = WarpParams::from_properties(&properties);
    let (width, height) = args.viewport;
    let mesh = build_warp_mesh(&params, (width as f32, height as f32), &options);
    let summary = WarpSummary::new(&params, &options, &mesh);
    tracing::debug!(?summary, "built warp mesh");

    match args.format {
        OutputFormat::Text => summary.print_text(),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("failed to serialize warp summary")?
        ),
    }
    Ok(())
}

pub fn frame(args: FrameArgs) -> Result<()> {
    let properties = Arc::new(load_properties(args.properties.as_deref())?);
    let mut gpu = RecordingGpu::new();
    let programs = ProgramCache::new(&mut gpu);
    let mode = if args.mono {
        CompositorMode::Mono
    } else {
        CompositorMode::Stereo {
            properties,
            options: StereoOptions::default(),
        }
    };
    let mut engine = CompositionEngine::new(gpu, programs, mode)
        .context("failed to construct composition engine")?;

    let (width, height) = args.viewport;
    engine.set_viewport_and_projection(
        width,
        height,
        Rect::from_size(width as i32, height as i32),
        height,
        false,
        Rotation::Rot0,
    );
    // Everything before the frame itself is setup noise.
    engine.gpu_mut().take_commands();

    let layer = engine
        .gpu_mut()
        .create_texture()
        .context("failed to allocate layer texture")?;
    let layer = Texture::new(TextureTarget::Texture2d, layer).with_dimensions(width, height);
    let quad = Mesh::quad(width as f32, height as f32);

    engine
        .begin_group(Mat4::IDENTITY, args.mode)
        .context("failed to begin group")?;
    engine.setup_layer_blending(true, false, u8::MAX);
    engine.setup_layer_texturing(&layer);
    engine.draw_mesh(&quad);
    if args.right {
        engine.draw_mesh_for_eye(&quad, Eye::Right)?;
        engine.set_use_right_target(true)?;
    }
    engine.end_group(args.mode);

    for (index, command) in engine.gpu().commands().iter().enumerate() {
        println!("{index:>4} {command:?}");
    }
    let mut dump = String::new();
    engine.dump(&mut dump);
    print!("{dump}");

    let mut gpu = engine.shutdown();
    gpu.delete_texture(layer.name());
    Ok(())
}

fn load_properties(path: Option<&Path>) -> Result<MemoryProperties> {
    let Some(path) = path else {
        return Ok(MemoryProperties::new());
    };
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read property file {}", path.display()))?;
    let properties = MemoryProperties::from_toml_str(&contents)
        .with_context(|| format!("failed to parse property file {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        count = properties.len(),
        "loaded properties"
    );
    Ok(properties)
}
