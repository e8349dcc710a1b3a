use std::ptr;

use glam::Mat4;
use renderengine::gpu::{
    BlendFactor, BlendFunc, Command, ExternalImage, Primitive, RecordedUniform, RecordingGpu,
    TextureId, TextureTarget,
};
use renderengine::{
    CompositionEngine, CompositorMode, GroupMode, Mesh, ProgramCache, Rect, RenderError, Rotation,
    Texture,
};

const WIDTH: u32 = 1440;
const HEIGHT: u32 = 2560;

fn mono_engine(gpu: RecordingGpu) -> CompositionEngine<RecordingGpu> {
    let mut gpu = gpu;
    let programs = ProgramCache::new(&mut gpu);
    let mut engine = CompositionEngine::new(gpu, programs, CompositorMode::Mono).unwrap();
    engine.set_viewport_and_projection(
        WIDTH,
        HEIGHT,
        Rect::from_size(WIDTH as i32, HEIGHT as i32),
        HEIGHT,
        false,
        Rotation::Rot0,
    );
    engine
}

fn layer_texture() -> Texture {
    Texture::new(TextureTarget::External, TextureId(500)).with_dimensions(WIDTH, HEIGHT)
}

#[test]
fn layer_draw_uses_cached_program() {
    let mut engine = mono_engine(RecordingGpu::new());
    let compiled = engine.gpu().shaders_compiled();

    engine.setup_layer_blending(true, false, 128);
    engine.setup_layer_texturing(&layer_texture());
    engine.draw_mesh(&Mesh::quad(WIDTH as f32, HEIGHT as f32));

    // Premultiplied, translucent, plane alpha and external texture are all primed.
    assert_eq!(engine.gpu().shaders_compiled(), compiled);
    let draws: Vec<_> = engine.gpu().draws().cloned().collect();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].primitive, Primitive::TriangleFan);
    assert_eq!(draws[0].count, 4);
    assert_eq!(draws[0].framebuffer, None);
    assert_eq!(draws[0].texture, Some(TextureId(500)));
    assert_eq!(
        draws[0].blend,
        Some(BlendFunc {
            src_rgb: BlendFactor::One,
            dst_rgb: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
        })
    );
    match engine.gpu().last_uniform("alphaPlane") {
        Some(RecordedUniform::Float(alpha)) => assert!((alpha - 128.0 / 255.0).abs() < 1e-6),
        other => panic!("unexpected plane alpha upload: {other:?}"),
    }
}

#[test]
fn texture_coordinates_are_disabled_after_draw() {
    let mut engine = mono_engine(RecordingGpu::new());
    engine.setup_layer_texturing(&layer_texture());
    engine.draw_mesh(&Mesh::quad(1.0, 1.0));
    let commands = engine.gpu().commands();
    let draw = commands
        .iter()
        .position(|c| matches!(c, Command::Draw(_)))
        .unwrap();
    assert!(matches!(
        commands.get(draw + 1),
        Some(Command::DisableAttrib(renderengine::gpu::VertexAttrib::TexCoords))
    ));
}

#[test]
fn group_round_trip_composites_once_and_frees_target() {
    let mut engine = mono_engine(RecordingGpu::new());
    engine.setup_layer_blending(false, true, 255);
    let before = *engine.description();
    let textures_before = engine.gpu().live_textures().len();

    engine
        .begin_group(Mat4::from_scale(glam::Vec3::new(0.5, 1.0, 1.0)), GroupMode::Plain)
        .unwrap();
    assert_eq!(engine.group_depth(), 1);
    let group_framebuffer = engine.gpu().bound_framebuffer();
    assert!(group_framebuffer.is_some());

    engine.setup_layer_texturing(&layer_texture());
    engine.draw_mesh(&Mesh::quad(WIDTH as f32, HEIGHT as f32));
    engine.end_group(GroupMode::Plain);

    assert_eq!(engine.group_depth(), 0);
    assert_eq!(engine.gpu().bound_framebuffer(), None);
    assert_eq!(engine.gpu().live_textures().len(), textures_before);
    assert!(engine.gpu().live_framebuffers().is_empty());

    let draws: Vec<_> = engine.gpu().draws().cloned().collect();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].framebuffer, group_framebuffer);
    let composite = &draws[1];
    assert_eq!(composite.framebuffer, None);
    assert_eq!(composite.blend, None);
    assert_ne!(composite.texture, Some(TextureId(500)));

    // The composite ran with the captured transform and then restored state.
    let (_, fragment) = engine
        .gpu()
        .program_sources(composite.program.unwrap())
        .unwrap();
    assert!(fragment.contains("colorMatrix"));
    assert_eq!(*engine.description(), before);
}

#[test]
fn nested_groups_rebind_enclosing_target() {
    let mut engine = mono_engine(RecordingGpu::new());
    engine.begin_group(Mat4::IDENTITY, GroupMode::Plain).unwrap();
    let outer = engine.gpu().bound_framebuffer();
    engine.begin_group(Mat4::IDENTITY, GroupMode::Plain).unwrap();
    assert_ne!(engine.gpu().bound_framebuffer(), outer);

    engine.end_group(GroupMode::Plain);
    assert_eq!(engine.gpu().bound_framebuffer(), outer);
    let last = engine.gpu().draws().last().cloned().unwrap();
    assert_eq!(last.framebuffer, outer);

    engine.end_group(GroupMode::Plain);
    assert_eq!(engine.gpu().bound_framebuffer(), None);
}

#[test]
fn failed_group_target_leaves_stack_untouched() {
    let mut engine = mono_engine(RecordingGpu::new());
    engine.gpu_mut().set_incomplete_framebuffers(true);
    let err = engine
        .begin_group(Mat4::IDENTITY, GroupMode::Plain)
        .unwrap_err();
    assert!(matches!(err, RenderError::IncompleteFramebuffer { .. }));
    assert_eq!(engine.group_depth(), 0);
    assert_eq!(engine.gpu().bound_framebuffer(), None);
    assert!(engine.gpu().live_framebuffers().is_empty());
}

#[test]
fn invalid_program_skips_draw_but_keeps_going() {
    let mut engine = mono_engine(RecordingGpu::new().fail_compiles_containing("colorMatrix"));
    engine
        .begin_group(Mat4::from_scale(glam::Vec3::splat(0.5)), GroupMode::Plain)
        .unwrap();
    engine.end_group(GroupMode::Plain);

    assert_eq!(engine.gpu().draws().count(), 0);
    assert!(engine.gpu().live_framebuffers().is_empty());

    // The failure is cached; a second composite does not recompile.
    let compiled = engine.gpu().shaders_compiled();
    engine
        .begin_group(Mat4::from_scale(glam::Vec3::splat(0.5)), GroupMode::Plain)
        .unwrap();
    engine.end_group(GroupMode::Plain);
    assert_eq!(engine.gpu().shaders_compiled(), compiled);
}

#[test]
fn image_framebuffer_lifecycle() {
    let mut engine = mono_engine(RecordingGpu::new());
    let textures_before = engine.gpu().live_textures().len();
    let bound = engine
        .bind_image_as_framebuffer(ExternalImage(ptr::null_mut()))
        .unwrap();
    assert!(bound.status.is_complete());
    assert_eq!(engine.gpu().bound_framebuffer(), Some(bound.framebuffer));

    engine.unbind_framebuffer(bound.texture, bound.framebuffer);
    assert_eq!(engine.gpu().bound_framebuffer(), None);
    assert_eq!(engine.gpu().live_textures().len(), textures_before);
    assert!(engine.gpu().live_framebuffers().is_empty());
}

#[test]
fn image_import_failure_cleans_up() {
    let mut engine = mono_engine(RecordingGpu::new().without_image_import());
    let textures_before = engine.gpu().live_textures().len();
    let err = engine
        .bind_image_as_framebuffer(ExternalImage(ptr::null_mut()))
        .unwrap_err();
    assert!(matches!(err, RenderError::Gpu(_)));
    assert_eq!(engine.gpu().live_textures().len(), textures_before);
}

#[test]
fn incomplete_image_framebuffer_is_reported_not_failed() {
    let mut engine = mono_engine(RecordingGpu::new());
    engine.gpu_mut().set_incomplete_framebuffers(true);
    let bound = engine
        .bind_image_as_framebuffer(ExternalImage(ptr::null_mut()))
        .unwrap();
    assert!(!bound.status.is_complete());
    engine.unbind_framebuffer(bound.texture, bound.framebuffer);
}

#[test]
fn blacked_out_layers_sample_protected_texture() {
    let mut engine = mono_engine(RecordingGpu::new());
    engine.setup_layer_blacked_out();
    engine.draw_mesh(&Mesh::quad(1.0, 1.0));
    let draw = engine.gpu().draws().last().cloned().unwrap();
    let protected = engine.description().texture().map(|t| t.name());
    assert_eq!(draw.texture, protected);
    assert!(engine
        .gpu()
        .live_textures()
        .contains(&protected.unwrap()));
}

#[test]
fn shutdown_releases_every_object() {
    let mut engine = mono_engine(RecordingGpu::new());
    engine.begin_group(Mat4::IDENTITY, GroupMode::Plain).unwrap();
    let gpu = engine.shutdown();
    assert!(gpu.live_textures().is_empty());
    assert!(gpu.live_framebuffers().is_empty());
    assert!(gpu.live_buffers().is_empty());
}
