use std::sync::Arc;

use glam::Mat4;
use propstore::{MemoryProperties, PropertyStore};
use renderengine::gpu::{Command, DrawCall, Primitive, RecordingGpu, TextureId, TextureTarget};
use renderengine::stereo::keys;
use renderengine::{
    CompositionEngine, CompositorMode, Eye, GroupMode, Mesh, ProgramCache, Rect, RenderError,
    Rotation, StereoOptions, Texture,
};

const WIDTH: u32 = 1440;
const HEIGHT: u32 = 2560;
const WARP_VERTICES: u32 = 64 * 64 * 6;

fn stereo_engine(properties: MemoryProperties) -> (CompositionEngine<RecordingGpu>, Arc<MemoryProperties>) {
    let properties = Arc::new(properties);
    let mut gpu = RecordingGpu::new();
    let programs = ProgramCache::new(&mut gpu);
    let mode = CompositorMode::Stereo {
        properties: properties.clone(),
        options: StereoOptions::default(),
    };
    let mut engine = CompositionEngine::new(gpu, programs, mode).unwrap();
    engine.set_viewport_and_projection(
        WIDTH,
        HEIGHT,
        Rect::from_size(WIDTH as i32, HEIGHT as i32),
        HEIGHT,
        false,
        Rotation::Rot0,
    );
    (engine, properties)
}

fn warp_draws(engine: &CompositionEngine<RecordingGpu>) -> Vec<DrawCall> {
    engine
        .gpu()
        .draws()
        .filter(|draw| draw.primitive == Primitive::Triangles)
        .cloned()
        .collect()
}

fn buffers_created(engine: &CompositionEngine<RecordingGpu>) -> usize {
    engine
        .gpu()
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::CreateBuffer { .. }))
        .count()
}

fn layer() -> Texture {
    Texture::new(TextureTarget::External, TextureId(900)).with_dimensions(WIDTH, HEIGHT)
}

#[test]
fn group_draws_both_eyes_through_the_warp_mesh() {
    let (mut engine, _) = stereo_engine(MemoryProperties::new());
    assert!(engine.is_stereo());

    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    let left_framebuffer = engine.gpu().bound_framebuffer();
    assert!(left_framebuffer.is_some());

    engine.setup_layer_texturing(&layer());
    engine.draw_mesh(&Mesh::quad(WIDTH as f32, HEIGHT as f32));
    engine.end_group(GroupMode::Deform);

    assert_eq!(engine.gpu().bound_framebuffer(), None);
    let draws = warp_draws(&engine);
    assert_eq!(draws.len(), 2);
    for draw in &draws {
        assert_eq!(draw.count, WARP_VERTICES);
        assert_eq!(draw.framebuffer, None);
        assert_eq!(draw.blend, None);
    }
    // Without a right-eye draw both eyes show the left image.
    assert_eq!(draws[0].texture, draws[1].texture);

    let (vertex, fragment) = engine
        .gpu()
        .program_sources(draws[0].program.unwrap())
        .unwrap();
    assert!(vertex.contains("texCoords_r"));
    assert!(fragment.contains("float fade ="));
    assert!(!fragment.contains("outTexCoords_b).b"));

    // Eye targets persist across groups.
    assert_eq!(engine.gpu().live_framebuffers().len(), 4);
}

#[test]
fn per_channel_attributes_are_disabled_after_each_eye() {
    let (mut engine, _) = stereo_engine(MemoryProperties::new());
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);

    let disables = engine
        .gpu()
        .commands()
        .iter()
        .filter(|c| {
            matches!(
                c,
                Command::DisableAttrib(renderengine::gpu::VertexAttrib::TexCoordsR)
            )
        })
        .count();
    assert_eq!(disables, 2);
}

#[test]
fn right_target_is_used_once_then_reset() {
    let (mut engine, _) = stereo_engine(MemoryProperties::new());

    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    let left_framebuffer = engine.gpu().bound_framebuffer();
    engine.setup_layer_texturing(&layer());
    engine.draw_mesh_for_eye(&Mesh::quad(1.0, 1.0), Eye::Right).unwrap();
    let right_draw = engine.gpu().draws().last().cloned().unwrap();
    assert!(right_draw.framebuffer.is_some());
    assert_ne!(right_draw.framebuffer, left_framebuffer);
    assert!(!engine.description().deform());

    engine.set_use_right_target(true).unwrap();
    engine.end_group(GroupMode::Deform);
    let first = warp_draws(&engine);
    assert_eq!(first.len(), 2);
    assert_ne!(first[0].texture, first[1].texture);

    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);
    let second = warp_draws(&engine);
    assert_eq!(second.len(), 4);
    assert_eq!(second[2].texture, first[0].texture);
    assert_eq!(second[3].texture, first[0].texture);
}

#[test]
fn color_transform_is_only_captured_for_transforming_modes() {
    let (mut engine, _) = stereo_engine(MemoryProperties::new());
    let transform = Mat4::from_scale(glam::Vec3::new(1.0, 0.5, 0.25));

    engine.begin_group(transform, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);
    let plain = warp_draws(&engine)[0].clone();
    let (_, fragment) = engine.gpu().program_sources(plain.program.unwrap()).unwrap();
    assert!(!fragment.contains("colorMatrix"));

    engine
        .begin_group(transform, GroupMode::DeformWithColorTransform)
        .unwrap();
    engine.end_group(GroupMode::DeformWithColorTransform);
    let transformed = warp_draws(&engine)[2].clone();
    let (_, fragment) = engine
        .gpu()
        .program_sources(transformed.program.unwrap())
        .unwrap();
    assert!(fragment.contains("colorMatrix"));

    // The matrix is reset and the pre-group description restored.
    assert!(!engine.description().color_matrix_enabled());
    assert!(!engine.description().deform());
}

#[test]
fn dispersion_property_selects_dispersion_programs() {
    let (mut engine, _) =
        stereo_engine(MemoryProperties::new().with(keys::DISPERSION, "1"));
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);
    let draw = warp_draws(&engine)[0].clone();
    let (_, fragment) = engine.gpu().program_sources(draw.program.unwrap()).unwrap();
    assert!(fragment.contains("texture2D(sampler, outTexCoords_r).r"));
    assert!(fragment.contains("texture2D(sampler, outTexCoords_b).b"));
}

#[test]
fn property_update_rebuilds_mesh_and_resizes_targets() {
    let (mut engine, properties) = stereo_engine(MemoryProperties::new());
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);
    assert_eq!(buffers_created(&engine), 1);

    properties.set(keys::HEIGHT, "0.75");
    properties.set(keys::PROPERTY_UPDATE, "1");
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);

    assert_eq!(buffers_created(&engine), 2);
    assert_eq!(engine.gpu().live_buffers().len(), 1);
    assert_eq!(properties.get(keys::PROPERTY_UPDATE).as_deref(), Some("0"));
    assert!(engine.gpu().commands().contains(&Command::AllocateTexture {
        width: 1082,
        height: 1282,
    }));
}

#[test]
fn failed_target_creation_leaves_output_bound() {
    let (mut engine, properties) = stereo_engine(MemoryProperties::new());
    engine.gpu_mut().set_incomplete_framebuffers(true);
    let err = engine
        .begin_group(Mat4::IDENTITY, GroupMode::Deform)
        .unwrap_err();
    assert!(matches!(err, RenderError::IncompleteFramebuffer { .. }));
    assert_eq!(engine.group_depth(), 0);
    assert_eq!(engine.gpu().bound_framebuffer(), None);
    assert!(engine.gpu().live_framebuffers().is_empty());
    assert_eq!(properties.get(keys::PROPERTY_UPDATE), None);

    engine.gpu_mut().set_incomplete_framebuffers(false);
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);
    assert_eq!(warp_draws(&engine).len(), 2);
    assert_eq!(properties.get(keys::PROPERTY_UPDATE).as_deref(), Some("0"));
}

#[test]
fn failed_resize_is_retried_by_the_next_group() {
    let (mut engine, properties) = stereo_engine(MemoryProperties::new());
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);
    assert_eq!(buffers_created(&engine), 1);

    properties.set(keys::HEIGHT, "0.75");
    properties.set(keys::PROPERTY_UPDATE, "1");
    engine.gpu_mut().set_incomplete_framebuffers(true);
    assert!(engine
        .begin_group(Mat4::IDENTITY, GroupMode::Deform)
        .is_err());
    assert_eq!(engine.group_depth(), 0);
    assert_eq!(engine.gpu().bound_framebuffer(), None);
    assert_eq!(properties.get(keys::PROPERTY_UPDATE).as_deref(), Some("1"));
    assert_eq!(buffers_created(&engine), 1);

    engine.gpu_mut().set_incomplete_framebuffers(false);
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);
    assert_eq!(buffers_created(&engine), 2);
    assert_eq!(engine.gpu().live_buffers().len(), 1);
    assert_eq!(properties.get(keys::PROPERTY_UPDATE).as_deref(), Some("0"));

    let mut out = String::new();
    engine.dump(&mut out);
    assert!(out.contains("eye targets: 1082x1282"));
    assert!(out.contains("height scale 0.75"));
}

#[test]
fn stereo_groups_do_not_nest() {
    let (mut engine, _) = stereo_engine(MemoryProperties::new());
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    let left_framebuffer = engine.gpu().bound_framebuffer();

    let err = engine
        .begin_group(Mat4::IDENTITY, GroupMode::Plain)
        .unwrap_err();
    assert!(matches!(err, RenderError::NestedStereoGroup));
    assert_eq!(engine.group_depth(), 1);
    assert_eq!(engine.gpu().bound_framebuffer(), left_framebuffer);

    engine.end_group(GroupMode::Deform);
    assert_eq!(warp_draws(&engine).len(), 2);
}

#[test]
fn clearing_eye_targets_rebinds_output() {
    let (mut engine, _) = stereo_engine(MemoryProperties::new());
    engine.begin_group(Mat4::IDENTITY, GroupMode::Plain).unwrap();
    engine.end_group(GroupMode::Plain);
    engine.clear_eye_targets().unwrap();

    let clears = engine
        .gpu()
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::Clear(_)))
        .count();
    assert_eq!(clears, 2);
    assert_eq!(engine.gpu().bound_framebuffer(), None);
}

#[test]
fn eye_draws_before_first_group_are_skipped() {
    let (mut engine, _) = stereo_engine(MemoryProperties::new());
    engine
        .draw_mesh_for_eye(&Mesh::quad(1.0, 1.0), Eye::Left)
        .unwrap();
    assert_eq!(engine.gpu().draws().count(), 0);
}

#[test]
fn dump_and_shutdown() {
    let (mut engine, _) = stereo_engine(MemoryProperties::new());
    engine.begin_group(Mat4::IDENTITY, GroupMode::Deform).unwrap();
    engine.end_group(GroupMode::Deform);

    let mut out = String::new();
    engine.dump(&mut out);
    assert!(out.contains("compositor: stereo"));
    assert!(out.contains("eye targets: 722x1282"));
    assert!(out.contains("warp mesh: 24576 vertices"));

    let gpu = engine.shutdown();
    assert!(gpu.live_textures().is_empty());
    assert!(gpu.live_framebuffers().is_empty());
    assert!(gpu.live_buffers().is_empty());
}
