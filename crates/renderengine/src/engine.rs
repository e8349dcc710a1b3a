use std::f32::consts::FRAC_PI_2;
use std::fmt::Write as _;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use propstore::PropertyStore;

use crate::cache::ProgramCache;
use crate::description::{CompositionDescription, Texture};
use crate::error::RenderError;
use crate::gpu::{
    AttribSource, BlendFactor, BlendFunc, BufferId, ExternalImage, Filter, FramebufferId,
    FramebufferStatus, Gpu, Primitive, TextureId, TextureTarget, VertexAttrib,
};
use crate::group::{Group, GroupMode, GroupStack, OffscreenTarget};
use crate::mesh::Mesh;
use crate::stereo::{Eye, StereoOptions, StereoWarp, WarpVertex};

/// Source crop in output pixel coordinates, top-left origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Counter-clockwise rotation applied on top of the projection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Rot0,
    Rot90,
    Rot180,
    Rot270,
}

impl Rotation {
    fn quarter_turns(self) -> u8 {
        match self {
            Rotation::Rot0 => 0,
            Rotation::Rot90 => 1,
            Rotation::Rot180 => 2,
            Rotation::Rot270 => 3,
        }
    }
}

/// Which `begin_group`/`end_group` strategy an engine uses. Chosen once at
/// construction.
pub enum CompositorMode {
    /// One offscreen target per group, composited with a full-screen quad.
    Mono,
    /// Persistent eye targets composited through the lens-warp mesh.
    Stereo {
        properties: Arc<dyn PropertyStore>,
        options: StereoOptions,
    },
}

/// Texture and framebuffer wrapping a window-system image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageFramebuffer {
    pub texture: TextureId,
    pub framebuffer: FramebufferId,
    pub status: FramebufferStatus,
}

enum Compositor {
    Mono,
    Stereo(Box<StereoWarp>),
}

/// Borrowed view of the engine state one draw needs.
pub(crate) struct Frame<'a, G: Gpu + ?Sized> {
    pub gpu: &'a mut G,
    pub programs: &'a mut ProgramCache,
    pub description: &'a mut CompositionDescription,
    pub projection: &'a Mat4,
}

impl<G: Gpu + ?Sized> Frame<'_, G> {
    /// Draws a client-side mesh with the program for the current description.
    /// Skipped when that program is invalid.
    pub fn draw_mesh(&mut self, mesh: &Mesh) {
        if !self
            .programs
            .use_program(&mut *self.gpu, self.description, self.projection)
        {
            tracing::trace!("skipping draw with invalid program");
            return;
        }
        let textured = mesh.tex_coord_size() > 0;
        if textured {
            self.gpu.set_vertex_attrib(
                VertexAttrib::TexCoords,
                AttribSource::Slice {
                    data: mesh.tex_coords(),
                    components: mesh.tex_coord_size() as u32,
                },
            );
        }
        self.gpu.set_vertex_attrib(
            VertexAttrib::Position,
            AttribSource::Slice {
                data: mesh.positions(),
                components: mesh.vertex_size() as u32,
            },
        );
        self.gpu
            .draw_arrays(mesh.primitive(), 0, mesh.vertex_count() as u32);
        if textured {
            self.gpu.disable_vertex_attrib(VertexAttrib::TexCoords);
        }
    }

    /// Draws one eye of the warp mesh stored in `buffer`.
    pub fn draw_warp(&mut self, buffer: BufferId, vertex_count: u32, eye: Eye) {
        if !self
            .programs
            .use_program(&mut *self.gpu, self.description, self.projection)
        {
            tracing::trace!(?eye, "skipping warp draw with invalid program");
            return;
        }
        let channels = [
            (VertexAttrib::TexCoordsR, WarpVertex::UV_RED_OFFSET),
            (VertexAttrib::TexCoordsG, WarpVertex::UV_GREEN_OFFSET),
            (VertexAttrib::TexCoordsB, WarpVertex::UV_BLUE_OFFSET),
        ];
        for (attrib, offset) in channels {
            self.gpu.set_vertex_attrib(
                attrib,
                AttribSource::Buffer {
                    buffer,
                    components: 2,
                    stride: WarpVertex::STRIDE,
                    offset,
                },
            );
        }
        let position = match eye {
            Eye::Left => WarpVertex::LEFT_OFFSET,
            Eye::Right => WarpVertex::RIGHT_OFFSET,
        };
        self.gpu.set_vertex_attrib(
            VertexAttrib::Position,
            AttribSource::Buffer {
                buffer,
                components: 2,
                stride: WarpVertex::STRIDE,
                offset: position,
            },
        );
        self.gpu.draw_arrays(Primitive::Triangles, 0, vertex_count);
        for (attrib, _) in channels {
            self.gpu.disable_vertex_attrib(attrib);
        }
    }
}

/// Composition state machine on top of a [`Gpu`] driver.
///
/// Owns the driver, the program cache, the current
/// [`CompositionDescription`], the projection and the group stack. All calls
/// must come from the thread that owns the GPU context.
pub struct CompositionEngine<G: Gpu> {
    gpu: G,
    programs: ProgramCache,
    description: CompositionDescription,
    projection: Mat4,
    viewport: (u32, u32),
    groups: GroupStack,
    compositor: Compositor,
    protected_texture: TextureId,
    max_texture_size: u32,
    max_viewport_dims: [u32; 2],
}

impl<G: Gpu> CompositionEngine<G> {
    /// Takes ownership of the driver and an already constructed (usually
    /// primed) program cache.
    pub fn new(
        mut gpu: G,
        programs: ProgramCache,
        mode: CompositorMode,
    ) -> Result<Self, RenderError> {
        let max_texture_size = gpu.max_texture_size();
        let max_viewport_dims = gpu.max_viewport_dims();

        let protected_texture = gpu.create_texture()?;
        gpu.bind_texture(TextureTarget::Texture2d, Some(protected_texture));
        gpu.set_texture_sampling(TextureTarget::Texture2d, Filter::Nearest);
        gpu.allocate_texture_storage(1, 1, Some([0u8, 0, 0, 255].as_slice()));

        let compositor = match mode {
            CompositorMode::Mono => Compositor::Mono,
            CompositorMode::Stereo {
                properties,
                options,
            } => Compositor::Stereo(Box::new(StereoWarp::new(properties, options))),
        };
        tracing::debug!(
            max_texture_size,
            max_viewport = ?max_viewport_dims,
            stereo = matches!(compositor, Compositor::Stereo(_)),
            programs = programs.len(),
            "composition engine ready"
        );

        Ok(Self {
            gpu,
            programs,
            description: CompositionDescription::default(),
            projection: Mat4::IDENTITY,
            viewport: (0, 0),
            groups: GroupStack::default(),
            compositor,
            protected_texture,
            max_texture_size,
            max_viewport_dims,
        })
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    pub fn description(&self) -> &CompositionDescription {
        &self.description
    }

    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn group_depth(&self) -> usize {
        self.groups.depth()
    }

    pub fn is_stereo(&self) -> bool {
        matches!(self.compositor, Compositor::Stereo(_))
    }

    pub fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    /// The smaller of the two maximum viewport dimensions.
    pub fn max_viewport_dims(&self) -> u32 {
        self.max_viewport_dims[0].min(self.max_viewport_dims[1])
    }

    /// Builds an orthographic projection over `source_crop` and sets the GPU
    /// viewport to `(0, 0, width, height)`.
    ///
    /// Crop coordinates have a top-left origin and are flipped against
    /// `target_height` for the bottom-left GL clip space. `flip_y` flips once
    /// more for targets stored upside down. `rotation` is applied after the
    /// projection.
    pub fn set_viewport_and_projection(
        &mut self,
        width: u32,
        height: u32,
        source_crop: Rect,
        target_height: u32,
        flip_y: bool,
        rotation: Rotation,
    ) {
        let l = source_crop.left as f32;
        let r = source_crop.right as f32;
        let t = target_height as f32 - source_crop.top as f32;
        let b = target_height as f32 - source_crop.bottom as f32;

        let mut projection = if flip_y {
            Mat4::orthographic_rh_gl(l, r, t, b, 0.0, 1.0)
        } else {
            Mat4::orthographic_rh_gl(l, r, b, t, 0.0, 1.0)
        };
        let turns = rotation.quarter_turns();
        if turns > 0 {
            projection = Mat4::from_axis_angle(Vec3::Z, FRAC_PI_2 * f32::from(turns)) * projection;
        }

        self.gpu.set_viewport(0, 0, width, height);
        self.projection = projection;
        self.viewport = (width, height);
    }

    /// Prepares a layer draw with the given alpha (`0..=255`). Blending is
    /// disabled only for opaque layers at full alpha.
    pub fn setup_layer_blending(&mut self, premultiplied: bool, opaque: bool, alpha: u8) {
        self.description.set_premultiplied_alpha(premultiplied);
        self.description.set_opaque(opaque);
        self.description.set_plane_alpha(f32::from(alpha) / 255.0);

        if alpha < u8::MAX || !opaque {
            let src = if premultiplied {
                BlendFactor::One
            } else {
                BlendFactor::SrcAlpha
            };
            self.gpu.set_blend(Some(BlendFunc {
                src_rgb: src,
                dst_rgb: BlendFactor::OneMinusSrcAlpha,
                src_alpha: BlendFactor::One,
                dst_alpha: BlendFactor::OneMinusSrcAlpha,
            }));
        } else {
            self.gpu.set_blend(None);
        }
    }

    /// Untextured black with the given alpha, premultiplied.
    pub fn setup_dim_layer_blending(&mut self, alpha: u8) {
        self.description.set_plane_alpha(1.0);
        self.description.set_premultiplied_alpha(true);
        self.description.set_opaque(false);
        self.description
            .set_color(0.0, 0.0, 0.0, f32::from(alpha) / 255.0);
        self.description.disable_texture();

        if alpha == u8::MAX {
            self.gpu.set_blend(None);
        } else {
            self.gpu.set_blend(Some(BlendFunc::uniform(
                BlendFactor::One,
                BlendFactor::OneMinusSrcAlpha,
            )));
        }
    }

    /// Untextured flat color with blending disabled.
    pub fn setup_fill_with_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.description.set_plane_alpha(1.0);
        self.description.set_premultiplied_alpha(true);
        self.description.set_opaque(false);
        self.description.set_color(r, g, b, a);
        self.description.disable_texture();
        self.gpu.set_blend(None);
    }

    /// Binds `texture` with clamp-to-edge wrapping and its filtering mode, and
    /// makes it the texture source of the next draw.
    pub fn setup_layer_texturing(&mut self, texture: &Texture) {
        let filter = if texture.filtering() {
            Filter::Linear
        } else {
            Filter::Nearest
        };
        self.gpu.bind_texture(texture.target(), Some(texture.name()));
        self.gpu.set_texture_sampling(texture.target(), filter);
        self.description.set_texture(*texture);
    }

    /// Samples the black placeholder instead of protected content.
    pub fn setup_layer_blacked_out(&mut self) {
        self.gpu
            .bind_texture(TextureTarget::Texture2d, Some(self.protected_texture));
        let texture = Texture::new(TextureTarget::Texture2d, self.protected_texture)
            .with_dimensions(1, 1);
        self.description.set_texture(texture);
    }

    pub fn disable_texturing(&mut self) {
        self.description.disable_texture();
    }

    pub fn disable_blending(&mut self) {
        self.gpu.set_blend(None);
    }

    /// Wraps `image` in a texture and a framebuffer and leaves that
    /// framebuffer bound. An incomplete framebuffer is reported through the
    /// returned status, not as an error; release it with
    /// [`CompositionEngine::unbind_framebuffer`] either way.
    pub fn bind_image_as_framebuffer(
        &mut self,
        image: ExternalImage,
    ) -> Result<ImageFramebuffer, RenderError> {
        let gpu = &mut self.gpu;
        let texture = gpu.create_texture()?;
        gpu.bind_texture(TextureTarget::Texture2d, Some(texture));
        gpu.import_external_image(image).map_err(|err| {
            gpu.delete_texture(texture);
            RenderError::from(err)
        })?;
        let framebuffer = gpu.create_framebuffer().map_err(|err| {
            gpu.delete_texture(texture);
            RenderError::from(err)
        })?;
        gpu.bind_framebuffer(Some(framebuffer));
        gpu.attach_color_texture(texture);
        let status = gpu.framebuffer_status();
        if !status.is_complete() {
            tracing::warn!(?status, "image framebuffer is incomplete");
        }
        Ok(ImageFramebuffer {
            texture,
            framebuffer,
            status,
        })
    }

    /// Rebinds the real output and deletes a pair from
    /// [`CompositionEngine::bind_image_as_framebuffer`].
    pub fn unbind_framebuffer(&mut self, texture: TextureId, framebuffer: FramebufferId) {
        self.gpu.bind_framebuffer(None);
        self.gpu.delete_framebuffer(framebuffer);
        self.gpu.delete_texture(texture);
    }

    /// Draws `mesh` into the current target with the current description.
    pub fn draw_mesh(&mut self, mesh: &Mesh) {
        if let Compositor::Stereo(stereo) = &self.compositor {
            stereo.log_draw();
        }
        self.frame().draw_mesh(mesh);
    }

    /// Redirects drawing into a new offscreen group.
    ///
    /// The mono compositor allocates a target the size of the viewport and
    /// always captures `color_transform`. The stereo compositor reuses the
    /// persistent left eye target and captures the transform only for modes
    /// that apply it, and fails with [`RenderError::NestedStereoGroup`] while
    /// another stereo group is open. On error nothing is pushed and the
    /// enclosing target stays bound.
    pub fn begin_group(
        &mut self,
        color_transform: Mat4,
        mode: GroupMode,
    ) -> Result<(), RenderError> {
        let (width, height) = self.viewport;
        let enclosing = self.groups.current_framebuffer();

        let group = match &mut self.compositor {
            Compositor::Mono => {
                let target = OffscreenTarget::create(&mut self.gpu, width, height, Filter::Nearest)
                    .map_err(|err| {
                        self.gpu.bind_framebuffer(enclosing);
                        err
                    })?;
                Group {
                    texture: target.texture,
                    framebuffer: target.framebuffer,
                    width,
                    height,
                    color_transform,
                    saved_description: self.description,
                    persistent: false,
                }
            }
            Compositor::Stereo(_) if !self.groups.is_empty() => {
                return Err(RenderError::NestedStereoGroup);
            }
            Compositor::Stereo(stereo) => {
                let left = stereo.prepare(&mut self.gpu, (width, height)).map_err(|err| {
                    self.gpu.bind_framebuffer(enclosing);
                    err
                })?;
                self.gpu.bind_framebuffer(Some(left.framebuffer));
                Group {
                    texture: left.texture,
                    framebuffer: left.framebuffer,
                    width,
                    height,
                    color_transform: if mode.applies_color_transform() {
                        color_transform
                    } else {
                        Mat4::IDENTITY
                    },
                    saved_description: self.description,
                    persistent: true,
                }
            }
        };
        self.groups.push(group);
        tracing::debug!(
            depth = self.groups.depth(),
            width,
            height,
            mode = mode.raw(),
            "began group"
        );
        Ok(())
    }

    /// Composites the innermost group into the enclosing target.
    ///
    /// # Panics
    ///
    /// Panics if no group is open.
    pub fn end_group(&mut self, mode: GroupMode) {
        let Some(group) = self.groups.pop() else {
            panic!("end_group called without a matching begin_group");
        };
        let enclosing = self.groups.current_framebuffer();
        self.gpu.bind_framebuffer(enclosing);

        let Self {
            gpu,
            programs,
            description,
            projection,
            compositor,
            ..
        } = self;
        let mut frame = Frame {
            gpu,
            programs,
            description,
            projection,
        };

        match compositor {
            Compositor::Mono => {
                let texture = Texture::new(TextureTarget::Texture2d, group.texture)
                    .with_dimensions(group.width, group.height);
                frame
                    .gpu
                    .bind_texture(TextureTarget::Texture2d, Some(group.texture));
                frame.description.set_plane_alpha(1.0);
                frame.description.set_premultiplied_alpha(true);
                frame.description.set_opaque(false);
                frame.description.set_texture(texture);
                frame.description.set_color_matrix(group.color_transform);
                frame.gpu.set_blend(None);

                frame.draw_mesh(&Mesh::quad(group.width as f32, group.height as f32));

                frame.description.set_color_matrix(Mat4::IDENTITY);
                if !group.persistent {
                    frame.gpu.delete_framebuffer(group.framebuffer);
                    frame.gpu.delete_texture(group.texture);
                }
            }
            Compositor::Stereo(stereo) => stereo.composite(&mut frame, &group, mode),
        }

        self.description = group.saved_description;
        tracing::debug!(depth = self.groups.depth(), mode = mode.raw(), "ended group");
    }

    /// Selects the right eye texture for the next stereo `end_group`. The
    /// flag resets after that composite.
    pub fn set_use_right_target(&mut self, enabled: bool) -> Result<(), RenderError> {
        self.stereo_mut()?.set_use_right_target(enabled);
        Ok(())
    }

    /// Draws an ordinary layer into one eye target with deform disabled. The
    /// eye target stays bound afterwards.
    pub fn draw_mesh_for_eye(&mut self, mesh: &Mesh, eye: Eye) -> Result<(), RenderError> {
        let Compositor::Stereo(stereo) = &self.compositor else {
            return Err(RenderError::StereoUnavailable);
        };
        stereo.log_draw();
        let Some(target) = stereo.eye_target(eye).copied() else {
            tracing::debug!(?eye, "eye targets not created yet; skipping draw");
            return Ok(());
        };
        self.gpu.bind_framebuffer(Some(target.framebuffer));
        self.description.set_deform(false);
        self.frame().draw_mesh(mesh);
        Ok(())
    }

    /// Clears both eye targets and rebinds the real output.
    pub fn clear_eye_targets(&mut self) -> Result<(), RenderError> {
        let Compositor::Stereo(stereo) = &self.compositor else {
            return Err(RenderError::StereoUnavailable);
        };
        stereo.clear_eye_targets(&mut self.gpu);
        Ok(())
    }

    /// Appends a human-readable summary of the engine state.
    pub fn dump(&self, out: &mut String) {
        let valid = self
            .programs
            .iter()
            .filter(|(_, program)| program.is_valid())
            .count();
        let _ = writeln!(out, "CompositionEngine");
        let _ = writeln!(
            out,
            "  programs: {} cached ({} valid), {} generated",
            self.programs.len(),
            valid,
            self.programs.generated()
        );
        let _ = writeln!(
            out,
            "  viewport: {}x{}, group depth: {}",
            self.viewport.0,
            self.viewport.1,
            self.groups.depth()
        );
        let _ = writeln!(
            out,
            "  limits: max texture {}, max viewport {}",
            self.max_texture_size,
            self.max_viewport_dims()
        );
        match &self.compositor {
            Compositor::Mono => {
                let _ = writeln!(out, "  compositor: mono");
            }
            Compositor::Stereo(stereo) => {
                let _ = writeln!(out, "  compositor: stereo");
                stereo.dump(out);
            }
        }
    }

    /// Releases every GPU object the engine created and hands the driver back.
    /// Open groups are released without being composited.
    pub fn shutdown(mut self) -> G {
        while let Some(group) = self.groups.pop() {
            if !group.persistent {
                self.gpu.delete_framebuffer(group.framebuffer);
                self.gpu.delete_texture(group.texture);
            }
        }
        if let Compositor::Stereo(stereo) = &mut self.compositor {
            stereo.release(&mut self.gpu);
        }
        self.programs.release(&mut self.gpu);
        self.gpu.delete_texture(self.protected_texture);
        self.gpu
    }

    fn frame(&mut self) -> Frame<'_, G> {
        Frame {
            gpu: &mut self.gpu,
            programs: &mut self.programs,
            description: &mut self.description,
            projection: &self.projection,
        }
    }

    fn stereo_mut(&mut self) -> Result<&mut StereoWarp, RenderError> {
        match &mut self.compositor {
            Compositor::Stereo(stereo) => Ok(&mut **stereo),
            Compositor::Mono => Err(RenderError::StereoUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;
    use crate::gpu::RecordingGpu;

    fn engine() -> CompositionEngine<RecordingGpu> {
        let mut gpu = RecordingGpu::new();
        let programs = ProgramCache::new(&mut gpu);
        CompositionEngine::new(gpu, programs, CompositorMode::Mono).unwrap()
    }

    #[test]
    fn projection_maps_crop_corners_to_clip_corners() {
        let mut engine = engine();
        engine.set_viewport_and_projection(
            1440,
            2560,
            Rect::from_size(1440, 2560),
            2560,
            false,
            Rotation::Rot0,
        );
        let p = *engine.projection();
        let origin = p * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let corner = p * Vec4::new(1440.0, 2560.0, 0.0, 1.0);
        assert!((origin.x + 1.0).abs() < 1e-5 && (origin.y + 1.0).abs() < 1e-5);
        assert!((corner.x - 1.0).abs() < 1e-5 && (corner.y - 1.0).abs() < 1e-5);
        assert_eq!(engine.gpu().viewport(), (0, 0, 1440, 2560));
        assert_eq!(engine.viewport(), (1440, 2560));
    }

    #[test]
    fn flip_and_rotation_change_the_projection() {
        let mut engine = engine();
        let crop = Rect::from_size(100, 200);
        engine.set_viewport_and_projection(100, 200, crop, 200, true, Rotation::Rot0);
        let flipped = *engine.projection() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((flipped.y - 1.0).abs() < 1e-5);

        engine.set_viewport_and_projection(100, 200, crop, 200, false, Rotation::Rot90);
        let rotated = *engine.projection() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        // (-1, -1) turned a quarter counter-clockwise.
        assert!((rotated.x - 1.0).abs() < 1e-5 && (rotated.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn opaque_full_alpha_disables_blending() {
        let mut engine = engine();
        engine.setup_layer_blending(true, true, 255);
        assert_eq!(engine.gpu().blend(), None);
        assert_eq!(engine.description().plane_alpha(), 1.0);

        engine.setup_layer_blending(true, true, 200);
        assert_eq!(
            engine.gpu().blend(),
            Some(BlendFunc {
                src_rgb: BlendFactor::One,
                dst_rgb: BlendFactor::OneMinusSrcAlpha,
                src_alpha: BlendFactor::One,
                dst_alpha: BlendFactor::OneMinusSrcAlpha,
            })
        );

        engine.setup_layer_blending(false, false, 255);
        assert_eq!(
            engine.gpu().blend().map(|func| func.src_rgb),
            Some(BlendFactor::SrcAlpha)
        );
    }

    #[test]
    fn dim_layer_is_premultiplied_black() {
        let mut engine = engine();
        engine.setup_dim_layer_blending(255);
        assert_eq!(engine.gpu().blend(), None);
        engine.setup_dim_layer_blending(51);
        assert_eq!(
            engine.gpu().blend(),
            Some(BlendFunc::uniform(BlendFactor::One, BlendFactor::OneMinusSrcAlpha))
        );
        let description = engine.description();
        assert!(description.premultiplied_alpha() && !description.opaque());
        assert!(!description.is_textured());
        assert!((description.color()[3] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn fill_with_color_disables_blending() {
        let mut engine = engine();
        engine.setup_layer_blending(false, false, 10);
        engine.setup_fill_with_color(0.1, 0.2, 0.3, 0.4);
        assert_eq!(engine.gpu().blend(), None);
        assert_eq!(engine.description().color(), [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn texturing_uses_filtering_flag() {
        let mut engine = engine();
        let mut texture = Texture::new(TextureTarget::External, TextureId(99));
        texture.set_filtering(true);
        engine.setup_layer_texturing(&texture);
        assert!(engine.gpu().commands().contains(&crate::gpu::Command::TextureSampling {
            target: TextureTarget::External,
            filter: Filter::Linear,
        }));
        assert_eq!(engine.description().texture(), Some(&texture));

        engine.disable_texturing();
        assert!(!engine.description().is_textured());
        engine.setup_layer_blacked_out();
        assert_eq!(
            engine.description().texture().map(|t| (t.target(), t.width())),
            Some((TextureTarget::Texture2d, 1))
        );
    }

    #[test]
    fn max_viewport_is_smaller_dimension() {
        let engine = engine();
        assert_eq!(engine.max_viewport_dims(), 4096);
        assert_eq!(engine.max_texture_size(), 4096);
    }

    #[test]
    fn stereo_only_calls_fail_in_mono() {
        let mut engine = engine();
        assert!(matches!(
            engine.set_use_right_target(true),
            Err(RenderError::StereoUnavailable)
        ));
        assert!(matches!(
            engine.clear_eye_targets(),
            Err(RenderError::StereoUnavailable)
        ));
        let mesh = Mesh::quad(1.0, 1.0);
        assert!(engine.draw_mesh_for_eye(&mesh, Eye::Left).is_err());
    }

    #[test]
    #[should_panic(expected = "without a matching begin_group")]
    fn end_group_on_empty_stack_panics() {
        let mut engine = engine();
        engine.end_group(GroupMode::Plain);
    }

    #[test]
    fn dump_mentions_compositor() {
        let engine = engine();
        let mut out = String::new();
        engine.dump(&mut out);
        assert!(out.contains("programs: 24 cached (24 valid), 24 generated"));
        assert!(out.contains("compositor: mono"));
    }
}
