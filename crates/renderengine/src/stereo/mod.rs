//! Dual-eye compositing through a lens-warp mesh.
//!
//! While a stereo group is open, drawing lands in the left eye target (and,
//! through [`crate::CompositionEngine::draw_mesh_for_eye`], optionally the
//! right one). Ending the group draws both eye images onto the enclosing
//! target through the warp mesh:
//!
//! ```text
//!   begin_group ──▶ dirty flag? ──▶ rebuild mesh / resize eye targets
//!        │
//!        └─▶ bind left eye target ──▶ layer draws
//!                                          │
//!   end_group ◀────────────────────────────┘
//!        ├─▶ left eye texture  ─▶ warp mesh (left positions)
//!        └─▶ right eye texture ─▶ warp mesh (right positions)
//!            (left texture again unless the right target was used)
//! ```

mod mesh;

use std::fmt::Write as _;
use std::sync::Arc;

use glam::Mat4;
use propstore::PropertyStore;

use crate::description::Texture;
use crate::engine::Frame;
use crate::error::RenderError;
use crate::gpu::{BufferId, Filter, Gpu, TextureTarget};
use crate::group::{Group, GroupMode, OffscreenTarget};

pub use mesh::{
    build_warp_mesh, deform_uv, eye_positions, ChannelDistortion, Orientation, WarpMesh,
    WarpParams, WarpVertex,
};

/// Property names read by the stereo compositor.
pub mod keys {
    /// `1` splits the panel along X, `2` along Y.
    pub const ORIENTATION: &str = "sys.hwc.force3d.primary";
    pub const DEFORM_RED1: &str = "sys.3d.deform_red1";
    pub const DEFORM_RED2: &str = "sys.3d.deform_red2";
    pub const DEFORM_GREEN1: &str = "sys.3d.deform_green1";
    pub const DEFORM_GREEN2: &str = "sys.3d.deform_green2";
    pub const DEFORM_BLUE1: &str = "sys.3d.deform_blue1";
    pub const DEFORM_BLUE2: &str = "sys.3d.deform_blue2";
    pub const HEIGHT: &str = "sys.3d.height";
    pub const IPD_OFFSET: &str = "sys.3d.ipd_offset";
    pub const IPD_SCALE: &str = "sys.3d.ipd_scale";
    /// Set by whoever changes the properties above; cleared when consumed.
    pub const PROPERTY_UPDATE: &str = "sys.3d.property_update";
    pub const DISPERSION: &str = "debug.sf.dispersion";
    pub const LOG: &str = "sys.3d.log";
}

/// Side length of the scratch targets.
const SCRATCH_SIZE: u32 = 8;

/// Static geometry of the stereo panel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StereoOptions {
    pub panel_width: f32,
    pub panel_height: f32,
    pub grid_columns: u32,
    pub grid_rows: u32,
}

impl Default for StereoOptions {
    fn default() -> Self {
        Self {
            panel_width: 1440.0,
            panel_height: 2560.0,
            grid_columns: 64,
            grid_rows: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug)]
struct EyeTargets {
    left: OffscreenTarget,
    right: OffscreenTarget,
    scratch_left: OffscreenTarget,
    scratch_right: OffscreenTarget,
}

impl EyeTargets {
    fn create<G: Gpu + ?Sized>(gpu: &mut G, width: u32, height: u32) -> Result<Self, RenderError> {
        let scratch_left = OffscreenTarget::create(gpu, SCRATCH_SIZE, SCRATCH_SIZE, Filter::Linear)?;
        let scratch_right = OffscreenTarget::create(gpu, SCRATCH_SIZE, SCRATCH_SIZE, Filter::Linear)
            .map_err(|err| {
                scratch_left.release(gpu);
                err
            })?;
        let left = OffscreenTarget::create(gpu, width, height, Filter::Nearest).map_err(|err| {
            scratch_left.release(gpu);
            scratch_right.release(gpu);
            err
        })?;
        let right = OffscreenTarget::create(gpu, width, height, Filter::Nearest).map_err(|err| {
            scratch_left.release(gpu);
            scratch_right.release(gpu);
            left.release(gpu);
            err
        })?;
        tracing::debug!(width, height, "created stereo eye targets");
        Ok(Self {
            left,
            right,
            scratch_left,
            scratch_right,
        })
    }

    /// Reallocates both eye targets, binding a scratch target first so the
    /// eye being resized is never the active framebuffer.
    fn resize<G: Gpu + ?Sized>(
        &mut self,
        gpu: &mut G,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        gpu.bind_framebuffer(Some(self.scratch_left.framebuffer));
        self.left.resize(gpu, width, height)?;
        gpu.bind_framebuffer(Some(self.scratch_right.framebuffer));
        self.right.resize(gpu, width, height)?;
        tracing::debug!(width, height, "resized stereo eye targets");
        Ok(())
    }

    fn release<G: Gpu + ?Sized>(&self, gpu: &mut G) {
        for target in [self.left, self.right, self.scratch_left, self.scratch_right] {
            target.release(gpu);
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct WarpBuffer {
    buffer: BufferId,
    vertex_count: u32,
    params: WarpParams,
}

/// State owned by a stereo compositor: eye targets, warp mesh buffer and the
/// per-frame right-target flag.
pub(crate) struct StereoWarp {
    properties: Arc<dyn PropertyStore>,
    options: StereoOptions,
    targets: Option<EyeTargets>,
    mesh: Option<WarpBuffer>,
    use_right_target: bool,
}

impl StereoWarp {
    pub fn new(properties: Arc<dyn PropertyStore>, options: StereoOptions) -> Self {
        Self {
            properties,
            options,
            targets: None,
            mesh: None,
            use_right_target: false,
        }
    }

    /// True while the dirty flag asks for mesh and targets to be rebuilt.
    pub fn config_changed(&self) -> bool {
        self.properties.get_flag(keys::PROPERTY_UPDATE, true)
    }

    fn acknowledge_config(&self) {
        self.properties.set(keys::PROPERTY_UPDATE, "0");
    }

    pub fn log_draw(&self) {
        if self.properties.get_i32(keys::LOG, 0) == 1 {
            tracing::debug!(
                panel_width = self.options.panel_width,
                panel_height = self.options.panel_height,
                "stereo draw"
            );
        }
    }

    pub fn set_use_right_target(&mut self, enabled: bool) {
        self.use_right_target = enabled;
    }

    pub fn use_right_target(&self) -> bool {
        self.use_right_target
    }

    pub fn eye_target(&self, eye: Eye) -> Option<&OffscreenTarget> {
        self.targets.as_ref().map(|targets| match eye {
            Eye::Left => &targets.left,
            Eye::Right => &targets.right,
        })
    }

    pub fn warp_params(&self) -> Option<&WarpParams> {
        self.mesh.as_ref().map(|mesh| &mesh.params)
    }

    /// Makes sure targets and mesh exist and match the current properties,
    /// then returns the left eye target. Leaves an arbitrary framebuffer
    /// bound.
    ///
    /// The dirty flag is cleared only once the resize and the mesh rebuild
    /// have both succeeded, so a failed attempt is retried by the next call.
    pub fn prepare<G: Gpu + ?Sized>(
        &mut self,
        gpu: &mut G,
        viewport: (u32, u32),
    ) -> Result<OffscreenTarget, RenderError> {
        let params = WarpParams::from_properties(self.properties.as_ref());
        let (width, height) = params.target_size(&self.options);
        let changed = self.config_changed();

        let left = match &mut self.targets {
            Some(targets) => {
                if changed {
                    targets.resize(gpu, width, height)?;
                }
                targets.left
            }
            None => {
                let targets = EyeTargets::create(gpu, width, height)?;
                self.targets = Some(targets);
                targets.left
            }
        };

        if changed || self.mesh.is_none() {
            self.rebuild_mesh(gpu, params, viewport)?;
        }
        if changed {
            self.acknowledge_config();
        }
        Ok(left)
    }

    fn rebuild_mesh<G: Gpu + ?Sized>(
        &mut self,
        gpu: &mut G,
        params: WarpParams,
        viewport: (u32, u32),
    ) -> Result<(), RenderError> {
        let mesh = build_warp_mesh(
            &params,
            (viewport.0 as f32, viewport.1 as f32),
            &self.options,
        );
        let buffer = gpu.create_vertex_buffer(mesh.as_bytes())?;
        let previous = self.mesh.replace(WarpBuffer {
            buffer,
            vertex_count: mesh.vertex_count(),
            params,
        });
        if let Some(previous) = previous {
            gpu.delete_buffer(previous.buffer);
        }
        tracing::debug!(
            vertices = mesh.vertex_count(),
            orientation = ?params.orientation,
            height_scale = params.height_scale,
            ipd_offset = params.ipd_offset,
            ipd_scale = params.effective_ipd_scale(),
            "rebuilt warp mesh"
        );
        Ok(())
    }

    /// Draws both eye images of `group` onto the currently bound target.
    pub fn composite<G: Gpu + ?Sized>(&mut self, frame: &mut Frame<'_, G>, group: &Group, mode: GroupMode) {
        let (Some(targets), Some(mesh)) = (self.targets, self.mesh) else {
            tracing::warn!("stereo group ended before its targets were prepared");
            return;
        };
        let left = Texture::new(TextureTarget::Texture2d, targets.left.texture)
            .with_dimensions(group.width, group.height);
        let right = Texture::new(TextureTarget::Texture2d, targets.right.texture)
            .with_dimensions(group.width, group.height);

        frame.description.set_plane_alpha(1.0);
        frame.description.set_premultiplied_alpha(true);
        frame.description.set_opaque(false);
        // Identity unless the group captured a transform for this mode.
        frame.description.set_color_matrix(group.color_transform);
        if mode.deforms() {
            frame.description.set_deform(true);
            for texture in [left, right] {
                frame
                    .gpu
                    .bind_texture(TextureTarget::Texture2d, Some(texture.name()));
                frame
                    .gpu
                    .set_texture_sampling(TextureTarget::Texture2d, Filter::Linear);
            }
        }
        frame.gpu.set_blend(None);
        frame
            .description
            .set_dispersion(self.properties.get_flag(keys::DISPERSION, false));
        self.log_draw();

        frame
            .gpu
            .bind_texture(TextureTarget::Texture2d, Some(left.name()));
        frame.description.set_texture(left);
        frame.draw_warp(mesh.buffer, mesh.vertex_count, Eye::Left);

        if self.use_right_target {
            frame
                .gpu
                .bind_texture(TextureTarget::Texture2d, Some(right.name()));
            frame.description.set_texture(right);
        } else {
            frame.description.set_texture(left);
        }
        frame.draw_warp(mesh.buffer, mesh.vertex_count, Eye::Right);
        self.use_right_target = false;

        frame.description.set_color_matrix(Mat4::IDENTITY);
        frame.description.set_deform(false);
    }

    /// Clears both eye targets to transparent black and rebinds the real
    /// output.
    pub fn clear_eye_targets<G: Gpu + ?Sized>(&self, gpu: &mut G) {
        let Some(targets) = &self.targets else {
            return;
        };
        for target in [targets.left, targets.right] {
            gpu.bind_framebuffer(Some(target.framebuffer));
            gpu.clear([0.0; 4]);
        }
        gpu.bind_framebuffer(None);
    }

    pub fn release<G: Gpu + ?Sized>(&mut self, gpu: &mut G) {
        if let Some(targets) = self.targets.take() {
            targets.release(gpu);
        }
        if let Some(mesh) = self.mesh.take() {
            gpu.delete_buffer(mesh.buffer);
        }
    }

    pub fn dump(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "  stereo: panel {}x{}, grid {}x{}, use right target: {}",
            self.options.panel_width,
            self.options.panel_height,
            self.options.grid_columns,
            self.options.grid_rows,
            self.use_right_target()
        );
        match &self.targets {
            Some(targets) => {
                let _ = writeln!(
                    out,
                    "  eye targets: {}x{}",
                    targets.left.width, targets.left.height
                );
            }
            None => {
                let _ = writeln!(out, "  eye targets: not created");
            }
        }
        if let (Some(mesh), Some(params)) = (&self.mesh, self.warp_params()) {
            let _ = writeln!(
                out,
                "  warp mesh: {} vertices, orientation {:?}, height scale {}, ipd offset {}, ipd scale {}",
                mesh.vertex_count,
                params.orientation,
                params.height_scale,
                params.ipd_offset,
                params.effective_ipd_scale()
            );
        }
    }
}
