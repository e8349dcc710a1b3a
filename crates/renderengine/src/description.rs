use glam::Mat4;

use crate::gpu::{TextureId, TextureTarget};

/// A texture source as seen by the synthesized programs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Texture {
    target: TextureTarget,
    name: TextureId,
    matrix: Mat4,
    filtering: bool,
    width: u32,
    height: u32,
}

impl Texture {
    pub fn new(target: TextureTarget, name: TextureId) -> Self {
        Self {
            target,
            name,
            matrix: Mat4::IDENTITY,
            filtering: false,
            width: 0,
            height: 0,
        }
    }

    #[must_use]
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.set_dimensions(width, height);
        self
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Linear filtering when set, nearest otherwise.
    pub fn set_filtering(&mut self, enabled: bool) {
        self.filtering = enabled;
    }

    /// Transform applied to texture coordinates in the vertex stage.
    pub fn set_matrix(&mut self, matrix: Mat4) {
        self.matrix = matrix;
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    pub fn name(&self) -> TextureId {
        self.name
    }

    pub fn matrix(&self) -> &Mat4 {
        &self.matrix
    }

    pub fn filtering(&self) -> bool {
        self.filtering
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// How the next primitive should be shaded.
///
/// Owned by the engine and overwritten draw by draw; the program cache only
/// reads it. Defaults to an untextured, opaque, non-premultiplied draw with
/// full plane alpha.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositionDescription {
    texture: Option<Texture>,
    premultiplied_alpha: bool,
    opaque: bool,
    plane_alpha: f32,
    color: [f32; 4],
    color_matrix_enabled: bool,
    color_matrix: Mat4,
    deform: bool,
    dispersion: bool,
}

impl Default for CompositionDescription {
    fn default() -> Self {
        Self {
            texture: None,
            premultiplied_alpha: false,
            opaque: true,
            plane_alpha: 1.0,
            color: [0.0; 4],
            color_matrix_enabled: false,
            color_matrix: Mat4::IDENTITY,
            deform: false,
            dispersion: false,
        }
    }
}

impl CompositionDescription {
    pub fn set_texture(&mut self, texture: Texture) {
        self.texture = Some(texture);
    }

    pub fn disable_texture(&mut self) {
        self.texture = None;
    }

    pub fn set_premultiplied_alpha(&mut self, premultiplied: bool) {
        self.premultiplied_alpha = premultiplied;
    }

    pub fn set_opaque(&mut self, opaque: bool) {
        self.opaque = opaque;
    }

    /// Clamped to `[0, 1]`.
    pub fn set_plane_alpha(&mut self, alpha: f32) {
        self.plane_alpha = alpha.clamp(0.0, 1.0);
    }

    /// Flat color used by untextured draws.
    pub fn set_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.color = [r, g, b, a];
    }

    /// Stores `matrix`; the color-matrix path is only enabled when it differs
    /// from identity.
    pub fn set_color_matrix(&mut self, matrix: Mat4) {
        self.color_matrix = matrix;
        self.color_matrix_enabled = matrix != Mat4::IDENTITY;
    }

    pub fn set_deform(&mut self, enabled: bool) {
        self.deform = enabled;
    }

    pub fn set_dispersion(&mut self, enabled: bool) {
        self.dispersion = enabled;
    }

    pub fn texture(&self) -> Option<&Texture> {
        self.texture.as_ref()
    }

    pub fn is_textured(&self) -> bool {
        self.texture.is_some()
    }

    pub fn premultiplied_alpha(&self) -> bool {
        self.premultiplied_alpha
    }

    pub fn opaque(&self) -> bool {
        self.opaque
    }

    pub fn plane_alpha(&self) -> f32 {
        self.plane_alpha
    }

    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    pub fn color_matrix_enabled(&self) -> bool {
        self.color_matrix_enabled
    }

    pub fn color_matrix(&self) -> &Mat4 {
        &self.color_matrix
    }

    pub fn deform(&self) -> bool {
        self.deform
    }

    pub fn dispersion(&self) -> bool {
        self.dispersion
    }
}
