//! Driver seam between the composition core and an OpenGL ES style GPU.
//!
//! The core speaks a deliberately small command vocabulary:
//! - shader/program creation plus uniform uploads,
//! - textures and framebuffers for offscreen targets,
//! - static vertex buffers and per-draw attribute sources,
//! - fixed-function state (viewport, blending, clears) and `draw_arrays`.
//!
//! Two drivers ship with the crate: [`GlowGpu`] issues real GL calls through
//! `glow` (feature `gl`), and [`RecordingGpu`] keeps an in-memory command log
//! that tests and the CLI inspect.
//!
//! Every method assumes a current context on the calling thread; none of them
//! are safe to call concurrently.

#[cfg(feature = "gl")]
mod gl;
mod recording;

use std::ffi::c_void;
use std::fmt;

#[cfg(feature = "gl")]
pub use gl::{EglImageTargetTexture2dFn, GlowGpu};
pub use recording::{Command, DrawCall, RecordedUniform, RecordingGpu};

macro_rules! gpu_handle {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )+
    };
}

gpu_handle!(
    /// Texture object owned by whoever created it.
    TextureId,
    /// Framebuffer object; `None` in bind calls means the real output.
    FramebufferId,
    /// Static vertex buffer.
    BufferId,
    ShaderId,
    ProgramId,
    UniformLocation,
);

#[derive(Debug, Clone, thiserror::Error)]
pub enum GpuError {
    #[error("failed to allocate {0}")]
    Allocation(String),
    #[error("{stage} shader failed to compile: {log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("program failed to link: {log}")]
    Link { log: String },
    #[error("{0} is not supported by this driver")]
    Unsupported(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Sampler target of a texture source.
///
/// `None` marks a texture that cannot be sampled by the synthesized programs;
/// descriptions carrying it are drawn untextured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextureTarget {
    #[default]
    None,
    Texture2d,
    External,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Triangles,
    TriangleStrip,
    TriangleFan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Separate RGB/alpha blend function pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlendFunc {
    pub src_rgb: BlendFactor,
    pub dst_rgb: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

impl BlendFunc {
    /// Same factors for color and alpha.
    pub const fn uniform(src: BlendFactor, dst: BlendFactor) -> Self {
        Self {
            src_rgb: src,
            dst_rgb: dst,
            src_alpha: src,
            dst_alpha: dst,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    /// Driver-specific incompleteness code.
    Incomplete(u32),
}

impl FramebufferStatus {
    pub fn is_complete(self) -> bool {
        matches!(self, FramebufferStatus::Complete)
    }
}

/// Fixed attribute slots shared by every synthesized program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexAttrib {
    Position,
    TexCoords,
    TexCoordsR,
    TexCoordsG,
    TexCoordsB,
}

impl VertexAttrib {
    pub const ALL: [VertexAttrib; 5] = [
        VertexAttrib::Position,
        VertexAttrib::TexCoords,
        VertexAttrib::TexCoordsR,
        VertexAttrib::TexCoordsG,
        VertexAttrib::TexCoordsB,
    ];

    pub fn location(self) -> u32 {
        match self {
            VertexAttrib::Position => 0,
            VertexAttrib::TexCoords => 1,
            VertexAttrib::TexCoordsR => 2,
            VertexAttrib::TexCoordsG => 3,
            VertexAttrib::TexCoordsB => 4,
        }
    }

    /// Attribute name as declared in the synthesized vertex stage.
    pub fn name(self) -> &'static str {
        match self {
            VertexAttrib::Position => "position",
            VertexAttrib::TexCoords => "texCoords",
            VertexAttrib::TexCoordsR => "texCoords_r",
            VertexAttrib::TexCoordsG => "texCoords_g",
            VertexAttrib::TexCoordsB => "texCoords_b",
        }
    }
}

/// Where a vertex attribute reads its data from.
#[derive(Clone, Copy, Debug)]
pub enum AttribSource<'a> {
    /// Client-side floats, tightly packed.
    Slice { data: &'a [f32], components: u32 },
    /// Interleaved floats inside a static vertex buffer; stride and offset in bytes.
    Buffer {
        buffer: BufferId,
        components: u32,
        stride: u32,
        offset: u32,
    },
}

#[derive(Clone, Copy, Debug)]
pub enum UniformValue<'a> {
    Int(i32),
    Float(f32),
    Vec4([f32; 4]),
    /// Column-major 4×4 matrix.
    Mat4(&'a [f32; 16]),
}

/// Window-system image (an `EGLImageKHR` on Android-like stacks).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalImage(pub *mut c_void);

pub trait Gpu {
    fn max_texture_size(&self) -> u32;

    fn max_viewport_dims(&self) -> [u32; 2];

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GpuError>;

    /// Links two compiled stages, binding each attribute to its fixed location.
    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        attributes: &[VertexAttrib],
    ) -> Result<ProgramId, GpuError>;

    fn delete_shader(&mut self, shader: ShaderId);

    fn delete_program(&mut self, program: ProgramId);

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn use_program(&mut self, program: ProgramId);

    /// Uploads to the program most recently passed to [`Gpu::use_program`].
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue<'_>);

    fn create_texture(&mut self) -> Result<TextureId, GpuError>;

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>);

    /// Clamp-to-edge wrapping plus the given min/mag filter on the bound texture.
    fn set_texture_sampling(&mut self, target: TextureTarget, filter: Filter);

    /// (Re)allocates RGBA8 storage for the bound 2D texture.
    fn allocate_texture_storage(&mut self, width: u32, height: u32, pixels: Option<&[u8]>);

    /// Makes `image` the storage of the bound 2D texture.
    fn import_external_image(&mut self, image: ExternalImage) -> Result<(), GpuError>;

    fn delete_texture(&mut self, texture: TextureId);

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GpuError>;

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

    /// Attaches `texture` as color attachment 0 of the bound framebuffer.
    fn attach_color_texture(&mut self, texture: TextureId);

    /// Completeness of the bound framebuffer.
    fn framebuffer_status(&mut self) -> FramebufferStatus;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn create_vertex_buffer(&mut self, data: &[u8]) -> Result<BufferId, GpuError>;

    fn delete_buffer(&mut self, buffer: BufferId);

    /// Enables `attrib` and points it at `source`.
    fn set_vertex_attrib(&mut self, attrib: VertexAttrib, source: AttribSource<'_>);

    fn disable_vertex_attrib(&mut self, attrib: VertexAttrib);

    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32);

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);

    /// `None` disables blending.
    fn set_blend(&mut self, blend: Option<BlendFunc>);

    /// Clears the color buffer of the bound framebuffer.
    fn clear(&mut self, color: [f32; 4]);
}
