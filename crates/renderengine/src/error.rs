use crate::gpu::{FramebufferStatus, GpuError};

/// Failures surfaced by [`crate::CompositionEngine`] operations.
///
/// Shader compile/link failures never show up here: the affected program is
/// cached as invalid and draws using it are skipped.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("offscreen framebuffer is incomplete ({status:?})")]
    IncompleteFramebuffer { status: FramebufferStatus },
    #[error("engine was built without the stereo compositor")]
    StereoUnavailable,
    /// Stereo groups share the left eye target, so they cannot nest.
    #[error("a stereo group is already open")]
    NestedStereoGroup,
}
