//! Layer composition core for stereo-capable displays.
//!
//! The crate turns per-layer drawing state into GLSL ES programs, caches them
//! by a compact state key, and drives an OpenGL ES style GPU through the
//! [`gpu::Gpu`] seam. The overall flow is:
//!
//! ```text
//!   caller ──▶ CompositionEngine::setup_* ──▶ CompositionDescription
//!                       │                              │ compute_key()
//!                       │                              ▼
//!                       │                 ProgramCache ──▶ synthesize() ──▶ Gpu
//!                       ▼
//!   draw_mesh / begin_group / end_group ──▶ mono quad or stereo warp ──▶ Gpu
//! ```
//!
//! `CompositionEngine` owns the driver, the cache, the current description
//! and the group stack. The stereo compositor (see [`stereo`]) swaps the
//! per-group offscreen target for persistent eye targets that are resolved
//! through a lens-warp mesh with per-channel chromatic correction.

mod cache;
mod description;
mod engine;
mod error;
pub mod gpu;
mod group;
mod key;
mod mesh;
mod program;
pub mod stereo;
mod synth;

pub use cache::{ProgramCache, ProgramHandle};
pub use description::{CompositionDescription, Texture};
pub use engine::{CompositionEngine, CompositorMode, ImageFramebuffer, Rect, Rotation};
pub use error::RenderError;
pub use group::{Group, GroupMode, GroupStack};
pub use key::{compute_key, StateKey};
pub use mesh::Mesh;
pub use program::Program;
pub use stereo::{Eye, StereoOptions};
pub use synth::{fragment_source, synthesize, vertex_source, ShaderSources};
