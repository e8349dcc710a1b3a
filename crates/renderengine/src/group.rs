use glam::Mat4;

use crate::description::CompositionDescription;
use crate::error::RenderError;
use crate::gpu::{Filter, FramebufferId, Gpu, TextureId, TextureTarget};

/// How a group is composited back when it ends.
///
/// Only the stereo compositor distinguishes modes; the mono compositor always
/// applies the group's color transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupMode {
    #[default]
    Plain,
    /// Sample through the lens-warp coordinates.
    Deform,
    DeformWithColorTransform,
    ColorTransform,
}

impl GroupMode {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(GroupMode::Plain),
            1 => Some(GroupMode::Deform),
            2 => Some(GroupMode::DeformWithColorTransform),
            3 => Some(GroupMode::ColorTransform),
            _ => None,
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            GroupMode::Plain => 0,
            GroupMode::Deform => 1,
            GroupMode::DeformWithColorTransform => 2,
            GroupMode::ColorTransform => 3,
        }
    }

    pub fn deforms(self) -> bool {
        matches!(self, GroupMode::Deform | GroupMode::DeformWithColorTransform)
    }

    pub fn applies_color_transform(self) -> bool {
        matches!(
            self,
            GroupMode::DeformWithColorTransform | GroupMode::ColorTransform
        )
    }
}

/// One offscreen render-target frame on the group stack.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Group {
    pub texture: TextureId,
    pub framebuffer: FramebufferId,
    pub width: u32,
    pub height: u32,
    /// Applied when the group is composited back.
    pub color_transform: Mat4,
    /// Description in effect when the group began; restored after the
    /// composite draw.
    pub(crate) saved_description: CompositionDescription,
    /// Persistent targets (stereo eyes) are reused instead of freed at pop.
    pub(crate) persistent: bool,
}

impl Group {
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

/// LIFO stack of groups. An empty stack means drawing targets the real output.
#[derive(Debug, Default)]
pub struct GroupStack {
    groups: Vec<Group>,
}

impl GroupStack {
    pub fn push(&mut self, group: Group) {
        self.groups.push(group);
    }

    pub fn pop(&mut self) -> Option<Group> {
        self.groups.pop()
    }

    pub fn top(&self) -> Option<&Group> {
        self.groups.last()
    }

    pub fn depth(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Framebuffer draws should land in; `None` is the real output.
    pub fn current_framebuffer(&self) -> Option<FramebufferId> {
        self.top().map(|group| group.framebuffer)
    }
}

/// Texture plus framebuffer pair created together and released together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct OffscreenTarget {
    pub texture: TextureId,
    pub framebuffer: FramebufferId,
    pub width: u32,
    pub height: u32,
}

impl OffscreenTarget {
    /// Allocates an RGBA texture of the given size and a framebuffer rendering
    /// into it. The new framebuffer is left bound on success. Every object
    /// created here is deleted again before an error is returned; the caller
    /// rebinds its own target in that case.
    pub fn create<G: Gpu + ?Sized>(
        gpu: &mut G,
        width: u32,
        height: u32,
        filter: Filter,
    ) -> Result<Self, RenderError> {
        let texture = gpu.create_texture()?;
        gpu.bind_texture(TextureTarget::Texture2d, Some(texture));
        gpu.set_texture_sampling(TextureTarget::Texture2d, filter);
        gpu.allocate_texture_storage(width, height, None);

        let framebuffer = gpu.create_framebuffer().map_err(|err| {
            gpu.delete_texture(texture);
            RenderError::from(err)
        })?;
        let target = Self {
            texture,
            framebuffer,
            width,
            height,
        };
        target.attach(gpu).map_err(|err| {
            target.release(gpu);
            err
        })?;
        Ok(target)
    }

    /// Reallocates the texture storage at a new size and re-attaches it. The
    /// framebuffer is left bound on success.
    pub fn resize<G: Gpu + ?Sized>(
        &mut self,
        gpu: &mut G,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        gpu.bind_texture(TextureTarget::Texture2d, Some(self.texture));
        gpu.allocate_texture_storage(width, height, None);
        self.width = width;
        self.height = height;
        self.attach(gpu)
    }

    fn attach<G: Gpu + ?Sized>(&self, gpu: &mut G) -> Result<(), RenderError> {
        gpu.bind_framebuffer(Some(self.framebuffer));
        gpu.attach_color_texture(self.texture);
        let status = gpu.framebuffer_status();
        if status.is_complete() {
            Ok(())
        } else {
            Err(RenderError::IncompleteFramebuffer { status })
        }
    }

    pub fn release<G: Gpu + ?Sized>(&self, gpu: &mut G) {
        gpu.delete_framebuffer(self.framebuffer);
        gpu.delete_texture(self.texture);
    }
}
