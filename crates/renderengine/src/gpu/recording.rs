use std::collections::{BTreeSet, HashMap};

use super::{
    AttribSource, BlendFunc, BufferId, ExternalImage, Filter, FramebufferId, FramebufferStatus,
    Gpu, GpuError, Primitive, ProgramId, ShaderId, ShaderStage, TextureId, TextureTarget,
    UniformLocation, UniformValue, VertexAttrib,
};

/// Incompleteness code reported when framebuffer failures are injected.
const INCOMPLETE_ATTACHMENT: u32 = 0x8CD6;

/// One recorded driver call. Uniform matrices are copied so the log stays
/// self-contained.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CompileShader { id: ShaderId, stage: ShaderStage },
    LinkProgram { id: ProgramId },
    UseProgram(ProgramId),
    SetUniform { location: UniformLocation, name: String, value: RecordedUniform },
    CreateTexture(TextureId),
    BindTexture { target: TextureTarget, texture: Option<TextureId> },
    TextureSampling { target: TextureTarget, filter: Filter },
    AllocateTexture { width: u32, height: u32 },
    ImportImage,
    DeleteTexture(TextureId),
    CreateFramebuffer(FramebufferId),
    BindFramebuffer(Option<FramebufferId>),
    AttachColor(TextureId),
    DeleteFramebuffer(FramebufferId),
    CreateBuffer { id: BufferId, bytes: usize },
    DeleteBuffer(BufferId),
    VertexAttrib { attrib: VertexAttrib, buffer: Option<BufferId>, offset: u32 },
    DisableAttrib(VertexAttrib),
    Draw(DrawCall),
    Viewport { x: i32, y: i32, width: u32, height: u32 },
    Blend(Option<BlendFunc>),
    Clear([f32; 4]),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedUniform {
    Int(i32),
    Float(f32),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

/// Snapshot of the state a draw was issued with.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub primitive: Primitive,
    pub first: u32,
    pub count: u32,
    pub program: Option<ProgramId>,
    pub framebuffer: Option<FramebufferId>,
    pub texture: Option<TextureId>,
    pub blend: Option<BlendFunc>,
}

struct LinkedProgram {
    vertex_source: String,
    fragment_source: String,
    uniforms: HashMap<String, UniformLocation>,
}

/// In-memory driver that records every call instead of talking to a GPU.
///
/// Handles are allocated from a single counter so ids never collide across
/// object kinds. Failures can be injected to exercise the invalid-program and
/// incomplete-framebuffer paths.
pub struct RecordingGpu {
    commands: Vec<Command>,
    next_id: u32,
    shader_sources: HashMap<ShaderId, String>,
    programs: HashMap<ProgramId, LinkedProgram>,
    uniform_names: HashMap<UniformLocation, String>,
    live_textures: BTreeSet<TextureId>,
    live_framebuffers: BTreeSet<FramebufferId>,
    live_buffers: BTreeSet<BufferId>,
    current_program: Option<ProgramId>,
    bound_framebuffer: Option<FramebufferId>,
    bound_texture: Option<TextureId>,
    blend: Option<BlendFunc>,
    viewport: (i32, i32, u32, u32),
    compile_failure_marker: Option<String>,
    incomplete_framebuffers: bool,
    supports_image_import: bool,
    shaders_compiled: usize,
    programs_linked: usize,
    max_texture_size: u32,
    max_viewport_dims: [u32; 2],
}

impl Default for RecordingGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingGpu {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            next_id: 1,
            shader_sources: HashMap::new(),
            programs: HashMap::new(),
            uniform_names: HashMap::new(),
            live_textures: BTreeSet::new(),
            live_framebuffers: BTreeSet::new(),
            live_buffers: BTreeSet::new(),
            current_program: None,
            bound_framebuffer: None,
            bound_texture: None,
            blend: None,
            viewport: (0, 0, 0, 0),
            compile_failure_marker: None,
            incomplete_framebuffers: false,
            supports_image_import: true,
            shaders_compiled: 0,
            programs_linked: 0,
            max_texture_size: 4096,
            max_viewport_dims: [4096, 8192],
        }
    }

    /// Any shader whose source contains `marker` fails to compile.
    pub fn fail_compiles_containing(mut self, marker: impl Into<String>) -> Self {
        self.compile_failure_marker = Some(marker.into());
        self
    }

    pub fn set_incomplete_framebuffers(&mut self, incomplete: bool) {
        self.incomplete_framebuffers = incomplete;
    }

    pub fn without_image_import(mut self) -> Self {
        self.supports_image_import = false;
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawCall> {
        self.commands.iter().filter_map(|command| match command {
            Command::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    pub fn shaders_compiled(&self) -> usize {
        self.shaders_compiled
    }

    pub fn programs_linked(&self) -> usize {
        self.programs_linked
    }

    pub fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bound_framebuffer
    }

    pub fn blend(&self) -> Option<BlendFunc> {
        self.blend
    }

    pub fn viewport(&self) -> (i32, i32, u32, u32) {
        self.viewport
    }

    pub fn live_textures(&self) -> &BTreeSet<TextureId> {
        &self.live_textures
    }

    pub fn live_framebuffers(&self) -> &BTreeSet<FramebufferId> {
        &self.live_framebuffers
    }

    pub fn live_buffers(&self) -> &BTreeSet<BufferId> {
        &self.live_buffers
    }

    pub fn program_sources(&self, program: ProgramId) -> Option<(&str, &str)> {
        self.programs
            .get(&program)
            .map(|linked| (linked.vertex_source.as_str(), linked.fragment_source.as_str()))
    }

    /// Last value uploaded to the named uniform, searching backwards.
    pub fn last_uniform(&self, name: &str) -> Option<&RecordedUniform> {
        self.commands.iter().rev().find_map(|command| match command {
            Command::SetUniform {
                name: recorded,
                value,
                ..
            } if recorded == name => Some(value),
            _ => None,
        })
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn declares_uniform(source: &str, name: &str) -> bool {
    source.lines().any(|line| {
        let line = line.trim();
        line.starts_with("uniform ") && line.trim_end_matches(';').ends_with(&format!(" {name}"))
    })
}

impl Gpu for RecordingGpu {
    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn max_viewport_dims(&self) -> [u32; 2] {
        self.max_viewport_dims
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GpuError> {
        if let Some(marker) = &self.compile_failure_marker {
            if source.contains(marker.as_str()) {
                return Err(GpuError::Compile {
                    stage,
                    log: format!("injected failure on '{marker}'"),
                });
            }
        }
        let id = ShaderId(self.allocate());
        self.shaders_compiled += 1;
        self.shader_sources.insert(id, source.to_string());
        self.commands.push(Command::CompileShader { id, stage });
        Ok(id)
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        _attributes: &[VertexAttrib],
    ) -> Result<ProgramId, GpuError> {
        let (Some(vertex_source), Some(fragment_source)) = (
            self.shader_sources.get(&vertex).cloned(),
            self.shader_sources.get(&fragment).cloned(),
        ) else {
            return Err(GpuError::Link {
                log: "unknown shader handle".into(),
            });
        };
        let id = ProgramId(self.allocate());
        self.programs_linked += 1;
        self.programs.insert(
            id,
            LinkedProgram {
                vertex_source,
                fragment_source,
                uniforms: HashMap::new(),
            },
        );
        self.commands.push(Command::LinkProgram { id });
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shader_sources.remove(&shader);
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let declared = {
            let linked = self.programs.get(&program)?;
            if let Some(location) = linked.uniforms.get(name) {
                return Some(*location);
            }
            declares_uniform(&linked.vertex_source, name)
                || declares_uniform(&linked.fragment_source, name)
        };
        if !declared {
            return None;
        }
        let location = UniformLocation(self.allocate());
        self.uniform_names.insert(location, name.to_string());
        if let Some(linked) = self.programs.get_mut(&program) {
            linked.uniforms.insert(name.to_string(), location);
        }
        Some(location)
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
        self.commands.push(Command::UseProgram(program));
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue<'_>) {
        let name = self
            .uniform_names
            .get(&location)
            .cloned()
            .unwrap_or_default();
        let value = match value {
            UniformValue::Int(v) => RecordedUniform::Int(v),
            UniformValue::Float(v) => RecordedUniform::Float(v),
            UniformValue::Vec4(v) => RecordedUniform::Vec4(v),
            UniformValue::Mat4(v) => RecordedUniform::Mat4(*v),
        };
        self.commands.push(Command::SetUniform {
            location,
            name,
            value,
        });
    }

    fn create_texture(&mut self) -> Result<TextureId, GpuError> {
        let id = TextureId(self.allocate());
        self.live_textures.insert(id);
        self.commands.push(Command::CreateTexture(id));
        Ok(id)
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>) {
        self.bound_texture = texture;
        self.commands.push(Command::BindTexture { target, texture });
    }

    fn set_texture_sampling(&mut self, target: TextureTarget, filter: Filter) {
        self.commands
            .push(Command::TextureSampling { target, filter });
    }

    fn allocate_texture_storage(&mut self, width: u32, height: u32, _pixels: Option<&[u8]>) {
        self.commands
            .push(Command::AllocateTexture { width, height });
    }

    fn import_external_image(&mut self, _image: ExternalImage) -> Result<(), GpuError> {
        if !self.supports_image_import {
            return Err(GpuError::Unsupported("external image import"));
        }
        self.commands.push(Command::ImportImage);
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.live_textures.remove(&texture);
        if self.bound_texture == Some(texture) {
            self.bound_texture = None;
        }
        self.commands.push(Command::DeleteTexture(texture));
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GpuError> {
        let id = FramebufferId(self.allocate());
        self.live_framebuffers.insert(id);
        self.commands.push(Command::CreateFramebuffer(id));
        Ok(id)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.bound_framebuffer = framebuffer;
        self.commands.push(Command::BindFramebuffer(framebuffer));
    }

    fn attach_color_texture(&mut self, texture: TextureId) {
        self.commands.push(Command::AttachColor(texture));
    }

    fn framebuffer_status(&mut self) -> FramebufferStatus {
        if self.incomplete_framebuffers && self.bound_framebuffer.is_some() {
            FramebufferStatus::Incomplete(INCOMPLETE_ATTACHMENT)
        } else {
            FramebufferStatus::Complete
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.live_framebuffers.remove(&framebuffer);
        if self.bound_framebuffer == Some(framebuffer) {
            self.bound_framebuffer = None;
        }
        self.commands.push(Command::DeleteFramebuffer(framebuffer));
    }

    fn create_vertex_buffer(&mut self, data: &[u8]) -> Result<BufferId, GpuError> {
        let id = BufferId(self.allocate());
        self.live_buffers.insert(id);
        self.commands.push(Command::CreateBuffer {
            id,
            bytes: data.len(),
        });
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.live_buffers.remove(&buffer);
        self.commands.push(Command::DeleteBuffer(buffer));
    }

    fn set_vertex_attrib(&mut self, attrib: VertexAttrib, source: AttribSource<'_>) {
        let (buffer, offset) = match source {
            AttribSource::Slice { .. } => (None, 0),
            AttribSource::Buffer { buffer, offset, .. } => (Some(buffer), offset),
        };
        self.commands.push(Command::VertexAttrib {
            attrib,
            buffer,
            offset,
        });
    }

    fn disable_vertex_attrib(&mut self, attrib: VertexAttrib) {
        self.commands.push(Command::DisableAttrib(attrib));
    }

    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32) {
        self.commands.push(Command::Draw(DrawCall {
            primitive,
            first,
            count,
            program: self.current_program,
            framebuffer: self.bound_framebuffer,
            texture: self.bound_texture,
            blend: self.blend,
        }));
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = (x, y, width, height);
        self.commands.push(Command::Viewport {
            x,
            y,
            width,
            height,
        });
    }

    fn set_blend(&mut self, blend: Option<BlendFunc>) {
        self.blend = blend;
        self.commands.push(Command::Blend(blend));
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.commands.push(Command::Clear(color));
    }
}
