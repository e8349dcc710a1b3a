use std::collections::HashMap;
use std::ffi::c_void;

use glow::{HasContext, PixelUnpackData};

use super::{
    AttribSource, BlendFactor, BlendFunc, BufferId, ExternalImage, Filter, FramebufferId,
    FramebufferStatus, Gpu, GpuError, Primitive, ProgramId, ShaderId, ShaderStage, TextureId,
    TextureTarget, UniformLocation, UniformValue, VertexAttrib,
};

/// `GL_TEXTURE_EXTERNAL_OES` from `OES_EGL_image_external`.
const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

/// `glEGLImageTargetTexture2DOES`, resolved by the caller through the same
/// loader that produced the `glow::Context`.
pub type EglImageTargetTexture2dFn = unsafe extern "system" fn(target: u32, image: *mut c_void);

/// Maps our plain integer handles onto native GL objects.
struct HandleTable<T> {
    next: u32,
    entries: HashMap<u32, T>,
}

impl<T> HandleTable<T> {
    fn new() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, value: T) -> u32 {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, value);
        id
    }

    fn get(&self, id: u32) -> Option<&T> {
        self.entries.get(&id)
    }

    fn remove(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }
}

/// Uniform locations keyed by owning program and name. Repeated lookups hand
/// back the same handle; deleting the program drops its entries.
struct UniformTable<T> {
    handles: HandleTable<T>,
    by_name: HashMap<(u32, String), u32>,
}

impl<T> UniformTable<T> {
    fn new() -> Self {
        Self {
            handles: HandleTable::new(),
            by_name: HashMap::new(),
        }
    }

    fn lookup(
        &mut self,
        program: u32,
        name: &str,
        resolve: impl FnOnce() -> Option<T>,
    ) -> Option<u32> {
        let key = (program, name.to_owned());
        if let Some(&id) = self.by_name.get(&key) {
            return Some(id);
        }
        let id = self.handles.insert(resolve()?);
        self.by_name.insert(key, id);
        Some(id)
    }

    fn get(&self, id: u32) -> Option<&T> {
        self.handles.get(id)
    }

    fn forget_program(&mut self, program: u32) {
        let handles = &mut self.handles;
        self.by_name.retain(|(owner, _), id| {
            if *owner == program {
                handles.remove(*id);
                false
            } else {
                true
            }
        });
    }
}

/// OpenGL ES 2/3 driver on top of `glow`.
pub struct GlowGpu {
    gl: glow::Context,
    egl_image_target: Option<EglImageTargetTexture2dFn>,
    textures: HandleTable<glow::Texture>,
    framebuffers: HandleTable<glow::Framebuffer>,
    buffers: HandleTable<glow::Buffer>,
    shaders: HandleTable<glow::Shader>,
    programs: HandleTable<glow::Program>,
    uniforms: UniformTable<glow::UniformLocation>,
    stream_buffers: HashMap<u32, glow::Buffer>,
    vertex_array: Option<glow::VertexArray>,
    max_texture_size: u32,
    max_viewport_dims: [u32; 2],
}

impl GlowGpu {
    /// Wraps a context and queries its limits.
    ///
    /// # Safety
    ///
    /// `gl` must be current on the calling thread for as long as this driver
    /// is used, and every later call must come from that thread.
    pub unsafe fn new(gl: glow::Context, egl_image_target: Option<EglImageTargetTexture2dFn>) -> Self {
        let (max_texture_size, max_viewport_dims, vertex_array) = unsafe {
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 4);
            gl.pixel_store_i32(glow::PACK_ALIGNMENT, 4);

            let max_texture_size = gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE).max(0) as u32;
            let mut dims = [0i32; 2];
            gl.get_parameter_i32_slice(glow::MAX_VIEWPORT_DIMS, &mut dims);

            // Core profiles refuse attribute state without a bound vertex array.
            let vertex_array = match gl.create_vertex_array() {
                Ok(vao) => {
                    gl.bind_vertex_array(Some(vao));
                    Some(vao)
                }
                Err(err) => {
                    tracing::debug!(error = %err, "vertex arrays unavailable; using default state");
                    None
                }
            };
            (
                max_texture_size,
                [dims[0].max(0) as u32, dims[1].max(0) as u32],
                vertex_array,
            )
        };

        tracing::debug!(
            max_texture_size,
            max_viewport = ?max_viewport_dims,
            image_import = egl_image_target.is_some(),
            "initialised GL driver"
        );

        Self {
            gl,
            egl_image_target,
            textures: HandleTable::new(),
            framebuffers: HandleTable::new(),
            buffers: HandleTable::new(),
            shaders: HandleTable::new(),
            programs: HandleTable::new(),
            uniforms: UniformTable::new(),
            stream_buffers: HashMap::new(),
            vertex_array,
            max_texture_size,
            max_viewport_dims,
        }
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    fn stream_buffer(&mut self, location: u32) -> Option<glow::Buffer> {
        if let Some(buffer) = self.stream_buffers.get(&location) {
            return Some(*buffer);
        }
        // SAFETY: context is current per `GlowGpu::new`.
        match unsafe { self.gl.create_buffer() } {
            Ok(buffer) => {
                self.stream_buffers.insert(location, buffer);
                Some(buffer)
            }
            Err(err) => {
                tracing::warn!(error = %err, location, "failed to create streaming vertex buffer");
                None
            }
        }
    }
}

impl Drop for GlowGpu {
    fn drop(&mut self) {
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe {
            for (_, buffer) in self.stream_buffers.drain() {
                self.gl.delete_buffer(buffer);
            }
            if let Some(vao) = self.vertex_array.take() {
                self.gl.delete_vertex_array(vao);
            }
        }
    }
}

fn texture_target(target: TextureTarget) -> Option<u32> {
    match target {
        TextureTarget::None => None,
        TextureTarget::Texture2d => Some(glow::TEXTURE_2D),
        TextureTarget::External => Some(TEXTURE_EXTERNAL_OES),
    }
}

fn blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
    }
}

fn primitive_mode(primitive: Primitive) -> u32 {
    match primitive {
        Primitive::Triangles => glow::TRIANGLES,
        Primitive::TriangleStrip => glow::TRIANGLE_STRIP,
        Primitive::TriangleFan => glow::TRIANGLE_FAN,
    }
}

fn gl_size(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl Gpu for GlowGpu {
    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn max_viewport_dims(&self) -> [u32; 2] {
        self.max_viewport_dims
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GpuError> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        // SAFETY: context is current per `GlowGpu::new`.
        let shader = unsafe {
            let shader = self.gl.create_shader(kind).map_err(GpuError::Allocation)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(GpuError::Compile { stage, log });
            }
            shader
        };
        Ok(ShaderId(self.shaders.insert(shader)))
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        attributes: &[VertexAttrib],
    ) -> Result<ProgramId, GpuError> {
        let (Some(&vs), Some(&fs)) = (self.shaders.get(vertex.0), self.shaders.get(fragment.0))
        else {
            return Err(GpuError::Link {
                log: "unknown shader handle".into(),
            });
        };
        // SAFETY: context is current per `GlowGpu::new`.
        let program = unsafe {
            let program = self.gl.create_program().map_err(GpuError::Allocation)?;
            self.gl.attach_shader(program, vs);
            self.gl.attach_shader(program, fs);
            for attrib in attributes {
                self.gl
                    .bind_attrib_location(program, attrib.location(), attrib.name());
            }
            self.gl.link_program(program);
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(GpuError::Link { log });
            }
            program
        };
        Ok(ProgramId(self.programs.insert(program)))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if let Some(shader) = self.shaders.remove(shader.0) {
            // SAFETY: context is current per `GlowGpu::new`.
            unsafe { self.gl.delete_shader(shader) };
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.uniforms.forget_program(program.0);
        if let Some(program) = self.programs.remove(program.0) {
            // SAFETY: context is current per `GlowGpu::new`.
            unsafe { self.gl.delete_program(program) };
        }
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let native = *self.programs.get(program.0)?;
        let gl = &self.gl;
        // SAFETY: context is current per `GlowGpu::new`.
        let id = self.uniforms.lookup(program.0, name, || unsafe {
            gl.get_uniform_location(native, name)
        })?;
        Some(UniformLocation(id))
    }

    fn use_program(&mut self, program: ProgramId) {
        let program = self.programs.get(program.0).copied();
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe { self.gl.use_program(program) };
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue<'_>) {
        let Some(location) = self.uniforms.get(location.0) else {
            return;
        };
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe {
            match value {
                UniformValue::Int(v) => self.gl.uniform_1_i32(Some(location), v),
                UniformValue::Float(v) => self.gl.uniform_1_f32(Some(location), v),
                UniformValue::Vec4(v) => self.gl.uniform_4_f32_slice(Some(location), &v),
                UniformValue::Mat4(v) => {
                    self.gl
                        .uniform_matrix_4_f32_slice(Some(location), false, v.as_slice())
                }
            }
        }
    }

    fn create_texture(&mut self) -> Result<TextureId, GpuError> {
        // SAFETY: context is current per `GlowGpu::new`.
        let texture = unsafe { self.gl.create_texture() }.map_err(GpuError::Allocation)?;
        Ok(TextureId(self.textures.insert(texture)))
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>) {
        let Some(target) = texture_target(target) else {
            return;
        };
        let texture = texture.and_then(|id| self.textures.get(id.0).copied());
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe { self.gl.bind_texture(target, texture) };
    }

    fn set_texture_sampling(&mut self, target: TextureTarget, filter: Filter) {
        let Some(target) = texture_target(target) else {
            return;
        };
        let filter = match filter {
            Filter::Nearest => glow::NEAREST,
            Filter::Linear => glow::LINEAR,
        } as i32;
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe {
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, filter);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, filter);
        }
    }

    fn allocate_texture_storage(&mut self, width: u32, height: u32, pixels: Option<&[u8]>) {
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe {
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                gl_size(width),
                gl_size(height),
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                PixelUnpackData::Slice(pixels),
            );
        }
    }

    fn import_external_image(&mut self, image: ExternalImage) -> Result<(), GpuError> {
        let Some(target_fn) = self.egl_image_target else {
            return Err(GpuError::Unsupported("EGL image import"));
        };
        // SAFETY: the function pointer was resolved for this context and a 2D
        // texture is bound by the caller.
        unsafe { target_fn(glow::TEXTURE_2D, image.0) };
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(texture) = self.textures.remove(texture.0) {
            // SAFETY: context is current per `GlowGpu::new`.
            unsafe { self.gl.delete_texture(texture) };
        }
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GpuError> {
        // SAFETY: context is current per `GlowGpu::new`.
        let framebuffer = unsafe { self.gl.create_framebuffer() }.map_err(GpuError::Allocation)?;
        Ok(FramebufferId(self.framebuffers.insert(framebuffer)))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        let framebuffer = framebuffer.and_then(|id| self.framebuffers.get(id.0).copied());
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer) };
    }

    fn attach_color_texture(&mut self, texture: TextureId) {
        let texture = self.textures.get(texture.0).copied();
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                texture,
                0,
            );
        }
    }

    fn framebuffer_status(&mut self) -> FramebufferStatus {
        // SAFETY: context is current per `GlowGpu::new`.
        let status = unsafe { self.gl.check_framebuffer_status(glow::FRAMEBUFFER) };
        if status == glow::FRAMEBUFFER_COMPLETE {
            FramebufferStatus::Complete
        } else {
            FramebufferStatus::Incomplete(status)
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if let Some(framebuffer) = self.framebuffers.remove(framebuffer.0) {
            // SAFETY: context is current per `GlowGpu::new`.
            unsafe { self.gl.delete_framebuffer(framebuffer) };
        }
    }

    fn create_vertex_buffer(&mut self, data: &[u8]) -> Result<BufferId, GpuError> {
        // SAFETY: context is current per `GlowGpu::new`.
        let buffer = unsafe {
            let buffer = self.gl.create_buffer().map_err(GpuError::Allocation)?;
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl
                .buffer_data_u8_slice(glow::ARRAY_BUFFER, data, glow::STATIC_DRAW);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            buffer
        };
        Ok(BufferId(self.buffers.insert(buffer)))
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.buffers.remove(buffer.0) {
            // SAFETY: context is current per `GlowGpu::new`.
            unsafe { self.gl.delete_buffer(buffer) };
        }
    }

    fn set_vertex_attrib(&mut self, attrib: VertexAttrib, source: AttribSource<'_>) {
        let location = attrib.location();
        let (components, stride, offset) = match source {
            AttribSource::Slice { data, components } => {
                let Some(buffer) = self.stream_buffer(location) else {
                    return;
                };
                // SAFETY: context is current per `GlowGpu::new`.
                unsafe {
                    self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
                    self.gl.buffer_data_u8_slice(
                        glow::ARRAY_BUFFER,
                        bytemuck::cast_slice(data),
                        glow::STREAM_DRAW,
                    );
                }
                (components, 0, 0)
            }
            AttribSource::Buffer {
                buffer,
                components,
                stride,
                offset,
            } => {
                let Some(&buffer) = self.buffers.get(buffer.0) else {
                    return;
                };
                // SAFETY: context is current per `GlowGpu::new`.
                unsafe { self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer)) };
                (components, stride, offset)
            }
        };
        // SAFETY: context is current per `GlowGpu::new`; an array buffer is bound above.
        unsafe {
            self.gl.enable_vertex_attrib_array(location);
            self.gl.vertex_attrib_pointer_f32(
                location,
                gl_size(components),
                glow::FLOAT,
                false,
                gl_size(stride),
                gl_size(offset),
            );
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
    }

    fn disable_vertex_attrib(&mut self, attrib: VertexAttrib) {
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe { self.gl.disable_vertex_attrib_array(attrib.location()) };
    }

    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32) {
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe {
            self.gl
                .draw_arrays(primitive_mode(primitive), gl_size(first), gl_size(count))
        };
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe { self.gl.viewport(x, y, gl_size(width), gl_size(height)) };
    }

    fn set_blend(&mut self, blend: Option<BlendFunc>) {
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe {
            match blend {
                Some(func) => {
                    self.gl.enable(glow::BLEND);
                    self.gl.blend_func_separate(
                        blend_factor(func.src_rgb),
                        blend_factor(func.dst_rgb),
                        blend_factor(func.src_alpha),
                        blend_factor(func.dst_alpha),
                    );
                }
                None => self.gl.disable(glow::BLEND),
            }
        }
    }

    fn clear(&mut self, color: [f32; 4]) {
        // SAFETY: context is current per `GlowGpu::new`.
        unsafe {
            self.gl.clear_color(color[0], color[1], color[2], color[3]);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }
}
