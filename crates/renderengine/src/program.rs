use glam::Mat4;

use crate::description::CompositionDescription;
use crate::gpu::{
    Gpu, GpuError, ProgramId, ShaderId, ShaderStage, UniformLocation, UniformValue, VertexAttrib,
};
use crate::key::StateKey;
use crate::synth::ShaderSources;

#[derive(Clone, Copy, Debug, Default)]
struct Uniforms {
    projection: Option<UniformLocation>,
    texture_matrix: Option<UniformLocation>,
    sampler: Option<UniformLocation>,
    color: Option<UniformLocation>,
    alpha_plane: Option<UniformLocation>,
    color_matrix: Option<UniformLocation>,
}

#[derive(Clone, Copy, Debug)]
struct Linked {
    program: ProgramId,
    vertex: ShaderId,
    fragment: ShaderId,
    uniforms: Uniforms,
}

/// A linked shader pair for one [`StateKey`].
///
/// Construction never fails. A variant that does not compile or link is kept
/// as an invalid program so the cache does not retry it.
#[derive(Debug)]
pub struct Program {
    key: StateKey,
    linked: Option<Linked>,
}

impl Program {
    pub fn new<G: Gpu + ?Sized>(gpu: &mut G, key: StateKey, sources: &ShaderSources) -> Self {
        match build(gpu, sources) {
            Ok(linked) => Self {
                key,
                linked: Some(linked),
            },
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "shader program unusable; draws will be skipped");
                Self { key, linked: None }
            }
        }
    }

    pub fn key(&self) -> StateKey {
        self.key
    }

    pub fn is_valid(&self) -> bool {
        self.linked.is_some()
    }

    pub fn id(&self) -> Option<ProgramId> {
        self.linked.map(|linked| linked.program)
    }

    /// Makes this the current program. No-op when invalid.
    pub fn use_program<G: Gpu + ?Sized>(&self, gpu: &mut G) {
        if let Some(linked) = &self.linked {
            gpu.use_program(linked.program);
        }
    }

    /// Uploads every uniform this variant declares from `description`.
    pub fn set_uniforms<G: Gpu + ?Sized>(
        &self,
        gpu: &mut G,
        description: &CompositionDescription,
        projection: &Mat4,
    ) {
        let Some(linked) = &self.linked else {
            return;
        };
        let uniforms = linked.uniforms;

        if let Some(sampler) = uniforms.sampler {
            gpu.set_uniform(sampler, UniformValue::Int(0));
            if let Some(location) = uniforms.texture_matrix {
                let matrix = description
                    .texture()
                    .map_or(Mat4::IDENTITY, |texture| *texture.matrix())
                    .to_cols_array();
                gpu.set_uniform(location, UniformValue::Mat4(&matrix));
            }
        }
        if let Some(location) = uniforms.alpha_plane {
            gpu.set_uniform(location, UniformValue::Float(description.plane_alpha()));
        }
        if let Some(location) = uniforms.color {
            gpu.set_uniform(location, UniformValue::Vec4(description.color()));
        }
        if let Some(location) = uniforms.color_matrix {
            let matrix = description.color_matrix().to_cols_array();
            gpu.set_uniform(location, UniformValue::Mat4(&matrix));
        }
        if let Some(location) = uniforms.projection {
            let matrix = projection.to_cols_array();
            gpu.set_uniform(location, UniformValue::Mat4(&matrix));
        }
    }

    /// Deletes the GPU objects. Only called when the owning cache is torn down.
    pub(crate) fn release<G: Gpu + ?Sized>(&self, gpu: &mut G) {
        if let Some(linked) = &self.linked {
            gpu.delete_program(linked.program);
            gpu.delete_shader(linked.vertex);
            gpu.delete_shader(linked.fragment);
        }
    }
}

fn build<G: Gpu + ?Sized>(gpu: &mut G, sources: &ShaderSources) -> Result<Linked, GpuError> {
    let vertex = gpu.compile_shader(ShaderStage::Vertex, &sources.vertex)?;
    let fragment = match gpu.compile_shader(ShaderStage::Fragment, &sources.fragment) {
        Ok(fragment) => fragment,
        Err(err) => {
            gpu.delete_shader(vertex);
            return Err(err);
        }
    };
    let program = match gpu.link_program(vertex, fragment, &VertexAttrib::ALL) {
        Ok(program) => program,
        Err(err) => {
            gpu.delete_shader(vertex);
            gpu.delete_shader(fragment);
            return Err(err);
        }
    };

    let uniforms = Uniforms {
        projection: gpu.uniform_location(program, "projection"),
        texture_matrix: gpu.uniform_location(program, "texture"),
        sampler: gpu.uniform_location(program, "sampler"),
        color: gpu.uniform_location(program, "color"),
        alpha_plane: gpu.uniform_location(program, "alphaPlane"),
        color_matrix: gpu.uniform_location(program, "colorMatrix"),
    };
    Ok(Linked {
        program,
        vertex,
        fragment,
        uniforms,
    })
}
