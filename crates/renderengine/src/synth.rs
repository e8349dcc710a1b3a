//! GLSL ES 1.00 source generation from a [`StateKey`].
//!
//! Both stages are assembled line by line. Which blocks appear depends only on
//! the key, so the output is a pure function of it. Fragment stage order:
//!
//! ```text
//!   sample (texture / warped texture / flat color)
//!     └─▶ force opaque ─▶ plane alpha ─▶ color matrix (linear space)
//! ```

use crate::gpu::TextureTarget;
use crate::key::StateKey;

/// Fade width used at the border of warped samples.
const DEFORM_FADE_SCALE: &str = "20.0";

/// Vertex and fragment source for one program variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: String,
    pub fragment: String,
}

/// Line emitter with block indentation.
#[derive(Default)]
struct SourceBuilder {
    text: String,
    depth: usize,
}

impl SourceBuilder {
    fn line(&mut self, line: &str) -> &mut Self {
        for _ in 0..self.depth {
            self.text.push_str("    ");
        }
        self.text.push_str(line);
        self.text.push('\n');
        self
    }

    fn open(&mut self, line: &str) -> &mut Self {
        self.line(line);
        self.depth += 1;
        self
    }

    fn close(&mut self, line: &str) -> &mut Self {
        self.depth = self.depth.saturating_sub(1);
        self.line(line)
    }

    fn finish(self) -> String {
        self.text
    }
}

pub fn synthesize(key: StateKey) -> ShaderSources {
    ShaderSources {
        vertex: vertex_source(key),
        fragment: fragment_source(key),
    }
}

pub fn vertex_source(key: StateKey) -> String {
    let mut vs = SourceBuilder::default();
    if key.is_texturing() {
        vs.line("attribute vec4 texCoords;")
            .line("attribute vec4 texCoords_r;")
            .line("attribute vec4 texCoords_g;")
            .line("attribute vec4 texCoords_b;")
            .line("varying vec2 outTexCoords;")
            .line("varying vec2 outTexCoords_r;")
            .line("varying vec2 outTexCoords_g;")
            .line("varying vec2 outTexCoords_b;");
    }
    vs.line("attribute vec4 position;")
        .line("uniform mat4 projection;")
        .line("uniform mat4 texture;")
        .open("void main(void) {")
        .line("gl_Position = projection * position;");
    if key.is_texturing() {
        vs.line("outTexCoords = (texture * texCoords).st;")
            .line("outTexCoords_r = (texture * texCoords_r).st;")
            .line("outTexCoords_g = (texture * texCoords_g).st;")
            .line("outTexCoords_b = (texture * texCoords_b).st;");
    }
    vs.close("}");
    vs.finish()
}

pub fn fragment_source(key: StateKey) -> String {
    let mut fs = SourceBuilder::default();
    let target = key.texture_target();
    if target == TextureTarget::External {
        fs.line("#extension GL_OES_EGL_image_external : require");
    }
    fs.line("precision mediump float;");
    match target {
        TextureTarget::External => {
            fs.line("uniform samplerExternalOES sampler;");
        }
        TextureTarget::Texture2d => {
            fs.line("uniform sampler2D sampler;");
        }
        TextureTarget::None => {
            fs.line("uniform vec4 color;");
        }
    }
    if key.is_texturing() {
        fs.line("varying vec2 outTexCoords;")
            .line("varying vec2 outTexCoords_r;")
            .line("varying vec2 outTexCoords_g;")
            .line("varying vec2 outTexCoords_b;");
    }
    if key.has_plane_alpha() {
        fs.line("uniform float alphaPlane;");
    }
    if key.has_color_matrix() {
        fs.line("uniform mat4 colorMatrix;");
    }

    fs.open("void main(void) {");
    if key.is_texturing() {
        if key.has_deform() {
            write_deformed_sample(&mut fs, key.has_dispersion());
        } else {
            fs.line("gl_FragColor = texture2D(sampler, outTexCoords);");
        }
    } else {
        fs.line("gl_FragColor = color;");
    }

    if key.is_opaque() {
        fs.line("gl_FragColor.a = 1.0;");
    }
    if key.has_plane_alpha() {
        if key.is_premultiplied() {
            fs.line("gl_FragColor *= alphaPlane;");
        } else {
            fs.line("gl_FragColor.a *= alphaPlane;");
        }
    }
    if key.has_color_matrix() {
        let unpremultiply = !key.is_opaque() && key.is_premultiplied();
        if unpremultiply {
            fs.line("gl_FragColor.rgb = gl_FragColor.rgb / gl_FragColor.a;");
        }
        fs.line("gl_FragColor.rgb = pow(gl_FragColor.rgb, vec3(2.2));")
            .line("vec4 transformed = colorMatrix * vec4(gl_FragColor.rgb, 1.0);")
            .line("gl_FragColor.rgb = transformed.rgb / transformed.a;")
            .line("gl_FragColor.rgb = pow(gl_FragColor.rgb, vec3(1.0 / 2.2));");
        if unpremultiply {
            fs.line("gl_FragColor.rgb = gl_FragColor.rgb * gl_FragColor.a;");
        }
    }
    fs.close("}");
    fs.finish()
}

/// Samples through the warp coordinates, fading to black over the outer
/// 1/20th of the red channel's UV range.
fn write_deformed_sample(fs: &mut SourceBuilder, dispersion: bool) {
    fs.line(&format!("float scale = {DEFORM_FADE_SCALE};"))
        .line("float fade_top = clamp(outTexCoords_r.y * scale, 0.0, 1.0);")
        .line("float fade_bottom = clamp((1.0 - outTexCoords_r.y) * scale, 0.0, 1.0);")
        .line("float fade_left = clamp(outTexCoords_r.x * scale, 0.0, 1.0);")
        .line("float fade_right = clamp((1.0 - outTexCoords_r.x) * scale, 0.0, 1.0);")
        .line("float fade = fade_top * fade_bottom * fade_left * fade_right;");
    if dispersion {
        fs.line("gl_FragColor.r = texture2D(sampler, outTexCoords_r).r * fade;")
            .line("gl_FragColor.g = texture2D(sampler, outTexCoords_g).g * fade;")
            .line("gl_FragColor.b = texture2D(sampler, outTexCoords_b).b * fade;");
    } else {
        fs.line("gl_FragColor = texture2D(sampler, outTexCoords_r) * fade;");
    }
    fs.line("gl_FragColor.a = 1.0;");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(texture: u32) -> StateKey {
        StateKey::default().set(StateKey::TEXTURE_MASK, texture)
    }

    #[test]
    fn synthesis_is_deterministic() {
        for bits in 0..=0xff {
            let key = StateKey::from_bits(bits);
            assert_eq!(synthesize(key), synthesize(key));
        }
    }

    #[test]
    fn untextured_vertex_stage_has_no_tex_coords() {
        let vs = vertex_source(key(StateKey::TEXTURE_OFF));
        assert!(vs.contains("attribute vec4 position;"));
        assert!(vs.contains("uniform mat4 projection;"));
        assert!(vs.contains("uniform mat4 texture;"));
        assert!(!vs.contains("texCoords"));

        let textured = vertex_source(key(StateKey::TEXTURE_2D));
        for name in ["outTexCoords", "outTexCoords_r", "outTexCoords_g", "outTexCoords_b"] {
            assert!(textured.contains(&format!("varying vec2 {name};")));
        }
        assert!(textured.contains("outTexCoords_b = (texture * texCoords_b).st;"));
    }

    #[test]
    fn sampler_declaration_follows_target() {
        let ext = fragment_source(key(StateKey::TEXTURE_EXT));
        assert!(ext.starts_with("#extension GL_OES_EGL_image_external : require\n"));
        assert!(ext.contains("uniform samplerExternalOES sampler;"));

        let tex2d = fragment_source(key(StateKey::TEXTURE_2D));
        assert!(!tex2d.contains("#extension"));
        assert!(tex2d.contains("uniform sampler2D sampler;"));

        let flat = fragment_source(key(StateKey::TEXTURE_OFF));
        assert!(flat.contains("uniform vec4 color;"));
        assert!(flat.contains("gl_FragColor = color;"));
        assert!(!flat.contains("sampler"));
    }

    #[test]
    fn plane_alpha_modulates_by_blend_mode() {
        let premult = key(StateKey::TEXTURE_2D)
            .set(StateKey::PLANE_ALPHA_MASK, StateKey::PLANE_ALPHA_LT_ONE)
            .set(StateKey::BLEND_MASK, StateKey::BLEND_PREMULT);
        let fs = fragment_source(premult);
        assert!(fs.contains("uniform float alphaPlane;"));
        assert!(fs.contains("gl_FragColor *= alphaPlane;"));

        let normal = premult.set(StateKey::BLEND_MASK, StateKey::BLEND_NORMAL);
        assert!(fragment_source(normal).contains("gl_FragColor.a *= alphaPlane;"));

        assert!(!fragment_source(key(StateKey::TEXTURE_2D)).contains("alphaPlane"));
    }

    #[test]
    fn color_matrix_runs_in_linear_space() {
        let translucent = key(StateKey::TEXTURE_EXT)
            .set(StateKey::COLOR_MATRIX_MASK, StateKey::COLOR_MATRIX_ON)
            .set(StateKey::BLEND_MASK, StateKey::BLEND_PREMULT);
        let fs = fragment_source(translucent);
        assert!(fs.contains("uniform mat4 colorMatrix;"));

        let order = [
            "gl_FragColor.rgb = gl_FragColor.rgb / gl_FragColor.a;",
            "pow(gl_FragColor.rgb, vec3(2.2))",
            "colorMatrix * vec4(gl_FragColor.rgb, 1.0)",
            "transformed.rgb / transformed.a",
            "pow(gl_FragColor.rgb, vec3(1.0 / 2.2))",
            "gl_FragColor.rgb = gl_FragColor.rgb * gl_FragColor.a;",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| fs.find(needle).expect(needle))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

        let opaque = translucent.set(StateKey::OPACITY_MASK, StateKey::OPACITY_OPAQUE);
        let fs = fragment_source(opaque);
        assert!(!fs.contains("/ gl_FragColor.a"));
        assert!(fs.find("gl_FragColor.a = 1.0;") < fs.find("pow(gl_FragColor.rgb, vec3(2.2))"));
    }

    #[test]
    fn deform_samples_per_channel_with_dispersion() {
        let deform = key(StateKey::TEXTURE_2D).set(StateKey::DEFORM_MASK, StateKey::DEFORM_ON);
        let fs = fragment_source(deform);
        assert!(fs.contains("float scale = 20.0;"));
        assert!(fs.contains("gl_FragColor = texture2D(sampler, outTexCoords_r) * fade;"));
        assert!(!fs.contains("texture2D(sampler, outTexCoords);"));

        let dispersed = deform.set(StateKey::DISPERSION_MASK, StateKey::DISPERSION_ON);
        let fs = fragment_source(dispersed);
        assert!(fs.contains("texture2D(sampler, outTexCoords_g).g * fade;"));
        assert!(fs.contains("texture2D(sampler, outTexCoords_b).b * fade;"));
    }

    #[test]
    fn deform_without_texture_is_flat_color() {
        let flat = key(StateKey::TEXTURE_OFF)
            .set(StateKey::DEFORM_MASK, StateKey::DEFORM_ON)
            .set(StateKey::DISPERSION_MASK, StateKey::DISPERSION_ON);
        let fs = fragment_source(flat);
        assert!(fs.contains("gl_FragColor = color;"));
        assert!(!fs.contains("fade"));
    }

    #[test]
    fn body_is_indented_once() {
        let vs = vertex_source(key(StateKey::TEXTURE_OFF));
        assert!(vs.contains("void main(void) {\n    gl_Position = projection * position;\n}\n"));
    }
}
