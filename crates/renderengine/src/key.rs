use std::fmt;

use crate::description::CompositionDescription;
use crate::gpu::TextureTarget;

/// Compact encoding of which shader features a draw needs.
///
/// Only the presence or category of a feature reaches the key. Alpha values,
/// matrix contents and solid colors are uniforms and never change it, so every
/// description that needs the same shader text maps to the same key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey(u32);

impl StateKey {
    pub const BLEND_MASK: u32 = 1 << 0;
    pub const BLEND_NORMAL: u32 = 0;
    pub const BLEND_PREMULT: u32 = 1 << 0;

    pub const OPACITY_MASK: u32 = 1 << 1;
    pub const OPACITY_TRANSLUCENT: u32 = 0;
    pub const OPACITY_OPAQUE: u32 = 1 << 1;

    pub const PLANE_ALPHA_MASK: u32 = 1 << 2;
    pub const PLANE_ALPHA_EQ_ONE: u32 = 0;
    pub const PLANE_ALPHA_LT_ONE: u32 = 1 << 2;

    pub const TEXTURE_MASK: u32 = 3 << 3;
    pub const TEXTURE_OFF: u32 = 0;
    pub const TEXTURE_EXT: u32 = 1 << 3;
    pub const TEXTURE_2D: u32 = 2 << 3;

    pub const COLOR_MATRIX_MASK: u32 = 1 << 5;
    pub const COLOR_MATRIX_OFF: u32 = 0;
    pub const COLOR_MATRIX_ON: u32 = 1 << 5;

    pub const DEFORM_MASK: u32 = 1 << 6;
    pub const DEFORM_OFF: u32 = 0;
    pub const DEFORM_ON: u32 = 1 << 6;

    pub const DISPERSION_MASK: u32 = 1 << 7;
    pub const DISPERSION_OFF: u32 = 0;
    pub const DISPERSION_ON: u32 = 1 << 7;

    /// Bits enumerated when priming. Color matrix, deform and dispersion are
    /// rare enough to be compiled on first use.
    pub const PRIMED_MASK: u32 =
        Self::BLEND_MASK | Self::OPACITY_MASK | Self::PLANE_ALPHA_MASK | Self::TEXTURE_MASK;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Replaces the bits under `mask` with `value`.
    #[must_use]
    pub const fn set(self, mask: u32, value: u32) -> Self {
        Self((self.0 & !mask) | (value & mask))
    }

    pub const fn get(self, mask: u32) -> u32 {
        self.0 & mask
    }

    /// Raw texture field; one of the `TEXTURE_*` constants or an unused code.
    pub const fn texture_field(self) -> u32 {
        self.get(Self::TEXTURE_MASK)
    }

    /// True when the texture field holds one of the three defined codes.
    pub const fn has_known_texture_field(self) -> bool {
        matches!(
            self.texture_field(),
            Self::TEXTURE_OFF | Self::TEXTURE_EXT | Self::TEXTURE_2D
        )
    }

    pub fn texture_target(self) -> TextureTarget {
        match self.texture_field() {
            Self::TEXTURE_EXT => TextureTarget::External,
            Self::TEXTURE_2D => TextureTarget::Texture2d,
            _ => TextureTarget::None,
        }
    }

    pub fn is_texturing(self) -> bool {
        self.texture_target() != TextureTarget::None
    }

    pub const fn is_premultiplied(self) -> bool {
        self.get(Self::BLEND_MASK) == Self::BLEND_PREMULT
    }

    pub const fn is_opaque(self) -> bool {
        self.get(Self::OPACITY_MASK) == Self::OPACITY_OPAQUE
    }

    pub const fn has_plane_alpha(self) -> bool {
        self.get(Self::PLANE_ALPHA_MASK) == Self::PLANE_ALPHA_LT_ONE
    }

    pub const fn has_color_matrix(self) -> bool {
        self.get(Self::COLOR_MATRIX_MASK) == Self::COLOR_MATRIX_ON
    }

    pub const fn has_deform(self) -> bool {
        self.get(Self::DEFORM_MASK) == Self::DEFORM_ON
    }

    pub const fn has_dispersion(self) -> bool {
        self.get(Self::DISPERSION_MASK) == Self::DISPERSION_ON
    }

    /// Every key visited when priming, in ascending order.
    pub fn primed() -> impl Iterator<Item = StateKey> {
        (0..=Self::PRIMED_MASK)
            .map(|value| StateKey::default().set(Self::PRIMED_MASK, value))
            .filter(|key| key.has_known_texture_field())
    }
}

/// Reduces a description to the key of the program that can draw it.
///
/// A texture whose target cannot be sampled yields the untextured key.
pub fn compute_key(description: &CompositionDescription) -> StateKey {
    let texture = match description.texture().map(|texture| texture.target()) {
        Some(TextureTarget::External) => StateKey::TEXTURE_EXT,
        Some(TextureTarget::Texture2d) => StateKey::TEXTURE_2D,
        Some(TextureTarget::None) | None => StateKey::TEXTURE_OFF,
    };
    let flag = |enabled: bool, on: u32, off: u32| if enabled { on } else { off };

    StateKey::default()
        .set(StateKey::TEXTURE_MASK, texture)
        .set(
            StateKey::PLANE_ALPHA_MASK,
            flag(
                description.plane_alpha() < 1.0,
                StateKey::PLANE_ALPHA_LT_ONE,
                StateKey::PLANE_ALPHA_EQ_ONE,
            ),
        )
        .set(
            StateKey::BLEND_MASK,
            flag(
                description.premultiplied_alpha(),
                StateKey::BLEND_PREMULT,
                StateKey::BLEND_NORMAL,
            ),
        )
        .set(
            StateKey::OPACITY_MASK,
            flag(
                description.opaque(),
                StateKey::OPACITY_OPAQUE,
                StateKey::OPACITY_TRANSLUCENT,
            ),
        )
        .set(
            StateKey::COLOR_MATRIX_MASK,
            flag(
                description.color_matrix_enabled(),
                StateKey::COLOR_MATRIX_ON,
                StateKey::COLOR_MATRIX_OFF,
            ),
        )
        .set(
            StateKey::DEFORM_MASK,
            flag(description.deform(), StateKey::DEFORM_ON, StateKey::DEFORM_OFF),
        )
        .set(
            StateKey::DISPERSION_MASK,
            flag(
                description.dispersion(),
                StateKey::DISPERSION_ON,
                StateKey::DISPERSION_OFF,
            ),
        )
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let texture = match self.texture_field() {
            Self::TEXTURE_OFF => "off",
            Self::TEXTURE_EXT => "ext",
            Self::TEXTURE_2D => "2d",
            _ => "invalid",
        };
        write!(
            f,
            "{:#04x} texture={texture} blend={} {}",
            self.0,
            if self.is_premultiplied() { "premult" } else { "normal" },
            if self.is_opaque() { "opaque" } else { "translucent" },
        )?;
        if self.has_plane_alpha() {
            f.write_str(" plane-alpha")?;
        }
        if self.has_color_matrix() {
            f.write_str(" color-matrix")?;
        }
        if self.has_deform() {
            f.write_str(" deform")?;
        }
        if self.has_dispersion() {
            f.write_str(" dispersion")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;
    use crate::description::Texture;
    use crate::gpu::TextureId;

    fn textured(target: TextureTarget) -> CompositionDescription {
        let mut description = CompositionDescription::default();
        description.set_texture(Texture::new(target, TextureId(7)));
        description
    }

    #[test]
    fn values_do_not_reach_the_key() {
        let mut a = textured(TextureTarget::External);
        let mut b = a;
        a.set_plane_alpha(0.25);
        b.set_plane_alpha(0.75);
        a.set_color(1.0, 0.0, 0.0, 1.0);
        b.set_color(0.0, 0.5, 1.0, 0.2);
        a.set_color_matrix(Mat4::from_scale(glam::Vec3::splat(0.5)));
        b.set_color_matrix(Mat4::from_diagonal(glam::Vec4::new(0.2, 0.7, 0.1, 1.0)));
        assert_eq!(compute_key(&a), compute_key(&b));
    }

    #[test]
    fn feature_presence_changes_the_key() {
        let base = textured(TextureTarget::Texture2d);
        let mut alpha = base;
        alpha.set_plane_alpha(0.5);
        assert_ne!(compute_key(&base), compute_key(&alpha));
        assert!(compute_key(&alpha).has_plane_alpha());

        let mut deform = base;
        deform.set_deform(true);
        deform.set_dispersion(true);
        let key = compute_key(&deform);
        assert!(key.has_deform() && key.has_dispersion());
    }

    #[test]
    fn texture_field_follows_target() {
        assert_eq!(
            compute_key(&textured(TextureTarget::External)).texture_field(),
            StateKey::TEXTURE_EXT
        );
        assert_eq!(
            compute_key(&textured(TextureTarget::Texture2d)).texture_field(),
            StateKey::TEXTURE_2D
        );
        assert_eq!(
            compute_key(&textured(TextureTarget::None)).texture_field(),
            StateKey::TEXTURE_OFF
        );
        assert_eq!(
            compute_key(&CompositionDescription::default()).texture_field(),
            StateKey::TEXTURE_OFF
        );
    }

    #[test]
    fn set_only_touches_masked_bits() {
        let key = StateKey::from_bits(0xff).set(StateKey::TEXTURE_MASK, StateKey::TEXTURE_EXT);
        assert_eq!(key.bits(), (0xff & !StateKey::TEXTURE_MASK) | StateKey::TEXTURE_EXT);
        assert_eq!(
            StateKey::default().set(StateKey::OPACITY_MASK, 0xffff).bits(),
            StateKey::OPACITY_MASK
        );
    }

    #[test]
    fn primed_keys_skip_unused_texture_code() {
        let keys: Vec<_> = StateKey::primed().collect();
        assert_eq!(keys.len(), 24);
        assert!(keys.iter().all(|key| key.has_known_texture_field()));
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(keys.iter().all(|key| key.bits() & !StateKey::PRIMED_MASK == 0));
    }

    #[test]
    fn display_lists_features() {
        let key = StateKey::default()
            .set(StateKey::TEXTURE_MASK, StateKey::TEXTURE_2D)
            .set(StateKey::BLEND_MASK, StateKey::BLEND_PREMULT)
            .set(StateKey::PLANE_ALPHA_MASK, StateKey::PLANE_ALPHA_LT_ONE);
        assert_eq!(
            key.to_string(),
            "0x15 texture=2d blend=premult translucent plane-alpha"
        );
    }
}
