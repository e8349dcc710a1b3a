//! Lens-warp mesh generation.
//!
//! The mesh is a `columns × rows` grid over the unit square. Each vertex
//! carries a screen position for both eyes and one pre-distorted texture
//! coordinate per color channel, so chromatic aberration is corrected by
//! sampling each channel at its own UV.

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use propstore::PropertyStore;

use super::{keys, StereoOptions};

/// How the panel is split between the eyes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Orientation {
    /// Eyes side by side along X (`1`).
    SplitX,
    /// Eyes stacked along Y (`2`).
    #[default]
    SplitY,
}

impl Orientation {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Orientation::SplitX),
            2 => Some(Orientation::SplitY),
            _ => None,
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Orientation::SplitX => 1,
            Orientation::SplitY => 2,
        }
    }
}

/// Radial distortion coefficients for one color channel:
/// `uv' = uv · (1 + k1·r² + k2·r⁴)` around the lens center.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChannelDistortion {
    pub k1: f32,
    pub k2: f32,
}

/// Parameters the warp mesh is generated from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WarpParams {
    pub orientation: Orientation,
    pub red: ChannelDistortion,
    pub green: ChannelDistortion,
    pub blue: ChannelDistortion,
    /// Fraction of the panel's cross axis each eye image covers.
    pub height_scale: f32,
    /// Shift of each eye toward the midline, in tenths of half the split axis.
    pub ipd_offset: f32,
    /// Signed shrink of both eye images; ignored while `ipd_offset` is nonzero.
    pub ipd_scale: f32,
}

impl Default for WarpParams {
    fn default() -> Self {
        Self {
            orientation: Orientation::default(),
            red: ChannelDistortion::default(),
            green: ChannelDistortion::default(),
            blue: ChannelDistortion::default(),
            height_scale: 0.5,
            ipd_offset: 0.0,
            ipd_scale: 0.0,
        }
    }
}

impl WarpParams {
    pub fn from_properties(properties: &dyn PropertyStore) -> Self {
        let raw_orientation = properties.get_i32(keys::ORIENTATION, Orientation::default().raw());
        let orientation = Orientation::from_raw(raw_orientation).unwrap_or_else(|| {
            tracing::warn!(
                key = keys::ORIENTATION,
                value = raw_orientation,
                "unknown stereo orientation; using default"
            );
            Orientation::default()
        });
        let channel = |k1: &str, k2: &str| ChannelDistortion {
            k1: properties.get_f32(k1, 0.0),
            k2: properties.get_f32(k2, 0.0),
        };
        Self {
            orientation,
            red: channel(keys::DEFORM_RED1, keys::DEFORM_RED2),
            green: channel(keys::DEFORM_GREEN1, keys::DEFORM_GREEN2),
            blue: channel(keys::DEFORM_BLUE1, keys::DEFORM_BLUE2),
            height_scale: properties.get_f32(keys::HEIGHT, 0.5),
            ipd_offset: properties.get_f32(keys::IPD_OFFSET, 0.0),
            ipd_scale: properties.get_f32(keys::IPD_SCALE, 0.0),
        }
    }

    /// IPD scale actually applied: a nonzero offset takes priority and forces
    /// the scale to zero.
    pub fn effective_ipd_scale(&self) -> f32 {
        if self.ipd_offset != 0.0 && self.ipd_scale != 0.0 {
            0.0
        } else {
            self.ipd_scale
        }
    }

    /// Size of each eye target, with a one pixel border on every side.
    pub fn target_size(&self, options: &StereoOptions) -> (u32, u32) {
        let hs = self.height_scale;
        let (width, height) = match self.orientation {
            Orientation::SplitY => (options.panel_width * hs, options.panel_height * 0.5),
            Orientation::SplitX => (options.panel_width * 0.5, options.panel_height * hs),
        };
        (to_pixels(width + 2.0), to_pixels(height + 2.0))
    }

    /// Panel width over eye height, used to make the distortion radial in
    /// screen space rather than in UV space.
    ///
    /// Shrinks by the effective IPD scale, which is zero whenever an IPD
    /// offset is set, so the distortion matches the eye positions.
    fn aspect_ratio(&self, options: &StereoOptions) -> f32 {
        let shrink = 1.0 - 0.5 * self.effective_ipd_scale().abs();
        (options.panel_width * self.height_scale) / ((options.panel_height / 2.0) * shrink)
    }
}

fn to_pixels(value: f32) -> u32 {
    if value.is_finite() && value > 0.0 {
        value as u32
    } else {
        0
    }
}

/// Applies the radial distortion polynomial around the UV center.
pub fn deform_uv(uv: Vec2, distortion: ChannelDistortion, aspect_ratio: f32) -> Vec2 {
    let mut centered = uv - Vec2::splat(0.5);
    centered.x *= aspect_ratio;
    let r2 = centered.length_squared();
    let r4 = r2 * r2;
    centered *= 1.0 + distortion.k1 * r2 + distortion.k2 * r4;
    centered.x /= aspect_ratio;
    centered + Vec2::splat(0.5)
}

/// Interleaved vertex layout of the warp buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct WarpVertex {
    pub left: [f32; 2],
    pub right: [f32; 2],
    pub uv_red: [f32; 2],
    pub uv_green: [f32; 2],
    pub uv_blue: [f32; 2],
}

impl WarpVertex {
    pub const STRIDE: u32 = size_of::<WarpVertex>() as u32;
    pub const LEFT_OFFSET: u32 = offset_of!(WarpVertex, left) as u32;
    pub const RIGHT_OFFSET: u32 = offset_of!(WarpVertex, right) as u32;
    pub const UV_RED_OFFSET: u32 = offset_of!(WarpVertex, uv_red) as u32;
    pub const UV_GREEN_OFFSET: u32 = offset_of!(WarpVertex, uv_green) as u32;
    pub const UV_BLUE_OFFSET: u32 = offset_of!(WarpVertex, uv_blue) as u32;
}

/// Triangle list of warped grid cells, six vertices per cell.
#[derive(Clone, Debug, PartialEq)]
pub struct WarpMesh {
    vertices: Vec<WarpVertex>,
    columns: u32,
    rows: u32,
}

impl WarpMesh {
    pub fn vertices(&self) -> &[WarpVertex] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn grid(&self) -> (u32, u32) {
        (self.columns, self.rows)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Min and max corner of the left eye positions.
    pub fn left_bounds(&self) -> ([f32; 2], [f32; 2]) {
        bounds(self.vertices.iter().map(|v| v.left))
    }

    pub fn right_bounds(&self) -> ([f32; 2], [f32; 2]) {
        bounds(self.vertices.iter().map(|v| v.right))
    }

    /// Min and max corner over all three channels' texture coordinates.
    pub fn uv_bounds(&self) -> ([f32; 2], [f32; 2]) {
        bounds(
            self.vertices
                .iter()
                .flat_map(|v| [v.uv_red, v.uv_green, v.uv_blue]),
        )
    }
}

fn bounds(points: impl Iterator<Item = [f32; 2]>) -> ([f32; 2], [f32; 2]) {
    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    let mut any = false;
    for point in points {
        let point = Vec2::from(point);
        min = min.min(point);
        max = max.max(point);
        any = true;
    }
    if any {
        (min.to_array(), max.to_array())
    } else {
        ([0.0; 2], [0.0; 2])
    }
}

/// Screen positions of one grid point for both eyes.
///
/// `x`/`y` are the normalized grid coordinates and `viewport` the size the
/// group was begun with.
pub fn eye_positions(
    params: &WarpParams,
    options: &StereoOptions,
    viewport: (f32, f32),
    x: f32,
    y: f32,
) -> (Vec2, Vec2) {
    let hs = params.height_scale;
    let offset = params.ipd_offset;
    let scale = params.effective_ipd_scale();
    let (panel_w, panel_h) = (options.panel_width, options.panel_height);
    let (width, height) = viewport;

    match params.orientation {
        Orientation::SplitY => {
            let ipd_max = (panel_h / 2.0) / 10.0;
            let final_w = width * hs;
            let final_h = height * 0.5;
            let base_x = final_w * x + panel_w * ((1.0 - hs) * 0.5);
            let mut left = Vec2::new(base_x, final_h * y);
            let mut right = Vec2::new(base_x, final_h * y + final_h);

            left.y = (left.y + ipd_max * offset).min(final_h);
            right.y = (right.y - ipd_max * offset).max(final_h);
            (left.y, right.y) = apply_ipd_scale(left.y, right.y, scale, panel_h);
            (left, right)
        }
        Orientation::SplitX => {
            let ipd_max = (panel_w / 2.0) / 10.0;
            let final_w = width * 0.5;
            let final_h = height * hs;
            let base_y = final_h * y + panel_h * ((1.0 - hs) * 0.5);
            let mut left = Vec2::new(final_w * x, base_y);
            let mut right = Vec2::new(final_w * x + final_w, base_y);

            left.x = (left.x + ipd_max * offset).min(final_w);
            right.x = (right.x - ipd_max * offset).max(final_w);
            (left.x, right.x) = apply_ipd_scale(left.x, right.x, scale, panel_w);
            (left, right)
        }
    }
}

/// Shrinks both eyes along the split axis of length `axis`. A positive scale
/// pulls the images apart, a negative one pulls them toward the center.
fn apply_ipd_scale(left: f32, right: f32, scale: f32, axis: f32) -> (f32, f32) {
    let quarter = axis / 4.0;
    if scale > 0.0 {
        let shrink = 1.0 - 0.5 * scale;
        (left * shrink, right * shrink + quarter * scale * 2.0)
    } else if scale < 0.0 {
        let amount = -scale;
        let shrink = 1.0 - 0.5 * amount;
        (left * shrink + quarter * amount, right * shrink + quarter * amount)
    } else {
        (left, right)
    }
}

pub fn build_warp_mesh(
    params: &WarpParams,
    viewport: (f32, f32),
    options: &StereoOptions,
) -> WarpMesh {
    let columns = options.grid_columns.max(1);
    let rows = options.grid_rows.max(1);
    let aspect = params.aspect_ratio(options);

    let stride = (columns + 1) as usize;
    let mut grid = Vec::with_capacity(stride * (rows + 1) as usize);
    for yi in 0..=rows {
        for xi in 0..=columns {
            let x = xi as f32 / columns as f32;
            let y = yi as f32 / rows as f32;
            let uv = Vec2::new(x, y);
            let (left, right) = eye_positions(params, options, viewport, x, y);
            grid.push(WarpVertex {
                left: left.to_array(),
                right: right.to_array(),
                uv_red: deform_uv(uv, params.red, aspect).to_array(),
                uv_green: deform_uv(uv, params.green, aspect).to_array(),
                uv_blue: deform_uv(uv, params.blue, aspect).to_array(),
            });
        }
    }

    let mut vertices = Vec::with_capacity(columns as usize * rows as usize * 6);
    for yi in 0..rows as usize {
        for xi in 0..columns as usize {
            let v0 = grid[yi * stride + xi];
            let v1 = grid[yi * stride + xi + 1];
            let v2 = grid[(yi + 1) * stride + xi + 1];
            let v3 = grid[(yi + 1) * stride + xi];
            vertices.extend_from_slice(&[v0, v1, v2, v2, v3, v0]);
        }
    }

    WarpMesh {
        vertices,
        columns,
        rows,
    }
}
