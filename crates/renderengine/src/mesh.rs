use crate::gpu::Primitive;

/// Client-side geometry for an ordinary layer draw.
///
/// Positions and texture coordinates live in separate tightly packed arrays.
/// A mesh with `tex_coord_size == 0` carries no texture coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    primitive: Primitive,
    vertex_count: usize,
    vertex_size: usize,
    tex_coord_size: usize,
    positions: Vec<f32>,
    tex_coords: Vec<f32>,
}

impl Mesh {
    /// Zero-filled mesh. `vertex_size` and `tex_coord_size` are components per
    /// vertex.
    pub fn new(
        primitive: Primitive,
        vertex_count: usize,
        vertex_size: usize,
        tex_coord_size: usize,
    ) -> Self {
        Self {
            primitive,
            vertex_count,
            vertex_size,
            tex_coord_size,
            positions: vec![0.0; vertex_count * vertex_size],
            tex_coords: vec![0.0; vertex_count * tex_coord_size],
        }
    }

    /// Fan covering `(0,0)..(width,height)` with texture coordinates `(0,0)..(1,1)`.
    pub fn quad(width: f32, height: f32) -> Self {
        let mut mesh = Self::new(Primitive::TriangleFan, 4, 2, 2);
        mesh.positions = vec![0.0, 0.0, width, 0.0, width, height, 0.0, height];
        mesh.tex_coords = vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        mesh
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn vertex_size(&self) -> usize {
        self.vertex_size
    }

    pub fn tex_coord_size(&self) -> usize {
        self.tex_coord_size
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub fn tex_coords(&self) -> &[f32] {
        &self.tex_coords
    }

    /// Components of vertex `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= vertex_count()`.
    pub fn position_mut(&mut self, index: usize) -> &mut [f32] {
        let size = self.vertex_size;
        &mut self.positions[index * size..(index + 1) * size]
    }

    /// Texture coordinate of vertex `index`; empty when the mesh has none.
    ///
    /// # Panics
    ///
    /// Panics if `index >= vertex_count()`.
    pub fn tex_coord_mut(&mut self, index: usize) -> &mut [f32] {
        let size = self.tex_coord_size;
        &mut self.tex_coords[index * size..(index + 1) * size]
    }
}
