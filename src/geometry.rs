use crate::error::{RenderError, RenderResult};

/// Triangle mesh as handed to the GPU: tightly packed `vec3<f32>` positions
/// and `u32` triangle-list indices.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    positions: Vec<[f32; 3]>,
    indices: Vec<u32>,
}

impl Mesh {
    /// Validates and wraps loader output. The mesh is immutable afterwards.
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> RenderResult<Self> {
        if positions.is_empty() {
            return Err(RenderError::scene("mesh has no vertices"));
        }
        if indices.is_empty() {
            return Err(RenderError::scene("mesh has no triangles"));
        }
        if indices.len() % 3 != 0 {
            return Err(RenderError::scene(format!(
                "index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        let vertex_count = positions.len();
        if let Some((i, &bad)) = indices
            .iter()
            .enumerate()
            .find(|&(_, &idx)| idx as usize >= vertex_count)
        {
            return Err(RenderError::scene(format!(
                "index {i} refers to vertex {bad}, but the mesh has {vertex_count} vertices"
            )));
        }
        Ok(Self { positions, indices })
    }

    /// Same as [`Mesh::new`] for a flat `x, y, z, x, y, z, ...` position array.
    pub fn from_flat(positions: &[f32], indices: Vec<u32>) -> RenderResult<Self> {
        if positions.len() % 3 != 0 {
            return Err(RenderError::scene(format!(
                "position array length {} is not a multiple of 3",
                positions.len()
            )));
        }
        let positions = positions
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]])
            .collect();
        Self::new(positions, indices)
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count() / 3
    }

    /// A single triangle facing +Z.
    pub fn triangle() -> Self {
        Self {
            positions: vec![[0.0, 0.5, 0.0], [-0.5, -0.5, 0.0], [0.5, -0.5, 0.0]],
            indices: vec![0, 1, 2],
        }
    }

    /// Unit cube centred at the origin, four vertices per face.
    pub fn cube() -> Self {
        let sides = [
            // Front
            [[-0.5, -0.5, 0.5], [0.5, -0.5, 0.5], [0.5, 0.5, 0.5], [-0.5, 0.5, 0.5]],
            // Back
            [[0.5, -0.5, -0.5], [-0.5, -0.5, -0.5], [-0.5, 0.5, -0.5], [0.5, 0.5, -0.5]],
            // Top
            [[-0.5, 0.5, 0.5], [0.5, 0.5, 0.5], [0.5, 0.5, -0.5], [-0.5, 0.5, -0.5]],
            // Bottom
            [[-0.5, -0.5, -0.5], [0.5, -0.5, -0.5], [0.5, -0.5, 0.5], [-0.5, -0.5, 0.5]],
            // Right
            [[0.5, -0.5, 0.5], [0.5, -0.5, -0.5], [0.5, 0.5, -0.5], [0.5, 0.5, 0.5]],
            // Left
            [[-0.5, -0.5, -0.5], [-0.5, -0.5, 0.5], [-0.5, 0.5, 0.5], [-0.5, 0.5, -0.5]],
        ];

        let mut positions = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for quad in sides {
            let v_idx = positions.len() as u32;
            positions.extend_from_slice(&quad);
            indices.extend_from_slice(&[v_idx, v_idx + 1, v_idx + 2, v_idx, v_idx + 2, v_idx + 3]);
        }

        Self { positions, indices }
    }
}
