//! # Terrain Vertex
//!
//! GPU-ready vertex layout for tile meshes. Upload with
//! `bytemuck::cast_slice`.

use bytemuck::{Pod, Zeroable};

/// One mesh vertex.
///
/// Positions are page-local meters with Y up; `uv` spans `[0, 1]` over the
/// page so one material covers the page.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    /// Page-local position `(x, height, z)` in meters.
    pub position: [f32; 3],
    /// Unit surface normal.
    pub normal: [f32; 3],
    /// Page texture coordinate.
    pub uv: [f32; 2],
}

impl TerrainVertex {
    /// Size in bytes of one vertex.
    pub const STRIDE: usize = std::mem::size_of::<Self>();

    /// Raw bytes of a vertex slice.
    #[must_use]
    pub fn as_bytes(vertices: &[Self]) -> &[u8] {
        bytemuck::cast_slice(vertices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(TerrainVertex::STRIDE, 32);
        let v = [TerrainVertex::default(); 3];
        assert_eq!(TerrainVertex::as_bytes(&v).len(), 96);
    }
}
