//! # Stratum Paging
//!
//! Turns a heightfield into camera-centered, level-of-detail terrain meshes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Terrain                               │
//! ├──────────────────────────────────────────────────────────────┤
//! │  PageGrid            pages around the camera, LOD per ring    │
//! │    └─ Tile           neighbors: Equal | Coarser | Finer       │
//! │  PageHeightMap       cached heights per page and sub-page     │
//! │  IndexBufferManager  shared interior and stitch buffers       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  stratum_mosaic::HeightfieldMosaic                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratum_paging::{IndexBufferManager, PageCoord, Terrain, TerrainConfig};
//!
//! let config = TerrainConfig::load("terrain.toml")?;
//! let mut terrain = Terrain::new(config, heights, Arc::new(IndexBufferManager::new()))?;
//!
//! terrain.set_camera(10.0, 20.0)?;
//! for mesh in terrain.page_meshes(PageCoord::ORIGIN)? {
//!     upload(&mesh.vertices, &mesh.indices);
//!     upload(&mesh.stitch_vertices, &mesh.stitch_indices);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod coord;
pub mod error;
pub mod height_map;
pub mod index_buffer;
pub mod lod;
pub mod page;
pub mod terrain;
pub mod vertex;

pub use config::{LodLevel, TerrainConfig};
pub use coord::{Direction, PageCoord};
pub use error::{PagingError, PagingResult};
pub use height_map::{FlatHeightSource, HeightFn, HeightSource, PageHeightMap, SubPageHeightMap};
pub use index_buffer::{predicted_stitch_triangles, stitch_vertex_positions, IndexBufferManager};
pub use lod::{LodSpec, TableLodSpec};
pub use page::{Page, PageGrid, Tile, TileNeighbor, TileRef};
pub use terrain::{Terrain, TileMesh};
pub use vertex::TerrainVertex;
