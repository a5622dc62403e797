//! # Terrain
//!
//! Ties the heightfield, the page window and the index buffers together.
//!
//! ## Frame Flow
//!
//! ```text
//! set_camera(x, z)
//!   ├─ heightfield preloads tiles around the camera
//!   ├─ camera crossed a page boundary? rebuild PageGrid, retune height maps
//!   └─ sync_edits: TileChanged events invalidate cached sub-pages, refresh
//!
//! tile_mesh(page, x, z)
//!   └─ interior + stitch vertices from the height map, shared index buffers
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use stratum_mosaic::{HeightfieldMosaic, MosaicEvent, MM_PER_M};
use tracing::{debug, info};

use crate::config::TerrainConfig;
use crate::coord::PageCoord;
use crate::error::{PagingError, PagingResult};
use crate::height_map::{HeightSource, PageHeightMap};
use crate::index_buffer::{stitch_vertex_positions, IndexBufferManager};
use crate::lod::TableLodSpec;
use crate::page::{PageGrid, TileRef};
use crate::vertex::TerrainVertex;

/// Render-ready data for one tile.
#[derive(Clone, Debug)]
pub struct TileMesh {
    /// Page the tile belongs to.
    pub page: PageCoord,
    /// Tile column in the page.
    pub tile_x: u32,
    /// Tile row in the page.
    pub tile_z: u32,
    /// `n x n` interior vertices, row by row from the south.
    pub vertices: Vec<TerrainVertex>,
    /// Shared interior index buffer.
    pub indices: Arc<[u32]>,
    /// Stitch vertices joining the tile to its north and east neighbors.
    pub stitch_vertices: Vec<TerrainVertex>,
    /// Shared stitch index buffer.
    pub stitch_indices: Arc<[u32]>,
}

impl TileMesh {
    /// Total triangles over the interior and stitch buffers.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        (self.indices.len() + self.stitch_indices.len()) / 3
    }
}

/// Camera-driven terrain over one heightfield.
pub struct Terrain {
    config: TerrainConfig,
    heights: HeightfieldMosaic,
    events: Receiver<MosaicEvent>,
    lod: TableLodSpec,
    index_buffers: Arc<IndexBufferManager>,
    grid: Option<PageGrid>,
    height_maps: HashMap<PageCoord, PageHeightMap>,
}

impl Terrain {
    /// Wraps a heightfield. No pages exist until the first
    /// [`Terrain::set_camera`].
    ///
    /// # Errors
    ///
    /// Returns any [`TerrainConfig::validate`] error.
    pub fn new(
        config: TerrainConfig,
        mut heights: HeightfieldMosaic,
        index_buffers: Arc<IndexBufferManager>,
    ) -> PagingResult<Self> {
        config.validate()?;
        let lod = TableLodSpec::new(config.lod.clone())?;
        let events = heights.subscribe();
        Ok(Self {
            config,
            heights,
            events,
            lod,
            index_buffers,
            grid: None,
            height_maps: HashMap::new(),
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// The heightfield.
    #[must_use]
    pub const fn heights(&self) -> &HeightfieldMosaic {
        &self.heights
    }

    /// The heightfield, for edits. Call [`Terrain::sync_edits`] afterwards.
    pub fn heights_mut(&mut self) -> &mut HeightfieldMosaic {
        &mut self.heights
    }

    /// The shared index-buffer service.
    #[must_use]
    pub fn index_buffers(&self) -> &Arc<IndexBufferManager> {
        &self.index_buffers
    }

    /// Current page window, once the camera has been placed.
    #[must_use]
    pub const fn page_grid(&self) -> Option<&PageGrid> {
        self.grid.as_ref()
    }

    /// Height cache of a page in the window.
    #[must_use]
    pub fn height_map(&self, coord: PageCoord) -> Option<&PageHeightMap> {
        self.height_maps.get(&coord)
    }

    /// Page under the camera.
    #[must_use]
    pub fn camera_page(&self) -> Option<PageCoord> {
        self.grid.as_ref().map(PageGrid::camera)
    }

    fn page_size_m(&self) -> f64 {
        f64::from(self.config.page_size_m)
    }

    /// Height-map resolution for a page split into `tiles_per_page` tiles.
    fn page_meters_per_sample(&self, tiles_per_page: u32) -> u32 {
        let samples = tiles_per_page * self.config.samples_per_tile;
        (self.config.page_size_m / samples).max(1)
    }

    /// Moves the camera. Returns true if the page window was rebuilt.
    ///
    /// # Errors
    ///
    /// Returns tile load, page linkage or height source errors.
    pub fn set_camera(&mut self, x_m: f64, z_m: f64) -> PagingResult<bool> {
        self.heights.camera_moved(x_m, z_m)?;
        let coord = PageCoord::from_world(x_m, z_m, self.page_size_m());
        if self.camera_page() == Some(coord) {
            self.sync_edits()?;
            return Ok(false);
        }

        let grid = PageGrid::build(
            coord,
            self.config.visible_radius_pages,
            self.page_size_m(),
            &self.lod,
        )?;
        self.height_maps.retain(|c, _| grid.slot(*c).is_some());
        // Edits made before the rebuild reach the surviving maps first.
        self.sync_edits()?;

        let mut created = 0;
        for page in grid.pages() {
            let mps = self.page_meters_per_sample(page.tiles_per_page());
            if let Some(map) = self.height_maps.get_mut(&page.coord()) {
                map.set_meters_per_sample(mps)?;
                map.refresh(&mut self.heights)?;
            } else {
                let map = PageHeightMap::new(
                    page.coord(),
                    self.config.page_size_m,
                    self.config.sub_pages_per_page,
                    mps,
                    &mut self.heights,
                )?;
                self.height_maps.insert(page.coord(), map);
                created += 1;
            }
        }
        info!(
            "terrain window moved to page ({}, {}): {} pages, {} new height maps",
            coord.x,
            coord.z,
            grid.page_count(),
            created
        );
        self.grid = Some(grid);
        Ok(true)
    }

    /// Applies pending heightfield changes to the page height maps. Returns
    /// the number of sub-pages refreshed.
    ///
    /// # Errors
    ///
    /// Returns height source errors.
    pub fn sync_edits(&mut self) -> PagingResult<usize> {
        let mut touched = 0;
        for event in self.events.try_iter() {
            if let MosaicEvent::TileChanged {
                world_x_m,
                world_z_m,
                size_x_m,
                size_z_m,
            } = event
            {
                for map in self.height_maps.values_mut() {
                    touched += map.invalidate_region(world_x_m, world_z_m, size_x_m, size_z_m);
                }
            }
        }
        if touched == 0 {
            return Ok(0);
        }
        let mut refreshed = 0;
        for map in self.height_maps.values_mut() {
            refreshed += map.refresh(&mut self.heights)?;
        }
        debug!("refreshed {} sub-pages after edits", refreshed);
        Ok(refreshed)
    }

    fn locate(&self, x_m: f64, z_m: f64) -> Option<(&PageHeightMap, f64, f64)> {
        let coord = PageCoord::from_world(x_m, z_m, self.page_size_m());
        self.height_maps.get(&coord).map(|map| {
            let (ox, oz) = map.origin_m();
            (map, x_m - ox, z_m - oz)
        })
    }

    /// Height in millimeters at a world position. Inside the window this is
    /// the cached height; elsewhere the heightfield answers.
    ///
    /// # Errors
    ///
    /// Returns heightfield errors.
    pub fn height_at(&mut self, x_m: f64, z_m: f64) -> PagingResult<f32> {
        match self.locate(x_m, z_m) {
            Some((map, lx, lz)) => map.height_at(lx, lz),
            None => Ok(self.heights.world_height_mm(x_m, z_m)?),
        }
    }

    /// Unit surface normal at a world position inside the window.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::UnknownPage`] outside the window.
    pub fn normal_at(&mut self, x_m: f64, z_m: f64) -> PagingResult<[f32; 3]> {
        let coord = PageCoord::from_world(x_m, z_m, self.page_size_m());
        let map = self.height_maps.get(&coord).ok_or(PagingError::UnknownPage {
            x: coord.x,
            z: coord.z,
        })?;
        let (ox, oz) = map.origin_m();
        map.normal_at(x_m - ox, z_m - oz, &mut self.heights)
    }

    /// Minimum and maximum cached height over a whole page, for culling.
    #[must_use]
    pub fn page_height_range(&self, coord: PageCoord) -> Option<(f32, f32)> {
        let size = self.page_size_m();
        self.height_maps
            .get(&coord)
            .and_then(|map| map.area_height_range(0.0, 0.0, size, size))
    }

    /// Builds the mesh of one tile.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::UnknownPage`] or [`PagingError::UnknownTile`]
    /// for tiles outside the window, and stitch or height source errors.
    pub fn tile_mesh(&mut self, coord: PageCoord, tile_x: u32, tile_z: u32) -> PagingResult<TileMesh> {
        let unknown_page = || PagingError::UnknownPage {
            x: coord.x,
            z: coord.z,
        };
        let grid = self.grid.as_ref().ok_or_else(unknown_page)?;
        let slot = grid.slot(coord).ok_or_else(unknown_page)?;
        let n = self.config.samples_per_tile;
        let (north, east) = grid.stitch_edges(
            TileRef {
                page: slot,
                x: tile_x,
                z: tile_z,
            },
            n,
        )?;
        let tile_size = grid.page(slot).map_or(0.0, |p| p.tile_size_m());
        let map = self.height_maps.get(&coord).ok_or_else(unknown_page)?;

        let origin = (f64::from(tile_x) * tile_size, f64::from(tile_z) * tile_size);
        let spacing = tile_size / f64::from(n);
        let page_size = f64::from(self.config.page_size_m);

        let mut vertices = Vec::with_capacity((n * n) as usize);
        for j in 0..n {
            for i in 0..n {
                let x = origin.0 + f64::from(i) * spacing;
                let z = origin.1 + f64::from(j) * spacing;
                vertices.push(mesh_vertex(map, &mut self.heights, x, z, page_size)?);
            }
        }

        let mut stitch_vertices = Vec::new();
        for [u, v] in stitch_vertex_positions(n, north, east) {
            let x = origin.0 + f64::from(u) * tile_size;
            let z = origin.1 + f64::from(v) * tile_size;
            stitch_vertices.push(mesh_vertex(map, &mut self.heights, x, z, page_size)?);
        }

        Ok(TileMesh {
            page: coord,
            tile_x,
            tile_z,
            vertices,
            indices: self.index_buffers.tile_indices(n),
            stitch_vertices,
            stitch_indices: self.index_buffers.stitch_indices(n, north, east)?,
        })
    }

    /// Meshes of every tile in a page.
    ///
    /// # Errors
    ///
    /// Returns the first [`Terrain::tile_mesh`] error.
    pub fn page_meshes(&mut self, coord: PageCoord) -> PagingResult<Vec<TileMesh>> {
        let tiles = self
            .grid
            .as_ref()
            .and_then(|g| g.page_at(coord).ok())
            .map(|p| p.tiles_per_page())
            .ok_or(PagingError::UnknownPage {
                x: coord.x,
                z: coord.z,
            })?;
        let mut meshes = Vec::with_capacity((tiles * tiles) as usize);
        for z in 0..tiles {
            for x in 0..tiles {
                meshes.push(self.tile_mesh(coord, x, z)?);
            }
        }
        Ok(meshes)
    }

    /// Saves the heightfield.
    ///
    /// # Errors
    ///
    /// Returns I/O or codec errors.
    pub fn save(&mut self, force: bool) -> PagingResult<()> {
        Ok(self.heights.save(force)?)
    }
}

impl std::fmt::Debug for Terrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terrain")
            .field("config", &self.config)
            .field("camera_page", &self.camera_page())
            .field("height_maps", &self.height_maps.len())
            .finish_non_exhaustive()
    }
}

fn mesh_vertex(
    map: &PageHeightMap,
    source: &mut dyn HeightSource,
    x: f64,
    z: f64,
    page_size: f64,
) -> PagingResult<TerrainVertex> {
    let height_m = f64::from(map.interpolated_height(x, z, source)?) / MM_PER_M;
    Ok(TerrainVertex {
        position: [x as f32, height_m as f32, z as f32],
        normal: map.normal_at(x, z, source)?,
        uv: [(x / page_size) as f32, (z / page_size) as f32],
    })
}
