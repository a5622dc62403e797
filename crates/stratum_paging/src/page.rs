//! # Pages and LOD Tiles
//!
//! The world around the camera is a square window of pages. Each page is cut
//! into `tiles_per_page x tiles_per_page` tiles, with the count chosen from
//! the page's ring around the camera.
//!
//! ## Two-Phase Linkage
//!
//! ```text
//! PageGrid::allocate   pages exist, no links
//!        │
//! attach_neighbors     page ─N/S/E/W─> page (None at the window edge)
//!        │
//! attach_tiles         tile ─N/S/E/W─> Equal | Coarser | Finer(a, b) | None
//! ```
//!
//! Tiles can only link once every page knows its neighbors, because a tile
//! on a page edge needs the adjacent page's tile count. Pages and tiles live
//! in arenas and refer to each other by index.

use std::collections::HashMap;

use tracing::debug;

use crate::coord::{Direction, PageCoord};
use crate::error::{ensure_power_of_two, PagingError, PagingResult};
use crate::lod::LodSpec;

/// A tile addressed through its page's arena slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileRef {
    /// Page slot in the grid.
    pub page: usize,
    /// Tile column in the page.
    pub x: u32,
    /// Tile row in the page.
    pub z: u32,
}

/// What lies across one tile edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TileNeighbor {
    /// Window edge.
    #[default]
    None,
    /// One tile of the same size.
    Equal(TileRef),
    /// One tile twice as large.
    Coarser(TileRef),
    /// Two tiles half as large, in increasing X (or Z) order.
    Finer(TileRef, TileRef),
}

impl TileNeighbor {
    /// Neighbor samples along the shared edge for a tile with `samples` per edge.
    #[inline]
    #[must_use]
    pub const fn edge_samples(self, samples: u32) -> u32 {
        match self {
            Self::None => 0,
            Self::Equal(_) => samples,
            Self::Coarser(_) => samples / 2,
            Self::Finer(..) => samples * 2,
        }
    }
}

/// The smallest unit of mesh LOD.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    x: u32,
    z: u32,
    neighbors: [TileNeighbor; 4],
}

impl Tile {
    /// Column in the page.
    #[must_use]
    pub const fn x(&self) -> u32 {
        self.x
    }

    /// Row in the page.
    #[must_use]
    pub const fn z(&self) -> u32 {
        self.z
    }

    /// Neighbor across the `direction` edge.
    #[must_use]
    pub const fn neighbor(&self, direction: Direction) -> TileNeighbor {
        self.neighbors[direction.index()]
    }
}

/// A square region of terrain with one tile resolution.
#[derive(Clone, Debug)]
pub struct Page {
    coord: PageCoord,
    origin_m: (f64, f64),
    size_m: f64,
    pages_from_camera: u32,
    tiles_per_page: u32,
    neighbors: Option<[Option<usize>; 4]>,
    tiles: Vec<Tile>,
}

impl Page {
    fn new(coord: PageCoord, size_m: f64, pages_from_camera: u32, tiles_per_page: u32) -> Self {
        let mut tiles = Vec::with_capacity((tiles_per_page * tiles_per_page) as usize);
        for z in 0..tiles_per_page {
            for x in 0..tiles_per_page {
                tiles.push(Tile {
                    x,
                    z,
                    neighbors: [TileNeighbor::None; 4],
                });
            }
        }
        Self {
            coord,
            origin_m: coord.origin_m(size_m),
            size_m,
            pages_from_camera,
            tiles_per_page,
            neighbors: None,
            tiles,
        }
    }

    /// Grid coordinate.
    #[must_use]
    pub const fn coord(&self) -> PageCoord {
        self.coord
    }

    /// World position of the south-west corner.
    #[must_use]
    pub const fn origin_m(&self) -> (f64, f64) {
        self.origin_m
    }

    /// Edge length in meters.
    #[must_use]
    pub const fn size_m(&self) -> f64 {
        self.size_m
    }

    /// Chebyshev distance from the camera page.
    #[must_use]
    pub const fn pages_from_camera(&self) -> u32 {
        self.pages_from_camera
    }

    /// Tiles per side.
    #[must_use]
    pub const fn tiles_per_page(&self) -> u32 {
        self.tiles_per_page
    }

    /// Edge length of one tile in meters.
    #[must_use]
    pub fn tile_size_m(&self) -> f64 {
        self.size_m / f64::from(self.tiles_per_page)
    }

    /// Neighbor page slot, once attached.
    #[must_use]
    pub fn neighbor(&self, direction: Direction) -> Option<usize> {
        self.neighbors.and_then(|n| n[direction.index()])
    }

    /// True once [`PageGrid::attach_neighbors`] has run.
    #[must_use]
    pub const fn neighbors_attached(&self) -> bool {
        self.neighbors.is_some()
    }

    /// Tile at `(x, z)`.
    #[must_use]
    pub fn tile(&self, x: u32, z: u32) -> Option<&Tile> {
        (x < self.tiles_per_page && z < self.tiles_per_page)
            .then(|| &self.tiles[(z * self.tiles_per_page + x) as usize])
    }

    /// All tiles, row by row from the south.
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }
}

/// Arena of pages in a square window around the camera page.
#[derive(Clone, Debug)]
pub struct PageGrid {
    camera: PageCoord,
    radius: u32,
    page_size_m: f64,
    pages: Vec<Page>,
    slots: HashMap<PageCoord, usize>,
    tiles_attached: bool,
}

impl PageGrid {
    /// Allocates every page within `radius` rings of `camera`. No links yet.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NotPowerOfTwo`] if the LOD table yields a bad
    /// tile count.
    pub fn allocate(camera: PageCoord, radius: u32, page_size_m: f64, lod: &dyn LodSpec) -> PagingResult<Self> {
        let r = radius as i32;
        let side = (2 * radius + 1) as usize;
        let mut pages = Vec::with_capacity(side * side);
        let mut slots = HashMap::with_capacity(side * side);
        for dz in -r..=r {
            for dx in -r..=r {
                let coord = camera + PageCoord::new(dx, dz);
                let distance = coord.chebyshev_distance(camera);
                let tiles = lod.tiles_per_page(distance);
                ensure_power_of_two("tiles_per_page", tiles)?;
                slots.insert(coord, pages.len());
                pages.push(Page::new(coord, page_size_m, distance, tiles));
            }
        }
        Ok(Self {
            camera,
            radius,
            page_size_m,
            pages,
            slots,
            tiles_attached: false,
        })
    }

    /// Allocates and links a window in one go.
    ///
    /// # Errors
    ///
    /// Returns allocation or linkage errors.
    pub fn build(camera: PageCoord, radius: u32, page_size_m: f64, lod: &dyn LodSpec) -> PagingResult<Self> {
        let mut grid = Self::allocate(camera, radius, page_size_m, lod)?;
        grid.attach_neighbors();
        grid.attach_tiles()?;
        debug!(
            "built page window around ({}, {}): {} pages, {} tiles",
            camera.x,
            camera.z,
            grid.pages.len(),
            grid.tile_count()
        );
        Ok(grid)
    }

    /// Phase one: links every page to its four neighbors.
    pub fn attach_neighbors(&mut self) {
        for page in &mut self.pages {
            let mut links = [None; 4];
            for direction in Direction::ALL {
                links[direction.index()] = self.slots.get(&page.coord.neighbor(direction)).copied();
            }
            page.neighbors = Some(links);
        }
    }

    /// Phase two: resolves every tile's neighbors.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NeighborsNotAttached`] before phase one, and
    /// [`PagingError::UnsupportedLodRatio`] if adjacent pages differ by more
    /// than a factor of two.
    pub fn attach_tiles(&mut self) -> PagingResult<()> {
        if self.pages.iter().any(|p| !p.neighbors_attached()) {
            return Err(PagingError::NeighborsNotAttached);
        }
        for slot in 0..self.pages.len() {
            let count = self.pages[slot].tiles_per_page;
            let mut resolved = Vec::with_capacity(self.pages[slot].tiles.len());
            for tile in &self.pages[slot].tiles {
                let mut neighbors = [TileNeighbor::None; 4];
                for direction in Direction::ALL {
                    neighbors[direction.index()] =
                        self.resolve_neighbor(slot, count, tile.x, tile.z, direction)?;
                }
                resolved.push(neighbors);
            }
            for (tile, neighbors) in self.pages[slot].tiles.iter_mut().zip(resolved) {
                tile.neighbors = neighbors;
            }
        }
        self.tiles_attached = true;
        Ok(())
    }

    fn resolve_neighbor(
        &self,
        slot: usize,
        count: u32,
        x: u32,
        z: u32,
        direction: Direction,
    ) -> PagingResult<TileNeighbor> {
        let here = |x, z| TileRef { page: slot, x, z };
        // Inside the page.
        match direction {
            Direction::North if z + 1 < count => return Ok(TileNeighbor::Equal(here(x, z + 1))),
            Direction::South if z > 0 => return Ok(TileNeighbor::Equal(here(x, z - 1))),
            Direction::East if x + 1 < count => return Ok(TileNeighbor::Equal(here(x + 1, z))),
            Direction::West if x > 0 => return Ok(TileNeighbor::Equal(here(x - 1, z))),
            _ => {}
        }

        // Across the page edge.
        let Some(other) = self.pages[slot].neighbor(direction) else {
            return Ok(TileNeighbor::None);
        };
        let far = self.pages[other].tiles_per_page;
        // Index along the shared edge, and the row/column just across it.
        let along = match direction {
            Direction::North | Direction::South => x,
            Direction::East | Direction::West => z,
        };
        let across = |far_count: u32| match direction {
            Direction::North | Direction::East => 0,
            Direction::South | Direction::West => far_count - 1,
        };
        let make = |along: u32| {
            let a = across(far);
            match direction {
                Direction::North | Direction::South => TileRef { page: other, x: along, z: a },
                Direction::East | Direction::West => TileRef { page: other, x: a, z: along },
            }
        };

        if far == count {
            Ok(TileNeighbor::Equal(make(along)))
        } else if far * 2 == count {
            Ok(TileNeighbor::Coarser(make(along / 2)))
        } else if far == count * 2 {
            Ok(TileNeighbor::Finer(make(2 * along), make(2 * along + 1)))
        } else {
            Err(PagingError::UnsupportedLodRatio { near: count, far })
        }
    }

    /// Camera page the window is centered on.
    #[must_use]
    pub const fn camera(&self) -> PageCoord {
        self.camera
    }

    /// Rings around the camera page.
    #[must_use]
    pub const fn radius(&self) -> u32 {
        self.radius
    }

    /// Page edge in meters.
    #[must_use]
    pub const fn page_size_m(&self) -> f64 {
        self.page_size_m
    }

    /// True once [`PageGrid::attach_tiles`] has succeeded.
    #[must_use]
    pub const fn tiles_attached(&self) -> bool {
        self.tiles_attached
    }

    /// Page slot of a coordinate.
    #[must_use]
    pub fn slot(&self, coord: PageCoord) -> Option<usize> {
        self.slots.get(&coord).copied()
    }

    /// Page in a slot.
    #[must_use]
    pub fn page(&self, slot: usize) -> Option<&Page> {
        self.pages.get(slot)
    }

    /// Page at a coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::UnknownPage`] outside the window.
    pub fn page_at(&self, coord: PageCoord) -> PagingResult<&Page> {
        self.slot(coord)
            .and_then(|s| self.pages.get(s))
            .ok_or(PagingError::UnknownPage {
                x: coord.x,
                z: coord.z,
            })
    }

    /// All pages.
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter()
    }

    /// Number of pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of tiles over all pages.
    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.pages.iter().map(|p| p.tiles.len()).sum()
    }

    /// Resolves a tile reference.
    #[must_use]
    pub fn tile(&self, r: TileRef) -> Option<&Tile> {
        self.pages.get(r.page).and_then(|p| p.tile(r.x, r.z))
    }

    /// North and east neighbor sample counts of a tile with `samples` per edge.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NeighborsNotAttached`] before linkage, or
    /// [`PagingError::UnknownTile`] for a bad reference.
    pub fn stitch_edges(&self, r: TileRef, samples: u32) -> PagingResult<(u32, u32)> {
        if !self.tiles_attached {
            return Err(PagingError::NeighborsNotAttached);
        }
        let tiles_per_page = self.pages.get(r.page).map_or(0, Page::tiles_per_page);
        let tile = self.tile(r).ok_or(PagingError::UnknownTile {
            x: r.x,
            z: r.z,
            tiles_per_page,
        })?;
        Ok((
            tile.neighbor(Direction::North).edge_samples(samples),
            tile.neighbor(Direction::East).edge_samples(samples),
        ))
    }
}
