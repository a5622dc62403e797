//! # Mosaic
//!
//! A sparse 2-D grid of lazily loaded, independently dirty-tracked tiles.
//!
//! ## Responsibilities
//!
//! - Owns exactly `size_x_tiles * size_z_tiles` tiles for its whole life
//! - Preloads tiles around the camera when it crosses a tile boundary
//! - Tracks the dirty-tile set behind the aggregate `is_modified` flag
//! - Republishes tile changes to subscribers in world meters
//!
//! ## Coordinates
//!
//! The dataset is centered on the world origin. Sample `(sx, sz)` sits at
//! `origin + s * meters_per_sample`. World-to-sample and sample-to-tile
//! conversions are shift/mask arithmetic on the power-of-two sizes.

use std::collections::BTreeSet;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, trace};

use crate::codec::{ImageCodec, MemoryCodec, PngCodec};
use crate::config::MosaicConfig;
use crate::description::MosaicDescription;
use crate::error::{MosaicError, MosaicResult};
use crate::locator::{DirectoryLocator, ResourceLocator};
use crate::tile::{MosaicTile, TileContext, TileCoord, TileFormat, TileNotice, TileSeed};

/// Notifications published to [`Mosaic::subscribe`] listeners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MosaicEvent {
    /// A rectangle of samples changed.
    TileChanged {
        /// West edge in world meters.
        world_x_m: f64,
        /// South edge in world meters.
        world_z_m: f64,
        /// Width in meters.
        size_x_m: f64,
        /// Depth in meters.
        size_z_m: f64,
    },
    /// The aggregate modified flag flipped.
    ModifiedChanged {
        /// New aggregate state.
        modified: bool,
    },
}

/// Where a mosaic's files live and how its images are coded.
#[derive(Clone)]
pub struct MosaicStorage {
    /// Path resolver.
    pub locator: Arc<dyn ResourceLocator>,
    /// Image codec.
    pub codec: Arc<dyn ImageCodec>,
}

impl MosaicStorage {
    /// PNG tiles and the master file in one directory.
    #[must_use]
    pub fn png_directory(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            locator: Arc::new(DirectoryLocator::new(root)),
            codec: Arc::new(PngCodec),
        }
    }

    /// Tiles held in memory; the master file still goes to `root`.
    #[must_use]
    pub fn in_memory(root: impl Into<std::path::PathBuf>, codec: Arc<MemoryCodec>) -> Self {
        Self {
            locator: Arc::new(DirectoryLocator::new(root)),
            codec,
        }
    }
}

impl std::fmt::Debug for MosaicStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MosaicStorage").finish_non_exhaustive()
    }
}

/// A world position resolved to the sample grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplePos {
    /// Sample column (floor).
    pub x: i64,
    /// Sample row (floor).
    pub z: i64,
    /// Fraction towards `x + 1`, in `[0, 1)`.
    pub fx: f64,
    /// Fraction towards `z + 1`, in `[0, 1)`.
    pub fz: f64,
}

impl SamplePos {
    /// True if the position lands exactly on a sample.
    #[inline]
    #[must_use]
    pub fn is_on_grid(&self) -> bool {
        self.fx == 0.0 && self.fz == 0.0
    }

    /// Bilinear weights of the `(x, z)`, `(x+1, z)`, `(x, z+1)`, `(x+1, z+1)` corners.
    #[inline]
    #[must_use]
    pub fn bilinear_weights(&self) -> [f64; 4] {
        let (fx, fz) = (self.fx, self.fz);
        [
            (1.0 - fx) * (1.0 - fz),
            fx * (1.0 - fz),
            (1.0 - fx) * fz,
            fx * fz,
        ]
    }

    /// Sample coordinates matching [`SamplePos::bilinear_weights`].
    #[inline]
    #[must_use]
    pub const fn corners(&self) -> [(i64, i64); 4] {
        [
            (self.x, self.z),
            (self.x + 1, self.z),
            (self.x, self.z + 1),
            (self.x + 1, self.z + 1),
        ]
    }
}

/// A sample resolved to its tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileSample {
    /// Owning tile.
    pub tile: TileCoord,
    /// Column inside the tile.
    pub x: u32,
    /// Row inside the tile.
    pub z: u32,
}

/// Generic tiled raster dataset.
pub struct Mosaic<T: MosaicTile> {
    desc: MosaicDescription,
    context: Arc<TileContext>,
    tiles: Vec<T>,
    notices: Receiver<TileNotice>,
    dirty: BTreeSet<TileCoord>,
    subscribers: Vec<Sender<MosaicEvent>>,
    camera_tile: Option<(i64, i64)>,
    preload_radius: u32,
    origin_x_m: f64,
    origin_z_m: f64,
    last_modified: bool,
}

impl<T: MosaicTile> Mosaic<T> {
    /// Builds a mosaic over an existing description, one tile per grid cell.
    #[must_use]
    pub fn new(
        desc: MosaicDescription,
        storage: MosaicStorage,
        format: TileFormat,
        config: &MosaicConfig,
    ) -> Self {
        let base_name = desc.name().to_owned();
        Self::build(base_name, desc, storage, format, config)
    }

    /// Locates and parses the master file for `base_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the master file is missing, malformed, or names a
    /// non-power-of-two geometry.
    pub fn open(
        base_name: &str,
        storage: MosaicStorage,
        format: TileFormat,
        config: &MosaicConfig,
    ) -> MosaicResult<Self> {
        let path = storage.locator.master_file_path(base_name);
        let desc = MosaicDescription::load(&path)?;
        Ok(Self::build(base_name.to_owned(), desc, storage, format, config))
    }

    fn build(
        base_name: String,
        desc: MosaicDescription,
        storage: MosaicStorage,
        format: TileFormat,
        config: &MosaicConfig,
    ) -> Self {
        let (sender, notices) = unbounded();
        let context = Arc::new(TileContext {
            base_name,
            file_ext: desc.file_ext().to_owned(),
            tile_size: desc.tile_size_samples(),
            size_z_tiles: desc.size_z_tiles(),
            format,
            locator: storage.locator,
            codec: storage.codec,
            notices: sender,
        });

        let mut tiles = Vec::with_capacity((desc.size_x_tiles() * desc.size_z_tiles()) as usize);
        for z in 0..desc.size_z_tiles() {
            for x in 0..desc.size_x_tiles() {
                tiles.push(T::from_seed(TileSeed {
                    coord: TileCoord::new(x, z),
                    available: desc.is_tile_available(x, z),
                    context: Arc::clone(&context),
                }));
            }
        }

        let mps = f64::from(desc.meters_per_sample());
        let origin_x_m = -(f64::from(desc.size_x_pixels()) * mps) / 2.0;
        let origin_z_m = -(f64::from(desc.size_z_pixels()) * mps) / 2.0;
        let last_modified = desc.is_modified();
        debug!(
            "mosaic {} ready: {} tiles, origin ({origin_x_m}, {origin_z_m})",
            context.base_name,
            tiles.len()
        );

        Self {
            desc,
            context,
            tiles,
            notices,
            dirty: BTreeSet::new(),
            subscribers: Vec::new(),
            camera_tile: None,
            preload_radius: config.preload_radius,
            origin_x_m,
            origin_z_m,
            last_modified,
        }
    }

    /// The dataset metadata.
    #[must_use]
    pub const fn description(&self) -> &MosaicDescription {
        &self.desc
    }

    /// Mutable metadata. Changes show up in [`Mosaic::is_modified`] at once;
    /// the `ModifiedChanged` event follows on the next mutating call.
    pub fn description_mut(&mut self) -> &mut MosaicDescription {
        &mut self.desc
    }

    /// Base name used for resource lookups.
    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.context.base_name
    }

    /// Shared tile context.
    #[must_use]
    pub fn context(&self) -> &Arc<TileContext> {
        &self.context
    }

    /// World position of sample `(0, 0)`.
    #[must_use]
    pub const fn origin_m(&self) -> (f64, f64) {
        (self.origin_x_m, self.origin_z_m)
    }

    /// World extent of the dataset in meters.
    #[must_use]
    pub fn extent_m(&self) -> (f64, f64) {
        let mps = f64::from(self.desc.meters_per_sample());
        (
            f64::from(self.desc.size_x_pixels()) * mps,
            f64::from(self.desc.size_z_pixels()) * mps,
        )
    }

    /// Resolves a world position to the sample grid.
    #[must_use]
    pub fn world_to_sample(&self, x_m: f64, z_m: f64) -> SamplePos {
        let shift = self.desc.meters_per_sample_shift();
        let mps = f64::from(self.desc.meters_per_sample());
        let (x, fx) = split_axis(x_m - self.origin_x_m, shift, mps);
        let (z, fz) = split_axis(z_m - self.origin_z_m, shift, mps);
        SamplePos { x, z, fx, fz }
    }

    /// World position of a sample.
    #[must_use]
    pub fn sample_to_world(&self, x: i64, z: i64) -> (f64, f64) {
        let mps = f64::from(self.desc.meters_per_sample());
        (
            self.origin_x_m + x as f64 * mps,
            self.origin_z_m + z as f64 * mps,
        )
    }

    /// Resolves a sample to its tile, or `None` outside a non-wrapping grid.
    #[must_use]
    pub fn sample_to_tile(&self, x: i64, z: i64) -> Option<TileSample> {
        let shift = self.desc.tile_shift();
        let width = i64::from(self.desc.size_x_tiles()) << shift;
        let depth = i64::from(self.desc.size_z_tiles()) << shift;
        let (x, z) = if self.desc.wrap() {
            (x.rem_euclid(width), z.rem_euclid(depth))
        } else if (0..width).contains(&x) && (0..depth).contains(&z) {
            (x, z)
        } else {
            return None;
        };
        let mask = i64::from(self.desc.tile_mask());
        Some(TileSample {
            tile: TileCoord::new((x >> shift) as u32, (z >> shift) as u32),
            x: (x & mask) as u32,
            z: (z & mask) as u32,
        })
    }

    /// Tile at `coord`, or `None` outside the grid.
    #[must_use]
    pub fn tile(&self, coord: TileCoord) -> Option<&T> {
        self.index_of(coord).and_then(|i| self.tiles.get(i))
    }

    /// Mutable tile at `coord`, or `None` outside the grid.
    pub fn tile_mut(&mut self, coord: TileCoord) -> Option<&mut T> {
        self.index_of(coord).and_then(move |i| self.tiles.get_mut(i))
    }

    /// Mutable tile for an in-grid coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::MissingTile`] if the grid has no tile object
    /// where one must exist.
    pub(crate) fn tile_in_grid_mut(&mut self, coord: TileCoord) -> MosaicResult<&mut T> {
        let index = self.index_of(coord);
        index
            .and_then(move |i| self.tiles.get_mut(i))
            .ok_or(MosaicError::MissingTile {
                x: coord.x,
                z: coord.z,
            })
    }

    /// All tiles, row by row from the south.
    pub fn tiles(&self) -> impl Iterator<Item = &T> {
        self.tiles.iter()
    }

    /// Number of tiles with resident samples.
    #[must_use]
    pub fn loaded_tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_loaded()).count()
    }

    /// Tiles currently dirty, in grid order.
    pub fn dirty_tiles(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.dirty.iter().copied()
    }

    /// `dirty tiles > 0 || description modified`.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        !self.dirty.is_empty() || self.desc.is_modified()
    }

    /// Current preload radius in tiles.
    #[must_use]
    pub const fn preload_radius(&self) -> u32 {
        self.preload_radius
    }

    /// Changes the preload radius used by later camera moves.
    pub fn set_preload_radius(&mut self, radius: u32) {
        self.preload_radius = radius;
    }

    /// Tile the camera was last seen in (may lie outside the grid).
    #[must_use]
    pub const fn camera_tile(&self) -> Option<(i64, i64)> {
        self.camera_tile
    }

    /// Registers a listener for tile and modified-state events.
    pub fn subscribe(&mut self) -> Receiver<MosaicEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Camera moved; preloads around it if it entered a new tile.
    ///
    /// Returns the number of tiles loaded by this call.
    ///
    /// # Errors
    ///
    /// Returns the first tile load error.
    pub fn camera_moved(&mut self, x_m: f64, z_m: f64) -> MosaicResult<usize> {
        let pos = self.world_to_sample(x_m, z_m);
        let shift = self.desc.tile_shift();
        let tile = (pos.x >> shift, pos.z >> shift);
        if self.camera_tile == Some(tile) {
            return Ok(0);
        }
        trace!("camera entered tile {:?} of mosaic {}", tile, self.base_name());
        self.camera_tile = Some(tile);
        self.preload(self.preload_radius)
    }

    /// Loads every tile within `radius` of the camera tile, clipped to the
    /// grid. Tiles outside the window are left alone; nothing is evicted.
    ///
    /// # Errors
    ///
    /// Returns the first tile load error.
    pub fn preload(&mut self, radius: u32) -> MosaicResult<usize> {
        let Some((cx, cz)) = self.camera_tile else {
            return Ok(0);
        };
        let r = i64::from(radius);
        let x0 = (cx - r).max(0);
        let z0 = (cz - r).max(0);
        let x1 = (cx + r).min(i64::from(self.desc.size_x_tiles()) - 1);
        let z1 = (cz + r).min(i64::from(self.desc.size_z_tiles()) - 1);

        let mut loaded = 0;
        let mut result = Ok(());
        'window: for z in z0..=z1 {
            for x in x0..=x1 {
                let coord = TileCoord::new(x as u32, z as u32);
                match self.tile_in_grid_mut(coord).and_then(MosaicTile::load) {
                    Ok(true) => loaded += 1,
                    Ok(false) => {}
                    Err(e) => {
                        result = Err(e);
                        break 'window;
                    }
                }
            }
        }
        self.pump_notices();
        if loaded > 0 {
            debug!(
                "preloaded {loaded} tiles of mosaic {} in [{x0}..={x1}]x[{z0}..={z1}]",
                self.base_name()
            );
        }
        result.map(|()| loaded)
    }

    /// Writes the description and tiles.
    ///
    /// With `force` everything is written. Otherwise the description is
    /// written only if modified, and exactly the tiles dirty at call time are
    /// saved; a tile dirtied again while saving stays in the dirty set.
    ///
    /// # Errors
    ///
    /// Returns the first I/O or codec error.
    pub fn save(&mut self, force: bool) -> MosaicResult<()> {
        self.pump_notices();
        if force || self.desc.is_modified() {
            let path = self.context.locator.master_file_path(&self.context.base_name);
            self.desc.save(path)?;
        }

        let targets: Vec<TileCoord> = if force {
            self.tiles.iter().map(MosaicTile::coord).collect()
        } else {
            self.dirty.iter().copied().collect()
        };

        let mut result = Ok(());
        for coord in &targets {
            if let Err(e) = self.tile_in_grid_mut(*coord).and_then(|t| t.save(force)) {
                result = Err(e);
                break;
            }
        }
        self.pump_notices();
        debug!(
            "saved mosaic {} ({} tiles considered, {} still dirty)",
            self.base_name(),
            targets.len(),
            self.dirty.len()
        );
        result
    }

    /// Applies pending tile notices and publishes the resulting events.
    pub fn pump_notices(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            match notice {
                TileNotice::Changed {
                    coord,
                    x,
                    z,
                    size_x,
                    size_z,
                } => {
                    let shift = self.desc.tile_shift();
                    let (world_x_m, world_z_m) = self.sample_to_world(
                        i64::from((coord.x << shift) + x),
                        i64::from((coord.z << shift) + z),
                    );
                    let mps = f64::from(self.desc.meters_per_sample());
                    self.publish(MosaicEvent::TileChanged {
                        world_x_m,
                        world_z_m,
                        size_x_m: f64::from(size_x) * mps,
                        size_z_m: f64::from(size_z) * mps,
                    });
                }
                TileNotice::Modified { coord, modified } => {
                    if modified {
                        self.dirty.insert(coord);
                    } else {
                        self.dirty.remove(&coord);
                    }
                }
                TileNotice::Materialized { coord } => {
                    debug!("materialized tile ({}, {}) of mosaic {}", coord.x, coord.z, self.base_name());
                    self.desc.set_tile_available(coord.x, coord.z, true);
                }
            }
        }

        let modified = self.is_modified();
        if modified != self.last_modified {
            self.last_modified = modified;
            self.publish(MosaicEvent::ModifiedChanged { modified });
        }
    }

    fn publish(&mut self, event: MosaicEvent) {
        let before = self.subscribers.len();
        self.subscribers.retain(|tx| tx.send(event).is_ok());
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            trace!("dropped {dropped} disconnected mosaic subscribers");
        }
    }

    fn index_of(&self, coord: TileCoord) -> Option<usize> {
        (coord.x < self.desc.size_x_tiles() && coord.z < self.desc.size_z_tiles())
            .then(|| (coord.z * self.desc.size_x_tiles() + coord.x) as usize)
    }
}

impl<T: MosaicTile> std::fmt::Debug for Mosaic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mosaic")
            .field("base_name", &self.context.base_name)
            .field("tiles", &self.tiles.len())
            .field("dirty", &self.dirty.len())
            .field("camera_tile", &self.camera_tile)
            .finish_non_exhaustive()
    }
}

/// Splits a meter offset into a floor sample index and a fraction.
#[inline]
fn split_axis(offset_m: f64, shift: u32, meters_per_sample: f64) -> (i64, f64) {
    let whole_m = offset_m.floor() as i64;
    let sample = whole_m >> shift;
    let fraction = (offset_m - (sample << shift) as f64) / meters_per_sample;
    (sample, fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleDepth;
    use crate::description::MosaicLayout;
    use std::path::PathBuf;

    /// Tile that records calls instead of touching storage.
    struct ProbeTile {
        seed: TileSeed,
        loaded: bool,
        modified: bool,
        redirty_on_save: bool,
        saves: usize,
    }

    impl ProbeTile {
        fn touch(&mut self) {
            self.loaded = true;
            if !self.modified {
                self.modified = true;
                self.seed.context.notify(TileNotice::Modified {
                    coord: self.seed.coord,
                    modified: true,
                });
            }
            self.seed.context.notify(TileNotice::Changed {
                coord: self.seed.coord,
                x: 1,
                z: 2,
                size_x: 1,
                size_z: 1,
            });
        }
    }

    impl MosaicTile for ProbeTile {
        fn from_seed(seed: TileSeed) -> Self {
            Self {
                seed,
                loaded: false,
                modified: false,
                redirty_on_save: false,
                saves: 0,
            }
        }
        fn coord(&self) -> TileCoord {
            self.seed.coord
        }
        fn is_available(&self) -> bool {
            self.seed.available
        }
        fn is_loaded(&self) -> bool {
            self.loaded
        }
        fn is_modified(&self) -> bool {
            self.modified
        }
        fn load(&mut self) -> MosaicResult<bool> {
            let fresh = !self.loaded;
            self.loaded = true;
            Ok(fresh)
        }
        fn save(&mut self, force: bool) -> MosaicResult<()> {
            if !self.modified && !force {
                return Ok(());
            }
            self.saves += 1;
            self.modified = false;
            self.seed.context.notify(TileNotice::Modified {
                coord: self.seed.coord,
                modified: false,
            });
            if self.redirty_on_save {
                self.modified = true;
                self.seed.context.notify(TileNotice::Modified {
                    coord: self.seed.coord,
                    modified: true,
                });
            }
            Ok(())
        }
    }

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("stratum_mosaic_{tag}_{}", std::process::id()))
    }

    fn probe_mosaic(tag: &str, tiles: u32, tile_size: u32, mps: u32) -> Mosaic<ProbeTile> {
        let desc = MosaicDescription::create(MosaicLayout {
            name: "probe".to_owned(),
            mosaic_type: "Data".to_owned(),
            file_ext: "png".to_owned(),
            size_x_tiles: tiles,
            size_z_tiles: tiles,
            tile_size_samples: tile_size,
            meters_per_sample: mps,
            min_height_m: 0.0,
            max_height_m: 1.0,
        })
        .unwrap();
        let storage = MosaicStorage::in_memory(temp_root(tag), Arc::new(MemoryCodec::new()));
        let format = TileFormat {
            depth: SampleDepth::Bits8,
            fill_raw: 0,
        };
        let mut mosaic = Mosaic::new(desc, storage, format, &MosaicConfig::default());
        // Start from a clean description so only tiles drive the flag.
        mosaic.save(false).unwrap();
        mosaic
    }

    #[test]
    fn test_world_to_sample_centers_dataset() {
        let mosaic = probe_mosaic("w2s", 2, 4, 2);
        // 2 tiles * 4 samples * 2 m = 16 m wide, origin at -8.
        assert_eq!(mosaic.origin_m(), (-8.0, -8.0));

        let pos = mosaic.world_to_sample(-8.0, 0.0);
        assert_eq!((pos.x, pos.z), (0, 4));
        assert!(pos.is_on_grid());

        let pos = mosaic.world_to_sample(-5.0, -8.5);
        assert_eq!((pos.x, pos.z), (1, -1));
        assert!((pos.fx - 0.5).abs() < 1e-12);
        assert!((pos.fz - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_sample_to_tile_uses_shift_and_mask() {
        let mosaic = probe_mosaic("s2t", 2, 4, 1);
        let ts = mosaic.sample_to_tile(5, 2).unwrap();
        assert_eq!(ts.tile, TileCoord::new(1, 0));
        assert_eq!((ts.x, ts.z), (1, 2));
        assert!(mosaic.sample_to_tile(8, 0).is_none());
        assert!(mosaic.sample_to_tile(0, -1).is_none());
    }

    #[test]
    fn test_sample_to_tile_wraps() {
        let mut mosaic = probe_mosaic("wrap", 2, 4, 1);
        mosaic.description_mut().set_wrap(true);
        let ts = mosaic.sample_to_tile(-1, 9).unwrap();
        assert_eq!(ts.tile, TileCoord::new(1, 0));
        assert_eq!((ts.x, ts.z), (3, 1));
    }

    #[test]
    fn test_preload_window_is_clipped() {
        let mut mosaic = probe_mosaic("preload", 5, 4, 1);
        mosaic.set_preload_radius(1);
        // Sample (0, 0) is tile (0, 0): the window is clipped to 2x2.
        let (ox, oz) = mosaic.origin_m();
        assert_eq!(mosaic.camera_moved(ox + 0.5, oz + 0.5).unwrap(), 4);
        assert_eq!(mosaic.loaded_tile_count(), 4);
        for tile in mosaic.tiles() {
            let inside = tile.coord().x <= 1 && tile.coord().z <= 1;
            assert_eq!(tile.is_loaded(), inside);
        }

        // Same tile again: nothing happens.
        assert_eq!(mosaic.camera_moved(ox + 1.5, oz + 1.0).unwrap(), 0);

        // Center tile (2, 2): 3x3 window, only (1, 1) already resident.
        assert_eq!(mosaic.camera_moved(0.0, 0.0).unwrap(), 8);
        assert_eq!(mosaic.loaded_tile_count(), 12);
    }

    #[test]
    fn test_camera_outside_grid_loads_nothing_far_away() {
        let mut mosaic = probe_mosaic("outside", 3, 4, 1);
        assert_eq!(mosaic.camera_moved(1000.0, 1000.0).unwrap(), 0);
        assert_eq!(mosaic.loaded_tile_count(), 0);
    }

    #[test]
    fn test_modified_tracks_dirty_set_and_events() {
        let mut mosaic = probe_mosaic("dirty", 2, 4, 1);
        let events = mosaic.subscribe();
        assert!(!mosaic.is_modified());

        mosaic.tile_mut(TileCoord::new(1, 1)).unwrap().touch();
        mosaic.pump_notices();
        assert!(mosaic.is_modified());
        assert_eq!(mosaic.dirty_tiles().collect::<Vec<_>>(), vec![TileCoord::new(1, 1)]);

        let received: Vec<MosaicEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                // Tile (1, 1), local (1, 2): samples (5, 6), origin -4.
                MosaicEvent::TileChanged {
                    world_x_m: 1.0,
                    world_z_m: 2.0,
                    size_x_m: 1.0,
                    size_z_m: 1.0,
                },
                MosaicEvent::ModifiedChanged { modified: true },
            ]
        );

        mosaic.save(false).unwrap();
        assert!(!mosaic.is_modified());
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![MosaicEvent::ModifiedChanged { modified: false }]
        );
    }

    #[test]
    fn test_save_snapshots_dirty_set() {
        let mut mosaic = probe_mosaic("reentrant", 2, 4, 1);
        {
            let tile = mosaic.tile_mut(TileCoord::new(0, 0)).unwrap();
            tile.touch();
            tile.redirty_on_save = true;
        }
        mosaic.tile_mut(TileCoord::new(1, 0)).unwrap().touch();
        mosaic.pump_notices();

        mosaic.save(false).unwrap();
        assert_eq!(mosaic.tile(TileCoord::new(0, 0)).unwrap().saves, 1);
        assert_eq!(mosaic.tile(TileCoord::new(1, 0)).unwrap().saves, 1);
        // Re-dirtied during its save: still tracked, saved again next time.
        assert_eq!(mosaic.dirty_tiles().collect::<Vec<_>>(), vec![TileCoord::new(0, 0)]);
        assert!(mosaic.is_modified());

        mosaic.tile_mut(TileCoord::new(0, 0)).unwrap().redirty_on_save = false;
        mosaic.save(false).unwrap();
        assert_eq!(mosaic.tile(TileCoord::new(0, 0)).unwrap().saves, 2);
        assert_eq!(mosaic.tile(TileCoord::new(1, 0)).unwrap().saves, 1);
        assert!(!mosaic.is_modified());
    }

    #[test]
    fn test_description_change_counts_as_modified() {
        let mut mosaic = probe_mosaic("descmod", 2, 4, 1);
        assert!(!mosaic.is_modified());
        mosaic.description_mut().set_global_max_height_m(42.0);
        assert!(mosaic.is_modified());
        mosaic.save(false).unwrap();
        assert!(!mosaic.is_modified());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut mosaic = probe_mosaic("prune", 2, 4, 1);
        drop(mosaic.subscribe());
        let live = mosaic.subscribe();
        mosaic.tile_mut(TileCoord::new(0, 0)).unwrap().touch();
        mosaic.pump_notices();
        assert_eq!(mosaic.subscribers.len(), 1);
        assert_eq!(live.try_iter().count(), 2);
    }
}
