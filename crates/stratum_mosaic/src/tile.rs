//! # Mosaic Tiles
//!
//! A tile is the smallest independently loadable and saveable unit of a
//! mosaic. Tiles report changes to their parent over a channel rather than
//! holding a reference back to it.
//!
//! ## Lifecycle
//!
//! ```text
//! not loaded ──load()──> loaded ──mutation──> loaded + dirty
//!      │                                          │
//!      └───────── first write (unavailable) ──────┤
//!                                                 │
//!                          loaded <──save()───────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::trace;

use crate::codec::ImageCodec;
use crate::error::MosaicResult;
use crate::locator::ResourceLocator;

/// Tile grid coordinate, world orientation (`z` grows towards +Z).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoord {
    /// Column.
    pub x: u32,
    /// Row.
    pub z: u32,
}

impl TileCoord {
    /// Creates a coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: u32, z: u32) -> Self {
        Self { x, z }
    }
}

/// Tile-to-mosaic notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileNotice {
    /// Samples changed. Coordinates are tile-local samples.
    Changed {
        /// Source tile.
        coord: TileCoord,
        /// First changed column.
        x: u32,
        /// First changed row.
        z: u32,
        /// Columns changed.
        size_x: u32,
        /// Rows changed.
        size_z: u32,
    },
    /// The tile's dirty flag flipped.
    Modified {
        /// Source tile.
        coord: TileCoord,
        /// New dirty state.
        modified: bool,
    },
    /// A previously nonexistent tile got a buffer on first write.
    Materialized {
        /// Source tile.
        coord: TileCoord,
    },
}

/// Storage layout used when a tile has to be created from nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileFormat {
    /// Sample depth of fresh buffers.
    pub depth: crate::data::SampleDepth,
    /// Raw value fresh buffers are filled with.
    pub fill_raw: u32,
}

/// Everything a tile needs that it shares with its siblings.
pub struct TileContext {
    /// Dataset base name.
    pub base_name: String,
    /// Tile image extension.
    pub file_ext: String,
    /// Samples along one tile edge.
    pub tile_size: u32,
    /// Tiles along Z (for the file-name flip).
    pub size_z_tiles: u32,
    /// Layout of fresh buffers.
    pub format: TileFormat,
    /// Where tile images live.
    pub locator: Arc<dyn ResourceLocator>,
    /// How tile images are read and written.
    pub codec: Arc<dyn ImageCodec>,
    /// Back-channel to the owning mosaic.
    pub notices: Sender<TileNotice>,
}

impl TileContext {
    /// Resource path of the tile at `coord`.
    #[must_use]
    pub fn tile_path(&self, coord: TileCoord) -> PathBuf {
        let flipped_z = self.size_z_tiles - 1 - coord.z;
        self.locator
            .tile_path(&self.base_name, coord.x, flipped_z, &self.file_ext)
    }

    /// Sends a notice. Returns false if the owning mosaic is gone, which
    /// only happens during teardown.
    pub fn notify(&self, notice: TileNotice) -> bool {
        match self.notices.send(notice) {
            Ok(()) => true,
            Err(err) => {
                trace!(
                    "dropped {:?} for {}: mosaic receiver disconnected",
                    err.into_inner(),
                    self.base_name
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for TileContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileContext")
            .field("base_name", &self.base_name)
            .field("file_ext", &self.file_ext)
            .field("tile_size", &self.tile_size)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Constructor arguments handed to [`MosaicTile::from_seed`].
#[derive(Clone, Debug)]
pub struct TileSeed {
    /// Grid position of the new tile.
    pub coord: TileCoord,
    /// Whether the tile's image exists.
    pub available: bool,
    /// Shared context.
    pub context: Arc<TileContext>,
}

/// One cell of a [`Mosaic`](crate::mosaic::Mosaic).
pub trait MosaicTile: Sized {
    /// Tile factory used by the mosaic at construction.
    fn from_seed(seed: TileSeed) -> Self;

    /// Grid position.
    fn coord(&self) -> TileCoord;

    /// True if the tile's backing image exists (or has been materialized).
    fn is_available(&self) -> bool;

    /// True if samples are resident.
    fn is_loaded(&self) -> bool;

    /// True if resident samples differ from the persisted image.
    fn is_modified(&self) -> bool;

    /// Makes the samples resident. Returns `true` if this call loaded them.
    ///
    /// # Errors
    ///
    /// Returns codec errors or [`MosaicError::UnsupportedPixelFormat`](crate::MosaicError::UnsupportedPixelFormat).
    fn load(&mut self) -> MosaicResult<bool>;

    /// Persists resident samples if dirty, or always when `force` is set.
    ///
    /// # Errors
    ///
    /// Returns codec errors.
    fn save(&mut self, force: bool) -> MosaicResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MemoryCodec;
    use crate::data::SampleDepth;
    use crate::locator::DirectoryLocator;

    fn context(notices: Sender<TileNotice>) -> TileContext {
        TileContext {
            base_name: "height".to_owned(),
            file_ext: "png".to_owned(),
            tile_size: 16,
            size_z_tiles: 4,
            format: TileFormat {
                depth: SampleDepth::Bits16,
                fill_raw: 0,
            },
            locator: Arc::new(DirectoryLocator::new("tiles")),
            codec: Arc::new(MemoryCodec::new()),
            notices,
        }
    }

    #[test]
    fn test_tile_path_flips_z() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let ctx = context(tx);
        let path = ctx.tile_path(TileCoord::new(2, 0));
        assert!(path.ends_with("height_x2y3.png"));
    }

    #[test]
    fn test_notify_after_mosaic_dropped() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let ctx = context(tx);
        let notice = TileNotice::Materialized {
            coord: TileCoord::new(1, 1),
        };
        assert!(ctx.notify(notice));
        assert_eq!(rx.try_recv(), Ok(notice));

        drop(rx);
        assert!(!ctx.notify(notice));
    }
}
