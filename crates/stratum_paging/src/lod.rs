//! # Level of Detail
//!
//! Maps a page's distance from the camera page to its tile count.

use tracing::trace;

use crate::config::LodLevel;
use crate::error::{ensure_power_of_two, PagingError, PagingResult};

/// Chooses tiles per page side from the page's ring around the camera.
pub trait LodSpec {
    /// Tiles per page side (a power of two) at Chebyshev distance
    /// `pages_from_camera` from the camera page.
    fn tiles_per_page(&self, pages_from_camera: u32) -> u32;
}

/// A validated LOD table.
///
/// Adjacent pages are at most one ring apart, so consecutive levels may
/// differ by at most a factor of two.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableLodSpec {
    levels: Vec<LodLevel>,
}

impl TableLodSpec {
    /// Validates and wraps a table ordered nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::InvalidConfig`] for an empty or unordered table,
    /// [`PagingError::NotPowerOfTwo`] for a bad tile count, and
    /// [`PagingError::UnsupportedLodRatio`] for a jump of more than 2x.
    pub fn new(levels: Vec<LodLevel>) -> PagingResult<Self> {
        if levels.is_empty() {
            return Err(PagingError::InvalidConfig("LOD table is empty".to_owned()));
        }
        for level in &levels {
            ensure_power_of_two("tiles_per_page", level.tiles_per_page)?;
        }
        for pair in levels.windows(2) {
            let (near, far) = (pair[0], pair[1]);
            if far.max_pages_from_camera <= near.max_pages_from_camera {
                return Err(PagingError::InvalidConfig(format!(
                    "LOD distances must increase, got {} then {}",
                    near.max_pages_from_camera, far.max_pages_from_camera
                )));
            }
            let ratio_ok = far.tiles_per_page == near.tiles_per_page
                || far.tiles_per_page * 2 == near.tiles_per_page
                || far.tiles_per_page == near.tiles_per_page * 2;
            if !ratio_ok {
                return Err(PagingError::UnsupportedLodRatio {
                    near: near.tiles_per_page,
                    far: far.tiles_per_page,
                });
            }
        }
        Ok(Self { levels })
    }

    /// The table.
    #[must_use]
    pub fn levels(&self) -> &[LodLevel] {
        &self.levels
    }
}

impl LodSpec for TableLodSpec {
    fn tiles_per_page(&self, pages_from_camera: u32) -> u32 {
        let level = self
            .levels
            .iter()
            .find(|l| pages_from_camera <= l.max_pages_from_camera)
            .or_else(|| self.levels.last());
        let tiles = level.map_or(1, |l| l.tiles_per_page);
        trace!("page ring {pages_from_camera} uses {tiles} tiles per side");
        tiles
    }
}
