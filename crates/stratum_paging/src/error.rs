//! # Paging Error Types

use stratum_mosaic::MosaicError;
use thiserror::Error;

/// Errors raised while building pages, sampling heights or generating meshes.
#[derive(Error, Debug)]
pub enum PagingError {
    /// A size that must be a power of two is not.
    #[error("{field} must be a power of two, got {value}")]
    NotPowerOfTwo {
        /// The offending field.
        field: &'static str,
        /// Its value.
        value: u64,
    },

    /// A page-local coordinate lies outside `[0, page_size)`.
    #[error("({x}, {z}) lies outside the page [0, {page_size})")]
    OutsidePage {
        /// Local X in meters.
        x: f64,
        /// Local Z in meters.
        z: f64,
        /// Page edge in meters.
        page_size: f64,
    },

    /// Tiles were linked before their pages.
    #[error("tile neighbors requested before page neighbors were attached")]
    NeighborsNotAttached,

    /// Adjacent pages differ by more than one LOD step.
    #[error("adjacent pages use {near} and {far} tiles per page")]
    UnsupportedLodRatio {
        /// Tiles per page on this side.
        near: u32,
        /// Tiles per page on the neighbor.
        far: u32,
    },

    /// A stitch was requested for an edge ratio other than 1:2, 1:1 or 2:1.
    #[error("cannot stitch a {own}-sample edge to a {neighbor}-sample edge")]
    UnsupportedStitchRatio {
        /// Own samples per edge.
        own: u32,
        /// Neighbor samples along the shared edge.
        neighbor: u32,
    },

    /// Generated stitch geometry does not match its predicted size.
    #[error("stitch generated {actual} indices, expected {expected}")]
    StitchTopologyMismatch {
        /// Predicted index count.
        expected: usize,
        /// Generated index count.
        actual: usize,
    },

    /// No page with this coordinate in the current window.
    #[error("page ({x}, {z}) is not in the current window")]
    UnknownPage {
        /// Page X.
        x: i32,
        /// Page Z.
        z: i32,
    },

    /// No tile with this index in the page.
    #[error("tile ({x}, {z}) does not exist in a page of {tiles_per_page} tiles per side")]
    UnknownTile {
        /// Tile X.
        x: u32,
        /// Tile Z.
        z: u32,
        /// Tiles per page side.
        tiles_per_page: u32,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Mosaic layer failure.
    #[error(transparent)]
    Mosaic(#[from] MosaicError),
}

/// Result type for paging operations.
pub type PagingResult<T> = Result<T, PagingError>;

/// Checks that `value` is a non-zero power of two.
///
/// # Errors
///
/// Returns [`PagingError::NotPowerOfTwo`] naming `field` otherwise.
pub fn ensure_power_of_two(field: &'static str, value: u32) -> PagingResult<()> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(PagingError::NotPowerOfTwo {
            field,
            value: u64::from(value),
        })
    }
}
