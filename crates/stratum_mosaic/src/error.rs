//! # Mosaic Error Types
//!
//! All errors that can occur while loading, editing or saving a mosaic.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the mosaic system.
#[derive(Error, Debug)]
pub enum MosaicError {
    /// A filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The image codec could not decode or encode a tile.
    #[error("image codec failed on {path}: {reason}")]
    Image {
        /// The tile resource.
        path: PathBuf,
        /// Codec message.
        reason: String,
    },

    /// The master file could not be parsed.
    #[error("malformed master file at line {line}: {reason}")]
    MalformedMasterFile {
        /// 1-based line number (0 when the problem is the file as a whole).
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// A required master-file record is missing.
    #[error("master file is missing the #{0} record")]
    MissingMasterRecord(&'static str),

    /// A size that must be a power of two is not.
    #[error("{field} must be a power of two, got {value}")]
    NotPowerOfTwo {
        /// The offending field.
        field: &'static str,
        /// Its value.
        value: u64,
    },

    /// The tile image uses a pixel layout we cannot store.
    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    /// A tile image does not match the mosaic's tile size.
    #[error("tile image is {width}x{height}, expected {expected}x{expected}")]
    TileSizeMismatch {
        /// Expected edge length in samples.
        expected: u32,
        /// Actual image width.
        width: u32,
        /// Actual image height.
        height: u32,
    },

    /// A tile inside the grid bounds has no tile object (internal corruption).
    #[error("tile ({x}, {z}) is inside the grid but has no tile object")]
    MissingTile {
        /// Tile X.
        x: u32,
        /// Tile Z.
        z: u32,
    },

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MosaicError {
    /// Wraps an I/O error with the path it happened on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for mosaic operations.
pub type MosaicResult<T> = Result<T, MosaicError>;

/// Checks that `value` is a non-zero power of two.
///
/// # Errors
///
/// Returns [`MosaicError::NotPowerOfTwo`] naming `field` otherwise.
pub fn ensure_power_of_two(field: &'static str, value: u32) -> MosaicResult<()> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(MosaicError::NotPowerOfTwo {
            field,
            value: u64::from(value),
        })
    }
}
