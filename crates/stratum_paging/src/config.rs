//! # Terrain Configuration
//!
//! Loaded once at startup from TOML.
//!
//! ```toml
//! page_size_m = 256
//! visible_radius_pages = 2
//! samples_per_tile = 16
//! sub_pages_per_page = 4
//!
//! [[lod]]
//! max_pages_from_camera = 0
//! tiles_per_page = 8
//!
//! [[lod]]
//! max_pages_from_camera = 1
//! tiles_per_page = 4
//!
//! [mosaic]
//! preload_radius = 2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use stratum_mosaic::{MosaicConfig, MosaicError};

use crate::error::{ensure_power_of_two, PagingError, PagingResult};
use crate::lod::TableLodSpec;

/// One row of the LOD table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LodLevel {
    /// Last page ring (Chebyshev distance from the camera page) using this level.
    pub max_pages_from_camera: u32,
    /// Tiles per page side at this level (power of two).
    pub tiles_per_page: u32,
}

/// Terrain paging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Page edge length in meters (power of two).
    pub page_size_m: u32,
    /// Pages kept around the camera page, per direction.
    pub visible_radius_pages: u32,
    /// Vertices along one tile edge (power of two, at least 2).
    pub samples_per_tile: u32,
    /// Height-cache sub-pages per page side (power of two).
    pub sub_pages_per_page: u32,
    /// Distance-to-detail table, nearest first.
    pub lod: Vec<LodLevel>,
    /// Streaming settings of the height mosaic.
    pub mosaic: MosaicConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            page_size_m: 256,
            visible_radius_pages: 2,
            samples_per_tile: 16,
            sub_pages_per_page: 4,
            lod: vec![
                LodLevel {
                    max_pages_from_camera: 0,
                    tiles_per_page: 8,
                },
                LodLevel {
                    max_pages_from_camera: 1,
                    tiles_per_page: 4,
                },
                LodLevel {
                    max_pages_from_camera: 2,
                    tiles_per_page: 2,
                },
                LodLevel {
                    max_pages_from_camera: u32::MAX,
                    tiles_per_page: 1,
                },
            ],
            mosaic: MosaicConfig::default(),
        }
    }
}

impl TerrainConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::InvalidConfig`] if the text does not parse, or
    /// any error from [`TerrainConfig::validate`].
    pub fn from_toml_str(text: &str) -> PagingResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| PagingError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or any parse or
    /// validation error.
    pub fn load(path: impl AsRef<Path>) -> PagingResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MosaicError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks power-of-two sizes and the LOD table.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NotPowerOfTwo`] or [`PagingError::InvalidConfig`].
    pub fn validate(&self) -> PagingResult<()> {
        ensure_power_of_two("page_size_m", self.page_size_m)?;
        ensure_power_of_two("samples_per_tile", self.samples_per_tile)?;
        ensure_power_of_two("sub_pages_per_page", self.sub_pages_per_page)?;
        if self.samples_per_tile < 2 {
            return Err(PagingError::InvalidConfig(
                "samples_per_tile must be at least 2".to_owned(),
            ));
        }
        if self.sub_pages_per_page > self.page_size_m {
            return Err(PagingError::InvalidConfig(format!(
                "{} sub-pages do not fit a {} m page",
                self.sub_pages_per_page, self.page_size_m
            )));
        }
        TableLodSpec::new(self.lod.clone()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        TerrainConfig::default().validate().unwrap();
    }

    #[test]
    fn test_parse_with_lod_table() {
        let text = r"
            page_size_m = 128
            samples_per_tile = 8

            [[lod]]
            max_pages_from_camera = 0
            tiles_per_page = 4

            [[lod]]
            max_pages_from_camera = 3
            tiles_per_page = 2

            [mosaic]
            preload_radius = 3
        ";
        let config = TerrainConfig::from_toml_str(text).unwrap();
        assert_eq!(config.page_size_m, 128);
        assert_eq!(config.visible_radius_pages, 2);
        assert_eq!(config.lod.len(), 2);
        assert_eq!(config.mosaic.preload_radius, 3);
    }

    #[test]
    fn test_rejects_bad_sizes() {
        let err = TerrainConfig::from_toml_str("page_size_m = 100").unwrap_err();
        assert!(matches!(err, PagingError::NotPowerOfTwo { field: "page_size_m", .. }));

        let err = TerrainConfig::from_toml_str("samples_per_tile = 1").unwrap_err();
        assert!(matches!(err, PagingError::InvalidConfig(_)));
    }
}
