//! # Mosaic Configuration
//!
//! Streaming knobs loaded once at startup from TOML.
//!
//! ```toml
//! preload_radius = 2
//! default_height_mm = 0.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MosaicError, MosaicResult};

/// Runtime settings shared by every mosaic kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicConfig {
    /// Tiles within this Chebyshev radius of the camera tile are kept loaded.
    pub preload_radius: u32,
    /// Height reported for samples outside the dataset, in millimeters.
    pub default_height_mm: f32,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            preload_radius: 1,
            default_height_mm: 0.0,
        }
    }
}

impl MosaicConfig {
    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::InvalidConfig`] if the text does not parse.
    pub fn from_toml_str(text: &str) -> MosaicResult<Self> {
        toml::from_str(text).map_err(|e| MosaicError::InvalidConfig(e.to_string()))
    }

    /// Loads a config file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`MosaicError::InvalidConfig`] if it does not parse.
    pub fn load(path: impl AsRef<Path>) -> MosaicResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| MosaicError::io(path, e))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = MosaicConfig::from_toml_str("preload_radius = 3").unwrap();
        assert_eq!(config.preload_radius, 3);
        assert!(config.default_height_mm.abs() < f32::EPSILON);
    }

    #[test]
    fn test_rejects_bad_types() {
        let err = MosaicConfig::from_toml_str("preload_radius = \"far\"").unwrap_err();
        assert!(matches!(err, MosaicError::InvalidConfig(_)));
    }
}
