//! # Texture Mosaic
//!
//! Splat data for terrain texturing. Each tile image doubles as an atlas
//! texture; its 32-bit samples pack up to four texture-layer indices
//! (one per RGBA channel).

use crossbeam_channel::Receiver;

use crate::config::MosaicConfig;
use crate::data::{DataMosaic, SampleDepth};
use crate::description::{MosaicDescription, MosaicLayout};
use crate::error::MosaicResult;
use crate::mosaic::{MosaicEvent, MosaicStorage};
use crate::tile::{TileCoord, TileFormat};

/// Where a world region lives inside a tile texture.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureWindow {
    /// Resource name of the tile texture (file stem).
    pub texture_name: String,
    /// Left edge in `[0, 1)`.
    pub u_offset: f32,
    /// Top edge in `[0, 1)`; `v` runs north to south like image rows.
    pub v_offset: f32,
    /// Fraction of the texture covered by the region.
    pub uv_scale: f32,
}

/// A splat-map dataset.
#[derive(Debug)]
pub struct TextureMosaic {
    mosaic: DataMosaic,
}

impl TextureMosaic {
    /// Creates an empty texture mosaic with 32-bit tiles.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::NotPowerOfTwo`](crate::MosaicError::NotPowerOfTwo)
    /// for bad geometry.
    pub fn create(layout: MosaicLayout, storage: MosaicStorage, config: &MosaicConfig) -> MosaicResult<Self> {
        let desc = MosaicDescription::create(layout)?;
        Ok(Self::from_description(desc, storage, config))
    }

    /// Opens a persisted texture mosaic.
    ///
    /// # Errors
    ///
    /// Returns master-file errors.
    pub fn open(base_name: &str, storage: MosaicStorage, config: &MosaicConfig) -> MosaicResult<Self> {
        let path = storage.locator.master_file_path(base_name);
        let desc = MosaicDescription::load(&path)?;
        Ok(Self::from_description(desc, storage, config))
    }

    /// Wraps an already parsed description.
    #[must_use]
    pub fn from_description(desc: MosaicDescription, storage: MosaicStorage, config: &MosaicConfig) -> Self {
        let format = TileFormat {
            depth: SampleDepth::Bits32,
            fill_raw: 0,
        };
        Self {
            mosaic: DataMosaic::new(desc, storage, format, config),
        }
    }

    /// The underlying sample mosaic.
    #[must_use]
    pub const fn mosaic(&self) -> &DataMosaic {
        &self.mosaic
    }

    /// Mutable access to the underlying sample mosaic.
    pub fn mosaic_mut(&mut self) -> &mut DataMosaic {
        &mut self.mosaic
    }

    /// Listens for change events.
    pub fn subscribe(&mut self) -> Receiver<MosaicEvent> {
        self.mosaic.subscribe()
    }

    /// Saves the description and dirty (or all) tiles.
    ///
    /// # Errors
    ///
    /// Returns I/O or codec errors.
    pub fn save(&mut self, force: bool) -> MosaicResult<()> {
        self.mosaic.save(force)
    }

    /// Texture resource name of a tile.
    #[must_use]
    pub fn texture_name(&self, coord: TileCoord) -> String {
        let desc = self.mosaic.description();
        format!(
            "{}_x{}y{}",
            self.mosaic.base_name(),
            coord.x,
            desc.flipped_tile_z(coord.z)
        )
    }

    /// Texture and UV window covering the square world region with south-west
    /// corner `(x_m, z_m)` and edge `size_m`.
    ///
    /// Returns `None` if the region leaves the dataset or straddles tiles.
    #[must_use]
    pub fn texture_window(&self, x_m: f64, z_m: f64, size_m: f64) -> Option<TextureWindow> {
        let desc = self.mosaic.description();
        let mps = f64::from(desc.meters_per_sample());
        let start = self.mosaic.world_to_sample(x_m, z_m);
        let start = self.mosaic.sample_to_tile(start.x, start.z)?;
        let samples = (size_m / mps).ceil().max(1.0) as u32;
        let tile_size = desc.tile_size_samples();
        if start.x + samples > tile_size || start.z + samples > tile_size {
            return None;
        }

        let size = tile_size as f32;
        let top_row = tile_size - (start.z + samples);
        Some(TextureWindow {
            texture_name: self.texture_name(start.tile),
            u_offset: start.x as f32 / size,
            v_offset: top_row as f32 / size,
            uv_scale: samples as f32 / size,
        })
    }

    /// The four packed layer indices at a world position (`[0; 4]` outside).
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn texture_indices(&mut self, x_m: f64, z_m: f64) -> MosaicResult<[u8; 4]> {
        let pos = self.mosaic.world_to_sample(x_m, z_m);
        Ok(self
            .mosaic
            .sample_raw(pos.x, pos.z)?
            .map_or([0; 4], |(raw, _)| raw.to_le_bytes()))
    }

    /// Writes the four packed layer indices. Returns `false` outside the dataset.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn set_texture_indices(&mut self, x_m: f64, z_m: f64, indices: [u8; 4]) -> MosaicResult<bool> {
        let pos = self.mosaic.world_to_sample(x_m, z_m);
        self.mosaic
            .set_sample_raw(pos.x, pos.z, u32::from_le_bytes(indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MemoryCodec;
    use std::sync::Arc;

    fn splat(tag: &str) -> TextureMosaic {
        let layout = MosaicLayout {
            name: "splat".to_owned(),
            mosaic_type: "Texture".to_owned(),
            file_ext: "png".to_owned(),
            size_x_tiles: 2,
            size_z_tiles: 2,
            tile_size_samples: 16,
            meters_per_sample: 2,
            min_height_m: 0.0,
            max_height_m: 0.0,
        };
        let root = std::env::temp_dir().join(format!("stratum_texture_{tag}_{}", std::process::id()));
        let storage = MosaicStorage::in_memory(root, Arc::new(MemoryCodec::new()));
        TextureMosaic::create(layout, storage, &MosaicConfig::default()).unwrap()
    }

    #[test]
    fn test_texture_window() {
        let tex = splat("window");
        // 64 m square centered on the origin; tile (1, 1) starts at (0, 0).
        let window = tex.texture_window(8.0, 0.0, 16.0).unwrap();
        assert_eq!(window.texture_name, "splat_x1y0");
        assert_eq!(window.u_offset, 0.25);
        assert_eq!(window.v_offset, 0.5);
        assert_eq!(window.uv_scale, 0.5);

        // South-west tile, flipped to y1.
        let window = tex.texture_window(-32.0, -32.0, 64.0 / 2.0).unwrap();
        assert_eq!(window.texture_name, "splat_x0y1");
        assert_eq!(window.v_offset, 0.0);
        assert_eq!(window.uv_scale, 1.0);
    }

    #[test]
    fn test_texture_window_rejects_straddling_and_outside() {
        let tex = splat("straddle");
        assert!(tex.texture_window(-4.0, 0.0, 8.0).is_none());
        assert!(tex.texture_window(100.0, 0.0, 2.0).is_none());
    }

    #[test]
    fn test_texture_indices_round_trip() {
        let mut tex = splat("indices");
        assert_eq!(tex.texture_indices(3.0, 3.0).unwrap(), [0; 4]);
        assert!(tex.set_texture_indices(3.0, 3.0, [1, 7, 0, 255]).unwrap());
        assert_eq!(tex.texture_indices(2.5, 2.5).unwrap(), [1, 7, 0, 255]);
        assert!(!tex.set_texture_indices(-40.0, 0.0, [1, 1, 1, 1]).unwrap());
        assert!(tex.mosaic().is_modified());
    }
}
