//! # Data Mosaic
//!
//! Raw sample storage for mosaic tiles. The storage layout is picked once,
//! when a tile is loaded, from the pixel format of its image:
//!
//! | Pixel format | Storage  | Bytes/sample | `max_value`  |
//! |--------------|----------|--------------|--------------|
//! | L8           | `Bits8`  | 1            | 255          |
//! | L16          | `Bits16` | 2            | 65 535       |
//! | RGB8         | `Bits24` | 3            | 16 777 215   |
//! | RGBA8        | `Bits32` | 4            | 4 294 967 295|
//!
//! Normalized values map `[0, 1]` onto `[0, max_value]`.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::codec::{PixelData, RawImage};
use crate::error::{MosaicError, MosaicResult};
use crate::mosaic::Mosaic;
use crate::tile::{MosaicTile, TileContext, TileCoord, TileNotice, TileSeed};

/// Bits per stored sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleDepth {
    /// One byte.
    Bits8,
    /// Two bytes.
    Bits16,
    /// Three bytes, little-endian.
    Bits24,
    /// Four bytes, little-endian RGBA.
    Bits32,
}

impl SampleDepth {
    /// Largest raw value.
    #[inline]
    #[must_use]
    pub const fn max_value(self) -> u32 {
        match self {
            Self::Bits8 => 0xFF,
            Self::Bits16 => 0xFFFF,
            Self::Bits24 => 0x00FF_FFFF,
            Self::Bits32 => u32::MAX,
        }
    }

    /// Storage size of one sample.
    #[inline]
    #[must_use]
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
            Self::Bits24 => 3,
            Self::Bits32 => 4,
        }
    }
}

/// A tile's sample buffer, indexed `[z * size + x]` with `z` growing north.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileData {
    /// 8-bit samples.
    Bits8(Vec<u8>),
    /// 16-bit samples.
    Bits16(Vec<u16>),
    /// 24-bit samples.
    Bits24(Vec<[u8; 3]>),
    /// 32-bit samples.
    Bits32(Vec<u32>),
}

impl TileData {
    /// A buffer of `len` samples all set to `raw` (clamped to the depth).
    #[must_use]
    pub fn filled(depth: SampleDepth, len: usize, raw: u32) -> Self {
        let raw = raw.min(depth.max_value());
        match depth {
            SampleDepth::Bits8 => Self::Bits8(vec![raw as u8; len]),
            SampleDepth::Bits16 => Self::Bits16(vec![raw as u16; len]),
            SampleDepth::Bits24 => {
                let [a, b, c, _] = raw.to_le_bytes();
                Self::Bits24(vec![[a, b, c]; len])
            }
            SampleDepth::Bits32 => Self::Bits32(vec![raw; len]),
        }
    }

    /// Storage layout.
    #[inline]
    #[must_use]
    pub const fn depth(&self) -> SampleDepth {
        match self {
            Self::Bits8(_) => SampleDepth::Bits8,
            Self::Bits16(_) => SampleDepth::Bits16,
            Self::Bits24(_) => SampleDepth::Bits24,
            Self::Bits32(_) => SampleDepth::Bits32,
        }
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bits8(v) => v.len(),
            Self::Bits16(v) => v.len(),
            Self::Bits24(v) => v.len(),
            Self::Bits32(v) => v.len(),
        }
    }

    /// True if the buffer holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw sample at `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u32> {
        match self {
            Self::Bits8(v) => v.get(index).map(|&s| u32::from(s)),
            Self::Bits16(v) => v.get(index).map(|&s| u32::from(s)),
            Self::Bits24(v) => v.get(index).map(|&[a, b, c]| u32::from_le_bytes([a, b, c, 0])),
            Self::Bits32(v) => v.get(index).copied(),
        }
    }

    /// Stores a raw sample, clamped to the depth. Out-of-range indices are ignored.
    #[inline]
    pub fn set(&mut self, index: usize, raw: u32) {
        let raw = raw.min(self.depth().max_value());
        match self {
            Self::Bits8(v) => {
                if let Some(s) = v.get_mut(index) {
                    *s = raw as u8;
                }
            }
            Self::Bits16(v) => {
                if let Some(s) = v.get_mut(index) {
                    *s = raw as u16;
                }
            }
            Self::Bits24(v) => {
                if let Some(s) = v.get_mut(index) {
                    let [a, b, c, _] = raw.to_le_bytes();
                    *s = [a, b, c];
                }
            }
            Self::Bits32(v) => {
                if let Some(s) = v.get_mut(index) {
                    *s = raw;
                }
            }
        }
    }

    /// Converts a decoded image. Image rows run north to south, so they are
    /// reversed into buffer order.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::TileSizeMismatch`] if the image is not
    /// `tile_size` square, or [`MosaicError::Image`] for a short buffer.
    pub fn from_image(image: &RawImage, tile_size: u32, path: &Path) -> MosaicResult<Self> {
        if image.width != tile_size || image.height != tile_size {
            return Err(MosaicError::TileSizeMismatch {
                expected: tile_size,
                width: image.width,
                height: image.height,
            });
        }
        image.validate(path)?;
        let row = tile_size as usize;

        Ok(match &image.pixels {
            PixelData::L8(v) => Self::Bits8(flip_rows(v, row)),
            PixelData::L16(v) => Self::Bits16(flip_rows(v, row)),
            PixelData::Rgb8(v) => Self::Bits24(flip_rows(bytemuck::cast_slice::<u8, [u8; 3]>(v), row)),
            PixelData::Rgba8(v) => {
                let packed: Vec<u32> = bytemuck::cast_slice::<u8, [u8; 4]>(v)
                    .iter()
                    .map(|px| u32::from_le_bytes(*px))
                    .collect();
                Self::Bits32(flip_rows(&packed, row))
            }
        })
    }

    /// Converts back to an image in north-to-south row order.
    #[must_use]
    pub fn to_image(&self, tile_size: u32) -> RawImage {
        let row = tile_size as usize;
        let pixels = match self {
            Self::Bits8(v) => PixelData::L8(flip_rows(v, row)),
            Self::Bits16(v) => PixelData::L16(flip_rows(v, row)),
            Self::Bits24(v) => {
                PixelData::Rgb8(bytemuck::cast_slice::<[u8; 3], u8>(&flip_rows(v, row)).to_vec())
            }
            Self::Bits32(v) => PixelData::Rgba8(
                flip_rows(v, row)
                    .iter()
                    .flat_map(|px| px.to_le_bytes())
                    .collect(),
            ),
        };
        RawImage {
            width: tile_size,
            height: tile_size,
            pixels,
        }
    }
}

fn flip_rows<T: Copy>(samples: &[T], row: usize) -> Vec<T> {
    samples.chunks_exact(row).rev().flatten().copied().collect()
}

/// A mosaic tile backed by a [`TileData`] buffer.
#[derive(Debug)]
pub struct DataMosaicTile {
    coord: TileCoord,
    available: bool,
    context: Arc<TileContext>,
    data: Option<TileData>,
    modified: bool,
}

impl DataMosaicTile {
    /// Resident samples, if loaded.
    #[must_use]
    pub const fn data(&self) -> Option<&TileData> {
        self.data.as_ref()
    }

    /// Layout of the resident buffer, or of the buffer a write would create.
    #[must_use]
    pub fn depth(&self) -> SampleDepth {
        self.data
            .as_ref()
            .map_or(self.context.format.depth, TileData::depth)
    }

    /// Raw value at tile-local `(x, z)`. Unloaded tiles report `None`.
    #[must_use]
    pub fn raw(&self, x: u32, z: u32) -> Option<u32> {
        let index = self.index(x, z)?;
        self.data.as_ref().and_then(|d| d.get(index))
    }

    /// Normalized value at tile-local `(x, z)`.
    #[must_use]
    pub fn data_normalized(&self, x: u32, z: u32) -> Option<f64> {
        let max = f64::from(self.depth().max_value());
        self.raw(x, z).map(|raw| f64::from(raw) / max)
    }

    /// Writes a raw value and reports a 1x1 change.
    ///
    /// # Errors
    ///
    /// Returns load errors for the tile image.
    pub fn set_raw(&mut self, x: u32, z: u32, raw: u32) -> MosaicResult<()> {
        if self.write_raw(x, z, raw)? {
            self.notify_changed(x, z, 1, 1);
        }
        Ok(())
    }

    /// Writes a normalized value (clamped to `[0, 1]`) and reports a 1x1 change.
    ///
    /// # Errors
    ///
    /// Returns load errors for the tile image.
    pub fn set_data_normalized(&mut self, x: u32, z: u32, value: f64) -> MosaicResult<()> {
        let max = f64::from(self.depth().max_value());
        let raw = (value.clamp(0.0, 1.0) * max).round() as u32;
        self.set_raw(x, z, raw)
    }

    /// Writes without a change notice. Returns `false` for out-of-tile coordinates.
    pub(crate) fn write_raw(&mut self, x: u32, z: u32, raw: u32) -> MosaicResult<bool> {
        let Some(index) = self.index(x, z) else {
            return Ok(false);
        };
        self.ensure_writable()?.set(index, raw);
        self.set_modified(true);
        Ok(true)
    }

    /// Reports a changed rectangle in tile-local samples.
    pub(crate) fn notify_changed(&self, x: u32, z: u32, size_x: u32, size_z: u32) {
        self.context.notify(TileNotice::Changed {
            coord: self.coord,
            x,
            z,
            size_x,
            size_z,
        });
    }

    fn ensure_writable(&mut self) -> MosaicResult<&mut TileData> {
        self.load()?;
        if self.data.is_none() {
            debug!("materializing tile ({}, {})", self.coord.x, self.coord.z);
            self.available = true;
            self.context.notify(TileNotice::Materialized { coord: self.coord });
        }
        let format = self.context.format;
        let len = self.sample_count();
        Ok(self
            .data
            .get_or_insert_with(|| TileData::filled(format.depth, len, format.fill_raw)))
    }

    fn set_modified(&mut self, modified: bool) {
        if self.modified != modified {
            self.modified = modified;
            self.context.notify(TileNotice::Modified {
                coord: self.coord,
                modified,
            });
        }
    }

    #[inline]
    fn index(&self, x: u32, z: u32) -> Option<usize> {
        let size = self.context.tile_size;
        (x < size && z < size).then(|| (z * size + x) as usize)
    }

    fn sample_count(&self) -> usize {
        let size = self.context.tile_size as usize;
        size * size
    }
}

impl MosaicTile for DataMosaicTile {
    fn from_seed(seed: TileSeed) -> Self {
        Self {
            coord: seed.coord,
            available: seed.available,
            context: seed.context,
            data: None,
            modified: false,
        }
    }

    fn coord(&self) -> TileCoord {
        self.coord
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn load(&mut self) -> MosaicResult<bool> {
        if self.data.is_some() || !self.available {
            return Ok(false);
        }
        let path = self.context.tile_path(self.coord);
        if self.context.codec.exists(&path) {
            let image = self.context.codec.load(&path)?;
            let data = TileData::from_image(&image, self.context.tile_size, &path)?;
            trace!("loaded tile {} as {:?}", path.display(), data.depth());
            self.data = Some(data);
        } else {
            debug!("tile image {} missing, using defaults", path.display());
            let format = self.context.format;
            self.data = Some(TileData::filled(format.depth, self.sample_count(), format.fill_raw));
            self.set_modified(true);
        }
        Ok(true)
    }

    fn save(&mut self, force: bool) -> MosaicResult<()> {
        if !self.modified && !force {
            return Ok(());
        }
        let Some(data) = &self.data else {
            return Ok(());
        };
        let path = self.context.tile_path(self.coord);
        self.context
            .codec
            .save(&path, &data.to_image(self.context.tile_size))?;
        trace!("saved tile {}", path.display());
        self.set_modified(false);
        Ok(())
    }
}

/// A mosaic of raw-sample tiles.
pub type DataMosaic = Mosaic<DataMosaicTile>;

impl Mosaic<DataMosaicTile> {
    /// Raw value and depth maximum of a sample, loading its tile on demand.
    /// Samples of unavailable tiles report the fill value.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn sample_raw(&mut self, x: i64, z: i64) -> MosaicResult<Option<(u32, u32)>> {
        let Some(ts) = self.sample_to_tile(x, z) else {
            return Ok(None);
        };
        let fill = self.context().format.fill_raw;
        let tile = self.tile_in_grid_mut(ts.tile)?;
        tile.load()?;
        let max = tile.depth().max_value();
        let raw = tile.raw(ts.x, ts.z).unwrap_or(fill.min(max));
        self.pump_notices();
        Ok(Some((raw, max)))
    }

    /// Normalized sample value, or `None` outside the grid.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn sample_normalized(&mut self, x: i64, z: i64) -> MosaicResult<Option<f64>> {
        Ok(self
            .sample_raw(x, z)?
            .map(|(raw, max)| f64::from(raw) / f64::from(max)))
    }

    /// Writes a raw sample. Returns `false` (and does nothing) outside the grid.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn set_sample_raw(&mut self, x: i64, z: i64, raw: u32) -> MosaicResult<bool> {
        let Some(ts) = self.sample_to_tile(x, z) else {
            return Ok(false);
        };
        let result = self.tile_in_grid_mut(ts.tile)?.set_raw(ts.x, ts.z, raw);
        self.pump_notices();
        result.map(|()| true)
    }

    /// Writes a normalized sample. Returns `false` outside the grid.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn set_sample_normalized(&mut self, x: i64, z: i64, value: f64) -> MosaicResult<bool> {
        let Some(ts) = self.sample_to_tile(x, z) else {
            return Ok(false);
        };
        let result = self
            .tile_in_grid_mut(ts.tile)?
            .set_data_normalized(ts.x, ts.z, value);
        self.pump_notices();
        result.map(|()| true)
    }

    /// Bilinear normalized value at a world position. `None` if the floor
    /// sample lies outside the grid; other missing corners read as zero.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn world_normalized(&mut self, x_m: f64, z_m: f64) -> MosaicResult<Option<f64>> {
        let pos = self.world_to_sample(x_m, z_m);
        let Some(base) = self.sample_normalized(pos.x, pos.z)? else {
            return Ok(None);
        };
        if pos.is_on_grid() {
            return Ok(Some(base));
        }
        let weights = pos.bilinear_weights();
        let corners = pos.corners();
        let mut value = weights[0] * base;
        for (w, (cx, cz)) in weights.iter().zip(corners).skip(1) {
            if *w > 0.0 {
                value += w * self.sample_normalized(cx, cz)?.unwrap_or(0.0);
            }
        }
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ImageCodec, MemoryCodec};
    use crate::config::MosaicConfig;
    use crate::description::{MosaicDescription, MosaicLayout};
    use crate::mosaic::{MosaicEvent, MosaicStorage};
    use crate::tile::TileFormat;

    fn layout(tiles: u32, size: u32) -> MosaicLayout {
        MosaicLayout {
            name: "data".to_owned(),
            mosaic_type: "Data".to_owned(),
            file_ext: "png".to_owned(),
            size_x_tiles: tiles,
            size_z_tiles: tiles,
            tile_size_samples: size,
            meters_per_sample: 1,
            min_height_m: 0.0,
            max_height_m: 1.0,
        }
    }

    fn memory_mosaic(tag: &str, desc: MosaicDescription, depth: SampleDepth) -> (DataMosaic, Arc<MemoryCodec>) {
        let codec = Arc::new(MemoryCodec::new());
        let root = std::env::temp_dir().join(format!("stratum_data_{tag}_{}", std::process::id()));
        let storage = MosaicStorage::in_memory(root, Arc::clone(&codec));
        let format = TileFormat { depth, fill_raw: 0 };
        (DataMosaic::new(desc, storage, format, &MosaicConfig::default()), codec)
    }

    #[test]
    fn test_depth_limits() {
        assert_eq!(SampleDepth::Bits8.max_value(), 255);
        assert_eq!(SampleDepth::Bits24.bytes_per_sample(), 3);
        let mut data = TileData::filled(SampleDepth::Bits24, 4, 0x0123_4567);
        assert_eq!(data.get(0), Some(0x00FF_FFFF));
        data.set(3, 0x00AB_CDEF);
        assert_eq!(data.get(3), Some(0x00AB_CDEF));
        assert_eq!(data.get(4), None);
    }

    #[test]
    fn test_image_rows_are_flipped() {
        // 2x2 image, top row is north: [n0 n1 / s0 s1].
        let image = RawImage {
            width: 2,
            height: 2,
            pixels: PixelData::L8(vec![10, 11, 20, 21]),
        };
        let data = TileData::from_image(&image, 2, Path::new("t.png")).unwrap();
        // Buffer row 0 is the southern row.
        assert_eq!(data, TileData::Bits8(vec![20, 21, 10, 11]));
        assert_eq!(data.to_image(2), image);
    }

    #[test]
    fn test_rgba_packs_little_endian() {
        let image = RawImage {
            width: 1,
            height: 1,
            pixels: PixelData::Rgba8(vec![1, 2, 3, 4]),
        };
        let data = TileData::from_image(&image, 1, Path::new("t.png")).unwrap();
        assert_eq!(data.get(0), Some(0x0403_0201));
        assert_eq!(data.to_image(1), image);
    }

    #[test]
    fn test_image_size_mismatch() {
        let image = RawImage {
            width: 4,
            height: 2,
            pixels: PixelData::L8(vec![0; 8]),
        };
        assert!(matches!(
            TileData::from_image(&image, 4, Path::new("t.png")),
            Err(MosaicError::TileSizeMismatch { expected: 4, width: 4, height: 2 })
        ));
    }

    #[test]
    fn test_unavailable_tile_materializes_on_write() {
        let desc = MosaicDescription::create(layout(2, 4)).unwrap();
        let (mut mosaic, codec) = memory_mosaic("materialize", desc, SampleDepth::Bits16);
        mosaic.save(false).unwrap();

        // Reading an unavailable tile neither loads nor dirties it.
        assert_eq!(mosaic.sample_raw(1, 1).unwrap(), Some((0, 0xFFFF)));
        assert_eq!(mosaic.loaded_tile_count(), 0);
        assert!(!mosaic.is_modified());

        assert!(mosaic.set_sample_normalized(1, 1, 1.0).unwrap());
        assert!(mosaic.description().is_tile_available(0, 0));
        assert!(mosaic.is_modified());
        assert_eq!(mosaic.sample_raw(1, 1).unwrap(), Some((0xFFFF, 0xFFFF)));

        mosaic.save(false).unwrap();
        assert!(!mosaic.is_modified());
        // Tile (0, 0) is the southern row, so its file is y1.
        assert_eq!(codec.len(), 1);
        let path = mosaic.context().tile_path(TileCoord::new(0, 0));
        assert!(path.ends_with("data_x0y1.png"));
        assert!(codec.exists(&path));
    }

    #[test]
    fn test_available_tile_without_file_loads_defaults_dirty() {
        let mut desc = MosaicDescription::create(layout(1, 2)).unwrap();
        desc.set_tile_available(0, 0, true);
        let (mut mosaic, _codec) = memory_mosaic("defaults", desc, SampleDepth::Bits8);
        mosaic.save(false).unwrap();
        assert!(!mosaic.is_modified());

        assert_eq!(mosaic.camera_moved(0.0, 0.0).unwrap(), 1);
        assert!(mosaic.is_modified());
        assert_eq!(mosaic.dirty_tiles().count(), 1);

        mosaic.save(false).unwrap();
        assert!(!mosaic.is_modified());
    }

    #[test]
    fn test_set_emits_one_by_one_change() {
        let desc = MosaicDescription::create(layout(2, 4)).unwrap();
        let (mut mosaic, _codec) = memory_mosaic("events", desc, SampleDepth::Bits8);
        let events = mosaic.subscribe();
        mosaic.set_sample_raw(5, 6, 7).unwrap();
        let changed: Vec<MosaicEvent> = events
            .try_iter()
            .filter(|e| matches!(e, MosaicEvent::TileChanged { .. }))
            .collect();
        assert_eq!(
            changed,
            vec![MosaicEvent::TileChanged {
                world_x_m: 1.0,
                world_z_m: 2.0,
                size_x_m: 1.0,
                size_z_m: 1.0,
            }]
        );
    }

    #[test]
    fn test_out_of_range_writes_are_ignored() {
        let desc = MosaicDescription::create(layout(1, 4)).unwrap();
        let (mut mosaic, _codec) = memory_mosaic("range", desc, SampleDepth::Bits8);
        assert!(!mosaic.set_sample_raw(-1, 0, 3).unwrap());
        assert!(!mosaic.set_sample_raw(0, 4, 3).unwrap());
        assert_eq!(mosaic.sample_raw(4, 0).unwrap(), None);
    }

    #[test]
    fn test_world_normalized_bilinear() {
        let desc = MosaicDescription::create(layout(1, 4)).unwrap();
        let (mut mosaic, _codec) = memory_mosaic("bilinear", desc, SampleDepth::Bits8);
        // Origin is (-2, -2); sample (1, 1) is at (-1, -1).
        mosaic.set_sample_raw(1, 1, 255).unwrap();
        mosaic.set_sample_raw(2, 1, 0).unwrap();
        let v = mosaic.world_normalized(-0.75, -1.0).unwrap().unwrap();
        assert!((v - 0.75).abs() < 1e-12);
        assert_eq!(mosaic.world_normalized(10.0, 0.0).unwrap(), None);
    }
}
