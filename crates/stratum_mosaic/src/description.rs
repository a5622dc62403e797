//! # Mosaic Description
//!
//! Immutable-after-load metadata for one raster dataset, persisted as a
//! line-oriented master file next to the tile images.
//!
//! ## Master File Format
//!
//! ```text
//! #MosaicName:\tterrain
//! #MosaicType:\tHeightfield
//! #FileExt:\tpng
//! #nPxlsX:\t1024
//! #nPxlsY:\t1024
//! #nMapsX:\t4
//! #nMapsY:\t4
//! #SubMapSize:\t256
//! #HorizScale:\t2
//! #WrapFlag:\t0
//! #UnifiedScale:\t1
//! #GlobalMinAlt:\t-100
//! #GlobalMaxAlt:\t900
//! #TileState:\t0\tOK
//! ...
//! #EOF
//! ```
//!
//! `TileState` indices are row-major starting at the *northern* row, so
//! index `i` names tile `x = i % nMapsX`, `z = nMapsY - 1 - i / nMapsX`.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{debug, trace};

use crate::error::{ensure_power_of_two, MosaicError, MosaicResult};

/// Extension of mosaic master files.
pub const MASTER_FILE_EXT: &str = "mmf";

/// Tile-state word for a tile whose image exists.
const TILE_OK: &str = "OK";

/// Tile-state word written for tiles that were never created.
const TILE_EMPTY: &str = "Empty";

/// Geometry of a brand-new dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct MosaicLayout {
    /// Dataset name (also the base name of its files).
    pub name: String,
    /// Free-form kind, e.g. `Heightfield` or `Texture`.
    pub mosaic_type: String,
    /// Tile image extension without the dot.
    pub file_ext: String,
    /// Tiles along X.
    pub size_x_tiles: u32,
    /// Tiles along Z.
    pub size_z_tiles: u32,
    /// Samples along one tile edge (power of two).
    pub tile_size_samples: u32,
    /// Meters between adjacent samples (power of two).
    pub meters_per_sample: u32,
    /// Height of normalized 0.0, in meters.
    pub min_height_m: f64,
    /// Height of normalized 1.0, in meters.
    pub max_height_m: f64,
}

/// Metadata for one mosaic dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct MosaicDescription {
    name: String,
    mosaic_type: String,
    file_ext: String,
    size_x_pixels: u32,
    size_z_pixels: u32,
    size_x_tiles: u32,
    size_z_tiles: u32,
    tile_size_samples: u32,
    tile_shift: u32,
    meters_per_sample: u32,
    meters_per_sample_shift: u32,
    wrap: bool,
    unified_scale: bool,
    global_min_height_m: f64,
    global_max_height_m: f64,
    /// Indexed `[z * size_x_tiles + x]`, world orientation.
    tile_available: Vec<bool>,
    modified: bool,
}

impl MosaicDescription {
    /// Describes a fresh dataset with no tiles on disk yet.
    ///
    /// The description starts out modified so that the first save writes it.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::NotPowerOfTwo`] for a bad tile size or sample
    /// spacing, and [`MosaicError::InvalidConfig`] for an empty grid.
    pub fn create(layout: MosaicLayout) -> MosaicResult<Self> {
        ensure_power_of_two("tile_size_samples", layout.tile_size_samples)?;
        ensure_power_of_two("meters_per_sample", layout.meters_per_sample)?;
        if layout.size_x_tiles == 0 || layout.size_z_tiles == 0 {
            return Err(MosaicError::InvalidConfig(format!(
                "mosaic {} has an empty tile grid",
                layout.name
            )));
        }

        let (size_x_pixels, size_z_pixels, tile_count) =
            grid_extent(layout.size_x_tiles, layout.size_z_tiles, layout.tile_size_samples).ok_or_else(|| {
                MosaicError::InvalidConfig(format!(
                    "mosaic {} grid of {}x{} tiles of {} samples is too large",
                    layout.name, layout.size_x_tiles, layout.size_z_tiles, layout.tile_size_samples
                ))
            })?;
        Ok(Self {
            size_x_pixels,
            size_z_pixels,
            tile_shift: layout.tile_size_samples.trailing_zeros(),
            meters_per_sample_shift: layout.meters_per_sample.trailing_zeros(),
            name: layout.name,
            mosaic_type: layout.mosaic_type,
            file_ext: layout.file_ext,
            size_x_tiles: layout.size_x_tiles,
            size_z_tiles: layout.size_z_tiles,
            tile_size_samples: layout.tile_size_samples,
            meters_per_sample: layout.meters_per_sample,
            wrap: false,
            unified_scale: true,
            global_min_height_m: layout.min_height_m,
            global_max_height_m: layout.max_height_m,
            tile_available: vec![false; tile_count],
            modified: true,
        })
    }

    /// Parses master-file text.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::MalformedMasterFile`] for unparseable lines or a
    /// missing `#EOF`, [`MosaicError::MissingMasterRecord`] for absent
    /// required records, and [`MosaicError::NotPowerOfTwo`] for bad geometry.
    pub fn parse(text: &str) -> MosaicResult<Self> {
        let mut fields = RawFields::default();
        let mut tile_states: Vec<(usize, usize, bool)> = Vec::new();
        let mut saw_eof = false;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if line.trim() == "#EOF" {
                saw_eof = true;
                break;
            }

            let Some(record) = line.strip_prefix('#') else {
                return Err(malformed(line_no, "record does not start with '#'"));
            };
            let Some((label, rest)) = record.split_once(':') else {
                return Err(malformed(line_no, "record has no ':' separator"));
            };
            let values: Vec<&str> = rest
                .split('\t')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .collect();
            let first = values.first().copied();

            match label.trim() {
                "MosaicName" => fields.name = first.map(str::to_owned),
                "MosaicType" => fields.mosaic_type = first.map(str::to_owned),
                "FileExt" => fields.file_ext = first.map(|v| v.trim_start_matches('.').to_owned()),
                "nPxlsX" => fields.size_x_pixels = Some(parse_u32(line_no, first)?),
                "nPxlsY" => fields.size_z_pixels = Some(parse_u32(line_no, first)?),
                "nMapsX" => fields.size_x_tiles = Some(parse_u32(line_no, first)?),
                "nMapsY" => fields.size_z_tiles = Some(parse_u32(line_no, first)?),
                "SubMapSize" => fields.tile_size_samples = Some(parse_u32(line_no, first)?),
                "HorizScale" => fields.meters_per_sample = Some(parse_u32(line_no, first)?),
                "WrapFlag" => fields.wrap = Some(parse_flag(line_no, first)?),
                "UnifiedScale" => fields.unified_scale = Some(parse_flag(line_no, first)?),
                "GlobalMinAlt" => fields.min_height_m = Some(parse_f64(line_no, first)?),
                "GlobalMaxAlt" => fields.max_height_m = Some(parse_f64(line_no, first)?),
                "TileState" => {
                    let index = parse_u32(line_no, first)? as usize;
                    let ok = values.get(1).is_some_and(|v| *v == TILE_OK);
                    tile_states.push((line_no, index, ok));
                }
                other => trace!("ignoring master-file record #{other} at line {line_no}"),
            }
        }

        if !saw_eof {
            return Err(malformed(0, "missing #EOF terminator"));
        }

        let size_x_tiles = fields.size_x_tiles.ok_or(MosaicError::MissingMasterRecord("nMapsX"))?;
        let size_z_tiles = fields.size_z_tiles.ok_or(MosaicError::MissingMasterRecord("nMapsY"))?;
        let tile_size_samples = fields
            .tile_size_samples
            .ok_or(MosaicError::MissingMasterRecord("SubMapSize"))?;
        let meters_per_sample = fields
            .meters_per_sample
            .ok_or(MosaicError::MissingMasterRecord("HorizScale"))?;
        ensure_power_of_two("tile_size_samples", tile_size_samples)?;
        ensure_power_of_two("meters_per_sample", meters_per_sample)?;
        if size_x_tiles == 0 || size_z_tiles == 0 {
            return Err(malformed(0, "tile grid is empty"));
        }

        let (size_x_pixels, size_z_pixels, tile_count) = grid_extent(size_x_tiles, size_z_tiles, tile_size_samples)
            .ok_or_else(|| {
                malformed(
                    0,
                    &format!("{size_x_tiles}x{size_z_tiles} tiles of {tile_size_samples} samples overflow the grid"),
                )
            })?;

        let mut tile_available = vec![false; tile_count];
        for (line_no, index, ok) in tile_states {
            if index >= tile_available.len() {
                return Err(malformed(
                    line_no,
                    &format!("tile index {index} outside a {size_x_tiles}x{size_z_tiles} grid"),
                ));
            }
            let (x, z) = master_index_to_tile(index, size_x_tiles, size_z_tiles);
            tile_available[(z * size_x_tiles + x) as usize] = ok;
        }

        Ok(Self {
            name: fields.name.ok_or(MosaicError::MissingMasterRecord("MosaicName"))?,
            mosaic_type: fields.mosaic_type.unwrap_or_default(),
            file_ext: fields.file_ext.ok_or(MosaicError::MissingMasterRecord("FileExt"))?,
            size_x_pixels: fields.size_x_pixels.unwrap_or(size_x_pixels),
            size_z_pixels: fields.size_z_pixels.unwrap_or(size_z_pixels),
            size_x_tiles,
            size_z_tiles,
            tile_size_samples,
            tile_shift: tile_size_samples.trailing_zeros(),
            meters_per_sample,
            meters_per_sample_shift: meters_per_sample.trailing_zeros(),
            wrap: fields.wrap.unwrap_or(false),
            unified_scale: fields.unified_scale.unwrap_or(true),
            global_min_height_m: fields.min_height_m.unwrap_or(0.0),
            global_max_height_m: fields.max_height_m.unwrap_or(0.0),
            tile_available,
            modified: false,
        })
    }

    /// Reads and parses a master file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or any error from
    /// [`MosaicDescription::parse`].
    pub fn load(path: impl AsRef<Path>) -> MosaicResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| MosaicError::io(path, e))?;
        let desc = Self::parse(&text)?;
        debug!(
            "loaded mosaic {} ({}x{} tiles of {} samples, {} m/sample)",
            desc.name, desc.size_x_tiles, desc.size_z_tiles, desc.tile_size_samples, desc.meters_per_sample
        );
        Ok(desc)
    }

    /// Renders the master-file text.
    #[must_use]
    pub fn to_master_text(&self) -> String {
        let mut out = String::with_capacity(256 + self.tile_available.len() * 16);
        // Writing to a String cannot fail.
        let _ = writeln!(out, "#MosaicName:\t{}", self.name);
        let _ = writeln!(out, "#MosaicType:\t{}", self.mosaic_type);
        let _ = writeln!(out, "#FileExt:\t{}", self.file_ext);
        let _ = writeln!(out, "#nPxlsX:\t{}", self.size_x_pixels);
        let _ = writeln!(out, "#nPxlsY:\t{}", self.size_z_pixels);
        let _ = writeln!(out, "#nMapsX:\t{}", self.size_x_tiles);
        let _ = writeln!(out, "#nMapsY:\t{}", self.size_z_tiles);
        let _ = writeln!(out, "#SubMapSize:\t{}", self.tile_size_samples);
        let _ = writeln!(out, "#HorizScale:\t{}", self.meters_per_sample);
        let _ = writeln!(out, "#WrapFlag:\t{}", u8::from(self.wrap));
        let _ = writeln!(out, "#UnifiedScale:\t{}", u8::from(self.unified_scale));
        let _ = writeln!(out, "#GlobalMinAlt:\t{}", self.global_min_height_m);
        let _ = writeln!(out, "#GlobalMaxAlt:\t{}", self.global_max_height_m);
        for index in 0..self.tile_available.len() {
            let (x, z) = master_index_to_tile(index, self.size_x_tiles, self.size_z_tiles);
            let state = if self.is_tile_available(x, z) { TILE_OK } else { TILE_EMPTY };
            let _ = writeln!(out, "#TileState:\t{index}\t{state}");
        }
        out.push_str("#EOF\n");
        out
    }

    /// Writes the master file and clears the modified flag.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn save(&mut self, path: impl AsRef<Path>) -> MosaicResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MosaicError::io(parent, e))?;
        }
        std::fs::write(path, self.to_master_text()).map_err(|e| MosaicError::io(path, e))?;
        self.modified = false;
        debug!("saved master file for mosaic {} to {}", self.name, path.display());
        Ok(())
    }

    /// Dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dataset kind.
    #[must_use]
    pub fn mosaic_type(&self) -> &str {
        &self.mosaic_type
    }

    /// Tile image extension.
    #[must_use]
    pub fn file_ext(&self) -> &str {
        &self.file_ext
    }

    /// Dataset width in samples.
    #[inline]
    #[must_use]
    pub const fn size_x_pixels(&self) -> u32 {
        self.size_x_pixels
    }

    /// Dataset depth in samples.
    #[inline]
    #[must_use]
    pub const fn size_z_pixels(&self) -> u32 {
        self.size_z_pixels
    }

    /// Tiles along X.
    #[inline]
    #[must_use]
    pub const fn size_x_tiles(&self) -> u32 {
        self.size_x_tiles
    }

    /// Tiles along Z.
    #[inline]
    #[must_use]
    pub const fn size_z_tiles(&self) -> u32 {
        self.size_z_tiles
    }

    /// Samples along one tile edge.
    #[inline]
    #[must_use]
    pub const fn tile_size_samples(&self) -> u32 {
        self.tile_size_samples
    }

    /// `log2(tile_size_samples)`.
    #[inline]
    #[must_use]
    pub const fn tile_shift(&self) -> u32 {
        self.tile_shift
    }

    /// `tile_size_samples - 1`.
    #[inline]
    #[must_use]
    pub const fn tile_mask(&self) -> u32 {
        self.tile_size_samples - 1
    }

    /// Meters between adjacent samples.
    #[inline]
    #[must_use]
    pub const fn meters_per_sample(&self) -> u32 {
        self.meters_per_sample
    }

    /// `log2(meters_per_sample)`.
    #[inline]
    #[must_use]
    pub const fn meters_per_sample_shift(&self) -> u32 {
        self.meters_per_sample_shift
    }

    /// Whether the dataset wraps around at its edges.
    #[inline]
    #[must_use]
    pub const fn wrap(&self) -> bool {
        self.wrap
    }

    /// Whether all tiles share the global height range.
    #[inline]
    #[must_use]
    pub const fn unified_scale(&self) -> bool {
        self.unified_scale
    }

    /// Height of normalized 0.0, in meters.
    #[inline]
    #[must_use]
    pub const fn global_min_height_m(&self) -> f64 {
        self.global_min_height_m
    }

    /// Height of normalized 1.0, in meters.
    #[inline]
    #[must_use]
    pub const fn global_max_height_m(&self) -> f64 {
        self.global_max_height_m
    }

    /// True if the description changed since it was loaded or saved.
    #[inline]
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.modified
    }

    /// True if the tile's image exists. Out-of-grid tiles are unavailable.
    #[must_use]
    pub fn is_tile_available(&self, x: u32, z: u32) -> bool {
        x < self.size_x_tiles
            && z < self.size_z_tiles
            && self.tile_available[(z * self.size_x_tiles + x) as usize]
    }

    /// Number of tiles marked available.
    #[must_use]
    pub fn available_tile_count(&self) -> usize {
        self.tile_available.iter().filter(|ok| **ok).count()
    }

    /// Sets the wrap flag.
    pub fn set_wrap(&mut self, wrap: bool) {
        if self.wrap != wrap {
            self.wrap = wrap;
            self.modified = true;
        }
    }

    /// Sets the height of normalized 0.0.
    pub fn set_global_min_height_m(&mut self, meters: f64) {
        if (self.global_min_height_m - meters).abs() > f64::EPSILON {
            self.global_min_height_m = meters;
            self.modified = true;
        }
    }

    /// Sets the height of normalized 1.0.
    pub fn set_global_max_height_m(&mut self, meters: f64) {
        if (self.global_max_height_m - meters).abs() > f64::EPSILON {
            self.global_max_height_m = meters;
            self.modified = true;
        }
    }

    /// Marks a tile as existing (or not). Out-of-grid coordinates are ignored.
    pub fn set_tile_available(&mut self, x: u32, z: u32, available: bool) {
        if x >= self.size_x_tiles || z >= self.size_z_tiles {
            return;
        }
        let slot = &mut self.tile_available[(z * self.size_x_tiles + x) as usize];
        if *slot != available {
            *slot = available;
            self.modified = true;
        }
    }

    /// Z index as used in file names (south is the last row).
    #[inline]
    #[must_use]
    pub const fn flipped_tile_z(&self, z: u32) -> u32 {
        self.size_z_tiles - 1 - z
    }
}

/// Maps a master-file tile index to world-oriented tile coordinates.
#[inline]
#[must_use]
pub const fn master_index_to_tile(index: usize, size_x_tiles: u32, size_z_tiles: u32) -> (u32, u32) {
    let x = (index % size_x_tiles as usize) as u32;
    let z = size_z_tiles - 1 - (index / size_x_tiles as usize) as u32;
    (x, z)
}

#[derive(Default)]
struct RawFields {
    name: Option<String>,
    mosaic_type: Option<String>,
    file_ext: Option<String>,
    size_x_pixels: Option<u32>,
    size_z_pixels: Option<u32>,
    size_x_tiles: Option<u32>,
    size_z_tiles: Option<u32>,
    tile_size_samples: Option<u32>,
    meters_per_sample: Option<u32>,
    wrap: Option<bool>,
    unified_scale: Option<bool>,
    min_height_m: Option<f64>,
    max_height_m: Option<f64>,
}

/// Pixel extents and tile count of a grid, or `None` if a product overflows.
fn grid_extent(size_x_tiles: u32, size_z_tiles: u32, tile_size_samples: u32) -> Option<(u32, u32, usize)> {
    let size_x_pixels = size_x_tiles.checked_mul(tile_size_samples)?;
    let size_z_pixels = size_z_tiles.checked_mul(tile_size_samples)?;
    let tile_count = size_x_tiles.checked_mul(size_z_tiles)?;
    Some((size_x_pixels, size_z_pixels, tile_count as usize))
}

fn malformed(line: usize, reason: &str) -> MosaicError {
    MosaicError::MalformedMasterFile {
        line,
        reason: reason.to_owned(),
    }
}

fn parse_u32(line: usize, value: Option<&str>) -> MosaicResult<u32> {
    let value = value.ok_or_else(|| malformed(line, "record has no value"))?;
    if let Ok(v) = value.parse::<u32>() {
        return Ok(v);
    }
    // Some writers emit integral values as floats ("2.0").
    match value.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= f64::from(u32::MAX) => Ok(v as u32),
        _ => Err(malformed(line, &format!("expected an unsigned integer, got {value:?}"))),
    }
}

fn parse_f64(line: usize, value: Option<&str>) -> MosaicResult<f64> {
    let value = value.ok_or_else(|| malformed(line, "record has no value"))?;
    value
        .parse::<f64>()
        .map_err(|_| malformed(line, &format!("expected a number, got {value:?}")))
}

fn parse_flag(line: usize, value: Option<&str>) -> MosaicResult<bool> {
    let value = value.ok_or_else(|| malformed(line, "record has no value"))?;
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(malformed(line, &format!("expected a flag, got {value:?}"))),
    }
}
