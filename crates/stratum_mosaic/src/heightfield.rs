//! # Heightfield Mosaic
//!
//! Height semantics on top of a [`DataMosaic`]: raw samples map linearly onto
//! the description's global height range, reported in millimeters.
//!
//! ## Edits
//!
//! - On-grid writes touch exactly one sample.
//! - Off-grid writes spread the height difference over the four surrounding
//!   samples so that the bilinear re-read lands on the requested value.
//! - Resampled delta grids are splatted with bilinear weights and normalized
//!   by the accumulated weight of each backing sample.
//! - Writes outside the dataset are dropped; reads outside it return the
//!   configured default height.

use std::collections::HashMap;

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::config::MosaicConfig;
use crate::data::{DataMosaic, SampleDepth};
use crate::description::{MosaicDescription, MosaicLayout};
use crate::error::MosaicResult;
use crate::mosaic::{MosaicEvent, MosaicStorage, SamplePos};
use crate::tile::{MosaicTile, TileCoord, TileFormat};

/// Millimeters per meter.
pub const MM_PER_M: f64 = 1000.0;

/// A height dataset.
#[derive(Debug)]
pub struct HeightfieldMosaic {
    mosaic: DataMosaic,
    default_height_mm: f32,
}

impl HeightfieldMosaic {
    /// Creates an empty heightfield. Fresh tiles are 16-bit and start at
    /// the configured default height.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::NotPowerOfTwo`](crate::MosaicError::NotPowerOfTwo)
    /// for bad geometry.
    pub fn create(layout: MosaicLayout, storage: MosaicStorage, config: &MosaicConfig) -> MosaicResult<Self> {
        let desc = MosaicDescription::create(layout)?;
        Ok(Self::from_description(desc, storage, config))
    }

    /// Opens a persisted heightfield.
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
        let depth = SampleDepth::Bits16;
        let fill_raw = height_to_raw(
            f64::from(config.default_height_mm) / MM_PER_M,
            desc.global_min_height_m(),
            desc.global_max_height_m(),
            depth.max_value(),
        );
        let format = TileFormat { depth, fill_raw };
        Self {
            mosaic: DataMosaic::new(desc, storage, format, config),
            default_height_mm: config.default_height_mm,
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

    /// Dataset metadata.
    #[must_use]
    pub const fn description(&self) -> &MosaicDescription {
        self.mosaic.description()
    }

    /// Height reported outside the dataset.
    #[must_use]
    pub const fn default_height_mm(&self) -> f32 {
        self.default_height_mm
    }

    /// Meters between samples.
    #[must_use]
    pub fn meters_per_sample(&self) -> u32 {
        self.description().meters_per_sample()
    }

    /// Forwards a camera move to the streaming layer.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn camera_moved(&mut self, x_m: f64, z_m: f64) -> MosaicResult<usize> {
        self.mosaic.camera_moved(x_m, z_m)
    }

    /// Aggregate modified flag.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.mosaic.is_modified()
    }

    /// Saves the description and dirty (or all) tiles.
    ///
    /// # Errors
    ///
    /// Returns I/O or codec errors.
    pub fn save(&mut self, force: bool) -> MosaicResult<()> {
        self.mosaic.save(force)
    }

    /// Listens for change events.
    pub fn subscribe(&mut self) -> Receiver<MosaicEvent> {
        self.mosaic.subscribe()
    }

    /// Changes the height range. Existing raw samples are reinterpreted.
    pub fn set_height_range_m(&mut self, min_m: f64, max_m: f64) {
        let desc = self.mosaic.description_mut();
        desc.set_global_min_height_m(min_m);
        desc.set_global_max_height_m(max_m);
        self.mosaic.pump_notices();
    }

    /// Height of one sample. Outside the dataset this is the default height.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn sample_height_mm(&mut self, x: i64, z: i64) -> MosaicResult<f32> {
        Ok(self
            .sample_height_m(x, z)?
            .map_or(self.default_height_mm, |m| (m * MM_PER_M) as f32))
    }

    /// Sets one sample. Outside the dataset the write is ignored.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn set_sample_height_mm(&mut self, x: i64, z: i64, height_mm: f32) -> MosaicResult<()> {
        self.set_sample_height_m(x, z, f64::from(height_mm) / MM_PER_M)
    }

    /// Height at a world position: the sample itself on-grid, bilinear otherwise.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn world_height_mm(&mut self, x_m: f64, z_m: f64) -> MosaicResult<f32> {
        let pos = self.mosaic.world_to_sample(x_m, z_m);
        if pos.is_on_grid() {
            return self.sample_height_mm(pos.x, pos.z);
        }
        let mut height_m = 0.0;
        for (w, (cx, cz)) in pos.bilinear_weights().into_iter().zip(pos.corners()) {
            if w > 0.0 {
                height_m += w * self.sample_height_or_default_m(cx, cz)?;
            }
        }
        Ok((height_m * MM_PER_M) as f32)
    }

    /// Sets the height at a world position.
    ///
    /// Off-grid, the difference to the current bilinear height is spread over
    /// the four corners in proportion to their weights.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn set_world_height_mm(&mut self, x_m: f64, z_m: f64, height_mm: f32) -> MosaicResult<()> {
        let pos = self.mosaic.world_to_sample(x_m, z_m);
        if pos.is_on_grid() {
            return self.set_sample_height_mm(pos.x, pos.z, height_mm);
        }
        let current_mm = f64::from(self.world_height_mm(x_m, z_m)?);
        self.distribute_m(pos, (f64::from(height_mm) - current_mm) / MM_PER_M)
    }

    /// Raises (or lowers) the height at a world position by `delta_mm`.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn adjust_world_height_mm(&mut self, x_m: f64, z_m: f64, delta_mm: f32) -> MosaicResult<()> {
        let pos = self.mosaic.world_to_sample(x_m, z_m);
        let delta_m = f64::from(delta_mm) / MM_PER_M;
        if pos.is_on_grid() {
            if let Some(current) = self.sample_height_m(pos.x, pos.z)? {
                self.set_sample_height_m(pos.x, pos.z, current + delta_m)?;
            }
            return Ok(());
        }
        self.distribute_m(pos, delta_m)
    }

    /// Applies a grid of height deltas to the dataset.
    ///
    /// Delta `(i, j)` (row-major, `width` per row) sits at world
    /// `(x_m + i * spacing_m, z_m + j * spacing_m)`. Each delta is splatted onto
    /// the four surrounding backing samples with bilinear weights; every
    /// touched sample then moves by its weighted average delta.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn adjust_world_samples_mm(
        &mut self,
        x_m: f64,
        z_m: f64,
        spacing_m: f64,
        width: usize,
        deltas_mm: &[f32],
    ) -> MosaicResult<()> {
        if width == 0 || deltas_mm.is_empty() {
            return Ok(());
        }
        let rows = deltas_mm.len().div_ceil(width);
        let first = self.mosaic.world_to_sample(x_m, z_m);
        let last = self.mosaic.world_to_sample(
            x_m + (width - 1) as f64 * spacing_m,
            z_m + (rows - 1) as f64 * spacing_m,
        );
        let (x0, z0) = (first.x.min(last.x), first.z.min(last.z));
        let grid_w = (first.x.max(last.x) - x0 + 2) as usize;
        let grid_h = (first.z.max(last.z) - z0 + 2) as usize;

        // (weighted delta sum, weight sum) per backing sample.
        let mut accum = vec![(0.0_f64, 0.0_f64); grid_w * grid_h];
        for (i, delta_mm) in deltas_mm.iter().enumerate() {
            let wx = x_m + (i % width) as f64 * spacing_m;
            let wz = z_m + (i / width) as f64 * spacing_m;
            let pos = self.mosaic.world_to_sample(wx, wz);
            let delta_m = f64::from(*delta_mm) / MM_PER_M;
            for (w, (cx, cz)) in pos.bilinear_weights().into_iter().zip(pos.corners()) {
                if w <= 0.0 {
                    continue;
                }
                let (gx, gz) = (cx - x0, cz - z0);
                if gx < 0 || gz < 0 || gx as usize >= grid_w || gz as usize >= grid_h {
                    continue;
                }
                let cell = &mut accum[gz as usize * grid_w + gx as usize];
                cell.0 += w * delta_m;
                cell.1 += w;
            }
        }

        let mut touched: HashMap<TileCoord, (u32, u32, u32, u32)> = HashMap::new();
        let (min_m, max_m) = self.height_range_m();
        let fill_raw = self.mosaic.context().format.fill_raw;
        for (index, (sum, weight)) in accum.into_iter().enumerate() {
            if weight <= 0.0 {
                continue;
            }
            let sx = x0 + (index % grid_w) as i64;
            let sz = z0 + (index / grid_w) as i64;
            let Some(ts) = self.mosaic.sample_to_tile(sx, sz) else {
                continue;
            };
            let tile = self.mosaic.tile_in_grid_mut(ts.tile)?;
            tile.load()?;
            let max_value = tile.depth().max_value();
            let current_raw = tile.raw(ts.x, ts.z).unwrap_or(fill_raw.min(max_value));
            let current_m = raw_to_height(current_raw, min_m, max_m, max_value);
            let raw = height_to_raw(current_m + sum / weight, min_m, max_m, max_value);
            tile.write_raw(ts.x, ts.z, raw)?;
            touched
                .entry(ts.tile)
                .and_modify(|r| {
                    r.0 = r.0.min(ts.x);
                    r.1 = r.1.min(ts.z);
                    r.2 = r.2.max(ts.x);
                    r.3 = r.3.max(ts.z);
                })
                .or_insert((ts.x, ts.z, ts.x, ts.z));
        }

        for (coord, (lx0, lz0, lx1, lz1)) in &touched {
            if let Some(tile) = self.mosaic.tile(*coord) {
                tile.notify_changed(*lx0, *lz0, lx1 - lx0 + 1, lz1 - lz0 + 1);
            }
        }
        self.mosaic.pump_notices();
        debug!(
            "applied {}x{} height deltas across {} tiles",
            width,
            rows,
            touched.len()
        );
        Ok(())
    }

    /// Lowest and highest sample height over a world rectangle, in millimeters.
    /// Samples outside the dataset count as the default height.
    ///
    /// # Errors
    ///
    /// Returns tile load errors.
    pub fn world_height_range(
        &mut self,
        x_m: f64,
        z_m: f64,
        size_x_m: f64,
        size_z_m: f64,
    ) -> MosaicResult<(f32, f32)> {
        let a = self.mosaic.world_to_sample(x_m, z_m);
        let b = self.mosaic.world_to_sample(x_m + size_x_m.max(0.0), z_m + size_z_m.max(0.0));
        let x1 = if b.fx > 0.0 { b.x + 1 } else { b.x };
        let z1 = if b.fz > 0.0 { b.z + 1 } else { b.z };

        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for sz in a.z..=z1 {
            for sx in a.x..=x1 {
                let h = self.sample_height_mm(sx, sz)?;
                lo = lo.min(h);
                hi = hi.max(h);
            }
        }
        Ok((lo, hi))
    }

    /// `(min, max)` of the global height range in meters.
    #[must_use]
    pub fn height_range_m(&self) -> (f64, f64) {
        let desc = self.description();
        (desc.global_min_height_m(), desc.global_max_height_m())
    }

    fn sample_height_m(&mut self, x: i64, z: i64) -> MosaicResult<Option<f64>> {
        let (min, max) = self.height_range_m();
        Ok(self
            .mosaic
            .sample_raw(x, z)?
            .map(|(raw, max_value)| raw_to_height(raw, min, max, max_value)))
    }

    fn sample_height_or_default_m(&mut self, x: i64, z: i64) -> MosaicResult<f64> {
        Ok(self
            .sample_height_m(x, z)?
            .unwrap_or(f64::from(self.default_height_mm) / MM_PER_M))
    }

    fn set_sample_height_m(&mut self, x: i64, z: i64, height_m: f64) -> MosaicResult<()> {
        let Some(ts) = self.mosaic.sample_to_tile(x, z) else {
            return Ok(());
        };
        let (min, max) = self.height_range_m();
        let tile = self.mosaic.tile_in_grid_mut(ts.tile)?;
        let raw = height_to_raw(height_m, min, max, tile.depth().max_value());
        let result = tile.set_raw(ts.x, ts.z, raw);
        self.mosaic.pump_notices();
        result
    }

    /// Spreads `delta_m` over the corners of `pos` as `w_i * d / sum(w^2)`,
    /// which moves the bilinear value at `pos` by exactly `delta_m`.
    fn distribute_m(&mut self, pos: SamplePos, delta_m: f64) -> MosaicResult<()> {
        let weights = pos.bilinear_weights();
        let norm: f64 = weights.iter().map(|w| w * w).sum();
        if norm <= 0.0 {
            return Ok(());
        }
        for (w, (cx, cz)) in weights.into_iter().zip(pos.corners()) {
            if w <= 0.0 {
                continue;
            }
            if let Some(current) = self.sample_height_m(cx, cz)? {
                self.set_sample_height_m(cx, cz, current + w * delta_m / norm)?;
            }
        }
        Ok(())
    }
}

/// Raw sample to meters: `min + raw * (max - min) / max_value`.
#[inline]
#[must_use]
pub fn raw_to_height(raw: u32, min_m: f64, max_m: f64, max_value: u32) -> f64 {
    min_m + f64::from(raw) * (max_m - min_m) / f64::from(max_value)
}

/// Meters to the nearest raw sample, clamped to `[0, max_value]`.
#[inline]
#[must_use]
pub fn height_to_raw(height_m: f64, min_m: f64, max_m: f64, max_value: u32) -> u32 {
    let span = max_m - min_m;
    if span <= 0.0 {
        return 0;
    }
    let raw = ((height_m - min_m) / span * f64::from(max_value)).round();
    raw.clamp(0.0, f64::from(max_value)) as u32
}
