//! # Page Height Maps
//!
//! A per-page cache of height samples used for meshing, collision and
//! culling bounds.
//!
//! ## Structure
//!
//! ```text
//! PageHeightMap (page_size x page_size meters)
//! ┌────────┬────────┬────────┬────────┐
//! │ sub 0,3│        │        │        │   each sub-page has its own
//! ├────────┼────────┼────────┼────────┤   meters_per_sample and keeps
//! │        │        │        │        │   (size / mps + 1)^2 samples,
//! ├────────┼────────┼────────┼────────┤   edge samples included
//! │        │        │        │        │
//! ├────────┼────────┼────────┼────────┤
//! │ sub 0,0│        │        │ sub 3,0│
//! └────────┴────────┴────────┴────────┘
//! ```
//!
//! Page-local coordinates run over `[0, page_size)`. Queries that must look
//! past the page edge (normals, stitch vertices) ask the [`HeightSource`]
//! instead of the cache.

use stratum_mosaic::HeightfieldMosaic;
use tracing::trace;

use crate::coord::PageCoord;
use crate::error::{ensure_power_of_two, PagingError, PagingResult};

/// Something that can produce a height anywhere in the world.
pub trait HeightSource {
    /// Height in millimeters at a world position in meters.
    ///
    /// # Errors
    ///
    /// Returns whatever the backing store fails with.
    fn height_mm(&mut self, x_m: f64, z_m: f64) -> PagingResult<f32>;
}

impl HeightSource for HeightfieldMosaic {
    fn height_mm(&mut self, x_m: f64, z_m: f64) -> PagingResult<f32> {
        Ok(self.world_height_mm(x_m, z_m)?)
    }
}

/// The same height everywhere.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlatHeightSource {
    /// Height in millimeters.
    pub height_mm: f32,
}

impl HeightSource for FlatHeightSource {
    fn height_mm(&mut self, _: f64, _: f64) -> PagingResult<f32> {
        Ok(self.height_mm)
    }
}

/// Wraps a closure `(x_m, z_m) -> height_mm` as a [`HeightSource`].
#[derive(Clone, Copy, Debug)]
pub struct HeightFn<F>(pub F);

impl<F: FnMut(f64, f64) -> f32> HeightSource for HeightFn<F> {
    fn height_mm(&mut self, x_m: f64, z_m: f64) -> PagingResult<f32> {
        Ok((self.0)(x_m, z_m))
    }
}

/// Cached samples for one sub-page.
///
/// A resolution change is held as pending until the next fill, so reads in
/// between keep answering from the previous samples.
#[derive(Clone, Debug)]
pub struct SubPageHeightMap {
    origin_m: (f64, f64),
    size_m: f64,
    meters_per_sample: f64,
    samples_per_side: usize,
    pending_meters_per_sample: Option<f64>,
    heights: Vec<f32>,
    valid: bool,
}

impl SubPageHeightMap {
    fn new(origin_m: (f64, f64), size_m: f64, meters_per_sample: u32) -> Self {
        let mps = f64::from(meters_per_sample).min(size_m);
        Self {
            origin_m,
            size_m,
            meters_per_sample: mps,
            samples_per_side: samples_for(size_m, mps),
            pending_meters_per_sample: None,
            heights: Vec::new(),
            valid: false,
        }
    }

    /// Spacing the next fill will use.
    fn target_meters_per_sample(&self) -> f64 {
        self.pending_meters_per_sample.unwrap_or(self.meters_per_sample)
    }

    /// Returns true if the resolution changed.
    fn set_resolution(&mut self, meters_per_sample: u32) -> bool {
        let mps = f64::from(meters_per_sample).min(self.size_m);
        if (mps - self.target_meters_per_sample()).abs() < f64::EPSILON {
            return false;
        }
        self.pending_meters_per_sample = Some(mps);
        self.valid = false;
        true
    }

    /// Page-local position of the south-west corner.
    #[must_use]
    pub const fn origin_m(&self) -> (f64, f64) {
        self.origin_m
    }

    /// Sample spacing in meters.
    #[must_use]
    pub const fn meters_per_sample(&self) -> f64 {
        self.meters_per_sample
    }

    /// Samples per side, both edges included.
    #[must_use]
    pub const fn samples_per_side(&self) -> usize {
        self.samples_per_side
    }

    /// True when the samples reflect the source.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    fn fill(&mut self, page_origin_m: (f64, f64), source: &mut dyn HeightSource) -> PagingResult<()> {
        let mps = self.target_meters_per_sample();
        let n = samples_for(self.size_m, mps);
        let mut heights = Vec::with_capacity(n * n);
        for j in 0..n {
            for i in 0..n {
                let x = page_origin_m.0 + self.origin_m.0 + i as f64 * mps;
                let z = page_origin_m.1 + self.origin_m.1 + j as f64 * mps;
                heights.push(source.height_mm(x, z)?);
            }
        }
        self.heights = heights;
        self.meters_per_sample = mps;
        self.samples_per_side = n;
        self.pending_meters_per_sample = None;
        self.valid = true;
        Ok(())
    }

    fn sample(&self, i: usize, j: usize) -> f32 {
        self.heights.get(j * self.samples_per_side + i).copied().unwrap_or(0.0)
    }

    /// Bilinear height at a page-local position inside this sub-page.
    fn interpolate(&self, x: f64, z: f64) -> f32 {
        let last = self.samples_per_side - 2;
        let u = ((x - self.origin_m.0) / self.meters_per_sample).max(0.0);
        let v = ((z - self.origin_m.1) / self.meters_per_sample).max(0.0);
        let i = (u.floor() as usize).min(last);
        let j = (v.floor() as usize).min(last);
        let fx = (u - i as f64).clamp(0.0, 1.0);
        let fz = (v - j as f64).clamp(0.0, 1.0);
        let h = [
            self.sample(i, j),
            self.sample(i + 1, j),
            self.sample(i, j + 1),
            self.sample(i + 1, j + 1),
        ]
        .map(f64::from);
        let south = h[0] * (1.0 - fx) + h[1] * fx;
        let north = h[2] * (1.0 - fx) + h[3] * fx;
        (south * (1.0 - fz) + north * fz) as f32
    }

    fn overlaps(&self, x0: f64, z0: f64, x1: f64, z1: f64) -> bool {
        let (ox, oz) = self.origin_m;
        x0 <= ox + self.size_m && x1 >= ox && z0 <= oz + self.size_m && z1 >= oz
    }
}

fn samples_for(size_m: f64, meters_per_sample: f64) -> usize {
    (size_m / meters_per_sample).round() as usize + 1
}

/// Height cache for one page.
#[derive(Clone, Debug)]
pub struct PageHeightMap {
    coord: PageCoord,
    origin_m: (f64, f64),
    page_size_m: f64,
    sub_pages_per_side: u32,
    sub_pages: Vec<SubPageHeightMap>,
}

impl PageHeightMap {
    /// Builds and fills the cache for `coord`.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NotPowerOfTwo`] for a bad subdivision or
    /// resolution, and any error the source raises while filling.
    pub fn new(
        coord: PageCoord,
        page_size_m: u32,
        sub_pages_per_side: u32,
        meters_per_sample: u32,
        source: &mut dyn HeightSource,
    ) -> PagingResult<Self> {
        ensure_power_of_two("page_size_m", page_size_m)?;
        ensure_power_of_two("sub_pages_per_page", sub_pages_per_side)?;
        ensure_power_of_two("meters_per_sample", meters_per_sample)?;
        let size = f64::from(page_size_m);
        let sub_size = size / f64::from(sub_pages_per_side);
        let mut sub_pages = Vec::with_capacity((sub_pages_per_side * sub_pages_per_side) as usize);
        for sz in 0..sub_pages_per_side {
            for sx in 0..sub_pages_per_side {
                let origin = (f64::from(sx) * sub_size, f64::from(sz) * sub_size);
                sub_pages.push(SubPageHeightMap::new(origin, sub_size, meters_per_sample));
            }
        }
        let mut map = Self {
            coord,
            origin_m: coord.origin_m(size),
            page_size_m: size,
            sub_pages_per_side,
            sub_pages,
        };
        map.refresh(source)?;
        Ok(map)
    }

    /// Page this cache belongs to.
    #[must_use]
    pub const fn coord(&self) -> PageCoord {
        self.coord
    }

    /// World position of the page's south-west corner.
    #[must_use]
    pub const fn origin_m(&self) -> (f64, f64) {
        self.origin_m
    }

    /// Page edge in meters.
    #[must_use]
    pub const fn page_size_m(&self) -> f64 {
        self.page_size_m
    }

    /// Sub-page at grid position `(sx, sz)`.
    #[must_use]
    pub fn sub_page(&self, sx: u32, sz: u32) -> Option<&SubPageHeightMap> {
        (sx < self.sub_pages_per_side && sz < self.sub_pages_per_side)
            .then(|| &self.sub_pages[(sz * self.sub_pages_per_side + sx) as usize])
    }

    /// Number of sub-pages whose samples are stale.
    #[must_use]
    pub fn invalid_sub_pages(&self) -> usize {
        self.sub_pages.iter().filter(|s| !s.valid).count()
    }

    /// Changes one sub-page's resolution. Returns true if it changed, in
    /// which case the sub-page is stale until the next [`Self::refresh`].
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NotPowerOfTwo`] for a bad resolution and
    /// [`PagingError::UnknownTile`] for a bad sub-page index.
    pub fn set_sub_page_meters_per_sample(&mut self, sx: u32, sz: u32, meters_per_sample: u32) -> PagingResult<bool> {
        ensure_power_of_two("meters_per_sample", meters_per_sample)?;
        let n = self.sub_pages_per_side;
        if sx >= n || sz >= n {
            return Err(PagingError::UnknownTile {
                x: sx,
                z: sz,
                tiles_per_page: n,
            });
        }
        Ok(self.sub_pages[(sz * n + sx) as usize].set_resolution(meters_per_sample))
    }

    /// Changes every sub-page's resolution. Returns the number that changed.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::NotPowerOfTwo`] for a bad resolution.
    pub fn set_meters_per_sample(&mut self, meters_per_sample: u32) -> PagingResult<usize> {
        ensure_power_of_two("meters_per_sample", meters_per_sample)?;
        Ok(self
            .sub_pages
            .iter_mut()
            .map(|s| s.set_resolution(meters_per_sample))
            .filter(|&changed| changed)
            .count())
    }

    /// Refills every stale sub-page from `source`. Returns how many refilled.
    ///
    /// # Errors
    ///
    /// Returns any error the source raises.
    pub fn refresh(&mut self, source: &mut dyn HeightSource) -> PagingResult<usize> {
        let mut filled = 0;
        for sub in self.sub_pages.iter_mut().filter(|s| !s.valid) {
            sub.fill(self.origin_m, source)?;
            filled += 1;
        }
        if filled > 0 {
            trace!(
                "refreshed {} sub-pages of page ({}, {})",
                filled,
                self.coord.x,
                self.coord.z
            );
        }
        Ok(filled)
    }

    /// Marks every sub-page touching a world rectangle as stale. Returns how
    /// many were marked.
    pub fn invalidate_region(&mut self, x_m: f64, z_m: f64, width_m: f64, depth_m: f64) -> usize {
        let x0 = x_m - self.origin_m.0;
        let z0 = z_m - self.origin_m.1;
        let (x1, z1) = (x0 + width_m, z0 + depth_m);
        let mut marked = 0;
        for sub in &mut self.sub_pages {
            if sub.valid && sub.overlaps(x0, z0, x1, z1) {
                sub.valid = false;
                marked += 1;
            }
        }
        marked
    }

    fn contains(&self, x: f64, z: f64) -> bool {
        (0.0..self.page_size_m).contains(&x) && (0.0..self.page_size_m).contains(&z)
    }

    fn sub_page_at(&self, x: f64, z: f64) -> &SubPageHeightMap {
        let n = self.sub_pages_per_side;
        let size = self.page_size_m / f64::from(n);
        let sx = ((x / size) as u32).min(n - 1);
        let sz = ((z / size) as u32).min(n - 1);
        &self.sub_pages[(sz * n + sx) as usize]
    }

    /// Cached height at a page-local position, bilinear between samples.
    ///
    /// Stale sub-pages answer with their last samples until refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::OutsidePage`] unless `0 <= x, z < page_size`.
    pub fn height_at(&self, x: f64, z: f64) -> PagingResult<f32> {
        if !self.contains(x, z) {
            return Err(PagingError::OutsidePage {
                x,
                z,
                page_size: self.page_size_m,
            });
        }
        Ok(self.sub_page_at(x, z).interpolate(x, z))
    }

    /// Height at a page-local position; positions off the page come from
    /// `source`.
    ///
    /// # Errors
    ///
    /// Returns any error the source raises.
    pub fn interpolated_height(&self, x: f64, z: f64, source: &mut dyn HeightSource) -> PagingResult<f32> {
        if self.contains(x, z) {
            self.height_at(x, z)
        } else {
            source.height_mm(self.origin_m.0 + x, self.origin_m.1 + z)
        }
    }

    /// Unit surface normal at a page-local position, from central
    /// differences one sample apart.
    ///
    /// # Errors
    ///
    /// Returns any error the source raises for neighbors off the page.
    pub fn normal_at(&self, x: f64, z: f64, source: &mut dyn HeightSource) -> PagingResult<[f32; 3]> {
        let step = if self.contains(x, z) {
            self.sub_page_at(x, z).meters_per_sample
        } else {
            self.sub_pages[0].meters_per_sample
        };
        let west = self.interpolated_height(x - step, z, source)?;
        let east = self.interpolated_height(x + step, z, source)?;
        let south = self.interpolated_height(x, z - step, source)?;
        let north = self.interpolated_height(x, z + step, source)?;
        let mm = stratum_mosaic::MM_PER_M;
        let dx = f64::from(east - west) / mm / (2.0 * step);
        let dz = f64::from(north - south) / mm / (2.0 * step);
        let len = (dx * dx + 1.0 + dz * dz).sqrt();
        Ok([(-dx / len) as f32, (1.0 / len) as f32, (-dz / len) as f32])
    }

    /// Minimum and maximum cached height over a page-local rectangle.
    ///
    /// Covers every cached sample inside the rectangle plus the interpolated
    /// corners. Returns `None` if the rectangle misses the page.
    #[must_use]
    pub fn area_height_range(&self, x: f64, z: f64, width: f64, depth: f64) -> Option<(f32, f32)> {
        let limit = self.page_size_m - f64::EPSILON * self.page_size_m;
        let x0 = x.max(0.0);
        let z0 = z.max(0.0);
        let x1 = (x + width).min(limit);
        let z1 = (z + depth).min(limit);
        if x0 > x1 || z0 > z1 {
            return None;
        }

        let mut range = (f32::INFINITY, f32::NEG_INFINITY);
        let mut take = |h: f32| {
            range.0 = range.0.min(h);
            range.1 = range.1.max(h);
        };
        for (cx, cz) in [(x0, z0), (x1, z0), (x0, z1), (x1, z1)] {
            take(self.sub_page_at(cx, cz).interpolate(cx, cz));
        }
        for sub in self.sub_pages.iter().filter(|s| s.overlaps(x0, z0, x1, z1)) {
            let n = sub.samples_per_side;
            for j in 0..n {
                let sz = sub.origin_m.1 + j as f64 * sub.meters_per_sample;
                if sz < z0 || sz > z1 {
                    continue;
                }
                for i in 0..n {
                    let sx = sub.origin_m.0 + i as f64 * sub.meters_per_sample;
                    if sx >= x0 && sx <= x1 {
                        take(sub.sample(i, j));
                    }
                }
            }
        }
        Some(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Height rises 1 m per meter east and 2 m per meter north.
    fn ramp() -> HeightFn<impl FnMut(f64, f64) -> f32> {
        HeightFn(|x: f64, z: f64| ((x + 2.0 * z) * 1000.0) as f32)
    }

    #[test]
    fn test_cache_matches_linear_source() {
        let mut source = ramp();
        let map = PageHeightMap::new(PageCoord::new(1, -1), 64, 4, 4, &mut source).unwrap();
        assert_eq!(map.origin_m(), (64.0, -64.0));
        let h = map.height_at(10.0, 3.0).unwrap();
        assert!((h - ((74.0 + 2.0 * -61.0) * 1000.0) as f32).abs() < 0.5);
        let sub = map.sub_page(0, 0).unwrap();
        assert_eq!(sub.samples_per_side(), 5);
        assert!(sub.is_valid());
    }

    #[test]
    fn test_outside_page() {
        let mut flat = FlatHeightSource { height_mm: 5.0 };
        let map = PageHeightMap::new(PageCoord::ORIGIN, 32, 2, 8, &mut flat).unwrap();
        assert!(matches!(map.height_at(32.0, 0.0), Err(PagingError::OutsidePage { .. })));
        assert!(map.height_at(-0.1, 0.0).is_err());
        assert_eq!(map.height_at(31.9, 31.9).unwrap(), 5.0);
        let mut other = FlatHeightSource { height_mm: 9.0 };
        assert_eq!(map.interpolated_height(40.0, 1.0, &mut other).unwrap(), 9.0);
        assert_eq!(map.interpolated_height(4.0, 1.0, &mut other).unwrap(), 5.0);
    }

    #[test]
    fn test_resolution_change_invalidates() {
        let mut flat = FlatHeightSource::default();
        let mut map = PageHeightMap::new(PageCoord::ORIGIN, 32, 2, 8, &mut flat).unwrap();
        assert!(!map.set_sub_page_meters_per_sample(1, 0, 8).unwrap());
        assert!(map.set_sub_page_meters_per_sample(1, 0, 2).unwrap());
        assert_eq!(map.invalid_sub_pages(), 1);
        assert_eq!(map.refresh(&mut flat).unwrap(), 1);
        assert_eq!(map.sub_page(1, 0).unwrap().samples_per_side(), 9);
        assert_eq!(map.set_meters_per_sample(2).unwrap(), 3);
        assert!(map.set_sub_page_meters_per_sample(2, 0, 2).is_err());
        assert!(map.set_meters_per_sample(3).is_err());
    }

    #[test]
    fn test_reads_keep_old_samples_until_refresh() {
        let mut flat = FlatHeightSource { height_mm: 5000.0 };
        let mut map = PageHeightMap::new(PageCoord::ORIGIN, 32, 2, 8, &mut flat).unwrap();
        assert_eq!(map.height_at(3.0, 3.0).unwrap(), 5000.0);

        assert_eq!(map.set_meters_per_sample(4).unwrap(), 4);
        assert_eq!(map.invalid_sub_pages(), 4);
        assert_eq!(map.height_at(3.0, 3.0).unwrap(), 5000.0);
        assert_eq!(map.area_height_range(0.0, 0.0, 31.0, 31.0), Some((5000.0, 5000.0)));
        assert_eq!(map.normal_at(3.0, 3.0, &mut flat).unwrap(), [0.0, 1.0, 0.0]);
        let sub = map.sub_page(0, 0).unwrap();
        assert_eq!(sub.meters_per_sample(), 8.0);
        assert_eq!(sub.samples_per_side(), 3);

        // A pending change can be replaced before the refresh.
        assert!(!map.set_sub_page_meters_per_sample(0, 0, 4).unwrap());
        assert!(map.set_sub_page_meters_per_sample(0, 0, 8).unwrap());

        let mut raised = FlatHeightSource { height_mm: 7000.0 };
        assert_eq!(map.refresh(&mut raised).unwrap(), 4);
        assert_eq!(map.height_at(3.0, 3.0).unwrap(), 7000.0);
        assert_eq!(map.sub_page(1, 1).unwrap().samples_per_side(), 5);
        assert_eq!(map.sub_page(0, 0).unwrap().samples_per_side(), 3);
    }

    #[test]
    fn test_invalidate_region_picks_touching_sub_pages() {
        let mut flat = FlatHeightSource::default();
        let mut map = PageHeightMap::new(PageCoord::new(-1, 0), 32, 4, 4, &mut flat).unwrap();
        // World (-30, 2) is page-local (2, 2), inside sub-page (0, 0).
        assert_eq!(map.invalidate_region(-30.0, 2.0, 1.0, 1.0), 1);
        // A rectangle over the shared corner of four sub-pages.
        assert_eq!(map.invalidate_region(-17.0, 7.0, 2.0, 2.0), 4);
        assert_eq!(map.invalid_sub_pages(), 5);
        assert_eq!(map.invalidate_region(100.0, 100.0, 1.0, 1.0), 0);
    }

    #[test]
    fn test_normal_of_ramp() {
        let mut source = ramp();
        let map = PageHeightMap::new(PageCoord::ORIGIN, 16, 1, 1, &mut source).unwrap();
        let n = map.normal_at(8.0, 8.0, &mut source).unwrap();
        let len = 6.0_f32.sqrt();
        assert!((n[0] + 1.0 / len).abs() < 1e-4);
        assert!((n[1] - 1.0 / len).abs() < 1e-4);
        assert!((n[2] + 2.0 / len).abs() < 1e-4);
        // Edge normals reach past the page through the source.
        let edge = map.normal_at(0.0, 0.0, &mut source).unwrap();
        assert!((edge[2] - n[2]).abs() < 1e-4);
    }

    #[test]
    fn test_area_height_range() {
        let mut source = ramp();
        let map = PageHeightMap::new(PageCoord::ORIGIN, 16, 2, 2, &mut source).unwrap();
        let (lo, hi) = map.area_height_range(2.0, 2.0, 4.0, 4.0).unwrap();
        assert!((lo - 6000.0).abs() < 0.5);
        assert!((hi - 18000.0).abs() < 0.5);
        assert!(map.area_height_range(20.0, 20.0, 2.0, 2.0).is_none());
    }
}
