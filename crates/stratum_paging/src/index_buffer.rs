//! # Index Buffers
//!
//! Triangle lists for uniform tiles and for the strips that stitch a tile to
//! neighbors of a different resolution.
//!
//! ## Tile Layout
//!
//! A tile with `n` samples per edge places its vertices on an `n x n` grid
//! at spacing `T / n`, so the grid covers `[0, T - T/n]` on both axes. The gap
//! up to the next tile is closed by the stitch buffer, which joins the tile's
//! north row and east column to the neighbors' edges at `z = T` and `x = T`:
//!
//! ```text
//!   H0 ── H1 ── H2 ── H3 ─── C      H: north neighbor edge
//!   │ ╲  │ ╲  │ ╲  │ ╲    ╱ │      Q: east neighbor edge
//!   L0 ── L1 ── L2 ── L3 ── Q3     L: own north row
//!   ·     ·     ·    I2 ── Q2     I: own east column
//!   ·     ·     ·    I1 ── Q1
//!   ·     ·     ·    I0 ── Q0
//! ```
//!
//! ## Stitch Vertex Order
//!
//! | Range                    | Vertices                          |
//! |--------------------------|-----------------------------------|
//! | `0..n`                   | own north row `L`                 |
//! | `n..2n-1`                | own east column `I` without `L[n-1]` |
//! | `2n-1..2n-1+N`           | north neighbor edge `H`           |
//! | `2n-1+N..2n-1+N+E`       | east neighbor edge `Q`            |
//! | `2n-1+N+E`               | corner `C`, only if `N > 0 && E > 0` |
//!
//! All triangles wind clockwise seen from +Y, matching the interior buffer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ensure_power_of_two, PagingError, PagingResult};

/// How a neighbor edge compares to the tile's own edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EdgeRatio {
    Absent,
    Equal,
    Finer,
    Coarser,
}

impl EdgeRatio {
    fn classify(own: u32, neighbor: u32) -> PagingResult<Self> {
        match neighbor {
            0 => Ok(Self::Absent),
            _ if neighbor == own => Ok(Self::Equal),
            _ if neighbor == own * 2 => Ok(Self::Finer),
            _ if neighbor * 2 == own => Ok(Self::Coarser),
            _ => Err(PagingError::UnsupportedStitchRatio { own, neighbor }),
        }
    }

    /// Triangles in the band along one side.
    const fn band_triangles(self, own: u32) -> u32 {
        match self {
            Self::Absent => 0,
            Self::Equal => 2 * (own - 1),
            Self::Finer => 3 * (own - 1),
            Self::Coarser => 3 * (own / 2 - 1) + 1,
        }
    }

    /// Neighbor vertices left over for the corner fan, and the first of them.
    const fn corner_vertices(self, own: u32) -> (u32, u32) {
        match self {
            Self::Absent => (0, 0),
            Self::Equal => (1, own - 1),
            Self::Finer => (2, 2 * own - 2),
            Self::Coarser => (1, own / 2 - 1),
        }
    }
}

/// Writes one side's band. `own(i)` and `edge(k)` map to stitch vertex
/// indices; `mirror` flips winding for the east side, whose axes are swapped.
fn emit_band(
    out: &mut Vec<u32>,
    ratio: EdgeRatio,
    n: u32,
    own: impl Fn(u32) -> u32,
    edge: impl Fn(u32) -> u32,
    mirror: bool,
) {
    let mut tri = |a: u32, b: u32, c: u32| {
        if mirror {
            out.extend_from_slice(&[a, c, b]);
        } else {
            out.extend_from_slice(&[a, b, c]);
        }
    };
    match ratio {
        EdgeRatio::Absent => {}
        EdgeRatio::Equal => {
            for i in 0..n - 1 {
                tri(own(i), edge(i), own(i + 1));
                tri(own(i + 1), edge(i), edge(i + 1));
            }
        }
        EdgeRatio::Finer => {
            for i in 0..n - 1 {
                tri(own(i), edge(2 * i), edge(2 * i + 1));
                tri(own(i), edge(2 * i + 1), own(i + 1));
                tri(own(i + 1), edge(2 * i + 1), edge(2 * i + 2));
            }
        }
        EdgeRatio::Coarser => {
            let m = n / 2;
            for j in 0..m - 1 {
                tri(own(2 * j), edge(j), own(2 * j + 1));
                tri(own(2 * j + 1), edge(j), edge(j + 1));
                tri(own(2 * j + 1), edge(j + 1), own(2 * j + 2));
            }
            // Closes the last own segment against the final coarse vertex.
            tri(own(n - 2), edge(m - 1), own(n - 1));
        }
    }
}

/// Triangle count of the stitch buffer for `(n, north, east)`.
///
/// A single equal side, `(n, n, 0)` or `(n, 0, n)`, gives `2(n-1)` triangles,
/// which is `6(n-1)` indices. Equal neighbors on both sides give twice that
/// plus the two corner-fan triangles.
///
/// # Errors
///
/// Returns [`PagingError::NotPowerOfTwo`] or
/// [`PagingError::UnsupportedStitchRatio`] for shapes that cannot be stitched.
pub fn predicted_stitch_triangles(n: u32, north: u32, east: u32) -> PagingResult<u32> {
    check_own_samples(n)?;
    let rn = EdgeRatio::classify(n, north)?;
    let re = EdgeRatio::classify(n, east)?;
    let mut triangles = rn.band_triangles(n) + re.band_triangles(n);
    if rn != EdgeRatio::Absent && re != EdgeRatio::Absent {
        triangles += rn.corner_vertices(n).0 + re.corner_vertices(n).0;
    }
    Ok(triangles)
}

fn check_own_samples(n: u32) -> PagingResult<()> {
    ensure_power_of_two("samples_per_tile", n)?;
    if n < 2 {
        return Err(PagingError::UnsupportedStitchRatio { own: n, neighbor: n });
    }
    Ok(())
}

fn build_stitch(n: u32, north: u32, east: u32) -> PagingResult<Vec<u32>> {
    let expected = predicted_stitch_triangles(n, north, east)? as usize * 3;
    let rn = EdgeRatio::classify(n, north)?;
    let re = EdgeRatio::classify(n, east)?;

    let row = |i: u32| i;
    let column = |j: u32| if j == n - 1 { n - 1 } else { n + j };
    let north_edge = |k: u32| 2 * n - 1 + k;
    let east_edge = |k: u32| 2 * n - 1 + north + k;
    let corner = 2 * n - 1 + north + east;

    let mut out = Vec::with_capacity(expected);
    emit_band(&mut out, rn, n, row, north_edge, false);
    emit_band(&mut out, re, n, column, east_edge, true);

    if rn != EdgeRatio::Absent && re != EdgeRatio::Absent {
        // Fan from the own NE vertex: along the north edge, over the
        // corner, then down the east edge.
        let (_, first_north) = rn.corner_vertices(n);
        let (_, first_east) = re.corner_vertices(n);
        let mut chain: Vec<u32> = (first_north..north).map(north_edge).collect();
        chain.push(corner);
        chain.extend((first_east..east).rev().map(east_edge));
        let hub = n - 1;
        for pair in chain.windows(2) {
            out.extend_from_slice(&[hub, pair[0], pair[1]]);
        }
    }

    debug_assert_eq!(out.len(), expected, "stitch ({n}, {north}, {east})");
    if out.len() != expected {
        return Err(PagingError::StitchTopologyMismatch {
            expected,
            actual: out.len(),
        });
    }
    Ok(out)
}

fn build_tile(size: u32) -> Vec<u32> {
    let quads = size.saturating_sub(1);
    let mut out = Vec::with_capacity((quads * quads * 6) as usize);
    for j in 0..quads {
        for i in 0..quads {
            let v0 = j * size + i;
            let v1 = v0 + 1;
            let v2 = v0 + size;
            let v3 = v2 + 1;
            out.extend_from_slice(&[v0, v2, v1, v1, v2, v3]);
        }
    }
    out
}

/// Positions of the stitch vertices for `(n, north, east)`, in units of the
/// tile edge, in stitch vertex order.
#[must_use]
pub fn stitch_vertex_positions(n: u32, north: u32, east: u32) -> Vec<[f32; 2]> {
    let own = n as f32;
    let last = (n - 1) as f32 / own;
    let mut out = Vec::with_capacity((2 * n + north + east) as usize);
    out.extend((0..n).map(|i| [i as f32 / own, last]));
    out.extend((0..n - 1).map(|j| [last, j as f32 / own]));
    out.extend((0..north).map(|k| [k as f32 / north as f32, 1.0]));
    out.extend((0..east).map(|k| [1.0, k as f32 / east as f32]));
    if north > 0 && east > 0 {
        out.push([1.0, 1.0]);
    }
    out
}

type StitchKey = (u32, u32, u32);

/// Lazily generated, permanently cached index buffers.
///
/// Buffers are handed out as `Arc<[u32]>` and are never modified after
/// generation. One manager is shared by every terrain that uses it.
#[derive(Debug, Default)]
pub struct IndexBufferManager {
    tiles: Mutex<HashMap<u32, Arc<[u32]>>>,
    stitches: Mutex<HashMap<StitchKey, Arc<[u32]>>>,
}

impl IndexBufferManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interior buffer of a `size x size` tile: `6 (size-1)^2` indices.
    #[must_use]
    pub fn tile_indices(&self, size: u32) -> Arc<[u32]> {
        let mut cache = self.tiles.lock();
        Arc::clone(cache.entry(size).or_insert_with(|| {
            debug!("generating tile index buffer for size {size}");
            build_tile(size).into()
        }))
    }

    /// Stitch buffer joining an `n`-sample tile to `north` and `east`
    /// neighbor edges (`0` for no neighbor).
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::UnsupportedStitchRatio`] or
    /// [`PagingError::NotPowerOfTwo`] for shapes that cannot be stitched, and
    /// [`PagingError::StitchTopologyMismatch`] if generation disagrees with
    /// the predicted size.
    pub fn stitch_indices(&self, n: u32, north: u32, east: u32) -> PagingResult<Arc<[u32]>> {
        let key = (n, north, east);
        if let Some(found) = self.stitches.lock().get(&key) {
            return Ok(Arc::clone(found));
        }
        debug!("generating stitch index buffer for ({n}, {north}, {east})");
        let built: Arc<[u32]> = build_stitch(n, north, east)?.into();
        Ok(Arc::clone(self.stitches.lock().entry(key).or_insert(built)))
    }

    /// Number of cached interior and stitch buffers.
    #[must_use]
    pub fn cached_counts(&self) -> (usize, usize) {
        (self.tiles.lock().len(), self.stitches.lock().len())
    }
}
