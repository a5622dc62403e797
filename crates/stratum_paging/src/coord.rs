//! # Page Coordinates
//!
//! Integer page-grid coordinates and cardinal directions. Page `(x, z)`
//! covers world `[x * size, (x + 1) * size) x [z * size, (z + 1) * size)`.
//! North is +Z, east is +X.

use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Position in the page grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageCoord {
    /// Column.
    pub x: i32,
    /// Row.
    pub z: i32,
}

impl PageCoord {
    /// The page at the world origin.
    pub const ORIGIN: Self = Self { x: 0, z: 0 };

    /// Creates a coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Page containing a world position.
    #[inline]
    #[must_use]
    pub fn from_world(x_m: f64, z_m: f64, page_size_m: f64) -> Self {
        Self {
            x: (x_m / page_size_m).floor() as i32,
            z: (z_m / page_size_m).floor() as i32,
        }
    }

    /// World position of the page's south-west corner.
    #[inline]
    #[must_use]
    pub fn origin_m(self, page_size_m: f64) -> (f64, f64) {
        (f64::from(self.x) * page_size_m, f64::from(self.z) * page_size_m)
    }

    /// `max(|dx|, |dz|)`: rings of pages between `self` and `other`.
    #[inline]
    #[must_use]
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        let dx = (i64::from(self.x) - i64::from(other.x)).unsigned_abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).unsigned_abs();
        dx.max(dz) as u32
    }

    /// Adjacent page in `direction`.
    #[inline]
    #[must_use]
    pub fn neighbor(self, direction: Direction) -> Self {
        self + direction.offset()
    }
}

impl Add for PageCoord {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.z + rhs.z)
    }
}

impl Sub for PageCoord {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.z - rhs.z)
    }
}

impl Neg for PageCoord {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.z)
    }
}

/// Cardinal direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// +Z.
    North,
    /// -Z.
    South,
    /// +X.
    East,
    /// -X.
    West,
}

impl Direction {
    /// All four, in storage order.
    pub const ALL: [Self; 4] = [Self::North, Self::South, Self::East, Self::West];

    /// Slot in per-direction arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::North => 0,
            Self::South => 1,
            Self::East => 2,
            Self::West => 3,
        }
    }

    /// Unit step in page coordinates.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> PageCoord {
        match self {
            Self::North => PageCoord::new(0, 1),
            Self::South => PageCoord::new(0, -1),
            Self::East => PageCoord::new(1, 0),
            Self::West => PageCoord::new(-1, 0),
        }
    }

    /// The direction pointing back.
    #[inline]
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::South => Self::North,
            Self::East => Self::West,
            Self::West => Self::East,
        }
    }
}
