use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid coordinate identifying one cell of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i64,
    pub y: i64,
}

impl Coord {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Opaque payload written to a cell. The dispatcher only compares it for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

/// One idempotent keyed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub key: Coord,
    pub payload: Color,
}

impl Operation {
    pub fn new(key: Coord, payload: Color) -> Self {
        Self { key, payload }
    }
}

/// Identity of the remote resource a session targets (canvas name, tile set, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Square, aligned block of cells that can be read from the remote in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    pub x0: i64,
    pub y0: i64,
    pub size: u32,
}

impl Region {
    /// Region of edge `size` containing `coord`, aligned to multiples of `size`.
    pub fn covering(coord: Coord, size: u32) -> Self {
        let size = size.max(1);
        let edge = i64::from(size);
        // Blocks that would start below i64::MIN are clamped to it.
        Self {
            x0: coord.x.saturating_sub(coord.x.rem_euclid(edge)),
            y0: coord.y.saturating_sub(coord.y.rem_euclid(edge)),
            size,
        }
    }

    pub fn contains(&self, coord: Coord) -> bool {
        // Offsets from the origin; the far edge of a region near i64::MAX would overflow.
        let edge = u64::from(self.size);
        let within = |v: i64, origin: i64| v >= origin && v.abs_diff(origin) < edge;
        within(coord.x, self.x0) && within(coord.y, self.y0)
    }
}
