//! Extent Map Module
//!
//! In-memory index from logical sector ranges to physical locations.
//!
//! ## Responsibilities
//! - Range overwrite: newer writes split or replace older entries
//! - Range lookup with clipped locations and implicit zero holes
//! - Coalescing of adjacent, location-contiguous entries
//! - Ordered snapshots for checkpoints
//!
//! ## Data Structure Choice
//! BTreeMap keyed by start LBA, one entry per disjoint range:
//! - Point and range lookup in O(log n + k)
//! - Ordered iteration for snapshots
//! - The same map backs the journal (device sectors) and the backend
//!   (`ObjectOffset`) through the [`MapLocation`] trait

mod map;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use map::ExtentMap;

/// A physical location that can be advanced sector by sector.
///
/// Two entries coalesce when the first one's location, advanced by its
/// length, equals the second one's location.
pub trait MapLocation: Copy + PartialEq + fmt::Debug {
    fn advance(self, sectors: u64) -> Self;
}

/// Absolute journal device sector
impl MapLocation for u64 {
    fn advance(self, sectors: u64) -> Self {
        self + sectors
    }
}

/// Sector offset within a backend object's data section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectOffset {
    pub obj: u64,
    pub offset: u64,
}

impl ObjectOffset {
    pub fn new(obj: u64, offset: u64) -> Self {
        Self { obj, offset }
    }
}

impl MapLocation for ObjectOffset {
    fn advance(self, sectors: u64) -> Self {
        Self {
            obj: self.obj,
            offset: self.offset + sectors,
        }
    }
}

/// Unified location, used by the volume-level view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Journal(u64),
    Object(ObjectOffset),
}

impl MapLocation for Location {
    fn advance(self, sectors: u64) -> Self {
        match self {
            Location::Journal(s) => Location::Journal(s + sectors),
            Location::Object(o) => Location::Object(o.advance(sectors)),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Journal(sector) => write!(f, "journal:{}", sector),
            Location::Object(o) => write!(f, "obj {}+{}", o.obj, o.offset),
        }
    }
}

/// `{lba, len}` in sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    pub lba: u64,
    pub len: u64,
}

impl Extent {
    pub fn new(lba: u64, len: u64) -> Self {
        Self { lba, len }
    }

    pub fn end(&self) -> u64 {
        self.lba + self.len
    }
}

/// A mapped range and where its first sector lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry<L> {
    pub lba: u64,
    pub len: u64,
    pub loc: L,
}

impl<L: MapLocation> MapEntry<L> {
    pub fn new(lba: u64, len: u64, loc: L) -> Self {
        Self { lba, len, loc }
    }

    pub fn end(&self) -> u64 {
        self.lba + self.len
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.lba, self.len)
    }

    /// Restrict to `[lba, end)`; the caller guarantees the ranges overlap
    pub(crate) fn clip(&self, lba: u64, end: u64) -> Self {
        let start = self.lba.max(lba);
        let stop = self.end().min(end);
        Self {
            lba: start,
            len: stop - start,
            loc: self.loc.advance(start - self.lba),
        }
    }
}

/// One piece of a resolved range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece<L> {
    Mapped(MapEntry<L>),
    Hole(Extent),
}

impl<L: MapLocation> Piece<L> {
    pub fn lba(&self) -> u64 {
        match self {
            Piece::Mapped(e) => e.lba,
            Piece::Hole(e) => e.lba,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Piece::Mapped(e) => e.len,
            Piece::Hole(e) => e.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
