//! Extent map implementation
//!
//! BTreeMap of disjoint ranges, keyed by start LBA.

use std::collections::BTreeMap;

use crate::error::{LsvdError, Result};

use super::{Extent, MapEntry, MapLocation, Piece};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Slot<L> {
    len: u64,
    loc: L,
}

/// Map from LBA ranges to locations of type `L`.
///
/// Not synchronized; owners wrap it in a lock.
#[derive(Debug, Clone)]
pub struct ExtentMap<L> {
    entries: BTreeMap<u64, Slot<L>>,
}

impl<L: MapLocation> Default for ExtentMap<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: MapLocation> ExtentMap<L> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Build a map from checkpointed entries, rejecting overlaps
    pub fn from_entries(mut entries: Vec<MapEntry<L>>) -> Result<Self> {
        entries.sort_by_key(|e| e.lba);
        let mut map = Self::new();
        let mut prev: Option<MapEntry<L>> = None;
        for e in entries {
            if e.len == 0 {
                continue;
            }
            if let Some(p) = prev {
                if p.end() > e.lba {
                    return Err(LsvdError::Invariant(format!(
                        "overlapping map entries [{}, {}) and [{}, {})",
                        p.lba,
                        p.end(),
                        e.lba,
                        e.end()
                    )));
                }
            }
            map.entries.insert(e.lba, Slot { len: e.len, loc: e.loc });
            map.coalesce(e.lba);
            prev = Some(e);
        }
        Ok(map)
    }

    /// Number of distinct entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total mapped sectors
    pub fn mapped_sectors(&self) -> u64 {
        self.entries.values().map(|s| s.len).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = MapEntry<L>> + '_ {
        self.entries
            .iter()
            .map(|(&lba, s)| MapEntry::new(lba, s.len, s.loc))
    }

    /// Ordered copy of every entry
    pub fn snapshot(&self) -> Vec<MapEntry<L>> {
        self.iter().collect()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Mapped pieces of `[lba, lba+len)`, clipped to the range, in LBA order.
    /// Sectors not covered by any piece are holes. A range running past
    /// `u64::MAX` stops there.
    pub fn lookup(&self, lba: u64, len: u64) -> Vec<MapEntry<L>> {
        if len == 0 {
            return Vec::new();
        }
        let end = lba.saturating_add(len);
        self.overlapping(lba, end)
            .into_iter()
            .map(|e| e.clip(lba, end))
            .collect()
    }

    /// Like [`lookup`](Self::lookup), with the holes made explicit
    pub fn resolve(&self, lba: u64, len: u64) -> Vec<Piece<L>> {
        let end = lba.saturating_add(len);
        let mut pieces = Vec::new();
        let mut cursor = lba;
        for e in self.lookup(lba, len) {
            if e.lba > cursor {
                pieces.push(Piece::Hole(Extent::new(cursor, e.lba - cursor)));
            }
            cursor = e.end();
            pieces.push(Piece::Mapped(e));
        }
        if cursor < end {
            pieces.push(Piece::Hole(Extent::new(cursor, end - cursor)));
        }
        pieces
    }

    /// Location of a single sector
    pub fn get(&self, lba: u64) -> Option<L> {
        self.lookup(lba, 1).first().map(|e| e.loc)
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Map `[lba, lba+len)` to `loc`, most recent wins.
    ///
    /// Returns the displaced pieces, clipped to the range.
    pub fn update(&mut self, lba: u64, len: u64, loc: L) -> Vec<MapEntry<L>> {
        if len == 0 {
            return Vec::new();
        }
        let end = lba.saturating_add(len);
        let displaced = self.punch(lba, end);
        self.entries.insert(lba, Slot { len: end - lba, loc });
        self.coalesce(lba);
        displaced
    }

    /// Unmap `[lba, lba+len)`; returns the removed pieces
    pub fn remove(&mut self, lba: u64, len: u64) -> Vec<MapEntry<L>> {
        if len == 0 {
            return Vec::new();
        }
        self.punch(lba, lba.saturating_add(len))
    }

    /// Unmap only the pieces of `[lba, lba+len)` accepted by `pred`.
    ///
    /// `pred` sees each piece clipped to the range. Returns the number of
    /// sectors removed.
    pub fn remove_if<F>(&mut self, lba: u64, len: u64, mut pred: F) -> u64
    where
        F: FnMut(&MapEntry<L>) -> bool,
    {
        let mut removed = 0;
        for piece in self.lookup(lba, len) {
            if pred(&piece) {
                self.punch(piece.lba, piece.end());
                removed += piece.len;
            }
        }
        removed
    }

    /// Check ordering and disjointness
    pub fn verify(&self) -> Result<()> {
        let mut prev: Option<(u64, u64)> = None;
        for (&lba, slot) in &self.entries {
            if slot.len == 0 {
                return Err(LsvdError::Invariant(format!("empty map entry at {}", lba)));
            }
            if let Some((plba, pend)) = prev {
                if pend > lba {
                    return Err(LsvdError::Invariant(format!(
                        "overlapping map entries [{}, {}) and [{}, {})",
                        plba,
                        pend,
                        lba,
                        lba + slot.len
                    )));
                }
            }
            prev = Some((lba, lba + slot.len));
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn overlapping(&self, lba: u64, end: u64) -> Vec<MapEntry<L>> {
        let mut found = Vec::new();
        if let Some((&k, s)) = self.entries.range(..lba).next_back() {
            if k + s.len > lba {
                found.push(MapEntry::new(k, s.len, s.loc));
            }
        }
        found.extend(
            self.entries
                .range(lba..end)
                .map(|(&k, s)| MapEntry::new(k, s.len, s.loc)),
        );
        found
    }

    /// Clear `[lba, end)`, keeping the parts of partially covered entries
    fn punch(&mut self, lba: u64, end: u64) -> Vec<MapEntry<L>> {
        let hit = self.overlapping(lba, end);
        let mut displaced = Vec::with_capacity(hit.len());
        for e in hit {
            self.entries.remove(&e.lba);
            if e.lba < lba {
                self.entries.insert(
                    e.lba,
                    Slot {
                        len: lba - e.lba,
                        loc: e.loc,
                    },
                );
            }
            if e.end() > end {
                self.entries.insert(
                    end,
                    Slot {
                        len: e.end() - end,
                        loc: e.loc.advance(end - e.lba),
                    },
                );
            }
            displaced.push(e.clip(lba, end));
        }
        displaced
    }

    /// Merge the entry at `lba` with location-contiguous neighbours
    fn coalesce(&mut self, lba: u64) {
        let Some(&cur) = self.entries.get(&lba) else {
            return;
        };
        let mut start = lba;
        let mut slot = cur;

        if let Some((&k, left)) = self.entries.range(..lba).next_back() {
            if k + left.len == lba && left.loc.advance(left.len) == cur.loc {
                start = k;
                slot = Slot {
                    len: left.len + cur.len,
                    loc: left.loc,
                };
                self.entries.remove(&lba);
            }
        }

        let end = start + slot.len;
        if let Some(&right) = self.entries.get(&end) {
            if slot.loc.advance(slot.len) == right.loc {
                slot.len += right.len;
                self.entries.remove(&end);
            }
        }

        self.entries.insert(start, slot);
    }
}
