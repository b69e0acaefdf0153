//! Circular block addressing
//!
//! All wraparound arithmetic for the record ring lives here. Positions are
//! absolute device block numbers in `[base, limit)`.

use crate::codec::SECTORS_PER_BLOCK;

/// The record ring `[base, limit)`.
///
/// One block is always left unused so `next == oldest` means empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ring {
    pub base: u32,
    pub limit: u32,
}

/// A contiguous run of device blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRun {
    pub start: u32,
    pub blocks: u32,
}

impl Ring {
    pub fn new(base: u32, limit: u32) -> Self {
        debug_assert!(base < limit);
        Self { base, limit }
    }

    pub fn capacity(&self) -> u32 {
        self.limit - self.base
    }

    pub fn contains_block(&self, block: u32) -> bool {
        (self.base..self.limit).contains(&block)
    }

    /// `pos` moved forward by `n` blocks, wrapping at `limit`
    pub fn advance(&self, pos: u32, n: u32) -> u32 {
        let cap = self.capacity() as u64;
        let off = (pos - self.base) as u64 + n as u64;
        self.base + (off % cap) as u32
    }

    /// Blocks from `from` forward to `to`
    pub fn distance(&self, from: u32, to: u32) -> u32 {
        if to >= from {
            to - from
        } else {
            self.capacity() - (from - to)
        }
    }

    /// Blocks in use between `oldest` and `next`
    pub fn used(&self, oldest: u32, next: u32) -> u32 {
        self.distance(oldest, next)
    }

    /// Blocks an append at `next` may consume without reaching `oldest`
    pub fn free(&self, oldest: u32, next: u32) -> u32 {
        self.capacity() - self.used(oldest, next) - 1
    }

    /// True if `pos` lies in the occupied range `[oldest, next)`
    pub fn in_use(&self, oldest: u32, next: u32, pos: u32) -> bool {
        self.contains_block(pos) && self.distance(oldest, pos) < self.used(oldest, next)
    }

    /// Split `blocks` blocks starting at `start` into at most two runs
    pub fn runs(&self, start: u32, blocks: u32) -> Vec<BlockRun> {
        if blocks == 0 {
            return Vec::new();
        }
        let tail = self.limit - start;
        if blocks <= tail {
            vec![BlockRun { start, blocks }]
        } else {
            vec![
                BlockRun {
                    start,
                    blocks: tail,
                },
                BlockRun {
                    start: self.base,
                    blocks: blocks - tail,
                },
            ]
        }
    }

    /// Runs holding the payload of a record whose header sits at `pos`
    pub fn payload_runs(&self, pos: u32, payload_blocks: u32) -> Vec<BlockRun> {
        self.runs(self.advance(pos, 1), payload_blocks)
    }
}

/// Device sectors holding payload sectors `[offset, offset+len)` of a
/// payload laid out over `runs`. Each returned `(sector, len)` is contiguous.
pub fn sector_runs(runs: &[BlockRun], offset: u64, len: u64) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    let mut skip = offset;
    let mut left = len;
    for run in runs {
        if left == 0 {
            break;
        }
        let run_sectors = run.blocks as u64 * SECTORS_PER_BLOCK;
        if skip >= run_sectors {
            skip -= run_sectors;
            continue;
        }
        let take = (run_sectors - skip).min(left);
        out.push((run.start as u64 * SECTORS_PER_BLOCK + skip, take));
        left -= take;
        skip = 0;
    }
    out
}
