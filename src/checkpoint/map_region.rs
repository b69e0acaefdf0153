//! Journal checkpoint slots

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{BLOCK_SIZE, SECTORS_PER_BLOCK};
use crate::device::BlockDevice;
use crate::error::{LsvdError, Result};
use crate::extent::{ExtentMap, MapEntry};
use crate::journal::JournalLayout;

/// `len` + `crc`
pub const SLOT_HEADER_SIZE: usize = 8;

/// bincode size of a [`MapCheckpoint`] with no entries
const CHECKPOINT_FIXED_BYTES: u64 = 36;

/// bincode size of one `(lba, len, sector)` entry
const CHECKPOINT_ENTRY_BYTES: u64 = 16;

/// Slot blocks that hold the largest map a ring of `ring_blocks` can hold.
///
/// Entries are disjoint and each one points at payload sectors of its own,
/// so a map never has more entries than the ring has sectors.
pub fn slot_blocks_for(ring_blocks: u32) -> u32 {
    let entries = ring_blocks as u64 * SECTORS_PER_BLOCK;
    let bytes = SLOT_HEADER_SIZE as u64 + CHECKPOINT_FIXED_BYTES + entries * CHECKPOINT_ENTRY_BYTES;
    ((bytes + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64) as u32
}

/// Persisted journal map and the cursors it is valid for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapCheckpoint {
    pub generation: u64,
    /// Replay starts here
    pub cursor: u32,
    /// Sequence number expected at `cursor`
    pub seq: u64,
    pub oldest: u32,
    pub flushed: u32,
    /// `(lba, len, device sector)`; the journal layout keeps every device
    /// sector below `u32::MAX`
    pub entries: Vec<(u64, u32, u32)>,
}

impl MapCheckpoint {
    pub fn map_entries(map: &ExtentMap<u64>) -> Result<Vec<(u64, u32, u32)>> {
        map.iter()
            .map(|e| match (u32::try_from(e.len), u32::try_from(e.loc)) {
                (Ok(len), Ok(sector)) => Ok((e.lba, len, sector)),
                _ => Err(LsvdError::Invariant(format!(
                    "journal map entry {}+{} at sector {} outside the journal",
                    e.lba, e.len, e.loc
                ))),
            })
            .collect()
    }

    pub fn to_map(&self) -> Result<ExtentMap<u64>> {
        ExtentMap::from_entries(
            self.entries
                .iter()
                .map(|&(lba, len, sector)| MapEntry::new(lba, len as u64, sector as u64))
                .collect(),
        )
    }

    /// Frame as `[len][crc][payload]`
    pub fn encode(&self, capacity: usize) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let needed = SLOT_HEADER_SIZE + payload.len();
        if needed > capacity {
            return Err(LsvdError::CheckpointTooLarge {
                entries: self.entries.len(),
                needed,
                capacity,
            });
        }
        let mut buf = Vec::with_capacity(needed);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SLOT_HEADER_SIZE {
            return Err(LsvdError::Truncated {
                table: "checkpoint slot",
                offset: 0,
                len: SLOT_HEADER_SIZE,
                available: buf.len(),
            });
        }
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let crc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if len == 0 {
            return Err(LsvdError::Recovery("empty checkpoint slot".to_string()));
        }
        let end = SLOT_HEADER_SIZE + len;
        if end > buf.len() {
            return Err(LsvdError::Truncated {
                table: "checkpoint slot",
                offset: SLOT_HEADER_SIZE,
                len,
                available: buf.len(),
            });
        }
        let payload = &buf[SLOT_HEADER_SIZE..end];
        let actual = crc32fast::hash(payload);
        if actual != crc {
            return Err(LsvdError::Recovery(format!(
                "checkpoint slot crc {:#010x} != {:#010x}",
                actual, crc
            )));
        }
        Ok(bincode::deserialize(payload)?)
    }
}

/// The two alternating slots of one journal device
pub struct MapRegion<'a> {
    device: &'a dyn BlockDevice,
    layout: &'a JournalLayout,
}

impl<'a> MapRegion<'a> {
    pub fn new(device: &'a dyn BlockDevice, layout: &'a JournalLayout) -> Self {
        Self { device, layout }
    }

    fn slot_offset(&self, slot: u32) -> u64 {
        self.layout.slot_block(slot) as u64 * BLOCK_SIZE as u64
    }

    fn capacity(&self) -> usize {
        self.layout.map_blocks as usize * BLOCK_SIZE
    }

    /// Write `ckpt` into slot `generation % 2` and sync
    pub fn write(&self, ckpt: &MapCheckpoint) -> Result<()> {
        let buf = ckpt.encode(self.capacity())?;
        let slot = (ckpt.generation % 2) as u32;
        self.device.write_at(self.slot_offset(slot), &buf)?;
        self.device.sync()?;
        debug!(
            generation = ckpt.generation,
            slot,
            entries = ckpt.entries.len(),
            bytes = buf.len(),
            "journal checkpoint slot written"
        );
        Ok(())
    }

    /// Newest valid checkpoint, if any slot holds one
    pub fn load(&self) -> Result<Option<MapCheckpoint>> {
        let mut best: Option<MapCheckpoint> = None;
        for slot in 0..2 {
            let mut buf = vec![0u8; self.capacity()];
            self.device.read_at(self.slot_offset(slot), &mut buf)?;
            let ckpt = match MapCheckpoint::decode(&buf) {
                Ok(c) => c,
                Err(e) => {
                    debug!(slot, error = %e, "checkpoint slot not usable");
                    continue;
                }
            };
            if !self.cursors_in_ring(&ckpt) {
                debug!(slot, generation = ckpt.generation, "checkpoint cursors outside ring");
                continue;
            }
            if best.as_ref().map_or(true, |b| ckpt.generation > b.generation) {
                best = Some(ckpt);
            }
        }
        Ok(best)
    }

    /// Invalidate both slots
    pub fn clear(&self) -> Result<()> {
        let zero = vec![0u8; SLOT_HEADER_SIZE];
        for slot in 0..2 {
            self.device.write_at(self.slot_offset(slot), &zero)?;
        }
        Ok(())
    }

    fn cursors_in_ring(&self, ckpt: &MapCheckpoint) -> bool {
        let ring = self.layout.ring;
        ring.contains_block(ckpt.cursor)
            && ring.contains_block(ckpt.oldest)
            && ring.contains_block(ckpt.flushed)
    }
}
