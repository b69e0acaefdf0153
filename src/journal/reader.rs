//! Journal record reader
//!
//! Reads records back from the ring, validating them the same way for
//! replay, `oldest` iteration and the flusher.

use uuid::Uuid;

use crate::codec::{JournalExtent, JournalRecordHeader, BLOCK_SIZE};
use crate::device::BlockDevice;
use crate::error::{LsvdError, Result};

use super::record::{parse_header_block, record_crc, JournalRecord};
use super::ring::Ring;

pub(crate) fn block_offset(block: u32) -> u64 {
    block as u64 * BLOCK_SIZE as u64
}

/// Reads records from one journal device
pub(crate) struct RecordReader<'a> {
    device: &'a dyn BlockDevice,
    ring: Ring,
    vol_uuid: Uuid,
}

impl<'a> RecordReader<'a> {
    pub fn new(device: &'a dyn BlockDevice, ring: Ring, vol_uuid: Uuid) -> Self {
        Self {
            device,
            ring,
            vol_uuid,
        }
    }

    /// Header and extents of the record at `pos`, without the payload
    pub fn read_header(
        &self,
        pos: u32,
    ) -> Result<(JournalRecordHeader, Vec<JournalExtent>, Vec<u8>)> {
        if !self.ring.contains_block(pos) {
            return Err(LsvdError::InvalidArgument(format!(
                "block {} outside journal ring [{}, {})",
                pos, self.ring.base, self.ring.limit
            )));
        }
        let mut block = vec![0u8; BLOCK_SIZE];
        self.device.read_at(block_offset(pos), &mut block)?;
        parse_header_block(&block, &self.vol_uuid)
    }

    /// Full record at `pos`, CRC checked
    pub fn read_record(&self, pos: u32) -> Result<JournalRecord> {
        let (header, extents, extent_bytes) = self.read_header(pos)?;
        if header.len >= self.ring.capacity() {
            return Err(LsvdError::Recovery(format!(
                "record seq {} spans {} blocks, ring holds {}",
                header.seq,
                header.len,
                self.ring.capacity()
            )));
        }

        let payload_blocks = header.len - 1;
        let mut payload = vec![0u8; payload_blocks as usize * BLOCK_SIZE];
        let mut filled = 0usize;
        for run in self.ring.payload_runs(pos, payload_blocks) {
            let bytes = run.blocks as usize * BLOCK_SIZE;
            self.device
                .read_at(block_offset(run.start), &mut payload[filled..filled + bytes])?;
            filled += bytes;
        }

        let crc = record_crc(&extent_bytes, &payload);
        if crc != header.crc32 {
            return Err(LsvdError::Recovery(format!(
                "record seq {} at block {}: crc {:#010x} != {:#010x}",
                header.seq, pos, crc, header.crc32
            )));
        }

        let data_len: usize = extents
            .iter()
            .map(|e| e.len as usize * crate::codec::SECTOR_SIZE)
            .sum();
        payload.truncate(data_len);

        Ok(JournalRecord {
            pos,
            next: self.ring.advance(pos, header.len),
            header,
            extents,
            payload,
        })
    }
}
