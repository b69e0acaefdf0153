//! Journal device structures
//!
//! ```text
//! block 0                 JournalSuperblock   (kind 1)
//! block write_super       WriteCacheSuper     (kind 2)
//! block read_super        ReadCacheSuper      (kind 3)
//! [map_start, +2*map_blocks)  checkpoint slots A and B
//! [base, limit)           record ring
//!
//! record:
//! ┌──────────────────────────────────────────┐
//! │ JournalRecordHeader (52 bytes)           │  header block,
//! │ JournalExtent[extent_len / 12]           │  never split
//! │ zero padding to 4096                     │
//! ├──────────────────────────────────────────┤
//! │ payload blocks (len - 1), may wrap       │
//! └──────────────────────────────────────────┘
//! ```

use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::error::{LsvdError, Result};

use super::{check_magic, get_uuid, put_uuid, Record, BLOCK_SIZE, FORMAT_VERSION, LSVD_MAGIC};

/// Block kind of the device superblock
pub const J_SUPER: u32 = 1;
/// Block kind of the write-cache superblock
pub const J_WRITE_SUPER: u32 = 2;
/// Block kind of the read-cache superblock
pub const J_READ_SUPER: u32 = 3;
/// Block kind of a data record header
pub const J_DATA: u32 = 16;

/// Extents that fit in a record's header block
pub const MAX_RECORD_EXTENTS: usize =
    (BLOCK_SIZE - JournalRecordHeader::SIZE) / JournalExtent::SIZE;

fn check_block(structure: &'static str, magic: u32, kind: u32, expected: u32, version: u32) -> Result<()> {
    check_magic(structure, magic, version)?;
    if kind != expected {
        return Err(LsvdError::InvalidRecordKind {
            expected,
            found: kind,
        });
    }
    Ok(())
}

// =============================================================================
// Superblocks
// =============================================================================

/// Device identity, block 0 of the journal device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalSuperblock {
    pub magic: u32,
    pub kind: u32,
    pub version: u32,
    pub vol_uuid: Uuid,
    pub total_blocks: u32,
    pub write_super: u32,
    pub read_super: u32,
}

impl JournalSuperblock {
    pub fn new(vol_uuid: Uuid, total_blocks: u32, write_super: u32, read_super: u32) -> Self {
        Self {
            magic: LSVD_MAGIC,
            kind: J_SUPER,
            version: FORMAT_VERSION,
            vol_uuid,
            total_blocks,
            write_super,
            read_super,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_block(Self::NAME, self.magic, self.kind, J_SUPER, self.version)
    }
}

impl Record for JournalSuperblock {
    const SIZE: usize = 40;
    const NAME: &'static str = "journal superblock";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.kind);
        buf.put_u32_le(self.version);
        put_uuid(buf, &self.vol_uuid);
        buf.put_u32_le(self.total_blocks);
        buf.put_u32_le(self.write_super);
        buf.put_u32_le(self.read_super);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            magic: buf.get_u32_le(),
            kind: buf.get_u32_le(),
            version: buf.get_u32_le(),
            vol_uuid: get_uuid(buf),
            total_blocks: buf.get_u32_le(),
            write_super: buf.get_u32_le(),
            read_super: buf.get_u32_le(),
        }
    }
}

/// Write-cache role superblock: ring bounds, cursors and sequence counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCacheSuper {
    pub magic: u32,
    pub kind: u32,
    pub version: u32,
    pub vol_uuid: Uuid,
    pub base: u32,
    pub limit: u32,
    pub next: u32,
    pub oldest: u32,
    pub flushed: u32,
    pub seq: u64,
    pub map_start: u32,
    pub map_blocks: u32,
    pub ckpt_generation: u64,
}

impl WriteCacheSuper {
    pub fn validate(&self, vol_uuid: &Uuid) -> Result<()> {
        check_block(Self::NAME, self.magic, self.kind, J_WRITE_SUPER, self.version)?;
        if self.vol_uuid != *vol_uuid {
            return Err(LsvdError::Recovery(format!(
                "write-cache superblock belongs to volume {}, expected {}",
                self.vol_uuid, vol_uuid
            )));
        }
        if self.base >= self.limit
            || !(self.base..self.limit).contains(&self.next)
            || !(self.base..self.limit).contains(&self.oldest)
            || !(self.base..self.limit).contains(&self.flushed)
        {
            return Err(LsvdError::Recovery(format!(
                "write-cache cursors out of range: base {} limit {} next {} oldest {} flushed {}",
                self.base, self.limit, self.next, self.oldest, self.flushed
            )));
        }
        Ok(())
    }
}

impl Record for WriteCacheSuper {
    const SIZE: usize = 72;
    const NAME: &'static str = "write-cache superblock";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.kind);
        buf.put_u32_le(self.version);
        put_uuid(buf, &self.vol_uuid);
        buf.put_u32_le(self.base);
        buf.put_u32_le(self.limit);
        buf.put_u32_le(self.next);
        buf.put_u32_le(self.oldest);
        buf.put_u32_le(self.flushed);
        buf.put_u64_le(self.seq);
        buf.put_u32_le(self.map_start);
        buf.put_u32_le(self.map_blocks);
        buf.put_u64_le(self.ckpt_generation);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            magic: buf.get_u32_le(),
            kind: buf.get_u32_le(),
            version: buf.get_u32_le(),
            vol_uuid: get_uuid(buf),
            base: buf.get_u32_le(),
            limit: buf.get_u32_le(),
            next: buf.get_u32_le(),
            oldest: buf.get_u32_le(),
            flushed: buf.get_u32_le(),
            seq: buf.get_u64_le(),
            map_start: buf.get_u32_le(),
            map_blocks: buf.get_u32_le(),
            ckpt_generation: buf.get_u64_le(),
        }
    }
}

/// Read-cache role superblock. Formatted and validated; the read cache
/// itself is not implemented, so `units` is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCacheSuper {
    pub magic: u32,
    pub kind: u32,
    pub version: u32,
    pub vol_uuid: Uuid,
    pub unit_sectors: u32,
    pub base: u32,
    pub units: u32,
    pub map_start: u32,
    pub map_blocks: u32,
}

impl ReadCacheSuper {
    pub fn validate(&self) -> Result<()> {
        check_block(Self::NAME, self.magic, self.kind, J_READ_SUPER, self.version)
    }
}

impl Record for ReadCacheSuper {
    const SIZE: usize = 48;
    const NAME: &'static str = "read-cache superblock";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.kind);
        buf.put_u32_le(self.version);
        put_uuid(buf, &self.vol_uuid);
        buf.put_u32_le(self.unit_sectors);
        buf.put_u32_le(self.base);
        buf.put_u32_le(self.units);
        buf.put_u32_le(self.map_start);
        buf.put_u32_le(self.map_blocks);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            magic: buf.get_u32_le(),
            kind: buf.get_u32_le(),
            version: buf.get_u32_le(),
            vol_uuid: get_uuid(buf),
            unit_sectors: buf.get_u32_le(),
            base: buf.get_u32_le(),
            units: buf.get_u32_le(),
            map_start: buf.get_u32_le(),
            map_blocks: buf.get_u32_le(),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalRecordHeader {
    pub magic: u32,
    pub kind: u32,
    pub version: u32,
    pub vol_uuid: Uuid,
    pub seq: u64,
    /// Blocks occupied by the record, header block included
    pub len: u32,
    /// CRC32 over the extent table and the padded payload
    pub crc32: u32,
    pub extent_offset: u32,
    pub extent_len: u32,
}

impl JournalRecordHeader {
    pub fn new(vol_uuid: Uuid, seq: u64, len: u32, crc32: u32, extent_count: usize) -> Self {
        Self {
            magic: LSVD_MAGIC,
            kind: J_DATA,
            version: FORMAT_VERSION,
            vol_uuid,
            seq,
            len,
            crc32,
            extent_offset: Self::SIZE as u32,
            extent_len: (extent_count * JournalExtent::SIZE) as u32,
        }
    }

    /// Structural checks that need nothing beyond the header block itself
    pub fn validate(&self) -> Result<()> {
        check_block(Self::NAME, self.magic, self.kind, J_DATA, self.version)?;
        let end = self.extent_offset as usize + self.extent_len as usize;
        if (self.extent_offset as usize) < Self::SIZE || end > BLOCK_SIZE {
            return Err(LsvdError::Truncated {
                table: JournalExtent::NAME,
                offset: self.extent_offset as usize,
                len: self.extent_len as usize,
                available: BLOCK_SIZE,
            });
        }
        if self.extent_len as usize % JournalExtent::SIZE != 0 {
            return Err(LsvdError::MalformedTable {
                table: JournalExtent::NAME,
                len: self.extent_len,
                record_size: JournalExtent::SIZE,
            });
        }
        Ok(())
    }
}

impl Record for JournalRecordHeader {
    const SIZE: usize = 52;
    const NAME: &'static str = "journal record header";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.kind);
        buf.put_u32_le(self.version);
        put_uuid(buf, &self.vol_uuid);
        buf.put_u64_le(self.seq);
        buf.put_u32_le(self.len);
        buf.put_u32_le(self.crc32);
        buf.put_u32_le(self.extent_offset);
        buf.put_u32_le(self.extent_len);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            magic: buf.get_u32_le(),
            kind: buf.get_u32_le(),
            version: buf.get_u32_le(),
            vol_uuid: get_uuid(buf),
            seq: buf.get_u64_le(),
            len: buf.get_u32_le(),
            crc32: buf.get_u32_le(),
            extent_offset: buf.get_u32_le(),
            extent_len: buf.get_u32_le(),
        }
    }
}

/// `{lba, len}` in sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JournalExtent {
    pub lba: u64,
    pub len: u32,
}

impl Record for JournalExtent {
    const SIZE: usize = 12;
    const NAME: &'static str = "journal extents";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.lba);
        buf.put_u32_le(self.len);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            lba: buf.get_u64_le(),
            len: buf.get_u32_le(),
        }
    }
}
