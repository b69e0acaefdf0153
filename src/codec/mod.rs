//! Binary Codec Module
//!
//! Fixed-layout encodings for every on-disk structure: journal superblocks,
//! journal record headers and extents, backend object headers and their
//! variable-length tables.
//!
//! ## Conventions
//! - All integers are little-endian
//! - Structures are packed: no padding between fields
//! - Decoding produces owned values; nothing aliases the source buffer
//! - Variable-length tables are `{offset, len}` byte ranges into the object,
//!   decoded through the single routine in [`table`]
//!
//! ## Units
//! ```text
//! sector = 512 bytes      (LBAs, extent lengths, object offsets)
//! block  = 4096 bytes     (journal addressing, 8 sectors)
//! ```

pub mod journal;
pub mod object;
pub mod table;

use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::error::{LsvdError, Result};

pub use journal::{
    JournalExtent, JournalRecordHeader, JournalSuperblock, ReadCacheSuper, WriteCacheSuper,
    J_DATA, J_READ_SUPER, J_SUPER, J_WRITE_SUPER, MAX_RECORD_EXTENTS,
};
pub use object::{
    CkptHeader, CkptMapEntry, CkptObj, CloneInfo, DataHeader, DataMapEntry, DeferredDelete,
    ObjCleaned, ObjectHeader, ObjectType, SnapInfo, SuperHeader, CLONE_NAME_LEN,
};
pub use table::{decode_table, encode_table, Table, TableError};

// =============================================================================
// Shared Constants
// =============================================================================

/// Magic number at the start of every LSVD structure ("LSVD")
pub const LSVD_MAGIC: u32 = 0x4456_534c;

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Bytes per sector
pub const SECTOR_SIZE: usize = 512;

/// Bytes per journal block
pub const BLOCK_SIZE: usize = 4096;

/// Sectors per journal block
pub const SECTORS_PER_BLOCK: u64 = (BLOCK_SIZE / SECTOR_SIZE) as u64;

// =============================================================================
// Fixed-size Records
// =============================================================================

/// A structure with a fixed encoded size.
///
/// `get` may assume `SIZE` bytes are available; callers go through
/// [`decode`] or [`decode_table`], which check bounds first.
pub trait Record: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Name used in error reports
    const NAME: &'static str;

    fn put<B: BufMut>(&self, buf: &mut B);

    fn get<B: Buf>(buf: &mut B) -> Self;
}

/// Table of checkpoint sequence numbers
impl Record for u32 {
    const SIZE: usize = 4;
    const NAME: &'static str = "u32";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(*self);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        buf.get_u32_le()
    }
}

/// Decode a record from the start of `buf`
pub fn decode<T: Record>(buf: &[u8]) -> Result<T> {
    decode_at(buf, 0)
}

/// Decode a record at byte `offset` of `buf`
pub fn decode_at<T: Record>(buf: &[u8], offset: usize) -> Result<T> {
    let end = offset.checked_add(T::SIZE);
    match end {
        Some(end) if end <= buf.len() => {
            let mut cursor = &buf[offset..end];
            Ok(T::get(&mut cursor))
        }
        _ => Err(LsvdError::Truncated {
            table: T::NAME,
            offset,
            len: T::SIZE,
            available: buf.len(),
        }),
    }
}

/// Encode a record into a fresh buffer
pub fn encode<T: Record>(record: &T) -> Vec<u8> {
    let mut buf = Vec::with_capacity(T::SIZE);
    record.put(&mut buf);
    buf
}

// =============================================================================
// Helpers
// =============================================================================

pub(crate) fn put_uuid<B: BufMut>(buf: &mut B, uuid: &Uuid) {
    buf.put_slice(uuid.as_bytes());
}

pub(crate) fn get_uuid<B: Buf>(buf: &mut B) -> Uuid {
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Uuid::from_bytes(raw)
}

/// Check the magic/version pair shared by every structure
pub(crate) fn check_magic(structure: &'static str, magic: u32, version: u32) -> Result<()> {
    if magic != LSVD_MAGIC {
        return Err(LsvdError::BadMagic {
            structure,
            expected: LSVD_MAGIC,
            found: magic,
        });
    }
    if version != FORMAT_VERSION {
        return Err(LsvdError::UnsupportedVersion { structure, version });
    }
    Ok(())
}

/// `n / m`, rounded up
pub fn div_round_up(n: usize, m: usize) -> usize {
    (n + m - 1) / m
}

/// Round `n` up to a multiple of `m`
pub fn round_up(n: usize, m: usize) -> usize {
    m * div_round_up(n, m)
}
