//! Journal record encoding
//!
//! A record is one header block (header + extent table) followed by the
//! payload of every extent, concatenated in extent order and zero-padded to
//! whole blocks.

use uuid::Uuid;

use crate::codec::{
    self, div_round_up, JournalExtent, JournalRecordHeader, Record, BLOCK_SIZE,
    MAX_RECORD_EXTENTS, SECTOR_SIZE,
};
use crate::error::{LsvdError, Result};

/// A record as read back from the ring
#[derive(Debug, Clone)]
pub struct JournalRecord {
    /// Block holding the header
    pub pos: u32,
    /// Block just past the record
    pub next: u32,
    pub header: JournalRecordHeader,
    pub extents: Vec<JournalExtent>,
    /// Payload of every extent, unpadded
    pub payload: Vec<u8>,
}

impl JournalRecord {
    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    /// `(lba, bytes)` for each extent, in issue order
    pub fn writes(&self) -> impl Iterator<Item = (u64, &[u8])> + '_ {
        let mut offset = 0usize;
        self.extents.iter().map(move |e| {
            let len = e.len as usize * SECTOR_SIZE;
            let slice = &self.payload[offset..offset + len];
            offset += len;
            (e.lba, slice)
        })
    }
}

/// Encoded record ready to be written
pub(crate) struct RecordImage {
    pub header: JournalRecordHeader,
    pub extents: Vec<JournalExtent>,
    /// Header block followed by the padded payload
    pub bytes: Vec<u8>,
}

impl RecordImage {
    pub fn blocks(&self) -> u32 {
        self.header.len
    }

    pub fn payload_blocks(&self) -> u32 {
        self.header.len - 1
    }
}

/// Payload blocks needed for `sectors` sectors of data
pub(crate) fn payload_blocks(sectors: u64) -> u32 {
    div_round_up(sectors as usize * SECTOR_SIZE, BLOCK_SIZE) as u32
}

/// CRC over the extent table bytes followed by the padded payload
pub(crate) fn record_crc(extent_bytes: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(extent_bytes);
    hasher.update(payload);
    hasher.finalize()
}

/// Check the shape of a batch of writes before anything is allocated
pub(crate) fn check_writes(writes: &[(u64, &[u8])]) -> Result<()> {
    if writes.is_empty() {
        return Err(LsvdError::InvalidArgument("empty record".to_string()));
    }
    if writes.len() > MAX_RECORD_EXTENTS {
        return Err(LsvdError::RecordTooLarge(format!(
            "{} extents, at most {} fit in a record header",
            writes.len(),
            MAX_RECORD_EXTENTS
        )));
    }
    for (lba, data) in writes {
        if data.is_empty() || data.len() % SECTOR_SIZE != 0 {
            return Err(LsvdError::InvalidArgument(format!(
                "write at lba {} has length {}, not a non-zero multiple of {}",
                lba,
                data.len(),
                SECTOR_SIZE
            )));
        }
        let sectors = (data.len() / SECTOR_SIZE) as u64;
        if sectors > u32::MAX as u64 || lba.checked_add(sectors).is_none() {
            return Err(LsvdError::InvalidArgument(format!(
                "write at lba {} of {} sectors out of range",
                lba, sectors
            )));
        }
    }
    Ok(())
}

/// Encode `writes` as a record with sequence number `seq`
pub(crate) fn build_record(vol_uuid: Uuid, seq: u64, writes: &[(u64, &[u8])]) -> RecordImage {
    let extents: Vec<JournalExtent> = writes
        .iter()
        .map(|(lba, data)| JournalExtent {
            lba: *lba,
            len: (data.len() / SECTOR_SIZE) as u32,
        })
        .collect();

    let sectors: u64 = extents.iter().map(|e| e.len as u64).sum();
    let pblocks = payload_blocks(sectors);

    let mut extent_bytes = Vec::with_capacity(extents.len() * JournalExtent::SIZE);
    codec::encode_table(&extents, &mut extent_bytes);

    let mut payload = Vec::with_capacity(pblocks as usize * BLOCK_SIZE);
    for (_, data) in writes {
        payload.extend_from_slice(data);
    }
    payload.resize(pblocks as usize * BLOCK_SIZE, 0);

    let crc = record_crc(&extent_bytes, &payload);
    let header = JournalRecordHeader::new(vol_uuid, seq, pblocks + 1, crc, extents.len());

    let mut bytes = Vec::with_capacity(BLOCK_SIZE + payload.len());
    header.put(&mut bytes);
    bytes.extend_from_slice(&extent_bytes);
    bytes.resize(BLOCK_SIZE, 0);
    bytes.extend_from_slice(&payload);

    RecordImage {
        header,
        extents,
        bytes,
    }
}

/// Decode and check a header block.
///
/// Verifies magic, kind, version, volume identity and the extent table
/// bounds. The CRC needs the payload and is checked by the reader.
pub fn parse_header_block(
    block: &[u8],
    vol_uuid: &Uuid,
) -> Result<(JournalRecordHeader, Vec<JournalExtent>, Vec<u8>)> {
    let header: JournalRecordHeader = codec::decode(block)?;
    header.validate()?;
    if header.vol_uuid != *vol_uuid {
        return Err(LsvdError::Recovery(format!(
            "record seq {} belongs to volume {}",
            header.seq, header.vol_uuid
        )));
    }
    let start = header.extent_offset as usize;
    let end = start + header.extent_len as usize;
    if end > block.len() {
        return Err(LsvdError::Truncated {
            table: JournalExtent::NAME,
            offset: start,
            len: header.extent_len as usize,
            available: block.len(),
        });
    }
    let extent_bytes = block[start..end].to_vec();
    let extents = codec::decode_table::<JournalExtent>(
        block,
        JournalExtent::NAME,
        header.extent_offset,
        header.extent_len,
    )?;
    if extents.is_empty() {
        return Err(LsvdError::Recovery(format!(
            "record seq {} has no extents",
            header.seq
        )));
    }
    let sectors: u64 = extents.iter().map(|e| e.len as u64).sum();
    if header.len != payload_blocks(sectors) + 1 {
        return Err(LsvdError::Recovery(format!(
            "record seq {} length {} does not match {} payload sectors",
            header.seq, header.len, sectors
        )));
    }
    Ok((header, extents, extent_bytes))
}
