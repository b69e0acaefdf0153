//! Backend object builders
//!
//! Assemble sealed SUPER, DATA and CKPT objects.

use crate::codec::table::place_table;
use crate::codec::{
    round_up, CkptHeader, CkptMapEntry, CkptObj, CloneInfo, DataHeader, DataMapEntry,
    DeferredDelete, ObjCleaned, ObjectHeader, ObjectType, Record, SnapInfo, SuperHeader,
    SECTOR_SIZE,
};
use crate::error::{LsvdError, Result};
use crate::journal::JournalRecord;

/// A finished object, ready for the store
#[derive(Debug, Clone)]
pub struct SealedObject {
    pub kind: ObjectType,
    pub seq: u64,
    pub hdr_sectors: u32,
    pub data_sectors: u32,
    pub bytes: Vec<u8>,
}

/// Header region: common header, typed header, tables, padded to sectors.
///
/// `typed` is written after the tables are placed, so the closure that
/// places them returns it.
fn seal_header<F>(kind: ObjectType, seq: u64, typed_size: usize, data_sectors: u32, place: F) -> Vec<u8>
where
    F: FnOnce(&mut Vec<u8>) -> Vec<u8>,
{
    let mut buf = vec![0u8; ObjectHeader::SIZE + typed_size];
    let typed = place(&mut buf);
    buf[ObjectHeader::SIZE..ObjectHeader::SIZE + typed_size].copy_from_slice(&typed);

    let hdr_len = round_up(buf.len(), SECTOR_SIZE);
    buf.resize(hdr_len, 0);
    let hdr_sectors = (hdr_len / SECTOR_SIZE) as u32;

    let mut common = Vec::with_capacity(ObjectHeader::SIZE);
    ObjectHeader::new(kind, seq, hdr_sectors, data_sectors).put(&mut common);
    buf[..ObjectHeader::SIZE].copy_from_slice(&common);
    buf
}

fn encoded<T: Record>(record: &T) -> Vec<u8> {
    crate::codec::encode(record)
}

// =============================================================================
// DATA
// =============================================================================

/// Collects journal writes into one DATA object
#[derive(Debug, Default)]
pub struct DataObjectBuilder {
    map: Vec<DataMapEntry>,
    data: Vec<u8>,
}

impl DataObjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` for `lba`; consecutive writes to adjacent LBAs share a
    /// map entry
    pub fn add(&mut self, lba: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() % SECTOR_SIZE != 0 {
            return Err(LsvdError::InvalidArgument(format!(
                "object data of {} bytes is not whole sectors",
                data.len()
            )));
        }
        let sectors = u32::try_from(data.len() / SECTOR_SIZE).map_err(|_| {
            LsvdError::InvalidArgument(format!("write of {} bytes too large", data.len()))
        })?;

        match self.map.last_mut() {
            Some(last)
                if last.lba + last.len as u64 == lba
                    && (last.len as u64 + sectors as u64) <= u32::MAX as u64 =>
            {
                last.len += sectors;
            }
            _ => self.map.push(DataMapEntry { lba, len: sectors }),
        }
        self.data.extend_from_slice(data);
        Ok(())
    }

    /// Append every write of a journal record, in record order
    pub fn add_record(&mut self, record: &JournalRecord) -> Result<()> {
        for (lba, data) in record.writes() {
            self.add(lba, data)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn data_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn extents(&self) -> &[DataMapEntry] {
        &self.map
    }

    pub fn seal(
        self,
        seq: u64,
        last_data_obj: u64,
        ckpts: &[u32],
        cleaned: &[ObjCleaned],
    ) -> SealedObject {
        let data_sectors = (self.data.len() / SECTOR_SIZE) as u32;
        let map = self.map;
        let mut bytes = seal_header(ObjectType::Data, seq, DataHeader::SIZE, data_sectors, |buf| {
            let (ckpts_offset, ckpts_len) = place_table(ckpts, buf);
            let (objs_cleaned_offset, objs_cleaned_len) = place_table(cleaned, buf);
            let (map_offset, map_len) = place_table(&map, buf);
            encoded(&DataHeader {
                last_data_obj,
                ckpts_offset,
                ckpts_len,
                objs_cleaned_offset,
                objs_cleaned_len,
                map_offset,
                map_len,
            })
        });
        let hdr_sectors = (bytes.len() / SECTOR_SIZE) as u32;
        bytes.extend_from_slice(&self.data);

        SealedObject {
            kind: ObjectType::Data,
            seq,
            hdr_sectors,
            data_sectors,
            bytes,
        }
    }
}

// =============================================================================
// CKPT
// =============================================================================

/// Snapshot of the backend map and object table
#[derive(Debug, Default)]
pub struct CheckpointBuilder {
    ckpts: Vec<u32>,
    objs: Vec<CkptObj>,
    deletes: Vec<DeferredDelete>,
    map: Vec<CkptMapEntry>,
}

impl CheckpointBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_checkpoint(&mut self, seq: u32) -> &mut Self {
        self.ckpts.push(seq);
        self
    }

    pub fn add_object(&mut self, obj: CkptObj) -> &mut Self {
        self.objs.push(obj);
        self
    }

    pub fn add_delete(&mut self, delete: DeferredDelete) -> &mut Self {
        self.deletes.push(delete);
        self
    }

    pub fn add_map_entry(&mut self, entry: CkptMapEntry) -> &mut Self {
        self.map.push(entry);
        self
    }

    pub fn seal(self, seq: u64) -> SealedObject {
        let Self {
            ckpts,
            objs,
            deletes,
            map,
        } = self;
        let bytes = seal_header(ObjectType::Checkpoint, seq, CkptHeader::SIZE, 0, |buf| {
            let (ckpts_offset, ckpts_len) = place_table(&ckpts, buf);
            let (objs_offset, objs_len) = place_table(&objs, buf);
            let (deletes_offset, deletes_len) = place_table(&deletes, buf);
            let (map_offset, map_len) = place_table(&map, buf);
            encoded(&CkptHeader {
                ckpts_offset,
                ckpts_len,
                objs_offset,
                objs_len,
                deletes_offset,
                deletes_len,
                map_offset,
                map_len,
            })
        });
        SealedObject {
            kind: ObjectType::Checkpoint,
            seq,
            hdr_sectors: (bytes.len() / SECTOR_SIZE) as u32,
            data_sectors: 0,
            bytes,
        }
    }
}

// =============================================================================
// SUPER
// =============================================================================

/// Volume superblock object; `header`'s table fields are filled in here
pub fn build_super(
    header: SuperHeader,
    ckpts: &[u32],
    snaps: &[SnapInfo],
    clones: &[CloneInfo],
) -> SealedObject {
    let bytes = seal_header(ObjectType::Super, 0, SuperHeader::SIZE, 0, |buf| {
        let (ckpts_offset, ckpts_len) = place_table(ckpts, buf);
        let (snaps_offset, snaps_len) = place_table(snaps, buf);
        let (clones_offset, clones_len) = place_table(clones, buf);
        encoded(&SuperHeader {
            ckpts_offset,
            ckpts_len,
            snaps_offset,
            snaps_len,
            clones_offset,
            clones_len,
            ..header
        })
    });
    SealedObject {
        kind: ObjectType::Super,
        seq: 0,
        hdr_sectors: (bytes.len() / SECTOR_SIZE) as u32,
        data_sectors: 0,
        bytes,
    }
}
