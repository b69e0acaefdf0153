//! Backend object structures
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ ObjectHeader (28 bytes)                                      │
//! │   magic u32 | version u32 | type u32 | seq u64               │
//! │   hdr_sectors u32 | data_sectors u32                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Typed header                                                 │
//! │   SUPER: SuperHeader (56)   DATA: DataHeader (32)            │
//! │   CKPT:  CkptHeader (32)                                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Tables, located by {offset, len} in the typed header         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Padding to hdr_sectors * 512                                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data section (DATA objects only), data_sectors * 512         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::error::{LsvdError, Result};

use super::{check_magic, get_uuid, put_uuid, Record, FORMAT_VERSION, LSVD_MAGIC};

// =============================================================================
// Object Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ObjectType {
    Super = 1,
    Data = 2,
    Checkpoint = 3,
}

impl TryFrom<u32> for ObjectType {
    type Error = LsvdError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(ObjectType::Super),
            2 => Ok(ObjectType::Data),
            3 => Ok(ObjectType::Checkpoint),
            other => Err(LsvdError::InvalidObjectType(other)),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectType::Super => "SUPER",
            ObjectType::Data => "DATA",
            ObjectType::Checkpoint => "CKPT",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Common Header
// =============================================================================

/// Header shared by every backend object.
///
/// `object_type` is kept raw so a header with an unknown type still decodes;
/// [`ObjectHeader::kind`] performs the checked conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub magic: u32,
    pub version: u32,
    pub object_type: u32,
    pub seq: u64,
    pub hdr_sectors: u32,
    pub data_sectors: u32,
}

impl ObjectHeader {
    pub fn new(kind: ObjectType, seq: u64, hdr_sectors: u32, data_sectors: u32) -> Self {
        Self {
            magic: LSVD_MAGIC,
            version: FORMAT_VERSION,
            object_type: kind as u32,
            seq,
            hdr_sectors,
            data_sectors,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_magic(Self::NAME, self.magic, self.version)
    }

    pub fn kind(&self) -> Result<ObjectType> {
        ObjectType::try_from(self.object_type)
    }
}

impl Record for ObjectHeader {
    const SIZE: usize = 28;
    const NAME: &'static str = "object header";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.object_type);
        buf.put_u64_le(self.seq);
        buf.put_u32_le(self.hdr_sectors);
        buf.put_u32_le(self.data_sectors);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            magic: buf.get_u32_le(),
            version: buf.get_u32_le(),
            object_type: buf.get_u32_le(),
            seq: buf.get_u64_le(),
            hdr_sectors: buf.get_u32_le(),
            data_sectors: buf.get_u32_le(),
        }
    }
}

// =============================================================================
// Typed Headers
// =============================================================================

/// Volume superblock, stored in the un-numbered object named by the prefix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuperHeader {
    pub vol_size: u64,
    pub total_sectors: u64,
    pub live_sectors: u64,
    pub next_obj: u64,
    pub ckpts_offset: u32,
    pub ckpts_len: u32,
    pub snaps_offset: u32,
    pub snaps_len: u32,
    pub clones_offset: u32,
    pub clones_len: u32,
}

impl Record for SuperHeader {
    const SIZE: usize = 56;
    const NAME: &'static str = "super header";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.vol_size);
        buf.put_u64_le(self.total_sectors);
        buf.put_u64_le(self.live_sectors);
        buf.put_u64_le(self.next_obj);
        buf.put_u32_le(self.ckpts_offset);
        buf.put_u32_le(self.ckpts_len);
        buf.put_u32_le(self.snaps_offset);
        buf.put_u32_le(self.snaps_len);
        buf.put_u32_le(self.clones_offset);
        buf.put_u32_le(self.clones_len);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            vol_size: buf.get_u64_le(),
            total_sectors: buf.get_u64_le(),
            live_sectors: buf.get_u64_le(),
            next_obj: buf.get_u64_le(),
            ckpts_offset: buf.get_u32_le(),
            ckpts_len: buf.get_u32_le(),
            snaps_offset: buf.get_u32_le(),
            snaps_len: buf.get_u32_le(),
            clones_offset: buf.get_u32_le(),
            clones_len: buf.get_u32_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataHeader {
    pub last_data_obj: u64,
    pub ckpts_offset: u32,
    pub ckpts_len: u32,
    pub objs_cleaned_offset: u32,
    pub objs_cleaned_len: u32,
    pub map_offset: u32,
    pub map_len: u32,
}

impl Record for DataHeader {
    const SIZE: usize = 32;
    const NAME: &'static str = "data header";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.last_data_obj);
        buf.put_u32_le(self.ckpts_offset);
        buf.put_u32_le(self.ckpts_len);
        buf.put_u32_le(self.objs_cleaned_offset);
        buf.put_u32_le(self.objs_cleaned_len);
        buf.put_u32_le(self.map_offset);
        buf.put_u32_le(self.map_len);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            last_data_obj: buf.get_u64_le(),
            ckpts_offset: buf.get_u32_le(),
            ckpts_len: buf.get_u32_le(),
            objs_cleaned_offset: buf.get_u32_le(),
            objs_cleaned_len: buf.get_u32_le(),
            map_offset: buf.get_u32_le(),
            map_len: buf.get_u32_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CkptHeader {
    pub ckpts_offset: u32,
    pub ckpts_len: u32,
    pub objs_offset: u32,
    pub objs_len: u32,
    pub deletes_offset: u32,
    pub deletes_len: u32,
    pub map_offset: u32,
    pub map_len: u32,
}

impl Record for CkptHeader {
    const SIZE: usize = 32;
    const NAME: &'static str = "checkpoint header";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.ckpts_offset);
        buf.put_u32_le(self.ckpts_len);
        buf.put_u32_le(self.objs_offset);
        buf.put_u32_le(self.objs_len);
        buf.put_u32_le(self.deletes_offset);
        buf.put_u32_le(self.deletes_len);
        buf.put_u32_le(self.map_offset);
        buf.put_u32_le(self.map_len);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            ckpts_offset: buf.get_u32_le(),
            ckpts_len: buf.get_u32_le(),
            objs_offset: buf.get_u32_le(),
            objs_len: buf.get_u32_le(),
            deletes_offset: buf.get_u32_le(),
            deletes_len: buf.get_u32_le(),
            map_offset: buf.get_u32_le(),
            map_len: buf.get_u32_le(),
        }
    }
}

// =============================================================================
// Table Records
// =============================================================================

/// An object superseded since the previous DATA object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjCleaned {
    pub seq: u64,
    pub was_deleted: u32,
}

impl Record for ObjCleaned {
    const SIZE: usize = 12;
    const NAME: &'static str = "objs_cleaned";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.seq);
        buf.put_u32_le(self.was_deleted);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            seq: buf.get_u64_le(),
            was_deleted: buf.get_u32_le(),
        }
    }
}

/// One extent of a DATA object; its location is implicit (consecutive
/// offsets in the object's data section)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMapEntry {
    pub lba: u64,
    pub len: u32,
}

impl Record for DataMapEntry {
    const SIZE: usize = 12;
    const NAME: &'static str = "data map";

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

/// A live object listed by a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CkptObj {
    pub seq: u64,
    pub hdr_sectors: u32,
    pub data_sectors: u32,
    pub live_sectors: u32,
}

impl Record for CkptObj {
    const SIZE: usize = 20;
    const NAME: &'static str = "objs";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.seq);
        buf.put_u32_le(self.hdr_sectors);
        buf.put_u32_le(self.data_sectors);
        buf.put_u32_le(self.live_sectors);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            seq: buf.get_u64_le(),
            hdr_sectors: buf.get_u32_le(),
            data_sectors: buf.get_u32_le(),
            live_sectors: buf.get_u32_le(),
        }
    }
}

/// An object scheduled for deletion once the checkpoint is durable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredDelete {
    pub seq: u64,
    pub time: u32,
}

impl Record for DeferredDelete {
    const SIZE: usize = 12;
    const NAME: &'static str = "deletes";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.seq);
        buf.put_u32_le(self.time);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            seq: buf.get_u64_le(),
            time: buf.get_u32_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CkptMapEntry {
    pub lba: u64,
    pub len: u32,
    pub obj: u64,
    pub offset: u32,
}

impl Record for CkptMapEntry {
    const SIZE: usize = 24;
    const NAME: &'static str = "checkpoint map";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.lba);
        buf.put_u32_le(self.len);
        buf.put_u64_le(self.obj);
        buf.put_u32_le(self.offset);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            lba: buf.get_u64_le(),
            len: buf.get_u32_le(),
            obj: buf.get_u64_le(),
            offset: buf.get_u32_le(),
        }
    }
}

/// A snapshot, pinned at the checkpoint `seq`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapInfo {
    pub snap_uuid: Uuid,
    pub seq: u64,
}

impl Record for SnapInfo {
    const SIZE: usize = 24;
    const NAME: &'static str = "snaps";

    fn put<B: BufMut>(&self, buf: &mut B) {
        put_uuid(buf, &self.snap_uuid);
        buf.put_u64_le(self.seq);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            snap_uuid: get_uuid(buf),
            seq: buf.get_u64_le(),
        }
    }
}

/// Bytes reserved for the base volume name in a [`CloneInfo`]
pub const CLONE_NAME_LEN: usize = 40;

/// The volume a clone was made from, and the base checkpoint it reads
/// through to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneInfo {
    pub base_uuid: Uuid,
    pub seq: u64,
    name: [u8; CLONE_NAME_LEN],
}

impl CloneInfo {
    pub fn new(base_uuid: Uuid, seq: u64, name: &str) -> Result<Self> {
        if name.is_empty() || name.len() > CLONE_NAME_LEN || name.contains('\0') {
            return Err(LsvdError::InvalidArgument(format!(
                "clone base name '{}' must be 1 to {} bytes without NUL",
                name, CLONE_NAME_LEN
            )));
        }
        let mut raw = [0u8; CLONE_NAME_LEN];
        raw[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            base_uuid,
            seq,
            name: raw,
        })
    }

    /// Object prefix of the base volume
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(CLONE_NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

impl Record for CloneInfo {
    const SIZE: usize = 64;
    const NAME: &'static str = "clones";

    fn put<B: BufMut>(&self, buf: &mut B) {
        put_uuid(buf, &self.base_uuid);
        buf.put_u64_le(self.seq);
        buf.put_slice(&self.name);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        let base_uuid = get_uuid(buf);
        let seq = buf.get_u64_le();
        let mut name = [0u8; CLONE_NAME_LEN];
        buf.copy_to_slice(&mut name);
        Self {
            base_uuid,
            seq,
            name,
        }
    }
}
