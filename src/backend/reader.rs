//! Backend object decoding
//!
//! Decodes the common header, dispatches on its type and decodes the typed
//! header and each table. A table whose range falls outside the buffer is
//! reported in its own [`Table`]; the fields before it stay available.

use crate::codec::{
    self, CkptHeader, CkptMapEntry, CkptObj, CloneInfo, DataHeader, DataMapEntry,
    DeferredDelete, ObjCleaned, ObjectHeader, ObjectType, Record, SnapInfo, SuperHeader, Table,
};
use crate::error::Result;

/// A decoded backend object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedObject {
    pub header: ObjectHeader,
    pub body: ObjectBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectBody {
    Super {
        header: SuperHeader,
        ckpts: Table<u32>,
        snaps: Table<SnapInfo>,
        clones: Table<CloneInfo>,
    },
    Data {
        header: DataHeader,
        ckpts: Table<u32>,
        objs_cleaned: Table<ObjCleaned>,
        map: Table<DataMapEntry>,
    },
    Checkpoint {
        header: CkptHeader,
        ckpts: Table<u32>,
        objs: Table<CkptObj>,
        deletes: Table<DeferredDelete>,
        map: Table<CkptMapEntry>,
    },
}

impl ParsedObject {
    pub fn kind(&self) -> ObjectType {
        match self.body {
            ObjectBody::Super { .. } => ObjectType::Super,
            ObjectBody::Data { .. } => ObjectType::Data,
            ObjectBody::Checkpoint { .. } => ObjectType::Checkpoint,
        }
    }

    /// Every table decoded without error
    pub fn is_complete(&self) -> bool {
        match &self.body {
            ObjectBody::Super {
                ckpts,
                snaps,
                clones,
                ..
            } => ckpts.is_ok() && snaps.is_ok() && clones.is_ok(),
            ObjectBody::Data {
                ckpts,
                objs_cleaned,
                map,
                ..
            } => ckpts.is_ok() && objs_cleaned.is_ok() && map.is_ok(),
            ObjectBody::Checkpoint {
                ckpts,
                objs,
                deletes,
                map,
                ..
            } => ckpts.is_ok() && objs.is_ok() && deletes.is_ok() && map.is_ok(),
        }
    }
}

/// Decode a backend object.
///
/// Fails on a bad magic, unsupported version, unknown type, or a buffer too
/// short for the fixed headers. Table problems are kept per table.
pub fn decode_object(buf: &[u8]) -> Result<ParsedObject> {
    let header: ObjectHeader = codec::decode(buf)?;
    header.validate()?;
    let kind = header.kind()?;
    let at = ObjectHeader::SIZE;

    let body = match kind {
        ObjectType::Super => {
            let h: SuperHeader = codec::decode_at(buf, at)?;
            ObjectBody::Super {
                header: h,
                ckpts: Table::decode(buf, "ckpts", h.ckpts_offset, h.ckpts_len),
                snaps: Table::decode(buf, SnapInfo::NAME, h.snaps_offset, h.snaps_len),
                clones: Table::decode(buf, CloneInfo::NAME, h.clones_offset, h.clones_len),
            }
        }
        ObjectType::Data => {
            let h: DataHeader = codec::decode_at(buf, at)?;
            ObjectBody::Data {
                header: h,
                ckpts: Table::decode(buf, "ckpts", h.ckpts_offset, h.ckpts_len),
                objs_cleaned: Table::decode(
                    buf,
                    ObjCleaned::NAME,
                    h.objs_cleaned_offset,
                    h.objs_cleaned_len,
                ),
                map: Table::decode(buf, DataMapEntry::NAME, h.map_offset, h.map_len),
            }
        }
        ObjectType::Checkpoint => {
            let h: CkptHeader = codec::decode_at(buf, at)?;
            ObjectBody::Checkpoint {
                header: h,
                ckpts: Table::decode(buf, "ckpts", h.ckpts_offset, h.ckpts_len),
                objs: Table::decode(buf, CkptObj::NAME, h.objs_offset, h.objs_len),
                deletes: Table::decode(buf, DeferredDelete::NAME, h.deletes_offset, h.deletes_len),
                map: Table::decode(buf, CkptMapEntry::NAME, h.map_offset, h.map_len),
            }
        }
    };

    Ok(ParsedObject { header, body })
}
