//! Variable-length tables
//!
//! Backend objects locate their tables with `{offset, len}` pairs measured in
//! bytes from the start of the object. Every table goes through
//! [`decode_table`], which checks bounds and alignment before touching the
//! bytes.

use thiserror::Error;

use crate::error::LsvdError;

use super::Record;

/// Why a single table could not be decoded.
///
/// Kept per table inside a parsed object so the fields decoded before a bad
/// table stay visible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("table '{table}' at {offset}+{len} exceeds object size {available}")]
    Truncated {
        table: &'static str,
        offset: u32,
        len: u32,
        available: usize,
    },

    #[error("table '{table}' length {len} is not a multiple of {record_size}")]
    Misaligned {
        table: &'static str,
        len: u32,
        record_size: usize,
    },
}

impl From<TableError> for LsvdError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Truncated {
                table,
                offset,
                len,
                available,
            } => LsvdError::Truncated {
                table,
                offset: offset as usize,
                len: len as usize,
                available,
            },
            TableError::Misaligned {
                table,
                len,
                record_size,
            } => LsvdError::MalformedTable {
                table,
                len,
                record_size,
            },
        }
    }
}

/// A decoded table together with where it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table<T> {
    pub offset: u32,
    pub len: u32,
    pub entries: std::result::Result<Vec<T>, TableError>,
}

impl<T: Record> Table<T> {
    /// Decode the table `name` located at `offset..offset+len` of `buf`
    pub fn decode(buf: &[u8], name: &'static str, offset: u32, len: u32) -> Self {
        Self {
            offset,
            len,
            entries: decode_table(buf, name, offset, len),
        }
    }
}

impl<T> Table<T> {
    /// Entries, or the table's error converted for strict callers
    pub fn entries(&self) -> crate::Result<&[T]> {
        match &self.entries {
            Ok(v) => Ok(v.as_slice()),
            Err(e) => Err(e.clone().into()),
        }
    }

    pub fn into_entries(self) -> crate::Result<Vec<T>> {
        self.entries.map_err(LsvdError::from)
    }

    pub fn is_ok(&self) -> bool {
        self.entries.is_ok()
    }
}

/// Decode `len / T::SIZE` records from `buf[offset..offset+len]`.
///
/// An empty table (`len == 0`) decodes to nothing regardless of `offset`.
pub fn decode_table<T: Record>(
    buf: &[u8],
    name: &'static str,
    offset: u32,
    len: u32,
) -> std::result::Result<Vec<T>, TableError> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let start = offset as usize;
    let end = start.checked_add(len as usize);
    let end = match end {
        Some(end) if end <= buf.len() => end,
        _ => {
            return Err(TableError::Truncated {
                table: name,
                offset,
                len,
                available: buf.len(),
            })
        }
    };
    if len as usize % T::SIZE != 0 {
        return Err(TableError::Misaligned {
            table: name,
            len,
            record_size: T::SIZE,
        });
    }

    let mut cursor = &buf[start..end];
    let mut entries = Vec::with_capacity(len as usize / T::SIZE);
    while !cursor.is_empty() {
        entries.push(T::get(&mut cursor));
    }
    Ok(entries)
}

/// Append the encoding of `items` to `out`; returns the encoded length
pub fn encode_table<T: Record>(items: &[T], out: &mut Vec<u8>) -> u32 {
    let before = out.len();
    out.reserve(items.len() * T::SIZE);
    for item in items {
        item.put(out);
    }
    (out.len() - before) as u32
}

/// Byte length of a table of `count` records
pub fn table_len<T: Record>(count: usize) -> usize {
    count * T::SIZE
}

/// Write `items` into `out` and return its `(offset, len)` pair
pub(crate) fn place_table<T: Record>(items: &[T], out: &mut Vec<u8>) -> (u32, u32) {
    let offset = out.len() as u32;
    let len = encode_table(items, out);
    if len == 0 {
        (0, 0)
    } else {
        (offset, len)
    }
}
