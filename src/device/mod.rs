//! Journal Device Module
//!
//! The fast local device the write journal lives on.
//!
//! ## Implementations
//! - `FileDevice`: a regular file or block device node, positional I/O
//! - `MemoryDevice`: a zeroed in-memory buffer; `snapshot()` captures the
//!   bytes as they would survive a crash at that instant

mod file;
mod memory;

pub use file::FileDevice;
pub use memory::MemoryDevice;

use crate::error::Result;

/// Byte-addressed device with explicit durability.
///
/// Writes are not durable until `sync` returns. Implementations must be
/// usable from several threads at once; the journal serializes writers
/// itself.
pub trait BlockDevice: Send + Sync {
    /// Fill `buf` from byte `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` at byte `offset`
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Make every completed write durable
    fn sync(&self) -> Result<()>;

    /// Device size in bytes
    fn size(&self) -> Result<u64>;
}
