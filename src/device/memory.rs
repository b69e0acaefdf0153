//! In-memory journal device
use std::io;

use parking_lot::RwLock;

use crate::error::Result;

use super::BlockDevice;

/// Zero-filled device held in memory
pub struct MemoryDevice {
    data: RwLock<Vec<u8>>,
}

impl MemoryDevice {
    pub fn new(size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0u8; size]),
        }
    }

    /// Rebuild a device from a previous [`snapshot`](Self::snapshot)
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(bytes),
        }
    }

    /// Copy of the current contents.
    ///
    /// Every write is applied immediately, so this is the crash image of a
    /// device whose writes all reached the media.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    fn range(&self, offset: u64, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= size => Ok(start..end),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("access {}+{} beyond device size {}", offset, len, size),
            )
            .into()),
        }
    }
}

impl BlockDevice for MemoryDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.read();
        let range = self.range(offset, buf.len(), data.len())?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let range = self.range(offset, buf.len(), data.len())?;
        data[range].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }
}
