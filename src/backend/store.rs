//! Backend object store
//!
//! Immutable named blobs. The volume superblock is stored under the volume
//! name; every other object is `<name>.<seq as 8 hex digits>`.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{LsvdError, Result};

/// Name of the numbered object `seq` of volume `prefix`
pub fn object_name(prefix: &str, seq: u64) -> String {
    format!("{}.{:08x}", prefix, seq)
}

/// Parse an object name back to its sequence number
/// "vol.0000002a" → Some(42)
pub fn parse_object_seq(prefix: &str, name: &str) -> Option<u64> {
    let hex = name.strip_prefix(prefix)?.strip_prefix('.')?;
    if hex.len() != 8 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

/// Store of immutable backend objects.
///
/// A written object is either absent or complete; readers never observe a
/// partial write.
pub trait ObjectStore: Send + Sync {
    /// Create or replace `name` with `data`, durably
    fn write_object(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Up to `len` bytes of `name` from `offset`; short at the end of the object
    fn read_object(&self, name: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Whole object
    fn read_all(&self, name: &str) -> Result<Vec<u8>>;

    /// Remove `name`; removing a missing object succeeds
    fn delete_object(&self, name: &str) -> Result<()>;

    fn exists(&self, name: &str) -> Result<bool>;
}

// =============================================================================
// File Store
// =============================================================================

/// Objects as files in one directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the object directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn open_existing(&self, name: &str) -> Result<File> {
        File::open(self.path(name)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LsvdError::ObjectNotFound(name.to_string()),
            _ => LsvdError::Device(e),
        })
    }
}

impl ObjectStore for FileStore {
    fn write_object(&self, name: &str, data: &[u8]) -> Result<()> {
        let tmp = self.path(&format!("{}.tmp", name));
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.path(name))?;
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    fn read_object(&self, name: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let file = self.open_existing(name)?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        match fs::read(self.path(name)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(LsvdError::ObjectNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_object(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path(name).is_file())
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Objects held in memory
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Arc<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a previous [`snapshot`](Self::snapshot)
    pub fn from_snapshot(objects: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            objects: RwLock::new(
                objects
                    .into_iter()
                    .map(|(name, data)| (name, Arc::new(data)))
                    .collect(),
            ),
        }
    }

    /// Copy of every object currently stored
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.objects
            .read()
            .iter()
            .map(|(name, data)| (name.clone(), data.as_ref().clone()))
            .collect()
    }

    /// Names in order
    pub fn names(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    fn get(&self, name: &str) -> Result<Arc<Vec<u8>>> {
        self.objects
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LsvdError::ObjectNotFound(name.to_string()))
    }
}

impl ObjectStore for MemoryStore {
    fn write_object(&self, name: &str, data: &[u8]) -> Result<()> {
        self.objects
            .write()
            .insert(name.to_string(), Arc::new(data.to_vec()));
        Ok(())
    }

    fn read_object(&self, name: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let data = self.get(name)?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        Ok(self.get(name)?.as_ref().clone())
    }

    fn delete_object(&self, name: &str) -> Result<()> {
        self.objects.write().remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(name))
    }
}
