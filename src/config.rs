//! Configuration for LSVD
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{LsvdError, Result};

/// Main configuration for an LSVD volume
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── journal.img      (write journal device, unless overridden)
    ///     └── objects/         (backend objects: <name>, <name>.<seq>)
    pub data_dir: PathBuf,

    /// Journal device path; defaults to `{data_dir}/journal.img`.
    /// Point this at a fast local device to keep the cache off the data disk.
    pub journal_path: Option<PathBuf>,

    /// Volume name, used as the backend object name prefix
    pub volume_name: String,

    /// Virtual disk size in bytes (used at create time)
    pub volume_size: u64,

    // -------------------------------------------------------------------------
    // Journal Configuration
    // -------------------------------------------------------------------------
    /// Journal device size in 4 KiB blocks (used at create time)
    pub journal_blocks: u32,

    /// Minimum size of each of the two journal checkpoint slots, in 4 KiB
    /// blocks; grown at format time to fit the largest possible map
    pub checkpoint_blocks: u32,

    /// Start reclaiming flushed journal space above this utilisation (percent)
    pub reclaim_threshold: u8,

    // -------------------------------------------------------------------------
    // Backend Configuration
    // -------------------------------------------------------------------------
    /// Target payload size of one DATA object (in bytes)
    pub batch_size: usize,

    /// Write a backend checkpoint after this many DATA objects
    pub checkpoint_interval: u32,

    // -------------------------------------------------------------------------
    // Background Work
    // -------------------------------------------------------------------------
    /// Run the background flusher thread
    pub background_flush: bool,

    /// Flusher wake-up period (milliseconds)
    pub flush_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./lsvd_data"),
            journal_path: None,
            volume_name: "vol".to_string(),
            volume_size: 10 * 1024 * 1024 * 1024, // 10 GB
            journal_blocks: 64 * 1024,            // 256 MB
            checkpoint_blocks: 64,                // grown to about 8 MB per slot
            reclaim_threshold: 50,
            batch_size: 8 * 1024 * 1024, // 8 MB
            checkpoint_interval: 100,
            background_flush: true,
            flush_interval_ms: 500,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolved journal device path
    pub fn journal_path(&self) -> PathBuf {
        self.journal_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("journal.img"))
    }

    /// Directory holding backend objects
    pub fn object_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    /// Check values that would otherwise fail deep inside the journal or backend
    pub fn validate(&self) -> Result<()> {
        if self.volume_name.is_empty() || self.volume_name.contains('/') {
            return Err(LsvdError::Config(format!(
                "invalid volume name '{}'",
                self.volume_name
            )));
        }
        if self.volume_size == 0 || self.volume_size % 512 != 0 {
            return Err(LsvdError::Config(format!(
                "volume size {} must be a non-zero multiple of 512",
                self.volume_size
            )));
        }
        if self.checkpoint_blocks == 0 {
            return Err(LsvdError::Config("checkpoint_blocks must be > 0".to_string()));
        }
        if self.reclaim_threshold == 0 || self.reclaim_threshold > 100 {
            return Err(LsvdError::Config(format!(
                "reclaim threshold {}% out of range",
                self.reclaim_threshold
            )));
        }
        if self.batch_size < 4096 {
            return Err(LsvdError::Config(format!(
                "batch size {} is below one block",
                self.batch_size
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Place the journal on a separate device or file
    pub fn journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.journal_path = Some(path.into());
        self
    }

    /// Set the volume name (backend object prefix)
    pub fn volume_name(mut self, name: impl Into<String>) -> Self {
        self.config.volume_name = name.into();
        self
    }

    /// Set the virtual disk size (in bytes)
    pub fn volume_size(mut self, bytes: u64) -> Self {
        self.config.volume_size = bytes;
        self
    }

    /// Set the journal size (in 4 KiB blocks)
    pub fn journal_blocks(mut self, blocks: u32) -> Self {
        self.config.journal_blocks = blocks;
        self
    }

    /// Set the minimum checkpoint slot size (in 4 KiB blocks)
    pub fn checkpoint_blocks(mut self, blocks: u32) -> Self {
        self.config.checkpoint_blocks = blocks;
        self
    }

    /// Set the journal utilisation (percent) that triggers reclamation
    pub fn reclaim_threshold(mut self, percent: u8) -> Self {
        self.config.reclaim_threshold = percent;
        self
    }

    /// Set the DATA object batch size (in bytes)
    pub fn batch_size(mut self, bytes: usize) -> Self {
        self.config.batch_size = bytes;
        self
    }

    /// Set the number of DATA objects between backend checkpoints
    pub fn checkpoint_interval(mut self, objects: u32) -> Self {
        self.config.checkpoint_interval = objects;
        self
    }

    /// Enable or disable the background flusher thread
    pub fn background_flush(mut self, enabled: bool) -> Self {
        self.config.background_flush = enabled;
        self
    }

    /// Set the flusher wake-up period (in milliseconds)
    pub fn flush_interval_ms(mut self, ms: u64) -> Self {
        self.config.flush_interval_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
