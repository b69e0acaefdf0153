//! Volume Module
//!
//! The root handle that coordinates the journal, the backend and the
//! background flusher.
//!
//! ## Responsibilities
//! - Validate and split logical writes into journal records
//! - Serve reads: journal first, then backend, zeros for the rest
//! - Flush journal records into DATA objects and reclaim journal space
//! - Run periodic backend checkpoints
//! - Recover both halves on open
//!
//! ## Concurrency Model
//! - Writes are serialized by the journal's state lock; commit order is
//!   sequence order
//! - Reads take no volume-level lock
//! - Flushing is serialized by `flush_lock`, shared by the background
//!   flusher and by writers that find the journal full

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendRecovery, DataObjectBuilder, FileStore, ObjectStore};
use crate::checkpoint::RecoveryResult;
use crate::codec::{WriteCacheSuper, BLOCK_SIZE, SECTOR_SIZE};
use crate::config::Config;
use crate::device::{BlockDevice, FileDevice};
use crate::error::{LsvdError, Result};
use crate::extent::{Location, MapEntry, ObjectOffset};
use crate::journal::{Journal, OldestRecord};

/// Attempts at an append that finds the journal full
const FULL_RETRIES: usize = 3;

/// What `open` found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecovery {
    pub journal: RecoveryResult,
    pub backend: BackendRecovery,
}

enum FlushCommand {
    Wake,
    Shutdown,
}

struct VolumeInner {
    config: Config,
    journal: Journal,
    backend: Backend,
    vol_size: u64,
    flush_lock: Mutex<()>,
}

struct Flusher {
    tx: Sender<FlushCommand>,
    join: Option<JoinHandle<()>>,
}

impl Flusher {
    fn stop(&mut self) {
        let _ = self.tx.send(FlushCommand::Shutdown);
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

/// A log-structured virtual disk
pub struct Volume {
    inner: Arc<VolumeInner>,
    flusher: Mutex<Option<Flusher>>,
    recovery: Option<VolumeRecovery>,
    closed: AtomicBool,
}

impl Volume {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a new volume under `config.data_dir`.
    ///
    /// Writes the backend superblock and formats a journal file of
    /// `config.journal_blocks` blocks.
    pub fn create(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let store: Arc<dyn ObjectStore> = Arc::new(FileStore::open(config.object_dir())?);
        if store.exists(&config.volume_name)? {
            return Err(LsvdError::InvalidArgument(format!(
                "volume '{}' already exists in {}",
                config.volume_name,
                config.data_dir.display()
            )));
        }
        let device: Arc<dyn BlockDevice> = Arc::new(FileDevice::create(
            config.journal_path(),
            config.journal_blocks as u64 * BLOCK_SIZE as u64,
        )?);
        Self::create_with(config, device, store)
    }

    /// Open an existing volume under `config.data_dir`, recovering both the
    /// journal and the backend
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn ObjectStore> = Arc::new(FileStore::open(config.object_dir())?);
        let device: Arc<dyn BlockDevice> = Arc::new(FileDevice::open(config.journal_path())?);
        Self::open_with(config, device, store)
    }

    /// Create a volume on caller-supplied device and store
    pub fn create_with(
        config: Config,
        device: Arc<dyn BlockDevice>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        config.validate()?;
        let backend = Backend::create(store, &config.volume_name, config.volume_size)?;
        let journal = Journal::format(device, config.checkpoint_blocks)?;
        info!(
            volume = %config.volume_name,
            size = config.volume_size,
            uuid = %journal.vol_uuid(),
            "volume created"
        );
        Ok(Self::start(config, journal, backend, None))
    }

    /// Open a volume on caller-supplied device and store
    pub fn open_with(
        config: Config,
        device: Arc<dyn BlockDevice>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        config.validate()?;
        let (backend, backend_recovery) = Backend::open(store, &config.volume_name)?;
        let (journal, journal_recovery) = Journal::open(device)?;
        info!(
            volume = %config.volume_name,
            records = journal_recovery.records_replayed,
            objects = backend_recovery.objects_replayed,
            "volume opened"
        );
        let recovery = VolumeRecovery {
            journal: journal_recovery,
            backend: backend_recovery,
        };
        Ok(Self::start(config, journal, backend, Some(recovery)))
    }

    fn start(
        config: Config,
        journal: Journal,
        backend: Backend,
        recovery: Option<VolumeRecovery>,
    ) -> Self {
        let vol_size = backend.vol_size();
        let background = config.background_flush;
        let inner = Arc::new(VolumeInner {
            config,
            journal,
            backend,
            vol_size,
            flush_lock: Mutex::new(()),
        });
        let flusher = if background {
            Self::spawn_flusher(&inner)
        } else {
            None
        };
        Self {
            inner,
            flusher: Mutex::new(flusher),
            recovery,
            closed: AtomicBool::new(false),
        }
    }

    fn spawn_flusher(inner: &Arc<VolumeInner>) -> Option<Flusher> {
        let (tx, rx) = channel::unbounded();
        let worker = Arc::clone(inner);
        match thread::Builder::new()
            .name("lsvd-flusher".into())
            .spawn(move || flusher_loop(worker, rx))
        {
            Ok(join) => Some(Flusher {
                tx,
                join: Some(join),
            }),
            Err(e) => {
                warn!(error = %e, "could not start flusher thread, flushing inline only");
                None
            }
        }
    }

    /// Shut down cleanly: stop the flusher, flush every journal record,
    /// checkpoint the backend, reclaim and checkpoint the journal, sync the
    /// device.
    ///
    /// Once this succeeds, later reads, writes and closes fail with
    /// [`LsvdError::Closed`]. If a step fails the volume stays open, the
    /// flusher is restarted and `close` may be called again.
    pub fn close(&self) -> Result<()> {
        let mut flusher = self.flusher.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(LsvdError::Closed);
        }
        let was_running = match flusher.take() {
            Some(mut running) => {
                running.stop();
                true
            }
            None => false,
        };

        if let Err(e) = self.inner.shutdown() {
            warn!(error = %e, "close failed, volume left open");
            if was_running {
                *flusher = Self::spawn_flusher(&self.inner);
            }
            return Err(e);
        }
        self.closed.store(true, Ordering::SeqCst);
        info!(volume = %self.inner.config.volume_name, "volume closed");
        Ok(())
    }

    // =========================================================================
    // I/O
    // =========================================================================

    /// Write `data` at byte `offset`; returns once durable in the journal.
    ///
    /// Offset and length must be multiples of 512.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_io(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let lba = offset / SECTOR_SIZE as u64;
        let chunk = self.inner.journal.max_write_sectors() as usize * SECTOR_SIZE;
        for (i, piece) in data.chunks(chunk).enumerate() {
            let piece_lba = lba + (i * chunk / SECTOR_SIZE) as u64;
            self.append_with_retry(piece_lba, piece)?;
        }

        if let Some(flusher) = self.flusher.lock().as_ref() {
            if self.inner.journal.utilization() >= self.inner.config.reclaim_threshold {
                let _ = flusher.tx.send(FlushCommand::Wake);
            }
        }
        Ok(())
    }

    fn append_with_retry(&self, lba: u64, data: &[u8]) -> Result<u64> {
        let mut attempt = 0;
        loop {
            match self.inner.journal.append(lba, data) {
                Err(LsvdError::JournalFull { needed, free }) if attempt < FULL_RETRIES => {
                    debug!(needed, free, attempt, "journal full, flushing inline");
                    self.inner.flush_journal()?;
                    self.inner.journal.reclaim()?;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Read `len` bytes at byte `offset`; never-written ranges read as zeros
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.check_io(offset, len)?;
        let mut buf = vec![0u8; len];
        if len == 0 {
            return Ok(buf);
        }
        let lba = offset / SECTOR_SIZE as u64;
        let holes = self.inner.journal.read_into(lba, &mut buf)?;
        for hole in holes {
            let start = (hole.lba - lba) as usize * SECTOR_SIZE;
            let end = start + hole.len as usize * SECTOR_SIZE;
            self.inner.backend.read_into(hole.lba, &mut buf[start..end])?;
        }
        Ok(buf)
    }

    fn check_io(&self, offset: u64, len: usize) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LsvdError::Closed);
        }
        if offset % SECTOR_SIZE as u64 != 0 || len % SECTOR_SIZE != 0 {
            return Err(LsvdError::InvalidArgument(format!(
                "offset {} and length {} must be multiples of {}",
                offset, len, SECTOR_SIZE
            )));
        }
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.inner.vol_size => Ok(()),
            _ => Err(LsvdError::InvalidArgument(format!(
                "access {}+{} beyond volume size {}",
                offset, len, self.inner.vol_size
            ))),
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Fold every unflushed journal record into DATA objects.
    ///
    /// Returns the number of objects written.
    pub fn flush(&self) -> Result<usize> {
        self.inner.flush_journal()
    }

    /// Free journal space already contained in the backend
    pub fn reclaim(&self) -> Result<u32> {
        self.inner.journal.reclaim()
    }

    /// Persist the journal map.
    ///
    /// A map too large for its slot is first emptied by flushing and
    /// reclaiming the whole journal.
    pub fn checkpoint(&self) -> Result<u64> {
        self.inner.checkpoint_journal()
    }

    /// Write a backend CKPT object
    pub fn checkpoint_backend(&self) -> Result<u64> {
        self.inner.backend.checkpoint()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Journal map over `[lba, lba+sectors)`: `(lba, len, device sector)`
    pub fn journal_map(&self, lba: u64, sectors: u64) -> Vec<MapEntry<u64>> {
        self.inner.journal.lookup(lba, sectors)
    }

    /// Backend map over `[lba, lba+sectors)`
    pub fn backend_map(&self, lba: u64, sectors: u64) -> Vec<MapEntry<ObjectOffset>> {
        self.inner.backend.lookup(lba, sectors)
    }

    /// Where each sector of `[lba, lba+sectors)` would be read from.
    ///
    /// Journal entries overlay backend entries; sectors in neither are
    /// absent from the result. The range must lie inside the volume.
    pub fn map(&self, lba: u64, sectors: u64) -> Result<Vec<MapEntry<Location>>> {
        let vol_sectors = self.inner.vol_size / SECTOR_SIZE as u64;
        let end = match lba.checked_add(sectors) {
            Some(end) if end <= vol_sectors => end,
            _ => {
                return Err(LsvdError::InvalidArgument(format!(
                    "map query {}+{} beyond volume of {} sectors",
                    lba, sectors, vol_sectors
                )))
            }
        };
        let mut out = Vec::new();
        let mut cursor = lba;
        let journal = self.inner.journal.lookup(lba, sectors);
        let push_backend = |from: u64, to: u64, out: &mut Vec<MapEntry<Location>>| {
            if to > from {
                for e in self.inner.backend.lookup(from, to - from) {
                    out.push(MapEntry::new(e.lba, e.len, Location::Object(e.loc)));
                }
            }
        };
        for e in journal {
            push_backend(cursor, e.lba, &mut out);
            out.push(MapEntry::new(e.lba, e.len, Location::Journal(e.loc)));
            cursor = e.end();
        }
        push_backend(cursor, end, &mut out);
        Ok(out)
    }

    /// Extents of the first journal record at or after `cursor`; start
    /// from `superblock().oldest`
    pub fn oldest(&self, cursor: u32) -> Result<Option<OldestRecord>> {
        self.inner.journal.oldest(cursor)
    }

    /// Current journal cursors and sequence counter
    pub fn superblock(&self) -> WriteCacheSuper {
        self.inner.journal.superblock()
    }

    pub fn journal(&self) -> &Journal {
        &self.inner.journal
    }

    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Volume size in bytes
    pub fn size(&self) -> u64 {
        self.inner.vol_size
    }

    /// Recovery report, for volumes that were opened rather than created
    pub fn recovery(&self) -> Option<&VolumeRecovery> {
        self.recovery.as_ref()
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        if let Some(mut flusher) = self.flusher.get_mut().take() {
            flusher.stop();
        }
    }
}

impl VolumeInner {
    /// Flush, checkpoint the backend, then leave the journal empty and
    /// checkpointed
    fn shutdown(&self) -> Result<()> {
        self.flush_journal()?;
        self.backend.checkpoint()?;
        // a reclaim that frees anything persists the journal map itself
        if self.journal.reclaim()? == 0 {
            self.checkpoint_journal()?;
        }
        self.journal.sync()
    }

    fn checkpoint_journal(&self) -> Result<u64> {
        match self.journal.checkpoint() {
            Err(LsvdError::CheckpointTooLarge { entries, capacity, .. }) => {
                debug!(entries, capacity, "journal map too large for its slot, draining journal");
                self.flush_journal()?;
                self.journal.reclaim()?;
                self.journal.checkpoint()
            }
            other => other,
        }
    }

    fn flush_journal(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock();
        let (mut cursor, end) = self.journal.unflushed_range();
        let mut builder = DataObjectBuilder::new();
        let mut objects = 0;

        while cursor != end {
            let record = self.journal.read_record(cursor)?;
            builder.add_record(&record)?;
            cursor = record.next;
            if builder.data_bytes() >= self.config.batch_size {
                self.write_object(std::mem::take(&mut builder), cursor)?;
                objects += 1;
            }
        }
        if !builder.is_empty() {
            self.write_object(builder, cursor)?;
            objects += 1;
        }
        Ok(objects)
    }

    fn write_object(&self, builder: DataObjectBuilder, cursor: u32) -> Result<()> {
        let seq = self.backend.write_data_object(builder)?;
        self.journal.mark_flushed(cursor)?;
        debug!(seq, cursor, "journal flushed to backend");
        if self.config.checkpoint_interval > 0
            && self.backend.data_since_checkpoint() >= self.config.checkpoint_interval
        {
            self.backend.checkpoint()?;
        }
        Ok(())
    }

    fn background_pass(&self) {
        if let Err(e) = self.flush_journal() {
            warn!(error = %e, "background flush failed");
            return;
        }
        if self.journal.utilization() >= self.config.reclaim_threshold {
            if let Err(e) = self.journal.reclaim() {
                warn!(error = %e, "background reclaim failed");
            }
        }
    }
}

fn flusher_loop(inner: Arc<VolumeInner>, rx: Receiver<FlushCommand>) {
    let interval = Duration::from_millis(inner.config.flush_interval_ms.max(1));
    loop {
        match rx.recv_timeout(interval) {
            Ok(FlushCommand::Wake) | Err(RecvTimeoutError::Timeout) => inner.background_pass(),
            Ok(FlushCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("flusher stopped");
}
