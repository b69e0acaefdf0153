//! Tests for Volume
//!
//! These tests verify:
//! - Reads return the latest write, zeros where nothing was written
//! - Argument checking (alignment, bounds, closed volume)
//! - Flush to backend objects and journal reclaim
//! - Inline flushing when the journal is full
//! - Crash recovery from journal and backend images
//! - Journal checkpoints of a fragmented map, and close retried after a
//!   device error
//! - Periodic backend checkpoints and the background flusher
//! - Concurrent access patterns

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lsvd::backend::{MemoryStore, ObjectStore};
use lsvd::codec::{self, WriteCacheSuper};
use lsvd::config::ConfigBuilder;
use lsvd::device::{BlockDevice, MemoryDevice};
use lsvd::extent::{Extent, Location, MapEntry, ObjectOffset};
use lsvd::{Config, LsvdError, Result, Volume};

// =============================================================================
// Helper Functions
// =============================================================================

const VOL_SIZE: u64 = 16 * 1024 * 1024;
const JOURNAL_BLOCKS: usize = 256;

fn base_config() -> ConfigBuilder {
    Config::builder()
        .volume_name("vol")
        .volume_size(VOL_SIZE)
        .checkpoint_blocks(1)
        .batch_size(64 * 1024)
        .checkpoint_interval(0)
        .background_flush(false)
}

struct TestVolume {
    device: Arc<MemoryDevice>,
    store: Arc<MemoryStore>,
    volume: Volume,
}

impl TestVolume {
    /// Reopen from what the device and store hold right now, as after a crash
    fn crash_and_reopen(&self) -> TestVolume {
        let device = Arc::new(MemoryDevice::from_bytes(self.device.snapshot()));
        let store = Arc::new(MemoryStore::from_snapshot(self.store.snapshot()));
        let volume = Volume::open_with(
            self.volume.config().clone(),
            device.clone(),
            store.clone(),
        )
        .unwrap();
        TestVolume {
            device,
            store,
            volume,
        }
    }
}

fn setup_volume_with(builder: ConfigBuilder, journal_blocks: usize) -> TestVolume {
    let device = Arc::new(MemoryDevice::new(journal_blocks * 4096));
    let store = Arc::new(MemoryStore::new());
    let volume = Volume::create_with(builder.build(), device.clone(), store.clone()).unwrap();
    TestVolume {
        device,
        store,
        volume,
    }
}

fn setup_volume() -> TestVolume {
    setup_volume_with(base_config(), JOURNAL_BLOCKS)
}

/// Journal device whose writes can be made to fail
struct FaultyDevice {
    inner: MemoryDevice,
    fail_writes: AtomicBool,
}

impl FaultyDevice {
    fn new(size: usize) -> Self {
        Self {
            inner: MemoryDevice::new(size),
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl BlockDevice for FaultyDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            let err = std::io::Error::new(std::io::ErrorKind::Other, "injected write error");
            return Err(err.into());
        }
        self.inner.write_at(offset, buf)
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }
}

/// Write `count` single-sector writes at every other LBA
fn write_scattered(volume: &Volume, count: u64) {
    for i in 0..count {
        volume.write(i * 1024, &pattern(i as u8, 512)).unwrap();
    }
}

/// `len` bytes whose every sector is distinct
fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add((i / 512) as u8).wrapping_mul(3))
        .collect()
}

// =============================================================================
// Basic I/O Tests
// =============================================================================

#[test]
fn test_write_read_back() {
    let t = setup_volume();
    let data = pattern(7, 4096);
    t.volume.write(4096, &data).unwrap();

    let buf = t.volume.read(0, 16384).unwrap();
    assert!(buf[..4096].iter().all(|&b| b == 0));
    assert_eq!(&buf[4096..8192], &data[..]);
    assert!(buf[8192..].iter().all(|&b| b == 0));
}

#[test]
fn test_unwritten_volume_reads_zeros() {
    let t = setup_volume();
    let buf = t.volume.read(VOL_SIZE - 65536, 65536).unwrap();
    assert_eq!(buf.len(), 65536);
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn test_overlapping_writes_last_wins() {
    let t = setup_volume();
    t.volume.write(0, &pattern(1, 8192)).unwrap();
    t.volume.write(1024, &pattern(2, 1024)).unwrap();

    let buf = t.volume.read(0, 8192).unwrap();
    assert_eq!(&buf[..1024], &pattern(1, 8192)[..1024]);
    assert_eq!(&buf[1024..2048], &pattern(2, 1024)[..]);
    assert_eq!(&buf[2048..], &pattern(1, 8192)[2048..]);
}

#[test]
fn test_empty_write_is_noop() {
    let t = setup_volume();
    let before = t.volume.superblock();
    t.volume.write(0, &[]).unwrap();
    assert_eq!(t.volume.superblock(), before);
    assert_eq!(t.volume.journal().next_seq(), 1);
}

#[test]
fn test_misaligned_io_rejected() {
    let t = setup_volume();
    assert!(matches!(
        t.volume.write(100, &[0u8; 512]),
        Err(LsvdError::InvalidArgument(_))
    ));
    assert!(matches!(
        t.volume.write(0, &[0u8; 100]),
        Err(LsvdError::InvalidArgument(_))
    ));
    assert!(matches!(
        t.volume.read(0, 100),
        Err(LsvdError::InvalidArgument(_))
    ));
}

#[test]
fn test_out_of_bounds_io_rejected() {
    let t = setup_volume();
    assert!(matches!(
        t.volume.write(VOL_SIZE - 512, &[0u8; 1024]),
        Err(LsvdError::InvalidArgument(_))
    ));
    assert!(matches!(
        t.volume.read(VOL_SIZE, 512),
        Err(LsvdError::InvalidArgument(_))
    ));
    t.volume.write(VOL_SIZE - 512, &[9u8; 512]).unwrap();
    assert_eq!(t.volume.read(VOL_SIZE - 512, 512).unwrap(), vec![9u8; 512]);
}

#[test]
fn test_oldest_walk() {
    let t = setup_volume();
    t.volume.write(0, &pattern(1, 4096)).unwrap();
    t.volume.write(100 * 512, &pattern(2, 512)).unwrap();
    t.volume.write(8 * 512, &pattern(3, 2048)).unwrap();

    let mut cursor = t.volume.superblock().oldest;
    let mut seen = Vec::new();
    while let Some(record) = t.volume.oldest(cursor).unwrap() {
        seen.push((record.seq, record.extents));
        cursor = record.next;
    }
    assert_eq!(
        seen,
        vec![
            (1, vec![Extent::new(0, 8)]),
            (2, vec![Extent::new(100, 1)]),
            (3, vec![Extent::new(8, 4)]),
        ]
    );
    assert_eq!(cursor, t.volume.superblock().next);
}

// =============================================================================
// Flush and Reclaim Tests
// =============================================================================

#[test]
fn test_flush_moves_data_to_backend() {
    let t = setup_volume();
    t.volume.write(0, &pattern(1, 8192)).unwrap();
    t.volume.write(65536, &pattern(2, 4096)).unwrap();

    assert_eq!(t.volume.flush().unwrap(), 1);
    assert_eq!(t.volume.flush().unwrap(), 0);
    assert_eq!(
        t.volume.backend_map(0, 1024),
        vec![
            MapEntry::new(0, 16, ObjectOffset::new(1, 0)),
            MapEntry::new(128, 8, ObjectOffset::new(1, 16)),
        ]
    );

    // still served from the journal until reclaimed
    assert_eq!(t.volume.journal_map(0, 1024).len(), 2);
    let sb = t.volume.superblock();
    assert_eq!(sb.flushed, sb.next);

    assert!(t.volume.reclaim().unwrap() > 0);
    assert!(t.volume.journal_map(0, 1024).is_empty());
    assert_eq!(t.volume.reclaim().unwrap(), 0);

    assert_eq!(t.volume.read(0, 8192).unwrap(), pattern(1, 8192));
    assert_eq!(t.volume.read(65536, 4096).unwrap(), pattern(2, 4096));
}

#[test]
fn test_map_overlays_journal_on_backend() {
    let t = setup_volume();
    t.volume.write(0, &pattern(1, 8192)).unwrap();
    t.volume.flush().unwrap();
    t.volume.reclaim().unwrap();
    t.volume.write(4 * 512, &pattern(2, 2048)).unwrap();

    let map = t.volume.map(0, 32).unwrap();
    assert_eq!(map.len(), 3);
    assert_eq!(
        map[0],
        MapEntry::new(0, 4, Location::Object(ObjectOffset::new(1, 0)))
    );
    assert_eq!((map[1].lba, map[1].len), (4, 4));
    assert!(matches!(map[1].loc, Location::Journal(_)));
    assert_eq!(
        map[2],
        MapEntry::new(8, 8, Location::Object(ObjectOffset::new(1, 8)))
    );

    let buf = t.volume.read(0, 8192).unwrap();
    assert_eq!(&buf[..2048], &pattern(1, 8192)[..2048]);
    assert_eq!(&buf[2048..4096], &pattern(2, 2048)[..]);
    assert_eq!(&buf[4096..], &pattern(1, 8192)[4096..]);
}

#[test]
fn test_map_rejects_out_of_range_queries() {
    let t = setup_volume();
    let vol_sectors = VOL_SIZE / 512;
    t.volume.write(0, &pattern(1, 512)).unwrap();

    assert!(matches!(
        t.volume.map(1, u64::MAX),
        Err(LsvdError::InvalidArgument(_))
    ));
    assert!(matches!(
        t.volume.map(vol_sectors - 1, 2),
        Err(LsvdError::InvalidArgument(_))
    ));
    assert!(t.volume.map(vol_sectors - 1, 1).unwrap().is_empty());
    assert_eq!(t.volume.map(0, vol_sectors).unwrap().len(), 1);
}

#[test]
fn test_batch_size_splits_objects() {
    let t = setup_volume_with(base_config().batch_size(4096), JOURNAL_BLOCKS);
    for i in 0..4u64 {
        t.volume.write(i * 8192, &pattern(i as u8, 4096)).unwrap();
    }
    assert_eq!(t.volume.flush().unwrap(), 4);
    let objects: Vec<u64> = t.volume.backend().objects().keys().copied().collect();
    assert_eq!(objects, vec![1, 2, 3, 4]);
}

#[test]
fn test_periodic_backend_checkpoint() {
    let t = setup_volume_with(
        base_config().batch_size(4096).checkpoint_interval(2),
        JOURNAL_BLOCKS,
    );
    for i in 0..4u64 {
        t.volume.write(i * 4096, &pattern(i as u8, 4096)).unwrap();
    }
    assert_eq!(t.volume.flush().unwrap(), 4);

    // DATA 1, 2, CKPT 3, DATA 4, 5, CKPT 6
    assert_eq!(t.volume.backend().last_checkpoint(), Some(6));
    let objects: Vec<u64> = t.volume.backend().objects().keys().copied().collect();
    assert_eq!(objects, vec![1, 2, 4, 5]);
    assert!(t.store.exists("vol.00000006").unwrap());
    assert!(!t.store.exists("vol.00000003").unwrap());
}

#[test]
fn test_write_larger_than_journal_flushes_inline() {
    // 2-block slots leave a ring of 57 blocks; writes split into records
    // of 27 payload blocks
    let t = setup_volume_with(base_config(), 64);
    assert_eq!(t.volume.superblock().map_blocks, 2);
    assert_eq!(t.volume.journal().max_write_sectors(), 216);

    let data = pattern(5, 256 * 1024);
    t.volume.write(0, &data).unwrap();

    assert_eq!(t.volume.journal().next_seq(), 4);
    assert_eq!(t.volume.backend().objects().len(), 2);
    assert_eq!(t.volume.backend_map(0, 512).len(), 2);
    assert_eq!(t.volume.journal_map(0, 512), t.volume.journal_map(432, 80));
    assert_eq!(t.volume.read(0, data.len()).unwrap(), data);
}

#[test]
fn test_sustained_writes_through_small_journal() {
    let t = setup_volume_with(base_config(), 64);
    for round in 0..20u64 {
        let offset = (round % 5) * 32768;
        t.volume.write(offset, &pattern(round as u8, 32768)).unwrap();
    }
    for slot in 0..5u64 {
        let last = 15 + slot;
        assert_eq!(
            t.volume.read(slot * 32768, 32768).unwrap(),
            pattern(last as u8, 32768)
        );
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_create_existing_volume_fails() {
    let t = setup_volume();
    let device = Arc::new(MemoryDevice::new(JOURNAL_BLOCKS * 4096));
    let result = Volume::create_with(base_config().build(), device, t.store.clone());
    assert!(matches!(result, Err(LsvdError::InvalidArgument(_))));
}

#[test]
fn test_open_unformatted_journal_fails() {
    let t = setup_volume();
    let device = Arc::new(MemoryDevice::new(JOURNAL_BLOCKS * 4096));
    let result = Volume::open_with(base_config().build(), device, t.store.clone());
    assert!(matches!(result, Err(LsvdError::BadMagic { .. })));
}

#[test]
fn test_invalid_config_rejected() {
    for builder in [
        base_config().volume_size(1000),
        base_config().volume_name(""),
        base_config().volume_name("a/b"),
        base_config().reclaim_threshold(0),
        base_config().reclaim_threshold(101),
        base_config().batch_size(100),
        base_config().checkpoint_blocks(0),
    ] {
        let device = Arc::new(MemoryDevice::new(JOURNAL_BLOCKS * 4096));
        let store = Arc::new(MemoryStore::new());
        let result = Volume::create_with(builder.build(), device, store.clone());
        assert!(matches!(result, Err(LsvdError::Config(_))));
        assert!(store.names().is_empty());
    }
}

#[test]
fn test_closed_volume_rejects_io() {
    let t = setup_volume();
    t.volume.write(0, &pattern(1, 512)).unwrap();
    t.volume.close().unwrap();

    assert!(matches!(t.volume.write(0, &[0u8; 512]), Err(LsvdError::Closed)));
    assert!(matches!(t.volume.read(0, 512), Err(LsvdError::Closed)));
    assert!(matches!(t.volume.close(), Err(LsvdError::Closed)));
}

#[test]
fn test_close_and_reopen() {
    let t = setup_volume();
    t.volume.write(0, &pattern(1, 4096)).unwrap();
    t.volume.write(8192, &pattern(2, 4096)).unwrap();
    t.volume.close().unwrap();

    let reopened = t.crash_and_reopen();
    let recovery = reopened.volume.recovery().unwrap();
    assert_eq!(recovery.journal.records_replayed, 0);
    assert_eq!(recovery.journal.checkpoint_generation, Some(1));
    assert_eq!(recovery.backend.checkpoint, Some(2));
    assert_eq!(recovery.backend.objects_replayed, 0);

    assert_eq!(reopened.volume.read(0, 4096).unwrap(), pattern(1, 4096));
    assert_eq!(reopened.volume.read(8192, 4096).unwrap(), pattern(2, 4096));
    assert_eq!(reopened.volume.flush().unwrap(), 0);
}

#[test]
fn test_fragmented_journal_checkpoint_and_close() {
    let t = setup_volume_with(base_config(), 1024);
    write_scattered(&t.volume, 300);
    assert_eq!(t.volume.journal_map(0, 600).len(), 300);
    assert!(t.volume.superblock().map_blocks > 1);

    assert_eq!(t.volume.checkpoint().unwrap(), 1);
    let crashed = t.crash_and_reopen();
    let recovery = crashed.volume.recovery().unwrap();
    assert_eq!(recovery.journal.checkpoint_generation, Some(1));
    assert_eq!(recovery.journal.records_replayed, 0);
    assert_eq!(crashed.volume.journal_map(0, 600).len(), 300);

    t.volume.close().unwrap();
    let reopened = t.crash_and_reopen();
    assert!(reopened.volume.journal_map(0, 600).is_empty());
    for i in 0..300u64 {
        assert_eq!(
            reopened.volume.read(i * 1024, 512).unwrap(),
            pattern(i as u8, 512)
        );
    }
}

#[test]
fn test_checkpoint_drains_journal_when_slot_is_too_small() {
    let t = setup_volume_with(base_config(), 1024);
    write_scattered(&t.volume, 300);

    // shrink the slots recorded on the device to one block each
    let mut block = vec![0u8; 4096];
    t.device.read_at(4096, &mut block).unwrap();
    let mut ws: WriteCacheSuper = codec::decode(&block).unwrap();
    ws.map_blocks = 1;
    let mut encoded = codec::encode(&ws);
    encoded.resize(4096, 0);
    t.device.write_at(4096, &encoded).unwrap();

    let small = t.crash_and_reopen();
    assert_eq!(small.volume.superblock().map_blocks, 1);
    assert_eq!(small.volume.journal_map(0, 600).len(), 300);

    // reclaim writes generation 1, the checkpoint itself generation 2
    assert_eq!(small.volume.checkpoint().unwrap(), 2);
    assert!(small.volume.journal_map(0, 600).is_empty());
    assert_eq!(small.volume.backend_map(0, 600).len(), 300);
    assert_eq!(small.volume.read(1024, 512).unwrap(), pattern(1, 512));
}

#[test]
fn test_close_retry_after_device_error() {
    let device = Arc::new(FaultyDevice::new(JOURNAL_BLOCKS * 4096));
    let store = Arc::new(MemoryStore::new());
    let volume = Volume::create_with(base_config().build(), device.clone(), store.clone()).unwrap();
    volume.write(0, &pattern(1, 4096)).unwrap();

    device.fail_writes.store(true, Ordering::SeqCst);
    assert!(matches!(volume.close(), Err(LsvdError::Device(_))));
    assert_eq!(volume.read(0, 4096).unwrap(), pattern(1, 4096));

    device.fail_writes.store(false, Ordering::SeqCst);
    volume.write(4096, &pattern(2, 4096)).unwrap();
    volume.close().unwrap();
    assert!(matches!(volume.close(), Err(LsvdError::Closed)));

    let image = Arc::new(MemoryDevice::from_bytes(device.inner.snapshot()));
    let reopened = Volume::open_with(base_config().build(), image, store).unwrap();
    assert_eq!(reopened.recovery().unwrap().journal.records_replayed, 0);
    assert_eq!(
        reopened.read(0, 8192).unwrap(),
        [pattern(1, 4096), pattern(2, 4096)].concat()
    );
}

#[test]
fn test_failed_close_restarts_flusher() {
    let device = Arc::new(FaultyDevice::new(JOURNAL_BLOCKS * 4096));
    let config = base_config()
        .background_flush(true)
        .flush_interval_ms(10)
        .reclaim_threshold(1)
        .build();
    let volume = Volume::create_with(config, device.clone(), Arc::new(MemoryStore::new())).unwrap();

    device.fail_writes.store(true, Ordering::SeqCst);
    assert!(volume.close().is_err());
    device.fail_writes.store(false, Ordering::SeqCst);

    for i in 0..4u64 {
        volume.write(i * 4096, &pattern(i as u8, 4096)).unwrap();
    }
    let mut drained = false;
    for _ in 0..500 {
        let sb = volume.superblock();
        if sb.oldest == sb.next && !volume.backend().objects().is_empty() {
            drained = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(drained, "flusher was not restarted after the failed close");
    volume.close().unwrap();
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[test]
fn test_crash_replays_unflushed_writes() {
    let t = setup_volume();
    for i in 0..5u64 {
        t.volume.write(i * 4096, &pattern(i as u8, 4096)).unwrap();
    }

    let reopened = t.crash_and_reopen();
    let recovery = reopened.volume.recovery().unwrap();
    assert_eq!(recovery.journal.records_replayed, 5);
    assert_eq!(recovery.journal.last_seq, 5);
    assert!(!recovery.journal.was_truncated);
    assert_eq!(recovery.backend.objects_replayed, 0);

    for i in 0..5u64 {
        assert_eq!(
            reopened.volume.read(i * 4096, 4096).unwrap(),
            pattern(i as u8, 4096)
        );
    }
    assert_eq!(reopened.volume.journal().next_seq(), 6);
    assert_eq!(reopened.volume.flush().unwrap(), 1);
}

#[test]
fn test_crash_after_flush_and_reclaim() {
    let t = setup_volume();
    t.volume.write(0, &pattern(1, 4096)).unwrap();
    t.volume.flush().unwrap();
    t.volume.reclaim().unwrap();
    t.volume.write(4096, &pattern(2, 4096)).unwrap();

    let reopened = t.crash_and_reopen();
    let recovery = reopened.volume.recovery().unwrap();
    assert_eq!(recovery.journal.records_replayed, 1);
    assert_eq!(recovery.journal.checkpoint_generation, Some(1));
    assert_eq!(recovery.backend.objects_replayed, 1);

    assert_eq!(
        reopened.volume.read(0, 8192).unwrap(),
        [pattern(1, 4096), pattern(2, 4096)].concat()
    );
    assert_eq!(reopened.volume.journal_map(0, 8).len(), 0);
    assert_eq!(reopened.volume.backend_map(0, 8).len(), 1);
}

#[test]
fn test_crash_between_flush_and_reclaim() {
    let t = setup_volume();
    t.volume.write(0, &pattern(1, 4096)).unwrap();
    t.volume.flush().unwrap();

    // the flush cursor was never persisted, so the record is flushed again
    let reopened = t.crash_and_reopen();
    assert_eq!(reopened.volume.recovery().unwrap().journal.records_replayed, 1);
    assert_eq!(reopened.volume.flush().unwrap(), 1);
    assert_eq!(reopened.volume.backend().dead_objects(), vec![1]);

    reopened.volume.reclaim().unwrap();
    assert_eq!(reopened.volume.read(0, 4096).unwrap(), pattern(1, 4096));
}

#[test]
fn test_crash_after_backend_checkpoint() {
    let t = setup_volume_with(
        base_config().batch_size(4096).checkpoint_interval(1),
        JOURNAL_BLOCKS,
    );
    t.volume.write(0, &pattern(1, 4096)).unwrap();
    t.volume.write(0, &pattern(2, 4096)).unwrap();
    t.volume.flush().unwrap();
    t.volume.reclaim().unwrap();

    let reopened = t.crash_and_reopen();
    let recovery = reopened.volume.recovery().unwrap();
    assert!(recovery.backend.checkpoint.is_some());
    assert_eq!(recovery.backend.objects_replayed, 0);
    assert_eq!(reopened.volume.read(0, 4096).unwrap(), pattern(2, 4096));
}

#[test]
fn test_crash_on_torn_journal_record() {
    let t = setup_volume();
    t.volume.write(0, &pattern(1, 4096)).unwrap();
    let before = t.volume.superblock().next;
    t.volume.write(4096, &pattern(2, 4096)).unwrap();

    // damage the payload of the second record
    let payload = (before as u64 + 1) * 4096;
    t.device.write_at(payload, &[0xffu8; 16]).unwrap();

    let reopened = t.crash_and_reopen();
    let recovery = reopened.volume.recovery().unwrap();
    assert_eq!(recovery.journal.records_replayed, 1);
    assert!(recovery.journal.was_truncated);
    assert_eq!(recovery.journal.next_cursor, before);
    assert_eq!(reopened.volume.read(0, 4096).unwrap(), pattern(1, 4096));
    assert!(reopened.volume.read(4096, 4096).unwrap().iter().all(|&b| b == 0));
}

// =============================================================================
// Background and Concurrency Tests
// =============================================================================

#[test]
fn test_background_flusher() {
    let t = setup_volume_with(
        base_config()
            .background_flush(true)
            .flush_interval_ms(10)
            .reclaim_threshold(1),
        JOURNAL_BLOCKS,
    );
    for i in 0..4u64 {
        t.volume.write(i * 4096, &pattern(i as u8, 4096)).unwrap();
    }

    let mut done = false;
    for _ in 0..500 {
        let sb = t.volume.superblock();
        if sb.oldest == sb.next && !t.volume.backend().objects().is_empty() {
            done = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(done, "flusher did not flush and reclaim the journal");

    assert!(t.volume.journal_map(0, 64).is_empty());
    for i in 0..4u64 {
        assert_eq!(t.volume.read(i * 4096, 4096).unwrap(), pattern(i as u8, 4096));
    }
    t.volume.close().unwrap();
}

#[test]
fn test_concurrent_writers_and_readers() {
    let t = setup_volume();
    let volume = &t.volume;

    thread::scope(|s| {
        for worker in 0..4u64 {
            s.spawn(move || {
                let base = worker * 1024 * 1024;
                for i in 0..64u64 {
                    let offset = base + (i % 16) * 4096;
                    let data = pattern((worker * 64 + i) as u8, 4096);
                    volume.write(offset, &data).unwrap();
                    assert_eq!(volume.read(offset, 4096).unwrap(), data);
                }
            });
        }
    });

    for worker in 0..4u64 {
        let base = worker * 1024 * 1024;
        for slot in 0..16u64 {
            let last = 48 + slot;
            assert_eq!(
                volume.read(base + slot * 4096, 4096).unwrap(),
                pattern((worker * 64 + last) as u8, 4096)
            );
        }
    }
}
