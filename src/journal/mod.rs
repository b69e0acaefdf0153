//! Write Journal Module
//!
//! Durable, append-only write cache on a fast local device.
//!
//! ## Responsibilities
//! - Append records (header + extents + payload) and return once durable
//! - Sequence numbers for ordering, CRC32 for torn-write detection
//! - Keep the journal map: LBA → device sector of the newest write
//! - Serve journal-resident reads
//! - Hand records to the flusher and reclaim space once they are in the
//!   backend
//!
//! ## Device Layout
//! ```text
//! ┌─────────┬─────────┬─────────┬───────────────────┬───────────────────────┐
//! │ block 0 │ block 1 │ block 2 │ ckpt slot A │ B   │ record ring           │
//! │ super   │ w-super │ r-super │ map_blocks each   │ [base, limit)         │
//! └─────────┴─────────┴─────────┴───────────────────┴───────────────────────┘
//!
//! ring:  ... │ oldest ──── flushed ──── next │ free ... │
//!              in backend   unflushed
//! ```
//!
//! ## Locking
//! `checkpoint` → `state` → `fence` → `map`. The state lock is held for a
//! whole append, so commit order is sequence order.

pub(crate) mod reader;
mod record;
mod ring;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::checkpoint::{slot_blocks_for, JournalRecovery, MapCheckpoint, MapRegion, RecoveryResult};
use crate::codec::{
    self, JournalExtent, JournalSuperblock, ReadCacheSuper, Record, WriteCacheSuper, BLOCK_SIZE,
    FORMAT_VERSION, J_READ_SUPER, J_WRITE_SUPER, LSVD_MAGIC, SECTORS_PER_BLOCK, SECTOR_SIZE,
};
use crate::device::BlockDevice;
use crate::error::{LsvdError, Result};
use crate::extent::{Extent, ExtentMap, MapEntry};

use reader::{block_offset, RecordReader};

pub use record::{parse_header_block, JournalRecord};
pub use ring::{sector_runs, BlockRun, Ring};

/// Block of the write-cache superblock
pub const WRITE_SUPER_BLOCK: u32 = 1;
/// Block of the read-cache superblock
pub const READ_SUPER_BLOCK: u32 = 2;
/// First checkpoint slot block
pub const MAP_START_BLOCK: u32 = 3;

/// Smallest usable record ring
const MIN_RING_BLOCKS: u32 = 4;

/// Largest journal device: every sector number must fit in a `u32`
pub const MAX_JOURNAL_BLOCKS: u32 = u32::MAX / SECTORS_PER_BLOCK as u32;

/// Upper bound on payload blocks in one record written by the volume
const MAX_RECORD_PAYLOAD_BLOCKS: u32 = 256;

// =============================================================================
// Layout
// =============================================================================

/// Where everything lives on one journal device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalLayout {
    pub vol_uuid: Uuid,
    pub total_blocks: u32,
    pub write_super: u32,
    pub read_super: u32,
    pub map_start: u32,
    /// Blocks per checkpoint slot
    pub map_blocks: u32,
    pub ring: Ring,
}

impl JournalLayout {
    /// Layout for a fresh device of `total_blocks`.
    ///
    /// Each checkpoint slot gets at least `min_map_blocks` blocks, and more
    /// if that is needed to hold the largest map the ring can produce.
    pub fn new(vol_uuid: Uuid, total_blocks: u32, min_map_blocks: u32) -> Result<Self> {
        if min_map_blocks == 0 {
            return Err(LsvdError::Config(
                "checkpoint slots need at least one block".to_string(),
            ));
        }
        if total_blocks > MAX_JOURNAL_BLOCKS {
            return Err(LsvdError::Config(format!(
                "journal of {} blocks exceeds the {}-block maximum",
                total_blocks, MAX_JOURNAL_BLOCKS
            )));
        }
        let too_small = |map_blocks: u32| {
            LsvdError::Config(format!(
                "journal of {} blocks too small for {}-block checkpoint slots",
                total_blocks, map_blocks
            ))
        };
        let slots_end = |map_blocks: u32| MAP_START_BLOCK as u64 + 2 * map_blocks as u64;
        if slots_end(min_map_blocks) + MIN_RING_BLOCKS as u64 > total_blocks as u64 {
            return Err(too_small(min_map_blocks));
        }

        // sized for the ring left by the smallest slots; bigger slots only
        // shrink the ring
        let largest_ring = (total_blocks as u64 - slots_end(min_map_blocks)) as u32;
        let map_blocks = min_map_blocks.max(slot_blocks_for(largest_ring));
        let base = slots_end(map_blocks);
        if base + MIN_RING_BLOCKS as u64 > total_blocks as u64 {
            return Err(too_small(map_blocks));
        }
        Ok(Self {
            vol_uuid,
            total_blocks,
            write_super: WRITE_SUPER_BLOCK,
            read_super: READ_SUPER_BLOCK,
            map_start: MAP_START_BLOCK,
            map_blocks,
            ring: Ring::new(base as u32, total_blocks),
        })
    }

    /// Rebuild the layout from the superblocks of an existing device
    fn from_superblocks(sb: &JournalSuperblock, ws: &WriteCacheSuper) -> Result<Self> {
        let slots_end = ws.map_start as u64 + 2 * ws.map_blocks as u64;
        if ws.map_blocks == 0
            || slots_end > ws.base as u64
            || ws.base >= ws.limit
            || ws.limit > sb.total_blocks
            || sb.total_blocks > MAX_JOURNAL_BLOCKS
        {
            return Err(LsvdError::Recovery(format!(
                "inconsistent journal layout: slots [{}, {}), ring [{}, {}), {} blocks",
                ws.map_start, slots_end, ws.base, ws.limit, sb.total_blocks
            )));
        }
        Ok(Self {
            vol_uuid: sb.vol_uuid,
            total_blocks: sb.total_blocks,
            write_super: sb.write_super,
            read_super: sb.read_super,
            map_start: ws.map_start,
            map_blocks: ws.map_blocks,
            ring: Ring::new(ws.base, ws.limit),
        })
    }

    pub fn slot_block(&self, slot: u32) -> u32 {
        self.map_start + slot * self.map_blocks
    }

    fn write_cache_super(&self, state: &JournalState, generation: u64) -> WriteCacheSuper {
        WriteCacheSuper {
            magic: LSVD_MAGIC,
            kind: J_WRITE_SUPER,
            version: FORMAT_VERSION,
            vol_uuid: self.vol_uuid,
            base: self.ring.base,
            limit: self.ring.limit,
            next: state.next,
            oldest: state.oldest,
            flushed: state.flushed,
            seq: state.seq,
            map_start: self.map_start,
            map_blocks: self.map_blocks,
            ckpt_generation: generation,
        }
    }

    fn read_cache_super(&self) -> ReadCacheSuper {
        ReadCacheSuper {
            magic: LSVD_MAGIC,
            kind: J_READ_SUPER,
            version: FORMAT_VERSION,
            vol_uuid: self.vol_uuid,
            unit_sectors: SECTORS_PER_BLOCK as u32,
            base: self.ring.limit,
            units: 0,
            map_start: self.ring.limit,
            map_blocks: 0,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn write_block<T: Record>(device: &dyn BlockDevice, block: u32, record: &T) -> Result<()> {
    let mut buf = codec::encode(record);
    buf.resize(BLOCK_SIZE, 0);
    device.write_at(block_offset(block), &buf)
}

fn read_block<T: Record>(device: &dyn BlockDevice, block: u32) -> Result<T> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    device.read_at(block_offset(block), &mut buf)?;
    codec::decode(&buf)
}

/// Point the map at the payload of a record whose header sits at `pos`.
///
/// Extents that cross the end of the ring become two map entries.
pub(crate) fn apply_extents(
    map: &mut ExtentMap<u64>,
    ring: &Ring,
    pos: u32,
    payload_blocks: u32,
    extents: &[JournalExtent],
) {
    let runs = ring.payload_runs(pos, payload_blocks);
    let mut offset = 0u64;
    for e in extents {
        let mut lba = e.lba;
        for (sector, len) in sector_runs(&runs, offset, e.len as u64) {
            map.update(lba, len, sector);
            lba += len;
        }
        offset += e.len as u64;
    }
}

// =============================================================================
// Journal
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct JournalState {
    next: u32,
    oldest: u32,
    flushed: u32,
    /// Sequence number of the next record
    seq: u64,
}

/// Extents of one record, as returned by [`Journal::oldest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OldestRecord {
    /// Block just past this record
    pub next: u32,
    pub seq: u64,
    pub extents: Vec<Extent>,
}

/// The write journal
pub struct Journal {
    device: Arc<dyn BlockDevice>,
    layout: JournalLayout,
    state: Mutex<JournalState>,
    map: RwLock<ExtentMap<u64>>,
    /// Shared by payload readers, exclusive while reclaim trims the map
    fence: RwLock<()>,
    /// Serializes checkpoints; holds the last written generation
    checkpoint: Mutex<u64>,
}

impl Journal {
    /// Write fresh superblocks to `device` and return an empty journal.
    ///
    /// `min_map_blocks` is a lower bound on the checkpoint slot size; see
    /// [`JournalLayout::new`].
    pub fn format(device: Arc<dyn BlockDevice>, min_map_blocks: u32) -> Result<Self> {
        let blocks = device.size()? / BLOCK_SIZE as u64;
        let total_blocks = u32::try_from(blocks).map_err(|_| {
            LsvdError::Config(format!("journal device of {} blocks is too large", blocks))
        })?;
        let layout = JournalLayout::new(Uuid::new_v4(), total_blocks, min_map_blocks)?;
        let state = JournalState {
            next: layout.ring.base,
            oldest: layout.ring.base,
            flushed: layout.ring.base,
            seq: 1,
        };

        let sb = JournalSuperblock::new(
            layout.vol_uuid,
            total_blocks,
            layout.write_super,
            layout.read_super,
        );
        write_block(&*device, 0, &sb)?;
        write_block(&*device, layout.write_super, &layout.write_cache_super(&state, 0))?;
        write_block(&*device, layout.read_super, &layout.read_cache_super())?;
        MapRegion::new(&*device, &layout).clear()?;
        device.sync()?;

        info!(
            uuid = %layout.vol_uuid,
            total_blocks,
            base = layout.ring.base,
            "journal formatted"
        );

        Ok(Self::from_parts(device, layout, state, ExtentMap::new(), 0))
    }

    /// Open a formatted device, rebuilding the map from the last checkpoint
    /// and the records after it
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<(Self, RecoveryResult)> {
        let sb: JournalSuperblock = read_block(&*device, 0)?;
        sb.validate()?;
        let device_blocks = device.size()? / BLOCK_SIZE as u64;
        if sb.total_blocks as u64 > device_blocks {
            return Err(LsvdError::Recovery(format!(
                "superblock claims {} blocks, device has {}",
                sb.total_blocks, device_blocks
            )));
        }

        let ws: WriteCacheSuper = read_block(&*device, sb.write_super)?;
        ws.validate(&sb.vol_uuid)?;
        let rs: ReadCacheSuper = read_block(&*device, sb.read_super)?;
        rs.validate()?;

        let layout = JournalLayout::from_superblocks(&sb, &ws)?;
        let (recovered, result) = JournalRecovery::recover(&*device, &layout, &ws)?;

        let state = JournalState {
            next: recovered.next,
            oldest: recovered.oldest,
            flushed: recovered.flushed,
            seq: recovered.seq,
        };
        let journal = Self::from_parts(
            device,
            layout,
            state,
            recovered.map,
            recovered.generation,
        );
        Ok((journal, result))
    }

    fn from_parts(
        device: Arc<dyn BlockDevice>,
        layout: JournalLayout,
        state: JournalState,
        map: ExtentMap<u64>,
        generation: u64,
    ) -> Self {
        Self {
            device,
            layout,
            state: Mutex::new(state),
            map: RwLock::new(map),
            fence: RwLock::new(()),
            checkpoint: Mutex::new(generation),
        }
    }

    pub fn layout(&self) -> &JournalLayout {
        &self.layout
    }

    pub fn vol_uuid(&self) -> Uuid {
        self.layout.vol_uuid
    }

    fn reader(&self) -> RecordReader<'_> {
        RecordReader::new(&*self.device, self.layout.ring, self.layout.vol_uuid)
    }

    // =========================================================================
    // Appends
    // =========================================================================

    /// Append a single write; returns the record's sequence number
    pub fn append(&self, lba: u64, data: &[u8]) -> Result<u64> {
        self.append_many(&[(lba, data)])
    }

    /// Append several writes as one record.
    ///
    /// Returns after the record is durable and the map points at it. On any
    /// error the journal is left exactly as before the call.
    pub fn append_many(&self, writes: &[(u64, &[u8])]) -> Result<u64> {
        record::check_writes(writes)?;
        let ring = self.layout.ring;

        let mut state = self.state.lock();
        let image = record::build_record(self.layout.vol_uuid, state.seq, writes);
        if image.blocks() >= ring.capacity() {
            return Err(LsvdError::RecordTooLarge(format!(
                "record of {} blocks, ring holds {}",
                image.blocks(),
                ring.capacity()
            )));
        }
        let free = ring.free(state.oldest, state.next);
        if image.blocks() > free {
            return Err(LsvdError::JournalFull {
                needed: image.blocks(),
                free,
            });
        }

        let pos = state.next;
        let mut written = 0usize;
        for run in ring.runs(pos, image.blocks()) {
            let bytes = run.blocks as usize * BLOCK_SIZE;
            self.device
                .write_at(block_offset(run.start), &image.bytes[written..written + bytes])?;
            written += bytes;
        }
        self.device.sync()?;

        {
            let mut map = self.map.write();
            apply_extents(&mut map, &ring, pos, image.payload_blocks(), &image.extents);
        }
        let seq = state.seq;
        state.next = ring.advance(pos, image.blocks());
        state.seq += 1;
        Ok(seq)
    }

    /// Largest write the journal accepts as a single record, in sectors
    pub fn max_write_sectors(&self) -> u64 {
        let by_ring = (self.layout.ring.capacity() / 2).saturating_sub(1).max(1);
        let blocks = by_ring.min(MAX_RECORD_PAYLOAD_BLOCKS);
        blocks as u64 * SECTORS_PER_BLOCK
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read `sectors` sectors at `lba`; unmapped sectors read as zeros
    pub fn read(&self, lba: u64, sectors: u64) -> Result<Vec<u8>> {
        let bytes = usize::try_from(sectors)
            .ok()
            .and_then(|n| n.checked_mul(SECTOR_SIZE))
            .filter(|_| lba.checked_add(sectors).is_some())
            .ok_or_else(|| {
                LsvdError::InvalidArgument(format!("read of {}+{} sectors out of range", lba, sectors))
            })?;
        let mut buf = vec![0u8; bytes];
        self.read_into(lba, &mut buf)?;
        Ok(buf)
    }

    /// Fill the journal-resident parts of `buf` (which starts at `lba`).
    ///
    /// Returns the holes; their bytes in `buf` are left untouched.
    pub fn read_into(&self, lba: u64, buf: &mut [u8]) -> Result<Vec<Extent>> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(LsvdError::InvalidArgument(format!(
                "read length {} is not a multiple of {}",
                buf.len(),
                SECTOR_SIZE
            )));
        }
        let sectors = (buf.len() / SECTOR_SIZE) as u64;
        if lba.checked_add(sectors).is_none() {
            return Err(LsvdError::InvalidArgument(format!(
                "read of {}+{} sectors out of range",
                lba, sectors
            )));
        }
        let _fence = self.fence.read();
        let pieces = self.map.read().resolve(lba, sectors);

        let mut holes = Vec::new();
        for piece in pieces {
            match piece {
                crate::extent::Piece::Mapped(e) => {
                    let start = (e.lba - lba) as usize * SECTOR_SIZE;
                    let end = start + e.len as usize * SECTOR_SIZE;
                    self.device
                        .read_at(e.loc * SECTOR_SIZE as u64, &mut buf[start..end])?;
                }
                crate::extent::Piece::Hole(h) => holes.push(h),
            }
        }
        Ok(holes)
    }

    /// Journal map entries overlapping `[lba, lba+sectors)`, clipped
    pub fn lookup(&self, lba: u64, sectors: u64) -> Vec<MapEntry<u64>> {
        self.map.read().lookup(lba, sectors)
    }

    pub fn map_snapshot(&self) -> Vec<MapEntry<u64>> {
        self.map.read().snapshot()
    }

    // =========================================================================
    // Record Iteration
    // =========================================================================

    /// Extents of the first live record starting at or after `cursor`.
    ///
    /// `cursor` may point anywhere in `[oldest, next]`; record boundaries
    /// are found by walking the chain from `oldest`. Returns `None` once no
    /// record starts at or after `cursor`.
    pub fn oldest(&self, cursor: u32) -> Result<Option<OldestRecord>> {
        let ring = self.layout.ring;
        let (oldest, next) = {
            let state = self.state.lock();
            (state.oldest, state.next)
        };
        if cursor == next {
            return Ok(None);
        }
        self.check_in_use(oldest, next, cursor)?;

        let reader = self.reader();
        let target = ring.distance(oldest, cursor);
        let live = ring.distance(oldest, next);
        let mut pos = oldest;
        while pos != next {
            let (header, extents, _) = reader.read_header(pos)?;
            let after = ring.advance(pos, header.len);
            if header.len == 0 || ring.distance(oldest, after) > live {
                return Err(LsvdError::Recovery(format!(
                    "record seq {} at block {} runs past the append cursor {}",
                    header.seq, pos, next
                )));
            }
            if ring.distance(oldest, pos) >= target {
                return Ok(Some(OldestRecord {
                    next: after,
                    seq: header.seq,
                    extents: extents
                        .iter()
                        .map(|e| Extent::new(e.lba, e.len as u64))
                        .collect(),
                }));
            }
            pos = after;
        }
        Ok(None)
    }

    /// The whole record at `cursor`, payload included
    pub fn read_record(&self, cursor: u32) -> Result<JournalRecord> {
        let (oldest, next) = {
            let state = self.state.lock();
            (state.oldest, state.next)
        };
        self.check_in_use(oldest, next, cursor)?;
        self.reader().read_record(cursor)
    }

    fn check_in_use(&self, oldest: u32, next: u32, cursor: u32) -> Result<()> {
        if !self.layout.ring.in_use(oldest, next, cursor) {
            return Err(LsvdError::InvalidArgument(format!(
                "cursor {} outside live records [{}, {})",
                cursor, oldest, next
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Flush Cursor
    // =========================================================================

    /// `(flushed, next)`: records not yet contained in backend objects
    pub fn unflushed_range(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.flushed, state.next)
    }

    /// Records before `cursor` are durable in the backend
    pub fn mark_flushed(&self, cursor: u32) -> Result<()> {
        let ring = self.layout.ring;
        let mut state = self.state.lock();
        if ring.distance(state.flushed, cursor) > ring.distance(state.flushed, state.next) {
            return Err(LsvdError::InvalidArgument(format!(
                "flush cursor {} outside unflushed range [{}, {})",
                cursor, state.flushed, state.next
            )));
        }
        state.flushed = cursor;
        Ok(())
    }

    /// Ring utilisation in percent
    pub fn utilization(&self) -> u8 {
        let ring = self.layout.ring;
        let state = self.state.lock();
        (ring.used(state.oldest, state.next) as u64 * 100 / ring.capacity() as u64) as u8
    }

    /// Blocks held by records already flushed to the backend
    pub fn reclaimable_blocks(&self) -> u32 {
        let state = self.state.lock();
        self.layout.ring.distance(state.oldest, state.flushed)
    }

    // =========================================================================
    // Checkpoint and Reclaim
    // =========================================================================

    /// Persist the current map so a restart replays only later records.
    ///
    /// Returns the new checkpoint generation.
    pub fn checkpoint(&self) -> Result<u64> {
        let mut generation = self.checkpoint.lock();
        let ckpt = {
            let state = self.state.lock();
            let map = self.map.read();
            self.snapshot(&state, &map, *generation + 1, state.oldest)?
        };
        self.persist(&ckpt)?;
        *generation = ckpt.generation;
        info!(
            generation = ckpt.generation,
            entries = ckpt.entries.len(),
            cursor = ckpt.cursor,
            "journal checkpoint"
        );
        Ok(ckpt.generation)
    }

    /// Free the records in `[oldest, flushed)`.
    ///
    /// Map entries still pointing into them are dropped, a checkpoint
    /// recording the new `oldest` is made durable, and only then does the
    /// space become available to appends. Returns the blocks freed.
    pub fn reclaim(&self) -> Result<u32> {
        let ring = self.layout.ring;
        let mut generation = self.checkpoint.lock();
        let (oldest, flushed) = {
            let state = self.state.lock();
            (state.oldest, state.flushed)
        };
        if oldest == flushed {
            return Ok(0);
        }

        // [oldest, flushed) is immutable while we hold the checkpoint lock
        let reader = self.reader();
        let mut freed = Vec::new();
        let mut cursor = oldest;
        while cursor != flushed {
            let (header, extents, _) = reader.read_header(cursor)?;
            freed.push((cursor, header.len, extents));
            cursor = ring.advance(cursor, header.len);
        }

        let ckpt = {
            let state = self.state.lock();
            let _fence = self.fence.write();
            let mut map = self.map.write();
            let mut removed = 0u64;
            for (pos, len, extents) in &freed {
                let runs = ring.payload_runs(*pos, len - 1);
                let mut offset = 0u64;
                for e in extents {
                    let mut lba = e.lba;
                    for (sector, n) in sector_runs(&runs, offset, e.len as u64) {
                        removed += map.remove_if(lba, n, |piece| {
                            piece.loc == sector + (piece.lba - lba)
                        });
                        lba += n;
                    }
                    offset += e.len as u64;
                }
            }
            debug!(records = freed.len(), sectors = removed, "journal map trimmed");
            self.snapshot(&state, &map, *generation + 1, flushed)?
        };
        self.persist(&ckpt)?;
        *generation = ckpt.generation;

        self.state.lock().oldest = flushed;
        let blocks = ring.distance(oldest, flushed);
        debug!(from = oldest, to = flushed, blocks, "journal space reclaimed");
        Ok(blocks)
    }

    fn snapshot(
        &self,
        state: &JournalState,
        map: &ExtentMap<u64>,
        generation: u64,
        oldest: u32,
    ) -> Result<MapCheckpoint> {
        Ok(MapCheckpoint {
            generation,
            cursor: state.next,
            seq: state.seq,
            oldest,
            flushed: state.flushed,
            entries: MapCheckpoint::map_entries(map)?,
        })
    }

    /// Slot first, then the write-cache superblock with the same cursors
    fn persist(&self, ckpt: &MapCheckpoint) -> Result<()> {
        MapRegion::new(&*self.device, &self.layout).write(ckpt)?;
        let state = JournalState {
            next: ckpt.cursor,
            oldest: ckpt.oldest,
            flushed: ckpt.flushed,
            seq: ckpt.seq,
        };
        let ws = self.layout.write_cache_super(&state, ckpt.generation);
        write_block(&*self.device, self.layout.write_super, &ws)?;
        self.device.sync()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Write-cache superblock as it would be written now
    pub fn superblock(&self) -> WriteCacheSuper {
        let generation = *self.checkpoint.lock();
        let state = *self.state.lock();
        self.layout.write_cache_super(&state, generation)
    }

    /// Sequence number the next record will get
    pub fn next_seq(&self) -> u64 {
        self.state.lock().seq
    }

    pub fn sync(&self) -> Result<()> {
        self.device.sync()
    }
}
