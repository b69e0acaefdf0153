//! Journal recovery
//!
//! Seeds the map from the newest checkpoint slot and replays the records
//! written after it.

use tracing::{debug, info, warn};

use crate::codec::WriteCacheSuper;
use crate::device::BlockDevice;
use crate::error::{LsvdError, Result};
use crate::extent::ExtentMap;
use crate::journal::reader::RecordReader;
use crate::journal::{apply_extents, JournalLayout};

use super::MapRegion;

/// Result of a recovery operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Records replayed on top of the checkpoint
    pub records_replayed: u64,

    /// Sequence number of the last valid record (0 if none was ever written)
    pub last_seq: u64,

    /// Where the next append will go
    pub next_cursor: u32,

    /// Generation of the checkpoint the map was seeded from
    pub checkpoint_generation: Option<u64>,

    /// Whether a partially written record was discarded at the tail
    pub was_truncated: bool,
}

/// Journal state rebuilt at open
pub(crate) struct RecoveredJournal {
    pub map: ExtentMap<u64>,
    pub next: u32,
    pub oldest: u32,
    pub flushed: u32,
    pub seq: u64,
    pub generation: u64,
}

/// Rebuilds journal state from checkpoint slots and the record ring
pub struct JournalRecovery;

impl JournalRecovery {
    /// Recover the journal described by `layout`.
    ///
    /// This will:
    /// 1. Load the newest valid checkpoint slot, or fall back to the
    ///    write-cache superblock
    /// 2. Replay records from the checkpoint cursor in sequence order,
    ///    including any past the superblock's `next`
    /// 3. Stop at the first record that fails validation
    pub(crate) fn recover(
        device: &dyn BlockDevice,
        layout: &JournalLayout,
        wsuper: &WriteCacheSuper,
    ) -> Result<(RecoveredJournal, RecoveryResult)> {
        let ring = layout.ring;

        let (mut map, cursor, expected, oldest, flushed, generation, from) =
            match MapRegion::new(device, layout).load()? {
                Some(ckpt) => {
                    let map = ckpt.to_map()?;
                    (
                        map,
                        ckpt.cursor,
                        Some(ckpt.seq),
                        ckpt.oldest,
                        ckpt.flushed,
                        ckpt.generation,
                        Some(ckpt.generation),
                    )
                }
                None if wsuper.oldest == wsuper.next => (
                    ExtentMap::new(),
                    wsuper.next,
                    Some(wsuper.seq),
                    wsuper.oldest,
                    wsuper.oldest,
                    0,
                    None,
                ),
                None => {
                    // Records between oldest and next are live but their
                    // first sequence number is unknown; take it from the log.
                    warn!(
                        oldest = wsuper.oldest,
                        next = wsuper.next,
                        "no valid journal checkpoint, replaying from oldest"
                    );
                    (
                        ExtentMap::new(),
                        wsuper.oldest,
                        None,
                        wsuper.oldest,
                        wsuper.oldest,
                        0,
                        None,
                    )
                }
            };

        let reader = RecordReader::new(device, ring, layout.vol_uuid);
        let mut pos = cursor;
        let mut expected = expected;
        let mut replayed = 0u64;
        let mut truncated = false;

        loop {
            let free = ring.free(oldest, pos);
            if free == 0 {
                break;
            }

            let header = match reader.read_header(pos) {
                Ok((header, _, _)) => header,
                Err(LsvdError::Device(e)) => return Err(LsvdError::Device(e)),
                Err(e) => {
                    debug!(pos, error = %e, "end of journal");
                    break;
                }
            };
            if let Some(seq) = expected {
                if header.seq != seq {
                    debug!(pos, found = header.seq, expected = seq, "stale record ends journal");
                    break;
                }
            }
            if header.len > free {
                warn!(pos, seq = header.seq, len = header.len, free, "record overruns oldest, discarding tail");
                truncated = true;
                break;
            }

            let record = match reader.read_record(pos) {
                Ok(r) => r,
                Err(LsvdError::Device(e)) => return Err(LsvdError::Device(e)),
                Err(e) => {
                    warn!(pos, seq = header.seq, error = %e, "torn record, discarding tail");
                    truncated = true;
                    break;
                }
            };

            apply_extents(&mut map, &ring, pos, record.header.len - 1, &record.extents);
            pos = record.next;
            expected = Some(record.seq() + 1);
            replayed += 1;
        }

        let seq = expected.unwrap_or(wsuper.seq);
        let result = RecoveryResult {
            records_replayed: replayed,
            last_seq: seq.saturating_sub(1),
            next_cursor: pos,
            checkpoint_generation: from,
            was_truncated: truncated,
        };

        info!(
            records = replayed,
            last_seq = result.last_seq,
            next = pos,
            checkpoint = ?from,
            truncated,
            "journal recovered"
        );

        Ok((
            RecoveredJournal {
                map,
                next: pos,
                oldest,
                flushed,
                seq,
                generation,
            },
            result,
        ))
    }
}
