//! Backend translation layer
//!
//! Owns the backend map (LBA → object offset), the table of live objects,
//! object sequence allocation, cleaning accounting and backend checkpoints.
//!
//! ## Concurrency
//! - `state`: sequence allocation and object info; held across a DATA object
//!   write so objects are applied in sequence order
//! - `map`: many readers, one writer
//! - `fence`: shared by object readers, exclusive while dead objects are
//!   deleted. Never acquired while `state` is held.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::codec::{
    CkptMapEntry, CkptObj, DeferredDelete, ObjCleaned, SnapInfo, SuperHeader, SECTOR_SIZE,
};
use crate::error::{LsvdError, Result};
use crate::extent::{Extent, ExtentMap, MapEntry, ObjectOffset, Piece};

use super::builder::{build_super, CheckpointBuilder, DataObjectBuilder};
use super::reader::{decode_object, ObjectBody};
use super::store::{object_name, ObjectStore};

/// Per-object accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub hdr_sectors: u32,
    pub data_sectors: u32,
    /// Sectors still referenced by the backend map
    pub live_sectors: u32,
}

/// Result of opening a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRecovery {
    /// Checkpoint the map was loaded from
    pub checkpoint: Option<u64>,
    /// DATA objects applied on top of it
    pub objects_replayed: u64,
    /// Sequence number the next object will get
    pub next_seq: u64,
}

struct BackendState {
    vol_size: u64,
    next_seq: u64,
    last_data_obj: u64,
    last_ckpt: Option<u64>,
    objects: BTreeMap<u64, ObjectInfo>,
    /// Objects superseded since the last DATA object
    pending_cleaned: Vec<ObjCleaned>,
    /// Objects with no live sectors, deleted at the next checkpoint
    dead: BTreeSet<u64>,
    data_since_ckpt: u32,
    /// Snapshots listed by the superblock; while any exist nothing is deleted
    snaps: Vec<SnapInfo>,
}

impl BackendState {
    /// Point the map at a DATA object's extents and charge the displaced
    /// sectors to their old objects
    fn apply_data(
        &mut self,
        map: &mut ExtentMap<ObjectOffset>,
        seq: u64,
        extents: &[(u64, u32)],
    ) {
        let mut offset = 0u64;
        for &(lba, len) in extents {
            let displaced = map.update(lba, len as u64, ObjectOffset::new(seq, offset));
            offset += len as u64;
            for old in displaced {
                self.release(old.loc.obj, old.len, seq);
            }
        }
    }

    fn release(&mut self, obj: u64, sectors: u64, by: u64) {
        let Some(info) = self.objects.get_mut(&obj) else {
            return;
        };
        info.live_sectors = info.live_sectors.saturating_sub(sectors as u32);
        if info.live_sectors == 0 && obj != by && self.dead.insert(obj) {
            debug!(obj, "object has no live sectors");
            self.pending_cleaned.push(ObjCleaned {
                seq: obj,
                was_deleted: 0,
            });
        }
    }

    fn live_sectors(&self) -> u64 {
        self.objects.values().map(|o| o.live_sectors as u64).sum()
    }
}

/// The backend half of a volume
pub struct Backend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    state: Mutex<BackendState>,
    map: RwLock<ExtentMap<ObjectOffset>>,
    /// Header size of every object the map may point into
    headers: RwLock<HashMap<u64, u32>>,
    fence: RwLock<()>,
}

impl Backend {
    /// Write the superblock of a new, empty volume
    pub fn create(store: Arc<dyn ObjectStore>, prefix: &str, vol_size: u64) -> Result<Self> {
        if store.exists(prefix)? {
            return Err(LsvdError::InvalidArgument(format!(
                "volume '{}' already exists",
                prefix
            )));
        }
        let state = BackendState {
            vol_size,
            next_seq: 1,
            last_data_obj: 0,
            last_ckpt: None,
            objects: BTreeMap::new(),
            pending_cleaned: Vec::new(),
            dead: BTreeSet::new(),
            data_since_ckpt: 0,
            snaps: Vec::new(),
        };
        let sup = build_super(super_header(&state), &[], &[], &[]);
        store.write_object(prefix, &sup.bytes)?;
        info!(prefix, vol_size, "backend volume created");
        Ok(Self::from_parts(store, prefix, state, ExtentMap::new()))
    }

    /// Load the volume: superblock, newest checkpoint, then every later
    /// DATA object in sequence order
    pub fn open(store: Arc<dyn ObjectStore>, prefix: &str) -> Result<(Self, BackendRecovery)> {
        let parsed = decode_object(&store.read_all(prefix)?)?;
        let kind = parsed.kind();
        let (sup, ckpts, snaps, clones) = match parsed.body {
            ObjectBody::Super {
                header,
                ckpts,
                snaps,
                clones,
            } => (
                header,
                ckpts.into_entries()?,
                snaps.into_entries()?,
                clones.into_entries()?,
            ),
            _ => {
                return Err(LsvdError::Recovery(format!(
                    "'{}' is a {} object, not a superblock",
                    prefix, kind
                )))
            }
        };

        if let Some(base) = clones.first() {
            return Err(LsvdError::InvalidArgument(format!(
                "'{}' is a clone of '{}' at checkpoint {}; reading through to a base volume is not supported",
                prefix,
                base.name(),
                base.seq
            )));
        }

        let mut state = BackendState {
            vol_size: sup.vol_size,
            next_seq: sup.next_obj.max(1),
            last_data_obj: 0,
            last_ckpt: None,
            objects: BTreeMap::new(),
            pending_cleaned: Vec::new(),
            dead: BTreeSet::new(),
            data_since_ckpt: 0,
            snaps,
        };
        let mut map = ExtentMap::new();

        if let Some(&ckpt) = ckpts.iter().max() {
            let ckpt = ckpt as u64;
            let deletes = load_checkpoint(&*store, prefix, ckpt, &mut state, &mut map)?;
            for d in deletes {
                store.delete_object(&object_name(prefix, d.seq))?;
            }
            state.last_ckpt = Some(ckpt);
        }

        let mut seq = state.last_ckpt.map_or(1, |c| c + 1);
        let mut replayed = 0u64;
        loop {
            let name = object_name(prefix, seq);
            if !store.exists(&name)? {
                break;
            }
            let parsed = match decode_object(&store.read_all(&name)?) {
                Ok(p) if p.header.seq == seq && p.is_complete() => p,
                Ok(_) => {
                    warn!(seq, "object incomplete or misnumbered, ending scan");
                    break;
                }
                Err(e) => {
                    warn!(seq, error = %e, "undecodable object, ending scan");
                    break;
                }
            };
            if let ObjectBody::Data { map: table, .. } = &parsed.body {
                let extents: Vec<(u64, u32)> =
                    table.entries()?.iter().map(|e| (e.lba, e.len)).collect();
                state.objects.insert(
                    seq,
                    ObjectInfo {
                        hdr_sectors: parsed.header.hdr_sectors,
                        data_sectors: parsed.header.data_sectors,
                        live_sectors: parsed.header.data_sectors,
                    },
                );
                state.apply_data(&mut map, seq, &extents);
                state.last_data_obj = seq;
                state.data_since_ckpt += 1;
                replayed += 1;
            }
            seq += 1;
        }
        state.next_seq = state.next_seq.max(seq);
        map.verify()?;

        let recovery = BackendRecovery {
            checkpoint: state.last_ckpt,
            objects_replayed: replayed,
            next_seq: state.next_seq,
        };
        info!(
            prefix,
            checkpoint = ?recovery.checkpoint,
            objects = replayed,
            next_seq = recovery.next_seq,
            "backend recovered"
        );
        Ok((Self::from_parts(store, prefix, state, map), recovery))
    }

    fn from_parts(
        store: Arc<dyn ObjectStore>,
        prefix: &str,
        state: BackendState,
        map: ExtentMap<ObjectOffset>,
    ) -> Self {
        let headers = state
            .objects
            .iter()
            .map(|(&seq, info)| (seq, info.hdr_sectors))
            .collect();
        Self {
            store,
            prefix: prefix.to_string(),
            state: Mutex::new(state),
            map: RwLock::new(map),
            headers: RwLock::new(headers),
            fence: RwLock::new(()),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Seal and store a DATA object, then point the map at it.
    ///
    /// Returns the object's sequence number. On a store error nothing
    /// changes and the sequence number is reused by the next attempt.
    pub fn write_data_object(&self, builder: DataObjectBuilder) -> Result<u64> {
        if builder.is_empty() {
            return Err(LsvdError::InvalidArgument("empty data object".to_string()));
        }
        let extents: Vec<(u64, u32)> = builder.extents().iter().map(|e| (e.lba, e.len)).collect();

        let mut state = self.state.lock();
        let seq = state.next_seq;
        let ckpts: Vec<u32> = state.last_ckpt.iter().map(|&c| c as u32).collect();
        let sealed = builder.seal(seq, state.last_data_obj, &ckpts, &state.pending_cleaned);
        self.store
            .write_object(&object_name(&self.prefix, seq), &sealed.bytes)?;

        state.pending_cleaned.clear();
        state.next_seq = seq + 1;
        state.last_data_obj = seq;
        state.data_since_ckpt += 1;
        state.objects.insert(
            seq,
            ObjectInfo {
                hdr_sectors: sealed.hdr_sectors,
                data_sectors: sealed.data_sectors,
                live_sectors: sealed.data_sectors,
            },
        );
        self.headers.write().insert(seq, sealed.hdr_sectors);
        {
            let mut map = self.map.write();
            state.apply_data(&mut map, seq, &extents);
        }
        debug!(
            seq,
            extents = extents.len(),
            sectors = sealed.data_sectors,
            "data object written"
        );
        Ok(seq)
    }

    /// Write a CKPT object, point the superblock at it, then delete the
    /// objects it no longer needs. Returns the checkpoint's sequence number.
    pub fn checkpoint(&self) -> Result<u64> {
        let (seq, doomed) = {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0);

            let mut builder = CheckpointBuilder::new();
            builder.add_checkpoint(seq as u32);
            for (&obj, info) in &state.objects {
                if state.dead.contains(&obj) {
                    continue;
                }
                builder.add_object(CkptObj {
                    seq: obj,
                    hdr_sectors: info.hdr_sectors,
                    data_sectors: info.data_sectors,
                    live_sectors: info.live_sectors,
                });
            }
            // a snapshot's map may still point at superseded objects
            let doomed: Vec<u64> = if state.snaps.is_empty() {
                state.dead.iter().copied().chain(state.last_ckpt).collect()
            } else {
                Vec::new()
            };
            for &obj in &doomed {
                builder.add_delete(DeferredDelete { seq: obj, time: now });
            }
            for e in self.map.read().iter() {
                builder.add_map_entry(CkptMapEntry {
                    lba: e.lba,
                    len: e.len as u32,
                    obj: e.loc.obj,
                    offset: e.loc.offset as u32,
                });
            }

            let sealed = builder.seal(seq);
            self.store
                .write_object(&object_name(&self.prefix, seq), &sealed.bytes)?;
            state.next_seq = seq + 1;

            let sup = build_super(super_header(&state), &[seq as u32], &state.snaps, &[]);
            self.store.write_object(&self.prefix, &sup.bytes)?;

            state.last_ckpt = Some(seq);
            state.data_since_ckpt = 0;
            let dead = std::mem::take(&mut state.dead);
            for obj in &dead {
                state.objects.remove(obj);
            }
            (seq, doomed)
        };

        {
            let _fence = self.fence.write();
            let mut headers = self.headers.write();
            for obj in &doomed {
                headers.remove(obj);
                self.store.delete_object(&object_name(&self.prefix, *obj))?;
            }
        }
        info!(seq, deleted = doomed.len(), "backend checkpoint");
        Ok(seq)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fill the backend-resident parts of `buf` (which starts at `lba`).
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
        let _fence = self.fence.read();
        let pieces = self.map.read().resolve(lba, sectors);

        let mut holes = Vec::new();
        for piece in pieces {
            let e = match piece {
                Piece::Mapped(e) => e,
                Piece::Hole(h) => {
                    holes.push(h);
                    continue;
                }
            };
            let hdr = self.headers.read().get(&e.loc.obj).copied().ok_or_else(|| {
                LsvdError::Invariant(format!(
                    "map entry [{}, {}) points at unknown object {}",
                    e.lba,
                    e.end(),
                    e.loc.obj
                ))
            })?;
            let name = object_name(&self.prefix, e.loc.obj);
            let start = (e.lba - lba) as usize * SECTOR_SIZE;
            let len = e.len as usize * SECTOR_SIZE;
            let offset = (hdr as u64 + e.loc.offset) * SECTOR_SIZE as u64;
            let data = self.store.read_object(&name, offset, len)?;
            if data.len() != len {
                return Err(LsvdError::Truncated {
                    table: "object data",
                    offset: offset as usize,
                    len,
                    available: offset as usize + data.len(),
                });
            }
            buf[start..start + len].copy_from_slice(&data);
        }
        Ok(holes)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn lookup(&self, lba: u64, sectors: u64) -> Vec<MapEntry<ObjectOffset>> {
        self.map.read().lookup(lba, sectors)
    }

    pub fn map_snapshot(&self) -> Vec<MapEntry<ObjectOffset>> {
        self.map.read().snapshot()
    }

    /// Live objects and their accounting
    pub fn objects(&self) -> BTreeMap<u64, ObjectInfo> {
        self.state.lock().objects.clone()
    }

    /// Objects waiting for deletion at the next checkpoint
    pub fn dead_objects(&self) -> Vec<u64> {
        self.state.lock().dead.iter().copied().collect()
    }

    pub fn live_sectors(&self) -> u64 {
        self.state.lock().live_sectors()
    }

    pub fn next_seq(&self) -> u64 {
        self.state.lock().next_seq
    }

    /// Snapshots listed by the superblock
    pub fn snapshots(&self) -> Vec<SnapInfo> {
        self.state.lock().snaps.clone()
    }

    pub fn last_checkpoint(&self) -> Option<u64> {
        self.state.lock().last_ckpt
    }

    /// DATA objects written since the last checkpoint
    pub fn data_since_checkpoint(&self) -> u32 {
        self.state.lock().data_since_ckpt
    }

    pub fn vol_size(&self) -> u64 {
        self.state.lock().vol_size
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

fn super_header(state: &BackendState) -> SuperHeader {
    SuperHeader {
        vol_size: state.vol_size,
        total_sectors: state.vol_size / SECTOR_SIZE as u64,
        live_sectors: state.live_sectors(),
        next_obj: state.next_seq,
        ..Default::default()
    }
}

/// Load checkpoint `seq` into `state` and `map`; returns its deferred deletes
fn load_checkpoint(
    store: &dyn ObjectStore,
    prefix: &str,
    seq: u64,
    state: &mut BackendState,
    map: &mut ExtentMap<ObjectOffset>,
) -> Result<Vec<DeferredDelete>> {
    let parsed = decode_object(&store.read_all(&object_name(prefix, seq))?)?;
    if parsed.header.seq != seq {
        return Err(LsvdError::Recovery(format!(
            "checkpoint object {} carries seq {}",
            seq, parsed.header.seq
        )));
    }
    let kind = parsed.kind();
    let ObjectBody::Checkpoint {
        objs,
        deletes,
        map: table,
        ..
    } = parsed.body
    else {
        return Err(LsvdError::Recovery(format!(
            "object {} is a {}, not a checkpoint",
            seq, kind
        )));
    };

    for o in objs.entries()? {
        state.objects.insert(
            o.seq,
            ObjectInfo {
                hdr_sectors: o.hdr_sectors,
                data_sectors: o.data_sectors,
                live_sectors: o.live_sectors,
            },
        );
        state.last_data_obj = state.last_data_obj.max(o.seq);
    }
    let entries = table
        .entries()?
        .iter()
        .map(|e| MapEntry::new(e.lba, e.len as u64, ObjectOffset::new(e.obj, e.offset as u64)))
        .collect();
    *map = ExtentMap::from_entries(entries)?;
    for e in map.iter() {
        if !state.objects.contains_key(&e.loc.obj) {
            return Err(LsvdError::Invariant(format!(
                "checkpoint {} maps [{}, {}) to object {} it does not list",
                seq,
                e.lba,
                e.end(),
                e.loc.obj
            )));
        }
    }
    state.next_seq = state.next_seq.max(seq + 1);
    deletes.into_entries()
}
