//! Checkpoint and Recovery Module
//!
//! Bounds restart time for both halves of the volume.
//!
//! ## Responsibilities
//! - Persist the journal map into the reserved checkpoint slots
//! - Rebuild the journal map on restart: load the newest valid slot, then
//!   replay only the records written after it
//! - Stop replay at the first record that fails validation
//!
//! Backend checkpoints are CKPT objects; they are written and loaded by
//! [`crate::backend::Backend`].
//!
//! ## Slot Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────────┐
//! │ len (4)  │ crc (4)  │ bincode(MapCheckpoint) [len]    │
//! └──────────┴──────────┴─────────────────────────────────┘
//!   slot A = [map_start, +map_blocks)
//!   slot B = [map_start + map_blocks, +map_blocks)
//!   generation g is written to slot g % 2
//! ```

mod map_region;
mod recovery;

pub use map_region::{slot_blocks_for, MapCheckpoint, MapRegion, SLOT_HEADER_SIZE};
pub use recovery::{JournalRecovery, RecoveryResult};
pub(crate) use recovery::RecoveredJournal;
