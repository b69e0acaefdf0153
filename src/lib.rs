//! # LSVD
//!
//! Persistence core of a log-structured virtual disk:
//! - Write journal on a fast local device, durable before a write returns
//! - Torn-write detection with CRC32 and sequence numbers
//! - Extent maps from virtual LBAs to journal sectors and object offsets
//! - Immutable backend objects (SUPER, DATA, CKPT) in an object store
//! - Checkpoints and crash recovery for both halves
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Volume                              │
//! │          write(offset, data) / read(offset, len)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐   flusher  ┌─────────────┐
//!   │   Journal   │ ─────────▶ │   Backend   │
//!   │ (ring, map) │            │ (objects,   │
//!   └──────┬──────┘            │  map)       │
//!          │                   └──────┬──────┘
//!          ▼                          ▼
//!   ┌─────────────┐            ┌─────────────┐
//!   │ BlockDevice │            │ ObjectStore │
//!   └─────────────┘            └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod extent;
pub mod device;
pub mod journal;
pub mod checkpoint;
pub mod backend;
pub mod volume;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LsvdError, Result};
pub use config::Config;
pub use volume::{Volume, VolumeRecovery};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of LSVD
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
