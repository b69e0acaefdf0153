//! Backend Object Module
//!
//! Large immutable objects in the backend store.
//!
//! ## Responsibilities
//! - Assemble DATA objects from flushed journal records and CKPT objects
//!   from map snapshots
//! - Decode any object back through one entry point, [`decode_object`]
//! - Keep the backend map, per-object live accounting and deferred deletes
//! - Recover from SUPER → newest CKPT → later DATA objects
//!
//! ## Object Names
//! ```text
//! <prefix>              SUPER (volume superblock, rewritten in place)
//! <prefix>.00000001     DATA or CKPT, sequence number in hex
//! <prefix>.00000002     ...
//! ```

mod builder;
mod reader;
mod store;
mod translate;

pub use builder::{build_super, CheckpointBuilder, DataObjectBuilder, SealedObject};
pub use reader::{decode_object, ObjectBody, ParsedObject};
pub use store::{object_name, parse_object_seq, FileStore, MemoryStore, ObjectStore};
pub use translate::{Backend, BackendRecovery, ObjectInfo};
