//! Tests for journal structure encoding
//!
//! These tests verify:
//! - Superblock and record header layouts and sizes
//! - Kind, magic and volume identity checks
//! - Record header block parsing and its extent table bounds

use lsvd::codec::{
    self, JournalExtent, JournalRecordHeader, JournalSuperblock, Record, WriteCacheSuper,
    FORMAT_VERSION, J_DATA, J_SUPER, J_WRITE_SUPER, LSVD_MAGIC, MAX_RECORD_EXTENTS,
};
use lsvd::journal::parse_header_block;
use lsvd::LsvdError;
use uuid::Uuid;

// =============================================================================
// Helper Functions
// =============================================================================

fn write_super(uuid: Uuid) -> WriteCacheSuper {
    WriteCacheSuper {
        magic: LSVD_MAGIC,
        kind: J_WRITE_SUPER,
        version: FORMAT_VERSION,
        vol_uuid: uuid,
        base: 7,
        limit: 100,
        next: 20,
        oldest: 7,
        flushed: 12,
        seq: 42,
        map_start: 3,
        map_blocks: 2,
        ckpt_generation: 5,
    }
}

/// A 4096-byte header block for `extents`, payload length computed from them
fn header_block(uuid: Uuid, seq: u64, extents: &[JournalExtent]) -> Vec<u8> {
    let sectors: u64 = extents.iter().map(|e| e.len as u64).sum();
    let payload_blocks = (sectors * 512 + 4095) / 4096;
    let header = JournalRecordHeader::new(uuid, seq, payload_blocks as u32 + 1, 0, extents.len());
    let mut block = codec::encode(&header);
    codec::encode_table(extents, &mut block);
    block.resize(4096, 0);
    block
}

// =============================================================================
// Superblock Tests
// =============================================================================

#[test]
fn test_superblock_layout() {
    let uuid = Uuid::new_v4();
    let sb = JournalSuperblock::new(uuid, 1024, 1, 2);
    let bytes = codec::encode(&sb);

    assert_eq!(bytes.len(), JournalSuperblock::SIZE);
    assert_eq!(&bytes[0..4], &LSVD_MAGIC.to_le_bytes());
    assert_eq!(&bytes[4..8], &J_SUPER.to_le_bytes());
    assert_eq!(&bytes[12..28], uuid.as_bytes());
    assert_eq!(&bytes[28..32], &1024u32.to_le_bytes());

    let back: JournalSuperblock = codec::decode(&bytes).unwrap();
    assert_eq!(back, sb);
    back.validate().unwrap();
}

#[test]
fn test_superblock_wrong_kind() {
    let mut sb = JournalSuperblock::new(Uuid::new_v4(), 1024, 1, 2);
    sb.kind = J_DATA;
    let err = sb.validate().unwrap_err();
    assert!(matches!(
        err,
        LsvdError::InvalidRecordKind {
            expected: 1,
            found: 16
        }
    ));
}

#[test]
fn test_zeroed_block_has_bad_magic() {
    let block = vec![0u8; 4096];
    let sb: JournalSuperblock = codec::decode(&block).unwrap();
    assert!(matches!(sb.validate(), Err(LsvdError::BadMagic { found: 0, .. })));
}

#[test]
fn test_write_super_validates_uuid_and_cursors() {
    let uuid = Uuid::new_v4();
    let ws = write_super(uuid);
    assert_eq!(codec::encode(&ws).len(), WriteCacheSuper::SIZE);
    ws.validate(&uuid).unwrap();

    assert!(matches!(ws.validate(&Uuid::new_v4()), Err(LsvdError::Recovery(_))));

    let mut bad = ws;
    bad.next = 100;
    assert!(matches!(bad.validate(&uuid), Err(LsvdError::Recovery(_))));

    let mut bad = ws;
    bad.oldest = 3;
    assert!(matches!(bad.validate(&uuid), Err(LsvdError::Recovery(_))));
}

// =============================================================================
// Record Header Tests
// =============================================================================

#[test]
fn test_record_header_layout() {
    let uuid = Uuid::new_v4();
    let header = JournalRecordHeader::new(uuid, 77, 3, 0xabcd, 2);
    assert_eq!(header.extent_offset, 52);
    assert_eq!(header.extent_len, 24);

    let bytes = codec::encode(&header);
    assert_eq!(bytes.len(), 52);
    assert_eq!(&bytes[28..36], &77u64.to_le_bytes());

    let back: JournalRecordHeader = codec::decode(&bytes).unwrap();
    assert_eq!(back, header);
    back.validate().unwrap();
}

#[test]
fn test_max_record_extents_fill_block() {
    assert_eq!(MAX_RECORD_EXTENTS, 337);
    let header = JournalRecordHeader::new(Uuid::new_v4(), 1, 2, 0, MAX_RECORD_EXTENTS);
    header.validate().unwrap();

    let header = JournalRecordHeader::new(Uuid::new_v4(), 1, 2, 0, MAX_RECORD_EXTENTS + 1);
    assert!(matches!(header.validate(), Err(LsvdError::Truncated { .. })));
}

#[test]
fn test_record_header_misaligned_extents() {
    let mut header = JournalRecordHeader::new(Uuid::new_v4(), 1, 2, 0, 1);
    header.extent_len = 13;
    assert!(matches!(
        header.validate(),
        Err(LsvdError::MalformedTable { len: 13, .. })
    ));
}

#[test]
fn test_parse_header_block() {
    let uuid = Uuid::new_v4();
    let extents = [
        JournalExtent { lba: 0, len: 16 },
        JournalExtent { lba: 64, len: 1 },
    ];
    let block = header_block(uuid, 9, &extents);

    let (header, parsed, extent_bytes) = parse_header_block(&block, &uuid).unwrap();
    assert_eq!(header.seq, 9);
    // 17 sectors = 3 payload blocks
    assert_eq!(header.len, 4);
    assert_eq!(parsed, extents.to_vec());
    assert_eq!(extent_bytes, block[52..76].to_vec());
}

#[test]
fn test_parse_header_block_other_volume() {
    let block = header_block(Uuid::new_v4(), 1, &[JournalExtent { lba: 0, len: 8 }]);
    let err = parse_header_block(&block, &Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, LsvdError::Recovery(_)));
}

#[test]
fn test_parse_header_block_length_mismatch() {
    let uuid = Uuid::new_v4();
    let mut block = header_block(uuid, 1, &[JournalExtent { lba: 0, len: 8 }]);
    // claim 5 blocks for one block of payload
    block[36..40].copy_from_slice(&5u32.to_le_bytes());
    assert!(matches!(
        parse_header_block(&block, &uuid),
        Err(LsvdError::Recovery(_))
    ));
}

#[test]
fn test_parse_header_block_no_extents() {
    let uuid = Uuid::new_v4();
    let header = JournalRecordHeader::new(uuid, 1, 1, 0, 0);
    let mut block = codec::encode(&header);
    block.resize(4096, 0);
    assert!(matches!(
        parse_header_block(&block, &uuid),
        Err(LsvdError::Recovery(_))
    ));
}
