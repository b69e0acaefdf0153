//! Tests for the extent map
//!
//! These tests verify:
//! - Range overwrite splits and replaces older entries, newest wins
//! - Lookups are clipped and holes are explicit in `resolve`
//! - Location-contiguous neighbours coalesce
//! - Checkpointed entries reload with overlap detection

use lsvd::extent::{Extent, ExtentMap, MapEntry, ObjectOffset, Piece};
use lsvd::LsvdError;

// =============================================================================
// Helper Functions
// =============================================================================

fn entries(map: &ExtentMap<u64>) -> Vec<(u64, u64, u64)> {
    map.iter().map(|e| (e.lba, e.len, e.loc)).collect()
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_update_empty_map() {
    let mut map = ExtentMap::<u64>::new();
    let displaced = map.update(10, 5, 1000);

    assert!(displaced.is_empty());
    assert_eq!(entries(&map), vec![(10, 5, 1000)]);
    assert_eq!(map.mapped_sectors(), 5);
}

#[test]
fn test_update_zero_length_is_noop() {
    let mut map = ExtentMap::<u64>::new();
    map.update(10, 0, 1000);
    assert!(map.is_empty());
}

#[test]
fn test_overwrite_middle_splits() {
    let mut map = ExtentMap::<u64>::new();
    map.update(0, 100, 1000);
    let displaced = map.update(40, 10, 5000);

    assert_eq!(displaced, vec![MapEntry::new(40, 10, 1040)]);
    assert_eq!(
        entries(&map),
        vec![(0, 40, 1000), (40, 10, 5000), (50, 50, 1050)]
    );
    map.verify().unwrap();
}

#[test]
fn test_overwrite_spanning_several_entries() {
    let mut map = ExtentMap::<u64>::new();
    map.update(0, 10, 100);
    map.update(20, 10, 200);
    map.update(40, 10, 300);

    let displaced = map.update(5, 40, 900);

    assert_eq!(
        displaced,
        vec![
            MapEntry::new(5, 5, 105),
            MapEntry::new(20, 10, 200),
            MapEntry::new(40, 5, 300),
        ]
    );
    assert_eq!(
        entries(&map),
        vec![(0, 5, 100), (5, 40, 900), (45, 5, 305)]
    );
}

#[test]
fn test_exact_overwrite_replaces() {
    let mut map = ExtentMap::<u64>::new();
    map.update(8, 8, 100);
    let displaced = map.update(8, 8, 200);

    assert_eq!(displaced, vec![MapEntry::new(8, 8, 100)]);
    assert_eq!(entries(&map), vec![(8, 8, 200)]);
}

#[test]
fn test_adjacent_contiguous_entries_coalesce() {
    let mut map = ExtentMap::<u64>::new();
    map.update(0, 8, 100);
    map.update(8, 8, 108);
    assert_eq!(entries(&map), vec![(0, 16, 100)]);

    // filling a gap joins both sides
    map.update(24, 8, 124);
    map.update(16, 8, 116);
    assert_eq!(entries(&map), vec![(0, 32, 100)]);
}

#[test]
fn test_adjacent_discontiguous_entries_stay_apart() {
    let mut map = ExtentMap::<u64>::new();
    map.update(0, 8, 100);
    map.update(8, 8, 500);
    assert_eq!(map.len(), 2);
}

#[test]
fn test_object_offsets_coalesce_within_object_only() {
    let mut map = ExtentMap::<ObjectOffset>::new();
    map.update(0, 8, ObjectOffset::new(1, 0));
    map.update(8, 8, ObjectOffset::new(1, 8));
    map.update(16, 8, ObjectOffset::new(2, 16));

    let snap = map.snapshot();
    assert_eq!(snap.len(), 2);
    assert_eq!(snap[0], MapEntry::new(0, 16, ObjectOffset::new(1, 0)));
    assert_eq!(snap[1], MapEntry::new(16, 8, ObjectOffset::new(2, 16)));
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_lookup_clips_locations() {
    let mut map = ExtentMap::<u64>::new();
    map.update(0, 100, 1000);

    assert_eq!(map.lookup(30, 10), vec![MapEntry::new(30, 10, 1030)]);
    assert_eq!(map.get(99), Some(1099));
    assert_eq!(map.get(100), None);
}

#[test]
fn test_resolve_reports_holes() {
    let mut map = ExtentMap::<u64>::new();
    map.update(16, 1, 500);
    map.update(18, 1, 600);

    let pieces = map.resolve(16, 3);
    assert_eq!(
        pieces,
        vec![
            Piece::Mapped(MapEntry::new(16, 1, 500)),
            Piece::Hole(Extent::new(17, 1)),
            Piece::Mapped(MapEntry::new(18, 1, 600)),
        ]
    );

    let pieces = map.resolve(0, 32);
    assert_eq!(pieces.first(), Some(&Piece::Hole(Extent::new(0, 16))));
    assert_eq!(pieces.last(), Some(&Piece::Hole(Extent::new(19, 13))));
    assert_eq!(pieces.iter().map(|p| p.len()).sum::<u64>(), 32);
}

#[test]
fn test_lookup_empty_range() {
    let mut map = ExtentMap::<u64>::new();
    map.update(0, 8, 100);
    assert!(map.lookup(0, 0).is_empty());
    assert!(map.lookup(8, 8).is_empty());
}

#[test]
fn test_lookup_range_past_u64_max() {
    let mut map = ExtentMap::<u64>::new();
    map.update(10, 4, 100);

    assert_eq!(map.lookup(12, u64::MAX), vec![MapEntry::new(12, 2, 102)]);
    assert_eq!(
        map.resolve(u64::MAX - 4, 8),
        vec![Piece::Hole(Extent::new(u64::MAX - 4, 4))]
    );
}

// =============================================================================
// Removal Tests
// =============================================================================

#[test]
fn test_remove_punches_hole() {
    let mut map = ExtentMap::<u64>::new();
    map.update(0, 30, 100);
    let removed = map.remove(10, 10);

    assert_eq!(removed, vec![MapEntry::new(10, 10, 110)]);
    assert_eq!(entries(&map), vec![(0, 10, 100), (20, 10, 120)]);
}

#[test]
fn test_remove_if_only_matching_pieces() {
    let mut map = ExtentMap::<u64>::new();
    map.update(0, 8, 100);
    map.update(4, 2, 900);

    // drop whatever still points at [100, 108)
    let removed = map.remove_if(0, 8, |p| (100..108).contains(&p.loc));

    assert_eq!(removed, 6);
    assert_eq!(entries(&map), vec![(4, 2, 900)]);
}

// =============================================================================
// Reload Tests
// =============================================================================

#[test]
fn test_from_entries_sorts_and_coalesces() {
    let map = ExtentMap::from_entries(vec![
        MapEntry::new(8, 8, 108u64),
        MapEntry::new(0, 8, 100u64),
        MapEntry::new(32, 4, 7u64),
    ])
    .unwrap();

    assert_eq!(entries(&map), vec![(0, 16, 100), (32, 4, 7)]);
}

#[test]
fn test_from_entries_rejects_overlap() {
    let err = ExtentMap::from_entries(vec![
        MapEntry::new(0, 10, 100u64),
        MapEntry::new(5, 10, 200u64),
    ])
    .unwrap_err();

    match err {
        LsvdError::Invariant(msg) => {
            assert!(msg.contains("[0, 10)"));
            assert!(msg.contains("[5, 15)"));
        }
        other => panic!("expected invariant violation, got {:?}", other),
    }
}

#[test]
fn test_many_random_overwrites_stay_disjoint() {
    let mut map = ExtentMap::<u64>::new();
    let mut shadow = vec![None; 512];
    let mut x = 0x9e37_79b9u64;

    for i in 0..2000u64 {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        let lba = x % 500;
        let len = 1 + (x >> 20) % 12;
        let len = len.min(512 - lba);
        let loc = 10_000 + i * 16;
        map.update(lba, len, loc);
        for s in 0..len {
            shadow[(lba + s) as usize] = Some(loc + s);
        }
    }

    map.verify().unwrap();
    for (lba, expected) in shadow.iter().enumerate() {
        assert_eq!(map.get(lba as u64), *expected, "lba {}", lba);
    }
}
