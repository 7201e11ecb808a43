//! Tests for the record format and region geometry
//!
//! These tests verify:
//! - Header encode/decode and checksum verification
//! - Erased slot detection
//! - Alignment of stored records
//! - Geometry validation and page state transitions

use lstore::region::{
    align_up, encode_record, Geometry, PageState, RecordHeader, RecordId, RecordKind, Slot,
    HEADER_SIZE,
};
use lstore::InitError;

// =============================================================================
// Record Header Tests
// =============================================================================

#[test]
fn test_header_decode_matches_encode() {
    let header = RecordHeader::data(42, b"payload");
    let decoded = RecordHeader::decode(&header.encode()).unwrap();

    assert_eq!(decoded, Slot::Header(header));
    assert_eq!(header.len, 7);
    assert_eq!(header.kind, RecordKind::Data);
    assert_eq!(header.seq, 42);
}

#[test]
fn test_header_layout() {
    let header = RecordHeader::data(0x0102030405060708, b"abc");
    let raw = header.encode();

    assert_eq!(&raw[0..2], &[3, 0]);
    assert_eq!(&raw[2..4], &[0x5A, 0xA5]);
    assert_eq!(&raw[4..8], &header.crc.to_le_bytes());
    assert_eq!(&raw[8..16], &[8, 7, 6, 5, 4, 3, 2, 1]);
}

#[test]
fn test_verify_detects_damage() {
    let header = RecordHeader::data(1, b"abcd");
    assert!(header.verify(b"abcd"));
    assert!(!header.verify(b"abce"));
    assert!(!header.verify(b"abc"));

    let mut raw = header.encode();
    raw[8] ^= 0x01;
    match RecordHeader::decode(&raw).unwrap() {
        Slot::Header(damaged) => assert!(!damaged.verify(b"abcd")),
        Slot::Free => panic!("expected a header"),
    }
}

#[test]
fn test_decode_erased_slot() {
    let raw = [0xFFu8; HEADER_SIZE];
    assert_eq!(RecordHeader::decode(&raw).unwrap(), Slot::Free);
}

#[test]
fn test_decode_unknown_kind() {
    let mut raw = RecordHeader::data(0, b"x").encode();
    raw[2] = 0x00;
    raw[3] = 0x00;
    assert!(RecordHeader::decode(&raw).is_err());
}

#[test]
fn test_padding_header() {
    let header = RecordHeader::padding(44);
    assert_eq!(header.kind, RecordKind::Padding);
    assert_eq!(header.seq, 0);
    assert_eq!(header.stored_len(), HEADER_SIZE + 44);
    assert_eq!(
        RecordHeader::decode(&header.encode()).unwrap(),
        Slot::Header(header)
    );
}

#[test]
fn test_mark_header() {
    let header = RecordHeader::mark(9);
    assert_eq!(header.kind, RecordKind::Mark);
    assert_eq!(header.len, 0);
    assert_eq!(header.seq, 9);
    assert_eq!(header.stored_len(), HEADER_SIZE);

    let raw = header.encode();
    assert_eq!(&raw[2..4], &[0xA5, 0xA5]);
    assert_eq!(RecordHeader::decode(&raw).unwrap(), Slot::Header(header));
    assert_ne!(RecordHeader::mark(10), header);
}

#[test]
fn test_encode_record_alignment() {
    assert_eq!(align_up(0), 0);
    assert_eq!(align_up(1), 4);
    assert_eq!(align_up(4), 4);
    assert_eq!(align_up(5), 8);

    let bytes = encode_record(3, b"hello");
    assert_eq!(bytes.len(), HEADER_SIZE + 8);
    assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 5], b"hello");
    assert_eq!(&bytes[HEADER_SIZE + 5..], &[0xFF, 0xFF, 0xFF]);

    assert_eq!(encode_record(0, b"").len(), HEADER_SIZE);
}

#[test]
fn test_record_id_display() {
    assert_eq!(RecordId(17).to_string(), "#17");
    assert_eq!(RecordId(17).seq(), 17);
    assert!(RecordId(3) < RecordId(4));
}

// =============================================================================
// Geometry Tests
// =============================================================================

#[test]
fn test_geometry_layout() {
    let geometry = Geometry::new(2048, 4 * 1024 * 1024, 4 * 1024 * 1024).unwrap();

    assert_eq!(geometry.page_size(), 2048);
    assert_eq!(geometry.page_count(), 2048);
    assert_eq!(geometry.total_size(), 4 * 1024 * 1024);
    assert_eq!(geometry.max_payload(), 2048 - HEADER_SIZE);
    assert_eq!(geometry.address(3, 100), 3 * 2048 + 100);
}

#[test]
fn test_geometry_smaller_than_medium() {
    let geometry = Geometry::new(64, 128, 1024).unwrap();
    assert_eq!(geometry.page_count(), 2);
}

#[test]
fn test_geometry_rejections() {
    assert!(matches!(Geometry::new(62, 124, 124), Err(InitError::BadGeometry(_))));
    assert!(matches!(Geometry::new(64, 96, 128), Err(InitError::BadGeometry(_))));
    assert!(matches!(Geometry::new(12, 48, 48), Err(InitError::BadGeometry(_))));
    assert!(matches!(Geometry::new(64, 128, 64), Err(InitError::BadGeometry(_))));
}

// =============================================================================
// Page State Tests
// =============================================================================

#[test]
fn test_page_state_transitions() {
    use PageState::*;

    assert!(Erased.can_become(PartiallyWritten));
    assert!(Erased.can_become(Full));
    assert!(PartiallyWritten.can_become(PartiallyWritten));
    assert!(PartiallyWritten.can_become(Full));
    assert!(Full.can_become(Erased));

    assert!(!Erased.can_become(Erased));
    assert!(!PartiallyWritten.can_become(Erased));
    assert!(!Full.can_become(PartiallyWritten));
    assert!(!Full.can_become(Full));
}
