//! Tests for open-time recovery
//!
//! These tests verify:
//! - Reopening a region recovers the same records, cursor and next id
//! - Checksum damage is tolerated and surfaced as ChecksumMismatch
//! - A damaged sequence field never moves the head or the next id
//! - Torn writes in the free tail close the page
//! - Structural damage fails open with CorruptRegion
//! - Hand-crafted images (wrapped logs, stray partial pages)

use lstore::region::{encode_record, Cursor, RecordHeader, HEADER_SIZE};
use lstore::{
    AppendError, InitError, LogStore, MemFlash, PageState, ReadError, ReclaimError, RecordId,
    StoreConfig,
};

const PAGE: usize = 64;
const PAGES: usize = 4;

// =============================================================================
// Helper Functions
// =============================================================================

fn config() -> StoreConfig {
    StoreConfig::builder()
        .page_size(PAGE)
        .file_size((PAGE * PAGES) as u64)
        .build()
}

/// Append `count` records ("rec0", "rec1", ...) and return the raw medium
fn written_flash(count: usize) -> MemFlash {
    let store = LogStore::open(MemFlash::new(PAGE * PAGES), config()).unwrap();
    for i in 0..count {
        store.append(format!("rec{}", i)).unwrap();
    }
    store.into_flash()
}

/// Place an encoded record directly into an image
fn put_record(image: &mut [u8], page: usize, offset: usize, seq: u64, payload: &[u8]) -> usize {
    let bytes = encode_record(seq, payload);
    let start = page * PAGE + offset;
    image[start..start + bytes.len()].copy_from_slice(&bytes);
    offset + bytes.len()
}

fn reopen(flash: MemFlash) -> Result<LogStore<MemFlash>, InitError> {
    LogStore::open(flash, config())
}

// =============================================================================
// Clean Reopen Tests
// =============================================================================

#[test]
fn test_reopen_recovers_records() {
    let store = reopen(written_flash(5)).unwrap();

    let report = store.recovery_report();
    assert_eq!(report.pages_full, 1);
    assert_eq!(report.pages_partial, 1);
    assert_eq!(report.pages_erased, 2);
    assert_eq!(report.records_recovered, 5);
    assert_eq!(report.records_corrupt, 0);
    assert_eq!(report.torn_pages, 0);
    assert_eq!(report.next_seq, 5);
    assert_eq!((report.cursor_page, report.cursor_offset), (1, 40));

    assert_eq!(store.cursor(), Cursor { page: 1, offset: 40 });
    for i in 0..5u64 {
        assert_eq!(&store.read(RecordId(i)).unwrap()[..], format!("rec{}", i).as_bytes());
    }

    assert_eq!(store.append("rec5").unwrap(), RecordId(5));
    assert_eq!(store.cursor(), Cursor { page: 1, offset: 60 });
}

#[test]
fn test_reopen_empty_region() {
    let store = reopen(MemFlash::new(PAGE * PAGES)).unwrap();

    assert_eq!(store.cursor(), Cursor { page: 0, offset: 0 });
    assert_eq!(store.recovery_report().pages_erased, PAGES);
    assert_eq!(store.recovery_report().next_seq, 0);
}

#[test]
fn test_reopen_with_padding() {
    let store = LogStore::open(MemFlash::new(PAGE * PAGES), config()).unwrap();
    store.append([0xAAu8; 20]).unwrap();
    store.append([0xBBu8; 20]).unwrap();
    let before = store.page_states();

    let store = reopen(store.into_flash()).unwrap();

    assert_eq!(store.page_states(), before);
    assert_eq!(store.cursor(), Cursor { page: 1, offset: 36 });
    assert_eq!(store.recovery_report().records_recovered, 2);
}

#[test]
fn test_reopen_full_region_without_erased_pages() {
    let store = reopen(written_flash(12)).unwrap();

    assert_eq!(store.page_states(), vec![PageState::Full; PAGES]);
    assert_eq!(store.cursor(), Cursor { page: 3, offset: PAGE });

    // Next append reclaims the oldest page and wraps around to it
    assert_eq!(store.append("rec12").unwrap(), RecordId(12));
    assert_eq!(store.cursor(), Cursor { page: 0, offset: 20 });
    assert!(matches!(store.read(RecordId(0)), Err(ReadError::Superseded(_))));
}

#[test]
fn test_sequence_continues_after_everything_reclaimed() {
    let store = reopen(written_flash(6)).unwrap();
    assert_eq!(store.reclaim().unwrap(), 2);
    assert_eq!(store.cursor(), Cursor { page: 2, offset: HEADER_SIZE });

    let store = reopen(store.into_flash()).unwrap();
    assert_eq!(store.recovery_report().next_seq, 6);
    assert_eq!(store.cursor(), Cursor { page: 2, offset: HEADER_SIZE });
    assert!(matches!(store.reclaim(), Err(ReclaimError::NothingToReclaim)));

    assert_eq!(store.append("rec6").unwrap(), RecordId(6));
    assert!(matches!(store.read(RecordId(5)), Err(ReadError::Superseded(_))));

    let store = reopen(store.into_flash()).unwrap();
    assert_eq!(store.recovery_report().next_seq, 7);
    assert_eq!(&store.read(RecordId(6)).unwrap()[..], b"rec6");
}

#[test]
fn test_format_clears_region() {
    let mut flash = written_flash(7);
    LogStore::format(&mut flash, &config()).unwrap();

    assert!(flash.as_bytes().iter().all(|&b| b == 0xFF));
    let store = reopen(flash).unwrap();
    assert_eq!(store.stats().records, 0);
}

// =============================================================================
// Checksum Damage Tests
// =============================================================================

#[test]
fn test_corrupt_payload_is_reported() {
    let mut flash = written_flash(3);
    // Payload of record 1 starts right after its header
    flash.bytes_mut()[20 + HEADER_SIZE] ^= 0xFF;

    let store = reopen(flash).unwrap();
    assert_eq!(store.recovery_report().records_recovered, 2);
    assert_eq!(store.recovery_report().records_corrupt, 1);

    assert!(matches!(
        store.read(RecordId(1)),
        Err(ReadError::ChecksumMismatch(RecordId(1)))
    ));
    assert_eq!(&store.read(RecordId(2)).unwrap()[..], b"rec2");
}

#[test]
fn test_iterate_continues_past_corrupt_record() {
    let mut flash = written_flash(3);
    flash.bytes_mut()[20 + HEADER_SIZE] ^= 0xFF;
    let store = reopen(flash).unwrap();

    let items: Vec<_> = store.iterate().collect();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap().0, RecordId(0));
    assert!(matches!(items[1], Err(ReadError::ChecksumMismatch(RecordId(1)))));
    assert_eq!(items[2].as_ref().unwrap().0, RecordId(2));
}

#[test]
fn test_corrupt_record_with_fast_forward() {
    let mut flash = written_flash(3);
    flash.bytes_mut()[20 + HEADER_SIZE] ^= 0xFF;

    let config = StoreConfig::builder()
        .page_size(PAGE)
        .file_size((PAGE * PAGES) as u64)
        .fast_forward(true)
        .build();
    let store = LogStore::open(flash, config).unwrap();

    assert!(matches!(
        store.read(RecordId(1)),
        Err(ReadError::ChecksumMismatch(RecordId(1)))
    ));
    assert_eq!(store.stats().indexed_records, Some(3));
}

// =============================================================================
// Damaged Sequence Number Tests
// =============================================================================

/// Offset of record 1's sequence field in a page of "recN" records
const REC1_SEQ: usize = 20 + 8;

#[test]
fn test_torn_sequence_field_on_last_record() {
    for start in [REC1_SEQ, REC1_SEQ + 1] {
        let mut flash = written_flash(2);
        // The sequence field never made it to the medium
        flash.bytes_mut()[start..REC1_SEQ + 8].fill(0xFF);

        let store = reopen(flash).unwrap();
        assert_eq!(store.recovery_report().records_corrupt, 1);
        assert_eq!(store.recovery_report().next_seq, 1);
        assert!(matches!(store.read(RecordId(1)), Err(ReadError::NotFound(_))));

        assert_eq!(store.append("rec1").unwrap(), RecordId(1));
        assert_eq!(store.cursor(), Cursor { page: 0, offset: 60 });
    }
}

#[test]
fn test_flipped_sequence_on_last_record() {
    let mut flash = written_flash(2);
    flash.bytes_mut()[REC1_SEQ] ^= 0x04;

    let store = reopen(flash).unwrap();
    assert_eq!(store.recovery_report().next_seq, 1);
    assert!(matches!(store.read(RecordId(1)), Err(ReadError::NotFound(_))));
    assert_eq!(store.append("again").unwrap(), RecordId(1));
    assert_eq!(&store.read(RecordId(1)).unwrap()[..], b"again");

    // The damaged record stays behind and must not upset the next open
    let store = reopen(store.into_flash()).unwrap();
    assert_eq!(store.recovery_report().next_seq, 2);
    assert_eq!(&store.read(RecordId(1)).unwrap()[..], b"again");
}

#[test]
fn test_flipped_sequence_on_middle_record() {
    let mut flash = written_flash(3);
    flash.bytes_mut()[REC1_SEQ] ^= 0x04;

    let store = reopen(flash).unwrap();
    assert_eq!(store.recovery_report().next_seq, 3);
    assert_eq!(store.recovery_report().records_recovered, 2);
    assert!(matches!(store.read(RecordId(1)), Err(ReadError::NotFound(_))));
    assert_eq!(&store.read(RecordId(2)).unwrap()[..], b"rec2");
    assert_eq!(store.append("rec3").unwrap(), RecordId(3));
}

#[test]
fn test_damaged_record_pinned_by_previous_page() {
    let mut flash = written_flash(4);
    // Record 3 opens page 1
    flash.bytes_mut()[PAGE + HEADER_SIZE] ^= 0xFF;

    let store = reopen(flash).unwrap();
    assert_eq!(store.recovery_report().next_seq, 4);
    assert!(matches!(
        store.read(RecordId(3)),
        Err(ReadError::ChecksumMismatch(RecordId(3)))
    ));
    assert_eq!(store.append("rec4").unwrap(), RecordId(4));
}

#[test]
fn test_damaged_record_pinned_by_successor() {
    let mut flash = written_flash(2);
    flash.bytes_mut()[HEADER_SIZE] ^= 0xFF;

    let store = reopen(flash).unwrap();
    assert!(matches!(
        store.read(RecordId(0)),
        Err(ReadError::ChecksumMismatch(RecordId(0)))
    ));
    assert_eq!(store.stats().oldest_seq, 0);
}

#[test]
fn test_damaged_record_between_intact_neighbours() {
    let mut image = vec![0xFFu8; PAGE * PAGES];
    let end = put_record(&mut image, 0, 0, 5, b"rec5");
    let damaged = end;
    let end = put_record(&mut image, 0, end, 7, b"rec7");
    put_record(&mut image, 0, end, 9, b"rec9");
    image[damaged + HEADER_SIZE] ^= 0xFF;

    let store = reopen(MemFlash::from_bytes(image)).unwrap();
    assert_eq!(store.recovery_report().next_seq, 10);
    assert!(matches!(
        store.read(RecordId(7)),
        Err(ReadError::ChecksumMismatch(RecordId(7)))
    ));
    assert!(matches!(store.read(RecordId(8)), Err(ReadError::NotFound(_))));
}

#[test]
fn test_last_sequence_number_fails_open() {
    let mut image = vec![0xFFu8; PAGE * PAGES];
    put_record(&mut image, 0, 0, u64::MAX, b"last");

    let result = reopen(MemFlash::from_bytes(image));
    assert!(matches!(result, Err(InitError::CorruptRegion { page: 0, .. })));
}

#[test]
fn test_exhausted_sequence_numbers_fill_store() {
    let mut image = vec![0xFFu8; PAGE * PAGES];
    put_record(&mut image, 0, 0, u64::MAX - 1, b"last");

    let store = reopen(MemFlash::from_bytes(image)).unwrap();
    assert_eq!(store.recovery_report().next_seq, u64::MAX);
    assert!(matches!(store.append("more"), Err(AppendError::StoreFull)));
    assert_eq!(&store.read(RecordId(u64::MAX - 1)).unwrap()[..], b"last");
}

// =============================================================================
// Torn Write Tests
// =============================================================================

#[test]
fn test_torn_tail_closes_page() {
    let mut flash = written_flash(1);
    // Residue past the next (still erased) header slot
    flash.bytes_mut()[44] = 0x00;

    let store = reopen(flash).unwrap();
    assert_eq!(store.recovery_report().torn_pages, 1);
    assert_eq!(store.page_states()[0], PageState::Full);
    assert_eq!(store.cursor(), Cursor { page: 0, offset: PAGE });

    assert_eq!(store.append("rec1").unwrap(), RecordId(1));
    assert_eq!(store.cursor(), Cursor { page: 1, offset: 20 });
    assert_eq!(&store.read(RecordId(0)).unwrap()[..], b"rec0");
}

#[test]
fn test_torn_record_payload() {
    let mut flash = written_flash(2);
    // The second record's payload never made it to the medium
    let start = 20 + HEADER_SIZE;
    flash.bytes_mut()[start..start + 4].fill(0xFF);

    let store = reopen(flash).unwrap();
    assert_eq!(store.recovery_report().records_corrupt, 1);
    assert_eq!(store.recovery_report().next_seq, 2);
    assert!(matches!(store.read(RecordId(1)), Err(ReadError::ChecksumMismatch(_))));
}

// =============================================================================
// Structural Damage Tests
// =============================================================================

#[test]
fn test_unknown_kind_fails_open() {
    let mut flash = written_flash(2);
    flash.bytes_mut()[20 + 2..20 + 4].copy_from_slice(&[0x00, 0x00]);

    let result = reopen(flash);
    assert!(matches!(
        result,
        Err(InitError::CorruptRegion { page: 0, offset: 20, .. })
    ));
}

#[test]
fn test_length_past_page_end_fails_open() {
    let mut flash = written_flash(1);
    flash.bytes_mut()[0..2].copy_from_slice(&200u16.to_le_bytes());

    let result = reopen(flash);
    assert!(matches!(
        result,
        Err(InitError::CorruptRegion { page: 0, offset: 0, .. })
    ));
}

#[test]
fn test_short_padding_fails_open() {
    let mut image = vec![0xFFu8; PAGE * PAGES];
    let end = put_record(&mut image, 0, 0, 0, b"rec0");
    let padding = RecordHeader::padding(8).encode();
    image[end..end + HEADER_SIZE].copy_from_slice(&padding);

    let result = reopen(MemFlash::from_bytes(image));
    assert!(matches!(
        result,
        Err(InitError::CorruptRegion { page: 0, offset: 20, .. })
    ));
}

#[test]
fn test_out_of_order_sequence_fails_open() {
    let mut image = vec![0xFFu8; PAGE * PAGES];
    let end = put_record(&mut image, 2, 0, 5, b"late");
    put_record(&mut image, 2, end, 3, b"back");

    let result = reopen(MemFlash::from_bytes(image));
    assert!(matches!(
        result,
        Err(InitError::CorruptRegion { page: 2, offset: 20, .. })
    ));
}

#[test]
fn test_verbose_diagnostics_same_outcome() {
    let mut flash = written_flash(1);
    flash.bytes_mut()[2..4].copy_from_slice(&[0x12, 0x34]);

    let config = StoreConfig::builder()
        .page_size(PAGE)
        .file_size((PAGE * PAGES) as u64)
        .verbose(true)
        .build();
    let result = LogStore::open(flash, config);
    assert!(matches!(result, Err(InitError::CorruptRegion { page: 0, .. })));
}

#[test]
fn test_format_recovers_corrupt_region() {
    let mut flash = written_flash(2);
    flash.bytes_mut()[2..4].copy_from_slice(&[0x00, 0x00]);
    assert!(reopen(flash.clone()).is_err());

    LogStore::format(&mut flash, &config()).unwrap();
    let store = reopen(flash).unwrap();
    assert_eq!(store.append("fresh").unwrap(), RecordId(0));
}

// =============================================================================
// Crafted Image Tests
// =============================================================================

#[test]
fn test_wrapped_log_iterates_by_sequence() {
    let mut image = vec![0xFFu8; PAGE * PAGES];
    put_record(&mut image, 1, 0, 7, b"rec7");
    put_record(&mut image, 0, 0, 8, b"rec8");

    let store = reopen(MemFlash::from_bytes(image)).unwrap();

    // Head is the page with the newest record; the older open page is closed
    assert_eq!(store.cursor(), Cursor { page: 0, offset: 20 });
    assert_eq!(store.page_states()[1], PageState::Full);
    assert_eq!(store.recovery_report().next_seq, 9);

    let ids: Vec<u64> = store.iterate().map(|item| item.unwrap().0.seq()).collect();
    assert_eq!(ids, vec![7, 8]);
    assert!(matches!(store.read(RecordId(6)), Err(ReadError::Superseded(_))));

    assert_eq!(store.append("rec9").unwrap(), RecordId(9));
    assert_eq!(store.cursor(), Cursor { page: 0, offset: 40 });
}
