//! Region Module
//!
//! On-flash layout of a log region and the open-time recovery scan.
//!
//! ## Region Layout
//! ```text
//! ┌──────────────┬──────────────┬─────┬──────────────┐
//! │    Page 0    │    Page 1    │ ... │   Page N-1   │   N = file_size / page_size
//! └──────────────┴──────────────┴─────┴──────────────┘
//! ```
//!
//! ## Page Layout
//! ```text
//! ┌──────────┬──────────┬─────┬───────────┬─────────────┐
//! │ Record 0 │ Record 1 │ ... │ (Padding) │ Free (0xFF) │
//! └──────────┴──────────┴─────┴───────────┴─────────────┘
//!
//! Record:
//! ┌─────────┬──────────┬─────────┬─────────┬──────────────────┐
//! │ Len (2) │ Kind (2) │ CRC (4) │ Seq (8) │ Payload (padded) │
//! └─────────┴──────────┴─────────┴─────────┴──────────────────┘
//! ```
//! - All integers little-endian, records 4-byte aligned
//! - Kind `0xA55A` = data, `0x5AA5` = padding (seals the rest of the page),
//!   `0xA5A5` = sequence mark (empty payload, `seq` is the next id to assign)
//! - CRC-32 covers Len, Kind, Seq and the payload
//! - A header slot of sixteen `0xFF` bytes marks the start of free space
//! - Records never cross a page boundary

mod index;
mod page;
mod record;
mod recovery;

pub(crate) use index::FastForwardIndex;
pub(crate) use page::{read_entry, PageEntry, PageInfo, SlotError};
pub(crate) use recovery::{scan, Recovered};

pub use page::{Geometry, PageState, RecordLoc};
pub use record::{
    align_up, encode_record, RecordHeader, RecordId, RecordKind, Slot, HEADER_SIZE, MAX_PAGE_SIZE,
    WRITE_ALIGN,
};
pub use recovery::{Cursor, RecoveryReport};
