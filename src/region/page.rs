//! Region geometry and page bookkeeping
//!
//! ## Page State Machine
//! ```text
//!   Erased ──append──▶ PartiallyWritten ──append / seal──▶ Full
//!     ▲   └────────── append fills page exactly ─────────▶  │
//!     └─────────────────────── reclaim ─────────────────────┘
//! ```

use crate::error::{FlashError, InitError};
use crate::flash::Flash;

use super::record::{RecordHeader, RecordKind, Slot, HEADER_SIZE, MAX_PAGE_SIZE, WRITE_ALIGN};

// =============================================================================
// Geometry
// =============================================================================

/// Validated page layout of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    page_size: usize,
    page_count: usize,
}

impl Geometry {
    /// Validate a region of `total_size` bytes split into `page_size` pages
    /// on a medium of `capacity` bytes
    pub fn new(page_size: usize, total_size: u64, capacity: u64) -> Result<Self, InitError> {
        let fail = |reason: String| -> Result<Self, InitError> {
            tracing::error!(page_size, total_size, capacity, "Bad geometry: {}", reason);
            Err(InitError::BadGeometry(reason))
        };

        if page_size < HEADER_SIZE + WRITE_ALIGN {
            return fail(format!(
                "page size {} is smaller than a minimal record ({} bytes)",
                page_size,
                HEADER_SIZE + WRITE_ALIGN
            ));
        }
        if page_size > MAX_PAGE_SIZE {
            return fail(format!(
                "page size {} exceeds the maximum of {}",
                page_size, MAX_PAGE_SIZE
            ));
        }
        if page_size % WRITE_ALIGN != 0 {
            return fail(format!(
                "page size {} is not a multiple of {}",
                page_size, WRITE_ALIGN
            ));
        }
        if total_size == 0 || total_size % page_size as u64 != 0 {
            return fail(format!(
                "region size {} is not a positive multiple of page size {}",
                total_size, page_size
            ));
        }
        if total_size > capacity {
            return fail(format!(
                "region size {} exceeds medium capacity {}",
                total_size, capacity
            ));
        }

        Ok(Self {
            page_size,
            page_count: (total_size / page_size as u64) as usize,
        })
    }

    /// Page / erase-unit size
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages in the region
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Region size in bytes
    pub fn total_size(&self) -> u64 {
        self.page_size as u64 * self.page_count as u64
    }

    /// Largest payload a single record can carry
    pub fn max_payload(&self) -> usize {
        self.page_size - HEADER_SIZE
    }

    /// Absolute medium address of `offset` within `page`
    pub fn address(&self, page: usize, offset: usize) -> u64 {
        page as u64 * self.page_size as u64 + offset as u64
    }
}

// =============================================================================
// Page State
// =============================================================================

/// Lifecycle state of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Every byte erased, ready for writes
    Erased,
    /// Holds records and still has room for more
    PartiallyWritten,
    /// Accepts no more records until erased
    Full,
}

impl PageState {
    /// Whether `self → next` is a legal transition
    pub fn can_become(self, next: PageState) -> bool {
        use PageState::*;
        matches!(
            (self, next),
            (Erased, PartiallyWritten)
                | (Erased, Full)
                | (PartiallyWritten, PartiallyWritten)
                | (PartiallyWritten, Full)
                | (Full, Erased)
        )
    }
}

/// Location of a record within the region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLoc {
    pub page: usize,
    /// Offset of the header within the page
    pub offset: usize,
    pub seq: u64,
}

/// In-memory summary of one page
#[derive(Debug, Clone)]
pub(crate) struct PageInfo {
    pub state: PageState,
    /// Bytes consumed from the start of the page (records + padding)
    pub used: usize,
    /// Sequence range of the records in the page
    pub first_seq: Option<u64>,
    pub last_seq: Option<u64>,
    pub records: usize,
    /// Bumped on every erase so readers can detect reclamation
    pub generation: u64,
}

impl PageInfo {
    pub fn erased() -> Self {
        Self {
            state: PageState::Erased,
            used: 0,
            first_seq: None,
            last_seq: None,
            records: 0,
            generation: 0,
        }
    }

    /// Account for `stored_len` bytes holding a record.
    ///
    /// `seq` is `None` for a damaged record whose sequence cannot be trusted;
    /// its bytes are consumed but it is not counted.
    pub fn push_record(&mut self, seq: Option<u64>, stored_len: usize, page_size: usize) {
        self.used += stored_len;
        if let Some(seq) = seq {
            self.first_seq.get_or_insert(seq);
            self.last_seq = Some(seq);
            self.records += 1;
        }

        let next = if page_size - self.used < HEADER_SIZE {
            PageState::Full
        } else {
            PageState::PartiallyWritten
        };
        self.transition(next);
    }

    /// Close the page to further appends
    pub fn seal(&mut self, page_size: usize) {
        self.used = page_size;
        if self.state != PageState::Full {
            self.transition(PageState::Full);
        }
    }

    /// Return the page to the erased pool
    pub fn erase(&mut self) {
        self.transition(PageState::Erased);
        self.used = 0;
        self.first_seq = None;
        self.last_seq = None;
        self.records = 0;
        self.generation += 1;
    }

    /// Whether every record in the page precedes `horizon`
    pub fn consumed_before(&self, horizon: u64) -> bool {
        self.last_seq.map_or(true, |last| last < horizon)
    }

    /// Whether the page holds a record with sequence `seq` in its range
    pub fn covers(&self, seq: u64) -> bool {
        match (self.first_seq, self.last_seq) {
            (Some(first), Some(last)) => first <= seq && seq <= last,
            _ => false,
        }
    }

    fn transition(&mut self, next: PageState) {
        debug_assert!(
            self.state.can_become(next),
            "illegal page transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

// =============================================================================
// Slot Reading
// =============================================================================

/// What a walk over a page finds at a given offset
#[derive(Debug, Clone)]
pub(crate) enum PageEntry {
    /// No room for another header
    End,
    /// Erased header slot: free space starts here
    Free,
    /// Padding record: nothing else in the page
    Padding { header: RecordHeader },
    /// Sequence mark: no payload, the walk continues after it
    Mark { header: RecordHeader },
    /// A data record with its payload
    Record {
        header: RecordHeader,
        payload: Vec<u8>,
    },
}

/// Why a slot could not be read
#[derive(Debug)]
pub(crate) enum SlotError {
    Flash(FlashError),
    Malformed(String),
}

impl From<FlashError> for SlotError {
    fn from(e: FlashError) -> Self {
        SlotError::Flash(e)
    }
}

/// Read the entry at `offset` in `page`
pub(crate) fn read_entry<F: Flash>(
    flash: &F,
    geometry: &Geometry,
    page: usize,
    offset: usize,
) -> Result<PageEntry, SlotError> {
    let page_size = geometry.page_size();
    if offset + HEADER_SIZE > page_size {
        return Ok(PageEntry::End);
    }

    let mut raw = [0u8; HEADER_SIZE];
    flash.read(geometry.address(page, offset), &mut raw)?;

    let header = match RecordHeader::decode(&raw).map_err(SlotError::Malformed)? {
        Slot::Free => return Ok(PageEntry::Free),
        Slot::Header(header) => header,
    };

    if offset + header.stored_len() > page_size {
        return Err(SlotError::Malformed(format!(
            "record length {} runs past the page end ({} bytes left)",
            header.len,
            page_size - offset - HEADER_SIZE
        )));
    }

    match header.kind {
        RecordKind::Padding => Ok(PageEntry::Padding { header }),
        RecordKind::Mark if header.len != 0 => Err(SlotError::Malformed(format!(
            "sequence mark with {} payload bytes",
            header.len
        ))),
        RecordKind::Mark => Ok(PageEntry::Mark { header }),
        RecordKind::Data => {
            let mut payload = vec![0u8; header.len as usize];
            flash.read(geometry.address(page, offset + HEADER_SIZE), &mut payload)?;
            Ok(PageEntry::Record { header, payload })
        }
    }
}

/// Hex rendering of a header slot for verbose diagnostics
pub(crate) fn dump_slot<F: Flash>(flash: &F, geometry: &Geometry, page: usize, offset: usize) -> String {
    let len = HEADER_SIZE.min(geometry.page_size().saturating_sub(offset));
    let mut raw = vec![0u8; len];
    match flash.read(geometry.address(page, offset), &mut raw) {
        Ok(()) => raw.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" "),
        Err(e) => format!("<unreadable: {}>", e),
    }
}
