//! Log Iterator
//!
//! Sequential iteration over stored records in sequence order.

use bytes::Bytes;

use crate::error::ReadError;
use crate::flash::Flash;
use crate::region::{read_entry, PageEntry, RecordId, SlotError};

use super::lease::Lease;
use super::{Inner, LogStore};

/// Where the iterator is inside a page
#[derive(Debug, Clone, Copy)]
struct PagePos {
    page: usize,
    offset: usize,
    /// Page generation when we entered it; a change means it was erased
    generation: u64,
}

/// Lazy iterator over `(RecordId, payload)` pairs.
///
/// ## Policy
/// - A damaged record yields `Err(ChecksumMismatch)`; iteration continues
/// - Records reclaimed before the iterator reached them yield one
///   `Err(Superseded)`; iteration continues with the oldest stored record
/// - Ends at the current end of the log; records appended later are
///   picked up by calling `next` again
pub struct LogIter<'a, F: Flash> {
    store: &'a LogStore<F>,
    /// Keeps unread pages from being reclaimed
    lease: Lease,
    /// Lowest sequence number not yet yielded
    next_seq: u64,
    pos: Option<PagePos>,
}

impl<'a, F: Flash> LogIter<'a, F> {
    pub(super) fn new(store: &'a LogStore<F>, lease: Lease, start: u64) -> Self {
        Self {
            store,
            lease,
            next_seq: start,
            pos: None,
        }
    }

    /// Restart from the oldest stored record
    pub fn rewind(&mut self) {
        let store = self.store;
        let inner = store.inner.read();
        let start = inner.low_water();
        self.lease.reset_to(start);
        self.next_seq = start;
        self.pos = None;
    }

    /// Id the iterator will look for next
    pub fn position(&self) -> RecordId {
        RecordId(self.next_seq)
    }

    /// Done with `page`: skip past everything it holds
    fn leave_page(&mut self, inner: &Inner<F>, page: usize) {
        if let Some(last) = inner.pages[page].last_seq {
            self.next_seq = self.next_seq.max(last.saturating_add(1));
            self.lease.advance_to(self.next_seq);
        }
        self.pos = None;
    }
}

impl<'a, F: Flash> Iterator for LogIter<'a, F> {
    type Item = Result<(RecordId, Bytes), ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let store = self.store;
        let inner = store.inner.read();
        let geometry = &store.geometry;

        // Anything below the low-water mark was erased before we got to it
        let low = inner.low_water();
        if self.next_seq < low {
            let missed = RecordId(self.next_seq);
            self.next_seq = low;
            self.lease.advance_to(low);
            self.pos = None;
            tracing::warn!(%missed, oldest = low, "Iterator position was reclaimed");
            return Some(Err(ReadError::Superseded(missed)));
        }

        loop {
            let pos = match self.pos {
                Some(pos) if inner.pages[pos.page].generation == pos.generation => pos,
                _ => {
                    let page = inner.page_from(self.next_seq)?;
                    let offset = inner
                        .index
                        .as_ref()
                        .and_then(|index| index.first_from(self.next_seq))
                        .filter(|loc| loc.page == page)
                        .map_or(0, |loc| loc.offset);
                    PagePos {
                        page,
                        offset,
                        generation: inner.pages[page].generation,
                    }
                }
            };

            if pos.offset >= inner.pages[pos.page].used {
                self.leave_page(&inner, pos.page);
                continue;
            }

            match read_entry(&inner.flash, geometry, pos.page, pos.offset) {
                Ok(PageEntry::Record { header, payload }) => {
                    self.pos = Some(PagePos {
                        offset: pos.offset + header.stored_len(),
                        ..pos
                    });

                    if header.seq < self.next_seq {
                        continue;
                    }

                    let id = RecordId(header.seq);
                    if !header.verify(&payload) {
                        tracing::warn!(%id, page = pos.page, offset = pos.offset, "Checksum mismatch during iteration");
                        return Some(Err(ReadError::ChecksumMismatch(id)));
                    }

                    self.next_seq = header.seq.saturating_add(1);
                    self.lease.advance_to(self.next_seq);
                    return Some(Ok((id, Bytes::from(payload))));
                }
                Ok(PageEntry::Mark { header }) => {
                    self.pos = Some(PagePos {
                        offset: pos.offset + header.stored_len(),
                        ..pos
                    });
                }
                Ok(_) => self.leave_page(&inner, pos.page),
                Err(SlotError::Malformed(reason)) => {
                    tracing::warn!(page = pos.page, offset = pos.offset, "Skipping rest of page: {}", reason);
                    self.leave_page(&inner, pos.page);
                }
                Err(SlotError::Flash(e)) => {
                    tracing::error!(page = pos.page, offset = pos.offset, "Flash read failed during iteration: {}", e);
                    self.leave_page(&inner, pos.page);
                    return Some(Err(e.into()));
                }
            }
        }
    }
}
