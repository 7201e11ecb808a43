//! Log Store Module
//!
//! The append-only record store that coordinates the medium, the page table
//! and reader leases.
//!
//! ## Responsibilities
//! - Recover the write cursor on open
//! - Append records, sealing pages and moving to the next erased page
//! - Serve reads by id and ordered iteration
//! - Reclaim fully consumed pages

mod iter;
mod lease;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::StoreConfig;
use crate::error::{AppendError, FlashError, InitError, ReadError, ReclaimError};
use crate::flash::Flash;
use crate::region::{
    self, align_up, encode_record, read_entry, Cursor, FastForwardIndex, Geometry, PageEntry,
    PageInfo, PageState, RecordHeader, RecordId, RecordLoc, Recovered, RecoveryReport, SlotError,
    HEADER_SIZE,
};

pub use iter::LogIter;
pub use lease::Consumer;

use lease::LeaseTable;

/// Append-only log over a page-structured flash region
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (append/reclaim): hold the write side of `inner`
///   - Only ONE write operation at a time
///   - Cursor, page table and fast-forward index change only here
///
/// - **Reads** (read/iterator steps): hold the read side of `inner`
///   - Any number run concurrently
///   - Iterators keep a lease between steps instead of a lock
///
/// - **Leases**: separate table, consulted by reclaim under the write side
pub struct LogStore<F: Flash> {
    /// Store configuration
    config: StoreConfig,

    /// Validated page layout
    geometry: Geometry,

    /// Medium and all mutable bookkeeping (the exclusive-access gate)
    inner: RwLock<Inner<F>>,

    /// Iterator and consumer positions that block reclamation
    leases: Arc<LeaseTable>,

    /// What the open-time scan found
    report: RecoveryReport,
}

/// State guarded by the store lock
struct Inner<F> {
    flash: F,
    pages: Vec<PageInfo>,
    cursor: Cursor,
    next_seq: u64,
    index: Option<FastForwardIndex>,
    /// Page holding the sequence mark of an emptied region
    mark: Option<usize>,
}

impl<F> Inner<F> {
    /// Oldest sequence number still stored (`next_seq` when empty)
    fn low_water(&self) -> u64 {
        self.pages
            .iter()
            .filter_map(|info| info.first_seq)
            .min()
            .unwrap_or(self.next_seq)
    }

    /// Page whose sequence range contains `seq`
    fn page_holding(&self, seq: u64) -> Option<usize> {
        self.pages.iter().position(|info| info.covers(seq))
    }

    /// Oldest page holding any record at or after `seq`
    fn page_from(&self, seq: u64) -> Option<usize> {
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, info)| info.last_seq.map_or(false, |last| last >= seq))
            .min_by_key(|(_, info)| info.first_seq)
            .map(|(page, _)| page)
    }

    /// Next erased page after `page`, wrapping around (and ending at `page`)
    fn erased_after(&self, page: usize) -> Option<usize> {
        let count = self.pages.len();
        (1..=count)
            .map(|step| (page + step) % count)
            .find(|&p| self.pages[p].state == PageState::Erased)
    }
}

/// Point-in-time summary of a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub page_size: usize,
    pub page_count: usize,
    pub erased_pages: usize,
    pub partial_pages: usize,
    pub full_pages: usize,
    /// Records currently stored
    pub records: usize,
    /// Bytes consumed by records and padding
    pub bytes_used: u64,
    /// Sequence number of the next append
    pub next_seq: u64,
    /// Oldest sequence number still stored
    pub oldest_seq: u64,
    pub cursor: Cursor,
    /// Registered iterators and consumers
    pub active_leases: usize,
    /// Fast-forward index size, `None` when disabled
    pub indexed_records: Option<usize>,
}

impl<F: Flash> LogStore<F> {
    /// Open a store over `flash`
    ///
    /// On open:
    /// 1. Refuse if the configuration disables the store
    /// 2. Validate the geometry against the medium
    /// 3. Scan every page to rebuild the cursor and page table
    /// 4. Build the fast-forward index if enabled
    pub fn open(flash: F, config: StoreConfig) -> Result<Self, InitError> {
        if !config.enabled {
            tracing::warn!("Log store disabled by configuration");
            return Err(InitError::Disabled);
        }

        let geometry = Geometry::new(config.page_size, config.file_size, flash.capacity())?;

        let Recovered {
            pages,
            index,
            cursor,
            next_seq,
            mark,
            report,
        } = region::scan(&flash, &geometry, &config)?;

        Ok(Self {
            config,
            geometry,
            inner: RwLock::new(Inner {
                flash,
                pages,
                cursor,
                next_seq,
                index,
                mark,
            }),
            leases: Arc::new(LeaseTable::new()),
            report,
        })
    }

    /// Erase the whole region described by `config`.
    ///
    /// This is the operator's answer to `InitError::CorruptRegion`; `open`
    /// never does it on its own.
    pub fn format(flash: &mut F, config: &StoreConfig) -> Result<(), InitError> {
        let geometry = Geometry::new(config.page_size, config.file_size, flash.capacity())?;

        for page in 0..geometry.page_count() {
            if let Err(e) = flash.erase(geometry.address(page, 0), geometry.page_size() as u64) {
                tracing::error!(page, "Erase failed while formatting: {}", e);
                return Err(e.into());
            }
        }
        if let Err(e) = flash.sync() {
            tracing::error!("Sync failed while formatting: {}", e);
            return Err(e.into());
        }

        tracing::info!(
            pages = geometry.page_count(),
            page_size = geometry.page_size(),
            "Formatted log region"
        );
        Ok(())
    }

    /// Append a record
    ///
    /// Steps:
    /// 1. Reject payloads that cannot fit in a page
    /// 2. Seal the current page and switch pages if the record does not fit
    /// 3. Reclaim one page if no erased page is left (when allowed)
    /// 4. Program header + payload in one write, then sync
    pub fn append(&self, payload: impl AsRef<[u8]>) -> Result<RecordId, AppendError> {
        let payload = payload.as_ref();
        let max = self.geometry.max_payload();
        if payload.len() > max {
            tracing::warn!(len = payload.len(), max, "Append rejected: payload too large");
            return Err(AppendError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }

        let mut inner = self.inner.write();
        let page_size = self.geometry.page_size();
        let needed = HEADER_SIZE + align_up(payload.len());

        if page_size - inner.cursor.offset < needed {
            self.seal_cursor_page(&mut inner)?;
            let page = match inner.erased_after(inner.cursor.page) {
                Some(page) => page,
                None => self.make_room(&mut inner)?,
            };
            inner.cursor = Cursor { page, offset: 0 };
        }

        let Cursor { page, offset } = inner.cursor;
        let seq = inner.next_seq;
        let next_seq = match seq.checked_add(1) {
            Some(next) => next,
            None => {
                tracing::warn!(seq, "Store full: sequence numbers exhausted");
                return Err(AppendError::StoreFull);
            }
        };
        let bytes = encode_record(seq, payload);

        if let Err(e) = inner.flash.program(self.geometry.address(page, offset), &bytes) {
            tracing::error!(page, offset, seq, "Append failed: {}", e);
            // The slot may be half programmed; never write into this page again
            inner.pages[page].seal(page_size);
            inner.cursor.offset = page_size;
            return Err(e.into());
        }

        inner.pages[page].push_record(Some(seq), bytes.len(), page_size);
        if let Some(index) = inner.index.as_mut() {
            index.insert(RecordLoc { page, offset, seq });
        }
        inner.cursor.offset = offset + bytes.len();
        inner.next_seq = next_seq;
        inner.mark = None;

        if self.config.sync_on_append {
            if let Err(e) = inner.flash.sync() {
                tracing::error!(seq, "Sync after append failed: {}", e);
                return Err(e.into());
            }
        }

        tracing::trace!(seq, page, offset, len = payload.len(), "Appended record");
        Ok(RecordId(seq))
    }

    /// Read a record by id
    ///
    /// Returns:
    /// - `Ok(bytes)`: the payload, checksum verified
    /// - `Err(NotFound)`: id never assigned, or not present
    /// - `Err(Superseded)`: id was reclaimed
    /// - `Err(ChecksumMismatch)`: stored bytes are damaged
    pub fn read(&self, id: RecordId) -> Result<Bytes, ReadError> {
        let inner = self.inner.read();
        let seq = id.seq();

        if seq >= inner.next_seq {
            tracing::warn!(%id, next_seq = inner.next_seq, "Read of unassigned record id");
            return Err(ReadError::NotFound(id));
        }
        if seq < inner.low_water() {
            tracing::warn!(%id, "Read of reclaimed record");
            return Err(ReadError::Superseded(id));
        }

        let loc = match self.locate(&inner, seq)? {
            Some(loc) => loc,
            None => {
                tracing::warn!(%id, "Record not found");
                return Err(ReadError::NotFound(id));
            }
        };

        match read_entry(&inner.flash, &self.geometry, loc.page, loc.offset) {
            Ok(PageEntry::Record { header, payload }) if header.seq == seq => {
                if header.verify(&payload) {
                    Ok(Bytes::from(payload))
                } else {
                    tracing::warn!(%id, page = loc.page, offset = loc.offset, "Checksum mismatch");
                    Err(ReadError::ChecksumMismatch(id))
                }
            }
            Ok(_) | Err(SlotError::Malformed(_)) => {
                tracing::warn!(%id, page = loc.page, offset = loc.offset, "Record header damaged");
                Err(ReadError::ChecksumMismatch(id))
            }
            Err(SlotError::Flash(e)) => {
                tracing::error!(%id, "Flash read failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Iterate over every stored record in sequence order
    ///
    /// The iterator holds a lease: pages it has not finished are never
    /// reclaimed while it is alive.
    pub fn iterate(&self) -> LogIter<'_, F> {
        let inner = self.inner.read();
        let start = inner.low_water();
        LogIter::new(self, self.leases.register(start), start)
    }

    /// Iterate starting at `id`
    ///
    /// If `id` has already been reclaimed the first item is
    /// `Err(Superseded)` and iteration continues with the oldest record.
    pub fn iterate_from(&self, id: RecordId) -> LogIter<'_, F> {
        let _inner = self.inner.read();
        LogIter::new(self, self.leases.register(id.seq()), id.seq())
    }

    /// Register an "all read up to here" marker starting at the oldest record
    pub fn register_consumer(&self) -> Consumer {
        let inner = self.inner.read();
        Consumer::new(self.leases.register(inner.low_water()))
    }

    /// Erase every full page that all leases have moved past
    ///
    /// With no leases registered every full page qualifies. When nothing is
    /// left afterwards a sequence mark is written so that ids keep counting
    /// up from `next_seq` after a reopen.
    pub fn reclaim(&self) -> Result<usize, ReclaimError> {
        let mut inner = self.inner.write();

        let freed = self.reclaim_locked(&mut inner, usize::MAX, true)?;

        if freed == 0 {
            tracing::info!("Nothing to reclaim");
            return Err(ReclaimError::NothingToReclaim);
        }

        let emptied = inner.pages.iter().all(|info| info.last_seq.is_none());
        if emptied && inner.mark.is_none() && inner.next_seq > 0 {
            self.write_mark(&mut inner)?;
        }

        tracing::info!(freed, "Reclaimed pages");
        Ok(freed)
    }

    /// Flush the medium
    pub fn sync(&self) -> Result<(), FlashError> {
        self.inner.write().flash.sync().map_err(|e| {
            tracing::error!("Sync failed: {}", e);
            e
        })
    }

    /// Close the store and hand back the medium
    pub fn into_flash(self) -> F {
        self.inner.into_inner().flash
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the region geometry
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// What the open-time scan found
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.report
    }

    /// Position of the next append
    pub fn cursor(&self) -> Cursor {
        self.inner.read().cursor
    }

    /// State of every page, in page order
    pub fn page_states(&self) -> Vec<PageState> {
        self.inner.read().pages.iter().map(|info| info.state).collect()
    }

    /// Summary counters
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        let count = |state: PageState| inner.pages.iter().filter(|info| info.state == state).count();

        StoreStats {
            page_size: self.geometry.page_size(),
            page_count: self.geometry.page_count(),
            erased_pages: count(PageState::Erased),
            partial_pages: count(PageState::PartiallyWritten),
            full_pages: count(PageState::Full),
            records: inner.pages.iter().map(|info| info.records).sum(),
            bytes_used: inner.pages.iter().map(|info| info.used as u64).sum(),
            next_seq: inner.next_seq,
            oldest_seq: inner.low_water(),
            cursor: inner.cursor,
            active_leases: self.leases.len(),
            indexed_records: inner.index.as_ref().map(|index| index.len()),
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Close the cursor page with a padding record if it is still open
    fn seal_cursor_page(&self, inner: &mut Inner<F>) -> Result<(), AppendError> {
        let page_size = self.geometry.page_size();
        let Cursor { page, offset } = inner.cursor;

        if inner.pages[page].state != PageState::PartiallyWritten {
            return Ok(());
        }

        // A partially written page always has room for a header
        let padding = RecordHeader::padding((page_size - offset - HEADER_SIZE) as u16);
        let result = inner
            .flash
            .program(self.geometry.address(page, offset), &padding.encode());

        inner.pages[page].seal(page_size);
        inner.cursor.offset = page_size;

        if let Err(e) = result {
            tracing::error!(page, offset, "Writing page padding failed: {}", e);
            return Err(e.into());
        }

        tracing::debug!(page, padding = page_size - offset, "Sealed page");
        Ok(())
    }

    /// Free one page for an append that found no erased page
    fn make_room(&self, inner: &mut Inner<F>) -> Result<usize, AppendError> {
        if !self.config.reclaim_on_full {
            tracing::warn!("Store full and reclamation on append is disabled");
            return Err(AppendError::StoreFull);
        }

        self.reclaim_locked(inner, 1, false)?;

        match inner.erased_after(inner.cursor.page) {
            Some(page) => Ok(page),
            None => {
                tracing::warn!("Store full: no page can be reclaimed");
                Err(AppendError::StoreFull)
            }
        }
    }

    /// Erase up to `limit` eligible pages, oldest first.
    ///
    /// With `spare_mark` the page holding the sequence mark is left alone.
    fn reclaim_locked(
        &self,
        inner: &mut Inner<F>,
        limit: usize,
        spare_mark: bool,
    ) -> Result<usize, FlashError> {
        let horizon = self.leases.min_position().unwrap_or(u64::MAX);
        let page_size = self.geometry.page_size();
        let spared = if spare_mark { inner.mark } else { None };

        let mut victims: Vec<usize> = inner
            .pages
            .iter()
            .enumerate()
            .filter(|(page, info)| {
                info.state == PageState::Full
                    && info.consumed_before(horizon)
                    && Some(*page) != spared
            })
            .map(|(page, _)| page)
            .collect();
        victims.sort_by_key(|&page| inner.pages[page].first_seq);
        victims.truncate(limit);

        for &page in &victims {
            if let Err(e) = inner.flash.erase(self.geometry.address(page, 0), page_size as u64) {
                tracing::error!(page, "Erase failed during reclaim: {}", e);
                return Err(e);
            }

            let info = &inner.pages[page];
            if let (Some(index), Some(first), Some(last)) =
                (inner.index.as_mut(), info.first_seq, info.last_seq)
            {
                index.remove_page(page, first, last);
            }
            inner.pages[page].erase();
            if inner.mark == Some(page) {
                inner.mark = None;
            }

            tracing::debug!(page, "Reclaimed page");
        }

        if !victims.is_empty() {
            if let Err(e) = inner.flash.sync() {
                tracing::error!("Sync after reclaim failed: {}", e);
                return Err(e);
            }
        }

        Ok(victims.len())
    }

    /// Record `next_seq` at the cursor of an emptied region, or at the start
    /// of the next erased page when the cursor page is closed
    fn write_mark(&self, inner: &mut Inner<F>) -> Result<(), FlashError> {
        let page_size = self.geometry.page_size();
        let seq = inner.next_seq;
        let open = inner.pages[inner.cursor.page].state == PageState::PartiallyWritten;
        let Cursor { page, offset } = if open {
            inner.cursor
        } else {
            match inner.erased_after(inner.cursor.page) {
                Some(page) => Cursor { page, offset: 0 },
                None => {
                    tracing::warn!(seq, "No erased page for the sequence mark");
                    return Ok(());
                }
            }
        };

        let header = RecordHeader::mark(seq);
        if let Err(e) = inner.flash.program(self.geometry.address(page, offset), &header.encode()) {
            tracing::error!(page, seq, "Writing sequence mark failed: {}", e);
            inner.pages[page].seal(page_size);
            inner.cursor = Cursor {
                page,
                offset: page_size,
            };
            return Err(e);
        }

        inner.pages[page].push_record(None, HEADER_SIZE, page_size);
        inner.cursor = Cursor {
            page,
            offset: offset + HEADER_SIZE,
        };
        inner.mark = Some(page);

        if let Err(e) = inner.flash.sync() {
            tracing::error!(page, seq, "Sync after sequence mark failed: {}", e);
            return Err(e);
        }

        tracing::debug!(page, seq, "Wrote sequence mark");
        Ok(())
    }

    /// Find a record's location via the index, or by scanning its page
    fn locate(&self, inner: &Inner<F>, seq: u64) -> Result<Option<RecordLoc>, ReadError> {
        if let Some(index) = &inner.index {
            return Ok(index.get(seq));
        }

        let page = match inner.page_holding(seq) {
            Some(page) => page,
            None => return Ok(None),
        };

        let mut offset = 0;
        while offset < inner.pages[page].used {
            match read_entry(&inner.flash, &self.geometry, page, offset) {
                Ok(PageEntry::Record { header, .. }) => {
                    if header.seq == seq {
                        return Ok(Some(RecordLoc { page, offset, seq }));
                    }
                    offset += header.stored_len();
                }
                Ok(PageEntry::Mark { header }) => offset += header.stored_len(),
                Ok(_) => break,
                Err(SlotError::Malformed(reason)) => {
                    tracing::warn!(page, offset, "Malformed slot while scanning page: {}", reason);
                    break;
                }
                Err(SlotError::Flash(e)) => return Err(e.into()),
            }
        }

        Ok(None)
    }
}
