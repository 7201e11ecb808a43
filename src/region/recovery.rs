//! Region Recovery
//!
//! Rebuilds the in-memory view of a region by scanning every page.
//!
//! ## What the scan decides
//! - State, fill level and sequence range of each page
//! - The write cursor (end of the page holding the newest record)
//! - The next sequence number
//! - The fast-forward index, when enabled
//!
//! Checksum failures are tolerated and reported; structural damage (unknown
//! record kinds, lengths running off the page, out-of-order sequence numbers)
//! fails the scan. A damaged record's sequence number is only believed when
//! an intact neighbour vouches for it. Nothing is written to the medium here.

use crate::config::StoreConfig;
use crate::error::InitError;
use crate::flash::{first_programmed, Flash};

use super::index::FastForwardIndex;
use super::page::{dump_slot, read_entry, Geometry, PageEntry, PageInfo, PageState, RecordLoc, SlotError};
use super::record::{RecordHeader, RecordKind};

/// Position of the next append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub page: usize,
    /// Equal to the page size when the page accepts nothing more
    pub offset: usize,
}

/// Result of scanning a region at open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Pages found erased
    pub pages_erased: usize,

    /// Pages found partially written
    pub pages_partial: usize,

    /// Pages found full (including pages closed by the scan)
    pub pages_full: usize,

    /// Records whose checksum verified
    pub records_recovered: u64,

    /// Records that failed checksum verification
    pub records_corrupt: u64,

    /// Pages whose free space held programmed bytes (torn writes)
    pub torn_pages: usize,

    /// Sequence number the next append will get
    pub next_seq: u64,

    /// Where the next append goes
    pub cursor_page: usize,
    pub cursor_offset: usize,
}

/// Everything the store needs to resume
pub(crate) struct Recovered {
    pub pages: Vec<PageInfo>,
    pub index: Option<FastForwardIndex>,
    pub cursor: Cursor,
    pub next_seq: u64,
    /// Page whose sequence mark is the only record of `next_seq`
    pub mark: Option<usize>,
    pub report: RecoveryReport,
}

/// How a page walk ended
enum PageEnd {
    /// Ran out of room for another header
    Exhausted,
    /// Hit an erased slot; `clean` is false if the free space is dirty
    Free { clean: bool },
    /// Hit a padding record
    Sealed,
}

/// A record or mark as first seen by the walk
struct Seen {
    offset: usize,
    header: RecordHeader,
    intact: bool,
}

impl Seen {
    fn is_mark(&self) -> bool {
        self.header.kind == RecordKind::Mark
    }
}

/// One scanned page
struct ScannedPage {
    info: PageInfo,
    /// Highest intact sequence mark in the page
    mark: Option<u64>,
}

impl ScannedPage {
    /// Sequence number the page says comes next, if it says anything
    fn next_seq(&self) -> Option<u64> {
        let after_last = self.info.last_seq.and_then(|last| last.checked_add(1));
        after_last.max(self.mark)
    }
}

/// Scan the whole region
pub(crate) fn scan<F: Flash>(
    flash: &F,
    geometry: &Geometry,
    config: &StoreConfig,
) -> Result<Recovered, InitError> {
    let page_size = geometry.page_size();
    let mut report = RecoveryReport::default();
    let mut index = config.fast_forward.then(FastForwardIndex::new);
    let mut scanned: Vec<ScannedPage> = Vec::with_capacity(geometry.page_count());

    for page in 0..geometry.page_count() {
        let carried = scanned.last().and_then(ScannedPage::next_seq);
        let result = scan_page(flash, geometry, page, carried, config.verbose, &mut index, &mut report)?;
        scanned.push(result);
    }

    // The page implying the highest next sequence number is the head
    let mut head: Option<(u64, usize)> = None;
    for (page, result) in scanned.iter().enumerate() {
        if result.info.last_seq == Some(u64::MAX) {
            let reason = "sequence numbers exhausted".to_string();
            return Err(corrupt(flash, geometry, page, 0, reason, config.verbose));
        }
        if let Some(next) = result.next_seq() {
            if head.map_or(true, |(best, _)| next > best) {
                head = Some((next, page));
            }
        }
    }

    let mut pages: Vec<PageInfo> = scanned.into_iter().map(|result| result.info).collect();

    let (cursor, next_seq, mark) = match head {
        Some((next, page)) => {
            let offset = match pages[page].state {
                PageState::Full => page_size,
                _ => pages[page].used,
            };
            let mark = pages[page].last_seq.is_none().then_some(page);
            (Cursor { page, offset }, next, mark)
        }
        None => {
            let cursor = match pages.iter().position(|info| info.state == PageState::Erased) {
                Some(page) => Cursor { page, offset: 0 },
                None => Cursor {
                    page: geometry.page_count() - 1,
                    offset: page_size,
                },
            };
            (cursor, 0, None)
        }
    };

    // Only the head page may stay open; anything else partial is left over
    // from an interrupted page switch
    for (page, info) in pages.iter_mut().enumerate() {
        if info.state == PageState::PartiallyWritten && page != cursor.page {
            tracing::warn!(page, used = info.used, "Closing partially written page behind the head");
            info.seal(page_size);
        }
    }

    for info in &pages {
        match info.state {
            PageState::Erased => report.pages_erased += 1,
            PageState::PartiallyWritten => report.pages_partial += 1,
            PageState::Full => report.pages_full += 1,
        }
    }
    report.next_seq = next_seq;
    report.cursor_page = cursor.page;
    report.cursor_offset = cursor.offset;

    tracing::info!(
        pages = geometry.page_count(),
        erased = report.pages_erased,
        partial = report.pages_partial,
        full = report.pages_full,
        recovered = report.records_recovered,
        corrupt = report.records_corrupt,
        torn = report.torn_pages,
        next_seq,
        "Log region recovered"
    );

    Ok(Recovered {
        pages,
        index,
        cursor,
        next_seq,
        mark,
        report,
    })
}

/// Walk one page from offset 0 and summarize it.
///
/// `carried` is the sequence number the previous page says comes next.
fn scan_page<F: Flash>(
    flash: &F,
    geometry: &Geometry,
    page: usize,
    carried: Option<u64>,
    verbose: bool,
    index: &mut Option<FastForwardIndex>,
    report: &mut RecoveryReport,
) -> Result<ScannedPage, InitError> {
    let page_size = geometry.page_size();
    let mut seen: Vec<Seen> = Vec::new();
    let mut offset = 0;

    // Pass 1: walk the headers
    let end = loop {
        let entry = match read_entry(flash, geometry, page, offset) {
            Ok(entry) => entry,
            Err(SlotError::Flash(e)) => {
                tracing::error!(page, offset, "Flash read failed during recovery: {}", e);
                return Err(InitError::Flash(e));
            }
            Err(SlotError::Malformed(reason)) => {
                return Err(corrupt(flash, geometry, page, offset, reason, verbose));
            }
        };

        match entry {
            PageEntry::End => break PageEnd::Exhausted,
            PageEntry::Free => {
                let mut rest = vec![0u8; page_size - offset];
                if let Err(e) = flash.read(geometry.address(page, offset), &mut rest) {
                    tracing::error!(page, offset, "Flash read of free space failed during recovery: {}", e);
                    return Err(InitError::Flash(e));
                }
                break PageEnd::Free {
                    clean: first_programmed(&rest).is_none(),
                };
            }
            PageEntry::Padding { header } => {
                if offset + header.stored_len() != page_size {
                    let reason = format!(
                        "padding of {} bytes does not reach the page end",
                        header.len
                    );
                    return Err(corrupt(flash, geometry, page, offset, reason, verbose));
                }
                if header != RecordHeader::padding(header.len) {
                    tracing::warn!(page, offset, "Padding header checksum mismatch; treating page as sealed");
                }
                break PageEnd::Sealed;
            }
            PageEntry::Mark { header } => {
                seen.push(Seen {
                    offset,
                    header,
                    intact: header == RecordHeader::mark(header.seq),
                });
                offset += header.stored_len();
            }
            PageEntry::Record { header, payload } => {
                seen.push(Seen {
                    offset,
                    header,
                    intact: header.verify(&payload),
                });
                offset += header.stored_len();
            }
        }
    };

    // Pass 2: account for records. A damaged record keeps its claimed
    // sequence only if an intact neighbour pins it down.
    let mut info = PageInfo::erased();
    let mut mark: Option<u64> = None;
    let mut prev_intact: Option<u64> = None;
    let mut expected = carried;

    for (i, rec) in seen.iter().enumerate() {
        let seq = rec.header.seq;

        if rec.is_mark() {
            info.push_record(None, rec.header.stored_len(), page_size);
            if rec.intact {
                mark = mark.max(Some(seq));
                expected = Some(seq);
            } else {
                tracing::warn!(page, offset = rec.offset, "Damaged sequence mark ignored");
            }
            continue;
        }

        let trusted = if rec.intact {
            if let Some(prev) = prev_intact {
                if seq <= prev {
                    let reason = format!("sequence {} does not follow {}", seq, prev);
                    return Err(corrupt(flash, geometry, page, rec.offset, reason, verbose));
                }
            }
            prev_intact = Some(seq);
            report.records_recovered += 1;
            true
        } else {
            report.records_corrupt += 1;
            let plausible = damaged_seq_pinned(&seen, i, expected)
                && info.last_seq.map_or(true, |last| seq > last);
            tracing::warn!(
                page,
                offset = rec.offset,
                seq,
                plausible,
                "Checksum mismatch in record during recovery"
            );
            plausible
        };

        if trusted {
            info.push_record(Some(seq), rec.header.stored_len(), page_size);
            expected = seq.checked_add(1);
            if let Some(index) = index.as_mut() {
                index.insert(RecordLoc {
                    page,
                    offset: rec.offset,
                    seq,
                });
            }
        } else {
            info.push_record(None, rec.header.stored_len(), page_size);
        }
    }

    match end {
        PageEnd::Exhausted => {}
        PageEnd::Sealed => info.seal(page_size),
        PageEnd::Free { clean: true } => {}
        PageEnd::Free { clean: false } => {
            tracing::warn!(page, used = info.used, "Programmed bytes in free space (torn write); closing page");
            report.torn_pages += 1;
            info.seal(page_size);
        }
    }

    Ok(ScannedPage { info, mark })
}

/// Whether the claimed sequence of the damaged record `seen[i]` can be
/// trusted: it is exactly the one expected next, it sits directly before an
/// intact record one higher, or it lies between the expected sequence and the
/// next intact record.
fn damaged_seq_pinned(seen: &[Seen], i: usize, expected: Option<u64>) -> bool {
    let seq = seen[i].header.seq;
    let is_intact_record = |rec: &&Seen| rec.intact && !rec.is_mark();

    if expected == Some(seq) {
        return true;
    }

    let next = seen.get(i + 1).filter(is_intact_record);
    if next.map_or(false, |rec| seq.checked_add(1) == Some(rec.header.seq)) {
        return true;
    }

    let next_intact = seen[i + 1..].iter().find(is_intact_record).map(|rec| rec.header.seq);
    match (expected, next_intact) {
        (Some(low), Some(high)) => low <= seq && seq < high,
        _ => false,
    }
}

/// Log and build a `CorruptRegion` error
fn corrupt<F: Flash>(
    flash: &F,
    geometry: &Geometry,
    page: usize,
    offset: usize,
    reason: String,
    verbose: bool,
) -> InitError {
    if verbose {
        tracing::error!(
            page,
            offset,
            header = %dump_slot(flash, geometry, page, offset),
            "Corrupt region: {}",
            reason
        );
    } else {
        tracing::error!(page, offset, "Corrupt region: {}", reason);
    }

    InitError::CorruptRegion {
        page,
        offset,
        reason,
    }
}
