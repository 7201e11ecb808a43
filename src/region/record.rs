//! Record definitions
//!
//! Defines the on-flash record header and how it is encoded, decoded and
//! checksummed.

use std::fmt;

use crate::flash::ERASED_BYTE;

/// Record header size: Len (2) + Kind (2) + CRC (4) + Seq (8) = 16 bytes
pub const HEADER_SIZE: usize = 16;

/// Records start on, and payloads are padded to, this boundary
pub const WRITE_ALIGN: usize = 4;

/// Largest page the 16-bit length field can describe
pub const MAX_PAGE_SIZE: usize = 32 * 1024;

/// Kind tag of a data record
const KIND_DATA: u16 = 0xA55A;

/// Kind tag of a padding record (seals the rest of a page)
const KIND_PADDING: u16 = 0x5AA5;

/// Kind tag of a sequence mark (carries the next id of an emptied region)
const KIND_MARK: u16 = 0xA5A5;

/// Round `len` up to the write alignment
pub fn align_up(len: usize) -> usize {
    (len + WRITE_ALIGN - 1) & !(WRITE_ALIGN - 1)
}

// =============================================================================
// Record Id
// =============================================================================

/// Identifier of an appended record: its sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Sequence number of the record
    pub fn seq(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Record Header
// =============================================================================

/// What a header slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// User payload
    Data,
    /// Filler; the page is full after it
    Padding,
    /// Payload-less record holding the next sequence number to assign
    Mark,
}

impl RecordKind {
    fn tag(self) -> u16 {
        match self {
            RecordKind::Data => KIND_DATA,
            RecordKind::Padding => KIND_PADDING,
            RecordKind::Mark => KIND_MARK,
        }
    }

    fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            KIND_DATA => Some(RecordKind::Data),
            KIND_PADDING => Some(RecordKind::Padding),
            KIND_MARK => Some(RecordKind::Mark),
            _ => None,
        }
    }
}

/// A decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Payload length in bytes (unaligned)
    pub len: u16,
    pub kind: RecordKind,
    /// CRC-32 over the other header fields and the payload
    pub crc: u32,
    /// Sequence number (0 for padding, the next id for a mark)
    pub seq: u64,
}

/// Contents of a header-sized slot in a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// All bytes erased: free space starts here
    Free,
    /// A programmed header
    Header(RecordHeader),
}

impl RecordHeader {
    /// Header for a data record carrying `payload`
    pub fn data(seq: u64, payload: &[u8]) -> Self {
        let len = payload.len() as u16;
        Self {
            len,
            kind: RecordKind::Data,
            crc: compute_crc(len, RecordKind::Data, seq, payload),
            seq,
        }
    }

    /// Header for a padding record covering `len` bytes after the header
    pub fn padding(len: u16) -> Self {
        Self {
            len,
            kind: RecordKind::Padding,
            crc: compute_crc(len, RecordKind::Padding, 0, &[]),
            seq: 0,
        }
    }

    /// Header for a sequence mark recording that `next_seq` is the next id
    pub fn mark(next_seq: u64) -> Self {
        Self {
            len: 0,
            kind: RecordKind::Mark,
            crc: compute_crc(0, RecordKind::Mark, next_seq, &[]),
            seq: next_seq,
        }
    }

    /// Serialize to the on-flash layout
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&self.len.to_le_bytes());
        out[2..4].copy_from_slice(&self.kind.tag().to_le_bytes());
        out[4..8].copy_from_slice(&self.crc.to_le_bytes());
        out[8..16].copy_from_slice(&self.seq.to_le_bytes());
        out
    }

    /// Decode a header slot.
    ///
    /// Fails on anything that is neither fully erased nor a known kind.
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Result<Slot, String> {
        if raw.iter().all(|&b| b == ERASED_BYTE) {
            return Ok(Slot::Free);
        }

        let len = u16::from_le_bytes([raw[0], raw[1]]);
        let tag = u16::from_le_bytes([raw[2], raw[3]]);
        let kind = RecordKind::from_tag(tag)
            .ok_or_else(|| format!("unknown record kind 0x{:04x}", tag))?;

        let mut crc = [0u8; 4];
        crc.copy_from_slice(&raw[4..8]);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&raw[8..16]);

        Ok(Slot::Header(RecordHeader {
            len,
            kind,
            crc: u32::from_le_bytes(crc),
            seq: u64::from_le_bytes(seq),
        }))
    }

    /// Check the stored CRC against `payload`
    pub fn verify(&self, payload: &[u8]) -> bool {
        payload.len() == self.len as usize
            && compute_crc(self.len, self.kind, self.seq, payload) == self.crc
    }

    /// Bytes the record occupies in its page (header + aligned payload)
    pub fn stored_len(&self) -> usize {
        HEADER_SIZE + align_up(self.len as usize)
    }
}

/// CRC-32 over len, kind, seq and payload (every header byte except the CRC)
fn compute_crc(len: u16, kind: RecordKind, seq: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&len.to_le_bytes());
    hasher.update(&kind.tag().to_le_bytes());
    hasher.update(&seq.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Full on-flash image of a data record: header, payload, erased fill
pub fn encode_record(seq: u64, payload: &[u8]) -> Vec<u8> {
    let header = RecordHeader::data(seq, payload);
    let mut bytes = Vec::with_capacity(header.stored_len());
    bytes.extend_from_slice(&header.encode());
    bytes.extend_from_slice(payload);
    bytes.resize(header.stored_len(), ERASED_BYTE);
    bytes
}
