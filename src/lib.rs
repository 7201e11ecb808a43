//! # lstore
//!
//! An append-only record log for flash-like media with:
//! - Fixed-size pages as the unit of erase and program
//! - CRC-32 checksummed, sequence-numbered records
//! - Crash recovery by scanning the region on open
//! - Page reclamation gated by reader leases
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         LogStore                            │
//! │         append / reclaim (exclusive)  read / iterate        │
//! └──────────┬──────────────────┬───────────────────┬───────────┘
//!            │                  │                   │
//!            ▼                  ▼                   ▼
//!   ┌─────────────────┐ ┌───────────────┐ ┌───────────────────┐
//!   │   Page Table    │ │ Fast-Forward  │ │   Lease Table     │
//!   │ (state, cursor) │ │ Index (opt.)  │ │ (iters/consumers) │
//!   └────────┬────────┘ └───────────────┘ └───────────────────┘
//!            │
//!            ▼
//!   ┌─────────────────┐
//!   │  Flash Medium   │
//!   │ (memory / file) │
//!   └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod flash;
pub mod region;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{DeviceConfig, StoreConfig, Target};
pub use error::{AppendError, FlashError, InitError, ReadError, ReclaimError, Result, StoreError};
pub use flash::{FileFlash, Flash, MemFlash};
pub use region::{PageState, RecordId, RecoveryReport};
pub use store::{Consumer, LogIter, LogStore, StoreStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of lstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
