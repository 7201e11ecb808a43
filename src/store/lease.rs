//! Reader leases
//!
//! Every iterator and every registered consumer holds a lease: a sequence
//! position below which it has finished reading. Reclamation only erases
//! pages whose records all sit below the lowest lease position.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::region::RecordId;

/// Registry of live leases
///
/// ## Concurrency:
/// - `positions`: Mutex-protected map, lease id → position
/// - `next_id`: Atomic counter (lock-free)
#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
    positions: Mutex<HashMap<u64, u64>>,
    next_id: AtomicU64,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lease starting at `position`
    pub fn register(self: &Arc<Self>, position: u64) -> Lease {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.positions.lock().insert(id, position);
        Lease {
            id,
            table: Arc::clone(self),
        }
    }

    /// Lowest position across all leases, `None` when nobody is registered
    pub fn min_position(&self) -> Option<u64> {
        self.positions.lock().values().copied().min()
    }

    /// Number of live leases
    pub fn len(&self) -> usize {
        self.positions.lock().len()
    }
}

/// A registration in the lease table; deregisters on drop
#[derive(Debug)]
pub(crate) struct Lease {
    id: u64,
    table: Arc<LeaseTable>,
}

impl Lease {
    /// Current position
    pub fn position(&self) -> u64 {
        self.table
            .positions
            .lock()
            .get(&self.id)
            .copied()
            .unwrap_or(u64::MAX)
    }

    /// Move forward to `position`; never moves backward
    pub fn advance_to(&self, position: u64) {
        if let Some(slot) = self.table.positions.lock().get_mut(&self.id) {
            *slot = (*slot).max(position);
        }
    }

    /// Move to `position` in either direction.
    ///
    /// Callers must hold the store's read lock so reclamation cannot run
    /// between choosing `position` and publishing it.
    pub fn reset_to(&self, position: u64) {
        if let Some(slot) = self.table.positions.lock().get_mut(&self.id) {
            *slot = position;
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.table.positions.lock().remove(&self.id);
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// An application-held "all read up to here" marker.
///
/// While a consumer is registered, reclamation keeps every record it has not
/// yet consumed. Dropping the consumer releases its hold.
#[derive(Debug)]
pub struct Consumer {
    lease: Lease,
}

impl Consumer {
    pub(crate) fn new(lease: Lease) -> Self {
        Self { lease }
    }

    /// Mark `id` and everything before it as consumed
    pub fn consume(&self, id: RecordId) {
        self.lease.advance_to(id.seq().saturating_add(1));
    }

    /// Sequence number of the first record not yet consumed
    pub fn position(&self) -> u64 {
        self.lease.position()
    }
}
