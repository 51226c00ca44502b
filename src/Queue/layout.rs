use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64};

/// Upper bound on queue capacity. Stamps are `2 * position`, so this keeps
/// them far away from wrapping.
pub const MAX_CAPACITY: usize = 1 << 24;

/// Cursors and signal words for one queue.
///
/// Kept apart from the slot array so the control plane (who may touch which
/// slot, who is waiting) is separate from the data plane.
pub struct QueueControl {
    /// Producer cursor. Atomically advanced to claim a slot for writing.
    /// Padded to prevent false sharing with the consumer cursor.
    pub tail: CachePadded<AtomicU64>,

    /// Consumer cursor. Atomically advanced to claim a ready slot.
    pub head: CachePadded<AtomicU64>,

    /// Bumped after every publish; consumers futex-wait on it.
    pub not_empty: AtomicU32,

    /// Bumped after every slot release; producers futex-wait on it.
    pub not_full: AtomicU32,

    /// Sticky close mark. Checked ahead of any pending entry.
    pub closed: AtomicBool,
}

impl QueueControl {
    pub fn new() -> Self {
        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            not_empty: AtomicU32::new(0),
            not_full: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for QueueControl {
    fn default() -> Self {
        Self::new()
    }
}
