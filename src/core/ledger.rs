//! Frame index ledger: the single count of frames appended this session.
//!
//! Written by the capture callback thread, read by the UI context.
//! The mutex is held only for the increment or the read, never across I/O.

use std::sync::{Mutex, MutexGuard};

/// Dense, zero-based index of a frame in arrival order.
pub type FrameIndex = u64;

#[derive(Debug, Default)]
struct LedgerState {
    total: u64,
    frozen: bool,
}

/// Thread-safe monotonic frame counter.
#[derive(Debug, Default)]
pub struct FrameLedger {
    state: Mutex<LedgerState>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a reader panicked mid-read; the counter is still valid.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one appended frame and return its index.
    /// Returns `None` once the ledger is frozen (session paused).
    pub fn append(&self) -> Option<FrameIndex> {
        let mut state = self.lock();
        if state.frozen {
            return None;
        }
        let index = state.total;
        state.total += 1;
        Some(index)
    }

    /// Total frames appended so far
    pub fn count(&self) -> u64 {
        self.lock().total
    }

    /// Stop accepting appends; the count stays readable.
    pub fn freeze(&self) {
        self.lock().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    /// Back to zero for a new session or restart.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.total = 0;
        state.frozen = false;
    }
}
