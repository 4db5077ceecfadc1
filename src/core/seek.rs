//! Seek coalescer: at most one random-access decode in flight.
//!
//! A request made while a seek is outstanding replaces the pending slot
//! (last writer wins). The pending target is issued only when the in-flight
//! seek completes, so physical seeks are bounded by completions + 1 no matter
//! how fast a drag gesture fires.
//!
//! The coalescer only tracks state; the caller issues the seek for every index
//! it hands back.

use serde::{Deserialize, Serialize};

use super::ledger::FrameIndex;

/// How an in-flight seek ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The store decoded the target
    Completed,
    /// The store could not resolve the index to a time (seek-miss)
    Missed,
}

/// Running counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekStats {
    pub requested: u64,
    pub issued: u64,
    pub completed: u64,
    /// Pending targets overwritten by a newer request before being issued
    pub superseded: u64,
    pub missed: u64,
}

#[derive(Debug, Default)]
pub struct SeekCoalescer {
    in_flight: Option<FrameIndex>,
    pending: Option<FrameIndex>,
    stats: SeekStats,
}

impl SeekCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for `index` to be shown.
    /// Returns `Some(index)` when the caller must issue the seek now,
    /// `None` when it was parked behind the in-flight seek.
    pub fn request(&mut self, index: FrameIndex) -> Option<FrameIndex> {
        self.stats.requested += 1;
        if self.in_flight.is_some() {
            if self.pending.replace(index).is_some() {
                self.stats.superseded += 1;
            }
            return None;
        }
        self.start(index);
        Some(index)
    }

    /// Record the end of the in-flight seek.
    /// Returns the pending target, now in flight, if one was waiting.
    pub fn complete(&mut self, outcome: SeekOutcome) -> Option<FrameIndex> {
        if self.in_flight.take().is_none() {
            return None;
        }
        match outcome {
            SeekOutcome::Completed => self.stats.completed += 1,
            SeekOutcome::Missed => self.stats.missed += 1,
        }
        let next = self.pending.take()?;
        self.start(next);
        Some(next)
    }

    fn start(&mut self, index: FrameIndex) {
        self.in_flight = Some(index);
        self.stats.issued += 1;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<FrameIndex> {
        self.in_flight
    }

    pub fn pending(&self) -> Option<FrameIndex> {
        self.pending
    }

    pub fn stats(&self) -> SeekStats {
        self.stats
    }

    /// Forget everything, e.g. when the store that owned the seek is torn down.
    pub fn reset(&mut self) {
        self.in_flight = None;
        self.pending = None;
        self.stats = SeekStats::default();
    }
}
