//! Window calculator: the only place that derives navigation bounds.
//!
//! Given the ledger total, the configured delay and the scrub-back length,
//! everything here is pure and callable from any thread.
//!
//! ```text
//!  0        scrub_oldest            live_point        total
//!  |  evicted  |====== scrub window ======|-- delay --|
//! ```

use serde::{Deserialize, Serialize};

use super::ledger::FrameIndex;

/// Navigable range over the frame sequence, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    /// Newest frame eligible for delayed display
    pub live_point: FrameIndex,
    /// Oldest reachable frame (scrub_oldest)
    pub low: FrameIndex,
    /// Newest reachable frame (scrub_newest, always the live point)
    pub high: FrameIndex,
}

impl Window {
    /// Number of frame steps between the bounds
    pub fn span(&self) -> u64 {
        self.high - self.low
    }

    pub fn normalize(&self, index: FrameIndex) -> FrameIndex {
        normalize(index, self.low, self.high)
    }
}

/// Delay and scrub-back lengths in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub delay_frames: u64,
    pub scrub_back_frames: u64,
}

impl WindowSpec {
    pub fn new(delay_frames: u64, scrub_back_frames: u64) -> Self {
        Self { delay_frames, scrub_back_frames }
    }

    pub fn live_point(&self, total: u64) -> Option<FrameIndex> {
        live_point(total, self.delay_frames)
    }

    pub fn window(&self, total: u64) -> Option<Window> {
        scrub_window(total, self.delay_frames, self.scrub_back_frames)
    }

    /// Frames still needed before delayed playback can start
    pub fn frames_until_live(&self, total: u64) -> u64 {
        self.delay_frames.saturating_add(1).saturating_sub(total)
    }
}

/// Live point for `total` appended frames, or `None` while fewer than
/// `delay_frames + 1` frames exist.
pub fn live_point(total: u64, delay_frames: u64) -> Option<FrameIndex> {
    if total > delay_frames {
        Some(total - delay_frames)
    } else {
        None
    }
}

/// Scrub window `[max(0, live - scrub_back), live]`, or `None` if not yet live.
pub fn scrub_window(total: u64, delay_frames: u64, scrub_back_frames: u64) -> Option<Window> {
    let live = live_point(total, delay_frames)?;
    Some(Window {
        live_point: live,
        low: live.saturating_sub(scrub_back_frames),
        high: live,
    })
}

/// Clamp a candidate index into `[low, high]`.
/// An inverted range yields `low` instead of panicking.
pub fn normalize(index: FrameIndex, low: FrameIndex, high: FrameIndex) -> FrameIndex {
    if high < low {
        return low;
    }
    index.clamp(low, high)
}

/// Reason a clip range does not fit a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClipViolation {
    #[error("clip start {start} is before the window start {low}")]
    StartBeforeWindow { start: FrameIndex, low: FrameIndex },
    #[error("clip end {end} is past the window end {high}")]
    EndAfterWindow { end: FrameIndex, high: FrameIndex },
    #[error("clip {start}..{end} is shorter than {min_frames} frames")]
    TooShort { start: FrameIndex, end: FrameIndex, min_frames: u64 },
}

/// Check `low <= start`, `start + min_clip <= end` and `end <= high`.
pub fn validate_clip(
    window: &Window,
    start: FrameIndex,
    end: FrameIndex,
    min_clip_frames: u64,
) -> Result<(), ClipViolation> {
    if start < window.low {
        return Err(ClipViolation::StartBeforeWindow { start, low: window.low });
    }
    if end > window.high {
        return Err(ClipViolation::EndAfterWindow { end, high: window.high });
    }
    if start.saturating_add(min_clip_frames) > end {
        return Err(ClipViolation::TooShort { start, end, min_frames: min_clip_frames });
    }
    Ok(())
}
