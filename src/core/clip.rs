//! Clip range model: start/end handles and playhead over the scrub window.
//!
//! Invariants held after every mutator:
//! `window.low <= start`, `start + min_clip_frames <= end`, `end <= window.high`,
//! `start <= playhead <= end`.

use serde::{Deserialize, Serialize};

use super::ledger::FrameIndex;
use super::window::{normalize, validate_clip, ClipViolation, Window};

/// Which handle a drag gesture grabbed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClipHandle {
    Start,
    End,
    Playhead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRange {
    start: FrameIndex,
    end: FrameIndex,
    playhead: FrameIndex,
    window: Window,
    min_clip_frames: u64,
}

impl ClipRange {
    /// Start a clip covering the whole window, playhead at the start.
    /// Returns `None` when the window is shorter than one minimum clip.
    pub fn enter(window: Window, min_clip_frames: u64) -> Option<Self> {
        if window.span() < min_clip_frames {
            return None;
        }
        Some(Self {
            start: window.low,
            end: window.high,
            playhead: window.low,
            window,
            min_clip_frames,
        })
    }

    pub fn start(&self) -> FrameIndex {
        self.start
    }

    pub fn end(&self) -> FrameIndex {
        self.end
    }

    pub fn playhead(&self) -> FrameIndex {
        self.playhead
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn min_clip_frames(&self) -> u64 {
        self.min_clip_frames
    }

    /// Length of the clip in frames
    pub fn len_frames(&self) -> u64 {
        self.end - self.start
    }

    /// The clip as a loop range
    pub fn as_window(&self) -> Window {
        Window {
            live_point: self.window.live_point,
            low: self.start,
            high: self.end,
        }
    }

    pub fn drag_start(&mut self, new_start: FrameIndex) -> FrameIndex {
        self.start = normalize(new_start, self.window.low, self.end - self.min_clip_frames);
        self.clamp_playhead();
        self.start
    }

    pub fn drag_end(&mut self, new_end: FrameIndex) -> FrameIndex {
        self.end = normalize(new_end, self.start + self.min_clip_frames, self.window.high);
        self.clamp_playhead();
        self.end
    }

    pub fn drag_playhead(&mut self, position: FrameIndex) -> FrameIndex {
        self.playhead = normalize(position, self.start, self.end);
        self.playhead
    }

    /// Direct tap on the timeline; same rule as a playhead drag.
    pub fn tap(&mut self, position: FrameIndex) -> FrameIndex {
        self.drag_playhead(position)
    }

    /// Route a drag to the grabbed handle; returns the frame to display.
    pub fn drag(&mut self, handle: ClipHandle, position: FrameIndex) -> FrameIndex {
        match handle {
            ClipHandle::Start => self.drag_start(position),
            ClipHandle::End => self.drag_end(position),
            ClipHandle::Playhead => self.drag_playhead(position),
        }
    }

    pub fn validate(&self) -> Result<(), ClipViolation> {
        validate_clip(&self.window, self.start, self.end, self.min_clip_frames)
    }

    fn clamp_playhead(&mut self) {
        self.playhead = normalize(self.playhead, self.start, self.end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIN_CLIP: u64 = 30;

    fn window(low: u64, high: u64) -> Window {
        Window { live_point: high, low, high }
    }

    #[test]
    fn test_enter_defaults_to_full_window() {
        let clip = ClipRange::enter(window(100, 1000), MIN_CLIP).unwrap();
        assert_eq!(clip.start(), 100);
        assert_eq!(clip.end(), 1000);
        assert_eq!(clip.playhead(), 100);
        assert!(clip.validate().is_ok());
    }

    #[test]
    fn test_enter_refuses_narrow_window() {
        assert!(ClipRange::enter(window(0, 29), MIN_CLIP).is_none());
        assert!(ClipRange::enter(window(0, 30), MIN_CLIP).is_some());
    }

    #[test]
    fn test_drag_end_clamps_to_min_clip() {
        let mut clip = ClipRange::enter(window(100, 1000), MIN_CLIP).unwrap();
        assert_eq!(clip.drag_end(50), 130);
        assert_eq!(clip.end(), 130);
        assert_eq!(clip.drag_end(5000), 1000);
    }

    #[test]
    fn test_drag_start_clamps() {
        let mut clip = ClipRange::enter(window(100, 1000), MIN_CLIP).unwrap();
        assert_eq!(clip.drag_start(0), 100);
        assert_eq!(clip.drag_start(990), 970);
        assert_eq!(clip.drag_start(400), 400);
    }

    #[test]
    fn test_handle_drag_pulls_playhead_along() {
        let mut clip = ClipRange::enter(window(100, 1000), MIN_CLIP).unwrap();
        clip.drag_playhead(150);
        clip.drag_start(300);
        assert_eq!(clip.playhead(), 300);
        clip.drag_playhead(900);
        clip.drag_end(500);
        assert_eq!(clip.playhead(), 500);
    }

    #[test]
    fn test_tap_and_drag_dispatch() {
        let mut clip = ClipRange::enter(window(100, 1000), MIN_CLIP).unwrap();
        assert_eq!(clip.tap(2000), 1000);
        assert_eq!(clip.drag(ClipHandle::Start, 200), 200);
        assert_eq!(clip.drag(ClipHandle::End, 600), 600);
        assert_eq!(clip.drag(ClipHandle::Playhead, 50), 200);
        assert_eq!(clip.as_window(), Window { live_point: 1000, low: 200, high: 600 });
        assert_eq!(clip.len_frames(), 400);
    }

    proptest! {
        #[test]
        fn prop_drags_keep_invariants(
            low in 0u64..5000,
            width in MIN_CLIP..5000,
            drags in proptest::collection::vec((0u8..3, 0u64..12_000), 0..64)
        ) {
            let mut clip = ClipRange::enter(window(low, low + width), MIN_CLIP).unwrap();
            for (which, pos) in drags {
                let handle = match which {
                    0 => ClipHandle::Start,
                    1 => ClipHandle::End,
                    _ => ClipHandle::Playhead,
                };
                clip.drag(handle, pos);
                prop_assert!(clip.start() + MIN_CLIP <= clip.end());
                prop_assert!(clip.start() >= low);
                prop_assert!(clip.end() <= low + width);
                prop_assert!(clip.start() <= clip.playhead() && clip.playhead() <= clip.end());
                prop_assert!(clip.validate().is_ok());
            }
        }
    }
}
