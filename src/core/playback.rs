//! Paused-navigation state: scrubber, loop cursor and clip overlay over a
//! frozen scrub window.
//!
//! Reported mode is derived, never stored twice:
//! looping wins over clip editing (the loop then runs over the clip range),
//! clip editing wins over plain scrubbing.

use serde::{Deserialize, Serialize};

use super::clip::ClipRange;
use super::ledger::FrameIndex;
use super::window::Window;

/// What the user is currently doing with the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackMode {
    Live,
    PausedScrub,
    Looping,
    ClipEditing,
}

/// One loop tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStep {
    pub index: FrameIndex,
    /// Jumped back to the range start instead of stepping forward
    pub wrapped: bool,
}

#[derive(Debug, Clone)]
pub struct Navigation {
    window: Window,
    scrubber: FrameIndex,
    clip: Option<ClipRange>,
    loop_position: Option<FrameIndex>,
    min_clip_frames: u64,
}

impl Navigation {
    /// Scrubber starts on the last fully available frame before the live point.
    pub fn new(window: Window, min_clip_frames: u64) -> Self {
        Self {
            window,
            scrubber: window.normalize(window.live_point.saturating_sub(1)),
            clip: None,
            loop_position: None,
            min_clip_frames,
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        if self.loop_position.is_some() {
            PlaybackMode::Looping
        } else if self.clip.is_some() {
            PlaybackMode::ClipEditing
        } else {
            PlaybackMode::PausedScrub
        }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn scrubber(&self) -> FrameIndex {
        self.scrubber
    }

    pub fn clip(&self) -> Option<&ClipRange> {
        self.clip.as_ref()
    }

    pub fn clip_mut(&mut self) -> Option<&mut ClipRange> {
        self.clip.as_mut()
    }

    pub fn loop_position(&self) -> Option<FrameIndex> {
        self.loop_position
    }

    pub fn is_looping(&self) -> bool {
        self.loop_position.is_some()
    }

    /// Range the loop runs over: the clip if one is staged, else the scrub window
    pub fn active_range(&self) -> Window {
        match &self.clip {
            Some(clip) => clip.as_window(),
            None => self.window,
        }
    }

    /// Frame that should be on screen
    pub fn current_index(&self) -> FrameIndex {
        self.loop_position
            .or_else(|| self.clip.as_ref().map(|c| c.playhead()))
            .unwrap_or(self.scrubber)
    }

    /// Move the scrubber; a scrub while looping ends the loop.
    pub fn scrub_to(&mut self, index: FrameIndex) -> FrameIndex {
        self.loop_position = None;
        self.scrubber = self.window.normalize(index);
        self.scrubber
    }

    /// Timeline tap: moves the clip playhead while editing, else the scrubber.
    /// Ends the loop either way.
    pub fn tap(&mut self, index: FrameIndex) -> FrameIndex {
        self.stop_loop();
        match self.clip.as_mut() {
            Some(clip) => clip.tap(index),
            None => {
                self.scrubber = self.window.normalize(index);
                self.scrubber
            }
        }
    }

    /// Begin cyclic playback from the current frame. Returns the first frame.
    pub fn start_loop(&mut self) -> FrameIndex {
        let start = self.active_range().normalize(self.current_index());
        self.loop_position = Some(start);
        start
    }

    /// Leave the loop where it is; the scrubber (or clip playhead) takes its position.
    pub fn stop_loop(&mut self) -> Option<FrameIndex> {
        let position = self.loop_position.take()?;
        let index = match self.clip.as_mut() {
            Some(clip) => clip.drag_playhead(position),
            None => self.window.normalize(position),
        };
        self.scrubber = self.window.normalize(position);
        Some(index)
    }

    /// Advance one frame inside the active range, wrapping from `high - 1`
    /// back to `low`. The range is re-read every tick so edits made while
    /// looping take effect on the next step.
    pub fn advance_loop(&mut self) -> Option<LoopStep> {
        let current = self.loop_position?;
        let range = self.active_range();
        let step = if current < range.low || current + 1 >= range.high {
            LoopStep { index: range.low, wrapped: true }
        } else {
            LoopStep { index: current + 1, wrapped: false }
        };
        self.loop_position = Some(step.index);
        Some(step)
    }

    /// Stage a clip over the whole window.
    /// Returns the playhead, or `None` if the window cannot hold a minimum clip.
    pub fn enter_clip(&mut self) -> Option<FrameIndex> {
        if let Some(clip) = &self.clip {
            return Some(clip.playhead());
        }
        let clip = ClipRange::enter(self.window, self.min_clip_frames)?;
        self.clip = Some(clip);
        Some(clip.playhead())
    }

    /// Discard the staged clip
    pub fn cancel_clip(&mut self) -> Option<ClipRange> {
        self.clip.take()
    }

    /// Hand the clip over for export and park the scrubber on its end.
    pub fn take_clip_for_export(&mut self) -> Option<ClipRange> {
        let clip = self.clip.take()?;
        self.loop_position = None;
        self.scrubber = self.window.normalize(clip.end());
        Some(clip)
    }
}
