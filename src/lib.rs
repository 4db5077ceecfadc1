//! Delayed-mirror engine.
//!
//! A camera feed is recorded into a rolling frame store and played back a
//! fixed delay behind real time. Pausing freezes a scrub window over the
//! recording; from there the user can scrub, loop, and cut a clip for export.
//!
//! The host owns the UI thread: it forwards gestures to [`Session`], runs the
//! timer returned by [`Session::active_timer`], and calls
//! [`Session::pump_events`] to apply store completions.

pub mod core;

pub use crate::core::capture::{CameraFeed, CameraSource, CaptureConfig, CaptureError, CapturedFrame, StubCamera};
pub use crate::core::clip::{ClipHandle, ClipRange};
pub use crate::core::config::{ConfigError, MirrorConfig};
pub use crate::core::frame_store::{
    ExportRequest, ExportTransform, FrameBuffer, FrameStore, FrameStoreError, MemoryFrameStore, Rotation,
};
pub use crate::core::ledger::{FrameIndex, FrameLedger};
pub use crate::core::playback::PlaybackMode;
pub use crate::core::seek::SeekStats;
pub use crate::core::session::{
    DisplayedFrame, ExportStatus, Session, SessionError, SessionNotice, SessionPhase, SessionStatus,
    StoreFactory, TimerKind, TimerSchedule, TimerToken, Transition,
};
pub use crate::core::window::{Window, WindowSpec};
