//! Camera capture abstraction trait.
//! Device backends live outside this crate and implement `CameraSource`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::frame_store::FrameBuffer;

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            width: 1280,
            height: 720,
        }
    }
}

/// A single captured video frame (BGRA)
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// Presentation timestamp in seconds (relative to capture start)
    pub timestamp: f64,
}

impl CapturedFrame {
    pub fn from_buffer(buffer: FrameBuffer, timestamp: f64) -> Self {
        Self {
            data: buffer.data,
            width: buffer.width,
            height: buffer.height,
            stride: buffer.stride,
            timestamp,
        }
    }

    /// Move the pixels into a frame buffer without copying
    pub fn into_buffer(self) -> FrameBuffer {
        FrameBuffer {
            data: self.data,
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }
}

/// Capture error types
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Already capturing")]
    AlreadyCapturing,
    #[error("Not currently capturing")]
    NotCapturing,
    #[error("Permission denied for camera capture")]
    PermissionDenied,
    #[error("Camera not found")]
    DeviceNotFound,
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Callback receiving frames on the capture thread
pub type FrameHandler = Box<dyn FnMut(CapturedFrame) + Send>;

/// Camera capture abstraction trait.
/// Frames are delivered on the backend's own thread via the handler.
pub trait CameraSource: Send {
    /// Start delivering frames to `on_frame`.
    fn start_capture(&mut self, config: CaptureConfig, on_frame: FrameHandler) -> Result<(), CaptureError>;

    /// Stop delivering frames and drop the handler.
    fn stop_capture(&mut self) -> Result<(), CaptureError>;

    /// Check if currently capturing
    fn is_capturing(&self) -> bool;
}

/// Push side of a `StubCamera`: whoever holds it plays the camera thread.
#[derive(Clone, Default)]
pub struct CameraFeed {
    handler: Arc<Mutex<Option<FrameHandler>>>,
    delivered: Arc<AtomicU64>,
}

impl CameraFeed {
    /// Deliver a frame to the running capture.
    /// Returns `false` when capture is not running.
    pub fn push(&self, frame: CapturedFrame) -> bool {
        let mut guard = match self.handler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_mut() {
            Some(on_frame) => {
                on_frame(frame);
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handler.lock().map(|h| h.is_some()).unwrap_or(false)
    }

    /// Frames handed to the capture callback so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn attach(&self, on_frame: FrameHandler) {
        if let Ok(mut handler) = self.handler.lock() {
            *handler = Some(on_frame);
        }
    }

    fn detach(&self) {
        if let Ok(mut handler) = self.handler.lock() {
            *handler = None;
        }
    }
}

/// Camera backend with no device: frames come from its `CameraFeed`.
/// Used for development, tests, and hosts that decode frames themselves.
pub struct StubCamera {
    capturing: bool,
    feed: CameraFeed,
}

impl StubCamera {
    pub fn new() -> Self {
        Self {
            capturing: false,
            feed: CameraFeed::default(),
        }
    }

    pub fn feed(&self) -> CameraFeed {
        self.feed.clone()
    }
}

impl Default for StubCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraSource for StubCamera {
    fn start_capture(&mut self, config: CaptureConfig, on_frame: FrameHandler) -> Result<(), CaptureError> {
        if self.capturing {
            return Err(CaptureError::AlreadyCapturing);
        }
        log::debug!("Stub camera started ({}x{} @ {}fps)", config.width, config.height, config.target_fps);
        self.feed.attach(on_frame);
        self.capturing = true;
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), CaptureError> {
        if !self.capturing {
            return Err(CaptureError::NotCapturing);
        }
        self.feed.detach();
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }
}
