//! Frame store abstraction: where captured frames live and get decoded back.
//!
//! The engine only decides *which* index to ask for; the store owns the
//! media. Every slow operation (finalize, decode, seek, export) reports
//! through a completion callback that may run on any thread.
//!
//! `MemoryFrameStore` keeps a bounded ring of raw BGRA frames and is the
//! backend used when no media pipeline is plugged in. Clip export runs on its
//! own writer thread over shared frame handles.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::capture::CapturedFrame;
use super::ledger::FrameIndex;

// =============================================================================
// Frame buffer
// =============================================================================

/// BGRA pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row (width * 4 for BGRA)
    pub stride: u32,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width * 4;
        Self {
            data: vec![0u8; (stride * height) as usize],
            width,
            height,
            stride,
        }
    }

    /// Create a frame filled with a solid BGRA color
    pub fn solid(width: u32, height: u32, b: u8, g: u8, r: u8, a: u8) -> Self {
        let mut frame = Self::new(width, height);
        for pixel in frame.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&[b, g, r, a]);
        }
        frame
    }

    /// Get pixel at (x, y) as [B, G, R, A]
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y * self.stride + x * 4) as usize;
        if offset + 3 < self.data.len() {
            [self.data[offset], self.data[offset + 1], self.data[offset + 2], self.data[offset + 3]]
        } else {
            [0, 0, 0, 0]
        }
    }

    /// Set pixel at (x, y) from [B, G, R, A]
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: [u8; 4]) {
        let offset = (y * self.stride + x * 4) as usize;
        if offset + 3 < self.data.len() {
            self.data[offset..offset + 4].copy_from_slice(&pixel);
        }
    }

    /// Horizontal flip (selfie-camera mirror)
    pub fn mirrored(&self) -> Self {
        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                out.set_pixel(self.width - 1 - x, y, self.get_pixel(x, y));
            }
        }
        out
    }

    /// Rotate clockwise by a quarter-turn multiple
    pub fn rotated(&self, rotation: Rotation) -> Self {
        let (w, h) = (self.width, self.height);
        match rotation {
            Rotation::None => self.clone(),
            Rotation::Cw180 => {
                let mut out = Self::new(w, h);
                for y in 0..h {
                    for x in 0..w {
                        out.set_pixel(w - 1 - x, h - 1 - y, self.get_pixel(x, y));
                    }
                }
                out
            }
            Rotation::Cw90 => {
                let mut out = Self::new(h, w);
                for y in 0..h {
                    for x in 0..w {
                        out.set_pixel(h - 1 - y, x, self.get_pixel(x, y));
                    }
                }
                out
            }
            Rotation::Cw270 => {
                let mut out = Self::new(h, w);
                for y in 0..h {
                    for x in 0..w {
                        out.set_pixel(y, w - 1 - x, self.get_pixel(x, y));
                    }
                }
                out
            }
        }
    }

    /// Apply an export transform: mirror first, then rotate.
    pub fn transformed(&self, transform: ExportTransform) -> Self {
        if transform.is_identity() {
            return self.clone();
        }
        let base = if transform.mirrored { self.mirrored() } else { self.clone() };
        base.rotated(transform.rotation)
    }

    /// Convert BGRA to RGBA for web-view canvases
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut rgba = vec![0u8; self.data.len()];
        for (src, dst) in self.data.chunks_exact(4).zip(rgba.chunks_exact_mut(4)) {
            dst[0] = src[2]; // R
            dst[1] = src[1]; // G
            dst[2] = src[0]; // B
            dst[3] = src[3]; // A
        }
        rgba
    }

    /// Base64-encoded RGBA preview
    pub fn to_rgba_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_rgba())
    }
}

// =============================================================================
// Export transform
// =============================================================================

/// Clockwise rotation applied to exported clips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

/// Orientation fix-up handed to the exporter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTransform {
    pub mirrored: bool,
    pub rotation: Rotation,
}

impl ExportTransform {
    pub fn is_identity(&self) -> bool {
        !self.mirrored && self.rotation == Rotation::None
    }
}

// =============================================================================
// Store contract
// =============================================================================

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum FrameStoreError {
    #[error("No frames recorded")]
    Empty,
    #[error("Store is not finalized")]
    NotFinalized,
    #[error("Store was torn down")]
    TornDown,
    #[error("Frame range {start}..={end} is not available")]
    RangeUnavailable { start: FrameIndex, end: FrameIndex },
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seekable asset produced by finalize
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedAsset {
    /// Oldest index still retained after pruning
    pub first_index: FrameIndex,
    /// Frames appended before ingest stopped
    pub frame_count: u64,
    /// End-of-content time in seconds
    pub end_time: f64,
}

/// Clip export job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRequest {
    pub id: Uuid,
    pub start: FrameIndex,
    pub end: FrameIndex,
    pub transform: ExportTransform,
}

pub type FinalizeCallback = Box<dyn FnOnce(Result<FinalizedAsset, FrameStoreError>) + Send>;
pub type FrameCallback = Box<dyn FnOnce(Option<FrameBuffer>) + Send>;
pub type ExportCallback = Box<dyn FnOnce(Result<PathBuf, FrameStoreError>) + Send>;

/// Persisted-media backend.
///
/// `append` runs on the capture thread; everything else on the UI context.
/// Callbacks may fire synchronously or from a worker thread.
pub trait FrameStore: Send {
    /// Ingest one frame; `false` means it was dropped (not fatal).
    fn append(&mut self, frame: CapturedFrame) -> bool;

    /// Frames appended so far
    fn count(&self) -> u64;

    /// Stop ingest, drop frames before `retain_from`, and make the rest seekable.
    fn finalize(&mut self, retain_from: FrameIndex, done: FinalizeCallback);

    /// Seek target for a logical index, `None` if outside the finalized asset.
    fn time_for(&self, index: FrameIndex) -> Option<Duration>;

    /// Decode one frame for display.
    fn pixel_at(&mut self, index: FrameIndex, done: FrameCallback);

    /// Random-access decode at a resolved time.
    fn seek(&mut self, index: FrameIndex, time: Duration, done: FrameCallback);

    /// Write a standalone clip for `request.start..=request.end`.
    fn export(&mut self, request: ExportRequest, done: ExportCallback);

    /// Release everything. Later calls become no-ops or errors.
    fn teardown(&mut self);
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorePhase {
    Ingesting,
    Finalized,
    TornDown,
}

/// Header line written at the top of an exported clip file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipManifest {
    pub id: Uuid,
    pub start: FrameIndex,
    pub end: FrameIndex,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub transform: ExportTransform,
}

impl ClipManifest {
    pub const FILE_EXTENSION: &'static str = "mirrorclip";
}

/// Bounded ring of raw frames addressed by logical index.
pub struct MemoryFrameStore {
    frames: VecDeque<Arc<FrameBuffer>>,
    /// Logical index of `frames[0]`
    first_index: FrameIndex,
    appended: u64,
    capacity: usize,
    frame_rate: f64,
    export_dir: PathBuf,
    phase: StorePhase,
    asset: Option<FinalizedAsset>,
}

impl MemoryFrameStore {
    /// `capacity` is the number of most recent frames kept during ingest.
    pub fn new(capacity: usize, frame_rate: f64, export_dir: PathBuf) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(4096)),
            first_index: 0,
            appended: 0,
            capacity: capacity.max(1),
            frame_rate,
            export_dir,
            phase: StorePhase::Ingesting,
            asset: None,
        }
    }

    /// Oldest index still held
    pub fn first_index(&self) -> FrameIndex {
        self.first_index
    }

    /// Number of frames held in memory
    pub fn retained(&self) -> usize {
        self.frames.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == StorePhase::Finalized
    }

    fn frame(&self, index: FrameIndex) -> Option<&Arc<FrameBuffer>> {
        let offset = index.checked_sub(self.first_index)?;
        self.frames.get(usize::try_from(offset).ok()?)
    }

    /// Snapshot the frames of a clip so the writer can run without the store.
    fn clip_job(&self, request: ExportRequest) -> Result<ClipJob, FrameStoreError> {
        if self.phase != StorePhase::Finalized {
            return Err(FrameStoreError::NotFinalized);
        }
        let unavailable = FrameStoreError::RangeUnavailable { start: request.start, end: request.end };
        if request.end < request.start {
            return Err(unavailable);
        }
        let frames = (request.start..=request.end)
            .map(|index| self.frame(index).cloned())
            .collect::<Option<Vec<_>>>()
            .ok_or(unavailable)?;

        Ok(ClipJob {
            request,
            frames,
            frame_rate: self.frame_rate,
            export_dir: self.export_dir.clone(),
        })
    }
}

/// Clip export detached from the store: owns handles to every frame it writes.
struct ClipJob {
    request: ExportRequest,
    frames: Vec<Arc<FrameBuffer>>,
    frame_rate: f64,
    export_dir: PathBuf,
}

impl ClipJob {
    fn write(&self) -> Result<PathBuf, FrameStoreError> {
        let request = &self.request;
        std::fs::create_dir_all(&self.export_dir)?;
        let path = self
            .export_dir
            .join(format!("clip_{}.{}", request.id, ClipManifest::FILE_EXTENSION));

        let (width, height) = self
            .frames
            .first()
            .map(|f| {
                let out = f.transformed(request.transform);
                (out.width, out.height)
            })
            .unwrap_or((0, 0));
        let manifest = ClipManifest {
            id: request.id,
            start: request.start,
            end: request.end,
            frame_rate: self.frame_rate,
            width,
            height,
            frame_count: self.frames.len() as u64,
            transform: request.transform,
        };
        let header = serde_json::to_string(&manifest)
            .map_err(|e| FrameStoreError::Backend(e.to_string()))?;

        let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
        writeln!(file, "{header}")?;
        for frame in &self.frames {
            file.write_all(&frame.transformed(request.transform).data)?;
        }
        file.flush()?;
        Ok(path)
    }
}

impl FrameStore for MemoryFrameStore {
    fn append(&mut self, frame: CapturedFrame) -> bool {
        if self.phase != StorePhase::Ingesting {
            return false;
        }
        self.frames.push_back(Arc::new(frame.into_buffer()));
        self.appended += 1;
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
            self.first_index += 1;
        }
        true
    }

    fn count(&self) -> u64 {
        self.appended
    }

    fn finalize(&mut self, retain_from: FrameIndex, done: FinalizeCallback) {
        match self.phase {
            StorePhase::TornDown => return done(Err(FrameStoreError::TornDown)),
            StorePhase::Finalized => {
                return done(self.asset.ok_or(FrameStoreError::NotFinalized));
            }
            StorePhase::Ingesting => {}
        }
        if self.appended == 0 {
            return done(Err(FrameStoreError::Empty));
        }

        let retain_from = retain_from.min(self.appended - 1);
        while self.first_index < retain_from && !self.frames.is_empty() {
            self.frames.pop_front();
            self.first_index += 1;
        }

        let asset = FinalizedAsset {
            first_index: self.first_index,
            frame_count: self.appended,
            end_time: self.appended as f64 / self.frame_rate,
        };
        self.phase = StorePhase::Finalized;
        self.asset = Some(asset);
        log::info!(
            "Frame store finalized: {} frames, {} retained from #{}",
            self.appended,
            self.frames.len(),
            self.first_index
        );
        done(Ok(asset))
    }

    fn time_for(&self, index: FrameIndex) -> Option<Duration> {
        if self.phase != StorePhase::Finalized || self.frame(index).is_none() {
            return None;
        }
        Some(Duration::from_secs_f64(index as f64 / self.frame_rate))
    }

    fn pixel_at(&mut self, index: FrameIndex, done: FrameCallback) {
        done(self.frame(index).map(|f| FrameBuffer::clone(f)))
    }

    fn seek(&mut self, index: FrameIndex, _time: Duration, done: FrameCallback) {
        if self.phase != StorePhase::Finalized {
            return done(None);
        }
        done(self.frame(index).map(|f| FrameBuffer::clone(f)))
    }

    fn export(&mut self, request: ExportRequest, done: ExportCallback) {
        let job = match self.clip_job(request) {
            Ok(job) => job,
            Err(e) => {
                log::warn!("Clip export rejected: {e}");
                return done(Err(e));
            }
        };

        // Writer thread: the caller never waits on disk I/O
        thread::spawn(move || {
            let result = job.write();
            match &result {
                Ok(path) => log::info!(
                    "Exported clip {}..={} to {}",
                    job.request.start,
                    job.request.end,
                    path.display()
                ),
                Err(e) => log::warn!("Clip export failed: {e}"),
            }
            done(result)
        });
    }

    fn teardown(&mut self) {
        self.frames.clear();
        self.phase = StorePhase::TornDown;
        self.asset = None;
    }
}
