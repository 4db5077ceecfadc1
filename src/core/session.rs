//! Mirror session: orchestrates camera capture, the frame store and navigation.
//! State machine: Idle → Countdown → Live → Pausing → Paused → … → Stopped
//!
//! Frame pipeline: camera callback thread → store append → ledger append.
//! Backpressure: a frame the store refuses is dropped (counted, logged).
//!
//! Store completions arrive on arbitrary threads. They are posted into a
//! channel through a weak handle and applied on the owner's thread by
//! `pump_events`, so a playback completion that outlives a stop or restart is
//! a no-op. Export results use their own channel, which only `stop` cuts off.
//! Timers are driven by the host: schedule `active_timer()` and hand the
//! token back to `fire_timer`; tokens from an earlier mode are ignored.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::capture::{CameraSource, CaptureError};
use super::clip::{ClipHandle, ClipRange};
use super::config::{ConfigError, MirrorConfig};
use super::frame_store::{
    ExportRequest, FinalizedAsset, FrameBuffer, FrameStore, FrameStoreError, MemoryFrameStore,
};
use super::ledger::{FrameIndex, FrameLedger};
use super::playback::{Navigation, PlaybackMode};
use super::seek::{SeekCoalescer, SeekOutcome, SeekStats};
use super::window::{Window, WindowSpec};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    Countdown,
    Live,
    /// Finalize requested, waiting for the store
    Pausing,
    Paused,
    Stopped,
}

/// Result of a guarded transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// Not enough material recorded yet; nothing changed
    NotReady,
    /// Already in the requested state
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerKind {
    Countdown,
    LiveRender,
    LoopAdvance,
}

/// Identifies one scheduling of a timer; stale after any mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub kind: TimerKind,
    generation: u64,
}

/// What the host should be ticking right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSchedule {
    pub token: TimerToken,
    pub interval: Duration,
}

/// Frame currently on screen
#[derive(Debug, Clone)]
pub struct DisplayedFrame {
    pub index: FrameIndex,
    pub frame: FrameBuffer,
}

/// User-visible outcomes surfaced by `pump_events`
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// Pause could not produce a seekable recording; still live, pause may be retried
    FinalizeFailed { message: String },
    ExportFinished { id: Uuid, result: Result<PathBuf, String> },
}

/// Outcome of the most recent export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ExportStatus {
    Completed { id: Uuid, path: PathBuf },
    Failed { id: Uuid, message: String },
}

/// Session snapshot exposed to the host UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub mode: Option<PlaybackMode>,
    pub total_frames: u64,
    /// Frames still needed before delayed playback starts
    pub frames_until_live: u64,
    pub window: Option<Window>,
    pub scrubber: Option<FrameIndex>,
    pub loop_position: Option<FrameIndex>,
    pub clip: Option<ClipRange>,
    pub displayed_index: Option<FrameIndex>,
    pub countdown_remaining: Option<u32>,
    /// Seconds since capture started
    pub elapsed: f64,
    pub dropped_frames: u64,
    pub exports_in_flight: usize,
    pub last_export: Option<ExportStatus>,
    pub seek: SeekStats,
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid state transition: cannot {action} while {state:?}")]
    InvalidState { state: SessionPhase, action: String },
    #[error("No clip is being edited (attempted {action})")]
    NotEditing { action: String },
    #[error("Invalid clip: {0}")]
    Clip(#[from] super::window::ClipViolation),
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Builds a fresh frame store for each recording run
pub type StoreFactory = Box<dyn FnMut(&MirrorConfig) -> Box<dyn FrameStore> + Send>;

type SharedStore = Arc<Mutex<Box<dyn FrameStore>>>;

enum SessionEvent {
    Finalized(Result<FinalizedAsset, FrameStoreError>),
    LiveFrame { index: FrameIndex, frame: Option<FrameBuffer> },
    SeekDone { index: FrameIndex, frame: Option<FrameBuffer> },
    ExportDone { id: Uuid, result: Result<PathBuf, FrameStoreError> },
}

struct EventSink {
    tx: Mutex<mpsc::Sender<SessionEvent>>,
}

impl EventSink {
    fn channel() -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx: Mutex::new(tx) }), rx)
    }

    fn post(&self, event: SessionEvent) {
        if let Ok(tx) = self.tx.lock() {
            // Receiver gone means the session is being dropped
            let _ = tx.send(event);
        }
    }
}

/// Wrap a store completion so it only reaches a session that is still alive.
fn deliver<T: 'static>(
    sink: &Arc<EventSink>,
    wrap: impl FnOnce(T) -> SessionEvent + Send + 'static,
) -> Box<dyn FnOnce(T) + Send> {
    let weak = Arc::downgrade(sink);
    Box::new(move |value| match weak.upgrade() {
        Some(sink) => sink.post(wrap(value)),
        None => log::debug!("Completion arrived after the session closed; ignored"),
    })
}

fn lock_store(store: &SharedStore) -> MutexGuard<'_, Box<dyn FrameStore>> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

/// Delayed-mirror session: one recording run plus its paused navigation.
pub struct Session {
    config: MirrorConfig,
    bounds: WindowSpec,
    phase: SessionPhase,

    // Capture pipeline
    camera: Box<dyn CameraSource>,
    ledger: Arc<FrameLedger>,
    store: SharedStore,
    store_factory: StoreFactory,
    dropped_frames: Arc<AtomicU64>,

    // Completions
    sink: Arc<EventSink>,
    events: mpsc::Receiver<SessionEvent>,
    export_sink: Arc<EventSink>,
    export_events: mpsc::Receiver<SessionEvent>,

    // Navigation
    coalescer: SeekCoalescer,
    navigation: Option<Navigation>,
    displayed: Option<DisplayedFrame>,
    live_frame_in_flight: bool,

    // Timers
    timer_generation: u64,
    countdown_remaining: u32,
    capture_start: Option<Instant>,

    // Export
    exports_in_flight: Vec<Uuid>,
    last_export: Option<ExportStatus>,
    last_error: Option<String>,
}

impl Session {
    pub fn new(
        config: MirrorConfig,
        camera: Box<dyn CameraSource>,
        mut store_factory: StoreFactory,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let store = store_factory(&config);
        let (sink, events) = EventSink::channel();
        let (export_sink, export_events) = EventSink::channel();

        Ok(Self {
            bounds: config.window_spec(),
            config,
            phase: SessionPhase::Idle,
            camera,
            ledger: Arc::new(FrameLedger::new()),
            store: Arc::new(Mutex::new(store)),
            store_factory,
            dropped_frames: Arc::new(AtomicU64::new(0)),
            sink,
            events,
            export_sink,
            export_events,
            coalescer: SeekCoalescer::new(),
            navigation: None,
            displayed: None,
            live_frame_in_flight: false,
            timer_generation: 0,
            countdown_remaining: 0,
            capture_start: None,
            exports_in_flight: Vec::new(),
            last_export: None,
            last_error: None,
        })
    }

    /// Session backed by the bounded in-memory store
    pub fn with_memory_store(config: MirrorConfig, camera: Box<dyn CameraSource>) -> Result<Self, SessionError> {
        let factory: StoreFactory = Box::new(|config: &MirrorConfig| {
            Box::new(MemoryFrameStore::new(
                config.retention_frames(),
                config.frame_rate as f64,
                config.export_dir.clone(),
            )) as Box<dyn FrameStore>
        });
        Self::new(config, camera, factory)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn mode(&self) -> Option<PlaybackMode> {
        match self.phase {
            SessionPhase::Countdown | SessionPhase::Live | SessionPhase::Pausing => Some(PlaybackMode::Live),
            SessionPhase::Paused => self.navigation.as_ref().map(Navigation::mode),
            SessionPhase::Idle | SessionPhase::Stopped => None,
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.ledger.count()
    }

    /// Shared handle to the frame ledger
    pub fn ledger(&self) -> Arc<FrameLedger> {
        self.ledger.clone()
    }

    /// Current navigable window: frozen while paused, moving while live.
    pub fn window(&self) -> Option<Window> {
        match &self.navigation {
            Some(nav) => Some(nav.window()),
            None => self.bounds.window(self.ledger.count()),
        }
    }

    pub fn scrubber(&self) -> Option<FrameIndex> {
        self.navigation.as_ref().map(Navigation::scrubber)
    }

    pub fn loop_position(&self) -> Option<FrameIndex> {
        self.navigation.as_ref().and_then(Navigation::loop_position)
    }

    pub fn clip(&self) -> Option<&ClipRange> {
        self.navigation.as_ref().and_then(Navigation::clip)
    }

    pub fn displayed(&self) -> Option<&DisplayedFrame> {
        self.displayed.as_ref()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn seek_stats(&self) -> SeekStats {
        self.coalescer.stats()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_export(&self) -> Option<&ExportStatus> {
        self.last_export.as_ref()
    }

    /// Seconds since capture started
    pub fn elapsed(&self) -> f64 {
        self.capture_start
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn status(&self) -> SessionStatus {
        let total = self.ledger.count();
        SessionStatus {
            phase: self.phase,
            mode: self.mode(),
            total_frames: total,
            frames_until_live: self.bounds.frames_until_live(total),
            window: self.window(),
            scrubber: self.scrubber(),
            loop_position: self.loop_position(),
            clip: self.clip().copied(),
            displayed_index: self.displayed.as_ref().map(|d| d.index),
            countdown_remaining: (self.phase == SessionPhase::Countdown).then_some(self.countdown_remaining),
            elapsed: self.elapsed(),
            dropped_frames: self.dropped_frames(),
            exports_in_flight: self.exports_in_flight.len(),
            last_export: self.last_export.clone(),
            seek: self.coalescer.stats(),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the session: countdown first if configured, then live capture.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Idle {
            return Err(self.invalid("start"));
        }
        self.begin_run()
    }

    /// Throw away the recording and begin a fresh run.
    /// Confirmed exports keep running and are still reported.
    pub fn restart(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Live | SessionPhase::Pausing | SessionPhase::Paused | SessionPhase::Countdown => {}
            _ => return Err(self.invalid("restart")),
        }
        log::info!("Restarting session after {} frames", self.ledger.count());
        self.shut_down_run();

        let fresh = (self.store_factory)(&self.config);
        self.store = Arc::new(Mutex::new(fresh));
        self.begin_run()
    }

    /// End the session and release the store.
    /// Exports still running finish in the store but are no longer reported.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Idle | SessionPhase::Stopped => return Err(self.invalid("stop")),
            _ => {}
        }
        let total = self.ledger.count();
        self.shut_down_run();

        let (export_sink, export_events) = EventSink::channel();
        self.export_sink = export_sink;
        self.export_events = export_events;
        self.exports_in_flight.clear();

        self.phase = SessionPhase::Stopped;
        log::info!("Session stopped ({total} frames, {} dropped)", self.dropped_frames());
        Ok(())
    }

    fn begin_run(&mut self) -> Result<(), SessionError> {
        self.ledger.reset();
        self.dropped_frames.store(0, Ordering::Relaxed);
        if self.config.countdown_seconds > 0 {
            self.countdown_remaining = self.config.countdown_seconds;
            self.set_phase(SessionPhase::Countdown);
            log::info!("Countdown: {}s", self.countdown_remaining);
            return Ok(());
        }
        self.begin_live()
    }

    fn begin_live(&mut self) -> Result<(), SessionError> {
        let store = self.store.clone();
        let ledger = self.ledger.clone();
        let dropped = self.dropped_frames.clone();

        self.camera.start_capture(
            self.config.capture_config(),
            Box::new(move |frame| {
                let accepted = lock_store(&store).append(frame);
                if !accepted || ledger.append().is_none() {
                    let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if total.is_power_of_two() {
                        log::warn!("Dropped {total} frames so far");
                    }
                }
            }),
        )?;

        self.capture_start = Some(Instant::now());
        self.set_phase(SessionPhase::Live);
        log::info!(
            "Live: delay {} frames, scrub-back {} frames",
            self.bounds.delay_frames,
            self.bounds.scrub_back_frames
        );
        Ok(())
    }

    /// Stop capture, tear down the store and cut off pending playback completions.
    fn shut_down_run(&mut self) {
        self.stop_camera();
        lock_store(&self.store).teardown();

        // Replacing the sink expires every weak handle held by the old store
        let (sink, events) = EventSink::channel();
        self.sink = sink;
        self.events = events;

        self.coalescer.reset();
        self.navigation = None;
        self.displayed = None;
        self.live_frame_in_flight = false;
        self.capture_start = None;
        self.bump_timers();
    }

    fn stop_camera(&mut self) {
        if !self.camera.is_capturing() {
            return;
        }
        if let Err(e) = self.camera.stop_capture() {
            log::warn!("Camera stop failed: {e}");
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
        self.bump_timers();
    }

    fn bump_timers(&mut self) {
        self.timer_generation += 1;
    }

    fn invalid(&self, action: &str) -> SessionError {
        SessionError::InvalidState {
            state: self.phase,
            action: action.into(),
        }
    }

    /// Window guard shared by every transition that needs recorded material
    fn has_material(&self) -> bool {
        self.window().is_some()
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Pause button: Live → Paused (async finalize), Looping → PausedScrub.
    pub fn pause(&mut self) -> Result<Transition, SessionError> {
        if !self.has_material() {
            log::debug!("Pause ignored: {} frames recorded", self.ledger.count());
            return Ok(Transition::NotReady);
        }
        match self.phase {
            SessionPhase::Live => {}
            SessionPhase::Pausing => return Ok(Transition::Unchanged),
            SessionPhase::Paused => return Ok(self.stop_loop()),
            _ => return Err(self.invalid("pause")),
        }

        let Some(window) = self.bounds.window(self.ledger.count()) else {
            return Ok(Transition::NotReady);
        };
        self.set_phase(SessionPhase::Pausing);
        log::info!("Pausing at {} frames, finalizing store", self.ledger.count());

        // The window only moves forward, so nothing before today's low is needed
        let done = deliver(&self.sink, SessionEvent::Finalized);
        lock_store(&self.store).finalize(window.low, done);
        Ok(Transition::Applied)
    }

    fn stop_loop(&mut self) -> Transition {
        let Some(nav) = self.navigation.as_mut() else {
            return Transition::Unchanged;
        };
        match nav.stop_loop() {
            Some(index) => {
                self.bump_timers();
                self.request_seek(index);
                Transition::Applied
            }
            None => Transition::Unchanged,
        }
    }

    /// Play button: cyclic playback over the scrub window or staged clip.
    pub fn play_loop(&mut self) -> Result<Transition, SessionError> {
        if !self.has_material() {
            return Ok(Transition::NotReady);
        }
        if self.phase != SessionPhase::Paused {
            return Err(self.invalid("loop"));
        }
        let Some(nav) = self.navigation.as_mut() else {
            return Ok(Transition::NotReady);
        };
        if nav.is_looping() {
            return Ok(Transition::Unchanged);
        }
        let first = nav.start_loop();
        self.bump_timers();
        self.request_seek(first);
        Ok(Transition::Applied)
    }

    /// Move the scrubber. While editing a clip this moves the playhead instead.
    /// Returns the frame requested, or `None` when navigation is unavailable.
    pub fn scrub_to(&mut self, index: FrameIndex) -> Option<FrameIndex> {
        if self.phase != SessionPhase::Paused {
            return None;
        }
        let nav = self.navigation.as_mut()?;
        let was_looping = nav.is_looping();
        let target = nav.tap(index);
        if was_looping {
            self.bump_timers();
        }
        self.request_seek(target);
        Some(target)
    }

    /// Edit button: stage a clip over the whole scrub window.
    pub fn enter_clip(&mut self) -> Result<Transition, SessionError> {
        if !self.has_material() {
            return Ok(Transition::NotReady);
        }
        if self.phase != SessionPhase::Paused {
            return Err(self.invalid("edit clip"));
        }
        let Some(nav) = self.navigation.as_mut() else {
            return Ok(Transition::NotReady);
        };
        if nav.clip().is_some() {
            return Ok(Transition::Unchanged);
        }
        let Some(playhead) = nav.enter_clip() else {
            log::debug!("Scrub window too short for a clip");
            return Ok(Transition::NotReady);
        };
        // A running loop switches to the clip range on its next tick
        if !nav.is_looping() {
            self.request_seek(playhead);
        }
        Ok(Transition::Applied)
    }

    fn clip_mut(&mut self, action: &str) -> Result<&mut ClipRange, SessionError> {
        self.navigation
            .as_mut()
            .and_then(Navigation::clip_mut)
            .ok_or_else(|| SessionError::NotEditing { action: action.into() })
    }

    /// Drag a clip handle; the displayed frame follows the handle.
    pub fn drag_clip(&mut self, handle: ClipHandle, position: FrameIndex) -> Result<FrameIndex, SessionError> {
        let target = self.clip_mut("drag")?.drag(handle, position);
        self.request_seek(target);
        Ok(target)
    }

    pub fn drag_clip_start(&mut self, position: FrameIndex) -> Result<FrameIndex, SessionError> {
        self.drag_clip(ClipHandle::Start, position)
    }

    pub fn drag_clip_end(&mut self, position: FrameIndex) -> Result<FrameIndex, SessionError> {
        self.drag_clip(ClipHandle::End, position)
    }

    pub fn drag_playhead(&mut self, position: FrameIndex) -> Result<FrameIndex, SessionError> {
        self.drag_clip(ClipHandle::Playhead, position)
    }

    pub fn tap_timeline(&mut self, position: FrameIndex) -> Result<FrameIndex, SessionError> {
        let target = self.clip_mut("tap")?.tap(position);
        self.request_seek(target);
        Ok(target)
    }

    /// Discard the staged clip and return to plain scrubbing.
    pub fn cancel_clip(&mut self) -> Result<(), SessionError> {
        self.clip_mut("cancel")?;
        let Some(nav) = self.navigation.as_mut() else {
            return Ok(());
        };
        nav.cancel_clip();
        if !nav.is_looping() {
            let scrubber = nav.scrubber();
            self.request_seek(scrubber);
        }
        Ok(())
    }

    /// Export the staged clip and return to scrubbing at its end frame.
    /// The export keeps running regardless of what the session does next.
    pub fn confirm_export(&mut self) -> Result<Uuid, SessionError> {
        let clip = *self.clip_mut("export")?;
        clip.validate()?;

        let Some(nav) = self.navigation.as_mut() else {
            return Err(SessionError::NotEditing { action: "export".into() });
        };
        let was_looping = nav.is_looping();
        nav.take_clip_for_export();
        let scrubber = nav.scrubber();

        let request = ExportRequest {
            id: Uuid::new_v4(),
            start: clip.start(),
            end: clip.end(),
            transform: self.config.export_transform(),
        };
        log::info!("Exporting clip {}..={} ({} frames)", request.start, request.end, clip.len_frames() + 1);
        self.exports_in_flight.push(request.id);

        let id = request.id;
        let done = deliver(&self.export_sink, move |result: Result<PathBuf, FrameStoreError>| {
            SessionEvent::ExportDone { id, result }
        });
        lock_store(&self.store).export(request, done);

        if was_looping {
            self.bump_timers();
        }
        self.request_seek(scrubber);
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    /// Timer the host should run now, if any.
    pub fn active_timer(&self) -> Option<TimerSchedule> {
        let (kind, interval) = match self.phase {
            SessionPhase::Countdown => (TimerKind::Countdown, COUNTDOWN_INTERVAL),
            SessionPhase::Live => (TimerKind::LiveRender, self.config.frame_interval()),
            SessionPhase::Paused if self.navigation.as_ref().is_some_and(Navigation::is_looping) => {
                (TimerKind::LoopAdvance, self.config.frame_interval())
            }
            _ => return None,
        };
        Some(TimerSchedule {
            token: TimerToken { kind, generation: self.timer_generation },
            interval,
        })
    }

    /// Handle one timer tick. Returns `false` for a stale token.
    pub fn fire_timer(&mut self, token: TimerToken) -> bool {
        let current = self.active_timer().map(|t| t.token);
        if current != Some(token) {
            log::debug!("Ignoring stale {:?} tick", token.kind);
            return false;
        }
        match token.kind {
            TimerKind::Countdown => self.countdown_tick(),
            TimerKind::LiveRender => self.live_tick(),
            TimerKind::LoopAdvance => self.loop_tick(),
        }
        true
    }

    fn countdown_tick(&mut self) {
        self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
        if self.countdown_remaining > 0 {
            return;
        }
        if let Err(e) = self.begin_live() {
            log::error!("Could not start capture: {e}");
            self.last_error = Some(e.to_string());
            self.set_phase(SessionPhase::Idle);
        }
    }

    fn live_tick(&mut self) {
        // One decode at a time; a slow decoder skips ticks instead of queueing them
        if self.live_frame_in_flight {
            return;
        }
        let Some(index) = self.bounds.live_point(self.ledger.count()) else {
            return;
        };
        self.live_frame_in_flight = true;
        let done = deliver(&self.sink, move |frame: Option<FrameBuffer>| SessionEvent::LiveFrame { index, frame });
        lock_store(&self.store).pixel_at(index, done);
    }

    fn loop_tick(&mut self) {
        let Some(step) = self.navigation.as_mut().and_then(Navigation::advance_loop) else {
            return;
        };
        if step.wrapped {
            log::debug!("Loop wrapped to frame {}", step.index);
        }
        self.request_seek(step.index);
    }

    // -------------------------------------------------------------------------
    // Seeks and completions
    // -------------------------------------------------------------------------

    fn request_seek(&mut self, index: FrameIndex) {
        let next = self.coalescer.request(index);
        self.dispatch_seeks(next);
    }

    /// Issue seeks until one is actually in flight in the store.
    fn dispatch_seeks(&mut self, mut next: Option<FrameIndex>) {
        while let Some(index) = next {
            let mut store = lock_store(&self.store);
            match store.time_for(index) {
                Some(time) => {
                    let done = deliver(&self.sink, move |frame: Option<FrameBuffer>| SessionEvent::SeekDone { index, frame });
                    store.seek(index, time, done);
                    return;
                }
                None => {
                    drop(store);
                    log::warn!("Seek to frame {index} missed: not in the recording");
                    next = self.coalescer.complete(SeekOutcome::Missed);
                }
            }
        }
    }

    /// Apply every completion that has arrived. Call from the owner's thread.
    pub fn pump_events(&mut self) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let Some(notice) = self.apply(event) {
                notices.push(notice);
            }
        }
        while let Ok(event) = self.export_events.try_recv() {
            if let Some(notice) = self.apply(event) {
                notices.push(notice);
            }
        }
        notices
    }

    fn apply(&mut self, event: SessionEvent) -> Option<SessionNotice> {
        match event {
            SessionEvent::Finalized(result) => self.on_finalized(result),
            SessionEvent::LiveFrame { index, frame } => {
                self.live_frame_in_flight = false;
                if self.phase == SessionPhase::Live {
                    if let Some(frame) = frame {
                        self.displayed = Some(DisplayedFrame { index, frame });
                    }
                }
                None
            }
            SessionEvent::SeekDone { index, frame } => {
                self.on_seek_done(index, frame);
                None
            }
            SessionEvent::ExportDone { id, result } => Some(self.on_export_done(id, result)),
        }
    }

    fn on_finalized(&mut self, result: Result<FinalizedAsset, FrameStoreError>) -> Option<SessionNotice> {
        if self.phase != SessionPhase::Pausing {
            log::debug!("Finalize completed outside Pausing; ignored");
            return None;
        }
        let asset = match result {
            Ok(asset) => asset,
            Err(e) => return Some(self.finalize_failed(e.to_string())),
        };

        // Frames may have landed while the store was finalizing; read the ledger now
        self.ledger.freeze();
        self.stop_camera();
        let total = self.ledger.count();
        let Some(window) = self.bounds.window(total) else {
            return Some(self.finalize_failed(format!("only {total} frames recorded")));
        };

        log::info!(
            "Paused: {} frames (store {}), window {}..={}",
            total,
            asset.frame_count,
            window.low,
            window.high
        );
        let nav = Navigation::new(window, self.config.min_clip_frames());
        let scrubber = nav.scrubber();
        self.navigation = Some(nav);
        self.set_phase(SessionPhase::Paused);
        self.request_seek(scrubber);
        None
    }

    fn finalize_failed(&mut self, message: String) -> SessionNotice {
        log::warn!("Finalize failed, staying live: {message}");
        self.last_error = Some(message.clone());
        // Back to live: capture may still be running, so a retry is possible
        if self.camera.is_capturing() {
            self.set_phase(SessionPhase::Live);
        } else {
            self.set_phase(SessionPhase::Stopped);
        }
        SessionNotice::FinalizeFailed { message }
    }

    fn on_seek_done(&mut self, index: FrameIndex, frame: Option<FrameBuffer>) {
        if self.coalescer.in_flight() != Some(index) {
            log::debug!("Seek completion for {index} does not match the in-flight seek");
            return;
        }
        let outcome = match frame {
            Some(frame) => {
                if self.phase == SessionPhase::Paused {
                    self.displayed = Some(DisplayedFrame { index, frame });
                }
                SeekOutcome::Completed
            }
            None => {
                log::warn!("Seek to frame {index} returned no image");
                SeekOutcome::Missed
            }
        };
        let next = self.coalescer.complete(outcome);
        self.dispatch_seeks(next);
    }

    fn on_export_done(&mut self, id: Uuid, result: Result<PathBuf, FrameStoreError>) -> SessionNotice {
        self.exports_in_flight.retain(|pending| *pending != id);
        let result = result.map_err(|e| e.to_string());
        self.last_export = Some(match &result {
            Ok(path) => {
                log::info!("Export {id} finished: {}", path.display());
                ExportStatus::Completed { id, path: path.clone() }
            }
            Err(message) => {
                log::warn!("Export {id} failed: {message}");
                ExportStatus::Failed { id, message: message.clone() }
            }
        });
        SessionNotice::ExportFinished { id, result }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Release the capture callback, which holds the store and ledger
        self.stop_camera();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capture::{CameraFeed, CapturedFrame, StubCamera};
    use crate::core::frame_store::{ExportCallback, FinalizeCallback, FrameCallback};
    use std::env::temp_dir;

    fn test_config(name: &str) -> MirrorConfig {
        MirrorConfig {
            countdown_seconds: 0,
            export_dir: temp_dir().join(name),
            ..Default::default()
        }
    }

    fn frame() -> CapturedFrame {
        CapturedFrame::from_buffer(FrameBuffer::solid(1, 1, 10, 20, 30, 255), 0.0)
    }

    fn push(feed: &CameraFeed, n: u64) {
        for _ in 0..n {
            assert!(feed.push(frame()));
        }
    }

    fn live_session(name: &str) -> (Session, CameraFeed) {
        let camera = StubCamera::new();
        let feed = camera.feed();
        let mut session = Session::with_memory_store(test_config(name), Box::new(camera)).unwrap();
        session.start().unwrap();
        (session, feed)
    }

    /// 1210 frames recorded (live point 1000), then paused and settled.
    fn paused_session(name: &str) -> (Session, CameraFeed) {
        let (mut session, feed) = live_session(name);
        push(&feed, 1210);
        assert_eq!(session.pause().unwrap(), Transition::Applied);
        assert!(session.pump_events().is_empty());
        assert_eq!(session.phase(), SessionPhase::Paused);
        (session, feed)
    }

    /// Pump until every export has reported; exports finish on a writer thread.
    fn pump_until_exported(session: &mut Session) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        for _ in 0..1000 {
            notices.extend(session.pump_events());
            if session.status().exports_in_flight == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        notices
    }

    #[derive(Default)]
    struct Script {
        fail_finalize: bool,
        miss_seeks: bool,
        hold_finalize: bool,
        held_finalize: Option<(FrameIndex, FinalizeCallback)>,
        hold_exports: bool,
        held_exports: Vec<ExportCallback>,
        export_threads: Vec<std::thread::ThreadId>,
    }

    /// Memory store whose completions the test can fail or hold back.
    struct ScriptedStore {
        inner: MemoryFrameStore,
        script: Arc<Mutex<Script>>,
    }

    impl FrameStore for ScriptedStore {
        fn append(&mut self, frame: CapturedFrame) -> bool {
            self.inner.append(frame)
        }

        fn count(&self) -> u64 {
            self.inner.count()
        }

        fn finalize(&mut self, retain_from: FrameIndex, done: FinalizeCallback) {
            let mut script = self.script.lock().unwrap();
            if script.fail_finalize {
                return done(Err(FrameStoreError::Backend("disk full".into())));
            }
            if script.hold_finalize {
                script.held_finalize = Some((retain_from, done));
                return;
            }
            drop(script);
            self.inner.finalize(retain_from, done)
        }

        fn time_for(&self, index: FrameIndex) -> Option<Duration> {
            if self.script.lock().unwrap().miss_seeks {
                return None;
            }
            self.inner.time_for(index)
        }

        fn pixel_at(&mut self, index: FrameIndex, done: FrameCallback) {
            self.inner.pixel_at(index, done)
        }

        fn seek(&mut self, index: FrameIndex, time: Duration, done: FrameCallback) {
            self.inner.seek(index, time, done)
        }

        fn export(&mut self, request: ExportRequest, done: ExportCallback) {
            let mut script = self.script.lock().unwrap();
            if script.hold_exports {
                script.held_exports.push(done);
                return;
            }
            drop(script);
            let script = self.script.clone();
            self.inner.export(
                request,
                Box::new(move |result| {
                    script.lock().unwrap().export_threads.push(std::thread::current().id());
                    done(result)
                }),
            )
        }

        fn teardown(&mut self) {
            self.inner.teardown()
        }
    }

    fn scripted_session(name: &str) -> (Session, CameraFeed, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(Script::default()));
        let shared = script.clone();
        let factory: StoreFactory = Box::new(move |config: &MirrorConfig| {
            Box::new(ScriptedStore {
                inner: MemoryFrameStore::new(
                    config.retention_frames(),
                    config.frame_rate as f64,
                    config.export_dir.clone(),
                ),
                script: shared.clone(),
            }) as Box<dyn FrameStore>
        });
        let camera = StubCamera::new();
        let feed = camera.feed();
        let mut session = Session::new(test_config(name), Box::new(camera), factory).unwrap();
        session.start().unwrap();
        (session, feed, script)
    }

    #[test]
    fn test_pause_not_ready_until_delay_passes() {
        let (mut session, feed) = live_session("delaymirror_test_not_ready");
        push(&feed, 209);
        assert_eq!(session.pause().unwrap(), Transition::NotReady);
        assert_eq!(session.status().frames_until_live, 2);

        push(&feed, 1);
        assert_eq!(session.pause().unwrap(), Transition::NotReady);
        assert_eq!(session.phase(), SessionPhase::Live);

        push(&feed, 1);
        assert_eq!(session.status().frames_until_live, 0);
        assert_eq!(session.window(), Some(Window { live_point: 1, low: 0, high: 1 }));
        assert_eq!(session.pause().unwrap(), Transition::Applied);
    }

    #[test]
    fn test_pause_freezes_window() {
        let (session, feed) = paused_session("delaymirror_test_pause");
        assert_eq!(session.window(), Some(Window { live_point: 1000, low: 100, high: 1000 }));
        assert_eq!(session.scrubber(), Some(999));
        assert_eq!(session.mode(), Some(PlaybackMode::PausedScrub));
        assert_eq!(session.displayed().map(|d| d.index), Some(999));

        // Capture stopped with the pause
        assert!(!feed.push(frame()));
        assert_eq!(session.total_frames(), 1210);
        assert!(session.ledger().is_frozen());
    }

    #[test]
    fn test_frames_during_finalize_are_dropped() {
        let (mut session, feed) = live_session("delaymirror_test_dropped");
        push(&feed, 1210);
        session.pause().unwrap();
        assert_eq!(session.phase(), SessionPhase::Pausing);
        assert_eq!(session.pause().unwrap(), Transition::Unchanged);

        // Camera still attached but the store no longer ingests
        push(&feed, 5);
        session.pump_events();
        assert_eq!(session.phase(), SessionPhase::Paused);
        assert_eq!(session.total_frames(), 1210);
        assert_eq!(session.dropped_frames(), 5);
    }

    #[test]
    fn test_scrub_is_clamped_to_window() {
        let (mut session, _feed) = paused_session("delaymirror_test_scrub");
        assert_eq!(session.scrub_to(50), Some(100));
        session.pump_events();
        assert_eq!(session.displayed().map(|d| d.index), Some(100));
        assert_eq!(session.scrub_to(5000), Some(1000));
        assert_eq!(session.scrub_to(400), Some(400));
    }

    #[test]
    fn test_rapid_scrubs_are_coalesced() {
        let (mut session, _feed) = paused_session("delaymirror_test_coalesce");
        let before = session.seek_stats();

        for target in [300, 400, 500, 600] {
            session.scrub_to(target);
        }
        let stats = session.seek_stats();
        assert_eq!(stats.issued - before.issued, 1);
        assert_eq!(stats.superseded - before.superseded, 2);

        session.pump_events();
        let stats = session.seek_stats();
        assert_eq!(stats.issued - before.issued, 2);
        assert_eq!(stats.completed - before.completed, 2);
        assert_eq!(session.displayed().map(|d| d.index), Some(600));
    }

    #[test]
    fn test_loop_wraps_and_stale_ticks_are_ignored() {
        let (mut session, _feed) = paused_session("delaymirror_test_loop");
        assert_eq!(session.play_loop().unwrap(), Transition::Applied);
        assert_eq!(session.play_loop().unwrap(), Transition::Unchanged);
        assert_eq!(session.mode(), Some(PlaybackMode::Looping));
        assert_eq!(session.loop_position(), Some(999));

        let timer = session.active_timer().unwrap();
        assert_eq!(timer.token.kind, TimerKind::LoopAdvance);
        assert_eq!(timer.interval, session.config().frame_interval());

        assert!(session.fire_timer(timer.token));
        assert_eq!(session.loop_position(), Some(100));
        assert!(session.fire_timer(timer.token));
        assert_eq!(session.loop_position(), Some(101));
        session.pump_events();
        assert_eq!(session.displayed().map(|d| d.index), Some(101));

        // Pause while looping parks the scrubber on the loop frame
        assert_eq!(session.pause().unwrap(), Transition::Applied);
        assert_eq!(session.mode(), Some(PlaybackMode::PausedScrub));
        assert_eq!(session.scrubber(), Some(101));
        assert_eq!(session.pause().unwrap(), Transition::Unchanged);

        assert!(!session.fire_timer(timer.token));
        assert_eq!(session.loop_position(), None);
        assert!(session.active_timer().is_none());
    }

    #[test]
    fn test_scrub_ends_loop() {
        let (mut session, _feed) = paused_session("delaymirror_test_scrub_loop");
        session.play_loop().unwrap();
        let timer = session.active_timer().unwrap();
        assert_eq!(session.scrub_to(300), Some(300));
        assert_eq!(session.mode(), Some(PlaybackMode::PausedScrub));
        assert!(!session.fire_timer(timer.token));
    }

    #[test]
    fn test_clip_export_returns_to_scrub_at_clip_end() {
        let (mut session, _feed) = paused_session("delaymirror_test_session_export");
        assert_eq!(session.enter_clip().unwrap(), Transition::Applied);
        assert_eq!(session.enter_clip().unwrap(), Transition::Unchanged);
        assert_eq!(session.mode(), Some(PlaybackMode::ClipEditing));

        let clip = *session.clip().unwrap();
        assert_eq!((clip.start(), clip.end(), clip.playhead()), (100, 1000, 100));

        assert_eq!(session.drag_clip_end(50).unwrap(), 130);
        // Scrub gestures move the playhead while editing
        assert_eq!(session.scrub_to(10), Some(100));

        let id = session.confirm_export().unwrap();
        assert_eq!(session.phase(), SessionPhase::Paused);
        assert_eq!(session.mode(), Some(PlaybackMode::PausedScrub));
        assert_eq!(session.scrubber(), Some(130));
        assert_eq!(session.status().exports_in_flight, 1);

        let notices = pump_until_exported(&mut session);
        assert_eq!(notices.len(), 1);
        let path = match &notices[0] {
            SessionNotice::ExportFinished { id: done, result: Ok(path) } if *done == id => path.clone(),
            other => panic!("unexpected notice {other:?}"),
        };
        assert!(path.exists());
        assert_eq!(session.status().exports_in_flight, 0);
        assert!(matches!(session.last_export(), Some(ExportStatus::Completed { .. })));
        assert_eq!(session.displayed().map(|d| d.index), Some(130));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_clip_gestures_require_editing() {
        let (mut session, _feed) = paused_session("delaymirror_test_not_editing");
        assert!(matches!(session.drag_clip_start(5), Err(SessionError::NotEditing { .. })));
        assert!(matches!(session.tap_timeline(5), Err(SessionError::NotEditing { .. })));
        assert!(matches!(session.confirm_export(), Err(SessionError::NotEditing { .. })));
        assert!(matches!(session.cancel_clip(), Err(SessionError::NotEditing { .. })));

        session.enter_clip().unwrap();
        session.cancel_clip().unwrap();
        assert!(session.clip().is_none());
        assert_eq!(session.mode(), Some(PlaybackMode::PausedScrub));
    }

    #[test]
    fn test_clip_refused_when_window_too_short() {
        let (mut session, feed) = live_session("delaymirror_test_short_clip");
        // Live point 10: the window holds less than one second
        push(&feed, 220);
        session.pause().unwrap();
        session.pump_events();
        assert_eq!(session.enter_clip().unwrap(), Transition::NotReady);
        assert!(session.clip().is_none());
    }

    #[test]
    fn test_loop_runs_over_clip_range() {
        let (mut session, _feed) = paused_session("delaymirror_test_clip_loop");
        session.enter_clip().unwrap();
        assert_eq!(session.drag_clip_start(500).unwrap(), 500);
        assert_eq!(session.drag_clip_end(600).unwrap(), 600);

        session.play_loop().unwrap();
        assert_eq!(session.loop_position(), Some(500));
        let token = session.active_timer().unwrap().token;
        for _ in 0..250 {
            assert!(session.fire_timer(token));
            let position = session.loop_position().unwrap();
            assert!((500..600).contains(&position));
        }
        // Clip stays staged under the loop
        assert!(session.clip().is_some());
    }

    #[test]
    fn test_finalize_failure_returns_to_live() {
        let (mut session, feed, script) = scripted_session("delaymirror_test_finalize_fail");
        push(&feed, 1210);
        script.lock().unwrap().fail_finalize = true;

        assert_eq!(session.pause().unwrap(), Transition::Applied);
        let notices = session.pump_events();
        assert!(matches!(notices.as_slice(), [SessionNotice::FinalizeFailed { .. }]));
        assert_eq!(session.phase(), SessionPhase::Live);
        assert!(session.last_error().is_some());

        // Still recording; a retry succeeds
        push(&feed, 1);
        script.lock().unwrap().fail_finalize = false;
        assert_eq!(session.pause().unwrap(), Transition::Applied);
        session.pump_events();
        assert_eq!(session.phase(), SessionPhase::Paused);
        assert_eq!(session.window().map(|w| w.live_point), Some(1001));
    }

    #[test]
    fn test_window_recomputed_after_slow_finalize() {
        let (mut session, feed, script) = scripted_session("delaymirror_test_slow_finalize");
        push(&feed, 1210);
        script.lock().unwrap().hold_finalize = true;

        session.pause().unwrap();
        push(&feed, 30);
        assert_eq!(session.phase(), SessionPhase::Pausing);
        assert!(session.pump_events().is_empty());

        let (retain_from, done) = {
            let mut script = script.lock().unwrap();
            script.hold_finalize = false;
            script.held_finalize.take().unwrap()
        };
        assert_eq!(retain_from, 100);
        lock_store(&session.store).finalize(retain_from, done);

        session.pump_events();
        assert_eq!(session.phase(), SessionPhase::Paused);
        assert_eq!(session.total_frames(), 1240);
        assert_eq!(session.window(), Some(Window { live_point: 1030, low: 130, high: 1030 }));
        assert_eq!(session.displayed().map(|d| d.index), Some(1029));
    }

    #[test]
    fn test_export_survives_restart() {
        let (mut session, feed, script) = scripted_session("delaymirror_test_restart_export");
        push(&feed, 1210);
        session.pause().unwrap();
        session.pump_events();

        script.lock().unwrap().hold_exports = true;
        session.enter_clip().unwrap();
        let id = session.confirm_export().unwrap();
        session.restart().unwrap();
        assert_eq!(session.phase(), SessionPhase::Live);
        assert_eq!(session.status().exports_in_flight, 1);

        let done = script.lock().unwrap().held_exports.pop().unwrap();
        let path = PathBuf::from("restart.mirrorclip");
        done(Ok(path.clone()));

        let notices = session.pump_events();
        assert_eq!(notices, vec![SessionNotice::ExportFinished { id, result: Ok(path.clone()) }]);
        assert_eq!(session.last_export(), Some(&ExportStatus::Completed { id, path }));
        assert_eq!(session.status().exports_in_flight, 0);
    }

    #[test]
    fn test_confirm_export_does_not_wait_for_writer() {
        let (mut session, feed, script) = scripted_session("delaymirror_test_export_async");
        push(&feed, 1210);
        session.pause().unwrap();
        session.pump_events();

        session.enter_clip().unwrap();
        let id = session.confirm_export().unwrap();
        let notices = pump_until_exported(&mut session);
        assert!(matches!(
            notices.as_slice(),
            [SessionNotice::ExportFinished { id: done, result: Ok(_) }] if *done == id
        ));

        // The completion ran on the writer thread, not inside confirm_export
        let threads = script.lock().unwrap().export_threads.clone();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());

        if let Some(ExportStatus::Completed { path, .. }) = session.last_export() {
            std::fs::remove_file(path).ok();
        }
    }

    #[test]
    fn test_seek_miss_drains_pending_target() {
        let (mut session, feed, script) = scripted_session("delaymirror_test_seek_miss");
        push(&feed, 1210);
        session.pause().unwrap();
        session.pump_events();
        let before = session.seek_stats();

        // Nothing in flight: the miss clears the seek straight away
        script.lock().unwrap().miss_seeks = true;
        assert_eq!(session.scrub_to(300), Some(300));
        assert!(!session.coalescer.is_in_flight());
        assert_eq!(session.seek_stats().missed - before.missed, 1);
        assert_eq!(session.displayed().map(|d| d.index), Some(999));

        // Pending target behind a real seek misses once that seek completes
        script.lock().unwrap().miss_seeks = false;
        session.scrub_to(400);
        script.lock().unwrap().miss_seeks = true;
        session.scrub_to(500);
        assert_eq!(session.coalescer.pending(), Some(500));
        session.pump_events();
        assert!(!session.coalescer.is_in_flight());
        assert_eq!(session.coalescer.pending(), None);
        let stats = session.seek_stats();
        assert_eq!(stats.issued - before.issued, 3);
        assert_eq!(stats.missed - before.missed, 2);
        assert_eq!(session.displayed().map(|d| d.index), Some(400));

        // Next request goes out immediately
        script.lock().unwrap().miss_seeks = false;
        session.scrub_to(600);
        session.pump_events();
        assert_eq!(session.displayed().map(|d| d.index), Some(600));
    }

    #[test]
    fn test_export_completion_after_stop_is_ignored() {
        let (mut session, feed, script) = scripted_session("delaymirror_test_late_export");
        push(&feed, 1210);
        session.pause().unwrap();
        session.pump_events();

        script.lock().unwrap().hold_exports = true;
        session.enter_clip().unwrap();
        session.confirm_export().unwrap();
        session.stop().unwrap();
        assert_eq!(session.phase(), SessionPhase::Stopped);

        let done = script.lock().unwrap().held_exports.pop().unwrap();
        done(Ok(PathBuf::from("late.mirrorclip")));
        assert!(session.pump_events().is_empty());
        assert!(session.last_export().is_none());
    }

    #[test]
    fn test_restart_clears_recording() {
        let (mut session, feed) = paused_session("delaymirror_test_restart");
        session.restart().unwrap();
        assert_eq!(session.phase(), SessionPhase::Live);
        assert_eq!(session.total_frames(), 0);
        assert_eq!(session.window(), None);
        assert_eq!(session.scrubber(), None);
        assert!(session.displayed().is_none());

        push(&feed, 211);
        assert_eq!(session.window().map(|w| w.live_point), Some(1));
        assert_eq!(session.dropped_frames(), 0);
    }

    #[test]
    fn test_countdown_then_live() {
        let camera = StubCamera::new();
        let feed = camera.feed();
        let config = MirrorConfig {
            countdown_seconds: 3,
            ..test_config("delaymirror_test_countdown")
        };
        let mut session = Session::with_memory_store(config, Box::new(camera)).unwrap();
        session.start().unwrap();
        assert_eq!(session.phase(), SessionPhase::Countdown);
        assert_eq!(session.status().countdown_remaining, Some(3));
        assert!(!feed.push(frame()));

        let timer = session.active_timer().unwrap();
        assert_eq!(timer.token.kind, TimerKind::Countdown);
        assert_eq!(timer.interval, Duration::from_secs(1));
        assert!(session.fire_timer(timer.token));
        assert!(session.fire_timer(timer.token));
        assert_eq!(session.status().countdown_remaining, Some(1));
        assert!(session.fire_timer(timer.token));

        assert_eq!(session.phase(), SessionPhase::Live);
        assert!(!session.fire_timer(timer.token));
        assert_eq!(session.active_timer().unwrap().token.kind, TimerKind::LiveRender);
        assert!(feed.push(frame()));
    }

    #[test]
    fn test_live_tick_shows_live_point() {
        let (mut session, feed) = live_session("delaymirror_test_live_tick");
        let token = session.active_timer().unwrap().token;

        push(&feed, 100);
        assert!(session.fire_timer(token));
        session.pump_events();
        assert!(session.displayed().is_none());

        push(&feed, 200);
        assert!(session.fire_timer(token));
        session.pump_events();
        assert_eq!(session.displayed().map(|d| d.index), Some(90));
    }

    #[test]
    fn test_invalid_transitions() {
        let camera = StubCamera::new();
        let mut session =
            Session::with_memory_store(test_config("delaymirror_test_invalid"), Box::new(camera)).unwrap();
        assert!(matches!(session.stop(), Err(SessionError::InvalidState { state: SessionPhase::Idle, .. })));
        assert_eq!(session.pause().unwrap(), Transition::NotReady);

        session.start().unwrap();
        assert!(matches!(session.start(), Err(SessionError::InvalidState { .. })));
        assert_eq!(session.scrub_to(10), None);

        session.stop().unwrap();
        assert!(matches!(session.start(), Err(SessionError::InvalidState { .. })));
        assert!(matches!(session.restart(), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn test_live_rejects_paused_gestures() {
        let (mut session, feed) = live_session("delaymirror_test_live_gestures");
        push(&feed, 300);
        assert!(matches!(
            session.play_loop(),
            Err(SessionError::InvalidState { state: SessionPhase::Live, .. })
        ));
        assert!(matches!(session.enter_clip(), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MirrorConfig { frame_rate: 0, ..test_config("delaymirror_test_bad_config") };
        let result = Session::with_memory_store(config, Box::new(StubCamera::new()));
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let (session, _feed) = paused_session("delaymirror_test_status");
        let json = serde_json::to_string(&session.status()).unwrap();
        assert!(json.contains("\"phase\":\"paused\""));
        assert!(json.contains("\"mode\":\"pausedScrub\""));
        assert!(json.contains("\"totalFrames\":1210"));
    }
}
