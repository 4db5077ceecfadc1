//! Mirror session settings.
//!
//! Stored as camelCase JSON:
//! ```text
//! <config_dir>/delaymirror/config.json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::capture::CaptureConfig;
use super::frame_store::{ExportTransform, Rotation};
use super::window::WindowSpec;

/// Extra frames the in-memory store keeps past delay + scrub-back
const RETENTION_SLACK_SECONDS: f64 = 2.0;

/// Upper bound for any configured duration
const MAX_DURATION_SECONDS: f64 = 24.0 * 60.0 * 60.0;

/// Upper bound for the frame rate
const MAX_FRAME_RATE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirrorConfig {
    /// Capture and playback rate
    pub frame_rate: u32,
    /// How far behind real time the mirror plays
    pub delay_seconds: f64,
    /// How far back from the live point a paused session can scrub
    pub scrub_back_seconds: f64,
    /// Shortest exportable clip
    pub min_clip_seconds: f64,
    /// Seconds counted down before capture starts (0 = none)
    pub countdown_seconds: u32,
    /// Flip exported clips horizontally (front camera)
    pub mirrored: bool,
    pub rotation: Rotation,
    pub export_dir: PathBuf,
    pub capture_width: u32,
    pub capture_height: u32,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            delay_seconds: 7.0,
            scrub_back_seconds: 30.0,
            min_clip_seconds: 1.0,
            countdown_seconds: 3,
            mirrored: true,
            rotation: Rotation::None,
            export_dir: default_export_dir(),
            capture_width: 1280,
            capture_height: 720,
        }
    }
}

/// Config errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorConfig {
    fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds * self.frame_rate as f64).round() as u64
    }

    pub fn delay_frames(&self) -> u64 {
        self.seconds_to_frames(self.delay_seconds)
    }

    pub fn scrub_back_frames(&self) -> u64 {
        self.seconds_to_frames(self.scrub_back_seconds)
    }

    pub fn min_clip_frames(&self) -> u64 {
        self.seconds_to_frames(self.min_clip_seconds).max(1)
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec::new(self.delay_frames(), self.scrub_back_frames())
    }

    /// Interval of the live and loop ticks
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }

    /// Frames the in-memory store keeps while ingesting
    pub fn retention_frames(&self) -> usize {
        let slack = self.seconds_to_frames(RETENTION_SLACK_SECONDS);
        let frames = self
            .delay_frames()
            .saturating_add(self.scrub_back_frames())
            .saturating_add(slack);
        usize::try_from(frames).unwrap_or(usize::MAX)
    }

    pub fn export_transform(&self) -> ExportTransform {
        ExportTransform {
            mirrored: self.mirrored,
            rotation: self.rotation,
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_fps: self.frame_rate,
            width: self.capture_width,
            height: self.capture_height,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return Err(ConfigError::Invalid {
                field: "frameRate",
                reason: format!("must be between 1 and {MAX_FRAME_RATE}"),
            });
        }
        let durations = [
            ("delaySeconds", self.delay_seconds),
            ("scrubBackSeconds", self.scrub_back_seconds),
            ("minClipSeconds", self.min_clip_seconds),
        ];
        for (field, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is not a non-negative duration"),
                });
            }
            if value > MAX_DURATION_SECONDS {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value}s is longer than {MAX_DURATION_SECONDS}s"),
                });
            }
        }
        if self.scrub_back_frames() < self.min_clip_frames() {
            return Err(ConfigError::Invalid {
                field: "scrubBackSeconds",
                reason: format!(
                    "{}s cannot hold a {}s clip",
                    self.scrub_back_seconds, self.min_clip_seconds
                ),
            });
        }
        Ok(())
    }

    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".config"))
            .join("delaymirror")
            .join("config.json")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: MirrorConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or defaults when the file does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn default_export_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join("Videos"))
        .join("DelayMirror")
}
