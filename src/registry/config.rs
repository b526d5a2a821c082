//! Broadcast hub configuration

use std::path::PathBuf;

use super::frame::Resolution;
use crate::capture::DEFAULT_RAMP;

/// Default recordings directory, relative to the working directory
pub const DEFAULT_RECORDINGS_DIR: &str = "recordings";

/// Configuration for the broadcast hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Character ramp installed on the renderer when a stream starts
    pub ramp: String,

    /// Device resolution as a multiple of the text grid size
    pub oversample: u32,

    /// Where recordings are written and looked up for playback
    pub recordings_dir: PathBuf,

    /// Grid size used when a `config` command omits the resolution
    pub default_resolution: Resolution,

    /// Largest grid a `config` command may request
    pub max_resolution: Resolution,

    /// Frame rate used when a `config` command omits it
    pub default_fps: u32,

    /// Consecutive capture errors tolerated before the loop gives up
    pub max_consecutive_failures: u32,

    /// Frames each viewer may have queued before the oldest is dropped
    pub viewer_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ramp: DEFAULT_RAMP.to_string(),
            oversample: 2,
            recordings_dir: PathBuf::from(DEFAULT_RECORDINGS_DIR),
            default_resolution: Resolution::default(),
            max_resolution: Resolution::new(320, 240),
            default_fps: 10,
            max_consecutive_failures: 5,
            viewer_queue_capacity: 10,
        }
    }
}

impl HubConfig {
    /// Set the character ramp (ignored when empty)
    pub fn ramp(mut self, ramp: impl Into<String>) -> Self {
        let ramp = ramp.into();
        if !ramp.is_empty() {
            self.ramp = ramp;
        }
        self
    }

    /// Set the oversampling factor (minimum 1)
    pub fn oversample(mut self, factor: u32) -> Self {
        self.oversample = factor.max(1);
        self
    }

    /// Set the recordings directory
    pub fn recordings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recordings_dir = dir.into();
        self
    }

    /// Set the fallback grid size
    pub fn default_resolution(mut self, resolution: Resolution) -> Self {
        self.default_resolution = resolution;
        self
    }

    /// Set the largest accepted grid size (minimum 1x1)
    pub fn max_resolution(mut self, resolution: Resolution) -> Self {
        self.max_resolution = Resolution::new(resolution.width.max(1), resolution.height.max(1));
        self
    }

    /// Set the fallback frame rate (minimum 1)
    pub fn default_fps(mut self, fps: u32) -> Self {
        self.default_fps = fps.max(1);
        self
    }

    /// Set how many consecutive capture errors end the stream (minimum 1)
    pub fn max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    /// Set the per-viewer queue capacity (minimum 1)
    pub fn viewer_queue_capacity(mut self, capacity: usize) -> Self {
        self.viewer_queue_capacity = capacity.max(1);
        self
    }
}
