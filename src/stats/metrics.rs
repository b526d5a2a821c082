//! Statistics for sessions and the broadcast hub

use std::time::Duration;

use crate::media::PlaybackState;

/// Session-level statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames accepted into the outbound queue
    pub frames_enqueued: u64,
    /// Frames written to the socket
    pub frames_written: u64,
    /// Frames evicted by the drop-oldest rule
    pub frames_dropped: u64,
    /// Control replies written to the socket
    pub replies_written: u64,
    /// Time since the session was created
    pub duration: Duration,
}

impl SessionStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of enqueued frames that were dropped
    pub fn drop_ratio(&self) -> f64 {
        if self.frames_enqueued == 0 {
            0.0
        } else {
            self.frames_dropped as f64 / self.frames_enqueued as f64
        }
    }
}

/// Capture loop counters for the current or last stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames rendered and broadcast
    pub frames_captured: u64,
    /// Empty frames skipped
    pub frames_skipped: u64,
    /// Device errors observed
    pub capture_errors: u64,
    /// Time the stream has been running
    pub duration: Duration,
}

impl CaptureStats {
    /// Rendered frames per second over the stream's lifetime
    pub fn measured_fps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_captured as f64 / secs
        } else {
            0.0
        }
    }
}

/// Broadcast hub snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct HubStats {
    /// Whether the capture loop is running
    pub streaming: bool,
    /// Live registered viewers (including the controller)
    pub viewer_count: usize,
    /// Whether a controller is connected
    pub has_controller: bool,
    /// Whether a recording is open
    pub recording: bool,
    /// Playback state
    pub playback_state: PlaybackState,
    /// Capture loop counters
    pub capture: CaptureStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_new() {
        let stats = SessionStats::new();
        assert_eq!(stats.frames_enqueued, 0);
        assert_eq!(stats.frames_written, 0);
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(stats.drop_ratio(), 0.0);
    }

    #[test]
    fn test_session_stats_drop_ratio() {
        let stats = SessionStats {
            frames_enqueued: 40,
            frames_dropped: 10,
            ..Default::default()
        };
        assert_eq!(stats.drop_ratio(), 0.25);
    }

    #[test]
    fn test_capture_stats_measured_fps() {
        let stats = CaptureStats {
            frames_captured: 50,
            duration: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(stats.measured_fps(), 10.0);

        // Zero duration yields zero rather than dividing by zero
        assert_eq!(CaptureStats::default().measured_fps(), 0.0);
    }
}
