//! Recording and playback
//!
//! This module provides:
//! - The on-disk recording layout and directory listing
//! - An append-only recorder for live frames
//! - Timed playback of finished recordings

pub mod format;
pub mod playback;
pub mod record;

pub use format::{list_recordings, resolve_recording, RecordingHeader, RecordingInfo};
pub use playback::{scheduled_delay, FrameCallback, PlaybackReader, PlaybackState};
pub use record::{RecordLog, RecordingSummary};
