//! Application messages
//!
//! Clients send JSON objects tagged by `type`:
//!
//! ```text
//! {"type":"auth","api_key":"...","role":"controller"}
//! {"type":"config","camera_index":0,"resolution":"120x90","fps":10}
//! {"type":"playback_speed","speed":2.0}
//! ```
//!
//! The server answers with bare text replies such as `CONFIG_APPLIED` or
//! `ERROR: <message>`. Frames are sent as raw text and are not wrapped.

use std::fmt;

use serde::Deserialize;

use crate::session::Role;

/// Client to server message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present the API key and request a role
    Auth {
        api_key: String,
        #[serde(default)]
        role: Role,
    },
    /// Start streaming with the given settings
    Config {
        #[serde(default)]
        camera_index: u32,
        #[serde(default)]
        resolution: Option<String>,
        #[serde(default)]
        fps: Option<u32>,
    },
    /// Stop streaming
    Stop,
    /// Start recording the live stream
    RecordStart,
    /// Finish the recording
    RecordStop,
    /// Play a recording back to this session
    PlaybackStart { filename: String },
    /// Pause playback
    PlaybackPause,
    /// Resume playback
    PlaybackResume,
    /// Stop playback
    PlaybackStop,
    /// Change the playback speed multiplier
    PlaybackSpeed { speed: f64 },
}

impl ClientMessage {
    /// Parse a text frame; `None` for malformed JSON or an unknown `type`
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(error = %e, "Unparseable client message");
                None
            }
        }
    }

    /// Whether only the controller may send this message
    pub fn requires_controller(&self) -> bool {
        matches!(
            self,
            ClientMessage::Config { .. }
                | ClientMessage::Stop
                | ClientMessage::RecordStart
                | ClientMessage::RecordStop
        )
    }

    /// Message type name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => "auth",
            ClientMessage::Config { .. } => "config",
            ClientMessage::Stop => "stop",
            ClientMessage::RecordStart => "record_start",
            ClientMessage::RecordStop => "record_stop",
            ClientMessage::PlaybackStart { .. } => "playback_start",
            ClientMessage::PlaybackPause => "playback_pause",
            ClientMessage::PlaybackResume => "playback_resume",
            ClientMessage::PlaybackStop => "playback_stop",
            ClientMessage::PlaybackSpeed { .. } => "playback_speed",
        }
    }
}

/// Server to client reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    AuthFailed,
    AuthControllerSuccess,
    AuthViewerSuccess,
    StreamActive,
    StreamInactive,
    ConfigApplied,
    StreamStopped,
    RecordingStarted,
    RecordingStopped,
    PlaybackStarted,
    PlaybackPaused,
    PlaybackResumed,
    PlaybackStopped,
    PlaybackSpeedChanged,
    UnknownCommand,
    /// `ERROR: <message>`
    Error(String),
}

impl Reply {
    /// Stream status announcement
    pub fn status(streaming: bool) -> Self {
        if streaming {
            Reply::StreamActive
        } else {
            Reply::StreamInactive
        }
    }

    /// Error reply carrying `err`'s message
    pub fn error(err: impl fmt::Display) -> Self {
        Reply::Error(err.to_string())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Reply::AuthFailed => "AUTH_FAILED",
            Reply::AuthControllerSuccess => "AUTH_CONTROLLER_SUCCESS",
            Reply::AuthViewerSuccess => "AUTH_VIEWER_SUCCESS",
            Reply::StreamActive => "STREAM_ACTIVE",
            Reply::StreamInactive => "STREAM_INACTIVE",
            Reply::ConfigApplied => "CONFIG_APPLIED",
            Reply::StreamStopped => "STREAM_STOPPED",
            Reply::RecordingStarted => "RECORDING_STARTED",
            Reply::RecordingStopped => "RECORDING_STOPPED",
            Reply::PlaybackStarted => "PLAYBACK_STARTED",
            Reply::PlaybackPaused => "PLAYBACK_PAUSED",
            Reply::PlaybackResumed => "PLAYBACK_RESUMED",
            Reply::PlaybackStopped => "PLAYBACK_STOPPED",
            Reply::PlaybackSpeedChanged => "PLAYBACK_SPEED_CHANGED",
            Reply::UnknownCommand => "UNKNOWN_COMMAND",
            Reply::Error(msg) => return write!(f, "ERROR: {}", msg),
        };
        f.write_str(text)
    }
}

impl From<Reply> for String {
    fn from(reply: Reply) -> Self {
        reply.to_string()
    }
}
