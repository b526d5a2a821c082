//! Hub error types
//!
//! Error types for broadcast hub commands. Each one is reported back to the
//! client that issued the command as an `ERROR: <message>` reply.

use crate::error::DeviceError;

/// Error type for hub operations
#[derive(Debug, Clone, PartialEq)]
pub enum HubError {
    /// Resolution string is not `WxH` with positive dimensions
    InvalidResolution(String),
    /// Frame rate must be positive
    InvalidFps,
    /// The capture pipeline is held by a running stream
    DeviceUnavailable,
    /// Capture device failure
    Device(DeviceError),
    /// Recording could not be started or finalized
    Recording(String),
    /// Playback command failed
    Playback(String),
    /// Another controller is connected
    ControllerTaken,
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::InvalidResolution(res) => write!(f, "invalid resolution {:?}", res),
            HubError::InvalidFps => write!(f, "fps must be positive"),
            HubError::DeviceUnavailable => write!(f, "capture device unavailable"),
            HubError::Device(e) => write!(f, "{}", e),
            HubError::Recording(msg) => write!(f, "recording failed: {}", msg),
            HubError::Playback(msg) => write!(f, "playback failed: {}", msg),
            HubError::ControllerTaken => write!(f, "controller already connected"),
        }
    }
}

impl std::error::Error for HubError {}

impl From<DeviceError> for HubError {
    fn from(e: DeviceError) -> Self {
        HubError::Device(e)
    }
}
