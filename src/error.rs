//! Error types
//!
//! Device and format failures are returned to the caller as values; they never
//! tear down the hub or other sessions.

use std::fmt;
use std::io;

use tokio_tungstenite::tungstenite;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Filesystem or socket I/O failure
    Io(io::Error),
    /// WebSocket transport failure
    WebSocket(tungstenite::Error),
    /// Capture device failure
    Device(DeviceError),
    /// Malformed recording file
    Format(FormatError),
    /// Operation not valid in the current state
    InvalidState(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::Device(e) => write!(f, "Device error: {}", e),
            Error::Format(e) => write!(f, "Format error: {}", e),
            Error::InvalidState(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Device(e) => Some(e),
            Error::Format(e) => Some(e),
            Error::InvalidState(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        Error::Device(e)
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}

/// Capture device errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No device at the requested index
    NotFound(u32),
    /// Device exists but could not be opened
    OpenFailed(String),
    /// Operation requires an open device
    NotOpen,
    /// Reading a frame failed
    ReadFailed(String),
    /// Requested size exceeds what the device can produce
    UnsupportedResolution { width: u32, height: u32 },
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound(index) => write!(f, "Capture device {} not found", index),
            DeviceError::OpenFailed(msg) => write!(f, "Failed to open capture device: {}", msg),
            DeviceError::NotOpen => write!(f, "Capture device is not open"),
            DeviceError::ReadFailed(msg) => write!(f, "Failed to read frame: {}", msg),
            DeviceError::UnsupportedResolution { width, height } => {
                write!(f, "Unsupported capture resolution {}x{}", width, height)
            }
        }
    }
}

impl std::error::Error for DeviceError {}

/// Recording file format errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// First line is not the recording tag
    BadTag(String),
    /// Metadata section ended before the `frames:` marker
    MissingFramesMarker,
    /// A `frame:<ms>:<len>` line could not be parsed
    BadFrameHeader(String),
    /// Payload shorter than its declared length
    Truncated { expected: usize, available: usize },
    /// Payload is not valid UTF-8
    InvalidUtf8,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BadTag(tag) => write!(f, "Invalid recording tag: {:?}", tag),
            FormatError::MissingFramesMarker => write!(f, "Missing frames marker"),
            FormatError::BadFrameHeader(line) => write!(f, "Invalid frame header: {:?}", line),
            FormatError::Truncated {
                expected,
                available,
            } => write!(
                f,
                "Truncated frame payload: expected {} bytes, {} available",
                expected, available
            ),
            FormatError::InvalidUtf8 => write!(f, "Frame payload is not valid UTF-8"),
        }
    }
}

impl std::error::Error for FormatError {}
