//! Capture collaborators
//!
//! The broadcast hub consumes two external capabilities: a frame source and a
//! renderer that turns frames into text. Both are traits so the hub can be
//! driven by test doubles.

pub mod device;
pub mod renderer;
pub mod scripted;

pub use device::{CaptureDevice, DeviceInfo, Image, PixelFormat, TestPatternDevice};
pub use renderer::{AsciiRenderer, FrameRenderer, DEFAULT_RAMP};
pub use scripted::{DeviceMonitor, LabelRenderer, ScriptStep, ScriptedDevice};
