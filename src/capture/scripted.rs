//! Deterministic capture doubles
//!
//! [`ScriptedDevice`] plays back a fixed sequence of frames, empty frames and
//! errors, and reports what was done to it through a shared [`DeviceMonitor`]
//! that stays readable after the device has been handed to the hub.
//! [`LabelRenderer`] renders each frame as a short label instead of a
//! picture, so assertions can name the frame that was delivered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::device::{CaptureDevice, DeviceInfo, Image};
use super::renderer::FrameRenderer;
use crate::error::DeviceError;

/// One scripted capture result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// A 1x1 frame whose single pixel holds this value
    Frame(u8),
    /// An empty frame
    Empty,
    /// A read error
    Fail(String),
    /// The read panics with this message
    Panic(String),
}

/// Observations of a [`ScriptedDevice`]
#[derive(Debug, Default)]
pub struct DeviceMonitor {
    opens: AtomicU32,
    closes: AtomicU32,
    captures: AtomicU32,
    open: AtomicBool,
    resolution: Mutex<Option<(u32, u32)>>,
    ramp: Mutex<Option<String>>,
}

impl DeviceMonitor {
    /// Successful opens
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Closes of an open device
    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Calls to `capture_frame`
    pub fn captures(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    /// Whether the device is currently open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Last requested capture size
    pub fn resolution(&self) -> Option<(u32, u32)> {
        *self.resolution.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Last ramp installed on a [`LabelRenderer`] sharing this monitor
    pub fn ramp(&self) -> Option<String> {
        self.ramp.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Capture device driven by a script
///
/// Once the script runs out, every read yields `Frame(0)`.
#[derive(Debug)]
pub struct ScriptedDevice {
    script: VecDeque<ScriptStep>,
    open_error: Option<DeviceError>,
    monitor: Arc<DeviceMonitor>,
}

impl ScriptedDevice {
    /// Create a device that plays `script`
    pub fn new(script: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: script.into_iter().collect(),
            open_error: None,
            monitor: Arc::new(DeviceMonitor::default()),
        }
    }

    /// Make every `open` fail with `error`
    pub fn failing_open(mut self, error: DeviceError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Shared observation handle
    pub fn monitor(&self) -> Arc<DeviceMonitor> {
        Arc::clone(&self.monitor)
    }
}

impl CaptureDevice for ScriptedDevice {
    fn open(&mut self, index: u32) -> Result<(), DeviceError> {
        if let Some(e) = &self.open_error {
            return Err(e.clone());
        }
        if index != 0 {
            return Err(DeviceError::NotFound(index));
        }
        if self.monitor.open.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::OpenFailed("already open".into()));
        }
        self.monitor.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if !self.is_available() {
            return Err(DeviceError::NotOpen);
        }
        *self.monitor.resolution.lock().unwrap_or_else(|p| p.into_inner()) = Some((width, height));
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Option<Image>, DeviceError> {
        if !self.is_available() {
            return Err(DeviceError::NotOpen);
        }
        self.monitor.captures.fetch_add(1, Ordering::SeqCst);

        match self.script.pop_front().unwrap_or(ScriptStep::Frame(0)) {
            ScriptStep::Frame(value) => Ok(Some(Image::gray(1, 1, vec![value]))),
            ScriptStep::Empty => Ok(None),
            ScriptStep::Fail(msg) => Err(DeviceError::ReadFailed(msg)),
            ScriptStep::Panic(msg) => panic!("{}", msg),
        }
    }

    fn close(&mut self) {
        if self.monitor.open.swap(false, Ordering::SeqCst) {
            self.monitor.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_available(&self) -> bool {
        self.monitor.is_open()
    }

    fn list_devices(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            index: 0,
            name: "Scripted".to_string(),
        }]
    }
}

/// Renders `frame <pixel> <width>x<height>`
#[derive(Debug, Default)]
pub struct LabelRenderer {
    monitor: Option<Arc<DeviceMonitor>>,
}

impl LabelRenderer {
    /// Create a renderer that records its ramp on `monitor`
    pub fn with_monitor(monitor: Arc<DeviceMonitor>) -> Self {
        Self { monitor: Some(monitor) }
    }
}

impl FrameRenderer for LabelRenderer {
    fn render(&self, image: &Image, width: u32, height: u32) -> String {
        let pixel = image.data.first().copied().unwrap_or(0);
        format!("frame {} {}x{}", pixel, width, height)
    }

    fn set_ramp(&mut self, ramp: &str) {
        if let Some(monitor) = &self.monitor {
            *monitor.ramp.lock().unwrap_or_else(|p| p.into_inner()) = Some(ramp.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_playback() {
        let mut device = ScriptedDevice::new([
            ScriptStep::Frame(7),
            ScriptStep::Empty,
            ScriptStep::Fail("unplugged".into()),
        ]);
        let monitor = device.monitor();

        assert_eq!(device.capture_frame(), Err(DeviceError::NotOpen));
        device.open(0).unwrap();
        device.set_resolution(240, 180).unwrap();
        assert_eq!(monitor.resolution(), Some((240, 180)));

        assert_eq!(device.capture_frame().unwrap(), Some(Image::gray(1, 1, vec![7])));
        assert_eq!(device.capture_frame().unwrap(), None);
        assert_eq!(
            device.capture_frame(),
            Err(DeviceError::ReadFailed("unplugged".into()))
        );
        assert_eq!(device.capture_frame().unwrap(), Some(Image::gray(1, 1, vec![0])));

        device.close();
        device.close();
        assert_eq!(monitor.opens(), 1);
        assert_eq!(monitor.closes(), 1);
        assert_eq!(monitor.captures(), 4);
    }

    #[test]
    fn test_script_panic_step() {
        let mut device = ScriptedDevice::new([ScriptStep::Panic("driver crashed".into())]);
        device.open(0).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            device.capture_frame()
        }));
        assert!(result.is_err());
        assert_eq!(device.capture_frame().unwrap(), Some(Image::gray(1, 1, vec![0])));
    }

    #[test]
    fn test_double_open_rejected() {
        let mut device = ScriptedDevice::new([]);
        device.open(0).unwrap();
        assert!(matches!(device.open(0), Err(DeviceError::OpenFailed(_))));
        assert_eq!(device.open(3), Err(DeviceError::NotFound(3)));
    }

    #[test]
    fn test_label_renderer() {
        let monitor = Arc::new(DeviceMonitor::default());
        let mut renderer = LabelRenderer::with_monitor(Arc::clone(&monitor));

        renderer.set_ramp("@. ");
        assert_eq!(monitor.ramp().as_deref(), Some("@. "));
        assert_eq!(
            renderer.render(&Image::gray(1, 1, vec![9]), 120, 90),
            "frame 9 120x90"
        );
    }
}
