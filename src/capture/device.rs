//! Capture device abstraction
//!
//! The hub only needs four capabilities from a source: open by index, set the
//! target size, read one frame, close. Physical backends implement
//! [`CaptureDevice`]; [`TestPatternDevice`] is a synthetic source usable
//! without camera hardware.

use std::fmt;

use crate::error::DeviceError;

/// Pixel layout of an [`Image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One byte per pixel
    Gray,
    /// Three bytes per pixel, R G B
    Rgb,
}

impl PixelFormat {
    /// Bytes used by a single pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb => 3,
        }
    }
}

/// A captured image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Raw pixel data, row-major
    pub data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: PixelFormat,
}

impl Image {
    /// Create a grayscale image
    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            data,
            width,
            height,
            format: PixelFormat::Gray,
        }
    }

    /// Create an RGB image
    pub fn rgb(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            data,
            width,
            height,
            format: PixelFormat::Rgb,
        }
    }

    /// An image with no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Luminance (0-255) of the pixel at `(x, y)`
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let bpp = self.format.bytes_per_pixel();
        let Some(offset) = (y as usize)
            .checked_mul(self.width as usize)
            .and_then(|row| row.checked_add(x as usize))
            .and_then(|px| px.checked_mul(bpp))
        else {
            return 0;
        };

        match self.format {
            PixelFormat::Gray => self.data.get(offset).copied().unwrap_or(0),
            PixelFormat::Rgb => match self.data.get(offset..offset + 3) {
                Some(px) => {
                    let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                    ((299 * r + 587 * g + 114 * b) / 1000) as u8
                }
                None => 0,
            },
        }
    }
}

/// An enumerated capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Index passed to [`CaptureDevice::open`]
    pub index: u32,
    /// Human-readable name
    pub name: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.name)
    }
}

/// A frame source
///
/// Implementations are driven from a single owner at a time: the hub while
/// idle, the capture loop while streaming. Calls may block; the hub runs
/// [`capture_frame`](CaptureDevice::capture_frame) on the blocking pool.
pub trait CaptureDevice: Send + 'static {
    /// Open the device at `index`
    fn open(&mut self, index: u32) -> Result<(), DeviceError>;

    /// Request a capture size in pixels
    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), DeviceError>;

    /// Read one frame
    ///
    /// `Ok(None)` means the device produced an empty frame; the caller skips it.
    fn capture_frame(&mut self) -> Result<Option<Image>, DeviceError>;

    /// Close the device. Closing an already closed device is a no-op.
    fn close(&mut self);

    /// Whether the device is open and producing frames
    fn is_available(&self) -> bool;

    /// Enumerate the devices this backend can open
    fn list_devices(&self) -> Vec<DeviceInfo>;
}

/// Largest frame the test pattern will synthesize
pub const MAX_PATTERN_PIXELS: u64 = 4096 * 4096;

/// Synthetic source producing a moving diagonal gradient
#[derive(Debug)]
pub struct TestPatternDevice {
    open: bool,
    width: u32,
    height: u32,
    tick: u32,
}

impl TestPatternDevice {
    /// Create a closed test pattern device
    pub fn new() -> Self {
        Self {
            open: false,
            width: 640,
            height: 480,
            tick: 0,
        }
    }
}

impl Default for TestPatternDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for TestPatternDevice {
    fn open(&mut self, index: u32) -> Result<(), DeviceError> {
        if index != 0 {
            return Err(DeviceError::NotFound(index));
        }
        self.open = true;
        self.tick = 0;
        Ok(())
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        let (width, height) = (width.max(1), height.max(1));
        if u64::from(width) * u64::from(height) > MAX_PATTERN_PIXELS {
            return Err(DeviceError::UnsupportedResolution { width, height });
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Option<Image>, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }

        let (w, h) = (self.width, self.height);
        let pixels = usize::try_from(u64::from(w) * u64::from(h))
            .map_err(|_| DeviceError::UnsupportedResolution { width: w, height: h })?;
        let span = (u64::from(w) + u64::from(h)).max(1);
        let tick = u64::from(self.tick);
        let mut data = Vec::with_capacity(pixels);
        for y in 0..u64::from(h) {
            for x in 0..u64::from(w) {
                let v = ((x + y + tick) % span) * 255 / span;
                data.push(v as u8);
            }
        }
        self.tick = self.tick.wrapping_add(4);

        Ok(Some(Image::gray(w, h, data)))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_available(&self) -> bool {
        self.open
    }

    fn list_devices(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            index: 0,
            name: "Test pattern".to_string(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_rgb() {
        let img = Image::rgb(2, 1, vec![255, 255, 255, 0, 0, 0]);
        assert_eq!(img.luma(0, 0), 255);
        assert_eq!(img.luma(1, 0), 0);
        // Out of range reads are black rather than panicking
        assert_eq!(img.luma(5, 5), 0);
        assert_eq!(img.luma(u32::MAX, u32::MAX), 0);
    }

    #[test]
    fn test_image_empty() {
        assert!(Image::gray(0, 0, vec![]).is_empty());
        assert!(!Image::gray(1, 1, vec![7]).is_empty());
    }

    #[test]
    fn test_pattern_lifecycle() {
        let mut dev = TestPatternDevice::new();
        assert!(!dev.is_available());
        assert_eq!(dev.capture_frame(), Err(DeviceError::NotOpen));

        assert_eq!(dev.open(1), Err(DeviceError::NotFound(1)));
        dev.open(0).unwrap();
        dev.set_resolution(8, 4).unwrap();

        let frame = dev.capture_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.data.len(), 32);

        dev.close();
        assert!(!dev.is_available());
    }

    #[test]
    fn test_pattern_rejects_oversized_frames() {
        let mut dev = TestPatternDevice::new();
        dev.open(0).unwrap();

        assert_eq!(
            dev.set_resolution(80_000, 80_000),
            Err(DeviceError::UnsupportedResolution {
                width: 80_000,
                height: 80_000
            })
        );
        assert_eq!(
            dev.set_resolution(u32::MAX, u32::MAX),
            Err(DeviceError::UnsupportedResolution {
                width: u32::MAX,
                height: u32::MAX
            })
        );

        // The previous size is kept
        let frame = dev.capture_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (640, 480));
        assert_eq!(frame.data.len(), 640 * 480);
    }

    #[test]
    fn test_pattern_lists_one_device() {
        let dev = TestPatternDevice::new();
        let devices = dev.list_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].to_string(), "[0] Test pattern");
    }
}
