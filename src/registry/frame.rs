//! Broadcast frame types
//!
//! This module defines the text frames fanned out to viewers and the grid
//! size a stream is rendered at.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use super::error::HubError;
use crate::error::FormatError;

/// Text grid size in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Columns
    pub width: u32,
    /// Rows
    pub height: u32,
}

impl Resolution {
    /// Create a resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Multiply both dimensions
    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            width: self.width.saturating_mul(factor),
            height: self.height.saturating_mul(factor),
        }
    }

    /// Whether neither dimension exceeds `max`
    pub fn fits_within(&self, max: Resolution) -> bool {
        self.width <= max.width && self.height <= max.height
    }

    /// Cells in the grid
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(120, 90)
    }
}

impl FromStr for Resolution {
    type Err = HubError;

    /// Parse `"WxH"`, both positive integers
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HubError::InvalidResolution(s.to_string());

        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;

        if width == 0 || height == 0 {
            return Err(invalid());
        }

        Ok(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A rendered text frame
///
/// Cheap to clone: every viewer queue holding the same frame shares one
/// reference-counted buffer. The contents are always valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFrame {
    data: Bytes,
}

impl TextFrame {
    /// Create a frame from rendered text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(text.into()),
        }
    }

    /// Wrap a buffer, rejecting invalid UTF-8
    pub fn from_utf8(data: Bytes) -> Result<Self, FormatError> {
        std::str::from_utf8(&data).map_err(|_| FormatError::InvalidUtf8)?;
        Ok(Self { data })
    }

    /// Frame text
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.data).unwrap_or_default()
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame has no content
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<String> for TextFrame {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for TextFrame {
    fn from(text: &str) -> Self {
        Self::new(text.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        let res: Resolution = "120x90".parse().unwrap();
        assert_eq!(res, Resolution::new(120, 90));
        assert_eq!(res.to_string(), "120x90");
        assert_eq!(res.scaled(2), Resolution::new(240, 180));

        assert_eq!("80X60".parse::<Resolution>().unwrap(), Resolution::new(80, 60));
    }

    #[test]
    fn test_resolution_parse_invalid() {
        for input in ["", "120", "x90", "120x", "0x90", "-1x5", "axb", "120x90x3"] {
            assert!(
                matches!(input.parse::<Resolution>(), Err(HubError::InvalidResolution(_))),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_resolution_bounds() {
        let max = Resolution::new(320, 240);
        assert!(Resolution::new(120, 90).fits_within(max));
        assert!(Resolution::new(320, 240).fits_within(max));
        assert!(!Resolution::new(321, 10).fits_within(max));
        assert!(!Resolution::new(10, 241).fits_within(max));

        let huge: Resolution = "40000x40000".parse().unwrap();
        assert!(!huge.fits_within(max));
        assert_eq!(huge.area(), 1_600_000_000);
        assert_eq!(
            Resolution::new(u32::MAX, u32::MAX).area(),
            u64::from(u32::MAX) * u64::from(u32::MAX)
        );
    }

    #[test]
    fn test_text_frame_shares_buffer() {
        let frame = TextFrame::new("ab\ncd\n");
        let copy = frame.clone();

        assert_eq!(copy.as_str(), "ab\ncd\n");
        assert_eq!(frame.as_bytes().as_ptr(), copy.as_bytes().as_ptr());
        assert_eq!(frame.len(), 6);
    }

    #[test]
    fn test_text_frame_rejects_invalid_utf8() {
        let bad = Bytes::from_static(&[0xff, 0xfe]);
        assert_eq!(TextFrame::from_utf8(bad), Err(FormatError::InvalidUtf8));

        let good = Bytes::from_static("héllo".as_bytes());
        assert_eq!(TextFrame::from_utf8(good).unwrap().as_str(), "héllo");
    }
}
