//! Image to text rendering
//!
//! A renderer turns an [`Image`] into a fixed-size character grid. Each cell
//! covers a rectangle of source pixels; the cell's average luminance picks a
//! character from the ramp, darkest first.

use super::device::Image;

/// Ramp applied when a stream starts
pub const DEFAULT_RAMP: &str = "@%#*+=-:. ";

/// Converts images into text grids
pub trait FrameRenderer: Send + 'static {
    /// Render `image` as `width` columns by `height` rows, rows joined by `\n`
    fn render(&self, image: &Image, width: u32, height: u32) -> String;

    /// Replace the character ramp (darkest first)
    fn set_ramp(&mut self, ramp: &str);
}

/// Luminance ramp renderer
#[derive(Debug, Clone)]
pub struct AsciiRenderer {
    ramp: Vec<char>,
}

impl AsciiRenderer {
    /// Create a renderer with [`DEFAULT_RAMP`]
    pub fn new() -> Self {
        Self {
            ramp: DEFAULT_RAMP.chars().collect(),
        }
    }

    /// Current ramp
    pub fn ramp(&self) -> String {
        self.ramp.iter().collect()
    }

    fn cell_luma(image: &Image, x0: u32, x1: u32, y0: u32, y1: u32) -> u8 {
        let mut sum = 0u64;
        let mut count = 0u64;
        for y in y0..y1 {
            for x in x0..x1 {
                sum += image.luma(x, y) as u64;
                count += 1;
            }
        }
        if count == 0 {
            0
        } else {
            (sum / count) as u8
        }
    }
}

impl Default for AsciiRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRenderer for AsciiRenderer {
    fn render(&self, image: &Image, width: u32, height: u32) -> String {
        if image.is_empty() || width == 0 || height == 0 || self.ramp.is_empty() {
            return String::new();
        }

        let cells = (u64::from(width) + 1) * u64::from(height);
        let mut out = String::with_capacity(usize::try_from(cells.min(MAX_PREALLOC)).unwrap_or(0));
        let last = self.ramp.len() - 1;

        for row in 0..height {
            let y0 = cell_edge(row, height, image.height);
            let y1 = cell_edge(row.saturating_add(1), height, image.height).max(y0 + 1);
            for col in 0..width {
                let x0 = cell_edge(col, width, image.width);
                let x1 = cell_edge(col.saturating_add(1), width, image.width).max(x0 + 1);
                let luma = Self::cell_luma(image, x0, x1.min(image.width), y0, y1.min(image.height));
                out.push(self.ramp[luma as usize * last / 255]);
            }
            out.push('\n');
        }

        out
    }

    fn set_ramp(&mut self, ramp: &str) {
        if !ramp.is_empty() {
            self.ramp = ramp.chars().collect();
        }
    }
}

/// Upper bound on the output buffer reserved up front
const MAX_PREALLOC: u64 = 1 << 20;

/// First pixel covered by cell `index` of `cells` over `pixels`
fn cell_edge(index: u32, cells: u32, pixels: u32) -> u32 {
    let edge = u64::from(index) * u64::from(pixels) / u64::from(cells);
    u32::try_from(edge).unwrap_or(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_dimensions() {
        let renderer = AsciiRenderer::new();
        let img = Image::gray(8, 4, vec![128; 32]);

        let text = renderer.render(&img, 4, 2);
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.chars().count() == 4));
    }

    #[test]
    fn test_render_extremes() {
        let renderer = AsciiRenderer::new();

        let black = Image::gray(2, 2, vec![0; 4]);
        assert_eq!(renderer.render(&black, 2, 1), "@@\n");

        let white = Image::gray(2, 2, vec![255; 4]);
        assert_eq!(renderer.render(&white, 2, 1), "  \n");
    }

    #[test]
    fn test_render_upsamples_small_images() {
        let renderer = AsciiRenderer::new();
        let img = Image::gray(1, 1, vec![0]);
        assert_eq!(renderer.render(&img, 3, 2), "@@@\n@@@\n");
    }

    #[test]
    fn test_render_large_source_image() {
        // Index products exceed u32 for a 70000 pixel wide source
        let renderer = AsciiRenderer::new();
        let img = Image::gray(70_000, 1, vec![0; 70_000]);
        assert_eq!(renderer.render(&img, 70_000, 1).chars().count(), 70_001);
        assert_eq!(cell_edge(69_999, 70_000, 70_000), 69_999);
    }

    #[test]
    fn test_render_empty_image() {
        let renderer = AsciiRenderer::new();
        assert_eq!(renderer.render(&Image::gray(0, 0, vec![]), 4, 4), "");
    }

    #[test]
    fn test_set_ramp() {
        let mut renderer = AsciiRenderer::new();
        renderer.set_ramp("#.");
        assert_eq!(renderer.ramp(), "#.");

        let img = Image::gray(2, 1, vec![0, 255]);
        assert_eq!(renderer.render(&img, 2, 1), "#.\n");

        // Empty ramps are ignored
        renderer.set_ramp("");
        assert_eq!(renderer.ramp(), "#.");
    }
}
