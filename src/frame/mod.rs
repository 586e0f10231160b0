//! Frame ownership layer.
//!
//! A `Frame` is an immutable pixel buffer handed over by the capture collaborator.
//!
//! - The buffer is private and read-only once constructed. There is no `Clone`.
//! - The decimator either drops a frame or moves it downstream.
//! - Fan-out to the video writer and the detection worker happens through
//!   `Arc<Frame>`, so both consumers read the same bytes and neither can mutate them.
//! - Pixel memory is zeroized on drop to limit how long captured imagery lingers.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::Instant;
use zeroize::Zeroize;

mod normalize;

pub use normalize::PixelLayout;

/// Immutable captured frame.
pub struct Frame {
    /// Private pixel data in `layout` order.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,

    /// Monotonic arrival instant, used for decimation and session timing.
    pub captured_at: Instant,
}

// Explicitly NOT implementing Clone. Ownership moves; sharing goes through Arc.

impl Frame {
    /// Wrap a captured buffer. Fails if the byte length does not match the layout.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        captured_at: Instant,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = layout.byte_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                layout,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
            captured_at,
        })
    }

    /// Convenience constructor for packed RGB frames.
    pub fn rgb(data: Vec<u8>, width: u32, height: u32, captured_at: Instant) -> Result<Self> {
        Self::new(data, width, height, PixelLayout::Rgb24, captured_at)
    }

    /// Read-only view of the pixel buffer.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Packed rgb24 copy of this frame, converting from the capture layout when needed.
    pub fn to_rgb(&self) -> Result<Vec<u8>> {
        normalize::normalize_to_rgb(&self.data, self.width, self.height, self.layout)
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let rgb = self.to_rgb()?;
        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow!("rgb buffer does not fit {}x{}", self.width, self.height))
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is never printed.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_length_mismatch() {
        let err = Frame::rgb(vec![0u8; 10], 2, 2, Instant::now()).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(Frame::rgb(Vec::new(), 0, 4, Instant::now()).is_err());
    }

    #[test]
    fn bgra_frame_converts_to_rgb_image() -> Result<()> {
        let frame = Frame::new(
            vec![10, 20, 30, 255, 40, 50, 60, 255],
            2,
            1,
            PixelLayout::Bgra32,
            Instant::now(),
        )?;
        let img = frame.to_rgb_image()?;
        assert_eq!(img.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(img.get_pixel(1, 0).0, [60, 50, 40]);
        Ok(())
    }

    #[test]
    fn debug_output_hides_pixels() -> Result<()> {
        let frame = Frame::rgb(vec![7u8; 12], 2, 2, Instant::now())?;
        let printed = format!("{:?}", frame);
        assert!(printed.contains("bytes: 12"));
        assert!(!printed.contains("[7"));
        Ok(())
    }
}
