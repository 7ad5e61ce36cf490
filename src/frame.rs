//! Decoded video frames.
//!
//! A `Frame` owns tightly packed RGB24 pixels plus its position in the session
//! (index and elapsed time). Sources build frames; detectors read the pixels;
//! the renderer turns them into an image.

use std::time::Duration;

use anyhow::{anyhow, Result};
use image::RgbImage;

pub struct Frame {
    /// RGB24, row-major, `width * height * 3` bytes.
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 0-based position within the session.
    pub index: u64,
    /// Time since the session started.
    pub elapsed: Duration,
}

impl Frame {
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        index: u64,
        elapsed: Duration,
    ) -> Result<Self> {
        let expected = rgb_len(width, height);
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {} has {} bytes, expected {} for {}x{} rgb",
                index,
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
            elapsed,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Convert without copying.
    pub fn into_image(self) -> Result<RgbImage> {
        let index = self.index;
        RgbImage::from_raw(self.width, self.height, self.pixels)
            .ok_or_else(|| anyhow!("frame {} does not fit its dimensions", index))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("index", &self.index)
            .field("elapsed", &self.elapsed)
            .finish_non_exhaustive()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_pixel_length() {
        let err = Frame::new(vec![0u8; 10], 2, 2, 0, Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("expected 12"));
    }

    #[test]
    fn converts_to_image() -> Result<()> {
        let mut pixels = vec![0u8; 2 * 2 * 3];
        pixels[3] = 255;
        let frame = Frame::new(pixels, 2, 2, 7, Duration::from_millis(70))?;
        let image = frame.into_image()?;
        assert_eq!(image.get_pixel(1, 0)[0], 255);
        assert_eq!(image.get_pixel(0, 0)[0], 0);
        Ok(())
    }
}
