use anyhow::{Context, Result};
use image::{imageops, ImageFormat, RgbImage};
use std::io::Cursor;
use std::time::Instant;

use crate::PixelBox;

/// One captured camera image. Shared read-only between the capture thread and
/// the detection loop.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Capture counter, starts at 1 for each acquisition run.
    pub seq: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self { image, seq, captured_at: Instant::now() }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn crop(&self, b: &PixelBox) -> RgbImage {
        imageops::crop_imm(&self.image, b.xmin, b.ymin, b.width(), b.height()).to_image()
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buf, ImageFormat::Png)
            .context("encode frame png")?;
        Ok(buf.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn crop_matches_box() {
        let mut img = RgbImage::new(8, 6);
        img.put_pixel(3, 2, Rgb([255, 0, 0]));
        let frame = Frame::new(img, 1);
        let crop = frame.crop(&PixelBox { xmin: 3, ymin: 2, xmax: 7, ymax: 5 });
        assert_eq!(crop.dimensions(), (4, 3));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn png_roundtrips_dimensions() {
        let frame = Frame::new(RgbImage::new(16, 9), 7);
        let png = frame.encode_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 9));
    }
}
