mod error;
pub mod camera;
pub mod frame;
pub mod gesture;
pub mod labels;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod spatial;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use image::RgbImage;

pub use error::{ConfigError, LayoutError};
pub use frame::Frame;

/// Pixel-space bounding box, inclusive-exclusive like the slicing used for crops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl PixelBox {
    /// Converts a detector box (`[ymin, xmin, ymax, xmax]`, normalized 0..1) into
    /// frame pixels. The top/left edge is kept at least one pixel in, the
    /// bottom/right edge is clamped to the frame. Degenerate boxes are rejected.
    pub fn from_normalized(b: [f32; 4], frame_w: u32, frame_h: u32) -> Option<Self> {
        let (w, h) = (frame_w as f32, frame_h as f32);
        let ymin = (b[0] * h).max(1.0) as i64;
        let xmin = (b[1] * w).max(1.0) as i64;
        let ymax = (b[2] * h).min(h) as i64;
        let xmax = (b[3] * w).min(w) as i64;
        if xmax <= xmin || ymax <= ymin {
            return None;
        }
        Some(Self {
            xmin: xmin as u32,
            ymin: ymin as u32,
            xmax: xmax as u32,
            ymax: ymax as u32,
        })
    }

    pub fn width(&self) -> u32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> u32 {
        self.ymax - self.ymin
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.xmin as f64 + 0.5 * self.width() as f64,
            self.ymin as f64 + 0.5 * self.height() as f64,
        )
    }
}

/// Detector output for one frame as parallel arrays.
#[derive(Debug, Clone, Default)]
pub struct RawDetections {
    // normalized 0..1, [ymin, xmin, ymax, xmax]
    pub boxes: Vec<[f32; 4]>,
    pub classes: Vec<usize>,
    pub scores: Vec<f32>,
}

impl RawDetections {
    /// Number of complete (box, class, score) triples.
    pub fn len(&self) -> usize {
        self.boxes.len().min(self.classes.len()).min(self.scores.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<RawDetections>;
}

/// Finds at most one hand in a person crop and returns its landmarks in crop pixels.
pub trait HandLandmarker: Send {
    fn landmarks(&mut self, crop: &RgbImage) -> Result<Option<Vec<[f32; 2]>>>;
}

/// Maps a preprocessed landmark vector to a gesture label index.
pub trait GestureClassifier: Send {
    fn classify(&mut self, features: &[f32]) -> Result<usize>;
}

pub(crate) fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_box_clamps_to_frame() {
        let b = PixelBox::from_normalized([0.0, 0.0, 1.2, 1.0], 640, 360).unwrap();
        assert_eq!(b, PixelBox { xmin: 1, ymin: 1, xmax: 640, ymax: 360 });
        assert_eq!(b.width(), 639);
    }

    #[test]
    fn pixel_box_truncates_and_centers() {
        let b = PixelBox::from_normalized([0.25, 0.5, 0.75, 0.75], 640, 360).unwrap();
        assert_eq!(b, PixelBox { xmin: 320, ymin: 90, xmax: 480, ymax: 270 });
        assert_eq!(b.center(), (400.0, 180.0));
    }

    #[test]
    fn degenerate_boxes_are_rejected() {
        assert!(PixelBox::from_normalized([0.5, 0.5, 0.5, 0.9], 640, 360).is_none());
        assert!(PixelBox::from_normalized([0.1, 0.6, 0.9, 0.2], 640, 360).is_none());
    }

    #[test]
    fn raw_detections_len_is_shortest_column() {
        let raw = RawDetections {
            boxes: vec![[0.0; 4]; 3],
            classes: vec![0, 1],
            scores: vec![0.9, 0.8, 0.7],
        };
        assert_eq!(raw.len(), 2);
    }
}
