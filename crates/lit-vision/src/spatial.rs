//! Camera geometry and LED mapping.
//!
//! Everything here is a pure function of its inputs so the detection loop can
//! call it per person without shared state.
//!
//! Angles are degrees, positive to the right of the optical axis. Distances
//! are meters, reference widths are inches.

use lit_proto::led::LedRange;
use serde::Deserialize;

use crate::{ConfigError, LayoutError};

pub const METERS_PER_INCH: f64 = 0.0254;

/// Focal length in pixels from image width and horizontal field of view.
pub fn focal_length(pixel_width: u32, hfov_deg: f64) -> f64 {
    pixel_width as f64 / (2.0 * (hfov_deg.to_radians() / 2.0).tan())
}

/// Pinhole distance estimate. `observed_width_px` must be non-zero; the
/// pipeline only passes widths of validated boxes.
pub fn estimate_distance(observed_width_px: f64, focal_length_px: f64, known_width_in: f64) -> f64 {
    (known_width_in * focal_length_px / observed_width_px) * METERS_PER_INCH
}

pub fn horizontal_angle(center_x: f64, frame_width: u32, hfov_deg: f64) -> f64 {
    hfov_deg * (center_x / frame_width as f64 - 0.5)
}

/// Normalized by frame *width*, not height. The LED mapping never reads this
/// value; it is reported for diagnostics only.
pub fn vertical_angle(center_y: f64, frame_width: u32, vfov_deg: f64) -> f64 {
    vfov_deg * (center_y / frame_width as f64 - 0.5)
}

/// `num_sections + 1` equally spaced boundaries over `[-hfov/2, hfov/2]`,
/// most positive first.
pub fn fov_partition(hfov_deg: f64, num_sections: usize) -> Vec<f64> {
    if num_sections == 0 {
        return Vec::new();
    }
    let half = hfov_deg / 2.0;
    let step = hfov_deg / num_sections as f64;
    (0..=num_sections).rev().map(|i| -half + i as f64 * step).collect()
}

/// Range width used by [`led_partition`]: `num_leds / num_sections` rounded
/// half-to-even, never below one.
pub fn led_range_width(num_leds: u32, num_sections: usize) -> u32 {
    ((num_leds as f64 / num_sections as f64).round_ties_even() as u32).max(1)
}

/// Contiguous `[start, end)` ranges covering `[0, num_leds)`.
///
/// The last range keeps the common width even when that runs past
/// `num_leds`; the controller clamps it.
pub fn led_partition(num_leds: u32, num_sections: usize) -> Vec<LedRange> {
    if num_sections == 0 {
        return Vec::new();
    }
    let width = led_range_width(num_leds, num_sections);
    (0..num_leds)
        .step_by(width as usize)
        .map(|start| LedRange::new(start, start + width))
        .collect()
}

/// LED range whose FOV interval contains `angle`.
///
/// Intervals are closed on both ends and scanned from the most positive one,
/// so an angle sitting on a shared boundary belongs to the left-hand (larger
/// angle) interval. Angles outside every interval map to the last range.
/// Returns `None` only for an empty layout.
pub fn resolve_led_range(angle: f64, leds: &[LedRange], fov: &[f64]) -> Option<LedRange> {
    fov.windows(2)
        .zip(leds)
        .find(|(pair, _)| angle <= pair[0] && angle >= pair[1])
        .map(|(_, range)| *range)
        .or_else(|| leds.last().copied())
}

/// Distance to brightness mapping: linear up to half of `max_distance_m`,
/// then a power ramp to full brightness.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrightnessCurve {
    pub min_distance_m: f64,
    pub max_distance_m: f64,
    pub linear_slope: f64,
    pub exponential_base: f64,
}

impl Default for BrightnessCurve {
    fn default() -> Self {
        Self {
            min_distance_m: 0.01,
            max_distance_m: 5.0,
            linear_slope: 0.25,
            exponential_base: 2.0,
        }
    }
}

impl BrightnessCurve {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |msg: &str| Err(ConfigError::InvalidBrightnessCurve(msg.to_string()));
        if !(self.min_distance_m >= 0.0) {
            return bad("min_distance_m must be >= 0");
        }
        if !(self.max_distance_m / 2.0 > self.min_distance_m) {
            return bad("max_distance_m / 2 must exceed min_distance_m");
        }
        if !(0.0..=1.0).contains(&self.linear_slope) {
            return bad("linear_slope must be within [0, 1]");
        }
        if !(self.exponential_base > 0.0) {
            return bad("exponential_base must be positive");
        }
        Ok(())
    }

    /// Brightness in `[0, 1]`, rounded to two decimals.
    pub fn brightness(&self, distance_m: f64) -> f32 {
        if distance_m <= self.min_distance_m {
            return 0.0;
        }
        if distance_m >= self.max_distance_m {
            return 1.0;
        }
        let threshold = self.max_distance_m / 2.0;
        let level = if distance_m <= threshold {
            let linear = (distance_m - self.min_distance_m) / (threshold - self.min_distance_m)
                * self.linear_slope;
            linear.min(self.linear_slope)
        } else {
            let normalized = (distance_m - threshold) / (self.max_distance_m - threshold);
            self.linear_slope + (1.0 - self.linear_slope) * normalized.powf(self.exponential_base)
        };
        round2(level) as f32
    }
}

/// Brightness with the default curve (0.01 m .. 5 m, slope 0.25, base 2).
pub fn brightness_from_distance(distance_m: f64) -> f32 {
    BrightnessCurve::default().brightness(distance_m)
}

// halves go to the even hundredth
fn round2(v: f64) -> f64 {
    (v * 100.0).round_ties_even() / 100.0
}

/// Matched FOV boundaries and LED ranges for one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct LedLayout {
    num_leds: u32,
    fov: Vec<f64>,
    leds: Vec<LedRange>,
}

impl LedLayout {
    pub fn new(num_leds: u32, num_sections: usize, hfov_deg: f64) -> Result<Self, LayoutError> {
        if num_sections == 0 {
            return Err(LayoutError::ZeroSections);
        }
        if num_leds == 0 {
            return Err(LayoutError::ZeroLeds);
        }
        if !(hfov_deg > 0.0 && hfov_deg < 180.0) {
            return Err(LayoutError::InvalidFov(hfov_deg));
        }
        let fov = fov_partition(hfov_deg, num_sections);
        let leds = led_partition(num_leds, num_sections);
        if leds.len() != fov.len() - 1 {
            return Err(LayoutError::SectionMismatch {
                num_leds,
                sections: num_sections,
                width: led_range_width(num_leds, num_sections),
                ranges: leds.len(),
            });
        }
        Ok(Self { num_leds, fov, leds })
    }

    pub fn resolve(&self, angle_deg: f64) -> LedRange {
        // non-empty by construction
        resolve_led_range(angle_deg, &self.leds, &self.fov).unwrap_or(self.leds[0])
    }

    pub fn num_leds(&self) -> u32 {
        self.num_leds
    }

    pub fn fov_boundaries(&self) -> &[f64] {
        &self.fov
    }

    pub fn led_sections(&self) -> &[LedRange] {
        &self.leds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn focal_length_from_fov() {
        // 90 degrees: tan(45) == 1
        assert!((focal_length(640, 90.0) - 320.0).abs() < 1e-6);
        assert!((focal_length(640, 89.0) - 325.6).abs() < 0.1);
    }

    #[test]
    fn distance_is_inverse_pinhole() {
        let d = estimate_distance(100.0, 1080.0, 20.0);
        assert!((d - 216.0 * 0.0254).abs() < EPS);
        // doubling the observed width halves the distance
        assert!((estimate_distance(200.0, 1080.0, 20.0) - d / 2.0).abs() < EPS);
    }

    #[test]
    fn angles() {
        assert_eq!(horizontal_angle(320.0, 640, 89.0), 0.0);
        assert!((horizontal_angle(640.0, 640, 89.0) - 44.5).abs() < EPS);
        assert!((horizontal_angle(0.0, 640, 89.0) + 44.5).abs() < EPS);
        // normalized by width: the vertical center of a 640x360 frame is not 0 degrees
        assert!((vertical_angle(180.0, 640, 100.0) - 100.0 * (180.0 / 640.0 - 0.5)).abs() < EPS);
        assert_eq!(vertical_angle(320.0, 640, 100.0), 0.0);
    }

    #[test]
    fn fov_partition_descends_over_full_fov() {
        for (hfov, n) in [(89.0, 8), (78.0, 3), (120.0, 1), (62.2, 7)] {
            let fov = fov_partition(hfov, n);
            assert_eq!(fov.len(), n + 1);
            assert!((fov[0] - hfov / 2.0).abs() < 1e-9);
            assert!((fov[n] + hfov / 2.0).abs() < 1e-9);
            assert!(fov.windows(2).all(|w| w[0] > w[1]));
            for w in fov.windows(2) {
                assert!((w[0] - w[1] - hfov / n as f64).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn led_partition_covers_without_overlap() {
        for (num_leds, n) in [(256, 8), (256, 4), (64, 3), (10, 4), (7, 7), (254, 4)] {
            let leds = led_partition(num_leds, n);
            assert_eq!(leds[0].start, 0);
            for w in leds.windows(2) {
                assert_eq!(w[0].end, w[1].start);
            }
            let last = leds.last().unwrap();
            assert!(last.start < num_leds);
            assert!(last.end >= num_leds);
        }
    }

    #[test]
    fn led_partition_last_range_may_overshoot() {
        // round(254 / 4) == 64 (half to even), so the last zone ends at 256
        let leds = led_partition(254, 4);
        assert_eq!(leds.len(), 4);
        assert_eq!(*leds.last().unwrap(), LedRange::new(192, 256));
        // round(10 / 4) == 2, giving five ranges for four sections
        assert_eq!(led_partition(10, 4).len(), 5);
    }

    #[test]
    fn resolve_boundary_goes_to_larger_interval() {
        let layout = LedLayout::new(256, 8, 80.0).unwrap();
        // boundaries: 40, 30, 20, 10, 0, -10, -20, -30, -40
        assert_eq!(layout.resolve(30.0), LedRange::new(0, 32));
        assert_eq!(layout.resolve(29.9), LedRange::new(32, 64));
        assert_eq!(layout.resolve(0.0), LedRange::new(96, 128));
        assert_eq!(layout.resolve(-0.1), LedRange::new(128, 160));
        assert_eq!(layout.resolve(40.0), LedRange::new(0, 32));
        assert_eq!(layout.resolve(-40.0), LedRange::new(224, 256));
    }

    #[test]
    fn resolve_out_of_range_falls_back_to_last() {
        let layout = LedLayout::new(256, 8, 80.0).unwrap();
        assert_eq!(layout.resolve(41.0), LedRange::new(224, 256));
        assert_eq!(layout.resolve(-41.0), LedRange::new(224, 256));
        assert_eq!(layout.resolve(f64::NAN), LedRange::new(224, 256));
        assert_eq!(resolve_led_range(0.0, &[], &[]), None);
    }

    #[test]
    fn brightness_anchors() {
        assert_eq!(brightness_from_distance(0.0), 0.0);
        assert_eq!(brightness_from_distance(0.01), 0.0);
        assert_eq!(brightness_from_distance(2.5), 0.25);
        assert_eq!(brightness_from_distance(5.0), 1.0);
        assert_eq!(brightness_from_distance(9.0), 1.0);
        // linear half: (1.0 - 0.01) / 2.49 * 0.25 == 0.0994
        assert_eq!(brightness_from_distance(1.0), 0.1);
        // power half: 0.25 + 0.75 * 0.5^2
        assert_eq!(brightness_from_distance(3.75), 0.44);
    }

    #[test]
    fn brightness_ties_round_to_even() {
        let curve = BrightnessCurve { min_distance_m: 0.0, max_distance_m: 4.0, ..BrightnessCurve::default() };
        // 1 / 2 * 0.25 == 0.125
        assert_eq!(curve.brightness(1.0), 0.12);
        let steep = BrightnessCurve { linear_slope: 0.75, ..curve };
        // 1 / 2 * 0.75 == 0.375
        assert_eq!(steep.brightness(1.0), 0.38);
    }

    #[test]
    fn brightness_is_monotonic() {
        let mut prev = 0.0f32;
        let mut d = 0.0;
        while d <= 6.0 {
            let b = brightness_from_distance(d);
            assert!(b >= prev, "brightness dropped at {d}: {b} < {prev}");
            assert!((0.0..=1.0).contains(&b));
            prev = b;
            d += 0.005;
        }
    }

    #[test]
    fn brightness_curve_validation() {
        assert!(BrightnessCurve::default().validate().is_ok());
        let bad = BrightnessCurve { max_distance_m: 0.01, ..BrightnessCurve::default() };
        assert!(bad.validate().is_err());
        let bad = BrightnessCurve { linear_slope: 1.5, ..BrightnessCurve::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn layout_rejects_unaligned_grids() {
        assert_eq!(LedLayout::new(256, 0, 89.0), Err(LayoutError::ZeroSections));
        assert_eq!(LedLayout::new(0, 8, 89.0), Err(LayoutError::ZeroLeds));
        assert_eq!(LedLayout::new(256, 8, 0.0), Err(LayoutError::InvalidFov(0.0)));
        assert!(matches!(
            LedLayout::new(256, 3, 89.0),
            Err(LayoutError::SectionMismatch { ranges: 4, sections: 3, .. })
        ));
        let layout = LedLayout::new(254, 4, 89.0).unwrap();
        assert_eq!(layout.led_sections().len() + 1, layout.fov_boundaries().len());
    }

    #[test]
    fn full_width_person_end_to_end() {
        let focal = 1080.0;
        let d = estimate_distance(640.0, focal, 20.0);
        assert!((d - 0.8573).abs() < 1e-3);
        // (0.8573 - 0.01) / 2.49 * 0.25 -> 0.085 -> 0.09
        assert_eq!(brightness_from_distance(d), 0.09);
    }
}
