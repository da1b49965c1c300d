use std::path::PathBuf;

/// LED/FOV grid that cannot be built from the configured counts.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LayoutError {
    #[error("leds.sections must be at least 1")]
    ZeroSections,
    #[error("leds.count must be at least 1")]
    ZeroLeds,
    #[error("horizontal fov must be positive and below 180 degrees, got {0}")]
    InvalidFov(f64),
    #[error(
        "{num_leds} leds at width {width} give {ranges} ranges, expected {sections}; pick a count that splits evenly"
    )]
    SectionMismatch {
        num_leds: u32,
        sections: usize,
        width: u32,
        ranges: usize,
    },
}

/// Startup configuration problems. These are fatal: nothing runs until fixed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("camera resolution must be non-zero, got {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
    #[error("camera.{axis} must be in (0, 180), got {value}")]
    InvalidFov { axis: &'static str, value: f64 },
    #[error("camera.focal_length_px must be >= 0, got {0}")]
    InvalidFocalLength(f64),
    #[error("unknown camera.mode: {0}")]
    UnknownCameraMode(String),
    #[error("detector.conf_threshold must be in [0, 1), got {0}")]
    InvalidThreshold(f32),
    #[error("detector.ref_person_width_in must be positive, got {0}")]
    InvalidReferenceWidth(f64),
    #[error("invalid brightness curve: {0}")]
    InvalidBrightnessCurve(String),
    #[error("label file {0} has no labels")]
    EmptyLabels(PathBuf),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}
