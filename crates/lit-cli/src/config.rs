use anyhow::{Context, Result};
use lit_uplink::UplinkConfig;
use lit_vision::camera::{CameraConfig, CameraProfile};
use lit_vision::pipeline::{LedConfig, PipelineConfig};
use lit_vision::session::SessionConfig;
use lit_vision::spatial::LedLayout;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorCfg,
    #[serde(default)]
    pub gesture: GestureCfg,
    #[serde(default)]
    pub leds: LedConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub gui: GuiCfg,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize)]
pub struct DetectorCfg {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub use_coral: bool,
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_model_path_edgetpu")]
    pub model_path_edgetpu: String,
    #[serde(default = "default_labelmap")]
    pub label_path: PathBuf,
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    #[serde(default = "default_ref_person_width_in")]
    pub ref_person_width_in: f64,
}

fn default_backend() -> String { "tflite".into() }
fn default_model_path() -> String { "models/detect.tflite".into() }
fn default_model_path_edgetpu() -> String { "models/edgetpu.tflite".into() }
fn default_labelmap() -> PathBuf { "models/labelmap.txt".into() }
fn default_conf_threshold() -> f32 { 0.6 }
fn default_ref_person_width_in() -> f64 { 20.0 }

impl Default for DetectorCfg {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            use_coral: false,
            model_path: default_model_path(),
            model_path_edgetpu: default_model_path_edgetpu(),
            label_path: default_labelmap(),
            conf_threshold: default_conf_threshold(),
            ref_person_width_in: default_ref_person_width_in(),
        }
    }
}

impl DetectorCfg {
    pub fn active_model(&self) -> &str {
        if self.use_coral { &self.model_path_edgetpu } else { &self.model_path }
    }
}

#[derive(Debug, Deserialize)]
pub struct GestureCfg {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_landmark_model")]
    pub landmark_model_path: String,
    #[serde(default = "default_min_hand_presence")]
    pub min_hand_presence: f32,
    #[serde(default = "default_classifier_model")]
    pub classifier_model_path: String,
    #[serde(default = "default_gesture_labels")]
    pub label_path: PathBuf,
}

fn default_landmark_model() -> String { "models/hand_landmark.tflite".into() }
fn default_min_hand_presence() -> f32 { 0.3 }
fn default_classifier_model() -> String { "models/keypoint_classifier.tflite".into() }
fn default_gesture_labels() -> PathBuf { "models/keypoint_classifier_label.csv".into() }

impl Default for GestureCfg {
    fn default() -> Self {
        Self {
            enable: false,
            landmark_model_path: default_landmark_model(),
            min_hand_presence: default_min_hand_presence(),
            classifier_model_path: default_classifier_model(),
            label_path: default_gesture_labels(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GuiCfg {
    /// Directory for `camera_{index}.png` previews; none disables them.
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default = "default_snapshot_every_n")]
    pub snapshot_every_n: u32,
}

fn default_snapshot_every_n() -> u32 { 30 }

impl Default for GuiCfg {
    fn default() -> Self {
        Self { snapshot_dir: None, snapshot_every_n: default_snapshot_every_n() }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path.as_ref()).context("read config")?;
        toml::from_str(&s).context("parse config toml")
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            camera_index: self.camera.index,
            conf_threshold: self.detector.conf_threshold,
            ref_person_width_in: self.detector.ref_person_width_in,
            leds: self.leds.clone(),
            ..PipelineConfig::default()
        }
    }

    pub fn layout(&self) -> Result<(CameraProfile, LedLayout)> {
        let profile = CameraProfile::from_config(&self.camera)?;
        let layout = LedLayout::new(self.leds.count, self.leds.sections, profile.hfov_deg)?;
        Ok((profile, layout))
    }

    /// Everything that can be checked without touching hardware or models.
    pub fn validate(&self) -> Result<()> {
        self.camera.validate()?;
        self.pipeline().validate()?;
        self.layout()?;
        anyhow::ensure!(
            self.detector.backend == "tflite",
            "unknown detector.backend: {}",
            self.detector.backend
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.gesture.min_hand_presence),
            "gesture.min_hand_presence must be within [0, 1]"
        );
        anyhow::ensure!(self.gui.snapshot_every_n >= 1, "gui.snapshot_every_n must be >= 1");
        if self.uplink.enable {
            lit_uplink::doctor::check_config(&self.uplink)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(toml: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(toml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn empty_file_uses_defaults() {
        let f = write("");
        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.camera.mode, "v4l2-ffmpeg");
        assert_eq!((cfg.camera.width, cfg.camera.height), (640, 360));
        assert_eq!(cfg.camera.hfov_deg, 89.0);
        assert_eq!(cfg.detector.conf_threshold, 0.6);
        assert_eq!(cfg.session.stop_timeout_ms, 3000);
        assert!(!cfg.uplink.enable);
        cfg.validate().unwrap();
    }

    #[test]
    fn full_file_parses() {
        let f = write(
            r#"
[camera]
mode = "stub"
index = 1
width = 1280
height = 720
hfov_deg = 78.0
focal_length_px = 1080.0

[detector]
use_coral = true
label_path = "/opt/lit/labelmap.txt"
conf_threshold = 0.5

[gesture]
enable = true
min_hand_presence = 0.5

[leds]
count = 128
sections = 4

[leds.brightness]
max_distance_m = 8.0

[uplink]
enable = true
endpoint = "tcp://192.168.4.20:7070"
queue_depth = 4

[gui]
snapshot_dir = "/tmp/lit"
snapshot_every_n = 10

[session]
stop_timeout_ms = 500
"#,
        );
        let cfg = Config::load(f.path()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.detector.active_model(), "models/edgetpu.tflite");
        assert_eq!(cfg.leds.brightness.max_distance_m, 8.0);
        assert_eq!(cfg.leds.brightness.linear_slope, 0.25);
        assert_eq!(cfg.pipeline().camera_index, 1);
        assert_eq!(cfg.gui.snapshot_dir.as_deref(), Some(Path::new("/tmp/lit")));
        assert_eq!(cfg.session.idle_sleep_ms, 10);

        let (profile, layout) = cfg.layout().unwrap();
        assert_eq!(profile.focal_length_px, 1080.0);
        assert_eq!(layout.led_sections().len(), 4);
    }

    #[test]
    fn invalid_layout_is_rejected() {
        let f = write("[leds]\ncount = 10\nsections = 4\n");
        let err = Config::load(f.path()).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("expected 4"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for toml in [
            "[camera]\nmode = \"gopro\"\n",
            "[camera]\nhfov_deg = 0.0\n",
            "[detector]\nconf_threshold = 1.5\n",
            "[detector]\nbackend = \"onnx\"\n",
            "[uplink]\nenable = true\nendpoint = \"tls://x:1\"\n",
            "[leds]\nsections = 0\n",
        ] {
            let cfg = Config::load(write(toml).path()).unwrap();
            assert!(cfg.validate().is_err(), "accepted: {}", toml);
        }
    }

    #[test]
    fn malformed_toml_fails_to_load() {
        assert!(Config::load(write("[camera\nwidth = ").path()).is_err());
        assert!(Config::load("/nonexistent/lit.toml").is_err());
    }
}
