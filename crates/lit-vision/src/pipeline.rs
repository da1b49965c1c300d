//! One detection cycle: detector output in, LED commands and gesture events out.

use anyhow::{Context, Result};
use image::RgbImage;
use lit_proto::control::ControlMessage;
use lit_proto::led::{LedCommand, LedFrame, LedRange};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, warn};

use crate::camera::{CameraConfig, CameraProfile};
use crate::gesture::{preprocess_landmarks, GestureDebouncer};
use crate::labels::Labels;
use crate::sink::{EventSink, LedSink};
use crate::spatial::{estimate_distance, horizontal_angle, vertical_angle, BrightnessCurve, LedLayout};
use crate::{
    now_unix_ms, ConfigError, Detector, Frame, GestureClassifier, HandLandmarker, PixelBox,
};

#[derive(Debug, Clone, Deserialize)]
pub struct LedConfig {
    #[serde(default = "default_led_count")]
    pub count: u32,
    #[serde(default = "default_sections")]
    pub sections: usize,
    #[serde(default)]
    pub brightness: BrightnessCurve,
}

fn default_led_count() -> u32 { 256 }
fn default_sections() -> usize { 8 }

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            count: default_led_count(),
            sections: default_sections(),
            brightness: BrightnessCurve::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub camera_index: u32,
    /// Detections must score strictly above this.
    pub conf_threshold: f32,
    /// Assumed shoulder width of a person, in inches.
    pub ref_person_width_in: f64,
    pub target_label: String,
    pub leds: LedConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            conf_threshold: 0.6,
            ref_person_width_in: 20.0,
            target_label: "person".into(),
            leds: LedConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.conf_threshold) {
            return Err(ConfigError::InvalidThreshold(self.conf_threshold));
        }
        if !(self.ref_person_width_in > 0.0) {
            return Err(ConfigError::InvalidReferenceWidth(self.ref_person_width_in));
        }
        self.leds.brightness.validate()
    }
}

/// Landmark model, gesture classifier and its labels.
pub struct HandPipeline {
    landmarker: Box<dyn HandLandmarker>,
    classifier: Box<dyn GestureClassifier>,
    labels: Labels,
}

impl HandPipeline {
    pub fn new(
        landmarker: Box<dyn HandLandmarker>,
        classifier: Box<dyn GestureClassifier>,
        labels: Labels,
    ) -> Self {
        Self { landmarker, classifier, labels }
    }

    /// Landmarks of the hand in `crop`, `None` when there is no hand.
    fn find_hand(&mut self, crop: &RgbImage) -> Result<Option<Vec<[f32; 2]>>> {
        self.landmarker.landmarks(crop).context("hand landmarks")
    }

    /// Gesture label for a hand's landmarks.
    fn classify(&mut self, points: &[[f32; 2]]) -> Result<String> {
        let features = preprocess_landmarks(points);
        let idx = self.classifier.classify(&features).context("gesture classifier")?;
        let label = self.labels.get(idx).with_context(|| {
            format!("gesture class {} out of range ({} labels)", idx, self.labels.len())
        })?;
        Ok(label.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonReport {
    pub bbox: PixelBox,
    pub score: f32,
    pub distance_m: f64,
    pub angle_x_deg: f64,
    pub angle_y_deg: f64,
    pub brightness: f32,
    pub range: LedRange,
    /// Gesture label classified in this person's box, if a hand was found.
    pub gesture: Option<String>,
}

/// What one cycle saw and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub seq: u64,
    pub persons: Vec<PersonReport>,
    pub controls: Vec<ControlMessage>,
    pub hands_in_frame: bool,
    pub fps: f64,
}

impl FrameReport {
    pub fn led_commands(&self) -> Vec<LedCommand> {
        self.persons
            .iter()
            .map(|p| LedCommand { range: p.range, brightness: p.brightness })
            .collect()
    }
}

/// Per-camera detection state carried from frame to frame.
pub struct FrameProcessor {
    cfg: PipelineConfig,
    profile: CameraProfile,
    layout: LedLayout,
    detector: Box<dyn Detector>,
    labels: Labels,
    hands: Option<HandPipeline>,
    debouncer: GestureDebouncer,
    led_sink: Option<Box<dyn LedSink>>,
    events: Option<Box<dyn EventSink>>,
}

impl FrameProcessor {
    pub fn new(
        cfg: PipelineConfig,
        camera: &CameraConfig,
        detector: Box<dyn Detector>,
        labels: Labels,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let profile = CameraProfile::from_config(camera)?;
        let layout = LedLayout::new(cfg.leds.count, cfg.leds.sections, profile.hfov_deg)?;
        Ok(Self {
            cfg,
            profile,
            layout,
            detector,
            labels,
            hands: None,
            debouncer: GestureDebouncer::new(),
            led_sink: None,
            events: None,
        })
    }

    pub fn with_hands(mut self, hands: HandPipeline) -> Self {
        self.hands = Some(hands);
        self
    }

    pub fn with_led_sink(mut self, sink: Box<dyn LedSink>) -> Self {
        self.led_sink = Some(sink);
        self
    }

    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn camera_index(&self) -> u32 {
        self.cfg.camera_index
    }

    pub fn profile(&self) -> &CameraProfile {
        &self.profile
    }

    pub fn layout(&self) -> &LedLayout {
        &self.layout
    }

    /// Recomputes optics and the FOV/LED grid. Called when a session starts.
    pub fn rebuild(&mut self, camera: &CameraConfig) -> Result<(), ConfigError> {
        let profile = CameraProfile::from_config(camera)?;
        self.layout = LedLayout::new(self.cfg.leds.count, self.cfg.leds.sections, profile.hfov_deg)?;
        self.profile = profile;
        Ok(())
    }

    /// Forgets any gesture hold in progress.
    pub fn reset_gestures(&mut self) {
        self.debouncer.reset();
    }

    /// Runs one cycle on `frame`, with `now` as the gesture clock.
    ///
    /// Only a detector failure is returned as an error. Gesture and
    /// forwarding failures are logged and the cycle carries on.
    pub fn process(&mut self, frame: &Frame, now: Instant) -> Result<FrameReport> {
        let started = Instant::now();
        let raw = self.detector.detect(frame).context("detector")?;
        let (w, h) = (frame.width(), frame.height());
        let camera_index = self.cfg.camera_index;

        let mut persons = Vec::new();
        let mut controls = Vec::new();
        let mut hands_in_frame = false;

        for i in 0..raw.len() {
            let score = raw.scores[i];
            if !(score > self.cfg.conf_threshold && score <= 1.0) {
                continue;
            }
            if self.labels.get(raw.classes[i]) != Some(self.cfg.target_label.as_str()) {
                continue;
            }
            let Some(bbox) = PixelBox::from_normalized(raw.boxes[i], w, h) else {
                continue;
            };

            let (cx, cy) = bbox.center();
            let distance_m = estimate_distance(
                bbox.width() as f64,
                self.profile.focal_length_px,
                self.cfg.ref_person_width_in,
            );
            let angle_x_deg = horizontal_angle(cx, w, self.profile.hfov_deg);
            let angle_y_deg = vertical_angle(cy, w, self.profile.vfov_deg);
            let brightness = self.cfg.leds.brightness.brightness(distance_m);
            let range = self.layout.resolve(angle_x_deg);

            let mut gesture = None;
            if let Some(hands) = self.hands.as_mut() {
                match hands.find_hand(&frame.crop(&bbox)) {
                    Ok(Some(points)) => {
                        // a hand is present even if classifying it fails below
                        hands_in_frame = true;
                        match hands.classify(&points) {
                            Ok(label) => {
                                if let Some(fire) = self.debouncer.observe(&label, now) {
                                    controls.push(ControlMessage {
                                        ts_unix_ms: now_unix_ms(),
                                        camera_index,
                                        gesture: fire.gesture.label().to_string(),
                                        hold_ms: fire.held.as_millis() as u64,
                                        event: fire.event,
                                    });
                                }
                                gesture = Some(label);
                            }
                            Err(e) => warn!("vision: gesture classification skipped: {:#}", e),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("vision: hand search skipped: {:#}", e),
                }
            }

            persons.push(PersonReport {
                bbox,
                score,
                distance_m,
                angle_x_deg,
                angle_y_deg,
                brightness,
                range,
                gesture,
            });
        }

        if self.hands.is_some() && (persons.is_empty() || !hands_in_frame) {
            self.debouncer.reset();
        }

        let elapsed = started.elapsed().as_secs_f64();
        let report = FrameReport {
            seq: frame.seq,
            persons,
            controls,
            hands_in_frame,
            fps: if elapsed > 0.0 { 1.0 / elapsed } else { 0.0 },
        };
        self.forward(frame, &report);
        Ok(report)
    }

    fn forward(&mut self, frame: &Frame, report: &FrameReport) {
        let camera_index = self.cfg.camera_index;
        if let Some(sink) = self.led_sink.as_mut() {
            let led_frame = LedFrame {
                ts_unix_ms: now_unix_ms(),
                camera_index,
                commands: report.led_commands(),
            };
            if let Err(e) = sink.forward(led_frame) {
                warn!("vision: led forward failed: {:#}", e);
            }
        }

        let Some(events) = self.events.as_mut() else {
            return;
        };
        for msg in &report.controls {
            debug!("vision: gesture {} held {}ms -> {}", msg.gesture, msg.hold_ms, msg.key());
            if let Err(e) = events.send_control(msg) {
                warn!("vision: control event dropped: {:#}", e);
            }
        }
        if events.wants_frames() {
            match frame.encode_png() {
                Ok(png) => {
                    if let Err(e) = events.send_frame(camera_index, &png) {
                        warn!("vision: frame update dropped: {:#}", e);
                    }
                }
                Err(e) => warn!("vision: {:#}", e),
            }
        }
    }
}
