//! Hand gesture hold tracking.
//!
//! The classifier output flickers from frame to frame, so a label only turns
//! into a lighting command once it has been seen continuously for longer than
//! the hold threshold. From then on it fires on every frame the hold lasts.

use lit_proto::control::ControlEvent;
use std::time::{Duration, Instant};

pub const HOLD_THRESHOLD: Duration = Duration::from_secs(1);

/// Length of one on/off phase for the toggle gestures.
const TOGGLE_PHASE_SECS: f64 = 2.0;

/// Gestures the lighting system reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    Love,
    ThumbsUp,
    ThumbsDown,
    L,
    Pointer,
    Ok,
}

impl Gesture {
    /// Parses a classifier label. Labels outside the known set return `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Love" => Some(Self::Love),
            "Thumbs Up" => Some(Self::ThumbsUp),
            "Thumbs Down" => Some(Self::ThumbsDown),
            "L" => Some(Self::L),
            "Pointer" => Some(Self::Pointer),
            "OK" => Some(Self::Ok),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Love => "Love",
            Self::ThumbsUp => "Thumbs Up",
            Self::ThumbsDown => "Thumbs Down",
            Self::L => "L",
            Self::Pointer => "Pointer",
            Self::Ok => "OK",
        }
    }

    /// Event for a hold that has lasted `held`.
    pub fn event_for(&self, held: Duration) -> ControlEvent {
        match self {
            Self::Love => ControlEvent::AllLedsOn(toggle_phase(held)),
            Self::Ok => ControlEvent::SweepDirection { left_to_right: toggle_phase(held) },
            Self::L => ControlEvent::IncreaseLedRange,
            Self::Pointer => ControlEvent::DecreaseLedRange,
            Self::ThumbsUp => ControlEvent::IncreaseBrightness,
            Self::ThumbsDown => ControlEvent::DecreaseBrightness,
        }
    }
}

/// True during odd-numbered phases of a hold.
fn toggle_phase(held: Duration) -> bool {
    (held.as_secs_f64() / TOGGLE_PHASE_SECS).floor() as u64 % 2 == 1
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Holding { label: String, since: Instant },
}

/// Fired once per frame while a known gesture is held past the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureFire {
    pub gesture: Gesture,
    pub held: Duration,
    pub event: ControlEvent,
}

#[derive(Debug, Clone)]
pub struct GestureDebouncer {
    state: GestureState,
    hold_threshold: Duration,
}

impl Default for GestureDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl GestureDebouncer {
    pub fn new() -> Self {
        Self::with_threshold(HOLD_THRESHOLD)
    }

    pub fn with_threshold(hold_threshold: Duration) -> Self {
        Self { state: GestureState::Idle, hold_threshold }
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    /// Feeds one classified label seen at `now`.
    ///
    /// A new label restarts the hold timer. Unknown labels are tracked like
    /// any other but never fire.
    pub fn observe(&mut self, label: &str, now: Instant) -> Option<GestureFire> {
        let label = label.trim();
        let since = match &self.state {
            GestureState::Holding { label: held, since } if held == label => Some(*since),
            _ => None,
        };
        let Some(since) = since else {
            self.state = GestureState::Holding { label: label.to_string(), since: now };
            return None;
        };

        let held = now.saturating_duration_since(since);
        if held <= self.hold_threshold {
            return None;
        }
        let gesture = Gesture::from_label(label)?;
        Some(GestureFire { gesture, held, event: gesture.event_for(held) })
    }

    /// Drops any hold in progress (no hand or no person this frame).
    pub fn reset(&mut self) {
        self.state = GestureState::Idle;
    }
}

/// Scales normalized landmarks to pixel positions inside a `width` x `height`
/// image, truncating and clamping to the last row/column.
pub fn landmarks_to_pixels(normalized: &[[f32; 2]], width: u32, height: u32) -> Vec<[f32; 2]> {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    normalized
        .iter()
        .map(|[x, y]| {
            [
                (x * width as f32).trunc().min(max_x),
                (y * height as f32).trunc().min(max_y),
            ]
        })
        .collect()
}

/// Classifier input: points relative to the first (wrist) landmark,
/// flattened to `[x0, y0, x1, y1, ..]` and divided by the largest magnitude.
pub fn preprocess_landmarks(points: &[[f32; 2]]) -> Vec<f32> {
    let Some(&[base_x, base_y]) = points.first() else {
        return Vec::new();
    };
    let mut flat: Vec<f32> = points
        .iter()
        .flat_map(|[x, y]| [x - base_x, y - base_y])
        .collect();
    let max = flat.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if max > 0.0 {
        flat.iter_mut().for_each(|v| *v /= max);
    }
    flat
}
