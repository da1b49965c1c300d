use serde::{Deserialize, Serialize};

/// Lighting control action produced by a held hand gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlEvent {
    /// Blinks with hold time: on for odd 2s phases, off for even ones.
    AllLedsOn(bool),
    /// Alternates sweep direction with hold time, same phase rule as `AllLedsOn`.
    SweepDirection { left_to_right: bool },
    IncreaseLedRange,
    DecreaseLedRange,
    IncreaseBrightness,
    DecreaseBrightness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Step(i32),
    Flag(bool),
}

impl ControlEvent {
    /// Action suffix used in GUI event keys.
    pub fn action(&self) -> &'static str {
        match self {
            Self::AllLedsOn(_) => "TURNONALLLEDS",
            Self::SweepDirection { left_to_right: true } => "LEDRANGELEFTRIGHT",
            Self::SweepDirection { left_to_right: false } => "LEDRANGERIGHTLEFT",
            Self::IncreaseLedRange => "INCREASELEDRANGE",
            Self::DecreaseLedRange => "DECREASELEDRANGE",
            Self::IncreaseBrightness => "INCREASEBRIGHTNESS",
            Self::DecreaseBrightness => "DECREASEBRIGHTNESS",
        }
    }

    pub fn value(&self) -> ControlValue {
        match self {
            Self::AllLedsOn(on) => ControlValue::Flag(*on),
            // the direction lives in the key, the value is always set
            Self::SweepDirection { .. } => ControlValue::Flag(true),
            Self::IncreaseLedRange
            | Self::DecreaseLedRange
            | Self::IncreaseBrightness
            | Self::DecreaseBrightness => ControlValue::Step(1),
        }
    }

    /// GUI event key, e.g. `-CAMERA_0_HANDGESTUREINCREASEBRIGHTNESS-`.
    pub fn key(&self, camera_index: u32) -> String {
        format!("-CAMERA_{}_HANDGESTURE{}-", camera_index, self.action())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub ts_unix_ms: i64,
    pub camera_index: u32,
    /// Classifier label that was held.
    pub gesture: String,
    pub hold_ms: u64,
    pub event: ControlEvent,
}

impl ControlMessage {
    pub fn key(&self) -> String {
        self.event.key(self.camera_index)
    }
}
