use serde::{Deserialize, Serialize};

/// Half-open range of LED indices `[start, end)` driven as one zone.
///
/// The last zone of a layout may extend past the physical LED count; the
/// controller clamps it when writing pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedRange {
    pub start: u32,
    pub end: u32,
}

impl LedRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedCommand {
    pub range: LedRange,
    // 0..1
    pub brightness: f32,
}

/// Everything the lighting controller needs for one processed frame.
/// An empty `commands` list means "nothing to light".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedFrame {
    pub ts_unix_ms: i64,
    pub camera_index: u32,
    pub commands: Vec<LedCommand>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_len_saturates() {
        assert_eq!(LedRange::new(32, 64).len(), 32);
        assert_eq!(LedRange::new(64, 32).len(), 0);
        assert!(LedRange::new(5, 5).is_empty());
    }

    #[test]
    fn frame_json_shape() {
        let frame = LedFrame {
            ts_unix_ms: 1_700_000_000_000,
            camera_index: 1,
            commands: vec![LedCommand { range: LedRange::new(0, 32), brightness: 0.25 }],
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["camera_index"], 1);
        assert_eq!(json["commands"][0]["range"]["start"], 0);
        assert_eq!(json["commands"][0]["range"]["end"], 32);
        assert_eq!(json["commands"][0]["brightness"], 0.25);
    }
}
