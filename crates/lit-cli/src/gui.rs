use anyhow::{Context, Result};
use lit_proto::control::ControlMessage;
use lit_vision::sink::EventSink;
use std::path::PathBuf;
use tracing::info;

/// Headless stand-in for the operator window: control events go to the log,
/// and every n-th processed frame is written to `camera_{index}.png`.
pub struct SnapshotSink {
    dir: Option<PathBuf>,
    every_n: u64,
    frames: u64,
}

impl SnapshotSink {
    pub fn new(dir: Option<PathBuf>, every_n: u32) -> Result<Self> {
        if let Some(d) = &dir {
            std::fs::create_dir_all(d)
                .with_context(|| format!("create gui.snapshot_dir {}", d.display()))?;
        }
        Ok(Self { dir, every_n: every_n.max(1) as u64, frames: 0 })
    }
}

impl EventSink for SnapshotSink {
    fn wants_frames(&self) -> bool {
        self.dir.is_some()
    }

    fn send_frame(&mut self, camera_index: u32, png: &[u8]) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        self.frames += 1;
        if self.frames % self.every_n != 0 {
            return Ok(());
        }
        // rename so readers never see a half-written file
        let path = dir.join(format!("camera_{}.png", camera_index));
        let tmp = path.with_extension("png.tmp");
        std::fs::write(&tmp, png).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("rename to {}", path.display()))?;
        Ok(())
    }

    fn send_control(&mut self, msg: &ControlMessage) -> Result<()> {
        info!(
            "gui: {} = {:?} ({} held {}ms)",
            msg.key(),
            msg.event.value(),
            msg.gesture,
            msg.hold_ms
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lit_proto::control::ControlEvent;

    #[test]
    fn frames_are_not_wanted_without_dir() {
        let mut sink = SnapshotSink::new(None, 1).unwrap();
        assert!(!sink.wants_frames());
        sink.send_frame(0, b"png").unwrap();
        sink.send_control(&ControlMessage {
            ts_unix_ms: 0,
            camera_index: 0,
            gesture: "L".into(),
            hold_ms: 1200,
            event: ControlEvent::IncreaseLedRange,
        })
        .unwrap();
    }

    #[test]
    fn writes_every_nth_frame() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("previews");
        let mut sink = SnapshotSink::new(Some(out.clone()), 2).unwrap();
        assert!(sink.wants_frames());

        sink.send_frame(1, b"first").unwrap();
        assert!(!out.join("camera_1.png").exists());
        sink.send_frame(1, b"second").unwrap();
        assert_eq!(std::fs::read(out.join("camera_1.png")).unwrap(), b"second");
        assert!(!out.join("camera_1.png.tmp").exists());
    }
}
