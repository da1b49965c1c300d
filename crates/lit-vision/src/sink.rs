//! Where per-frame results go: LED commands to the strip controller, gesture
//! events and preview frames to whatever is watching.

use anyhow::Result;
use lit_proto::control::ControlMessage;
use lit_proto::led::LedFrame;
use tokio::sync::mpsc::{self, error::TrySendError};

pub trait LedSink: Send {
    fn forward(&mut self, frame: LedFrame) -> Result<()>;
}

/// Consumer of gesture control events and, optionally, annotated frames.
pub trait EventSink: Send {
    fn wants_frames(&self) -> bool {
        false
    }

    fn send_frame(&mut self, _camera_index: u32, _png: &[u8]) -> Result<()> {
        Ok(())
    }

    fn send_control(&mut self, msg: &ControlMessage) -> Result<()>;
}

/// The uplink task's queue. Never blocks the detection loop: a full queue
/// drops the frame.
impl LedSink for mpsc::Sender<LedFrame> {
    fn forward(&mut self, frame: LedFrame) -> Result<()> {
        match self.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => anyhow::bail!("led queue full, frame dropped"),
            Err(TrySendError::Closed(_)) => anyhow::bail!("led uplink closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lit_proto::led::{LedCommand, LedRange};

    fn frame() -> LedFrame {
        LedFrame {
            ts_unix_ms: 1,
            camera_index: 0,
            commands: vec![LedCommand { range: LedRange::new(0, 32), brightness: 0.5 }],
        }
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (mut tx, mut rx) = mpsc::channel(1);
        tx.forward(frame()).unwrap();
        let err = tx.forward(frame()).unwrap_err();
        assert!(err.to_string().contains("queue full"));
        assert_eq!(rx.try_recv().unwrap(), frame());
    }

    #[test]
    fn channel_sink_reports_closed() {
        let (mut tx, rx) = mpsc::channel(4);
        drop(rx);
        assert!(tx.forward(frame()).unwrap_err().to_string().contains("closed"));
    }
}
