//! Start/stop control around the per-frame pipeline.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::camera::{join_with_timeout, CameraConfig, FrameReader, FrameSource};
use crate::pipeline::FrameProcessor;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
}

fn default_stop_timeout_ms() -> u64 { 3000 }
fn default_idle_sleep_ms() -> u64 { 10 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
        }
    }
}

struct Running {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<FrameProcessor>,
    source: FrameSource,
}

/// One camera's detection loop.
///
/// The processor is handed to the loop thread while running and parked
/// here again once the thread has exited.
pub struct DetectionSession {
    camera: CameraConfig,
    stop_timeout: Duration,
    idle_sleep: Duration,
    processor: Option<FrameProcessor>,
    running: Option<Running>,
    // a loop that outlived its stop timeout
    draining: Option<JoinHandle<FrameProcessor>>,
}

impl DetectionSession {
    pub fn new(camera: CameraConfig, cfg: &SessionConfig, processor: FrameProcessor) -> Self {
        Self {
            camera,
            stop_timeout: Duration::from_millis(cfg.stop_timeout_ms),
            idle_sleep: Duration::from_millis(cfg.idle_sleep_ms),
            processor: Some(processor),
            running: None,
            draining: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// True while a stopped loop is still finishing its last cycle.
    pub fn is_draining(&self) -> bool {
        self.draining.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Starts capture and the detection loop. No-op while running; fails
    /// while a previous loop is still draining.
    pub fn start(&mut self) -> Result<()> {
        self.reap();
        if self.running.is_some() {
            debug!("vision: session already running");
            return Ok(());
        }
        if self.draining.is_some() {
            warn!(
                "vision: camera {} previous detection loop still shutting down",
                self.camera.index
            );
            anyhow::bail!(
                "previous detection loop on camera {} has not exited yet",
                self.camera.index
            );
        }
        let mut processor = self
            .processor
            .take()
            .context("detection processor unavailable")?;
        if let Err(e) = processor.rebuild(&self.camera) {
            self.processor = Some(processor);
            return Err(e).context("rebuild camera layout");
        }

        let mut source = FrameSource::new(self.camera.clone());
        if let Err(e) = source.start() {
            self.processor = Some(processor);
            return Err(e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let reader = source.reader();
        let loop_stop = stop.clone();
        let idle_sleep = self.idle_sleep;
        let spawned = thread::Builder::new()
            .name(format!("lit-detect-{}", self.camera.index))
            .spawn(move || detection_loop(processor, reader, loop_stop, idle_sleep));
        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                source.stop(self.stop_timeout);
                return Err(e).context("spawn detection thread");
            }
        };

        info!(
            "vision: detection started on camera {} ({})",
            self.camera.index, self.camera.mode
        );
        self.running = Some(Running { stop, handle, source });
        Ok(())
    }

    /// Signals the loop, releases the camera and waits up to the stop timeout.
    /// Calling it while stopped does nothing.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.stop.store(true, Ordering::Relaxed);
        running.source.stop(self.stop_timeout);

        match join_with_timeout(running.handle, self.stop_timeout) {
            Ok(Ok(processor)) => {
                self.processor = Some(processor);
                info!("vision: detection stopped on camera {}", self.camera.index);
            }
            Ok(Err(_)) => error!("vision: detection loop on camera {} panicked", self.camera.index),
            Err(handle) => {
                warn!(
                    "vision: detection loop on camera {} did not exit within {:?}",
                    self.camera.index, self.stop_timeout
                );
                self.draining = Some(handle);
            }
        }
    }

    fn reap(&mut self) {
        if self.running.as_ref().is_some_and(|r| r.handle.is_finished()) {
            self.stop();
        }
        if self.draining.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = self.draining.take() {
                match handle.join() {
                    Ok(processor) => self.processor = Some(processor),
                    Err(_) => error!("vision: detection loop on camera {} panicked", self.camera.index),
                }
            }
        }
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn detection_loop(
    mut processor: FrameProcessor,
    reader: FrameReader,
    stop: Arc<AtomicBool>,
    idle_sleep: Duration,
) -> FrameProcessor {
    processor.reset_gestures();
    let mut last_seq = None;
    let mut cycles = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let Some(frame) = reader.latest() else {
            thread::sleep(idle_sleep);
            continue;
        };
        if last_seq == Some(frame.seq) {
            thread::sleep(idle_sleep);
            continue;
        }
        last_seq = Some(frame.seq);

        // a panicking collaborator skips the frame like any other inference failure
        let result = panic::catch_unwind(AssertUnwindSafe(|| processor.process(&frame, Instant::now())));
        match result {
            Ok(Ok(report)) => {
                cycles += 1;
                if cycles % 100 == 0 {
                    debug!(
                        "vision: camera {} frame {} persons={} fps={:.1}",
                        processor.camera_index(),
                        report.seq,
                        report.persons.len(),
                        report.fps
                    );
                }
            }
            Ok(Err(e)) => warn!("vision: frame {} skipped: {:#}", frame.seq, e),
            Err(_) => warn!("vision: frame {} skipped: detection step panicked", frame.seq),
        }
    }
    processor
}
