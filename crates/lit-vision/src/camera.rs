use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use serde::Deserialize;
use std::io::Read;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::spatial::focal_length;
use crate::{ConfigError, Frame};

const REOPEN_BACKOFF: Duration = Duration::from_secs(1);
const STOP_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_mode")]
    pub mode: String, // "v4l2-ffmpeg" | "libcamera-jpeg" | "stub"
    #[serde(default)]
    pub index: u32,
    pub device: Option<String>, // defaults to /dev/video{index}
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_hfov")]
    pub hfov_deg: f64,
    #[serde(default = "default_vfov")]
    pub vfov_deg: f64,
    /// 0 derives the focal length from width and hfov.
    #[serde(default)]
    pub focal_length_px: f64,
}

fn default_mode() -> String { "v4l2-ffmpeg".into() }
fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 360 }
fn default_fps() -> u32 { 30 }
fn default_hfov() -> f64 { 89.0 }
fn default_vfov() -> f64 { 129.46 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            index: 0,
            device: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            hfov_deg: default_hfov(),
            vfov_deg: default_vfov(),
            focal_length_px: 0.0,
        }
    }
}

impl CameraConfig {
    pub fn device_path(&self) -> String {
        self.device.clone().unwrap_or_else(|| format!("/dev/video{}", self.index))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode.as_str() {
            "v4l2-ffmpeg" | "libcamera-jpeg" | "stub" => {}
            other => return Err(ConfigError::UnknownCameraMode(other.to_string())),
        }
        CameraProfile::from_config(self).map(|_| ())
    }
}

/// Optics used by the spatial mapping; fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraProfile {
    pub width: u32,
    pub height: u32,
    pub hfov_deg: f64,
    pub vfov_deg: f64,
    pub focal_length_px: f64,
}

impl CameraProfile {
    pub fn from_config(cfg: &CameraConfig) -> Result<Self, ConfigError> {
        if cfg.width == 0 || cfg.height == 0 {
            return Err(ConfigError::InvalidResolution { width: cfg.width, height: cfg.height });
        }
        for (axis, value) in [("hfov_deg", cfg.hfov_deg), ("vfov_deg", cfg.vfov_deg)] {
            if !(value > 0.0 && value < 180.0) {
                return Err(ConfigError::InvalidFov { axis, value });
            }
        }
        if !(cfg.focal_length_px >= 0.0) {
            return Err(ConfigError::InvalidFocalLength(cfg.focal_length_px));
        }
        let focal_length_px = if cfg.focal_length_px == 0.0 {
            focal_length(cfg.width, cfg.hfov_deg)
        } else {
            cfg.focal_length_px
        };
        Ok(Self {
            width: cfg.width,
            height: cfg.height,
            hfov_deg: cfg.hfov_deg,
            vfov_deg: cfg.vfov_deg,
            focal_length_px,
        })
    }
}

/// Capture subprocess, shared so `FrameSource::stop` can kill it while the
/// acquisition thread is blocked reading its stdout.
type ChildSlot = Arc<Mutex<Option<Child>>>;

/// Kills and reaps the child in `slot`, if any.
fn kill_child(slot: &Mutex<Option<Child>>) -> Option<ExitStatus> {
    let mut child = slot.lock().unwrap_or_else(|p| p.into_inner()).take()?;
    let _ = child.kill();
    child.wait().ok()
}

/// Open camera handle. Dropping it releases the device.
enum Capture {
    /// Long-running ffmpeg streaming raw rgb24 frames on stdout.
    Ffmpeg { child: ChildSlot, stdout: ChildStdout, frame_bytes: usize },
    /// One libcamera-still invocation per frame.
    Libcamera,
    /// Synthetic frames paced at the configured fps.
    Stub { tick: u64 },
}

impl Capture {
    fn open(cfg: &CameraConfig, child: &ChildSlot) -> Result<Self> {
        match cfg.mode.as_str() {
            "v4l2-ffmpeg" => open_ffmpeg(cfg, child),
            "libcamera-jpeg" => Ok(Capture::Libcamera),
            "stub" => {
                if cfg.device.as_deref() == Some("offline") {
                    anyhow::bail!("stub camera is offline");
                }
                Ok(Capture::Stub { tick: 0 })
            }
            other => anyhow::bail!("unknown camera.mode: {}", other),
        }
    }

    fn grab(&mut self, cfg: &CameraConfig) -> Result<RgbImage> {
        match self {
            Capture::Ffmpeg { stdout, frame_bytes, .. } => {
                let mut buf = vec![0u8; *frame_bytes];
                stdout.read_exact(&mut buf).context("read ffmpeg frame")?;
                RgbImage::from_raw(cfg.width, cfg.height, buf).context("ffmpeg frame size mismatch")
            }
            Capture::Libcamera => capture_libcamera(cfg),
            Capture::Stub { tick } => {
                *tick += 1;
                thread::sleep(Duration::from_secs_f64(1.0 / cfg.fps.max(1) as f64));
                let shade = (*tick % 256) as u8;
                Ok(RgbImage::from_pixel(cfg.width, cfg.height, Rgb([shade, shade, shade])))
            }
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if let Capture::Ffmpeg { child, .. } = self {
            kill_child(child);
        }
    }
}

fn open_ffmpeg(cfg: &CameraConfig, slot: &ChildSlot) -> Result<Capture> {
    // ffmpeg -f video4linux2 -input_format mjpeg -video_size WxH -framerate N -i /dev/videoX -f rawvideo -pix_fmt rgb24 -
    let device = cfg.device_path();
    let mut child = Command::new("ffmpeg")
        .args([
            "-hide_banner", "-loglevel", "error",
            "-f", "video4linux2",
            "-input_format", "mjpeg",
            "-video_size", &format!("{}x{}", cfg.width, cfg.height),
            "-framerate", &cfg.fps.to_string(),
            "-i", &device,
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn ffmpeg capture")?;
    let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;
    debug!("capture: ffmpeg v4l2 {}", device);
    if let Some(mut stale) = slot.lock().unwrap_or_else(|p| p.into_inner()).replace(child) {
        let _ = stale.kill();
        let _ = stale.wait();
    }
    Ok(Capture::Ffmpeg {
        child: slot.clone(),
        stdout,
        frame_bytes: (cfg.width * cfg.height * 3) as usize,
    })
}

fn capture_libcamera(cfg: &CameraConfig) -> Result<RgbImage> {
    let out = Command::new("libcamera-still")
        .args([
            "-n",                 // no preview
            "-t", "1",            // 1ms
            "--width", &cfg.width.to_string(),
            "--height", &cfg.height.to_string(),
            "-o", "-",            // stdout
        ])
        .stderr(Stdio::null())
        .output()
        .context("run libcamera-still")?;
    anyhow::ensure!(out.status.success(), "libcamera-still failed");
    let img = image::load_from_memory(&out.stdout).context("decode jpeg")?;
    Ok(img.to_rgb8())
}

/// Read side of a frame source. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct FrameReader {
    rx: watch::Receiver<Option<Arc<Frame>>>,
}

impl FrameReader {
    /// Most recent frame, or `None` until the camera delivers one.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.rx.borrow().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSourceStats {
    pub frames_captured: u64,
    pub running: bool,
}

/// Continuously captures frames on its own thread and keeps only the latest.
///
/// Slow consumers miss frames, fast consumers may see the same frame twice.
/// A camera that cannot be opened produces no frames; the thread keeps
/// retrying until stopped.
pub struct FrameSource {
    cfg: CameraConfig,
    tx: Arc<watch::Sender<Option<Arc<Frame>>>>,
    rx: watch::Receiver<Option<Arc<Frame>>>,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    child: ChildSlot,
    handle: Option<JoinHandle<()>>,
}

impl FrameSource {
    pub fn new(cfg: CameraConfig) -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            cfg,
            tx: Arc::new(tx),
            rx,
            stop: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            child: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    /// Spawns the acquisition thread. No-op while it is already running.
    pub fn start(&mut self) -> Result<&mut Self> {
        if self.is_running() {
            return Ok(self);
        }
        self.tx.send_replace(None);
        self.stop = Arc::new(AtomicBool::new(false));
        self.child = Arc::new(Mutex::new(None));

        let cfg = self.cfg.clone();
        let tx = self.tx.clone();
        let stop = self.stop.clone();
        let frames = self.frames.clone();
        let child = self.child.clone();
        let handle = thread::Builder::new()
            .name(format!("lit-camera-{}", self.cfg.index))
            .spawn(move || acquisition_loop(cfg, tx, stop, frames, child))
            .context("spawn camera thread")?;
        self.handle = Some(handle);
        Ok(self)
    }

    pub fn read(&self) -> Option<Arc<Frame>> {
        self.rx.borrow().clone()
    }

    pub fn reader(&self) -> FrameReader {
        FrameReader { rx: self.rx.clone() }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn stats(&self) -> FrameSourceStats {
        FrameSourceStats {
            frames_captured: self.frames.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }

    /// Signals the acquisition thread and waits up to `timeout` for it to
    /// release the camera. A capture subprocess is killed first so a stalled
    /// read cannot hold the thread. Calling it again is a no-op.
    pub fn stop(&mut self, timeout: Duration) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(status) = kill_child(&self.child) {
            debug!("vision: camera {} capture process ended ({})", self.cfg.index, status);
        }
        let Some(handle) = self.handle.take() else {
            return;
        };
        match join_with_timeout(handle, timeout) {
            Ok(Ok(())) => debug!("vision: camera {} released", self.cfg.index),
            Ok(Err(_)) => warn!("vision: camera {} thread panicked", self.cfg.index),
            Err(_) => warn!(
                "vision: camera {} still busy after {:?}; releasing in background",
                self.cfg.index, timeout
            ),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        kill_child(&self.child);
    }
}

fn acquisition_loop(
    cfg: CameraConfig,
    tx: Arc<watch::Sender<Option<Arc<Frame>>>>,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    child: ChildSlot,
) {
    let mut capture: Option<Capture> = None;
    let mut seq = 0u64;

    while !stop.load(Ordering::Relaxed) {
        if capture.is_none() {
            match Capture::open(&cfg, &child) {
                Ok(c) => {
                    info!("vision: camera {} opened ({}, {}x{})", cfg.index, cfg.mode, cfg.width, cfg.height);
                    capture = Some(c);
                }
                Err(e) => {
                    warn!("vision: camera {} unavailable: {:#}", cfg.index, e);
                    sleep_unless_stopped(REOPEN_BACKOFF, &stop);
                    continue;
                }
            }
        }
        let Some(cap) = capture.as_mut() else { continue };

        match cap.grab(&cfg) {
            Ok(img) => {
                seq += 1;
                frames.fetch_add(1, Ordering::Relaxed);
                tx.send_replace(Some(Arc::new(Frame::new(img, seq))));
            }
            // killed by stop()
            Err(_) if stop.load(Ordering::Relaxed) => break,
            Err(e) => {
                warn!("vision: camera {} read failed: {:#}", cfg.index, e);
                capture = None;
                sleep_unless_stopped(REOPEN_BACKOFF, &stop);
            }
        }
    }
    drop(capture);
    debug!("vision: camera {} acquisition stopped after {} frames", cfg.index, seq);
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let mut left = total;
    while !left.is_zero() && !stop.load(Ordering::Relaxed) {
        let step = left.min(STOP_POLL * 5);
        thread::sleep(step);
        left -= step;
    }
}

/// Joins `handle` if it finishes within `timeout`, otherwise hands it back.
pub(crate) fn join_with_timeout<T>(
    handle: JoinHandle<T>,
    timeout: Duration,
) -> std::result::Result<thread::Result<T>, JoinHandle<T>> {
    let deadline = std::time::Instant::now() + timeout;
    while !handle.is_finished() {
        if std::time::Instant::now() >= deadline {
            return Err(handle);
        }
        thread::sleep(STOP_POLL);
    }
    Ok(handle.join())
}
