use anyhow::Result;
use lit_proto::led::{LedFrame, LedRange};
use lit_vision::camera::CameraConfig;
use lit_vision::labels::Labels;
use lit_vision::pipeline::{FrameProcessor, PipelineConfig};
use lit_vision::session::{DetectionSession, SessionConfig};
use lit_vision::sink::LedSink;
use lit_vision::{Detector, Frame, RawDetections};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Sees one person filling the whole frame.
struct WholeFramePerson;

impl Detector for WholeFramePerson {
    fn detect(&mut self, _frame: &Frame) -> Result<RawDetections> {
        Ok(RawDetections {
            boxes: vec![[0.0, 0.0, 1.0, 1.0]],
            classes: vec![0],
            scores: vec![0.92],
        })
    }
}

/// Panics on every other call, otherwise sees a whole-frame person.
struct FlakyDetector {
    calls: usize,
}

impl Detector for FlakyDetector {
    fn detect(&mut self, frame: &Frame) -> Result<RawDetections> {
        self.calls += 1;
        if self.calls % 2 == 1 {
            panic!("interpreter invoke crashed");
        }
        WholeFramePerson.detect(frame)
    }
}

/// Takes `delay` per call and counts how many calls have begun.
struct SlowDetector {
    delay: Duration,
    entered: Arc<AtomicUsize>,
}

impl Detector for SlowDetector {
    fn detect(&mut self, frame: &Frame) -> Result<RawDetections> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        WholeFramePerson.detect(frame)
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<LedFrame>>>);

impl LedSink for Recorder {
    fn forward(&mut self, frame: LedFrame) -> Result<()> {
        self.0.lock().unwrap().push(frame);
        Ok(())
    }
}

fn stub_camera(device: Option<&str>) -> CameraConfig {
    CameraConfig {
        mode: "stub".into(),
        index: 3,
        device: device.map(str::to_string),
        width: 64,
        height: 36,
        fps: 100,
        ..CameraConfig::default()
    }
}

fn session(camera: CameraConfig, rec: &Recorder) -> DetectionSession {
    let cfg = SessionConfig { stop_timeout_ms: 2000, idle_sleep_ms: 5 };
    session_with(camera, Box::new(WholeFramePerson), rec, &cfg)
}

fn session_with(
    camera: CameraConfig,
    detector: Box<dyn Detector>,
    rec: &Recorder,
    cfg: &SessionConfig,
) -> DetectionSession {
    let pipeline = PipelineConfig { camera_index: 3, ..PipelineConfig::default() };
    let processor = FrameProcessor::new(pipeline, &camera, detector, Labels::new(vec!["person".into()]))
        .unwrap()
        .with_led_sink(Box::new(rec.clone()));
    DetectionSession::new(camera, cfg, processor)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn session_forwards_led_frames_until_stopped() {
    let rec = Recorder::default();
    let mut s = session(stub_camera(None), &rec);

    s.start().unwrap();
    assert!(s.is_running());
    // second start while running is a no-op
    s.start().unwrap();
    assert!(s.is_running());

    assert!(wait_until(Duration::from_secs(5), || rec.0.lock().unwrap().len() >= 3));

    s.stop();
    assert!(!s.is_running());
    s.stop();

    let frames = rec.0.lock().unwrap().clone();
    let first = &frames[0];
    assert_eq!(first.camera_index, 3);
    assert_eq!(first.commands.len(), 1);
    // box centre sits just right of the axis: fourth zone of eight
    assert_eq!(first.commands[0].range, LedRange::new(96, 128));

    // nothing is forwarded once stopped
    let count = frames.len();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(rec.0.lock().unwrap().len(), count);
}

#[test]
fn session_restarts_after_stop() {
    let rec = Recorder::default();
    let mut s = session(stub_camera(None), &rec);
    s.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || !rec.0.lock().unwrap().is_empty()));
    s.stop();

    let before = rec.0.lock().unwrap().len();
    s.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || rec.0.lock().unwrap().len() > before));
    s.stop();
}

#[test]
fn offline_camera_runs_without_frames() {
    let rec = Recorder::default();
    let mut s = session(stub_camera(Some("offline")), &rec);
    s.start().unwrap();
    thread::sleep(Duration::from_millis(150));
    assert!(s.is_running());
    assert!(rec.0.lock().unwrap().is_empty());

    let started = Instant::now();
    s.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn panicking_detector_skips_frames_and_session_restarts() {
    let rec = Recorder::default();
    let cfg = SessionConfig { stop_timeout_ms: 2000, idle_sleep_ms: 5 };
    let mut s = session_with(stub_camera(None), Box::new(FlakyDetector { calls: 0 }), &rec, &cfg);

    s.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || rec.0.lock().unwrap().len() >= 3));
    assert!(s.is_running());
    s.stop();

    // the processor survived the panics and is available again
    let before = rec.0.lock().unwrap().len();
    s.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || rec.0.lock().unwrap().len() > before));
    s.stop();
}

#[test]
fn start_fails_while_previous_loop_is_draining() {
    let rec = Recorder::default();
    let entered = Arc::new(AtomicUsize::new(0));
    let detector = SlowDetector { delay: Duration::from_millis(600), entered: entered.clone() };
    let cfg = SessionConfig { stop_timeout_ms: 50, idle_sleep_ms: 5 };
    let mut s = session_with(stub_camera(None), Box::new(detector), &rec, &cfg);

    s.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || entered.load(Ordering::SeqCst) >= 1));
    // the loop is inside a detect call that outlasts the stop timeout
    s.stop();
    assert!(!s.is_running());
    assert!(s.is_draining());
    assert!(s.start().is_err());

    // once the old loop exits its processor is reused
    assert!(wait_until(Duration::from_secs(5), || s.start().is_ok()));
    assert!(s.is_running());
    assert!(!s.is_draining());
}
