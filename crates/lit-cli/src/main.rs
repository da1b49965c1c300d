mod config;
mod gui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::{info, warn};

use lit_uplink::doctor as uplink_doctor;
use lit_vision::labels::Labels;
use lit_vision::pipeline::{FrameProcessor, HandPipeline};
use lit_vision::session::DetectionSession;
use lit_vision::Detector;

#[cfg(feature = "vision-tflite")]
use lit_vision::tflite::{self, TfliteDetector, TfliteHandLandmarker, TfliteKeypointClassifier};

use config::Config;
use gui::SnapshotSink;

#[derive(Debug, Parser)]
#[command(name = "lit", version, about = "LIT - camera-reactive LED illumination")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate config, model and label files, and the uplink endpoint.
    Doctor,
    /// Run detection until Ctrl-C.
    Run,
    /// Print the FOV to LED zone table for the configured camera.
    Layout,
    Vision { #[command(subcommand)] cmd: VisionCmd },
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Run => run(cfg).await?,
        Command::Layout => layout(&cfg)?,
        Command::Vision { cmd } => vision_cmd(&cfg, cmd)?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    cfg.validate()?;

    let model = cfg.detector.active_model();
    anyhow::ensure!(std::path::Path::new(model).is_file(), "detector model missing: {}", model);
    let labels = Labels::load_labelmap(&cfg.detector.label_path)?;
    info!("doctor: {} detector labels", labels.len());

    if cfg.gesture.enable {
        for p in [&cfg.gesture.landmark_model_path, &cfg.gesture.classifier_model_path] {
            anyhow::ensure!(std::path::Path::new(p).is_file(), "gesture model missing: {}", p);
        }
        let labels = Labels::load_csv(&cfg.gesture.label_path)?;
        info!("doctor: {} gesture labels", labels.len());
    }

    if cfg.uplink.enable {
        match uplink_doctor::probe(&cfg.uplink).await {
            Ok(rtt) => info!("doctor: uplink reachable ({}ms)", rtt.as_millis()),
            Err(e) => warn!("doctor: uplink unreachable: {:#}", e),
        }
    }

    info!("doctor: OK");
    Ok(())
}

fn layout(cfg: &Config) -> Result<()> {
    let (profile, layout) = cfg.layout()?;
    println!(
        "camera {}: {}x{} hfov={} vfov={} focal={:.1}px",
        cfg.camera.index, profile.width, profile.height, profile.hfov_deg, profile.vfov_deg, profile.focal_length_px
    );
    println!("leds: {} in {} sections", layout.num_leds(), layout.led_sections().len());
    for (bounds, range) in layout.fov_boundaries().windows(2).zip(layout.led_sections()) {
        println!(
            "  {:+7.2} .. {:+7.2} deg -> leds {}..{}",
            bounds[0], bounds[1], range.start, range.end
        );
    }
    if layout.led_sections().last().is_some_and(|r| r.end > layout.num_leds()) {
        warn!("layout: last zone extends past led {}", layout.num_leds());
    }
    Ok(())
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => {
            #[cfg(feature = "vision-tflite")]
            {
                print!("{}", tflite::inspect(cfg.detector.active_model(), cfg.detector.use_coral)?);
                if cfg.gesture.enable {
                    print!("{}", tflite::inspect(&cfg.gesture.landmark_model_path, false)?);
                    print!("{}", tflite::inspect(&cfg.gesture.classifier_model_path, false)?);
                }
                return Ok(());
            }
            #[allow(unreachable_code)]
            {
                let _ = cfg;
                anyhow::bail!("vision backend not available; build with --features vision-tflite");
            }
        }
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!("run: starting");
    cfg.validate()?;

    // everything fallible happens before the loop starts
    let labels = Labels::load_labelmap(&cfg.detector.label_path)?;
    let detector = init_detector(&cfg)?;
    let mut processor = FrameProcessor::new(cfg.pipeline(), &cfg.camera, detector, labels)?;
    if let Some(hands) = init_hands(&cfg)? {
        processor = processor.with_hands(hands);
    }
    let gui = SnapshotSink::new(cfg.gui.snapshot_dir.clone(), cfg.gui.snapshot_every_n)?;
    processor = processor.with_event_sink(Box::new(gui));

    let uplink = if cfg.uplink.enable {
        let (tx, handle) = lit_uplink::spawn(&cfg.uplink)?;
        processor = processor.with_led_sink(Box::new(tx));
        info!("run: forwarding LED frames to {}", cfg.uplink.endpoint);
        Some(handle)
    } else {
        warn!("run: uplink disabled; LED frames are computed but not sent");
        None
    };

    let mut session = DetectionSession::new(cfg.camera.clone(), &cfg.session, processor);
    session.start()?;

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("run: stopping");

    // dropping the session drops the LED sender, which ends the uplink task
    tokio::task::spawn_blocking(move || {
        session.stop();
        drop(session);
    })
    .await
    .context("join session stop")?;

    if let Some(handle) = uplink {
        match tokio::time::timeout(Duration::from_secs(2), handle).await {
            Ok(Ok(health)) => info!(
                "run: uplink closed (quality: {}%, failures: {})",
                health.quality, health.consecutive_failures
            ),
            Ok(Err(e)) => warn!("run: uplink task failed: {:#}", e),
            Err(_) => warn!("run: uplink still busy at shutdown"),
        }
    }
    info!("run: stopped");
    Ok(())
}

// --- model init helpers ---
fn init_detector(cfg: &Config) -> Result<Box<dyn Detector>> {
    #[cfg(not(feature = "vision-tflite"))]
    {
        let _ = cfg;
        anyhow::bail!("vision enabled but binary not built with --features vision-tflite");
    }

    #[cfg(feature = "vision-tflite")]
    {
        let d = TfliteDetector::new(cfg.detector.active_model(), cfg.detector.use_coral)?;
        Ok(Box::new(d))
    }
}

fn init_hands(cfg: &Config) -> Result<Option<HandPipeline>> {
    if !cfg.gesture.enable {
        return Ok(None);
    }
    let labels = Labels::load_csv(&cfg.gesture.label_path)?;

    #[cfg(not(feature = "vision-tflite"))]
    {
        let _ = labels;
        anyhow::bail!("gesture.enable=true but binary not built with --features vision-tflite");
    }

    #[cfg(feature = "vision-tflite")]
    {
        let landmarker = TfliteHandLandmarker::new(&cfg.gesture.landmark_model_path, cfg.gesture.min_hand_presence)?;
        let classifier = TfliteKeypointClassifier::new(&cfg.gesture.classifier_model_path)?;
        Ok(Some(HandPipeline::new(Box::new(landmarker), Box::new(classifier), labels)))
    }
}
