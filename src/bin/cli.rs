//! CLI application: run the happiness monitor against a video source.
//!
//! Usage:
//!   happy-face --source faces/                   # Replay a directory of stills
//!   happy-face --webcam 0 --duration 30          # Live camera (`webcam` feature)
//!   happy-face --source face.jpg --debug --snapshot overlay.png
//!   happy-face --source faces/ --json -o run.json

use clap::Parser;
use happy_face::{
    Camera, Detector, FaceMonitor, MonitorConfig, RenderMode, SeetaDetector, SeetaSettings,
    StillCamera,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(name = "happy-face")]
#[command(author, version, about = "Webcam happiness monitor", long_about = None)]
struct Args {
    /// Image file or directory of images to replay as the camera feed
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Capture from this camera device instead
    #[cfg(feature = "webcam")]
    #[arg(long)]
    webcam: Option<u32>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the model files
    #[arg(long)]
    models: Option<PathBuf>,

    /// Draw boxes, landmarks and expression bars
    #[arg(long)]
    debug: bool,

    /// Page query string; a `debug` key enables debug rendering
    #[arg(long)]
    query: Option<String>,

    /// How long to watch, in seconds
    #[arg(short, long, default_value = "10")]
    duration: f32,

    /// Minimum face size for detection
    #[arg(long, default_value = "20")]
    min_face_size: u32,

    /// Save the final composed frame as an image
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Output as JSON
    #[arg(short, long)]
    json: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Output structure for JSON serialization
#[derive(Serialize)]
struct Output {
    source: String,
    detector: String,
    display: String,
    render_mode: RenderMode,
    duration_secs: f32,
    ticks: TickOutput,
    frames_rendered: u64,
    faces_last_frame: usize,
    /// Fraction of the watch time with the happy flag set
    happy_fraction: f32,
    happy_at_end: bool,
    changes: Vec<ChangeOutput>,
}

#[derive(Serialize)]
struct TickOutput {
    fired: u64,
    submitted: u64,
    failed: u64,
    stale: u64,
}

#[derive(Serialize)]
struct ChangeOutput {
    at_ms: u64,
    happy: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match args.config {
        Some(ref path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(ref dir) = args.models {
        config.models.root = dir.clone();
    }
    if args.debug {
        config.render_mode = RenderMode::Debug;
    }
    if let Some(ref query) = args.query {
        config.apply_query(query);
    }
    config.validate()?;

    let (camera, source) = open_camera(args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(watch(args, config, camera, source))?;

    let output_str = if args.json {
        serde_json::to_string_pretty(&output)?
    } else {
        format_human_readable(&output)
    };

    if let Some(ref path) = args.output {
        std::fs::write(path, &output_str)?;
        log::info!("Output written to {:?}", path);
    } else {
        println!("{}", output_str);
    }

    Ok(())
}

fn open_camera(args: &Args) -> Result<(Arc<dyn Camera>, String), Box<dyn std::error::Error>> {
    #[cfg(feature = "webcam")]
    if let Some(index) = args.webcam {
        let camera = happy_face::Webcam::new(index);
        return Ok((Arc::new(camera), format!("webcam {}", index)));
    }

    let Some(ref path) = args.source else {
        return Err("no video source; pass --source <image or directory>".into());
    };
    log::debug!("Loading still images from {:?}", path);
    let camera = StillCamera::open(path)?;
    Ok((Arc::new(camera), path.display().to_string()))
}

async fn watch(
    args: &Args,
    config: MonitorConfig,
    camera: Arc<dyn Camera>,
    source: String,
) -> Result<Output, Box<dyn std::error::Error>> {
    let detector = Arc::new(SeetaDetector::spawn(SeetaSettings {
        min_face_size: args.min_face_size,
        ..Default::default()
    })?);

    let monitor = FaceMonitor::new(config, camera, detector.clone())?;
    log::info!("Loading models from {:?}...", monitor.config().models.root());
    monitor.load_models(detector.clone()).await?;

    monitor.open()?;
    let mut happiness = monitor.subscribe_happiness();

    let duration = Duration::from_secs_f32(args.duration.max(0.0));
    let started = Instant::now();
    let deadline = sleep(duration);
    tokio::pin!(deadline);

    let mut changes = Vec::new();
    let mut happy = false;
    let mut happy_since = started;
    let mut happy_time = Duration::ZERO;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            changed = happiness.changed() => {
                if changed.is_err() {
                    break;
                }
                let now_happy = *happiness.borrow_and_update();
                if now_happy == happy {
                    continue;
                }
                let now = Instant::now();
                if happy {
                    happy_time += now - happy_since;
                } else {
                    happy_since = now;
                }
                happy = now_happy;
                log::info!("{}", if happy { "Happy :)" } else { "Not happy" });
                changes.push(ChangeOutput {
                    at_ms: (now - started).as_millis() as u64,
                    happy,
                });
            }
        }
    }
    if happy {
        happy_time += Instant::now() - happy_since;
    }

    if let Some(error) = monitor.last_error() {
        monitor.close();
        return Err(error.into());
    }

    if let Some(ref path) = args.snapshot {
        monitor.overlay().advance_glyph(monitor.config().fade());
        let frame = monitor.sink().latest_frame();
        monitor.overlay().compose(frame.as_ref()).save(path)?;
        log::info!("Snapshot written to {:?}", path);
    }

    let overlay = monitor.overlay();
    let stats = monitor.stats();
    let output = Output {
        source,
        detector: detector.name().to_string(),
        display: monitor.config().display.to_string(),
        render_mode: monitor.config().render_mode,
        duration_secs: duration.as_secs_f32(),
        ticks: TickOutput {
            fired: stats.ticks(),
            submitted: stats.submitted(),
            failed: stats.failed(),
            stale: stats.stale(),
        },
        frames_rendered: overlay.frames_rendered(),
        faces_last_frame: overlay.faces(),
        happy_fraction: if duration.is_zero() {
            0.0
        } else {
            happy_time.as_secs_f32() / duration.as_secs_f32()
        },
        happy_at_end: monitor.is_happy(),
        changes,
    };

    monitor.close();
    Ok(output)
}

fn format_human_readable(output: &Output) -> String {
    let mut s = String::new();

    s.push_str(&format!("Source: {} ({} detector)\n", output.source, output.detector));
    s.push_str(&format!("Display: {} ({:?} mode)\n", output.display, output.render_mode));
    s.push_str(&format!("Watched: {:.1}s\n", output.duration_secs));

    s.push_str("\nInference:\n");
    s.push_str(&format!("  Ticks:     {}\n", output.ticks.fired));
    s.push_str(&format!("  Submitted: {}\n", output.ticks.submitted));
    s.push_str(&format!("  Failed:    {}\n", output.ticks.failed));
    s.push_str(&format!("  Stale:     {}\n", output.ticks.stale));
    s.push_str(&format!("  Rendered:  {}\n", output.frames_rendered));
    s.push_str(&format!("  Faces in last frame: {}\n", output.faces_last_frame));

    s.push_str("\nHappiness:\n");
    s.push_str(&format!("  Happy {:.1}% of the time\n", output.happy_fraction * 100.0));
    if output.changes.is_empty() {
        s.push_str("  No changes.\n");
    }
    for change in &output.changes {
        s.push_str(&format!(
            "  {:>7.2}s  {}\n",
            change.at_ms as f32 / 1000.0,
            if change.happy { "happy" } else { "not happy" }
        ));
    }
    s.push_str(&format!("  Happy at end: {}\n", if output.happy_at_end { "yes" } else { "no" }));

    s
}
