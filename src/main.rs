use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use streetwatch::capture::{CaptureSource, MjpegCapture};
use streetwatch::detect::YoloDetector;
use streetwatch::display::{DisplaySink, SnapshotSink};
use streetwatch::registry::SourceRegistry;
use streetwatch::session::{run_session, FeedMode, RetryPolicy, SessionConfig, StopToken};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the camera registry (JSON object of name -> stream URL)
    #[arg(long, default_value = "cctv_sources.json")]
    registry: String,

    /// Camera to monitor: registry key, display title, or numeric index
    #[arg(short, long)]
    source: Option<String>,

    /// List available cameras and exit
    #[arg(long)]
    list_sources: bool,

    /// Path to the detection model (ONNX file)
    #[arg(short, long, default_value = "streets.onnx")]
    model: String,

    /// Model input resolution (square)
    #[arg(long, default_value_t = 640)]
    model_size: u32,

    /// Detection confidence threshold, 0.0 to 1.0
    #[arg(short, long, default_value_t = 0.5)]
    confidence: f32,

    /// Run inference on every Nth frame (1 = every frame)
    #[arg(long, default_value_t = 1)]
    frame_skip: u32,

    /// Working resolution width (frames are downscaled before inference)
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Working resolution height
    #[arg(long, default_value_t = 450)]
    height: u32,

    /// Cap on detections per frame
    #[arg(long)]
    max_detections: Option<usize>,

    /// Hide the FPS readout on published frames
    #[arg(long)]
    no_fps: bool,

    /// Decode frames on a background worker instead of in the display loop
    #[arg(long)]
    background_grab: bool,

    /// Reconnect attempts when the stream dies mid-session
    #[arg(long, default_value_t = 3)]
    max_reconnects: u32,

    /// Initial reconnect backoff in milliseconds (doubles per attempt, capped)
    #[arg(long, default_value_t = 500)]
    reconnect_backoff_ms: u64,

    /// Where the annotated JPEG is kept up to date
    #[arg(short, long, default_value = "latest.jpg")]
    output: String,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("streetwatch starting");

    let registry = SourceRegistry::load(&args.registry)
        .with_context(|| format!("Failed to load camera registry {}", args.registry))?;

    if args.list_sources {
        if registry.is_empty() {
            println!("No cameras available.");
        } else {
            for (index, entry) in registry.entries().iter().enumerate() {
                println!("{:>3}  {}  ({})", index, entry.title(), entry.url);
            }
        }
        return Ok(());
    }

    if registry.is_empty() {
        bail!(
            "Camera registry {} has no entries; nothing to monitor",
            args.registry
        );
    }

    let entry = match &args.source {
        Some(selector) => match selector.parse::<usize>() {
            Ok(index) => registry
                .get(index)
                .ok_or_else(|| anyhow!("No camera at index {} ({} available)", index, registry.len()))?,
            Err(_) => registry
                .find(selector)
                .ok_or_else(|| anyhow!("No camera named '{}'", selector))?,
        },
        None => registry
            .get(0)
            .ok_or_else(|| anyhow!("Camera registry {} has no entries", args.registry))?,
    };

    if !(0.0..=1.0).contains(&args.confidence) {
        bail!("Confidence must be between 0.0 and 1.0");
    }
    if args.frame_skip == 0 {
        bail!("Frame skip must be at least 1");
    }
    if args.width == 0 || args.height == 0 {
        bail!("Working resolution must be non-zero");
    }
    if args.model_size == 0 {
        bail!("Model input size must be non-zero");
    }

    tracing::info!("Monitoring {} ({})", entry.title(), entry.url);

    let mut detector = YoloDetector::new(&args.model, args.model_size, args.model_size)
        .with_context(|| format!("Failed to load detection model {}", args.model))?;

    let mut sink = SnapshotSink::new(&args.output);
    tracing::info!("Annotated frames at {}", sink.path().display());

    let config = SessionConfig {
        confidence: args.confidence,
        frame_skip: args.frame_skip,
        working_width: args.width,
        working_height: args.height,
        max_detections: args.max_detections,
        show_fps: !args.no_fps,
        retry: RetryPolicy {
            max_attempts: args.max_reconnects,
            initial_backoff: Duration::from_millis(args.reconnect_backoff_ms),
            ..RetryPolicy::default()
        },
    };

    let stop = StopToken::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Stop requested");
            stop.stop();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let mode = if args.background_grab {
        FeedMode::Background
    } else {
        FeedMode::Direct
    };

    let url = entry.url.clone();
    let stats = run_session(
        || Box::new(MjpegCapture::new(url.clone())) as Box<dyn CaptureSource>,
        mode,
        &mut detector,
        &mut sink as &mut dyn DisplaySink,
        &config,
        &stop,
    )
    .with_context(|| format!("Stream session for {} failed", entry.title()))?;

    tracing::info!(
        "Done: {} frame(s) observed, {} published",
        stats.frames_observed,
        stats.frames_processed
    );

    Ok(())
}
