use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use waterfall::{
    config, CaptureFile, ControlAction, ControlKey, JsonFileSource, SliceRange, SliceSource,
    SyntheticSource, WaterfallConfig, WaterfallSession,
};

#[derive(Parser)]
#[command(name = "waterfall-cli")]
#[command(about = "Waterfall viewer CLI - Headless spectrogram slice cache and playback")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Clone)]
struct CaptureArgs {
    /// Capture JSON file
    #[arg(long, conflicts_with = "synthetic")]
    capture: Option<PathBuf>,

    /// Generate a synthetic capture with this many slices
    #[arg(long, default_value = "512")]
    synthetic: usize,

    /// Frequency bins per synthetic slice
    #[arg(long, default_value = "64")]
    bins: usize,

    /// Artificial fetch latency for synthetic captures, in milliseconds
    #[arg(long, default_value = "0")]
    latency_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a capture and report cache state for the first window
    Inspect {
        #[command(flatten)]
        capture: CaptureArgs,

        /// Output report to JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Play a capture from a slice index
    Play {
        #[command(flatten)]
        capture: CaptureArgs,

        /// Starting slice index
        #[arg(long, default_value = "0")]
        start: usize,

        /// Playback speed in slices per second
        #[arg(long)]
        speed: Option<f64>,

        /// Stop after this many seconds
        #[arg(long)]
        limit_secs: Option<u64>,
    },

    /// Apply a sequence of key presses and print the viewport after each
    Navigate {
        #[command(flatten)]
        capture: CaptureArgs,

        /// Comma separated key names (ArrowLeft, ArrowRight, PageUp, PageDown, Home, End, Space)
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,

        /// Jump to this index before applying keys (free text, validated like the index field)
        #[arg(long)]
        goto: Option<String>,
    },

    /// Write a synthetic capture file
    Generate {
        /// Output file path
        output: PathBuf,

        #[arg(long, default_value = "256")]
        slices: usize,

        #[arg(long, default_value = "64")]
        bins: usize,

        /// Total advertised in metadata, if larger than the slices written
        #[arg(long)]
        total: Option<usize>,
    },

    /// Show the effective configuration
    Config {
        /// Write the defaults to the config path
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Inspect { capture, output } => {
            let config = load_config(&config_path)?;
            inspect_command(config, capture, output).await
        }
        Commands::Play {
            capture,
            start,
            speed,
            limit_secs,
        } => {
            let config = load_config(&config_path)?;
            play_command(config, capture, start, speed, limit_secs).await
        }
        Commands::Navigate {
            capture,
            keys,
            goto,
        } => {
            let config = load_config(&config_path)?;
            navigate_command(config, capture, keys, goto).await
        }
        Commands::Generate {
            output,
            slices,
            bins,
            total,
        } => generate_command(output, slices, bins, total).await,
        Commands::Config { init } => config_command(config_path, init).await,
    }
}

fn load_config(path: &PathBuf) -> Result<WaterfallConfig> {
    let config = WaterfallConfig::load_or_default(path)
        .with_context(|| format!("load config {}", path.display()))?;
    info!("Using config: {:?}", path);
    Ok(config)
}

fn open_source(args: &CaptureArgs) -> Result<Arc<dyn SliceSource>> {
    match &args.capture {
        Some(path) => {
            let source = JsonFileSource::open(path)
                .with_context(|| format!("open capture {}", path.display()))?;
            Ok(Arc::new(source))
        }
        None => {
            info!(
                "Using synthetic capture: {} slices x {} bins",
                args.synthetic, args.bins
            );
            let source = SyntheticSource::new("synthetic", args.synthetic, args.bins)
                .with_latency(Duration::from_millis(args.latency_ms));
            Ok(Arc::new(source))
        }
    }
}

fn viewport_json(session: &WaterfallSession) -> serde_json::Value {
    let controller = session.controller();
    let flags = controller.flags();
    let visible = session.visible_range();
    let loaded_rows = session.visible_rows().iter().filter(|r| r.is_some()).count();
    serde_json::json!({
        "current_index": controller.current_index(),
        "window": [visible.start, visible.end],
        "loaded_rows": loaded_rows,
        "playing": flags.is_playing,
        "can_increment": flags.can_increment,
        "can_decrement": flags.can_decrement,
        "can_scroll_up": flags.can_scroll_up,
        "can_scroll_down": flags.can_scroll_down,
    })
}

async fn inspect_command(
    config: WaterfallConfig,
    capture: CaptureArgs,
    output: Option<PathBuf>,
) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        let source = open_source(&capture)?;
        let mut session = WaterfallSession::open(config, source)?;
        if !session.wait_for_window(Duration::from_secs(10)) {
            warn!("First window did not finish loading");
        }
        let cache = session.cache();
        let total = cache.total_slices();
        let missing: Vec<SliceRange> = cache.missing_ranges(0, total);
        let current = session.current_slice().map(|slice| {
            serde_json::json!({
                "index": slice.index,
                "timestamp": slice.timestamp.map(|t| t.to_rfc3339()),
                "power_range_db": slice.power_range(),
                "peak_frequency_hz": slice.peak_bin().and_then(|b| slice.bin_frequency_hz(b)),
            })
        });
        let report = serde_json::json!({
            "session": session.id().0.to_string(),
            "capture_id": session.capture_id(),
            "total_slices": total,
            "window_size": session.config().window_size,
            "loaded_slices": cache.loaded_count(),
            "coverage": cache.coverage(),
            "missing_ranges": missing,
            "loading_ranges": cache.loading_ranges(),
            "current_slice": current,
            "viewport": viewport_json(&session),
            "stats": session.stats(),
        });
        Ok(report)
    })
    .await??;

    if let Some(output_path) = output {
        std::fs::write(&output_path, serde_json::to_string_pretty(&report)?)?;
        info!("Report written to: {:?}", output_path);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn play_command(
    config: WaterfallConfig,
    capture: CaptureArgs,
    start: usize,
    speed: Option<f64>,
    limit_secs: Option<u64>,
) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping playback");
                cancel.store(true, Ordering::Release);
            }
        });
    }

    let stats = tokio::task::spawn_blocking(move || -> Result<_> {
        let source = open_source(&capture)?;
        let mut session = WaterfallSession::open(config, source)?;
        session.handle(ControlAction::SetIndex(start));
        if let Some(speed) = speed {
            session.handle(ControlAction::SetPlaybackSpeed(speed));
        }
        info!(
            "Playing {} from slice {} at {} slices/s",
            session.capture_id(),
            session.controller().current_index(),
            session.controller().playback_speed()
        );

        let mut last_reported = None;
        let advanced = session.play(limit_secs.map(Duration::from_secs), &cancel, |s| {
            let index = s.controller().current_index();
            if last_reported == Some(index) {
                return;
            }
            last_reported = Some(index);
            match s.current_slice() {
                Some(slice) => info!(
                    "slice {:>6}  peak {:>10.3} MHz  window {}",
                    index,
                    slice
                        .peak_bin()
                        .and_then(|b| slice.bin_frequency_hz(b))
                        .unwrap_or(0.0)
                        / 1.0e6,
                    s.visible_range()
                ),
                None => info!("slice {:>6}  (loading)  window {}", index, s.visible_range()),
            }
        });
        info!("Playback advanced {} slices", advanced);
        Ok(session.close())
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn navigate_command(
    config: WaterfallConfig,
    capture: CaptureArgs,
    keys: Vec<String>,
    goto: Option<String>,
) -> Result<()> {
    let parsed = keys
        .iter()
        .map(|k| k.parse::<ControlKey>())
        .collect::<Result<Vec<_>, _>>()?;

    tokio::task::spawn_blocking(move || -> Result<()> {
        let source = open_source(&capture)?;
        let mut session = WaterfallSession::open(config, source)?;
        session.wait_for_window(Duration::from_secs(10));

        if let Some(text) = goto {
            if let Err(err) = session.submit_index_input(&text) {
                warn!("{}; index field reset to {}", err, session.controller().index_input());
            }
            session.wait_for_window(Duration::from_secs(10));
        }
        println!("{}", viewport_json(&session));

        for key in parsed {
            let changed = session.handle_key(key);
            session.wait_for_window(Duration::from_secs(10));
            let mut state = viewport_json(&session);
            state["key"] = serde_json::json!(key.description());
            state["changed"] = serde_json::json!(changed);
            println!("{}", state);
        }
        Ok(())
    })
    .await?
}

async fn generate_command(
    output: PathBuf,
    slices: usize,
    bins: usize,
    total: Option<usize>,
) -> Result<()> {
    let capture_id = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("capture")
        .to_string();
    let source = SyntheticSource::new(capture_id.clone(), slices, bins);
    let capture = CaptureFile {
        capture_id,
        total_slices: total.filter(|t| *t > slices),
        slices: if slices == 0 {
            Vec::new()
        } else {
            source.fetch(SliceRange::new(0, slices))?
        },
    };
    JsonFileSource::save(&capture, &output)?;
    info!("Capture written to: {:?} ({} slices)", output, slices);
    Ok(())
}

async fn config_command(path: PathBuf, init: bool) -> Result<()> {
    if init {
        if path.exists() {
            warn!("Config already exists: {:?}", path);
        } else {
            WaterfallConfig::default().save(&path)?;
            info!("Default config written to: {:?}", path);
        }
    }
    let config = WaterfallConfig::load_or_default(&path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
