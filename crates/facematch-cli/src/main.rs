use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use facematch_core::analyzer::shared;
use facematch_core::detector::ScrfdDetector;
use facematch_core::gallery::{gallery_files, identity_name};
use facematch_core::recognizer::OnnxEmbedder;
use facematch_core::{EmbeddingStore, OnnxFaceAnalyzer, SharedAnalyzer};
use facematch_engine::{
    save_snapshot, ChannelSink, Config, DisplayUpdate, Enroller, RecognitionSession,
};
use facematch_hw::{
    Camera, CameraOpener, FrameSource, ImageFileOpener, ImageFileSource, V4lCameraOpener,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const PREVIEW_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "facematch", about = "Live face recognition against a gallery of known faces")]
struct Cli {
    /// TOML config file (FACEMATCH_* environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces from the camera until Ctrl-C; Enter saves a snapshot
    Run {
        /// Write the latest annotated frame to this image file about once per second
        #[arg(long)]
        preview: Option<PathBuf>,
        /// Replay a still image instead of reading the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Register a new identity from one camera frame
    Enroll {
        /// Identity name; the gallery image is saved as <name>.jpg
        name: String,
        /// Enroll from an image file instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Save one raw camera frame as snapshot_HH-MM-SS.jpg (camera must be free)
    Snapshot,
    /// List enrolled identities
    List {
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Serialize)]
struct IdentityListing {
    name: String,
    path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::List { json } => {
            let config = Config::load(cli.config.as_deref())?;
            list_identities(&config, json)
        }
        Commands::Snapshot => {
            let config = Config::load(cli.config.as_deref())?;
            take_snapshot(&config)
        }
        Commands::Enroll { name, image } => {
            let config = Config::load(cli.config.as_deref())?;
            enroll(&config, &name, image.as_deref())
        }
        Commands::Run { preview, image } => {
            let config = Config::load(cli.config.as_deref())?;
            run(&config, preview, image).await
        }
    }
}

async fn run(config: &Config, preview: Option<PathBuf>, image: Option<PathBuf>) -> Result<()> {
    let analyzer = load_analyzer(config)?;
    let gallery = Arc::new(load_gallery(config, &analyzer)?);
    println!("Loaded {} known faces", gallery.len());

    let opener: Arc<dyn CameraOpener> = match &image {
        Some(path) => Arc::new(ImageFileOpener::new(path.clone())),
        None => Arc::new(V4lCameraOpener {
            device_path: config.camera_device.clone(),
            width: config.capture_width,
            height: config.capture_height,
        }),
    };
    let source_name = image
        .as_deref()
        .map_or_else(|| config.camera_device.clone(), |p| p.display().to_string());
    let (sink, updates) = ChannelSink::bounded(2);
    let mut session =
        RecognitionSession::from_config(config, opener, analyzer, gallery, Arc::new(sink))?;

    let consumer = tokio::task::spawn_blocking(move || consume_updates(updates, preview));

    session.start().context("failed to start recognition")?;
    println!("Recognition started on {source_name} (Enter for a snapshot, Ctrl-C to stop)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => match session.snapshot(&config.snapshot_dir) {
                    Ok(path) => println!("Snapshot saved as {}", path.display()),
                    Err(e) => eprintln!("snapshot failed: {e}"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin closed; snapshots disabled");
                    stdin_open = false;
                }
            },
        }
    }
    tracing::info!("interrupt received; stopping recognition");
    session.stop()?;
    drop(session);

    consumer.await?;
    Ok(())
}

/// Log status changes and refresh the preview file until the session goes away.
fn consume_updates(updates: Receiver<DisplayUpdate>, preview: Option<PathBuf>) {
    let mut last_status = String::new();
    let mut last_preview: Option<Instant> = None;

    for update in updates {
        if update.status != last_status {
            tracing::info!(status = %update.status, "display");
            last_status = update.status.clone();
        }

        let Some(path) = preview.as_deref() else {
            continue;
        };
        if !update.has_frame() || last_preview.is_some_and(|t| t.elapsed() < PREVIEW_INTERVAL) {
            continue;
        }
        match update.frame.save(path) {
            Ok(()) => last_preview = Some(Instant::now()),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to write preview"),
        }
    }
}

fn enroll(config: &Config, name: &str, image: Option<&Path>) -> Result<()> {
    let analyzer = load_analyzer(config)?;
    let gallery = Arc::new(load_gallery(config, &analyzer)?);
    let enroller = Enroller::new(analyzer, gallery, config.gallery_dir.clone());

    let mut source: Box<dyn FrameSource> = match image {
        Some(path) => Box::new(ImageFileSource::open(path)?.with_frame_limit(1)),
        None => Box::new(open_camera(config)?),
    };

    let outcome = enroller.enroll(name, source.as_mut())?;
    if outcome.replaced {
        println!("Updated face '{}' ({})", outcome.name, outcome.image_path.display());
    } else {
        println!("New face '{}' registered ({})", outcome.name, outcome.image_path.display());
    }
    Ok(())
}

fn take_snapshot(config: &Config) -> Result<()> {
    let mut camera = open_camera(config)?;
    let frame = camera.capture_frame()?;
    let path = save_snapshot(&frame.image, &config.snapshot_dir)?;
    println!("Snapshot saved as {}", path.display());
    Ok(())
}

fn list_identities(config: &Config, json: bool) -> Result<()> {
    let listings: Vec<IdentityListing> = if config.gallery_dir.is_dir() {
        gallery_files(&config.gallery_dir)?
            .into_iter()
            .filter_map(|path| identity_name(&path).map(|name| IdentityListing { name, path }))
            .collect()
    } else {
        Vec::new()
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
    } else if listings.is_empty() {
        println!("No faces enrolled in {}", config.gallery_dir.display());
    } else {
        for listing in &listings {
            println!("{:<24} {}", listing.name, listing.path.display());
        }
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in devices {
        println!("{:<14} {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(())
}

fn load_analyzer(config: &Config) -> Result<SharedAnalyzer> {
    let detector = ScrfdDetector::load(&config.detector_model_path())
        .context("failed to load face detector")?;
    let embedder = OnnxEmbedder::load(&config.embedder_model_path(), config.embedder.clone())
        .context("failed to load embedding model")?;
    Ok(shared(OnnxFaceAnalyzer::new(detector, embedder)))
}

fn load_gallery(config: &Config, analyzer: &SharedAnalyzer) -> Result<EmbeddingStore> {
    let mut guard = analyzer.lock().unwrap_or_else(PoisonError::into_inner);
    let (store, warnings) = EmbeddingStore::load(&config.gallery_dir, &mut **guard)?;
    for warning in &warnings {
        eprintln!("warning: skipped {}: {}", warning.path.display(), warning.reason);
    }
    Ok(store)
}

fn open_camera(config: &Config) -> Result<Camera> {
    let mut camera = Camera::open(&config.camera_device, config.capture_width, config.capture_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    for _ in 0..config.warmup_frames {
        let _ = camera.capture_frame();
    }
    Ok(camera)
}
