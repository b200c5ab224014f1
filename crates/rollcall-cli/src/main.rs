use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use rollcall_core::{OnnxEngine, Roster};
use rollcall_hw::{Camera, JpegPreview, MjpegAviWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod ledger;
mod session;

use config::Config;
use ledger::AttendanceLedger;
use session::{DisplaySink, NullDisplay, Session, SessionOptions};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance tracker")]
struct Cli {
    /// TOML config file (default: $ROLLCALL_CONFIG if set)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an attendance session from the camera
    Run {
        /// V4L2 device path
        #[arg(long)]
        device: Option<String>,
        /// Directory of reference images
        #[arg(long)]
        faces_dir: Option<PathBuf>,
        /// Directory for the attendance log and recording
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Match threshold (lower = stricter)
        #[arg(long)]
        threshold: Option<f32>,
        /// Disable the live JPEG preview
        #[arg(long)]
        no_preview: bool,
    },
    /// Enroll the reference directory and print the roster
    Roster {
        /// Directory of reference images
        #[arg(long)]
        faces_dir: Option<PathBuf>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            device,
            faces_dir,
            output_dir,
            threshold,
            no_preview,
        } => {
            if let Some(v) = device {
                config.camera_device = v;
            }
            if let Some(v) = faces_dir {
                config.known_faces_dir = v;
            }
            if let Some(v) = output_dir {
                config.output_dir = v;
            }
            if let Some(v) = threshold {
                config.match_threshold = v;
            }
            if no_preview {
                config.preview = false;
            }
            run_session(config).await
        }
        Commands::Roster { faces_dir, json } => {
            if let Some(v) = faces_dir {
                config.known_faces_dir = v;
            }
            print_roster(&config, json)
        }
        Commands::Devices { json } => {
            print_devices(json);
            Ok(())
        }
    }
}

async fn run_session(config: Config) -> Result<()> {
    // Fail-fast resource acquisition: models, roster, camera and both
    // output files are all in place before the first frame is pulled.
    let mut engine = OnnxEngine::load(
        &config.detector_model_path(),
        &config.encoder_model_path(),
    )?;

    tracing::info!(dir = %config.known_faces_dir.display(), "loading known faces");
    let roster = Roster::enroll_dir(&config.known_faces_dir, &mut engine)?;
    if roster.is_empty() {
        tracing::warn!("roster is empty; every face this session will be unknown");
    }

    let camera = Camera::open(&config.camera_device)?;

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("cannot create output dir {}", config.output_dir.display())
    })?;
    let date = Local::now().format("%Y-%m-%d").to_string();
    let attendance_path = config.attendance_path(&date);
    let video_path = config.video_path(&date);

    let log_file = File::create(&attendance_path)
        .with_context(|| format!("cannot create {}", attendance_path.display()))?;
    let ledger = AttendanceLedger::new(BufWriter::new(log_file))?;

    let video = MjpegAviWriter::create(&video_path, camera.width, camera.height, config.video_fps)?;

    let display: Box<dyn DisplaySink + Send> = if config.preview {
        Box::new(JpegPreview::new(config.preview_path()))
    } else {
        Box::new(NullDisplay)
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received, stopping after the current frame");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let opts = SessionOptions {
        threshold: config.match_threshold,
        downscale: config.detect_downscale,
    };
    let warmup_frames = config.warmup_frames;

    // The session owns the camera and models on one dedicated thread; the
    // async side only waits for the report.
    let report = tokio::task::spawn_blocking(move || -> Result<session::SessionReport> {
        let mut stream = camera.stream()?;
        stream.discard(warmup_frames);

        let mut session = Session::new(stream, engine, roster, ledger, video, display, stop, opts);
        Ok(session.run())
    })
    .await??;

    tracing::info!(
        session = %report.id,
        end = ?report.end,
        frames = report.frames,
        faces = report.faces,
        present = report.marked.len(),
        "session complete"
    );
    tracing::info!(path = %attendance_path.display(), "attendance saved");
    tracing::info!(path = %video_path.display(), "video saved");

    Ok(())
}

fn print_roster(config: &Config, json: bool) -> Result<()> {
    let mut engine = OnnxEngine::load(
        &config.detector_model_path(),
        &config.encoder_model_path(),
    )?;
    let roster = Roster::enroll_dir(&config.known_faces_dir, &mut engine)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "count": roster.len(),
                "names": roster.names(),
            })
        );
    } else {
        println!("{} enrolled identities:", roster.len());
        for name in roster.names() {
            println!("  {name}");
        }
    }
    Ok(())
}

fn print_devices(json: bool) {
    let devices = Camera::list_devices();

    if json {
        let entries: Vec<serde_json::Value> = devices
            .iter()
            .map(|d| {
                serde_json::json!({
                    "path": d.path,
                    "name": d.name,
                    "driver": d.driver,
                    "bus": d.bus,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(entries));
    } else if devices.is_empty() {
        println!("no V4L2 capture devices found");
    } else {
        for d in devices {
            println!("{}  {} ({})", d.path, d.name, d.driver);
        }
    }
}
