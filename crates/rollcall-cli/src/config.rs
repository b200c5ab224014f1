use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Tracker configuration.
///
/// Layered: built-in defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables. CLI flags override on top in main.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Directory of reference images, one identity per image.
    pub known_faces_dir: PathBuf,
    /// Directory receiving the attendance log and the video recording.
    pub output_dir: PathBuf,
    /// Maximum descriptor distance for a positive match (lower = stricter).
    pub match_threshold: f32,
    /// Integer downscale factor applied before detection/encoding.
    pub detect_downscale: u32,
    /// Nominal frame rate written into the recording.
    pub video_fps: u32,
    /// Frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Whether to publish the live JPEG preview.
    pub preview: bool,
}

/// Optional overrides from a TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    known_faces_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    detect_downscale: Option<u32>,
    video_fps: Option<u32>,
    warmup_frames: Option<usize>,
    preview: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            known_faces_dir: PathBuf::from("known_faces"),
            output_dir: PathBuf::from("output"),
            match_threshold: 0.5,
            detect_downscale: 2,
            video_fps: 20,
            warmup_frames: 4,
            preview: true,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the config file (argument or
    /// `ROLLCALL_CONFIG`), then `ROLLCALL_*` environment variables.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Config::default();

        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("ROLLCALL_CONFIG").map(PathBuf::from).ok());
        if let Some(path) = file {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("cannot read config file {}: {e}", path.display()))?;
            let overrides: FileConfig = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("bad config file {}: {e}", path.display()))?;
            config.apply_file(overrides);
            tracing::info!(path = %path.display(), "config file loaded");
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.known_faces_dir {
            self.known_faces_dir = v;
        }
        if let Some(v) = file.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.detect_downscale {
            self.detect_downscale = v;
        }
        if let Some(v) = file.video_fps {
            self.video_fps = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if let Some(v) = file.preview {
            self.preview = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_FACES_DIR") {
            self.known_faces_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        self.match_threshold = env_f32("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.detect_downscale = env_u32("ROLLCALL_DETECT_DOWNSCALE", self.detect_downscale);
        self.video_fps = env_u32("ROLLCALL_VIDEO_FPS", self.video_fps);
        self.warmup_frames = env_usize("ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
        if let Ok(v) = std::env::var("ROLLCALL_PREVIEW") {
            self.preview = v != "0";
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Attendance log path for the session's calendar date.
    pub fn attendance_path(&self, date: &str) -> PathBuf {
        self.output_dir.join(format!("attendance_{date}.csv"))
    }

    /// Video recording path, date-paired with the attendance log.
    pub fn video_path(&self, date: &str) -> PathBuf {
        self.output_dir.join(format!("recorded_{date}.avi"))
    }

    /// Preview image path.
    pub fn preview_path(&self) -> PathBuf {
        self.output_dir.join("preview.jpg")
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
