use facematch_core::{EmbedderSpec, MatchCache, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration.
///
/// Built from defaults, then an optional TOML file, then `FACEMATCH_*`
/// environment variables (highest precedence).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub embedder_model: String,
    /// Input layout and normalization of the embedding model.
    pub embedder: EmbedderSpec,
    /// Directory of enrolled face images, one per identity.
    pub gallery_dir: PathBuf,
    /// Where snapshots are written.
    pub snapshot_dir: PathBuf,
    /// Euclidean distance below which a gallery entry matches.
    pub match_threshold: f32,
    /// Run detection and matching on every Nth frame.
    pub frame_skip: usize,
    /// Downscale factor applied before detection (1.0 disables).
    pub detect_scale: f32,
    /// Maximum match cache entries; unbounded when unset.
    pub cache_capacity: Option<usize>,
    /// Match cache entry lifetime; entries never expire when unset.
    pub cache_ttl_secs: Option<u64>,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    /// TrueType/OpenType font for drawing labels; bars only when unset.
    pub font_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            model_dir: default_model_dir(),
            detector_model: "det_10g.onnx".to_string(),
            embedder_model: "facenet.onnx".to_string(),
            embedder: EmbedderSpec::facenet(),
            gallery_dir: PathBuf::from("known_faces"),
            snapshot_dir: PathBuf::from("."),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            frame_skip: 2,
            detect_scale: 0.5,
            cache_capacity: None,
            cache_ttl_secs: None,
            warmup_frames: 0,
            font_path: None,
        }
    }
}

/// On-disk overrides; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    model_dir: Option<PathBuf>,
    detector_model: Option<String>,
    embedder_model: Option<String>,
    embedder: Option<EmbedderSpec>,
    gallery_dir: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    frame_skip: Option<usize>,
    detect_scale: Option<f32>,
    cache_capacity: Option<usize>,
    cache_ttl_secs: Option<u64>,
    warmup_frames: Option<usize>,
    font_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.apply_file(path)?;
        }
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text on top of the current values.
    pub fn apply_toml(&mut self, text: &str, origin: &Path) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.capture_width {
            self.capture_width = v;
        }
        if let Some(v) = file.capture_height {
            self.capture_height = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.detector_model {
            self.detector_model = v;
        }
        if let Some(v) = file.embedder_model {
            self.embedder_model = v;
        }
        if let Some(v) = file.embedder {
            self.embedder = v;
        }
        if let Some(v) = file.gallery_dir {
            self.gallery_dir = v;
        }
        if let Some(v) = file.snapshot_dir {
            self.snapshot_dir = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.frame_skip {
            self.frame_skip = v;
        }
        if let Some(v) = file.detect_scale {
            self.detect_scale = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if file.cache_capacity.is_some() {
            self.cache_capacity = file.cache_capacity;
        }
        if file.cache_ttl_secs.is_some() {
            self.cache_ttl_secs = file.cache_ttl_secs;
        }
        if file.font_path.is_some() {
            self.font_path = file.font_path;
        }
        Ok(())
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_toml(&text, path)?;
        tracing::debug!(path = %path.display(), "config file applied");
        Ok(())
    }

    /// Overlay `FACEMATCH_*` variables resolved through `lookup`.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEMATCH_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEMATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEMATCH_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEMATCH_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEMATCH_FONT") {
            self.font_path = Some(PathBuf::from(v));
        }

        env_parse(&lookup, "FACEMATCH_CAPTURE_WIDTH", &mut self.capture_width);
        env_parse(&lookup, "FACEMATCH_CAPTURE_HEIGHT", &mut self.capture_height);
        env_parse(&lookup, "FACEMATCH_MATCH_THRESHOLD", &mut self.match_threshold);
        env_parse(&lookup, "FACEMATCH_FRAME_SKIP", &mut self.frame_skip);
        env_parse(&lookup, "FACEMATCH_DETECT_SCALE", &mut self.detect_scale);
        env_parse(&lookup, "FACEMATCH_WARMUP_FRAMES", &mut self.warmup_frames);

        let mut capacity = 0usize;
        if env_parse(&lookup, "FACEMATCH_CACHE_CAPACITY", &mut capacity) {
            self.cache_capacity = Some(capacity);
        }
        let mut ttl = 0u64;
        if env_parse(&lookup, "FACEMATCH_CACHE_TTL_SECS", &mut ttl) {
            self.cache_ttl_secs = Some(ttl);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_skip == 0 {
            return Err(ConfigError::Invalid("frame_skip must be >= 1".into()));
        }
        if !(self.detect_scale > 0.0 && self.detect_scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "detect_scale must be in (0, 1], got {}",
                self.detect_scale
            )));
        }
        if !(self.match_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "match_threshold must be positive, got {}",
                self.match_threshold
            )));
        }
        if self.cache_capacity == Some(0) {
            return Err(ConfigError::Invalid("cache_capacity must be >= 1 when set".into()));
        }
        Ok(())
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }

    /// Fresh match cache with the configured limits.
    pub fn match_cache(&self) -> MatchCache {
        MatchCache::with_limits(
            self.cache_capacity,
            self.cache_ttl_secs.map(Duration::from_secs),
        )
    }
}

/// `$XDG_DATA_HOME/facematch/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
        .join("models")
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> bool {
    let Some(raw) = lookup(key) else {
        return false;
    };
    match raw.trim().parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            false
        }
    }
}
