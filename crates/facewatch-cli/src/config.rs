use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const MIN_COOLDOWN_SECS: u64 = 1;
pub const MAX_COOLDOWN_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration: defaults, then an optional TOML file, then
/// `FACEWATCH_*` environment variables.
///
/// Paths left unset in the file are derived from `data_dir`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera index, V4L2 device path, image file or image directory.
    pub video_source: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub data_dir: PathBuf,
    /// Directory containing the SCRFD and ArcFace ONNX models.
    pub model_dir: Option<PathBuf>,
    /// One reference photo per person.
    pub known_faces_dir: Option<PathBuf>,
    /// Screenshots.
    pub captures_dir: Option<PathBuf>,
    /// Crops of unrecognized faces, when `log_unknown` is on.
    pub unknown_dir: Option<PathBuf>,
    pub gallery_path: Option<PathBuf>,
    pub history_csv: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    /// Maximum match distance; a match must be strictly closer.
    pub tolerance: f32,
    pub cooldown_secs: u64,
    pub auto_save: bool,
    /// Run recognition on every Nth frame.
    pub process_every: u32,
    /// Shrink factor applied before detection.
    pub downscale: u32,
    pub log_unknown: bool,
    /// Widest the GUI video panel is drawn.
    pub display_max_width: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video_source: "0".to_string(),
            frame_width: 640,
            frame_height: 480,
            data_dir: default_data_dir(),
            model_dir: None,
            known_faces_dir: None,
            captures_dir: None,
            unknown_dir: None,
            gallery_path: None,
            history_csv: None,
            db_path: None,
            tolerance: facewatch_core::matcher::DEFAULT_TOLERANCE,
            cooldown_secs: 5,
            auto_save: true,
            process_every: facewatch_core::sampler::DEFAULT_PROCESS_EVERY,
            downscale: facewatch_core::sampler::DEFAULT_DOWNSCALE,
            log_unknown: false,
            display_max_width: 750,
        }
    }
}

impl Config {
    /// Load from `FACEWATCH_CONFIG` (or `<data_dir>/config.toml` if present),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("FACEWATCH_CONFIG").ok().map(PathBuf::from);
        let data_dir = std::env::var("FACEWATCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = data_dir.join("config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self {
                        data_dir,
                        ..Self::default()
                    }
                }
            }
        };
        config.apply_env();
        config.cooldown_secs = clamp_cooldown(config.cooldown_secs);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.cooldown_secs = clamp_cooldown(config.cooldown_secs);
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FACEWATCH_VIDEO_SOURCE") {
            self.video_source = v;
        }
        if let Ok(v) = std::env::var("FACEWATCH_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FACEWATCH_MODEL_DIR") {
            self.model_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("FACEWATCH_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        self.frame_width = env_u32("FACEWATCH_FRAME_WIDTH", self.frame_width);
        self.frame_height = env_u32("FACEWATCH_FRAME_HEIGHT", self.frame_height);
        self.tolerance = env_f32("FACEWATCH_TOLERANCE", self.tolerance);
        self.cooldown_secs = env_u64("FACEWATCH_COOLDOWN_SECS", self.cooldown_secs);
        self.process_every = env_u32("FACEWATCH_PROCESS_EVERY", self.process_every);
        self.downscale = env_u32("FACEWATCH_DOWNSCALE", self.downscale);
        self.auto_save = env_bool("FACEWATCH_AUTO_SAVE", self.auto_save);
        self.log_unknown = env_bool("FACEWATCH_LOG_UNKNOWN", self.log_unknown);
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(clamp_cooldown(self.cooldown_secs))
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(facewatch_core::default_model_dir)
    }

    pub fn known_faces_dir(&self) -> PathBuf {
        self.data_path(&self.known_faces_dir, "known_faces")
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.data_path(&self.captures_dir, "captured_images")
    }

    pub fn unknown_dir(&self) -> PathBuf {
        self.data_path(&self.unknown_dir, "unknown_faces")
    }

    pub fn gallery_path(&self) -> PathBuf {
        self.data_path(&self.gallery_path, "face_encodings.json")
    }

    pub fn history_csv(&self) -> PathBuf {
        self.data_path(&self.history_csv, "recognition_history.csv")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_path(&self.db_path, "face_recognition.db")
    }

    fn data_path(&self, configured: &Option<PathBuf>, default_name: &str) -> PathBuf {
        configured
            .clone()
            .unwrap_or_else(|| self.data_dir.join(default_name))
    }
}

pub fn clamp_cooldown(secs: u64) -> u64 {
    secs.clamp(MIN_COOLDOWN_SECS, MAX_COOLDOWN_SECS)
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch")
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

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}
