//! Service configuration. Built-in defaults are layered under an optional
//! TOML file and `FACEMOOD__*` environment variables.

use anyhow::{anyhow, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file read when no `--config` is given. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "facemood.toml";

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,actix_web=info";

/// Webcam frames encoded as data URLs run well past actix's 256 KiB default
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Side length of the square grayscale face fed to the emotion model
pub const DEFAULT_INPUT_SIZE: u32 = 48;

/// Label order of FER-2013 style classifiers
pub const DEFAULT_LABELS: [&str; 7] = [
    "angry", "disgust", "fear", "happy", "sad", "surprise", "neutral",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub log_filter: String,
    pub server: ServerSettings,
    pub analysis: AnalysisSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,

    /// Mounted in front of every route, e.g. `/api`
    pub route_prefix: String,

    /// Number of HTTP workers. Defaults to actix's choice (one per core)
    pub workers: Option<usize>,

    /// HTTP status for responses whose body carries a processing error
    pub processing_error_status: u16,

    /// Largest request body accepted, in bytes
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSettings {
    /// TorchScript emotion classifier
    pub emotion_model: PathBuf,

    /// TorchScript face detector. Without one the whole image is analyzed
    pub face_model: Option<PathBuf>,

    /// Abort analysis when no face is found
    pub enforce_detection: bool,

    /// Which face answers the request when several are found
    pub face_selection: FaceSelection,

    /// Detections scoring below this are ignored
    pub min_face_confidence: f32,

    pub input_size: u32,
    pub labels: Vec<String>,
}

/// Policy for picking one face out of a multi-face analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceSelection {
    /// Whatever the detector reported first
    First,
    Largest,
    MostConfident,
}

impl Settings {
    /// Load settings from the defaults, then `file` (or `facemood.toml` if
    /// present), then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .set_default("log_filter", DEFAULT_LOG_FILTER)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.route_prefix", "")?
            .set_default("server.processing_error_status", 200)?
            .set_default("server.max_body_bytes", DEFAULT_MAX_BODY_BYTES as i64)?
            .set_default("analysis.emotion_model", "models/emotion.pt")?
            .set_default("analysis.enforce_detection", false)?
            .set_default("analysis.face_selection", "first")?
            .set_default("analysis.min_face_confidence", 0.5)?
            .set_default("analysis.input_size", DEFAULT_INPUT_SIZE as i64)?
            .set_default("analysis.labels", DEFAULT_LABELS.to_vec())?
            .add_source(file_source)
            .add_source(
                Environment::with_prefix("FACEMOOD")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("analysis.labels")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        actix_web::http::StatusCode::from_u16(self.server.processing_error_status).map_err(
            |_| {
                anyhow!(
                    "invalid processing_error_status {}",
                    self.server.processing_error_status
                )
            },
        )?;

        let prefix = &self.server.route_prefix;
        if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.ends_with('/')) {
            return Err(anyhow!(
                "route_prefix must start with '/' and not end with one: {prefix:?}"
            ));
        }

        if self.analysis.labels.is_empty() {
            return Err(anyhow!("at least one emotion label is required"));
        }

        if self.analysis.input_size == 0 {
            return Err(anyhow!("input_size must be positive"));
        }

        Ok(())
    }
}
