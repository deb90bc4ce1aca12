//! Persistent operator preferences.
//!
//! The coordinator never reads these directly; the host loads them from a
//! [`PrefsStore`] and turns them into a [`SessionConfig`] per start request.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{SessionConfig, TranscodeMode};

const RAW_MODE_FLAG: &str = "raw";
const HLS_MODE_FLAG: &str = "HLS";

#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed preferences: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Operator-facing key/value settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub stream_name: String,
    pub input_uri: String,
    pub output_tcp_port: u16,
    pub login_id: String,
    pub password: String,
    pub temp_directory_name: String,
    /// `"HLS"` for the built-in argument set, `"raw"` for `raw_ffmpeg_string`.
    pub mode_flag: String,
    pub raw_ffmpeg_string: String,
    pub use_output_http_server: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            stream_name: "hlsbridge_stream".to_string(),
            input_uri: String::new(),
            output_tcp_port: 8080,
            login_id: String::new(),
            password: String::new(),
            temp_directory_name: "html".to_string(),
            mode_flag: HLS_MODE_FLAG.to_string(),
            raw_ffmpeg_string: String::new(),
            use_output_http_server: true,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

impl Preferences {
    pub fn use_raw_parameters(&self) -> bool {
        self.mode_flag == RAW_MODE_FLAG
    }

    pub fn set_use_raw_parameters(&mut self, raw: bool) {
        self.mode_flag = if raw { RAW_MODE_FLAG } else { HLS_MODE_FLAG }.to_string();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Snapshot these preferences as the input of one session.
    pub fn session_config(&self) -> SessionConfig {
        let mode = if self.use_raw_parameters() {
            TranscodeMode::Raw(self.raw_ffmpeg_string.clone())
        } else {
            TranscodeMode::Standard
        };
        let temp_dir_name = if self.temp_directory_name.trim().is_empty() {
            Self::default().temp_directory_name
        } else {
            self.temp_directory_name.clone()
        };

        SessionConfig {
            source_uri: self.input_uri.clone(),
            login: non_empty(&self.login_id),
            password: non_empty(&self.password),
            port: self.output_tcp_port,
            stream_name: self.stream_name.clone(),
            mode,
            use_http_server: self.use_output_http_server,
            temp_dir_name,
        }
    }
}

/// Backing storage for [`Preferences`].
pub trait PrefsStore: Send + Sync {
    fn load(&self) -> Result<Preferences, PrefsError>;
    fn save(&self, prefs: &Preferences) -> Result<(), PrefsError>;
}

/// Preferences kept in a JSON file. A missing file reads as defaults.
#[derive(Debug, Clone)]
pub struct JsonFilePrefs {
    path: PathBuf,
}

impl JsonFilePrefs {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PrefsStore for JsonFilePrefs {
    fn load(&self) -> Result<Preferences, PrefsError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no preferences file, using defaults");
                return Ok(Preferences::default());
            }
            Err(source) => {
                return Err(PrefsError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, prefs: &Preferences) -> Result<(), PrefsError> {
        let raw = serde_json::to_string_pretty(prefs)?;
        std::fs::write(&self.path, raw).map_err(|source| PrefsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-process store, for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryPrefs {
    values: Mutex<Preferences>,
}

impl MemoryPrefs {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            values: Mutex::new(prefs),
        }
    }
}

impl PrefsStore for MemoryPrefs {
    fn load(&self) -> Result<Preferences, PrefsError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, prefs: &Preferences) -> Result<(), PrefsError> {
        *self
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = prefs.clone();
        Ok(())
    }
}
