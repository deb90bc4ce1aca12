#![allow(clippy::collapsible_if)]
pub mod area;
pub mod diagnostics;
pub mod hls;
pub mod launcher;

use std::path::PathBuf;

use hlsbridge_core::error::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("bad source URI: {0}")]
    BadUri(String),
    #[error("ffmpeg not found at {}", .0.display())]
    ExecutableNotFound(PathBuf),
    #[error("ffmpeg did not start: {0}")]
    ProcessDidNotStart(String),
}

impl From<LaunchError> for SessionError {
    fn from(e: LaunchError) -> Self {
        match e {
            LaunchError::BadUri(uri) => SessionError::BadUri(uri),
            LaunchError::ExecutableNotFound(path) => SessionError::ExecutableNotFound(path),
            LaunchError::ProcessDidNotStart(reason) => SessionError::ProcessDidNotStart(reason),
        }
    }
}

/// Transcoder settings that do not change between sessions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TranscoderConfig {
    /// Explicit ffmpeg binary. When unset, the binary next to the running
    /// executable is preferred, then `ffmpeg` on `PATH`.
    pub ffmpeg_path: Option<PathBuf>,
    /// Parent directory for output areas.
    pub output_root: PathBuf,
    /// HLS slice length; ffmpeg's own default is 2, Apple recommends 6.
    pub hls_time_secs: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            output_root: std::env::temp_dir(),
            hls_time_secs: 2,
        }
    }
}
