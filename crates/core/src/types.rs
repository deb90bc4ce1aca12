use serde::{Deserialize, Serialize};

use crate::error::ErrorReport;

/// How the transcoder command line is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "arguments")]
pub enum TranscodeMode {
    /// Fixed libx264 → HLS argument set.
    Standard,
    /// Newline-separated `flag value` pairs supplied by the operator.
    Raw(String),
}

impl TranscodeMode {
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

/// Everything one start request needs. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub source_uri: String,
    pub login: Option<String>,
    pub password: Option<String>,
    pub port: u16,
    pub stream_name: String,
    pub mode: TranscodeMode,
    pub use_http_server: bool,
    pub temp_dir_name: String,
}

impl SessionConfig {
    pub fn new(source_uri: impl Into<String>, port: u16, stream_name: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
            login: None,
            password: None,
            port,
            stream_name: stream_name.into(),
            mode: TranscodeMode::Standard,
            use_http_server: true,
            temp_dir_name: "html".to_string(),
        }
    }

    pub fn with_credentials(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_mode(mut self, mode: TranscodeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_http_server(mut self, enabled: bool) -> Self {
        self.use_http_server = enabled;
        self
    }

    /// The transcoder writes into an output area in standard mode, or whenever
    /// the publisher has to serve one.
    pub fn needs_output_area(&self) -> bool {
        self.use_http_server || !self.mode.is_raw()
    }
}

/// Lifecycle of a session, owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    /// Carries the error code that ended the session.
    Failed(String),
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed(_) => "failed",
        }
    }

    /// True while a child process or listener may be alive.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Output of the diagnostic stream reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    TextChunk(String),
    ProcessExited,
}

/// Events delivered to session observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    #[serde(rename = "state_changed")]
    StateChanged { state: SessionState },
    #[serde(rename = "diagnostic")]
    Diagnostic { text: String },
    #[serde(rename = "error")]
    Error { report: ErrorReport },
}
