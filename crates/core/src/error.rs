use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Every way a stream session can end before the operator asked it to.
///
/// All variants are terminal for the session that produced them; nothing is
/// retried automatically.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("source URI has no usable host: {0}")]
    BadUri(String),

    #[error("transcoder executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("transcoder did not start: {0}")]
    ProcessDidNotStart(String),

    #[error("cannot bind HTTP publisher to port {port}: {reason}")]
    BindFailed { port: u16, reason: String },

    #[error("no stream output appeared within {} seconds", .0.as_secs_f64())]
    StartupTimeout(Duration),

    #[error("transcoder exited unexpectedly ({})", exit_label(.0))]
    ProcessExitedUnexpectedly(Option<i32>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "no exit code".to_string(),
    }
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadUri(_) => "bad_uri",
            Self::ExecutableNotFound(_) => "executable_not_found",
            Self::ProcessDidNotStart(_) => "process_did_not_start",
            Self::BindFailed { .. } => "bind_failed",
            Self::StartupTimeout(_) => "startup_timeout",
            Self::ProcessExitedUnexpectedly(_) => "process_exited",
            Self::Io(_) => "io_error",
        }
    }

    /// Short title for the host's alert surface.
    pub fn header(&self) -> &'static str {
        match self {
            Self::BadUri(_) => "Invalid stream URI",
            Self::ExecutableNotFound(_) | Self::ProcessDidNotStart(_) => "Cannot start ffmpeg",
            Self::BindFailed { .. } => "Cannot start web server",
            Self::StartupTimeout(_) => "Stream timed out",
            Self::ProcessExitedUnexpectedly(_) => "ffmpeg stopped",
            Self::Io(_) => "Server error",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from(self)
    }
}

/// Structured error handed to whatever renders alerts for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub header: String,
    pub message: String,
    pub reported_at: DateTime<Utc>,
}

impl From<&SessionError> for ErrorReport {
    fn from(e: &SessionError) -> Self {
        Self {
            code: e.code().to_string(),
            header: e.header().to_string(),
            message: e.to_string(),
            reported_at: Utc::now(),
        }
    }
}

/// Errors surfaced to HTTP clients of the publisher.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::Internal(_) => 500,
        }
    }
}

/// JSON error envelope: `{ "error": { "code": "…", "message": "…" } }`
#[derive(Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&ApiError> for ErrorEnvelope {
    fn from(e: &ApiError) -> Self {
        Self {
            error: ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SessionError::BadUri("x".into()).code(), "bad_uri");
        assert_eq!(SessionError::StartupTimeout(Duration::from_secs(10)).code(), "startup_timeout");
        assert_eq!(
            SessionError::BindFailed {
                port: 80,
                reason: "denied".into()
            }
            .code(),
            "bind_failed"
        );
    }

    #[test]
    fn startup_timeout_keeps_fractional_seconds() {
        assert_eq!(
            SessionError::StartupTimeout(Duration::from_millis(300)).to_string(),
            "no stream output appeared within 0.3 seconds"
        );
        assert_eq!(
            SessionError::StartupTimeout(Duration::from_secs(10)).to_string(),
            "no stream output appeared within 10 seconds"
        );
    }

    #[test]
    fn report_carries_message() {
        let report = SessionError::ProcessExitedUnexpectedly(Some(1)).report();
        assert_eq!(report.code, "process_exited");
        assert_eq!(report.header, "ffmpeg stopped");
        assert!(report.message.contains("exit code 1"));
    }

    #[test]
    fn envelope_shape() {
        let env = ErrorEnvelope::from(&ApiError::NotFound("seg_00001.ts".into()));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["error"]["code"], "not_found");
        assert_eq!(json["error"]["message"], "not found: seg_00001.ts");
    }
}
