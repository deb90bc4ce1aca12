use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hlsbridge_core::error::{ApiError, ErrorEnvelope, SessionError};
use thiserror::Error;

/// Newtype wrapper so we can implement `IntoResponse` in this crate.
pub struct AppError(pub ApiError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope::from(&self.0);
        (status, Json(envelope)).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

/// Failures of the HTTP publisher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("cannot bind port {port}: {reason}")]
    BindFailed { port: u16, reason: String },
    #[error("no output after {} seconds", .0.as_secs_f64())]
    StartupTimeout(Duration),
}

impl From<PublishError> for SessionError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::BindFailed { port, reason } => SessionError::BindFailed { port, reason },
            PublishError::StartupTimeout(after) => SessionError::StartupTimeout(after),
        }
    }
}
