use crate::config::ConfigError;
use crate::remote::RemoteError;
use crate::session::SessionError;
use crate::telemetry::TelemetryError;
use crate::workflows::attendance::{
    BiometricError, FormError, PipelineError, SagaOutcome, SlotError,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Remote(RemoteError),
    Session(SessionError),
    Pipeline(PipelineError),
    Slot(SlotError),
    /// A submit ran to the end without writing every row it planned.
    Incomplete(SagaOutcome),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Session(_) => StatusCode::BAD_REQUEST,
            AppError::Remote(_) | AppError::Incomplete(_) => StatusCode::BAD_GATEWAY,
            AppError::Slot(SlotError::Empty) => StatusCode::NOT_FOUND,
            AppError::Slot(SlotError::Superseded { .. }) => StatusCode::CONFLICT,
            AppError::Pipeline(err) => pipeline_status(err),
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn pipeline_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Biometric(BiometricError::Fetch(_)) => StatusCode::BAD_GATEWAY,
        PipelineError::Biometric(BiometricError::Engine(_)) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Biometric(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Form(
            FormError::GateLocked { .. }
            | FormError::AlreadySubmitting
            | FormError::AlreadySubmitted
            | FormError::NotMatched
            | FormError::EntryRecorded { .. },
        )
        | PipelineError::Scan(_) => StatusCode::CONFLICT,
        PipelineError::Form(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Cancelled | PipelineError::Closed => StatusCode::GONE,
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Remote(err) => write!(f, "hr service error: {}", err),
            AppError::Session(err) => write!(f, "session error: {}", err),
            AppError::Pipeline(err) => write!(f, "{}", err),
            AppError::Slot(err) => write!(f, "{}", err),
            AppError::Incomplete(SagaOutcome::EntryOnly) => {
                write!(f, "check-in recorded but the check-out was not")
            }
            AppError::Incomplete(_) => write!(f, "attendance was not recorded"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Remote(err) => Some(err),
            AppError::Session(err) => Some(err),
            AppError::Pipeline(err) => Some(err),
            AppError::Slot(err) => Some(err),
            AppError::Incomplete(_) => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Pipeline(err) => {
                let notification = err.notification();
                json!({ "error": self.to_string(), "notification": notification })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<RemoteError> for AppError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

impl From<SessionError> for AppError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<SlotError> for AppError {
    fn from(value: SlotError) -> Self {
        Self::Slot(value)
    }
}
