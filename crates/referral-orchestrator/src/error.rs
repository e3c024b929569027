use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::referral::{
    IntakeError, PipelineError, ProcessingError, RegistryError, RepositoryError, UnknownValue,
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
    Pipeline(PipelineError),
    Intake(IntakeError),
    Registry(RegistryError),
    Request(UnknownValue),
    Worker(tokio::task::JoinError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Pipeline(err) => write!(f, "pipeline error: {}", err),
            AppError::Intake(err) => write!(f, "intake error: {}", err),
            AppError::Registry(err) => write!(f, "callback registry error: {}", err),
            AppError::Request(err) => write!(f, "invalid request: {}", err),
            AppError::Worker(err) => write!(f, "worker error: {}", err),
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
            AppError::Pipeline(err) => Some(err),
            AppError::Intake(err) => Some(err),
            AppError::Registry(err) => Some(err),
            AppError::Request(err) => Some(err),
            AppError::Worker(err) => Some(err),
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Pipeline(PipelineError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Pipeline(PipelineError::Candidates(_))
            | AppError::Pipeline(PipelineError::SourceContext { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Pipeline(PipelineError::Processing(ProcessingError::Repository(
                RepositoryError::StateConflict { .. } | RepositoryError::StateViolation(_),
            ))) => StatusCode::CONFLICT,
            AppError::Pipeline(PipelineError::Processing(_)) => StatusCode::BAD_GATEWAY,
            AppError::Intake(IntakeError::Repository(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Intake(_) | AppError::Request(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Registry(_)
            | AppError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
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

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        Self::Pipeline(value.into())
    }
}

impl From<IntakeError> for AppError {
    fn from(value: IntakeError) -> Self {
        Self::Intake(value)
    }
}

impl From<RegistryError> for AppError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<UnknownValue> for AppError {
    fn from(value: UnknownValue) -> Self {
        Self::Request(value)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Worker(value)
    }
}
