//! Error types and handling
//!
//! Common error types used across the application.

use crate::capture::TransportError;
use crate::config::ConfigError;
use crate::control::ControlError;
use crate::pipeline::PipelineError;
use crate::recorder::RecordingError;
use crate::storage::PersistenceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Transport(#[from] TransportError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Control channel error: {0}")]
    Control(#[from] ControlError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),
}

/// Error report sent back over the control channel
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::Pipeline(_) => "PIPELINE_ERROR",
            AppError::Persistence(_) => "PERSISTENCE_ERROR",
            AppError::Control(_) => "CONTROL_ERROR",
            AppError::Recording(_) => "RECORDING_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
