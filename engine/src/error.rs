//! Engine-specific error types

use shared::SharedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("Backend rejected {operation}: {reason}")]
    RejectedByBackend { operation: String, reason: String },

    #[error("No game is currently running")]
    NoActiveGame,

    #[error("Autotune is already running")]
    AlreadyRunning,

    #[error("Configuration error: {field}")]
    ConfigurationError { field: String },

    #[error("Shared component error")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl EngineError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        EngineError::BackendUnavailable { message: message.into() }
    }

    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::RejectedByBackend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn config(field: impl Into<String>) -> Self {
        EngineError::ConfigurationError { field: field.into() }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
