//! Error types for fleetd

use thiserror::Error;

use crate::runtime::ContainerRuntimeError;

/// Main error type shared by the control-plane core and the node agent
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Container runtime operation failed: {0}")]
    RuntimeOperationFailed(String),

    #[error("No container associated with application {0}")]
    NoContainer(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Validation error: {0}")]
    ValidationFailed(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Already running: {0}")]
    AlreadyRunning(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FleetError::NotFound(_))
    }
}

impl From<ContainerRuntimeError> for FleetError {
    fn from(err: ContainerRuntimeError) -> Self {
        if err.is_connection_error() {
            FleetError::RuntimeUnavailable(err.to_string())
        } else {
            FleetError::RuntimeOperationFailed(err.to_string())
        }
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Internal(err.to_string())
    }
}
