use thiserror::Error;

use crate::{
    application::content::FetchError, config::LoadError, domain::error::DomainError,
    infra::error::InfraError,
};

/// Errors surfaced by the `postloop` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::Infra(InfraError::Configuration { .. }) => 78,
            AppError::Domain(_) | AppError::Json(_) | AppError::Validation(_) => 65,
            AppError::Fetch(_) | AppError::Infra(InfraError::HttpClient { .. }) => 69,
            AppError::Io(_) => 74,
            AppError::Infra(InfraError::Telemetry(_)) | AppError::Unexpected(_) => 70,
        }
    }
}
