//! Feed error types.

use infogempa_core::{AppError, ConfigError, NetworkError, StorageError};
use infogempa_shell::ShellError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Request failed: {0}")]
    Network(#[from] ShellError),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Failed to parse {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Weather API key not configured")]
    MissingApiKey,
}

impl FeedError {
    pub fn parse(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parse {
            context: context.into(),
            source,
        }
    }

    /// User-friendly error message held by the coordinator.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(e) => e.user_message(),
            Self::Status { status, url } => NetworkError::ServerError {
                status: *status,
                message: url.clone(),
            }
            .user_message()
            .to_string(),
            Self::Parse { .. } => NetworkError::InvalidResponse(String::new())
                .user_message()
                .to_string(),
            Self::Storage(e) => e.user_message().to_string(),
            Self::Config(e) => e.user_message().to_string(),
            Self::MissingApiKey => "Weather is unavailable: no API key configured.".to_string(),
        }
    }
}

impl From<FeedError> for AppError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Network(e) => e.into(),
            FeedError::Status { status, url } => AppError::Network(NetworkError::ServerError {
                status,
                message: url,
            }),
            FeedError::Storage(e) => AppError::Storage(e),
            FeedError::Config(e) => AppError::Config(e),
            other => AppError::Service(other.to_string()),
        }
    }
}
