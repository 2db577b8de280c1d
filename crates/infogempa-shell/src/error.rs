//! Shell cache error types.

use infogempa_core::{AppError, ConfigError, NetworkError, ReqwestErrorExt};
use thiserror::Error;

use crate::worker::WorkerState;

#[derive(Error, Debug)]
pub enum ShellError {
    /// The upstream host could not be reached (connection refused, timeout, offline).
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Install failed for {url}: {reason}")]
    Install { url: String, reason: String },

    #[error("Invalid worker state: expected {expected}, got {actual}")]
    InvalidState {
        expected: WorkerState,
        actual: WorkerState,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ShellError {
    /// Whether the failure means "no usable network response", which is what
    /// triggers the offline fallbacks.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Network(_))
    }

    /// Classify into the shared network error type, if this is one.
    pub fn to_network_error(&self) -> Option<NetworkError> {
        match self {
            Self::Unreachable(msg) => Some(NetworkError::ConnectionFailed(msg.clone())),
            Self::Network(e) => Some(e.to_network_error()),
            _ => None,
        }
    }

    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unreachable(_) | Self::Network(_) => self
                .to_network_error()
                .map(|e| e.user_message().to_string())
                .unwrap_or_else(|| "Network error. Check your connection.".to_string()),
            Self::Install { .. } => "Offline mode could not be set up.".to_string(),
            Self::InvalidState { .. } => "Offline cache is not ready yet.".to_string(),
            Self::Cache(_) => "Local cache error".to_string(),
            Self::Config(e) => e.user_message().to_string(),
        }
    }
}

impl From<ShellError> for AppError {
    fn from(err: ShellError) -> Self {
        match err.to_network_error() {
            Some(network) => AppError::Network(network),
            None => match err {
                ShellError::Config(e) => AppError::Config(e),
                other => AppError::Service(other.to_string()),
            },
        }
    }
}
