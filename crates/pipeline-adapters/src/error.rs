//! Errors raised while building adapters

use thiserror::Error;

/// Failure to construct an adapter or registry from configuration
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid adapter config: {0}")]
    Config(#[from] serde_json::Error),
}
