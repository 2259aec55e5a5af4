//! Configuration types for the bundled adapters

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SetupError;

/// Retry behaviour for transient adapter failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first call included
    pub max_attempts: u32,
    /// Base backoff time in milliseconds
    pub backoff_base_ms: u64,
    /// Maximum backoff time in milliseconds
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        // Exponential backoff: base * 2^attempt
        let delay_ms = self.backoff_base_ms.saturating_mul(1u64 << attempt.min(10));
        Duration::from_millis(delay_ms.min(self.backoff_max_ms))
    }
}

/// Settings for [`MockAdapter`](crate::MockAdapter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Artificial delay per call in milliseconds
    pub latency_ms: u64,
    /// Edge length in pixels reported for non-upscaled outputs
    pub base_resolution: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            base_resolution: 1024,
        }
    }
}

impl MockConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Settings for [`HttpAdapter`](crate::HttpAdapter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpAdapterConfig {
    /// Service root; node types are posted to `{base_url}/{type}`
    pub base_url: String,
    /// Bearer token sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpAdapterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8188".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl HttpAdapterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Parse a JSON config, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self, SetupError> {
        Ok(serde_json::from_str(json)?)
    }
}
