//! Error types for the pipeline engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur in the pipeline engine
///
/// Only `CyclicGraph`, `InsufficientCredits`, `NodeNotFound` and
/// `AlreadyRunning` abort a whole run. The remaining variants describe a
/// single node's failure and end up as that node's `error` status.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The requested subgraph contains a dependency cycle
    #[error("Cyclic dependency detected in the pipeline of '{target}'")]
    CyclicGraph { target: String },

    /// The pending work costs more than the available balance
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u64, available: u64 },

    /// A referenced node does not exist in the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Another pipeline run is still active on this engine
    #[error("A pipeline run is already in progress")]
    AlreadyRunning,

    /// A node had nothing to produce its output from
    #[error("Missing input for node '{node_id}': {detail}")]
    MissingInput { node_id: String, detail: String },

    /// Node params could not be read as the type's parameter record
    #[error("Invalid params for node '{node_id}': {detail}")]
    InvalidParams { node_id: String, detail: String },

    /// No adapter is registered for the node's type
    #[error("No adapter registered for node type '{0}'")]
    NoAdapter(String),

    /// The adapter call failed
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),
}

impl PipelineError {
    pub fn missing_input(node_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MissingInput {
            node_id: node_id.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_params(node_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidParams {
            node_id: node_id.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error aborts the run as a whole rather than one node
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CyclicGraph { .. }
                | Self::InsufficientCredits { .. }
                | Self::NodeNotFound(_)
                | Self::AlreadyRunning
        )
    }
}

/// Failures raised by node adapters
///
/// The engine treats every variant the same way (node error plus blocked
/// descendants); the distinction exists so adapters and retry wrappers can
/// decide what is worth retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Rejected by content filter: {0}")]
    ContentFiltered(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Adapter cancelled")]
    Cancelled,
}

impl AdapterError {
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server(_) | Self::Network(_) | Self::Timeout(_)
        )
    }

    /// Server-provided delay before the next attempt, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
