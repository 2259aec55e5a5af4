//! Event types for streaming pipeline progress
//!
//! Events are sent from the engine to the frontend (or any consumer)
//! to report run and node progress, failures and cancellations.

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Trait for sending pipeline events
///
/// This abstracts over the transport mechanism (UI channel, mpsc, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: PipelineEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// Pre-flight passed and execution is starting
    #[serde(rename_all = "camelCase")]
    RunStarted {
        run_id: String,
        target_id: NodeId,
        pending: Vec<NodeId>,
        estimated_cost: u64,
    },

    /// The run finished (possibly with failed nodes)
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        run_id: String,
        target_id: NodeId,
        credits_spent: u64,
        failed: usize,
    },

    /// The run was rejected before execution
    #[serde(rename_all = "camelCase")]
    RunFailed {
        target_id: NodeId,
        error: String,
    },

    /// A level of independent nodes is starting
    #[serde(rename_all = "camelCase")]
    LevelStarted {
        run_id: String,
        level: usize,
        nodes: Vec<NodeId>,
    },

    #[serde(rename_all = "camelCase")]
    NodeStarted { run_id: String, node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        run_id: String,
        node_id: NodeId,
        credits_charged: u64,
    },

    #[serde(rename_all = "camelCase")]
    NodeFailed {
        run_id: String,
        node_id: NodeId,
        error: String,
    },

    /// A node was blocked because an ancestor failed
    #[serde(rename_all = "camelCase")]
    NodeBlocked {
        run_id: String,
        node_id: NodeId,
        failed_ancestor: NodeId,
    },

    #[serde(rename_all = "camelCase")]
    NodeCancelled { run_id: String, node_id: NodeId },
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: PipelineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<PipelineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: PipelineEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}
