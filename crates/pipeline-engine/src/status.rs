//! Observable execution state for UI polling
//!
//! Tracks whether a run is active, the node most recently started, the
//! nodes still waiting and the last run-level error. Per-node outcomes live
//! on the nodes themselves; this only mirrors the global picture.

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::NodeId;

/// Point-in-time copy of the execution state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub is_running: bool,
    pub run_id: Option<String>,
    pub current_node_id: Option<NodeId>,
    /// Nodes queued for the active run that have not started yet
    pub queue: Vec<NodeId>,
    pub last_error: Option<String>,
}

/// Shared execution state, updated by the engine during a run
#[derive(Debug, Default)]
pub struct ExecutionStatus {
    state: Mutex<ExecutionState>,
}

impl ExecutionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ExecutionState {
        self.state.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_running
    }

    /// Enter the running state unless a run is already active.
    ///
    /// Clears the previous run's error. Returns false if another run holds
    /// the running state.
    pub fn try_begin(&self, run_id: &str, queue: Vec<NodeId>) -> bool {
        let mut state = self.state.lock();
        if state.is_running {
            return false;
        }
        *state = ExecutionState {
            is_running: true,
            run_id: Some(run_id.to_string()),
            current_node_id: None,
            queue,
            last_error: None,
        };
        true
    }

    /// Record that `node_id` started and remove it from the queue
    pub fn node_started(&self, node_id: &str) {
        let mut state = self.state.lock();
        state.queue.retain(|id| id != node_id);
        state.current_node_id = Some(node_id.to_string());
    }

    /// Remove a node from the queue without starting it
    pub fn dequeue(&self, node_id: &str) {
        self.state.lock().queue.retain(|id| id != node_id);
    }

    /// Leave the running state
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.is_running = false;
        state.current_node_id = None;
        state.queue.clear();
    }

    /// Record a run-level error message
    pub fn set_error(&self, message: impl Into<String>) {
        self.state.lock().last_error = Some(message.into());
    }

    pub fn clear_error(&self) {
        self.state.lock().last_error = None;
    }
}
