//! Run history using compressed snapshots
//!
//! After every run the engine records the whole graph plus the credits the
//! run charged. Snapshots are stored zstd-compressed and double as an
//! undo/redo stack for the host.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::types::PipelineGraph;

/// Receiver of end-of-run snapshots
pub trait SnapshotStore: Send + Sync {
    /// Persist a copy of `graph` and the credits the run spent
    fn save_snapshot(&self, graph: &PipelineGraph, credits_spent: u64) -> Result<SnapshotMeta>;
}

/// Descriptive data kept uncompressed next to each snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub id: String,
    /// RFC 3339 creation time
    pub created_at: String,
    pub credits_spent: u64,
    pub node_count: usize,
}

/// A decompressed snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSnapshot {
    pub meta: SnapshotMeta,
    pub graph: PipelineGraph,
}

struct Entry {
    meta: SnapshotMeta,
    /// zstd-compressed JSON of the graph
    compressed: Vec<u8>,
}

struct StackState {
    entries: VecDeque<Entry>,
    current: usize,
}

/// Bounded undo/redo stack of compressed graph snapshots
pub struct HistoryStack {
    state: Mutex<StackState>,
    max_snapshots: usize,
    compression_level: i32,
}

impl HistoryStack {
    /// Create a new history stack with the specified maximum size
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            state: Mutex::new(StackState {
                entries: VecDeque::new(),
                current: 0,
            }),
            max_snapshots: max_snapshots.max(1),
            compression_level: 3,
        }
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Push a new snapshot onto the stack
    ///
    /// This truncates any redo history (snapshots after current position).
    pub fn push(&self, graph: &PipelineGraph, credits_spent: u64) -> Result<SnapshotMeta> {
        let json = serde_json::to_vec(graph)?;
        let compressed = zstd::encode_all(&json[..], self.compression_level)
            .map_err(|e| PipelineError::Compression(e.to_string()))?;

        let meta = SnapshotMeta {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            credits_spent,
            node_count: graph.nodes.len(),
        };

        let mut state = self.state.lock();

        // Truncate any redo history
        while state.entries.len() > state.current + 1 {
            state.entries.pop_back();
        }

        state.entries.push_back(Entry {
            meta: meta.clone(),
            compressed,
        });
        state.current = state.entries.len() - 1;

        // Trim old snapshots if over limit
        while state.entries.len() > self.max_snapshots {
            state.entries.pop_front();
            if state.current > 0 {
                state.current -= 1;
            }
        }

        Ok(meta)
    }

    /// Undo: move back one snapshot
    ///
    /// Returns the previous graph state, or None if at the beginning.
    pub fn undo(&self) -> Option<Result<GraphSnapshot>> {
        let mut state = self.state.lock();
        if state.current > 0 {
            state.current -= 1;
            Some(decompress(&state.entries[state.current]))
        } else {
            None
        }
    }

    /// Redo: move forward one snapshot
    ///
    /// Returns the next graph state, or None if at the end.
    pub fn redo(&self) -> Option<Result<GraphSnapshot>> {
        let mut state = self.state.lock();
        if state.current + 1 < state.entries.len() {
            state.current += 1;
            Some(decompress(&state.entries[state.current]))
        } else {
            None
        }
    }

    /// Get the current snapshot without modifying the stack
    pub fn current(&self) -> Option<Result<GraphSnapshot>> {
        let state = self.state.lock();
        state.entries.get(state.current).map(decompress)
    }

    /// Metadata of every snapshot, oldest first
    pub fn list(&self) -> Vec<SnapshotMeta> {
        self.state.lock().entries.iter().map(|e| e.meta.clone()).collect()
    }

    pub fn can_undo(&self) -> bool {
        self.state.lock().current > 0
    }

    pub fn can_redo(&self) -> bool {
        let state = self.state.lock();
        state.current + 1 < state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.current = 0;
    }

    /// Get the total compressed size of all snapshots
    pub fn compressed_size(&self) -> usize {
        self.state.lock().entries.iter().map(|e| e.compressed.len()).sum()
    }
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(100)
    }
}

impl SnapshotStore for HistoryStack {
    fn save_snapshot(&self, graph: &PipelineGraph, credits_spent: u64) -> Result<SnapshotMeta> {
        self.push(graph, credits_spent)
    }
}

fn decompress(entry: &Entry) -> Result<GraphSnapshot> {
    let json = zstd::decode_all(&entry.compressed[..])
        .map_err(|e| PipelineError::Compression(e.to_string()))?;
    let graph: PipelineGraph = serde_json::from_slice(&json)?;
    Ok(GraphSnapshot {
        meta: entry.meta.clone(),
        graph,
    })
}
