//! Pipeline Engine - cache-aware execution of image pipeline graphs
//!
//! A pipeline is a DAG of image steps (capture, render, detail edit,
//! upscale, video, compare) wired port to port. Running a target node
//! executes only the part of its upstream whose stored result no longer
//! matches its configuration, charges each completed node's cost against a
//! credit balance and records a snapshot of the graph afterwards.
//!
//! # Architecture
//!
//! - `graph`: upstream closure, cycle detection, level sort, descendants
//! - `cache_key`: fingerprints deciding whether a stored result is reusable
//! - `plan`: side-effect-free pre-flight (pending set, levels, cost)
//! - `executor`: runs one node and contains its failure
//! - `PipelineEngine`: orchestrates runs against the host's collaborators
//!   (`GraphStore`, `CreditLedger`, `SnapshotStore`, `EventSink`) and the
//!   registered `NodeAdapter`s
//!
//! # Example
//!
//! ```ignore
//! use pipeline_engine::{InMemoryCreditLedger, InMemoryGraphStore, PipelineEngine};
//!
//! let engine = PipelineEngine::new(
//!     Arc::new(InMemoryGraphStore::with_graph(graph)),
//!     Arc::new(InMemoryCreditLedger::new(10)),
//!     adapters,
//! );
//! let report = engine.execute_pipeline("upscale-1").await?;
//! ```

pub mod adapter;
pub mod builder;
pub mod cache_key;
pub mod config;
pub mod credits;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod history;
pub mod pipeline;
pub mod plan;
pub mod status;
pub mod store;
pub mod types;

// Re-export key types
pub use adapter::{
    AdapterInput, AdapterOutput, AdapterRegistry, CallbackAdapter, ModifierParams, NodeAdapter,
    RenderParams, UpscaleParams, VideoParams,
};
pub use builder::PipelineBuilder;
pub use cache_key::compute_cache_key;
pub use config::EngineConfig;
pub use credits::{CreditLedger, InMemoryCreditLedger};
pub use error::{AdapterError, PipelineError, Result};
pub use events::{EventError, EventSink, NullEventSink, PipelineEvent, VecEventSink};
pub use executor::NodeOutcome;
pub use graph::{descendants, detect_cycle, resolve_upstream, topological_levels};
pub use history::{GraphSnapshot, HistoryStack, SnapshotMeta, SnapshotStore};
pub use pipeline::{PipelineEngine, PipelineReport};
pub use plan::RunPlan;
pub use status::{ExecutionState, ExecutionStatus};
pub use store::{GraphStore, InMemoryGraphStore};
pub use types::{
    ports, NodeId, NodeResult, NodeStatus, NodeType, PipelineEdge, PipelineGraph, PipelineNode,
};

// Re-export so adapter implementations share the engine's token type
pub use tokio_util::sync::CancellationToken;
