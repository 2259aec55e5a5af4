//! Pipeline orchestration
//!
//! [`PipelineEngine`] ties the pieces together for one editing session:
//! it plans a run for a target node, gates it on the credit balance,
//! executes the stale nodes level by level and records a snapshot of the
//! resulting graph.
//!
//! # Execution model
//!
//! Nodes of one level are polled together on the caller's task with
//! `join_all`; nothing is spawned. A level only starts once every node of
//! the previous level has settled, so for every internal edge A→B, A is
//! terminal before B starts.
//!
//! # Usage
//!
//! ```ignore
//! let engine = PipelineEngine::new(store.clone(), ledger.clone(), adapters)
//!     .with_events(Arc::new(ui_sink));
//!
//! println!("Run costs {} credits", engine.estimate_pipeline_cost("upscale-1")?);
//! let report = engine.execute_pipeline("upscale-1").await?;
//! ```

use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::adapter::AdapterRegistry;
use crate::config::EngineConfig;
use crate::credits::CreditLedger;
use crate::error::{PipelineError, Result};
use crate::events::{EventSink, NullEventSink, PipelineEvent};
use crate::executor::{NodeExecutor, NodeOutcome};
use crate::history::{GraphSnapshot, HistoryStack, SnapshotMeta, SnapshotStore};
use crate::plan::{plan_run, RunPlan};
use crate::status::ExecutionStatus;
use crate::store::GraphStore;
use crate::types::{NodeId, NodeStatus};

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub run_id: String,
    pub target_id: NodeId,
    /// Nodes that executed successfully, in execution order
    pub executed: Vec<NodeId>,
    /// Subgraph nodes whose stored result was reused
    pub skipped: Vec<NodeId>,
    pub failed: Vec<NodeId>,
    /// Nodes blocked by a failed ancestor (may lie outside the subgraph)
    pub blocked: Vec<NodeId>,
    pub cancelled: Vec<NodeId>,
    pub credits_spent: u64,
    pub levels: Vec<Vec<NodeId>>,
    /// Snapshot recorded at the end of the run, if any
    pub snapshot: Option<SnapshotMeta>,
}

impl PipelineReport {
    /// Whether every pending node completed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && self.cancelled.is_empty()
    }
}

/// Execution engine for one pipeline editing session
pub struct PipelineEngine {
    store: Arc<dyn GraphStore>,
    ledger: Arc<dyn CreditLedger>,
    snapshots: Arc<dyn SnapshotStore>,
    status: Arc<ExecutionStatus>,
    events: Arc<dyn EventSink>,
    adapters: AdapterRegistry,
    config: EngineConfig,
    /// Cancellation token of the active run
    active: Mutex<Option<CancellationToken>>,
}

impl PipelineEngine {
    /// Create an engine with default config, a fresh [`HistoryStack`] for
    /// snapshots and no event consumer
    pub fn new(store: Arc<dyn GraphStore>, ledger: Arc<dyn CreditLedger>, adapters: AdapterRegistry) -> Self {
        Self::with_config(store, ledger, adapters, EngineConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn GraphStore>,
        ledger: Arc<dyn CreditLedger>,
        adapters: AdapterRegistry,
        config: EngineConfig,
    ) -> Self {
        let history = HistoryStack::new(config.history_limit)
            .with_compression_level(config.snapshot_compression_level);

        let missing = adapters.missing_types();
        if !missing.is_empty() {
            log::warn!("No adapter registered for node type(s): {:?}", missing);
        }

        Self {
            store,
            ledger,
            snapshots: Arc::new(history),
            status: Arc::new(ExecutionStatus::new()),
            events: Arc::new(NullEventSink),
            adapters,
            config,
            active: Mutex::new(None),
        }
    }

    /// Send run and node events to `events`
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Record end-of-run snapshots in `snapshots`
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Share an existing execution status (e.g. one the UI already polls)
    pub fn with_status(mut self, status: Arc<ExecutionStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> Arc<ExecutionStatus> {
        Arc::clone(&self.status)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Pre-flight for `target_id` against the current graph and balance
    pub fn plan_pipeline(&self, target_id: &str) -> Result<RunPlan> {
        let graph = self.store.graph();
        plan_run(target_id, &graph.nodes, &graph.edges, self.ledger.balance())
    }

    /// Credits a run of `target_id` would charge right now
    pub fn estimate_pipeline_cost(&self, target_id: &str) -> Result<u64> {
        Ok(self.plan_pipeline(target_id)?.estimated_cost)
    }

    /// Cancel the active run. Returns false if nothing is running.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(token) => {
                log::info!("Cancelling active pipeline run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Replace the graph with a recorded snapshot
    pub fn restore_snapshot(&self, snapshot: GraphSnapshot) -> Result<()> {
        if self.status.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        log::info!("Restoring snapshot {}", snapshot.meta.id);
        self.store.replace(snapshot.graph);
        Ok(())
    }

    /// Run every stale node upstream of `target_id`, target included.
    ///
    /// Returns an error without touching any node when the target is
    /// unknown, its upstream contains a cycle, the pending work costs more
    /// than the balance, or another run is active. Node failures do not
    /// fail the run; they are reported in the [`PipelineReport`].
    pub async fn execute_pipeline(&self, target_id: &str) -> Result<PipelineReport> {
        // Pre-flight rejections must not overwrite the active run's state
        if self.status.is_running() {
            return Err(self.reject_busy(target_id));
        }

        let plan = match self.plan_pipeline(target_id) {
            Ok(plan) => plan,
            Err(e) => return Err(self.reject(target_id, e)),
        };

        if !plan.affordable {
            return Err(self.reject(
                target_id,
                PipelineError::InsufficientCredits {
                    required: plan.estimated_cost,
                    available: plan.balance,
                },
            ));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        if !self.status.try_begin(&run_id, plan.pending.clone()) {
            return Err(self.reject_busy(target_id));
        }

        let cancel = CancellationToken::new();
        *self.active.lock() = Some(cancel.clone());
        let guard = RunGuard { engine: self };

        for id in &plan.pending {
            self.store.set_status(id, NodeStatus::Idle);
            self.store.set_status(id, NodeStatus::Queued);
        }

        log::info!(
            "Run {} for '{}': {} node(s) pending, estimated cost {}",
            run_id,
            target_id,
            plan.pending.len(),
            plan.estimated_cost
        );
        self.emit(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            target_id: target_id.to_string(),
            pending: plan.pending.clone(),
            estimated_cost: plan.estimated_cost,
        });

        let executor = NodeExecutor {
            run_id: &run_id,
            store: self.store.as_ref(),
            ledger: self.ledger.as_ref(),
            adapters: &self.adapters,
            events: self.events.as_ref(),
            status: self.status.as_ref(),
            cancel: &cancel,
        };

        let mut report = PipelineReport {
            run_id: run_id.clone(),
            target_id: target_id.to_string(),
            skipped: plan.fresh(),
            levels: plan.levels.clone(),
            ..Default::default()
        };

        for (index, level) in plan.levels.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            log::debug!("Level {}: {:?}", index, level);
            self.emit(PipelineEvent::LevelStarted {
                run_id: run_id.clone(),
                level: index,
                nodes: level.clone(),
            });

            let outcomes = join_all(level.iter().map(|id| executor.execute_node(id))).await;
            for (id, outcome) in level.iter().zip(outcomes) {
                match outcome {
                    NodeOutcome::Completed { credits_charged } => {
                        report.executed.push(id.clone());
                        report.credits_spent += credits_charged;
                    }
                    NodeOutcome::Failed { blocked, .. } => {
                        report.failed.push(id.clone());
                        report.blocked.extend(blocked);
                    }
                    NodeOutcome::Cancelled => report.cancelled.push(id.clone()),
                    NodeOutcome::Skipped(_) => {}
                }
            }
        }

        if cancel.is_cancelled() {
            for id in &plan.pending {
                let queued = self
                    .store
                    .node(id)
                    .is_some_and(|n| n.status == NodeStatus::Queued);
                if queued {
                    executor.mark_cancelled(id);
                    report.cancelled.push(id.clone());
                }
            }
        }

        report.blocked.sort_unstable();
        report.blocked.dedup();
        drop(guard);

        if report.is_success() || self.config.record_failed_runs {
            match self.snapshots.save_snapshot(&self.store.graph(), report.credits_spent) {
                Ok(meta) => report.snapshot = Some(meta),
                Err(e) => log::warn!("Failed to record snapshot for run {}: {}", run_id, e),
            }
        }

        log::info!(
            "Run {} finished: {} executed, {} failed, {} blocked, {} cancelled, {} credits spent",
            run_id,
            report.executed.len(),
            report.failed.len(),
            report.blocked.len(),
            report.cancelled.len(),
            report.credits_spent
        );
        self.emit(PipelineEvent::RunCompleted {
            run_id,
            target_id: target_id.to_string(),
            credits_spent: report.credits_spent,
            failed: report.failed.len(),
        });

        Ok(report)
    }

    /// Record a pre-flight rejection and hand the error back
    fn reject(&self, target_id: &str, error: PipelineError) -> PipelineError {
        log::warn!("Pipeline run for '{}' rejected: {}", target_id, error);
        self.status.set_error(error.to_string());
        self.emit(PipelineEvent::RunFailed {
            target_id: target_id.to_string(),
            error: error.to_string(),
        });
        error
    }

    /// Turn away a run while another is active, leaving its status alone
    fn reject_busy(&self, target_id: &str) -> PipelineError {
        log::warn!("Pipeline run for '{}' rejected: another run is active", target_id);
        self.emit(PipelineEvent::RunFailed {
            target_id: target_id.to_string(),
            error: PipelineError::AlreadyRunning.to_string(),
        });
        PipelineError::AlreadyRunning
    }

    fn emit(&self, event: PipelineEvent) {
        if let Err(e) = self.events.send(event) {
            log::trace!("Dropped pipeline event: {}", e);
        }
    }
}

/// Leaves the running state when a run ends or its future is dropped
struct RunGuard<'a> {
    engine: &'a PipelineEngine,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.engine.active.lock().take();
        self.engine.status.finish();
    }
}
