//! Offline adapter for demos and tests
//!
//! Produces deterministic `mock://` references derived from the node and its
//! input, optionally after an artificial delay, and can be scripted to fail.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_engine::{AdapterError, AdapterInput, AdapterOutput, CancellationToken, NodeAdapter};

use crate::config::MockConfig;

/// Scripted failure behaviour
#[derive(Debug, Clone, Default)]
enum Script {
    #[default]
    Succeed,
    FailAlways(AdapterError),
    FailFirst { remaining: u32, error: AdapterError },
}

/// Adapter that fabricates outputs locally
#[derive(Debug, Default)]
pub struct MockAdapter {
    config: MockConfig,
    script: Mutex<Script>,
    calls: AtomicU32,
}

impl MockAdapter {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Fail every call with `error`
    pub fn failing(self, error: AdapterError) -> Self {
        *self.script.lock() = Script::FailAlways(error);
        self
    }

    /// Fail the next `count` calls with `error`, then succeed
    pub fn failing_first(self, count: u32, error: AdapterError) -> Self {
        *self.script.lock() = Script::FailFirst {
            remaining: count,
            error,
        };
        self
    }

    /// Number of calls received so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self) -> Option<AdapterError> {
        let mut script = self.script.lock();
        match &mut *script {
            Script::Succeed => None,
            Script::FailAlways(error) => Some(error.clone()),
            Script::FailFirst { remaining, error } => {
                if *remaining == 0 {
                    return None;
                }
                *remaining -= 1;
                Some(error.clone())
            }
        }
    }

    fn output_for(&self, node_id: &str, input: &AdapterInput) -> AdapterOutput {
        let base = self.config.base_resolution;
        let image = match input.image() {
            Some(source) => format!("mock://{}/{}?from={}", input.node_type(), node_id, source),
            None => format!("mock://{}/{}", input.node_type(), node_id),
        };

        match input {
            AdapterInput::Upscale { params, .. } => {
                let edge = (f64::from(base) * params.scale).round() as u32;
                AdapterOutput::new(image).with_resolution(format!("{edge}x{edge}"))
            }
            AdapterInput::Video { .. } => {
                let video = format!("mock://video/{node_id}.mp4");
                AdapterOutput::new(image)
                    .with_resolution(format!("{base}x{base}"))
                    .with_video(video)
            }
            _ => AdapterOutput::new(image).with_resolution(format!("{base}x{base}")),
        }
    }
}

#[async_trait]
impl NodeAdapter for MockAdapter {
    async fn run(
        &self,
        node_id: &str,
        input: AdapterInput,
        cancel: &CancellationToken,
    ) -> Result<AdapterOutput, AdapterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("MockAdapter {}: call {} for {}", node_id, call, input.node_type());

        let latency = self.config.latency();
        if !latency.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        }

        if let Some(error) = self.scripted_failure() {
            log::debug!("MockAdapter {}: scripted failure: {}", node_id, error);
            return Err(error);
        }

        Ok(self.output_for(node_id, &input))
    }
}
