//! Retry wrapper for transient adapter failures
//!
//! Retries calls that fail with a transient [`AdapterError`] using
//! exponential backoff. A rate-limit `retry_after` hint replaces the computed
//! backoff for that attempt (still capped by the policy maximum).

use std::time::Duration;

use async_trait::async_trait;
use pipeline_engine::{AdapterError, AdapterInput, AdapterOutput, CancellationToken, NodeAdapter};

use crate::config::RetryPolicy;

/// Adapter that retries its inner adapter on transient failures
pub struct RetryingAdapter<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A: NodeAdapter> RetryingAdapter<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn delay_for(&self, error: &AdapterError, attempt: u32) -> Duration {
        let cap = Duration::from_millis(self.policy.backoff_max_ms);
        error
            .retry_after()
            .map(|hint| hint.min(cap))
            .unwrap_or_else(|| self.policy.backoff(attempt))
    }
}

#[async_trait]
impl<A: NodeAdapter> NodeAdapter for RetryingAdapter<A> {
    async fn run(
        &self,
        node_id: &str,
        input: AdapterInput,
        cancel: &CancellationToken,
    ) -> Result<AdapterOutput, AdapterError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let error = match self.inner.run(node_id, input.clone(), cancel).await {
                Ok(output) => {
                    if attempt > 0 {
                        log::info!("Adapter call for {} succeeded after {} retries", node_id, attempt);
                    }
                    return Ok(output);
                }
                Err(e) => e,
            };

            if !error.is_transient() || attempt + 1 >= max_attempts {
                return Err(error);
            }

            let delay = self.delay_for(&error, attempt);
            log::warn!(
                "Adapter call for {} failed (attempt {}/{}): {}; retrying in {:?}",
                node_id,
                attempt + 1,
                max_attempts,
                error,
                delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use pipeline_engine::{NodeType, PipelineNode};

    fn render_input() -> AdapterInput {
        let node = PipelineNode::new("r", NodeType::Render);
        AdapterInput::from_node(&node, None, None).unwrap()
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let inner = MockAdapter::default().failing_first(2, AdapterError::Network("reset".into()));
        let adapter = RetryingAdapter::new(inner, fast_policy(3));

        let output = adapter
            .run("r", render_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(output.image.starts_with("mock://render/r"));
        assert_eq!(adapter.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let inner = MockAdapter::default().failing(AdapterError::Server("502".into()));
        let adapter = RetryingAdapter::new(inner, fast_policy(2));

        let err = adapter
            .run("r", render_input(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, AdapterError::Server("502".into()));
        assert_eq!(adapter.inner().calls(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let inner = MockAdapter::default().failing(AdapterError::Authentication("bad key".into()));
        let adapter = RetryingAdapter::new(inner, fast_policy(5));

        assert!(adapter
            .run("r", render_input(), &CancellationToken::new())
            .await
            .is_err());
        assert_eq!(adapter.inner().calls(), 1);
    }

    #[test]
    fn test_rate_limit_hint_capped() {
        let adapter = RetryingAdapter::new(MockAdapter::default(), fast_policy(3));
        let limited = AdapterError::rate_limited("slow down", Some(Duration::from_secs(60)));
        assert_eq!(adapter.delay_for(&limited, 0), Duration::from_millis(5));

        let server = AdapterError::Server("500".into());
        assert_eq!(adapter.delay_for(&server, 1), Duration::from_millis(2));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let inner = MockAdapter::default().failing(AdapterError::Server("500".into()));
        let adapter = RetryingAdapter::new(
            inner,
            RetryPolicy {
                max_attempts: 3,
                backoff_base_ms: 60_000,
                backoff_max_ms: 60_000,
            },
        );
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(adapter.run("r", render_input(), &cancel), async {
            tokio::task::yield_now().await;
            cancel.cancel();
        });
        assert_eq!(result.unwrap_err(), AdapterError::Cancelled);
        assert_eq!(adapter.inner().calls(), 1);
    }
}
