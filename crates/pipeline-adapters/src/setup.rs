//! Registry setup for host applications.
//!
//! Hosts call one of these at startup to get an [`AdapterRegistry`] covering
//! every adapter-backed node type (render, modifier, upscale, video).
//!
//! # Example
//!
//! ```ignore
//! let adapters = pipeline_adapters::http_registry(&http_config, &RetryPolicy::default())?;
//! let engine = PipelineEngine::new(store, ledger, adapters);
//! ```

use std::sync::Arc;

use pipeline_engine::{AdapterRegistry, NodeType};

use crate::config::{HttpAdapterConfig, MockConfig, RetryPolicy};
use crate::error::SetupError;
use crate::http::HttpAdapter;
use crate::mock::MockAdapter;
use crate::retry::RetryingAdapter;

fn adapter_types() -> impl Iterator<Item = NodeType> {
    NodeType::ALL.into_iter().filter(NodeType::uses_adapter)
}

/// Registry backed by [`MockAdapter`]s, one per node type
pub fn mock_registry(config: &MockConfig) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    for node_type in adapter_types() {
        registry.register(node_type, Arc::new(MockAdapter::new(config.clone())));
    }
    registry
}

/// Registry backed by retrying [`HttpAdapter`]s, one per node type
pub fn http_registry(config: &HttpAdapterConfig, policy: &RetryPolicy) -> Result<AdapterRegistry, SetupError> {
    let mut registry = AdapterRegistry::new();
    for node_type in adapter_types() {
        let adapter = RetryingAdapter::new(HttpAdapter::new(config)?, policy.clone());
        registry.register(node_type, Arc::new(adapter));
    }
    log::info!("HTTP adapters configured for {}", config.base_url);
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_cover_adapter_types() {
        let mock = mock_registry(&MockConfig::default());
        assert!(mock.missing_types().is_empty());
        assert!(!mock.has(NodeType::Source));
        assert!(!mock.has(NodeType::Compare));

        let http = http_registry(&HttpAdapterConfig::default(), &RetryPolicy::none()).unwrap();
        assert!(http.missing_types().is_empty());
    }
}
