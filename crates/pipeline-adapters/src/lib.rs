//! Pipeline Adapters
//!
//! Adapter implementations for the pipeline engine: the steps that actually
//! transform images. The engine decides what runs; these decide how.
//!
//! # Adapters
//!
//! - **MockAdapter**: deterministic local outputs for demos and tests
//! - **HttpAdapter**: JSON-over-HTTP client for a remote image service
//! - **RetryingAdapter**: wraps any adapter with backoff on transient errors

pub mod config;
pub mod error;
pub mod http;
pub mod mock;
pub mod retry;
pub mod setup;

pub use config::{HttpAdapterConfig, MockConfig, RetryPolicy};
pub use error::SetupError;
pub use http::HttpAdapter;
pub use mock::MockAdapter;
pub use retry::RetryingAdapter;
pub use setup::{http_registry, mock_registry};
