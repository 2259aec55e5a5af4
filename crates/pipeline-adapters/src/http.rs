//! HTTP adapter for remote image services
//!
//! Each call POSTs `{"nodeId": ..., "input": <AdapterInput>}` as JSON to
//! `{base_url}/{node type}` and expects an [`AdapterOutput`]-shaped JSON body
//! back (`timestamp` may be omitted). Non-success statuses are classified
//! into [`AdapterError`] variants so [`RetryingAdapter`](crate::RetryingAdapter)
//! can tell transient failures from permanent ones.

use std::time::Duration;

use async_trait::async_trait;
use pipeline_engine::{AdapterError, AdapterInput, AdapterOutput, CancellationToken, NodeAdapter};
use reqwest::header::RETRY_AFTER;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::config::HttpAdapterConfig;
use crate::error::SetupError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    node_id: &'a str,
    input: &'a AdapterInput,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    image: String,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    video: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl From<RunResponse> for AdapterOutput {
    fn from(response: RunResponse) -> Self {
        let mut output = AdapterOutput::new(response.image);
        output.resolution = response.resolution;
        output.video = response.video;
        if let Some(timestamp) = response.timestamp {
            output.timestamp = timestamp;
        }
        output
    }
}

/// Adapter calling a remote image service over HTTP
pub struct HttpAdapter {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpAdapter {
    pub fn new(config: &HttpAdapterConfig) -> Result<Self, SetupError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            SetupError::InvalidBaseUrl {
                url: config.base_url.clone(),
                reason: e.to_string(),
            }
        })?;
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            timeout: config.timeout(),
        })
    }

    /// Endpoint for one node type
    pub fn endpoint(&self, input: &AdapterInput) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), input.node_type())
    }

    async fn call(&self, node_id: &str, input: &AdapterInput) -> Result<AdapterOutput, AdapterError> {
        let url = self.endpoint(input);
        log::debug!("HttpAdapter {}: POST {}", node_id, url);

        let mut request = self.client.post(&url).json(&RunRequest { node_id, input });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, body));
        }

        let body: RunResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Server(format!("Failed to parse response: {}", e)))?;
        log::debug!("HttpAdapter {}: completed with {}", node_id, body.image);
        Ok(body.into())
    }

    fn transport_error(&self, error: reqwest::Error) -> AdapterError {
        if error.is_timeout() {
            AdapterError::Timeout(self.timeout)
        } else {
            AdapterError::Network(format!("Failed to reach {}: {}", self.base_url, error))
        }
    }
}

#[async_trait]
impl NodeAdapter for HttpAdapter {
    async fn run(
        &self,
        node_id: &str,
        input: AdapterInput,
        cancel: &CancellationToken,
    ) -> Result<AdapterOutput, AdapterError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AdapterError::Cancelled),
            result = self.call(node_id, &input) => result,
        }
    }
}

/// Map a non-success HTTP status to an adapter error
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> AdapterError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AdapterError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => AdapterError::rate_limited(message, retry_after),
        StatusCode::UNPROCESSABLE_ENTITY => AdapterError::ContentFiltered(message),
        s if s.is_server_error() => AdapterError::Server(message),
        _ => AdapterError::Rejected(message),
    }
}

/// Parse a `Retry-After` header given in seconds
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_engine::{NodeType, PipelineNode};

    #[test]
    fn test_status_classification() {
        let classify = |code: u16| {
            classify_status(StatusCode::from_u16(code).unwrap(), None, String::new())
        };

        assert!(matches!(classify(401), AdapterError::Authentication(_)));
        assert!(matches!(classify(403), AdapterError::Authentication(_)));
        assert!(matches!(classify(422), AdapterError::ContentFiltered(_)));
        assert!(matches!(classify(400), AdapterError::Rejected(_)));
        assert!(matches!(classify(404), AdapterError::Rejected(_)));
        assert!(matches!(classify(503), AdapterError::Server(_)));
        assert!(classify(502).is_transient());
        assert!(!classify(400).is_transient());
    }

    #[test]
    fn test_rate_limit_carries_hint() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            parse_retry_after(" 7 "),
            "quota".to_string(),
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert!(err.to_string().contains("quota"));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_endpoint_per_node_type() {
        let adapter = HttpAdapter::new(&HttpAdapterConfig {
            base_url: "https://images.example.com/v1/".to_string(),
            ..HttpAdapterConfig::default()
        })
        .unwrap();
        let node = PipelineNode::new("u", NodeType::Upscale);
        let input = AdapterInput::from_node(&node, None, None).unwrap();
        assert_eq!(adapter.endpoint(&input), "https://images.example.com/v1/upscale");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpAdapter::new(&HttpAdapterConfig {
            base_url: "not a url".to_string(),
            ..HttpAdapterConfig::default()
        });
        assert!(matches!(result, Err(SetupError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn test_response_without_timestamp() {
        let response: RunResponse =
            serde_json::from_str(r#"{"image": "https://cdn/x.png", "resolution": "2048x2048"}"#).unwrap();
        let output = AdapterOutput::from(response);
        assert_eq!(output.image, "https://cdn/x.png");
        assert_eq!(output.resolution.as_deref(), Some("2048x2048"));
        assert!(!output.timestamp.is_empty());
    }
}
