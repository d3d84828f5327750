//! Direct-forward fallback: routes with a `target_url` and no connected
//! tunnel are proxied straight from the gateway over plain HTTP (spec §4.2
//! "Dispatch selection").

use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::headers::is_hop_by_hop;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream response exceeded the body size limit")]
    ResponseTooLarge,
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("target_url is not a valid URL: {0}")]
    InvalidTarget(String),
}

pub struct ForwardOutcome {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub latency_ms: u64,
}

/// A thin wrapper over `hyper_util`'s legacy client, mirroring how the rest
/// of the workspace reaches for `hyper`/`hyper-util` for outbound HTTP.
pub struct DirectForwarder {
    client: Client<HttpConnector, http_body_util::Full<Bytes>>,
}

impl Default for DirectForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectForwarder {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }

    pub async fn forward(
        &self,
        target_url: &str,
        forward_path: &str,
        query: &str,
        method: &str,
        mut headers: Vec<(String, String)>,
        body: Vec<u8>,
        timeout: Duration,
        max_response_bytes: usize,
    ) -> Result<ForwardOutcome, ForwardError> {
        let base = target_url.trim_end_matches('/');
        let path = if forward_path.starts_with('/') {
            forward_path.to_string()
        } else {
            format!("/{forward_path}")
        };
        let url = if query.is_empty() {
            format!("{base}{path}")
        } else {
            format!("{base}{path}?{query}")
        };

        let method: hyper::Method =
            method.parse().map_err(|_| ForwardError::InvalidTarget(method.to_string()))?;
        headers.retain(|(name, _)| !is_hop_by_hop(name));

        let mut builder = hyper::Request::builder().method(method).uri(&url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder
            .body(http_body_util::Full::new(Bytes::from(body)))
            .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;

        let started = Instant::now();
        let response = tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| ForwardError::Timeout)?
            .map_err(|e| ForwardError::Upstream(e.to_string()))?;

        let status = response.status().as_u16();
        let response_headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
            .filter(|(name, _)| !is_hop_by_hop(name))
            .collect();

        let limited = Limited::new(response.into_body(), max_response_bytes);
        let collected = limited
            .collect()
            .await
            .map_err(|_| ForwardError::ResponseTooLarge)?;
        let body = collected.to_bytes().to_vec();

        Ok(ForwardOutcome {
            status,
            headers: response_headers,
            body,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}
