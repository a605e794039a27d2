//! Resilient HTTP transport with exponential backoff.
//!
//! Wraps `reqwest` sends with retry behavior for transient backend
//! failures: HTTP 429 and any 5xx status are retried, honoring a
//! `Retry-After` header when the backend supplies one. Every other status
//! is handed straight back to the caller. The transport never reads the
//! body of a successful response, so callers can consume it incrementally.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Configuration for transport retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds). Doubles on every retry.
    pub initial_backoff_ms: u64,
    /// Upper bound applied to a server-supplied `Retry-After` (seconds).
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_retry_after_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Config with an explicit retry budget and initial backoff.
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: initial_backoff.as_millis() as u64,
            ..Self::default()
        }
    }
}

/// Whether a status code is treated as transient.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Parse a `Retry-After` header value expressed in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// The parts of a response the retry loop needs to inspect.
pub(crate) trait RetryableResponse {
    fn status_code(&self) -> u16;
    fn retry_after(&self) -> Option<Duration>;
}

impl RetryableResponse for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)
    }
}

/// Counters for transport activity.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    /// Total send attempts, first tries and retries alike.
    pub total_attempts: AtomicU64,
    /// Number of retries performed.
    pub retries: AtomicU64,
    /// Number of calls that ran out of retries.
    pub exhausted: AtomicU64,
    /// Cumulative time spent sleeping between attempts (milliseconds).
    pub total_retry_delay_ms: AtomicU64,
}

impl TransportMetrics {
    /// Take a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            total_retry_delay_ms: self.total_retry_delay_ms.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of transport metrics for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportSnapshot {
    pub total_attempts: u64,
    pub retries: u64,
    pub exhausted: u64,
    pub total_retry_delay_ms: u64,
}

/// HTTP transport shared by every provider adapter and media generator.
#[derive(Debug, Clone)]
pub struct ResilientTransport {
    client: reqwest::Client,
    config: RetryConfig,
    metrics: Arc<TransportMetrics>,
}

impl ResilientTransport {
    /// Create a transport with its own HTTP client.
    ///
    /// Only a connect timeout is applied; streamed generations may run for
    /// as long as the backend keeps the body open.
    pub fn new(config: RetryConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client, config)
    }

    /// Create a transport around an existing client.
    pub fn with_client(client: reqwest::Client, config: RetryConfig) -> Self {
        Self {
            client,
            config,
            metrics: Arc::new(TransportMetrics::default()),
        }
    }

    /// The underlying HTTP client, for building requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// The default retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Snapshot of the transport counters.
    pub fn metrics(&self) -> TransportSnapshot {
        self.metrics.snapshot()
    }

    /// Send a request with the transport's default retry configuration.
    pub async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        let config = self.config.clone();
        self.execute_with(request, &config).await
    }

    /// Send a request with an explicit retry configuration.
    ///
    /// Returns the raw response on any 2xx status. Non-success statuses are
    /// turned into [`TransportError::Http`] carrying the response body, so
    /// callers can extract an embedded error message.
    pub async fn execute_with(
        &self,
        request: reqwest::RequestBuilder,
        config: &RetryConfig,
    ) -> Result<reqwest::Response, TransportError> {
        let Some(probe) = request.try_clone() else {
            return Err(TransportError::NotCloneable);
        };
        let target = probe
            .build()
            .map(|r| r.url().path().to_string())
            .unwrap_or_default();

        let response = self
            .send_with_retry(&target, config, || {
                let attempt = request.try_clone();
                async move {
                    match attempt {
                        Some(builder) => builder.send().await.map_err(|e| e.to_string()),
                        None => Err("request body cannot be replayed".to_string()),
                    }
                }
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(target_path = %target, status = status.as_u16(), "Request returned error status");
        Err(TransportError::Http {
            status: status.as_u16(),
            body,
        })
    }

    /// Core retry loop.
    ///
    /// `send` is invoked once per attempt. Retryable statuses and send
    /// errors are retried while budget remains; the final response is
    /// returned as-is so the caller decides how to surface its status.
    pub(crate) async fn send_with_retry<R, E, F, Fut>(
        &self,
        target: &str,
        config: &RetryConfig,
        mut send: F,
    ) -> Result<R, TransportError>
    where
        R: RetryableResponse,
        E: Display,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<R, E>>,
    {
        let retry_after_cap = Duration::from_secs(config.max_retry_after_secs);
        let mut retries_left = config.max_retries;
        let mut backoff = Duration::from_millis(config.initial_backoff_ms);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.metrics.total_attempts.fetch_add(1, Ordering::Relaxed);

            let delay = match send().await {
                Ok(response) => {
                    let status = response.status_code();
                    if !is_retryable_status(status) {
                        return Ok(response);
                    }
                    if retries_left == 0 {
                        self.metrics.exhausted.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            target_path = target,
                            status,
                            attempts = attempt,
                            "Request failed after retries"
                        );
                        return Ok(response);
                    }
                    let delay = response
                        .retry_after()
                        .map(|d| d.min(retry_after_cap))
                        .unwrap_or(backoff);
                    tracing::warn!(
                        target_path = target,
                        status,
                        retries_left,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable status, backing off"
                    );
                    delay
                }
                Err(e) => {
                    if retries_left == 0 {
                        self.metrics.exhausted.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            target_path = target,
                            attempts = attempt,
                            error = %e,
                            "Request failed after retries"
                        );
                        return Err(TransportError::Network(e.to_string()));
                    }
                    tracing::warn!(
                        target_path = target,
                        retries_left,
                        error = %e,
                        "Request failed, retrying"
                    );
                    backoff
                }
            };

            tokio::time::sleep(delay).await;
            self.metrics.retries.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .total_retry_delay_ms
                .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
            retries_left -= 1;
            backoff = backoff.saturating_mul(2);
        }
    }
}
