// =============================================================================
// http_client.rs — THE POLITE BUT RELENTLESS EDGAR CLIENT
// =============================================================================
//
// Every byte this engine reads comes through here: the master index, the
// per-filing directory listings, and the XML information tables.
//
// SEC's rules are simple. Identify yourself (User-Agent with contact info),
// and don't hammer the servers. If you do hammer them, you get a 429, and the
// only correct response to a 429 is to go away for a while and come back.
// So that's what we do, forever if need be:
//
//   200        -> here's your body
//   404        -> that document doesn't exist, stop asking
//   429        -> wait 5s, 10s, 20s ... 120s, 120s, ... and try again
//   other/neterr -> a few quick retries, then give up on this URL
//
// The actual socket work sits behind the `Transport` trait so the retry
// policy can be exercised without a network.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::metrics::IngestMetrics;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("fetch of {url} failed after {attempts} attempts: {reason}")]
    FetchFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("could not decode JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Transport-level failure: connection refused, timeout, truncated body.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// One GET, no retries, no opinions.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

/// The real thing: reqwest with the SEC-mandated User-Agent baked in.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

/// What a fetch can successfully come back with.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Body(T),
    /// 404. The document is definitively not there.
    Absent,
}

enum Outcome {
    Ok(String),
    Absent,
    RateLimited,
    Transient(String),
}

fn classify(result: Result<TransportResponse, TransportError>) -> Outcome {
    match result {
        Ok(resp) if (200..300).contains(&resp.status) => Outcome::Ok(resp.body),
        Ok(resp) if resp.status == 404 => Outcome::Absent,
        Ok(resp) if resp.status == 429 => Outcome::RateLimited,
        Ok(resp) => Outcome::Transient(format!("HTTP {}", resp.status)),
        Err(e) => Outcome::Transient(e.to_string()),
    }
}

/// Exponential backoff for 429s: doubles from `initial`, pinned at `cap`.
/// Never runs out.
#[derive(Debug, Clone)]
pub struct RateLimitBackoff {
    next: Duration,
    cap: Duration,
}

impl RateLimitBackoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            next: initial.min(cap),
            cap,
        }
    }
}

impl Iterator for RateLimitBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = self.next.saturating_mul(2).min(self.cap);
        Some(current)
    }
}

pub struct RetryingHttpClient<T: Transport> {
    transport: T,
    policy: RetryPolicy,
    metrics: Arc<IngestMetrics>,
}

impl<T: Transport> RetryingHttpClient<T> {
    pub fn new(transport: T, policy: RetryPolicy, metrics: Arc<IngestMetrics>) -> Self {
        Self {
            transport,
            policy,
            metrics,
        }
    }

    fn backoff(&self) -> RateLimitBackoff {
        RateLimitBackoff::new(
            self.policy.rate_limit_initial,
            self.policy.rate_limit_backoff_cap,
        )
    }

    /// Fetch a document as text. A 429 is never surfaced: we stall until
    /// EDGAR lets us back in.
    pub async fn fetch(&self, url: &str) -> Result<Fetched<String>, FetchError> {
        let mut backoff = self.backoff();
        let mut transient_failures = 0u32;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.metrics.increment_http_requests();

            match classify(self.transport.get(url).await) {
                Outcome::Ok(body) => return Ok(Fetched::Body(body)),
                Outcome::Absent => {
                    debug!(url = %url, "404 — nothing here");
                    return Ok(Fetched::Absent);
                }
                Outcome::RateLimited => {
                    self.metrics.increment_rate_limited();
                    let wait = backoff.next().unwrap_or(self.policy.rate_limit_backoff_cap);
                    warn!(
                        url = %url,
                        attempt = attempts,
                        wait_secs = wait.as_secs(),
                        "429 rate limited — EDGAR wants us to calm down, waiting {}s",
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                }
                Outcome::Transient(reason) => {
                    transient_failures += 1;
                    if transient_failures > self.policy.max_transient_retries {
                        error!(url = %url, attempts = attempts, reason = %reason, "giving up on URL");
                        return Err(FetchError::FetchFailed {
                            url: url.to_string(),
                            attempts,
                            reason,
                        });
                    }
                    self.metrics.increment_transient_retries();
                    warn!(
                        url = %url,
                        attempt = attempts,
                        reason = %reason,
                        "transient failure, retrying in {}ms",
                        self.policy.transient_retry_delay.as_millis()
                    );
                    tokio::time::sleep(self.policy.transient_retry_delay).await;
                }
            }
        }
    }

    /// Fetch and decode a JSON document. Same classification as `fetch`,
    /// except a 429 spends the bounded retry budget instead of waiting
    /// forever; callers can afford to skip these lookups.
    pub async fn fetch_json<D: DeserializeOwned>(&self, url: &str) -> Result<Fetched<D>, FetchError> {
        let mut failures = 0u32;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.metrics.increment_http_requests();

            let reason = match classify(self.transport.get(url).await) {
                Outcome::Ok(body) => {
                    return serde_json::from_str(&body)
                        .map(Fetched::Body)
                        .map_err(|source| FetchError::Decode {
                            url: url.to_string(),
                            source,
                        });
                }
                Outcome::Absent => return Ok(Fetched::Absent),
                Outcome::RateLimited => {
                    self.metrics.increment_rate_limited();
                    "HTTP 429".to_string()
                }
                Outcome::Transient(reason) => reason,
            };

            failures += 1;
            if failures > self.policy.max_transient_retries {
                warn!(url = %url, attempts = attempts, reason = %reason, "JSON lookup abandoned");
                return Err(FetchError::FetchFailed {
                    url: url.to_string(),
                    attempts,
                    reason,
                });
            }
            self.metrics.increment_transient_retries();
            debug!(url = %url, attempt = attempts, reason = %reason, "JSON lookup retry");
            tokio::time::sleep(self.policy.transient_retry_delay).await;
        }
    }
}
