//! Page fetcher
//!
//! The transport itself is an external collaborator; this module defines
//! the `PageFetcher` seam plus the production HTTP implementation with a
//! shared rate gate so the request rate against the source is bounded
//! independently of worker count.

use crate::types::{Isin, RawDocument};
use async_trait::async_trait;
use chrono::Utc;
use etfscout_common::{Error, ErrorClass};
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Typed fetch failure
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request timed out (transient)
    #[error("fetch timed out for {0}")]
    Timeout(Isin),

    /// Source refused or rate-limited the request, or returned an
    /// empty/unusable body (transient)
    #[error("fetch blocked for {0}: {1}")]
    Blocked(Isin, String),

    /// Source explicitly has no page for this identifier (terminal)
    #[error("no page found for {0}")]
    NotFound(Isin),

    /// Other HTTP-level failure (transient)
    #[error("HTTP error for {0}: {1}")]
    Http(Isin, String),
}

impl FetchError {
    /// Retry classification: only an explicit not-found is terminal
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::NotFound(_) => ErrorClass::Terminal,
            _ => ErrorClass::Transient,
        }
    }
}

/// Fetch seam: identifier to raw document or typed failure
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, isin: &Isin) -> Result<RawDocument, FetchError>;
}

/// Shared minimum-interval gate in front of all fetches
///
/// All workers go through the same gate, so the request rate against the
/// source stays bounded regardless of worker count.
#[derive(Clone)]
pub struct RateGate {
    interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait until the configured interval has passed since the previous
    /// caller was admitted. Holding the lock across the sleep serializes
    /// admission, which is exactly the point.
    pub async fn admit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Rate gate: delaying request");
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Production fetcher over HTTP
///
/// Identity and pacing are configuration, never hard-coded: user agent,
/// timeout, and the shared rate gate all come from the caller.
pub struct HttpFetcher {
    http_client: Client,
    base_url: String,
    rate_gate: RateGate,
}

impl HttpFetcher {
    /// Build a fetcher for the given source base URL
    ///
    /// The page for an identifier is `{base_url}/{isin}`.
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
        rate_gate: RateGate,
    ) -> Result<Self, Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(user_agent)
                .map_err(|e| Error::Config(format!("invalid user agent: {}", e)))?,
        );

        let http_client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
            rate_gate,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, isin: &Isin) -> Result<RawDocument, FetchError> {
        self.rate_gate.admit().await;

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), isin);
        debug!(isin = %isin, url = %url, "Fetching page");

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(isin.clone())
            } else {
                FetchError::Http(isin.clone(), e.to_string())
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(FetchError::NotFound(isin.clone()));
            }
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                warn!(isin = %isin, status = %status, "Source blocked the request");
                return Err(FetchError::Blocked(isin.clone(), status.to_string()));
            }
            s if !s.is_success() => {
                return Err(FetchError::Http(isin.clone(), status.to_string()));
            }
            _ => {}
        }

        let html = response
            .text()
            .await
            .map_err(|e| FetchError::Http(isin.clone(), e.to_string()))?;

        // An empty or near-empty body is a soft block, worth retrying
        if html.trim().len() < 256 {
            return Err(FetchError::Blocked(
                isin.clone(),
                format!("body too short ({} bytes)", html.len()),
            ));
        }

        Ok(RawDocument {
            isin: isin.clone(),
            html,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_terminal() {
        let isin: Isin = "IE00B5BMR087".parse().unwrap();
        assert_eq!(FetchError::NotFound(isin).class(), ErrorClass::Terminal);
    }

    #[test]
    fn test_timeout_and_blocked_are_transient() {
        let isin: Isin = "IE00B5BMR087".parse().unwrap();
        assert_eq!(
            FetchError::Timeout(isin.clone()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            FetchError::Blocked(isin, "429".to_string()).class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_invalid_user_agent_is_config_error() {
        let gate = RateGate::new(Duration::from_millis(1));
        let result = HttpFetcher::new(
            "http://example.invalid",
            "bad\nagent",
            Duration::from_secs(1),
            gate,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_rate_gate_enforces_interval() {
        let gate = RateGate::new(Duration::from_millis(50));
        let start = Instant::now();
        gate.admit().await;
        gate.admit().await;
        gate.admit().await;
        // Two enforced intervals after the free first admission
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
