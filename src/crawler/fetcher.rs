//! Rate-limited HTTP fetcher with bounded retries
//!
//! All requests in the process flow through one fetcher, which enforces a
//! global minimum interval between dispatches. Transient failures (network
//! errors, 5xx) are retried with doubling backoff up to the configured
//! attempt ceiling; 4xx responses fail immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::CrawlerConfig;
use crate::crawler::FetchError;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// A successfully fetched page
#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    /// Final URL after redirects
    pub final_url: String,
    pub response_time: Duration,
}

/// Shared HTTP fetcher
///
/// Cloning is cheap; clones share the client and the politeness gate.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    retry_attempts: u32,
    min_interval: Duration,
    last_dispatch: Arc<Mutex<Option<Instant>>>,
}

impl Fetcher {
    pub fn new(config: &CrawlerConfig, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self {
            client,
            retry_attempts: config.retry_attempts,
            min_interval: Duration::from_millis(config.min_request_interval_ms),
            last_dispatch: Arc::new(Mutex::new(None)),
        })
    }

    /// Blocks until the politeness interval has elapsed since the previous
    /// dispatch, then claims the slot
    ///
    /// The lock is held across the sleep so concurrent tasks queue here
    /// rather than racing on the marker.
    async fn wait_for_slot(&self) {
        let mut last = self.last_dispatch.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Fetches a URL, retrying transient failures
    pub async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry_attempts {
            self.wait_for_slot().await;
            let started = Instant::now();

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let final_url = response.url().to_string();
                        let body = response.text().await.map_err(|e| {
                            FetchError::RetriesExhausted {
                                url: url.to_string(),
                                attempts: attempt,
                                last_error: format!("failed to read body: {e}"),
                            }
                        })?;
                        debug!(url, status = status.as_u16(), attempt, "fetched");
                        return Ok(FetchResponse {
                            status: status.as_u16(),
                            body,
                            final_url,
                            response_time: started.elapsed(),
                        });
                    }

                    if status.is_client_error() {
                        return Err(FetchError::ClientStatus {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }

                    last_error = format!("HTTP {}", status.as_u16());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < self.retry_attempts {
                let backoff = backoff_delay(attempt);
                warn!(url, attempt, error = %last_error, backoff_ms = backoff.as_millis() as u64, "fetch failed, retrying");
                tokio::time::sleep(backoff).await;
            }
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.retry_attempts,
            last_error,
        })
    }
}

/// Doubling backoff: 500ms, 1s, 2s, ... capped at 10s
fn backoff_delay(attempt: u32) -> Duration {
    let delay = BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1));
    delay.min(BACKOFF_CAP)
}
