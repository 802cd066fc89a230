use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Spaces calls to one service at least `1s / rate` apart across every caller.
#[derive(Debug)]
pub struct RateLimiter {
    spacing: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// `None` for a rate of zero, which means "no limit".
    pub fn per_second(rate: u32) -> Option<Self> {
        if rate == 0 {
            return None;
        }
        Some(Self {
            spacing: Duration::from_secs(1) / rate,
            next_slot: Mutex::new(Instant::now()),
        })
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Reserves the next free slot and waits for it.
    pub async fn acquire(&self) {
        let wait = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next_slot).max(now);
            *next_slot = slot + self.spacing;
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Upper bound on requests in flight to this service.
    pub max_in_flight: usize,
    pub backoff: BackoffPolicy,
    /// Requests per second; `None` leaves the service unthrottled.
    pub rate_per_sec: Option<u32>,
    /// Sent as `Authorization: Bearer ...` on every call.
    pub bearer_token: Option<String>,
}

impl ServiceClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(20),
            user_agent: Some("talent-radar/0.1".to_string()),
            max_in_flight: 16,
            backoff: BackoffPolicy::default(),
            rate_per_sec: None,
            bearer_token: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("client is shut down")]
    Closed,
}

impl ServiceError {
    /// Whether the remote could not be reached or answered with a server-side failure.
    pub fn is_transport(&self) -> bool {
        match self {
            ServiceError::Request(_) | ServiceError::Closed => true,
            ServiceError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

/// JSON client for one external service with retry, backoff and a concurrency cap.
#[derive(Debug)]
pub struct ServiceClient {
    client: reqwest::Client,
    base_url: String,
    in_flight: Arc<Semaphore>,
    rate_limiter: Option<RateLimiter>,
    backoff: BackoffPolicy,
    bearer_token: Option<String>,
}

impl ServiceClient {
    pub fn new(config: ServiceClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            rate_limiter: config.rate_per_sec.and_then(RateLimiter::per_second),
            backoff: config.backoff,
            bearer_token: config.bearer_token,
        })
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limiter.is_some()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ServiceError> {
        let url = self.url(path);
        self.send_with_retry(&url, || self.client.get(&url)).await
    }

    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        self.send_with_retry(&url, || self.client.post(&url).json(body)).await
    }

    async fn send_with_retry<R, F>(&self, url: &str, build: F) -> Result<R, ServiceError>
    where
        R: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| ServiceError::Closed)?;

        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let span = info_span!("service_call", url);
        async {
            let mut attempt = 0;
            loop {
                let mut request = build();
                if let Some(token) = &self.bearer_token {
                    request = request.bearer_auth(token);
                }

                match request.send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        if status.is_success() {
                            return Ok(resp.json::<R>().await?);
                        }

                        let final_url = resp.url().to_string();
                        if classify_status(status) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            debug!(attempt, status = status.as_u16(), "retrying service call");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }

                        return Err(ServiceError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::Retryable
                            && attempt < self.backoff.max_retries
                        {
                            debug!(attempt, error = %err, "retrying service call");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(ServiceError::Request(err));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
