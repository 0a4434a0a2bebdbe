use crate::transport::RawTransport;
use isodb_core::app_error::{AppError, AppResult};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::thread;
use std::time::{Duration, Instant};

/// Minimum spacing between consecutive requests issued by one transport.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    pub min_interval: Duration,
    pub last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: None,
        }
    }

    /// How long a request issued at `now` must still wait.
    pub fn delay_at(&self, now: Instant) -> Duration {
        match self.last_request {
            None => Duration::ZERO,
            Some(last) => self
                .min_interval
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    pub fn wait(&mut self) {
        let delay = self.delay_at(Instant::now());
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    pub fn mark(&mut self, at: Instant) {
        self.last_request = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut(u32) -> AppResult<T>) -> AppResult<T> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable && attempt < self.max_attempts => {
                    tracing::warn!(
                        target_doc = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        code = %err.code,
                        error = %err.message,
                        "request failed; retrying"
                    );
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(mut err) => {
                    if let Some(details) = err.details.as_object_mut() {
                        details.insert("attempts".to_string(), serde_json::json!(attempt));
                    }
                    return Err(err);
                }
            }
        }
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub fn classify_request_error(url: &str, e: &reqwest::Error) -> AppError {
    let retryable = e.is_timeout()
        || e.is_connect()
        || e.is_request()
        || e.status().map(is_retryable_status).unwrap_or(false);
    let code = if e.is_timeout() {
        "ISO_FETCH_TIMEOUT"
    } else if retryable {
        "ISO_FETCH_UNAVAILABLE"
    } else {
        "ISO_FETCH_FAILED"
    };
    AppError::new(
        code,
        "fetch",
        "request to source failed",
        retryable,
        serde_json::json!({ "error": e.to_string(), "url": url }),
    )
}

pub fn classify_status(url: &str, status: StatusCode) -> AppError {
    let retryable = is_retryable_status(status);
    let code = if status == StatusCode::NOT_FOUND {
        "ISO_FETCH_NOT_FOUND"
    } else if retryable {
        "ISO_FETCH_UNAVAILABLE"
    } else {
        "ISO_FETCH_FAILED"
    };
    AppError::new(
        code,
        "fetch",
        &format!("source responded with http {}", status.as_u16()),
        retryable,
        serde_json::json!({ "status": status.as_u16(), "url": url }),
    )
}

/// Blocking HTTP transport over the public API, rate limited and retried.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        limiter: RateLimiter,
        retry: RetryPolicy,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("isodb-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AppError::new(
                    "ISO_FETCH_CLIENT_FAILED",
                    "fetch",
                    "failed to build http client",
                    false,
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
            retry,
        })
    }

    fn get_once(&mut self, url: &str) -> AppResult<Value> {
        self.limiter.wait();
        let started = Instant::now();
        let response = self.client.get(url).send();
        self.limiter.mark(Instant::now());
        let response = response.map_err(|e| classify_request_error(url, &e))?;

        let status = response.status();
        tracing::debug!(url, status = status.as_u16(), elapsed_ms = started.elapsed().as_millis() as u64, "source request");
        if !status.is_success() {
            return Err(classify_status(url, status));
        }
        response.json::<Value>().map_err(|e| {
            if e.is_decode() {
                AppError::new(
                    "ISO_FETCH_PAYLOAD_INVALID",
                    "fetch",
                    "source response is not valid json",
                    false,
                    serde_json::json!({ "error": e.to_string(), "url": url }),
                )
            } else {
                classify_request_error(url, &e)
            }
        })
    }
}

impl RawTransport for HttpTransport {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn get_json(&mut self, leaf: &str) -> AppResult<Value> {
        let url = format!("{}/{}", self.base_url, leaf.trim_start_matches('/'));
        let retry = self.retry;
        retry.run(leaf, |_| self.get_once(&url))
    }
}
