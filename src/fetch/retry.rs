//! Retry with exponential backoff and jitter.
//!
//! Only [`FetchError::Transient`] is retried. Client errors return after
//! one attempt. When the attempt budget runs out, or the next attempt could
//! not start before the deadline, the request ends in
//! [`FetchError::Timeout`].

use std::time::{Duration, Instant};

use rand::Rng;

use super::FetchError;
use crate::http::{HttpResponse, Transport, display_url, error_message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the delay after failed attempt `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }

    /// Delay after failed attempt `attempt`, jittered into `[ceiling/2, ceiling]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let millis = ceiling.as_millis() as u64;
        if millis < 2 {
            return ceiling;
        }
        Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis))
    }
}

/// Result of a retried request and the number of attempts it consumed.
#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<HttpResponse, FetchError>,
    pub attempts: u32,
}

/// Issue one request and classify the response.
pub fn attempt(
    transport: &dyn Transport,
    url: &str,
    params: &[(String, String)],
) -> Result<HttpResponse, FetchError> {
    match transport.get(url, params) {
        Ok(response) if response.is_success() => Ok(response),
        Ok(response) if response.is_retryable() => Err(FetchError::Transient {
            message: format!("HTTP {}: {}", response.status, error_message(&response.body)),
        }),
        Ok(response) => Err(FetchError::Client {
            status: response.status,
            message: error_message(&response.body),
        }),
        Err(e) if e.is_retryable() => Err(FetchError::Transient {
            message: e.to_string(),
        }),
        Err(e) => Err(FetchError::InvalidRequest {
            message: e.to_string(),
        }),
    }
}

/// Request `url` under `policy`, stopping at `deadline`.
///
/// No attempt starts after the deadline; an attempt already in flight is
/// allowed to finish.
pub fn fetch_with_retry(
    transport: &dyn Transport,
    url: &str,
    params: &[(String, String)],
    policy: &RetryPolicy,
    deadline: Option<Instant>,
) -> RetryOutcome {
    let shown = display_url(url, params);
    let mut attempts = 0;
    let mut last_error = String::new();

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            let detail = if attempts == 0 {
                "deadline passed before the request was dispatched".to_string()
            } else {
                format!("deadline reached; last error: {last_error}")
            };
            return RetryOutcome {
                result: Err(FetchError::Timeout { attempts, detail }),
                attempts,
            };
        }

        attempts += 1;
        match attempt(transport, url, params) {
            Ok(response) => {
                tracing::debug!(url = %shown, status = response.status, attempts, "request succeeded");
                return RetryOutcome {
                    result: Ok(response),
                    attempts,
                };
            }
            Err(FetchError::Transient { message }) => {
                tracing::debug!(url = %shown, attempt = attempts, error = %message, "transient failure");
                last_error = message;
            }
            Err(e) => {
                tracing::debug!(url = %shown, attempt = attempts, error = %e, "request failed");
                return RetryOutcome {
                    result: Err(e),
                    attempts,
                };
            }
        }

        if attempts >= policy.max_attempts {
            return RetryOutcome {
                result: Err(FetchError::Timeout {
                    attempts,
                    detail: format!("retry budget exhausted; last error: {last_error}"),
                }),
                attempts,
            };
        }

        let delay = policy.backoff(attempts);
        if let Some(d) = deadline {
            if Instant::now() + delay >= d {
                return RetryOutcome {
                    result: Err(FetchError::Timeout {
                        attempts,
                        detail: format!("deadline reached; last error: {last_error}"),
                    }),
                    attempts,
                };
            }
        }
        tracing::warn!(
            url = %shown,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %last_error,
            "retrying request"
        );
        std::thread::sleep(delay);
    }
}
