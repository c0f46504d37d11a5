//! Bounded retry for single remote calls.
//!
//! [`RetryExecutor::execute`] never fails: it always hands back a
//! [`RemoteResponse`], converting transport errors and panics raised by the
//! request function into status-less failure responses. Client errors
//! (4xx) are returned immediately since retrying an invalid request cannot
//! help; network and server failures are retried with a per-call-site
//! [`RetryPolicy`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::panic_hook::panic_message;
use crate::remote::{RemoteError, RemoteResponse};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base_delay * failed_attempts`.
    Linear,
    /// `base_delay` every time.
    Fixed,
}

/// Retry parameters of one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    pub backoff: Backoff,
    /// Add up to 25% random jitter to each delay.
    #[serde(default)]
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, 1000)
    }
}

impl RetryPolicy {
    pub const fn linear(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            backoff: Backoff::Linear,
            use_jitter: false,
        }
    }

    pub const fn fixed(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            backoff: Backoff::Fixed,
            use_jitter: false,
        }
    }

    /// A single attempt; failures wait for the next scheduled run.
    pub const fn once() -> Self {
        Self::fixed(1, 0)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the `failed_attempts`-th failure (1-based).
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let delay_ms = match self.backoff {
            Backoff::Linear => self.base_delay_ms.saturating_mul(u64::from(failed_attempts)),
            Backoff::Fixed => self.base_delay_ms,
        };

        let final_delay = if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms.saturating_add(jitter)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }
}

/// Runs remote calls under a [`RetryPolicy`].
///
/// Sleeps between attempts on the calling task, so it must only be used
/// from worker tasks, never from the tick driver.
#[derive(Clone)]
pub struct RetryExecutor {
    clock: Arc<dyn Clock>,
}

impl RetryExecutor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub async fn execute<F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut request_fn: F,
    ) -> RemoteResponse
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RemoteResponse, RemoteError>>,
    {
        let attempts = policy.attempts();
        let mut last = RemoteResponse::failed("no attempt made");

        for attempt in 1..=attempts {
            let outcome = AssertUnwindSafe(async { request_fn().await })
                .catch_unwind()
                .await;

            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => RemoteResponse::failed(e.to_string()),
                Err(panic) => RemoteResponse::failed(format!(
                    "request panicked: {}",
                    panic_message(panic.as_ref())
                )),
            };

            if response.is_success() {
                if attempt > 1 {
                    debug!(operation, attempt, "Request succeeded after retry");
                }
                return response;
            }

            if response.is_client_error() {
                warn!(
                    operation,
                    status = response.status,
                    "Client error, not retrying"
                );
                return response;
            }

            if attempt < attempts {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = attempts,
                    error = %response.describe(),
                    "Request failed, retrying in {:?}",
                    delay
                );
                last = response;
                self.clock.sleep(delay).await;
            } else {
                last = response;
            }
        }

        warn!(
            operation,
            attempts,
            error = %last.describe(),
            "Request failed after exhausting retries"
        );
        last
    }
}
