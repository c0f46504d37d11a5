//! Injectable time source.
//!
//! Everything time-driven in the engine goes through [`Clock`]. The default
//! [`TokioClock`] uses `tokio::time`, so tests running on a paused runtime
//! (`#[tokio::test(start_paused = true)]`) get fully deterministic timing.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

pub trait Clock: Send + Sync + 'static {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Sleep for `duration` without blocking the thread.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Sleep until `deadline`.
    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()> {
        self.sleep(deadline.saturating_duration_since(self.now()))
    }
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep_until(deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_sleep_advances_paused_time() {
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(1500)).await;
        assert!(clock.now() - start >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_past_deadline_returns() {
        let clock = TokioClock;
        let past = clock.now();
        clock.sleep(Duration::from_millis(10)).await;
        clock.sleep_until(past).await;
    }
}
