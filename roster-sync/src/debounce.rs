//! Debounced commit channels.
//!
//! A [`DebounceChannel`] coalesces bursts of mutations into one deferred
//! write. Each [`schedule`](DebounceChannel::schedule) call replaces the
//! pending payload and restarts the quiet period; a single worker task per
//! channel sleeps until the quiet period has passed since the last
//! mutation and then hands the most recent payload to the commit function.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::scheduler::{JobGuard, JobTracker};

/// Deferred-write callback. Supplied by the owner of the channel; the
/// channel only decides when to call it.
pub type CommitFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What a call to [`DebounceChannel::schedule`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// No worker was alive; one was started.
    SpawnedWorker,
    /// A worker is alive and will pick up the new payload.
    Coalesced,
    /// Background work is paused; the payload is held until re-armed.
    Deferred,
    /// The channel was stopped; the payload was dropped.
    Stopped,
}

struct ChannelState<T> {
    pending: Option<T>,
    last_mutation_at: Option<Instant>,
    worker_alive: bool,
}

struct Inner<T> {
    name: &'static str,
    quiet_period: Duration,
    state: Mutex<ChannelState<T>>,
    commit: CommitFn<T>,
    jobs: Arc<JobTracker>,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    cancel: CancellationToken,
}

pub struct DebounceChannel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DebounceChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for DebounceChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DebounceChannel")
            .field("name", &self.inner.name)
            .field("quiet_period", &self.inner.quiet_period)
            .field("has_pending", &state.pending.is_some())
            .field("worker_alive", &state.worker_alive)
            .finish()
    }
}

impl<T: Send + 'static> DebounceChannel<T> {
    pub fn new(
        name: &'static str,
        quiet_period: Duration,
        commit: CommitFn<T>,
        jobs: Arc<JobTracker>,
        clock: Arc<dyn Clock>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                quiet_period,
                state: Mutex::new(ChannelState {
                    pending: None,
                    last_mutation_at: None,
                    worker_alive: false,
                }),
                commit,
                jobs,
                clock,
                runtime,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Record `payload` as the latest value and restart the quiet period.
    pub fn schedule(&self, payload: T) -> ScheduleOutcome {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            debug!(channel = inner.name, "Channel stopped, dropping payload");
            return ScheduleOutcome::Stopped;
        }

        let mut state = inner.state.lock();
        state.pending = Some(payload);
        state.last_mutation_at = Some(inner.clock.now());

        if state.worker_alive {
            trace!(channel = inner.name, "Coalesced into live worker");
            return ScheduleOutcome::Coalesced;
        }
        if inner.jobs.is_paused() {
            debug!(channel = inner.name, "Paused, deferring commit");
            return ScheduleOutcome::Deferred;
        }

        state.worker_alive = true;
        drop(state);
        self.spawn_worker();
        ScheduleOutcome::SpawnedWorker
    }

    /// Start a worker for a payload left behind while paused. Returns
    /// `None` when there is nothing to do.
    pub fn rearm(&self) -> Option<ScheduleOutcome> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() || inner.jobs.is_paused() {
            return None;
        }

        let mut state = inner.state.lock();
        if state.pending.is_none() || state.worker_alive {
            return None;
        }
        state.worker_alive = true;
        drop(state);

        debug!(channel = inner.name, "Re-arming deferred commit");
        self.spawn_worker();
        Some(ScheduleOutcome::SpawnedWorker)
    }

    /// Signal the worker to exit without committing. Later schedules are
    /// dropped.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    pub fn is_worker_alive(&self) -> bool {
        self.inner.state.lock().worker_alive
    }

    fn spawn_worker(&self) {
        let job = self.inner.jobs.enter();
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(run_worker(inner, job));
    }
}

async fn run_worker<T: Send + 'static>(inner: Arc<Inner<T>>, _job: JobGuard) {
    trace!(channel = inner.name, "Debounce worker started");

    loop {
        let deadline = {
            let mut state = inner.state.lock();
            match state.last_mutation_at {
                Some(at) => at + inner.quiet_period,
                None => {
                    state.worker_alive = false;
                    return;
                }
            }
        };

        if inner.clock.now() < deadline {
            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    debug!(channel = inner.name, "Debounce worker stopped");
                    inner.state.lock().worker_alive = false;
                    return;
                }
                _ = inner.clock.sleep_until(deadline) => {}
            }
            // A newer mutation may have moved the deadline.
            continue;
        }

        let payload = inner.state.lock().pending.take();
        if let Some(payload) = payload {
            let outcome = AssertUnwindSafe(async { (inner.commit)(payload).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => debug!(channel = inner.name, "Deferred commit written"),
                Ok(Err(e)) => warn!(channel = inner.name, error = %e, "Deferred commit failed"),
                Err(_) => warn!(channel = inner.name, "Deferred commit panicked"),
            }
        }

        let mut state = inner.state.lock();
        if state.pending.is_some() && !inner.cancel.is_cancelled() {
            // Mutated during the commit; wait out a fresh quiet period.
            continue;
        }
        state.worker_alive = false;
        state.last_mutation_at = None;
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::error::Error;

    struct Recorder {
        commits: Mutex<Vec<(u32, Instant)>>,
    }

    fn recording_channel(quiet_ms: u64) -> (DebounceChannel<u32>, Arc<Recorder>, Arc<JobTracker>) {
        let recorder = Arc::new(Recorder {
            commits: Mutex::new(Vec::new()),
        });
        let jobs = Arc::new(JobTracker::new());
        let sink = Arc::clone(&recorder);
        let commit: CommitFn<u32> = Arc::new(move |value| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.commits.lock().push((value, Instant::now()));
                Ok(())
            })
        });
        let channel = DebounceChannel::new(
            "test",
            Duration::from_millis(quiet_ms),
            commit,
            Arc::clone(&jobs),
            Arc::new(TokioClock),
            Handle::current(),
        );
        (channel, recorder, jobs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_commit_with_last_payload() {
        let (channel, recorder, jobs) = recording_channel(1000);

        assert_eq!(channel.schedule(0), ScheduleOutcome::SpawnedWorker);
        for value in 1..5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(channel.schedule(value), ScheduleOutcome::Coalesced);
        }

        assert!(jobs.wait_for_idle(Duration::from_secs(5)).await.is_idle());
        let commits = recorder.commits.lock();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, 4);
        assert!(!channel.is_worker_alive());
        assert!(!channel.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_waits_for_quiet_period_after_last_mutation() {
        let (channel, recorder, jobs) = recording_channel(2000);
        let start = Instant::now();

        channel.schedule(1);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        channel.schedule(2);

        assert!(jobs.wait_for_idle(Duration::from_secs(10)).await.is_idle());
        let commits = recorder.commits.lock();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].1 - start >= Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_defers_until_rearm() {
        let (channel, recorder, jobs) = recording_channel(100);
        jobs.pause();

        assert_eq!(channel.schedule(7), ScheduleOutcome::Deferred);
        assert!(channel.rearm().is_none());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(recorder.commits.lock().is_empty());
        assert!(channel.has_pending());

        jobs.resume();
        assert_eq!(channel.rearm(), Some(ScheduleOutcome::SpawnedWorker));
        assert!(jobs.wait_for_idle(Duration::from_secs(5)).await.is_idle());
        assert_eq!(recorder.commits.lock()[0].0, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_exits_without_commit() {
        let (channel, recorder, jobs) = recording_channel(1000);
        channel.schedule(1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.stop();

        assert!(jobs.wait_for_idle(Duration::from_secs(5)).await.is_idle());
        assert!(recorder.commits.lock().is_empty());
        assert!(!channel.is_worker_alive());
        assert_eq!(channel.schedule(2), ScheduleOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_commit_is_not_retried() {
        let jobs = Arc::new(JobTracker::new());
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let commit: CommitFn<u32> = Arc::new(move |_| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                *counter.lock() += 1;
                Err(Error::Other("disk full".to_string()))
            })
        });
        let channel = DebounceChannel::new(
            "failing",
            Duration::from_millis(100),
            commit,
            Arc::clone(&jobs),
            Arc::new(TokioClock),
            Handle::current(),
        );

        channel.schedule(1);
        assert!(jobs.wait_for_idle(Duration::from_secs(5)).await.is_idle());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*calls.lock(), 1);
        assert!(!channel.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_during_commit_gets_its_own_commit() {
        let jobs = Arc::new(JobTracker::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let commit: CommitFn<u32> = Arc::new(move |value| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                sink.lock().push(value);
                Ok(())
            })
        });
        let channel = DebounceChannel::new(
            "slow",
            Duration::from_millis(100),
            commit,
            Arc::clone(&jobs),
            Arc::new(TokioClock),
            Handle::current(),
        );

        channel.schedule(1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(channel.schedule(2), ScheduleOutcome::Coalesced);

        assert!(jobs.wait_for_idle(Duration::from_secs(5)).await.is_idle());
        assert_eq!(*seen.lock(), vec![1, 2]);
    }
}
