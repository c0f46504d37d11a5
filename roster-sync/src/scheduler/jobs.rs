//! Background job accounting with pause/resume and idle waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

/// Result of [`JobTracker::wait_for_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Idle,
    TimedOut { active: usize },
}

impl IdleState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Counts outstanding background jobs.
///
/// Every spawned worker holds a [`JobGuard`]; the count drops when the
/// guard does, so a worker that errors or panics still decrements.
#[derive(Debug)]
pub struct JobTracker {
    active: watch::Sender<usize>,
    paused: AtomicBool,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            active,
            paused: AtomicBool::new(false),
        }
    }

    /// Register a job. The returned guard must live as long as the job.
    pub fn enter(self: &Arc<Self>) -> JobGuard {
        self.active.send_modify(|count| *count += 1);
        JobGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn active_jobs(&self) -> usize {
        *self.active.borrow()
    }

    /// Stop new jobs from starting. Running jobs are not interrupted.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!(active = self.active_jobs(), "Background work paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Background work resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Wait until no jobs are active or `timeout` elapses.
    pub async fn wait_for_idle(&self, timeout: Duration) -> IdleState {
        let mut rx = self.active.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|count| *count == 0)).await {
            Ok(_) => IdleState::Idle,
            Err(_) => {
                let active = self.active_jobs();
                debug!(active, ?timeout, "Timed out waiting for background jobs");
                IdleState::TimedOut { active }
            }
        }
    }
}

/// Decrements the tracker's count on drop.
#[derive(Debug)]
pub struct JobGuard {
    tracker: Arc<JobTracker>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.tracker
            .active
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}
