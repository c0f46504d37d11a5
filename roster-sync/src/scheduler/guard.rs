//! Per-category in-flight gate and run bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::Category;

/// How long an acquire waits for the state lock before failing closed.
const ACQUIRE_LOCK_TIMEOUT: Duration = Duration::from_millis(5);

/// Bookkeeping for one operation category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationState {
    pub in_flight: bool,
    pub last_run_at: Option<Instant>,
    pub last_trigger_reason: String,
    pub dispatch_count: u64,
}

/// Externally visible scheduling phase of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the interval to elapse.
    Idle,
    /// Interval elapsed, not yet dispatched.
    Armed,
    /// Worker dispatched and holding the gate.
    Running,
}

/// Result of [`InFlightGuard::try_arm`].
#[derive(Debug)]
pub enum ArmOutcome {
    NotDue,
    AlreadyInFlight,
    Acquired(InFlightPermit),
}

/// Gate preventing two workers of the same category from overlapping.
///
/// Check-and-set happens under one lock, so two racing ticks can never
/// both observe "not in flight". If the lock cannot be taken promptly the
/// acquire fails closed and reports the category as busy.
#[derive(Debug, Default)]
pub struct InFlightGuard {
    states: Mutex<[OperationState; Category::COUNT]>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the category's flag if it was clear. Returns whether this call
    /// performed the false → true transition.
    pub fn try_acquire(&self, category: Category, reason: &str) -> bool {
        let Some(mut states) = self.states.try_lock_for(ACQUIRE_LOCK_TIMEOUT) else {
            debug!(category = %category, "Guard lock contended, treating as in-flight");
            return false;
        };

        let state = &mut states[category.index()];
        if state.in_flight {
            return false;
        }
        state.in_flight = true;
        state.last_trigger_reason = reason.to_string();
        state.dispatch_count += 1;
        true
    }

    /// Clear the category's flag.
    pub fn release(&self, category: Category) {
        self.states.lock()[category.index()].in_flight = false;
        trace!(category = %category, "Released in-flight guard");
    }

    /// Acquire and wrap the flag in a scope-bound permit.
    pub fn try_permit(self: &Arc<Self>, category: Category, reason: &str) -> Option<InFlightPermit> {
        self.try_acquire(category, reason).then(|| InFlightPermit {
            guard: Arc::clone(self),
            category,
        })
    }

    /// Interval check and acquire as one atomic step.
    ///
    /// On success `last_run_at` is stamped with `now` before the worker is
    /// dispatched, so a slow or retried run cannot be re-armed the moment
    /// it finishes. A category that never ran is due immediately.
    pub fn try_arm(
        self: &Arc<Self>,
        category: Category,
        now: Instant,
        interval: Duration,
        reason: &str,
    ) -> ArmOutcome {
        let Some(mut states) = self.states.try_lock_for(ACQUIRE_LOCK_TIMEOUT) else {
            debug!(category = %category, "Guard lock contended, treating as in-flight");
            return ArmOutcome::AlreadyInFlight;
        };

        let state = &mut states[category.index()];
        if !is_due(state, now, interval) {
            return ArmOutcome::NotDue;
        }
        if state.in_flight {
            return ArmOutcome::AlreadyInFlight;
        }

        state.in_flight = true;
        state.last_run_at = Some(now);
        state.last_trigger_reason = reason.to_string();
        state.dispatch_count += 1;

        ArmOutcome::Acquired(InFlightPermit {
            guard: Arc::clone(self),
            category,
        })
    }

    pub fn is_in_flight(&self, category: Category) -> bool {
        self.states.lock()[category.index()].in_flight
    }

    /// Copy of the category's bookkeeping.
    pub fn state(&self, category: Category) -> OperationState {
        self.states.lock()[category.index()].clone()
    }

    /// Phase of `category` at `now`. Categories without an interval are
    /// never armed by time alone.
    pub fn phase(&self, category: Category, now: Instant, interval: Option<Duration>) -> Phase {
        let states = self.states.lock();
        let state = &states[category.index()];
        if state.in_flight {
            Phase::Running
        } else if interval.is_some_and(|interval| is_due(state, now, interval)) {
            Phase::Armed
        } else {
            Phase::Idle
        }
    }
}

fn is_due(state: &OperationState, now: Instant, interval: Duration) -> bool {
    state
        .last_run_at
        .is_none_or(|last| now.saturating_duration_since(last) >= interval)
}

/// Holds a category's in-flight flag; releases it exactly once on drop,
/// whichever way the owning worker exits.
pub struct InFlightPermit {
    guard: Arc<InFlightGuard>,
    category: Category,
}

impl InFlightPermit {
    pub fn category(&self) -> Category {
        self.category
    }
}

impl std::fmt::Debug for InFlightPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightPermit")
            .field("category", &self.category)
            .finish()
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.guard.release(self.category);
    }
}
