//! Background orchestration.
//!
//! The [`SyncEngine`] is driven by the host calling [`SyncEngine::tick`] on
//! its own cadence. Each tick drains finished-worker reports, then walks the
//! fixed set of [`Category`] values and dispatches the ones whose interval
//! has elapsed, subject to:
//! - an active session
//! - the [`JobTracker`] pause flag
//! - the per-category [`InFlightGuard`]
//!
//! All I/O runs on spawned worker tasks; `tick` itself never blocks.

mod engine;
mod guard;
mod jobs;
mod workers;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use engine::{EngineDeps, LastOutcome, SyncEngine, UserAction};
pub use guard::{ArmOutcome, InFlightGuard, InFlightPermit, OperationState, Phase};
pub use jobs::{IdleState, JobGuard, JobTracker};

/// Recurring background operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Incremental heartbeat carrying a sparse status delta.
    Presence,
    /// Roster sync followed by a request poll.
    FullRefresh,
    /// Authoritative roster download.
    FriendListSync,
    /// Pending friend requests.
    RequestPoll,
}

impl Category {
    pub const COUNT: usize = 4;

    pub const ALL: [Category; Self::COUNT] = [
        Category::Presence,
        Category::FullRefresh,
        Category::FriendListSync,
        Category::RequestPoll,
    ];

    pub const fn index(self) -> usize {
        match self {
            Category::Presence => 0,
            Category::FullRefresh => 1,
            Category::FriendListSync => 2,
            Category::RequestPoll => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Presence => "presence",
            Category::FullRefresh => "full_refresh",
            Category::FriendListSync => "friend_list_sync",
            Category::RequestPoll => "request_poll",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a dispatch did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A worker of the same category is still running.
    AlreadyInFlight,
    /// Background work is paused.
    Paused,
    /// No session has been established.
    NoSession,
    /// The engine was shut down.
    ShutDown,
}

/// Per-category decision of one tick or user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Spawned,
    NotDue,
    Skipped(SkipReason),
}

impl Dispatch {
    pub fn is_spawned(&self) -> bool {
        matches!(self, Dispatch::Spawned)
    }
}

/// What a call to [`SyncEngine::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Worker reports drained at the start of the tick.
    pub completions: usize,
    /// Decision for every category that has an interval.
    pub decisions: Vec<(Category, Dispatch)>,
}

impl TickReport {
    pub fn decision(&self, category: Category) -> Option<Dispatch> {
        self.decisions
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, d)| *d)
    }

    pub fn dispatched(&self) -> impl Iterator<Item = Category> + '_ {
        self.decisions
            .iter()
            .filter(|(_, d)| d.is_spawned())
            .map(|(c, _)| *c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_indices_are_dense() {
        for (i, category) in Category::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
        assert_eq!(Category::FriendListSync.to_string(), "friend_list_sync");
    }

    #[test]
    fn test_tick_report_queries() {
        let report = TickReport {
            completions: 0,
            decisions: vec![
                (Category::Presence, Dispatch::Spawned),
                (Category::FullRefresh, Dispatch::Skipped(SkipReason::AlreadyInFlight)),
                (Category::RequestPoll, Dispatch::NotDue),
            ],
        };
        assert_eq!(report.dispatched().collect::<Vec<_>>(), vec![Category::Presence]);
        assert_eq!(
            report.decision(Category::FullRefresh),
            Some(Dispatch::Skipped(SkipReason::AlreadyInFlight))
        );
        assert_eq!(report.decision(Category::FriendListSync), None);
    }
}
