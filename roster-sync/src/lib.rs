//! roster-sync library crate.
//!
//! Keeps a locally cached friend roster, per-friend presence and pending
//! friend requests in sync with a remote service. The host drives the
//! engine by calling [`SyncEngine::tick`] from its own loop; all I/O runs
//! on spawned worker tasks.

pub mod cache;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod error;
pub mod logging;
pub mod notification;
pub mod panic_hook;
pub mod preferences;
pub mod remote;
pub mod retry;
pub mod scheduler;

pub use clock::{Clock, TokioClock};
pub use config::SyncConfig;
pub use debounce::{DebounceChannel, ScheduleOutcome};
pub use error::{Error, Result};
pub use notification::{NotificationSink, RosterSink, SyncEvent, SyncEventBroadcaster};
pub use preferences::{Preferences, PreferencesStore, StatusFlags};
pub use retry::{RetryExecutor, RetryPolicy};
pub use scheduler::{
    Category, Dispatch, EngineDeps, IdleState, InFlightGuard, JobTracker, LastOutcome, Phase,
    SkipReason, SyncEngine, TickReport, UserAction,
};
