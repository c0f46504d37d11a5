//! The sync engine and its shared worker context.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use roster_core::{ChangeDetector, FriendIdentity, RequestTracker, RosterView};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::guard::{ArmOutcome, InFlightGuard, InFlightPermit, OperationState, Phase};
use super::jobs::{IdleState, JobTracker};
use super::workers::HeartbeatCursors;
use super::{Category, Dispatch, SkipReason, TickReport};
use crate::cache::RosterCache;
use crate::clock::{Clock, TokioClock};
use crate::config::SyncConfig;
use crate::debounce::{CommitFn, DebounceChannel, ScheduleOutcome};
use crate::error::{Error, Result};
use crate::logging::DebugModeHook;
use crate::notification::{NotificationSink, RosterSink};
use crate::panic_hook::panic_message;
use crate::preferences::{Preferences, PreferencesStore, StatusFlags};
use crate::remote::{RemoteClient, SessionContext, WireDecoder};
use crate::retry::RetryExecutor;

/// External collaborators of the engine.
pub struct EngineDeps {
    pub remote: Arc<dyn RemoteClient>,
    pub decoder: Arc<dyn WireDecoder>,
    pub roster_sink: Arc<dyn RosterSink>,
    pub notifications: Arc<dyn NotificationSink>,
    pub preferences_store: Arc<dyn PreferencesStore>,
    pub clock: Arc<dyn Clock>,
    /// Called with the committed `debug_mode` flag.
    pub debug_hook: Option<DebugModeHook>,
}

impl EngineDeps {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        decoder: Arc<dyn WireDecoder>,
        roster_sink: Arc<dyn RosterSink>,
        notifications: Arc<dyn NotificationSink>,
        preferences_store: Arc<dyn PreferencesStore>,
    ) -> Self {
        Self {
            remote,
            decoder,
            roster_sink,
            notifications,
            preferences_store,
            clock: Arc::new(TokioClock),
            debug_hook: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_debug_hook(mut self, hook: DebugModeHook) -> Self {
        self.debug_hook = Some(hook);
        self
    }
}

/// User-initiated operations. Only these surface failures to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserAction {
    Refresh,
    SyncFriendList,
    RemoveFriend,
    UpdatePreferences,
    UpdateStatusFlags,
}

impl UserAction {
    pub fn label(self) -> &'static str {
        match self {
            UserAction::Refresh => "Refresh",
            UserAction::SyncFriendList => "Friend list sync",
            UserAction::RemoveFriend => "Remove friend",
            UserAction::UpdatePreferences => "Save preferences",
            UserAction::UpdateStatusFlags => "Update status",
        }
    }
}

/// Result of the most recent run of a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub finished_at: Instant,
}

/// Report a worker sends back to the driver.
#[derive(Debug)]
pub(super) struct Completion {
    category: Option<Category>,
    action: Option<UserAction>,
    outcome: LastOutcome,
}

/// State shared by the driver and every worker task.
pub(super) struct EngineContext {
    pub(super) config: SyncConfig,
    pub(super) deps: EngineDeps,
    pub(super) retry: RetryExecutor,
    pub(super) guard: Arc<InFlightGuard>,
    pub(super) jobs: Arc<JobTracker>,
    pub(super) cache: RosterCache,
    pub(super) session: RwLock<Option<SessionContext>>,
    /// Bumped on every session change, under the session write lock;
    /// workers drop results from an older epoch.
    pub(super) session_epoch: AtomicU64,
    pub(super) cursors: Mutex<HeartbeatCursors>,
    pub(super) detector: Mutex<ChangeDetector>,
    pub(super) request_tracker: Mutex<RequestTracker>,
    pub(super) preferences: RwLock<Preferences>,
    completions: mpsc::UnboundedSender<Completion>,
    runtime: Handle,
}

impl EngineContext {
    fn has_session(&self) -> bool {
        self.session.read().is_some()
    }

    fn reset_session_state(&self) {
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
        self.detector.lock().reset();
        self.request_tracker.lock().reset();
        *self.cursors.lock() = HeartbeatCursors::default();
    }

    /// Run `work` on its own task, holding a job guard and (optionally) a
    /// category permit until the completion has been reported.
    pub(super) fn spawn_job<F>(
        self: &Arc<Self>,
        category: Option<Category>,
        action: Option<UserAction>,
        permit: Option<InFlightPermit>,
        work: F,
    ) where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let job = self.jobs.enter();
        let ctx = Arc::clone(self);

        self.runtime.spawn(async move {
            let result = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(Error::Other(format!(
                    "worker panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };
            ctx.report(category, action, &result);
            drop(permit);
            drop(job);
        });
    }

    pub(super) fn spawn_category(
        self: &Arc<Self>,
        category: Category,
        action: Option<UserAction>,
        permit: InFlightPermit,
    ) {
        let ctx = Arc::clone(self);
        let work = async move {
            match category {
                Category::Presence => ctx.run_presence().await,
                Category::FullRefresh => ctx.run_full_refresh().await,
                Category::FriendListSync => ctx.run_friend_list_sync().await,
                Category::RequestPoll => ctx.run_request_poll().await,
            }
        };
        self.spawn_job(Some(category), action, Some(permit), work);
    }

    /// Log a finished run, surface user-action failures and queue the
    /// completion for the next tick.
    pub(super) fn report(
        &self,
        category: Option<Category>,
        action: Option<UserAction>,
        result: &Result<()>,
    ) {
        let error = result.as_ref().err().map(ToString::to_string);

        match (&error, action) {
            (Some(e), Some(action)) => {
                error!(action = action.label(), error = %e, "User action failed");
                self.deps.notifications.action_failed(action.label(), e);
            }
            (Some(e), None) => {
                let category = category.map(Category::as_str).unwrap_or("background");
                warn!(category, error = %e, "Background operation failed, retrying next interval");
            }
            (None, _) => {
                debug!(category = ?category, action = ?action, "Operation finished");
            }
        }

        let completion = Completion {
            category,
            action,
            outcome: LastOutcome {
                success: error.is_none(),
                error,
                finished_at: self.deps.clock.now(),
            },
        };
        // Fails only once the engine is gone.
        let _ = self.completions.send(completion);
    }

    fn preferences_commit(self: &Arc<Self>) -> CommitFn<Preferences> {
        let ctx = Arc::clone(self);
        Arc::new(move |preferences| {
            let ctx = Arc::clone(&ctx);
            Box::pin(async move {
                let result = ctx.commit_preferences(&preferences).await;
                ctx.report(None, Some(UserAction::UpdatePreferences), &result);
                result
            })
        })
    }

    fn status_flags_commit(self: &Arc<Self>) -> CommitFn<StatusFlags> {
        let ctx = Arc::clone(self);
        Arc::new(move |flags| {
            let ctx = Arc::clone(&ctx);
            Box::pin(async move {
                let result = ctx.commit_status_flags(flags).await;
                ctx.report(None, Some(UserAction::UpdateStatusFlags), &result);
                result
            })
        })
    }
}

/// Background orchestration engine for the friend roster.
///
/// Construct one per local character session host. The host calls
/// [`tick`](Self::tick) from its own loop; user actions may be called from
/// any thread.
pub struct SyncEngine {
    ctx: Arc<EngineContext>,
    completions: Mutex<mpsc::UnboundedReceiver<Completion>>,
    outcomes: Mutex<[Option<LastOutcome>; Category::COUNT]>,
    error_slot: Mutex<Option<String>>,
    preferences: DebounceChannel<Preferences>,
    status_flags: DebounceChannel<StatusFlags>,
    shutdown: CancellationToken,
}

impl SyncEngine {
    /// Create an engine bound to the current tokio runtime.
    pub fn new(config: SyncConfig, deps: EngineDeps) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::config("SyncEngine must be created inside a tokio runtime"))?;
        Self::with_runtime(config, deps, runtime)
    }

    /// Create an engine whose workers run on `runtime`. `tick` may then be
    /// called from threads outside the runtime.
    pub fn with_runtime(config: SyncConfig, deps: EngineDeps, runtime: Handle) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let jobs = Arc::new(JobTracker::new());
        let session = config.session();
        let preferences_quiet = Duration::from_millis(config.debounce.preferences_ms);
        let status_quiet = Duration::from_millis(config.debounce.status_flags_ms);
        let clock = Arc::clone(&deps.clock);

        let ctx = Arc::new(EngineContext {
            retry: RetryExecutor::new(Arc::clone(&clock)),
            guard: Arc::new(InFlightGuard::new()),
            jobs: Arc::clone(&jobs),
            cache: RosterCache::new(),
            session: RwLock::new(session),
            session_epoch: AtomicU64::new(0),
            cursors: Mutex::new(HeartbeatCursors::default()),
            detector: Mutex::new(ChangeDetector::new()),
            request_tracker: Mutex::new(RequestTracker::new()),
            preferences: RwLock::new(Preferences::default()),
            completions: tx,
            runtime: runtime.clone(),
            config,
            deps,
        });

        let preferences = DebounceChannel::new(
            "preferences",
            preferences_quiet,
            ctx.preferences_commit(),
            Arc::clone(&jobs),
            Arc::clone(&clock),
            runtime.clone(),
        );
        let status_flags = DebounceChannel::new(
            "status_flags",
            status_quiet,
            ctx.status_flags_commit(),
            jobs,
            clock,
            runtime,
        );

        Ok(Self {
            ctx,
            completions: Mutex::new(rx),
            outcomes: Mutex::new(Default::default()),
            error_slot: Mutex::new(None),
            preferences,
            status_flags,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.ctx.config
    }

    /// Drive the scheduler once. Never blocks and never fails.
    ///
    /// Drains finished-worker reports, then dispatches every interval-driven
    /// category whose interval has elapsed since its last dispatch.
    pub fn tick(&self, now: Instant) -> TickReport {
        let completions = self.drain_completions();
        let mut decisions = Vec::with_capacity(Category::COUNT);

        for category in Category::ALL {
            let Some(interval) = self.ctx.config.schedule.get(category).interval() else {
                continue;
            };
            decisions.push((category, self.dispatch_scheduled(category, now, interval)));
        }

        TickReport {
            completions,
            decisions,
        }
    }

    fn gate(&self) -> Option<SkipReason> {
        if self.shutdown.is_cancelled() {
            Some(SkipReason::ShutDown)
        } else if !self.ctx.has_session() {
            Some(SkipReason::NoSession)
        } else if self.ctx.jobs.is_paused() {
            Some(SkipReason::Paused)
        } else {
            None
        }
    }

    fn dispatch_scheduled(&self, category: Category, now: Instant, interval: Duration) -> Dispatch {
        if let Some(reason) = self.gate() {
            return Dispatch::Skipped(reason);
        }

        match self.ctx.guard.try_arm(category, now, interval, "interval") {
            ArmOutcome::NotDue => Dispatch::NotDue,
            ArmOutcome::AlreadyInFlight => {
                debug!(category = %category, "Already in flight, skipping");
                Dispatch::Skipped(SkipReason::AlreadyInFlight)
            }
            ArmOutcome::Acquired(permit) => {
                debug!(category = %category, "Dispatching");
                self.ctx.spawn_category(category, None, permit);
                Dispatch::Spawned
            }
        }
    }

    fn drain_completions(&self) -> usize {
        let mut rx = self.completions.lock();
        let mut drained = 0;

        while let Ok(completion) = rx.try_recv() {
            drained += 1;
            if let (Some(action), Some(error)) = (completion.action, &completion.outcome.error) {
                *self.error_slot.lock() = Some(format!("{} failed: {}", action.label(), error));
            }
            if let Some(category) = completion.category {
                self.outcomes.lock()[category.index()] = Some(completion.outcome);
            }
        }

        drained
    }

    // ---- session ----

    /// Start syncing for `session`. Change detection and event cursors
    /// start over; the first observation of the new session only seeds.
    pub fn set_session(&self, session: SessionContext) -> Result<()> {
        if !session.is_complete() {
            return Err(Error::config(
                "session requires an API key and a character name",
            ));
        }

        info!(character = %session.character_name, "Session established");
        let mut slot = self.ctx.session.write();
        self.ctx.reset_session_state();
        *slot = Some(session);
        Ok(())
    }

    /// Stop syncing and forget all cached state.
    pub fn clear_session(&self) {
        {
            let mut slot = self.ctx.session.write();
            self.ctx.reset_session_state();
            *slot = None;
        }
        self.ctx.cache.clear();
        self.ctx.deps.roster_sink.publish(RosterView::default());
        info!("Session cleared");
    }

    pub fn session(&self) -> Option<SessionContext> {
        self.ctx.session.read().clone()
    }

    // ---- user actions ----

    /// Full refresh outside the schedule. Shares the scheduled refresh's
    /// guard, so it never overlaps a running one.
    pub fn refresh_now(&self, reason: &str) -> Dispatch {
        if let Some(reason) = self.gate() {
            return Dispatch::Skipped(reason);
        }

        let now = self.ctx.deps.clock.now();
        match self
            .ctx
            .guard
            .try_arm(Category::FullRefresh, now, Duration::ZERO, reason)
        {
            ArmOutcome::Acquired(permit) => {
                info!(reason, "Manual refresh requested");
                self.ctx
                    .spawn_category(Category::FullRefresh, Some(UserAction::Refresh), permit);
                Dispatch::Spawned
            }
            _ => {
                debug!(reason, "Refresh already in flight, skipping");
                Dispatch::Skipped(SkipReason::AlreadyInFlight)
            }
        }
    }

    /// Authoritative roster download outside the schedule.
    pub fn request_friend_list_sync(&self, reason: &str) -> Dispatch {
        if let Some(reason) = self.gate() {
            return Dispatch::Skipped(reason);
        }

        match self.ctx.guard.try_permit(Category::FriendListSync, reason) {
            Some(permit) => {
                self.ctx.spawn_category(
                    Category::FriendListSync,
                    Some(UserAction::SyncFriendList),
                    permit,
                );
                Dispatch::Spawned
            }
            None => {
                debug!(reason, "Friend list sync already in flight, skipping");
                Dispatch::Skipped(SkipReason::AlreadyInFlight)
            }
        }
    }

    /// Remove a friend remotely. A 404 counts as already removed. A roster
    /// sync follows a successful removal.
    pub fn remove_friend(&self, name: &str) -> Result<Dispatch> {
        FriendIdentity::new(name)?;
        if let Some(reason) = self.gate() {
            return Ok(Dispatch::Skipped(reason));
        }

        let ctx = Arc::clone(&self.ctx);
        let name = name.trim().to_string();
        self.ctx.spawn_job(None, Some(UserAction::RemoveFriend), None, async move {
            ctx.run_remove_friend(&name).await
        });
        Ok(Dispatch::Spawned)
    }

    /// Record new preferences. They are written locally and remotely once
    /// no further change has arrived for the preferences quiet period.
    pub fn update_preferences(&self, preferences: Preferences) -> ScheduleOutcome {
        *self.ctx.preferences.write() = preferences.clone();
        self.preferences.schedule(preferences)
    }

    /// Record new privacy flags; rapid toggles coalesce into one write.
    pub fn update_status_flags(&self, flags: StatusFlags) -> ScheduleOutcome {
        self.status_flags.schedule(flags)
    }

    pub fn preferences(&self) -> Preferences {
        self.ctx.preferences.read().clone()
    }

    /// Load persisted preferences and apply their debug mode.
    pub async fn load_preferences(&self) -> Result<Preferences> {
        let loaded = self
            .ctx
            .deps
            .preferences_store
            .load()
            .await?
            .unwrap_or_default();

        if let Some(hook) = &self.ctx.deps.debug_hook {
            hook(loaded.debug_mode);
        }
        *self.ctx.preferences.write() = loaded.clone();
        Ok(loaded)
    }

    // ---- lifecycle ----

    /// Refuse new background work. Running workers finish normally.
    pub fn pause(&self) {
        self.ctx.jobs.pause();
    }

    /// Allow new work again and restart commits deferred while paused.
    pub fn resume(&self) {
        self.ctx.jobs.resume();
        self.preferences.rearm();
        self.status_flags.rearm();
    }

    pub fn is_paused(&self) -> bool {
        self.ctx.jobs.is_paused()
    }

    /// Wait until no background job is running or `timeout` elapses.
    pub async fn wait_for_idle(&self, timeout: Duration) -> IdleState {
        self.ctx.jobs.wait_for_idle(timeout).await
    }

    /// Stop scheduling and signal debounce workers to exit. Pending
    /// debounced writes are dropped.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.preferences.stop();
        self.status_flags.stop();
        info!(active = self.ctx.jobs.active_jobs(), "Sync engine shutting down");
    }

    // ---- queries ----

    /// Point-in-time copy of the cached roster.
    pub fn view(&self) -> RosterView {
        self.ctx.cache.view()
    }

    /// Take the most recent user-action failure, if any.
    pub fn take_error(&self) -> Option<String> {
        self.error_slot.lock().take()
    }

    pub fn last_outcome(&self, category: Category) -> Option<LastOutcome> {
        self.outcomes.lock()[category.index()].clone()
    }

    pub fn operation_state(&self, category: Category) -> OperationState {
        self.ctx.guard.state(category)
    }

    pub fn phase(&self, category: Category, now: Instant) -> Phase {
        let interval = self.ctx.config.schedule.get(category).interval();
        self.ctx.guard.phase(category, now, interval)
    }

    pub fn active_jobs(&self) -> usize {
        self.ctx.jobs.active_jobs()
    }

    pub fn has_pending_commits(&self) -> bool {
        self.preferences.has_pending() || self.status_flags.has_pending()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.preferences.stop();
        self.status_flags.stop();
    }
}
