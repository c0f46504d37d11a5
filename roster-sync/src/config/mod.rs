//! Engine configuration.
//!
//! [`SyncConfig::default`] carries the reviewed production values. The
//! daemon overrides them from `ROSTER_*` environment variables (and a
//! `.env` file, loaded by [`SyncConfig::from_env`]).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::remote::SessionContext;
use crate::retry::RetryPolicy;
use crate::scheduler::Category;

/// Interval and retry policy of one background category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySchedule {
    /// `None` means the category only runs as a sub-step or on request.
    pub interval_ms: Option<u64>,
    /// `None` means the category makes no remote call of its own.
    pub retry: Option<RetryPolicy>,
}

impl CategorySchedule {
    pub const fn every(interval_ms: u64, retry: RetryPolicy) -> Self {
        Self {
            interval_ms: Some(interval_ms),
            retry: Some(retry),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.unwrap_or_else(RetryPolicy::once)
    }
}

/// Per-category schedule and retry table.
///
/// Presence makes a single attempt; its next interval is the retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTable {
    pub presence: CategorySchedule,
    pub full_refresh: CategorySchedule,
    pub friend_list_sync: CategorySchedule,
    pub request_poll: CategorySchedule,
}

impl Default for ScheduleTable {
    fn default() -> Self {
        Self {
            presence: CategorySchedule::every(20_000, RetryPolicy::once()),
            full_refresh: CategorySchedule {
                interval_ms: Some(60_000),
                retry: None,
            },
            friend_list_sync: CategorySchedule {
                interval_ms: None,
                retry: Some(RetryPolicy::linear(3, 1000)),
            },
            request_poll: CategorySchedule::every(30_000, RetryPolicy::fixed(3, 1000)),
        }
    }
}

impl ScheduleTable {
    pub fn get(&self, category: Category) -> &CategorySchedule {
        match category {
            Category::Presence => &self.presence,
            Category::FullRefresh => &self.full_refresh,
            Category::FriendListSync => &self.friend_list_sync,
            Category::RequestPoll => &self.request_poll,
        }
    }

    fn get_mut(&mut self, category: Category) -> &mut CategorySchedule {
        match category {
            Category::Presence => &mut self.presence,
            Category::FullRefresh => &mut self.full_refresh,
            Category::FriendListSync => &mut self.friend_list_sync,
            Category::RequestPoll => &mut self.request_poll,
        }
    }
}

/// Retry policies of user-initiated writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRetryTable {
    pub remove_friend: RetryPolicy,
    pub preferences: RetryPolicy,
    pub status_flags: RetryPolicy,
}

impl Default for ActionRetryTable {
    fn default() -> Self {
        Self {
            remove_friend: RetryPolicy::fixed(3, 1000),
            preferences: RetryPolicy::linear(3, 1000),
            status_flags: RetryPolicy::fixed(3, 500),
        }
    }
}

/// Quiet periods of the debounce channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    pub preferences_ms: u64,
    pub status_flags_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            preferences_ms: 2000,
            status_flags_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub api_key: Option<String>,
    pub character_name: Option<String>,
    /// Reported to the service on the first heartbeat of a session.
    pub client_version: String,
    pub schedule: ScheduleTable,
    pub actions: ActionRetryTable,
    pub debounce: DebounceConfig,
    /// Default timeout of `wait_for_idle` in the daemon's shutdown path.
    pub idle_timeout_ms: u64,
    pub log_dir: PathBuf,
    pub preferences_path: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_ms: 10_000,
            api_key: None,
            character_name: None,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            schedule: ScheduleTable::default(),
            actions: ActionRetryTable::default(),
            debounce: DebounceConfig::default(),
            idle_timeout_ms: 2000,
            log_dir: PathBuf::from("logs"),
            preferences_path: PathBuf::from("config/preferences.json"),
        }
    }
}

impl SyncConfig {
    /// Load `.env` and apply `ROSTER_*` overrides on top of the defaults.
    ///
    /// Supported env vars:
    /// - `ROSTER_BASE_URL`, `ROSTER_API_KEY`, `ROSTER_CHARACTER`
    /// - `ROSTER_REQUEST_TIMEOUT_MS`, `ROSTER_IDLE_TIMEOUT_MS`
    /// - `ROSTER_PRESENCE_INTERVAL_MS`, `ROSTER_REFRESH_INTERVAL_MS`,
    ///   `ROSTER_REQUEST_POLL_INTERVAL_MS`
    /// - `ROSTER_SYNC_MAX_ATTEMPTS`, `ROSTER_SYNC_RETRY_DELAY_MS`
    /// - `ROSTER_PREFERENCES_DEBOUNCE_MS`, `ROSTER_STATUS_DEBOUNCE_MS`
    /// - `ROSTER_LOG_DIR`, `ROSTER_PREFERENCES_PATH`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = text("ROSTER_BASE_URL") {
            config.base_url = url;
        }
        if let Some(key) = text("ROSTER_API_KEY") {
            config.api_key = Some(key);
        }
        if let Some(name) = text("ROSTER_CHARACTER") {
            config.character_name = Some(name);
        }
        if let Some(dir) = text("ROSTER_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(path) = text("ROSTER_PREFERENCES_PATH") {
            config.preferences_path = PathBuf::from(path);
        }

        let number = |key: &str| -> Result<Option<u64>> {
            text(key)
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|_| Error::config(format!("{} must be a number, got '{}'", key, v)))
                })
                .transpose()
        };

        if let Some(ms) = number("ROSTER_REQUEST_TIMEOUT_MS")? {
            config.request_timeout_ms = ms;
        }
        if let Some(ms) = number("ROSTER_IDLE_TIMEOUT_MS")? {
            config.idle_timeout_ms = ms;
        }
        for (key, category) in [
            ("ROSTER_PRESENCE_INTERVAL_MS", Category::Presence),
            ("ROSTER_REFRESH_INTERVAL_MS", Category::FullRefresh),
            ("ROSTER_REQUEST_POLL_INTERVAL_MS", Category::RequestPoll),
        ] {
            if let Some(ms) = number(key)? {
                config.schedule.get_mut(category).interval_ms = Some(ms);
            }
        }

        let sync = config.schedule.get_mut(Category::FriendListSync);
        let mut sync_retry = sync.retry_policy();
        if let Some(attempts) = number("ROSTER_SYNC_MAX_ATTEMPTS")? {
            sync_retry.max_attempts = u32::try_from(attempts)
                .map_err(|_| Error::config("ROSTER_SYNC_MAX_ATTEMPTS is out of range"))?;
        }
        if let Some(ms) = number("ROSTER_SYNC_RETRY_DELAY_MS")? {
            sync_retry.base_delay_ms = ms;
        }
        sync.retry = Some(sync_retry);

        if let Some(ms) = number("ROSTER_PREFERENCES_DEBOUNCE_MS")? {
            config.debounce.preferences_ms = ms;
        }
        if let Some(ms) = number("ROSTER_STATUS_DEBOUNCE_MS")? {
            config.debounce.status_flags_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("invalid base URL '{}': {}", self.base_url, e)))?;

        if self.request_timeout_ms == 0 {
            return Err(Error::config("request timeout must be positive"));
        }

        for category in Category::ALL {
            let schedule = self.schedule.get(category);
            if schedule.interval_ms == Some(0) {
                return Err(Error::config(format!("{} interval must be positive", category)));
            }
            if schedule.retry.is_some_and(|r| r.max_attempts == 0) {
                return Err(Error::config(format!(
                    "{} retry policy needs at least one attempt",
                    category
                )));
            }
        }

        for (name, policy) in [
            ("remove friend", self.actions.remove_friend),
            ("preferences", self.actions.preferences),
            ("status flags", self.actions.status_flags),
        ] {
            if policy.max_attempts == 0 {
                return Err(Error::config(format!(
                    "{} retry policy needs at least one attempt",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Session from the configured credentials, if both are present.
    pub fn session(&self) -> Option<SessionContext> {
        match (&self.api_key, &self.character_name) {
            (Some(key), Some(name)) => Some(SessionContext::new(key, name)),
            _ => None,
        }
    }
}
