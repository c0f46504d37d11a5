//! Worker bodies.
//!
//! Every function here runs on a spawned task. Failures are returned as
//! [`Error`] values and reported by the task wrapper; nothing propagates
//! back into `tick`.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use roster_core::{FriendRequest, StatusTable};
use tracing::{debug, info, warn};

use super::Category;
use super::engine::EngineContext;
use super::guard::ArmOutcome;
use crate::error::{Error, Result};
use crate::preferences::{Preferences, StatusFlags};
use crate::remote::{Endpoint, HeartbeatRequest, RemoteRequest, RemoteResponse, SessionContext};
use crate::retry::RetryPolicy;

/// Event cursors echoed back to the service on every heartbeat.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(super) struct HeartbeatCursors {
    pub(super) last_event_timestamp: u64,
    pub(super) last_request_event_timestamp: u64,
    /// The client version is reported once per session.
    pub(super) version_reported: bool,
}

fn ensure_success(operation: &str, response: RemoteResponse) -> Result<RemoteResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(Error::from_response(operation, &response))
    }
}

impl EngineContext {
    fn current_session(&self) -> Result<(SessionContext, u64)> {
        let slot = self.session.read();
        let epoch = self.session_epoch.load(Ordering::SeqCst);
        let session = slot.clone().ok_or(Error::NoSession)?;
        Ok((session, epoch))
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.session_epoch.load(Ordering::SeqCst) == epoch
    }

    fn policy(&self, category: Category) -> RetryPolicy {
        self.config.schedule.get(category).retry_policy()
    }

    /// One remote call under `policy`. Always yields a response.
    async fn call(
        &self,
        endpoint: Endpoint,
        session: SessionContext,
        body: Option<String>,
        policy: &RetryPolicy,
    ) -> RemoteResponse {
        let request = RemoteRequest {
            endpoint,
            session,
            body,
        };
        let remote = self.deps.remote.as_ref();
        let request = &request;
        self.retry
            .execute(request.endpoint.name(), policy, move || remote.call(request))
            .await
    }

    fn publish(&self) {
        self.deps.roster_sink.publish(self.cache.view());
    }

    /// Diff `table` against the previous observation. The first
    /// observation of a session only seeds, and seeding waits for the
    /// first non-empty roster so a partial heartbeat cannot seed it.
    fn announce_transitions(&self, table: &StatusTable) {
        let transitions = {
            let mut detector = self.detector.lock();
            if !detector.is_seeded() && !self.cache.has_roster() {
                debug!("No roster cached yet, deferring change detection");
                return;
            }
            detector.detect_table(table)
        };
        if transitions.is_empty() {
            return;
        }

        let notify = self.preferences.read().notify_on_online;
        for transition in &transitions {
            info!(
                identity = %transition.identity,
                kind = %transition.kind,
                "Friend status changed"
            );
            if notify {
                self.deps.notifications.notify(transition);
            }
        }
    }

    fn announce_requests(&self, fresh: &[FriendRequest]) {
        let notify = self.preferences.read().notify_on_request;
        for request in fresh {
            info!(from = %request.from_character_name, "New friend request");
            if notify {
                self.deps.notifications.request_received(request);
            }
        }
    }

    /// Claim `category` as a sub-step of a running job, stamping its last
    /// run so the independent schedule does not repeat it right away.
    async fn run_sub_step(self: &Arc<Self>, category: Category, reason: &str) -> Result<()> {
        let now = self.deps.clock.now();
        let permit = match self.guard.try_arm(category, now, Duration::ZERO, reason) {
            ArmOutcome::Acquired(permit) => permit,
            _ => {
                debug!(category = %category, reason, "Sub-step already in flight, skipping");
                return Ok(());
            }
        };

        let result = match category {
            Category::FriendListSync => self.run_friend_list_sync().await,
            Category::RequestPoll => self.run_request_poll().await,
            Category::Presence | Category::FullRefresh => Err(Error::Other(format!(
                "{} cannot run as a sub-step",
                category
            ))),
        };
        self.report(Some(category), None, &result);
        drop(permit);
        result
    }

    /// Incremental heartbeat: merge the sparse delta, detect transitions,
    /// advance cursors. A moved request cursor triggers a request poll.
    pub(super) async fn run_presence(self: &Arc<Self>) -> Result<()> {
        let (session, epoch) = self.current_session()?;

        let request = {
            let cursors = self.cursors.lock();
            HeartbeatRequest {
                character_name: session.character_name.clone(),
                last_event_timestamp: cursors.last_event_timestamp,
                last_request_event_timestamp: cursors.last_request_event_timestamp,
                client_version: (!cursors.version_reported)
                    .then(|| self.config.client_version.clone()),
            }
        };
        let body = serde_json::to_string(&request)?;

        let response = self
            .call(
                Endpoint::Heartbeat,
                session,
                Some(body),
                &self.policy(Category::Presence),
            )
            .await;
        let response = ensure_success(Endpoint::Heartbeat.name(), response)?;
        let delta = self.deps.decoder.decode_heartbeat(&response.body)?;

        if !self.is_current(epoch) {
            debug!("Session changed during heartbeat, discarding result");
            return Ok(());
        }

        let request_events_moved = {
            let mut cursors = self.cursors.lock();
            let moved = cursors.last_request_event_timestamp != 0
                && delta.last_request_event_timestamp > cursors.last_request_event_timestamp;
            cursors.last_event_timestamp =
                cursors.last_event_timestamp.max(delta.last_event_timestamp);
            cursors.last_request_event_timestamp = cursors
                .last_request_event_timestamp
                .max(delta.last_request_event_timestamp);
            cursors.version_reported = true;
            moved
        };

        if delta.is_outdated {
            warn!(
                latest = delta.latest_version.as_deref().unwrap_or("unknown"),
                current = %self.config.client_version,
                "A newer client version is available"
            );
        }

        let (stats, table) = self.cache.merge_delta(&delta.statuses);
        debug!(
            updated = stats.updated,
            inserted = stats.inserted,
            skipped = stats.skipped,
            "Merged presence delta"
        );
        self.announce_transitions(&table);
        self.publish();

        if request_events_moved {
            // Reported separately; a failed poll does not fail the heartbeat.
            let _ = self
                .run_sub_step(Category::RequestPoll, "request event")
                .await;
        }

        Ok(())
    }

    /// Authoritative roster download.
    pub(super) async fn run_friend_list_sync(self: &Arc<Self>) -> Result<()> {
        let (session, epoch) = self.current_session()?;

        let response = self
            .call(
                Endpoint::FriendList,
                session,
                None,
                &self.policy(Category::FriendListSync),
            )
            .await;
        let response = ensure_success(Endpoint::FriendList.name(), response)?;
        let snapshot = self.deps.decoder.decode_friend_list(&response.body)?;

        if !self.is_current(epoch) {
            debug!("Session changed during friend list sync, discarding result");
            return Ok(());
        }

        let table = self.cache.replace_roster(snapshot.friends, snapshot.statuses);
        info!(friends = table.len(), "Friend list synced");
        self.announce_transitions(&table);
        self.publish();
        Ok(())
    }

    /// Pending request download with new-incoming detection.
    pub(super) async fn run_request_poll(self: &Arc<Self>) -> Result<()> {
        let (session, epoch) = self.current_session()?;

        let response = self
            .call(
                Endpoint::FriendRequests,
                session,
                None,
                &self.policy(Category::RequestPoll),
            )
            .await;
        let response = ensure_success(Endpoint::FriendRequests.name(), response)?;
        let list = self.deps.decoder.decode_requests(&response.body)?;

        if !self.is_current(epoch) {
            debug!("Session changed during request poll, discarding result");
            return Ok(());
        }

        let all: Vec<FriendRequest> = list.all().cloned().collect();
        let fresh = self.request_tracker.lock().observe(&all);
        debug!(
            incoming = list.incoming.len(),
            outgoing = list.outgoing.len(),
            fresh = fresh.len(),
            "Friend requests polled"
        );

        self.cache.replace_requests(list.incoming, list.outgoing);
        self.announce_requests(&fresh);
        self.publish();
        Ok(())
    }

    /// Roster sync then request poll, each under its own category guard.
    pub(super) async fn run_full_refresh(self: &Arc<Self>) -> Result<()> {
        let sync = self
            .run_sub_step(Category::FriendListSync, "full refresh")
            .await;
        let poll = self.run_sub_step(Category::RequestPoll, "full refresh").await;
        sync.and(poll)
    }

    pub(super) async fn run_remove_friend(self: &Arc<Self>, name: &str) -> Result<()> {
        let (session, epoch) = self.current_session()?;
        let endpoint = Endpoint::RemoveFriend(name.to_string());

        let response = self
            .call(
                endpoint.clone(),
                session,
                None,
                &self.config.actions.remove_friend,
            )
            .await;
        if response.is_not_found() {
            info!(friend = name, "Friend already removed on the server");
        } else {
            ensure_success(endpoint.name(), response)?;
        }

        if !self.is_current(epoch) {
            return Ok(());
        }

        self.cache.remove_friend(name);
        self.publish();
        info!(friend = name, "Friend removed");

        // Reported on its own; the removal itself already succeeded.
        let _ = self
            .run_sub_step(Category::FriendListSync, "friend removed")
            .await;
        Ok(())
    }

    /// Deferred preference write: local store first, then the service.
    pub(super) async fn commit_preferences(&self, preferences: &Preferences) -> Result<()> {
        self.deps.preferences_store.save(preferences).await?;
        if let Some(hook) = &self.deps.debug_hook {
            hook(preferences.debug_mode);
        }

        let Ok((session, _)) = self.current_session() else {
            debug!("No session, preferences saved locally only");
            return Ok(());
        };

        // debug_mode stays local.
        let remote = Preferences {
            debug_mode: false,
            ..preferences.clone()
        };
        let body = serde_json::to_string(&remote)?;
        let response = self
            .call(
                Endpoint::Preferences,
                session,
                Some(body),
                &self.config.actions.preferences,
            )
            .await;
        ensure_success(Endpoint::Preferences.name(), response)?;
        info!("Preferences saved");
        Ok(())
    }

    /// Deferred privacy-flag write.
    pub(super) async fn commit_status_flags(&self, flags: StatusFlags) -> Result<()> {
        let (session, _) = self.current_session()?;
        let body = serde_json::to_string(&flags)?;
        let response = self
            .call(
                Endpoint::StatusFlags,
                session,
                Some(body),
                &self.config.actions.status_flags,
            )
            .await;
        ensure_success(Endpoint::StatusFlags.name(), response)?;
        info!(
            show_online = flags.show_online_status,
            share_location = flags.share_location,
            "Status flags updated"
        );
        Ok(())
    }
}
