//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use roster_core::{FriendRequest, RosterView, StatusTransition};
use roster_sync::config::CategorySchedule;
use roster_sync::remote::{
    JsonWireDecoder, RemoteClient, RemoteError, RemoteRequest, RemoteResponse, SessionContext,
};
use roster_sync::{
    EngineDeps, NotificationSink, Preferences, PreferencesStore, Result, RetryPolicy, RosterSink,
    SyncConfig, SyncEngine,
};
use serde_json::{Value, json};

/// In-memory remote with per-endpoint scripted responses.
///
/// Endpoints are keyed by [`Endpoint::name`](roster_sync::remote::Endpoint::name).
/// Scripted responses are consumed in order; once exhausted the endpoint's
/// default is returned, or HTTP 500 if none was set.
#[derive(Default)]
pub struct ScriptedRemote {
    scripts: Mutex<HashMap<&'static str, VecDeque<std::result::Result<RemoteResponse, RemoteError>>>>,
    defaults: Mutex<HashMap<&'static str, RemoteResponse>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    calls: Mutex<Vec<RemoteRequest>>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, endpoint: &'static str, response: RemoteResponse) {
        self.scripts
            .lock()
            .entry(endpoint)
            .or_default()
            .push_back(Ok(response));
    }

    pub fn push_error(&self, endpoint: &'static str, error: RemoteError) {
        self.scripts
            .lock()
            .entry(endpoint)
            .or_default()
            .push_back(Err(error));
    }

    pub fn set_default(&self, endpoint: &'static str, response: RemoteResponse) {
        self.defaults.lock().insert(endpoint, response);
    }

    pub fn set_delay(&self, endpoint: &'static str, delay: Duration) {
        self.delays.lock().insert(endpoint, delay);
    }

    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, endpoint: &'static str) -> Vec<RemoteRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.endpoint.name() == endpoint)
            .cloned()
            .collect()
    }

    pub fn count(&self, endpoint: &'static str) -> usize {
        self.calls_to(endpoint).len()
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn call(
        &self,
        request: &RemoteRequest,
    ) -> std::result::Result<RemoteResponse, RemoteError> {
        let name = request.endpoint.name();
        self.calls.lock().push(request.clone());

        let delay = self.delays.lock().get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(name)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(outcome) => outcome,
            None => Ok(self
                .defaults
                .lock()
                .get(name)
                .cloned()
                .unwrap_or_else(|| RemoteResponse::new(500, "unscripted"))),
        }
    }
}

/// Records everything the engine pushes to the presentation layer.
#[derive(Default)]
pub struct RecordingSink {
    pub views: Mutex<Vec<RosterView>>,
    pub transitions: Mutex<Vec<StatusTransition>>,
    pub requests: Mutex<Vec<FriendRequest>>,
    pub failures: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl RosterSink for RecordingSink {
    fn publish(&self, view: RosterView) {
        self.views.lock().push(view);
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, transition: &StatusTransition) {
        self.transitions.lock().push(transition.clone());
    }

    fn request_received(&self, request: &FriendRequest) {
        self.requests.lock().push(request.clone());
    }

    fn action_failed(&self, action: &str, error: &str) {
        self.failures
            .lock()
            .push((action.to_string(), error.to_string()));
    }
}

#[derive(Default)]
pub struct MemoryPreferencesStore {
    pub saved: Mutex<Vec<Preferences>>,
}

#[async_trait]
impl PreferencesStore for MemoryPreferencesStore {
    async fn load(&self) -> Result<Option<Preferences>> {
        Ok(self.saved.lock().last().cloned())
    }

    async fn save(&self, preferences: &Preferences) -> Result<()> {
        self.saved.lock().push(preferences.clone());
        Ok(())
    }
}

pub struct Harness {
    pub engine: SyncEngine,
    pub remote: Arc<ScriptedRemote>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<MemoryPreferencesStore>,
}

/// Config with only the listed interval-driven categories enabled.
pub fn config(presence: bool, full_refresh: bool, request_poll: bool) -> SyncConfig {
    let mut config = SyncConfig::default();
    if !presence {
        config.schedule.presence.interval_ms = None;
    }
    if !full_refresh {
        config.schedule.full_refresh.interval_ms = None;
    }
    if !request_poll {
        config.schedule.request_poll.interval_ms = None;
    }
    config
}

pub fn harness(config: SyncConfig) -> Harness {
    let remote = ScriptedRemote::new();
    let sink = RecordingSink::new();
    let store = Arc::new(MemoryPreferencesStore::default());

    let deps = EngineDeps::new(
        remote.clone(),
        Arc::new(JsonWireDecoder),
        sink.clone(),
        sink.clone(),
        store.clone(),
    );
    let engine = SyncEngine::new(config, deps).expect("engine");

    Harness {
        engine,
        remote,
        sink,
        store,
    }
}

/// Harness with a session already established.
pub fn session_harness(config: SyncConfig) -> Harness {
    let h = harness(config);
    h.engine
        .set_session(SessionContext::new("test-key", "Me"))
        .expect("session");
    h
}

pub fn quick_retry(schedule: &mut CategorySchedule, attempts: u32) {
    schedule.retry = Some(RetryPolicy::fixed(attempts, 100));
}

pub fn status(name: &str, online: bool) -> Value {
    json!({ "characterName": name, "isOnline": online })
}

pub fn heartbeat(statuses: Vec<Value>, request_cursor: u64) -> RemoteResponse {
    RemoteResponse::new(
        200,
        json!({
            "success": true,
            "type": "Heartbeat",
            "payload": {
                "statuses": statuses,
                "lastEventTimestamp": 1,
                "lastRequestEventTimestamp": request_cursor,
            }
        })
        .to_string(),
    )
}

pub fn friend_list(names: &[&str], statuses: Vec<Value>) -> RemoteResponse {
    let friends: Vec<Value> = names.iter().map(|n| json!({ "name": n })).collect();
    RemoteResponse::new(
        200,
        json!({
            "success": true,
            "type": "FriendList",
            "payload": { "friends": friends, "statuses": statuses }
        })
        .to_string(),
    )
}

pub fn requests(incoming: &[(&str, &str)]) -> RemoteResponse {
    let incoming: Vec<Value> = incoming
        .iter()
        .map(|(id, from)| json!({ "requestId": id, "fromCharacterName": from, "toCharacterName": "Me" }))
        .collect();
    RemoteResponse::new(
        200,
        json!({
            "success": true,
            "type": "FriendRequests",
            "payload": { "incoming": incoming, "outgoing": [] }
        })
        .to_string(),
    )
}

pub const IDLE: Duration = Duration::from_secs(60);
