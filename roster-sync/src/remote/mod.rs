//! Remote service boundary.
//!
//! The engine never talks HTTP directly. It issues [`RemoteRequest`]s through
//! a [`RemoteClient`] and hands successful bodies to a
//! [`WireDecoder`](wire::WireDecoder).

mod http;
pub mod wire;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpRemoteClient;
pub use wire::{
    FriendListSnapshot, HeartbeatDelta, HeartbeatRequest, JsonWireDecoder, RequestList,
    WireDecoder,
};

/// Remote operations the engine can issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Heartbeat,
    FriendList,
    FriendRequests,
    Preferences,
    StatusFlags,
    RemoveFriend(String),
}

impl Endpoint {
    /// Operation name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Heartbeat => "Heartbeat",
            Self::FriendList => "SyncFriendList",
            Self::FriendRequests => "GetFriendRequests",
            Self::Preferences => "UpdatePreferences",
            Self::StatusFlags => "UpdateStatusFlags",
            Self::RemoveFriend(_) => "RemoveFriend",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoveFriend(name) => write!(f, "RemoveFriend({})", name),
            other => f.write_str(other.name()),
        }
    }
}

/// Credentials of the local character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub api_key: String,
    pub character_name: String,
}

impl SessionContext {
    pub fn new(api_key: impl Into<String>, character_name: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            character_name: character_name.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.character_name.is_empty()
    }
}

/// A single remote call.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub endpoint: Endpoint,
    pub session: SessionContext,
    pub body: Option<String>,
}

/// Response of a remote call.
///
/// `status` is `None` when no status code was obtained (transport failure).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteResponse {
    pub status: Option<u16>,
    pub body: String,
    pub error: Option<String>,
}

impl RemoteResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
            error: None,
        }
    }

    /// A response for a call that produced no status code.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: None,
            body: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.status, Some(400..=499))
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Short human-readable failure description.
    pub fn describe(&self) -> String {
        match (&self.error, self.status) {
            (Some(error), _) if !error.is_empty() => error.clone(),
            (_, Some(status)) => format!("HTTP {}", status),
            _ => "no response".to_string(),
        }
    }
}

/// Transport-level failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Performs one remote call. Implementations must be safe to call from
/// any worker task concurrently.
#[async_trait]
pub trait RemoteClient: Send + Sync + 'static {
    async fn call(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError>;
}
