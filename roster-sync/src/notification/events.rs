//! Sync events for presentation and notification layers.

use chrono::{DateTime, Utc};
use roster_core::{FriendIdentity, FriendRequest, RosterView, StatusTransition, TransitionKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use super::{NotificationSink, RosterSink};

/// Events emitted by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Merged cache state changed.
    RosterUpdated {
        view: RosterView,
        timestamp: DateTime<Utc>,
    },
    /// Friend came online.
    FriendOnline {
        identity: FriendIdentity,
        display_name: String,
        timestamp: DateTime<Utc>,
    },
    /// Friend went offline.
    FriendOffline {
        identity: FriendIdentity,
        display_name: String,
        timestamp: DateTime<Utc>,
    },
    /// New incoming friend request.
    RequestReceived {
        request: FriendRequest,
        timestamp: DateTime<Utc>,
    },
    /// User-initiated action failed.
    ActionFailed {
        action: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            SyncEvent::RosterUpdated { view, .. } => format!(
                "Roster updated: {} friends, {} online",
                view.friends.len(),
                view.statuses.iter().filter(|s| s.is_online).count()
            ),
            SyncEvent::FriendOnline { display_name, .. } => {
                format!("{} is now online", display_name)
            }
            SyncEvent::FriendOffline { display_name, .. } => {
                format!("{} went offline", display_name)
            }
            SyncEvent::RequestReceived { request, .. } => {
                format!("Friend request from {}", request.from_character_name)
            }
            SyncEvent::ActionFailed {
                action, message, ..
            } => format!("{} failed: {}", action, message),
        }
    }

    /// Check if this event should surface as a user notification.
    pub fn should_notify(&self) -> bool {
        !matches!(self, SyncEvent::RosterUpdated { .. })
    }
}

/// Broadcaster for sync events. Implements both sinks.
pub struct SyncEventBroadcaster {
    sender: broadcast::Sender<SyncEvent>,
}

impl SyncEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new broadcaster with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn send(&self, event: SyncEvent) {
        if self.sender.send(event).is_err() {
            trace!("No subscribers for sync event");
        }
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SyncEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SyncEventBroadcaster {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl RosterSink for SyncEventBroadcaster {
    fn publish(&self, view: RosterView) {
        self.send(SyncEvent::RosterUpdated {
            view,
            timestamp: Utc::now(),
        });
    }
}

impl NotificationSink for SyncEventBroadcaster {
    fn notify(&self, transition: &StatusTransition) {
        let identity = transition.identity.clone();
        let display_name = transition.display_name.clone();
        let timestamp = Utc::now();
        self.send(match transition.kind {
            TransitionKind::BecameOnline => SyncEvent::FriendOnline {
                identity,
                display_name,
                timestamp,
            },
            TransitionKind::BecameOffline => SyncEvent::FriendOffline {
                identity,
                display_name,
                timestamp,
            },
        });
    }

    fn request_received(&self, request: &FriendRequest) {
        self.send(SyncEvent::RequestReceived {
            request: request.clone(),
            timestamp: Utc::now(),
        });
    }

    fn action_failed(&self, action: &str, error: &str) {
        self.send(SyncEvent::ActionFailed {
            action: action.to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}
