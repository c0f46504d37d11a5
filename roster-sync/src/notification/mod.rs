//! Presentation-facing sinks.
//!
//! Sinks are called from worker tasks and must never block.

mod events;

pub use events::{SyncEvent, SyncEventBroadcaster};

use roster_core::{FriendRequest, RosterView, StatusTransition};

/// One-way push of merged cache state.
pub trait RosterSink: Send + Sync + 'static {
    fn publish(&self, view: RosterView);
}

/// User-facing notifications.
pub trait NotificationSink: Send + Sync + 'static {
    /// A friend came online or went offline.
    fn notify(&self, transition: &StatusTransition);

    /// A new incoming friend request arrived.
    fn request_received(&self, request: &FriendRequest);

    /// A user-initiated action failed. Background failures never reach
    /// this method.
    fn action_failed(&self, action: &str, error: &str);
}
