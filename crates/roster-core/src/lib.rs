//! Core roster model shared by the synchronization engine.
//!
//! This crate has no runtime dependencies. It provides:
//! - [`FriendIdentity`], the case-normalized join key
//! - [`FriendStatus`] / [`FriendRequest`] snapshots
//! - [`merge_statuses`], which folds sparse deltas into a cached table
//! - [`ChangeDetector`] and [`RequestTracker`], which turn consecutive
//!   observations into user-facing transitions

mod detector;
mod error;
mod identity;
mod merge;
mod status;

pub use detector::{
    ChangeDetector, RequestTracker, StatusTransition, TransitionKind, notification_display_name,
};
pub use error::{CoreError, Result};
pub use identity::FriendIdentity;
pub use merge::{MergeStats, StatusTable, merge_status, merge_statuses};
pub use status::{
    FriendEntry, FriendRequest, FriendStatus, NATION_HIDDEN, NATION_NOT_CARRIED, RequestDirection,
    RosterView,
};
