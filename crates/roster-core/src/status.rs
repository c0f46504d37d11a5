//! Roster snapshot types.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::FriendIdentity;

/// Nation value meaning "hidden / not shared".
pub const NATION_HIDDEN: i32 = -1;

/// Nation value of a status that carries no nation. The merge keeps the
/// cached value.
pub const NATION_NOT_CARRIED: i32 = 0;

/// Presence snapshot for one friend.
///
/// Owned by the roster cache and only mutated through
/// [`merge_statuses`](crate::merge_statuses) while the cache lock is held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendStatus {
    /// Originally friended character; the identity is derived from it.
    pub character_name: String,
    /// Active character shown to the user (may be an alt from the link group).
    pub display_name: String,
    pub is_online: bool,
    pub job: String,
    pub rank: String,
    /// Nation id. [`NATION_HIDDEN`] when hidden, [`NATION_NOT_CARRIED`]
    /// when the update did not include it.
    pub nation: i32,
    pub zone: String,
    /// Unix milliseconds, `0` when unknown.
    pub last_seen_at: u64,
    pub show_online_status: bool,
    pub is_linked_character: bool,
    pub is_on_alt_character: bool,
    pub alt_character_name: String,
    pub friended_as: String,
    pub linked_characters: Vec<String>,
}

impl Default for FriendStatus {
    fn default() -> Self {
        Self {
            character_name: String::new(),
            display_name: String::new(),
            is_online: false,
            job: String::new(),
            rank: String::new(),
            nation: NATION_NOT_CARRIED,
            zone: String::new(),
            last_seen_at: 0,
            show_online_status: true,
            is_linked_character: false,
            is_on_alt_character: false,
            alt_character_name: String::new(),
            friended_as: String::new(),
            linked_characters: Vec::new(),
        }
    }
}

impl FriendStatus {
    /// Create an empty status for `character_name`.
    pub fn new(character_name: impl Into<String>) -> Self {
        Self {
            character_name: character_name.into(),
            ..Default::default()
        }
    }

    /// Normalized identity of this entry.
    pub fn identity(&self) -> Result<FriendIdentity> {
        FriendIdentity::new(&self.character_name)
    }

    /// Name to show for this friend, falling back to the character name.
    pub fn shown_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.character_name
        } else {
            &self.display_name
        }
    }

    /// Whether the friend should be treated as online by the presentation layer.
    pub fn is_visible_online(&self) -> bool {
        self.is_online && self.show_online_status
    }
}

/// One entry of the friend roster itself (who is a friend, not their presence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FriendEntry {
    pub name: String,
    pub friended_as: String,
    pub linked_characters: Vec<String>,
}

impl FriendEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> Result<FriendIdentity> {
        FriendIdentity::new(&self.name)
    }
}

/// Direction of a pending relationship request relative to the local character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestDirection {
    Incoming,
    Outgoing,
}

/// A pending friend request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub request_id: String,
    pub from_character_name: String,
    pub to_character_name: String,
    pub direction: RequestDirection,
    pub status: String,
    /// Unix milliseconds.
    pub created_at: u64,
}

impl FriendRequest {
    /// The other party of the request.
    pub fn counterpart(&self) -> &str {
        match self.direction {
            RequestDirection::Incoming => &self.from_character_name,
            RequestDirection::Outgoing => &self.to_character_name,
        }
    }
}

/// Point-in-time copy of the cached roster handed to readers.
///
/// Readers never get a live reference into the cache, so later mutations
/// cannot race with consumption.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RosterView {
    pub friends: Vec<FriendEntry>,
    pub statuses: Vec<FriendStatus>,
    pub incoming_requests: Vec<FriendRequest>,
    pub outgoing_requests: Vec<FriendRequest>,
}

impl RosterView {
    /// Look up a status by any spelling of the friend's name.
    pub fn status_of(&self, name: &str) -> Option<&FriendStatus> {
        let identity = FriendIdentity::new(name).ok()?;
        self.statuses
            .iter()
            .find(|s| identity.matches(&s.character_name))
    }

    /// Roster entries whose status is visibly online (case-insensitive join).
    pub fn online_friends(&self) -> Vec<&FriendEntry> {
        self.friends
            .iter()
            .filter(|f| {
                self.status_of(&f.name)
                    .is_some_and(FriendStatus::is_visible_online)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online(name: &str) -> FriendStatus {
        FriendStatus {
            is_online: true,
            ..FriendStatus::new(name)
        }
    }

    #[test]
    fn test_shown_name_falls_back() {
        let mut status = FriendStatus::new("Aria");
        assert_eq!(status.shown_name(), "Aria");
        status.display_name = "AriaAlt".to_string();
        assert_eq!(status.shown_name(), "AriaAlt");
    }

    #[test]
    fn test_default_nation_is_not_carried() {
        assert_eq!(FriendStatus::default().nation, NATION_NOT_CARRIED);
        assert_ne!(NATION_HIDDEN, NATION_NOT_CARRIED);
        assert!(FriendStatus::default().show_online_status);
    }

    #[test]
    fn test_online_friends_join_is_case_insensitive() {
        let mut hidden = online("Cid");
        hidden.show_online_status = false;

        let view = RosterView {
            friends: vec![
                FriendEntry::new("ARIA"),
                FriendEntry::new("Bast"),
                FriendEntry::new("Cid"),
            ],
            statuses: vec![online("aria"), FriendStatus::new("bast"), hidden],
            ..Default::default()
        };

        let names: Vec<_> = view.online_friends().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["ARIA"]);
    }

    #[test]
    fn test_request_counterpart() {
        let request = FriendRequest {
            request_id: "r1".to_string(),
            from_character_name: "Aria".to_string(),
            to_character_name: "Me".to_string(),
            direction: RequestDirection::Incoming,
            status: "pending".to_string(),
            created_at: 0,
        };
        assert_eq!(request.counterpart(), "Aria");
    }
}
