//! In-memory roster cache.
//!
//! Locks are held only for the copy-in/copy-out around each mutation, never
//! across I/O. Readers get point-in-time copies.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use roster_core::{
    FriendEntry, FriendIdentity, FriendRequest, FriendStatus, MergeStats, RosterView, StatusTable,
    merge_statuses,
};

#[derive(Debug, Default)]
struct CacheState {
    friends: Vec<FriendEntry>,
    statuses: StatusTable,
    incoming_requests: Vec<FriendRequest>,
    outgoing_requests: Vec<FriendRequest>,
}

#[derive(Debug, Default)]
pub struct RosterCache {
    state: RwLock<CacheState>,
}

impl RosterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an authoritative roster.
    ///
    /// Statuses of friends no longer on the roster are dropped; the
    /// snapshot's statuses are then merged over what is left, so a roster
    /// response that omits some status fields does not erase them. Returns
    /// a copy of the resulting table.
    pub fn replace_roster(
        &self,
        friends: Vec<FriendEntry>,
        statuses: Vec<FriendStatus>,
    ) -> StatusTable {
        let members: BTreeSet<FriendIdentity> =
            friends.iter().filter_map(|f| f.identity().ok()).collect();

        let mut state = self.state.write();
        state.statuses.retain(|id, _| members.contains(id));
        merge_statuses(&mut state.statuses, &statuses);
        state.friends = friends;
        state.statuses.clone()
    }

    /// Fold a sparse delta into the status table. Returns the merge
    /// counters and a copy of the merged table.
    pub fn merge_delta(&self, delta: &[FriendStatus]) -> (MergeStats, StatusTable) {
        let mut state = self.state.write();
        let stats = merge_statuses(&mut state.statuses, delta);
        (stats, state.statuses.clone())
    }

    pub fn replace_requests(&self, incoming: Vec<FriendRequest>, outgoing: Vec<FriendRequest>) {
        let mut state = self.state.write();
        state.incoming_requests = incoming;
        state.outgoing_requests = outgoing;
    }

    /// Drop a friend from the roster after a successful removal.
    pub fn remove_friend(&self, name: &str) -> bool {
        let Ok(identity) = FriendIdentity::new(name) else {
            return false;
        };
        let mut state = self.state.write();
        let before = state.friends.len();
        state.friends.retain(|f| !identity.matches(&f.name));
        state.statuses.remove(&identity);
        state.friends.len() != before
    }

    /// Whether an authoritative roster with at least one friend is cached.
    pub fn has_roster(&self) -> bool {
        !self.state.read().friends.is_empty()
    }

    pub fn statuses(&self) -> StatusTable {
        self.state.read().statuses.clone()
    }

    /// Point-in-time copy for the presentation layer.
    pub fn view(&self) -> RosterView {
        let state = self.state.read();
        RosterView {
            friends: state.friends.clone(),
            statuses: state.statuses.to_vec(),
            incoming_requests: state.incoming_requests.clone(),
            outgoing_requests: state.outgoing_requests.clone(),
        }
    }

    pub fn clear(&self) {
        *self.state.write() = CacheState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::RequestDirection;

    fn online(name: &str, is_online: bool) -> FriendStatus {
        FriendStatus {
            is_online,
            ..FriendStatus::new(name)
        }
    }

    #[test]
    fn test_merge_delta_keeps_known_fields() {
        let cache = RosterCache::new();
        cache.replace_roster(
            vec![FriendEntry::new("aria")],
            vec![FriendStatus {
                job: "WAR 75".to_string(),
                ..online("Aria", false)
            }],
        );

        let (stats, table) = cache.merge_delta(&[online("ARIA", true)]);
        assert_eq!(stats.updated, 1);

        let merged = table.get(&FriendIdentity::new("aria").unwrap()).unwrap();
        assert!(merged.is_online);
        assert_eq!(merged.job, "WAR 75");
    }

    #[test]
    fn test_replace_roster_drops_removed_friends() {
        let cache = RosterCache::new();
        cache.replace_roster(
            vec![FriendEntry::new("aria"), FriendEntry::new("bram")],
            vec![
                FriendStatus {
                    zone: "Port Town".to_string(),
                    ..online("aria", true)
                },
                online("bram", true),
            ],
        );

        let table = cache.replace_roster(vec![FriendEntry::new("Aria")], vec![online("aria", false)]);
        assert_eq!(table.len(), 1);
        let aria = table.get(&FriendIdentity::new("aria").unwrap()).unwrap();
        assert!(!aria.is_online);
        assert_eq!(aria.zone, "Port Town");
    }

    #[test]
    fn test_has_roster() {
        let cache = RosterCache::new();
        cache.merge_delta(&[online("aria", true)]);
        assert!(!cache.has_roster());

        cache.replace_roster(vec![FriendEntry::new("aria")], vec![]);
        assert!(cache.has_roster());

        cache.clear();
        assert!(!cache.has_roster());
    }

    #[test]
    fn test_view_is_a_copy() {
        let cache = RosterCache::new();
        cache.replace_roster(vec![FriendEntry::new("aria")], vec![online("aria", true)]);
        let view = cache.view();

        cache.merge_delta(&[online("aria", false)]);
        assert!(view.statuses[0].is_online);
        assert!(!cache.view().statuses[0].is_online);
    }

    #[test]
    fn test_remove_friend() {
        let cache = RosterCache::new();
        cache.replace_roster(
            vec![FriendEntry::new("aria"), FriendEntry::new("bram")],
            vec![online("aria", true), online("bram", true)],
        );

        assert!(cache.remove_friend("Aria"));
        assert!(!cache.remove_friend("aria"));
        let view = cache.view();
        assert_eq!(view.friends.len(), 1);
        assert_eq!(view.statuses.len(), 1);
        assert_eq!(view.statuses[0].character_name, "bram");
    }

    #[test]
    fn test_requests_and_clear() {
        let cache = RosterCache::new();
        let request = FriendRequest {
            request_id: "r1".to_string(),
            from_character_name: "cole".to_string(),
            to_character_name: "me".to_string(),
            direction: RequestDirection::Incoming,
            status: "pending".to_string(),
            created_at: 0,
        };
        cache.replace_requests(vec![request], Vec::new());
        assert_eq!(cache.view().incoming_requests.len(), 1);

        cache.clear();
        assert_eq!(cache.view(), RosterView::default());
    }
}
