//! Online/offline transition detection.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::FriendIdentity;
use crate::merge::StatusTable;
use crate::status::{FriendRequest, RequestDirection};

/// Direction of an online state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    BecameOnline,
    BecameOffline,
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BecameOnline => f.write_str("online"),
            Self::BecameOffline => f.write_str("offline"),
        }
    }
}

/// A detected transition, ready for the notification layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub identity: FriendIdentity,
    pub display_name: String,
    pub kind: TransitionKind,
}

/// Diffs consecutive online observations per identity.
///
/// The first observation only seeds the history, so friends that were
/// already online at startup do not produce a flood of notifications.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    previous: Option<BTreeMap<FriendIdentity, bool>>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the cold-start observation has happened.
    pub fn is_seeded(&self) -> bool {
        self.previous.is_some()
    }

    /// Forget the history; the next call seeds again.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Compare `current` against the previous observation.
    ///
    /// Absence from the previous observation counts as offline. The history
    /// is then replaced by `current`, so identities missing from `current`
    /// are dropped rather than reported as going offline. Results are in
    /// identity order.
    pub fn detect(
        &mut self,
        current: BTreeMap<FriendIdentity, bool>,
    ) -> Vec<(FriendIdentity, TransitionKind)> {
        let Some(previous) = self.previous.as_ref() else {
            debug!(
                friends = current.len(),
                "Initial status scan complete, notifications enabled"
            );
            self.previous = Some(current);
            return Vec::new();
        };

        let transitions = current
            .iter()
            .filter_map(|(identity, &online)| {
                let was_online = previous.get(identity).copied().unwrap_or(false);
                match (was_online, online) {
                    (false, true) => Some((identity.clone(), TransitionKind::BecameOnline)),
                    (true, false) => Some((identity.clone(), TransitionKind::BecameOffline)),
                    _ => None,
                }
            })
            .collect();

        self.previous = Some(current);
        transitions
    }

    /// Run [`detect`](Self::detect) on a merged status table and attach
    /// notification-ready display names.
    pub fn detect_table(&mut self, table: &StatusTable) -> Vec<StatusTransition> {
        self.detect(table.online_map())
            .into_iter()
            .map(|(identity, kind)| {
                let display_name = table
                    .get(&identity)
                    .map(|s| notification_display_name(s.shown_name()))
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| identity.to_string());
                StatusTransition {
                    identity,
                    display_name,
                    kind,
                }
            })
            .collect()
    }
}

/// Title-case a character name for notifications: `"aria jones"` becomes
/// `"Aria Jones"`, `"ARIA"` becomes `"Aria"`.
pub fn notification_display_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for c in name.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        at_word_start = c == ' ';
    }
    out
}

/// Detects newly arrived incoming friend requests across polls.
///
/// Seeded on the first observation like [`ChangeDetector`].
#[derive(Debug, Default)]
pub struct RequestTracker {
    seen: Option<BTreeSet<String>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.seen = None;
    }

    /// Return the incoming requests not present in the previous observation.
    pub fn observe(&mut self, requests: &[FriendRequest]) -> Vec<FriendRequest> {
        let incoming: Vec<&FriendRequest> = requests
            .iter()
            .filter(|r| r.direction == RequestDirection::Incoming)
            .collect();
        let current: BTreeSet<String> = incoming.iter().map(|r| r.request_id.clone()).collect();

        let fresh = match self.seen.as_ref() {
            None => Vec::new(),
            Some(seen) => incoming
                .into_iter()
                .filter(|r| !seen.contains(&r.request_id))
                .cloned()
                .collect(),
        };

        self.seen = Some(current);
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::FriendStatus;

    fn id(name: &str) -> FriendIdentity {
        FriendIdentity::new(name).unwrap()
    }

    fn observation(entries: &[(&str, bool)]) -> BTreeMap<FriendIdentity, bool> {
        entries.iter().map(|(n, o)| (id(n), *o)).collect()
    }

    #[test]
    fn test_cold_start_suppression() {
        let mut detector = ChangeDetector::new();

        let first = detector.detect(observation(&[("a", true), ("b", false)]));
        assert!(first.is_empty());
        assert!(detector.is_seeded());

        let second = detector.detect(observation(&[("a", false), ("b", true)]));
        assert_eq!(
            second,
            vec![
                (id("a"), TransitionKind::BecameOffline),
                (id("b"), TransitionKind::BecameOnline),
            ]
        );
    }

    #[test]
    fn test_absent_counts_as_offline() {
        let mut detector = ChangeDetector::new();
        detector.detect(observation(&[("a", false)]));

        let transitions = detector.detect(observation(&[("a", false), ("new", true)]));
        assert_eq!(transitions, vec![(id("new"), TransitionKind::BecameOnline)]);
    }

    #[test]
    fn test_disappeared_entries_are_dropped_not_offline() {
        let mut detector = ChangeDetector::new();
        detector.detect(observation(&[("a", true), ("b", true)]));

        // "b" vanishes: no transition.
        assert!(detector.detect(observation(&[("a", true)])).is_empty());

        // "b" reappears online: history was replaced, so it counts as new.
        let transitions = detector.detect(observation(&[("a", true), ("b", true)]));
        assert_eq!(transitions, vec![(id("b"), TransitionKind::BecameOnline)]);
    }

    #[test]
    fn test_each_transition_reported_once() {
        let mut detector = ChangeDetector::new();
        detector.detect(observation(&[("a", false)]));
        assert_eq!(detector.detect(observation(&[("a", true)])).len(), 1);
        assert!(detector.detect(observation(&[("a", true)])).is_empty());
    }

    #[test]
    fn test_reset_reseeds() {
        let mut detector = ChangeDetector::new();
        detector.detect(observation(&[("a", false)]));
        detector.reset();
        assert!(detector.detect(observation(&[("a", true)])).is_empty());
    }

    #[test]
    fn test_detect_table_uses_display_names() {
        let mut detector = ChangeDetector::new();
        detector.detect_table(&StatusTable::from_statuses([FriendStatus::new("aria")]));

        let mut online = FriendStatus::new("aria");
        online.is_online = true;
        online.display_name = "aria ALT".to_string();
        let transitions = detector.detect_table(&StatusTable::from_statuses([online]));

        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].display_name, "Aria Alt");
        assert_eq!(transitions[0].kind, TransitionKind::BecameOnline);
    }

    #[test]
    fn test_notification_display_name() {
        assert_eq!(notification_display_name("ARIA"), "Aria");
        assert_eq!(notification_display_name("aria jones"), "Aria Jones");
        assert_eq!(notification_display_name(""), "");
    }

    fn request(id: &str, direction: RequestDirection) -> FriendRequest {
        FriendRequest {
            request_id: id.to_string(),
            from_character_name: "Sender".to_string(),
            to_character_name: "Me".to_string(),
            direction,
            status: "pending".to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn test_request_tracker_reports_new_incoming_only() {
        let mut tracker = RequestTracker::new();
        assert!(tracker.observe(&[request("1", RequestDirection::Incoming)]).is_empty());

        let fresh = tracker.observe(&[
            request("1", RequestDirection::Incoming),
            request("2", RequestDirection::Incoming),
            request("3", RequestDirection::Outgoing),
        ]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].request_id, "2");
    }
}
