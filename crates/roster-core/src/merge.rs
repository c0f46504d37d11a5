//! Non-destructive merging of sparse status deltas.
//!
//! Heartbeat deltas only carry the fields the server chose to include.
//! Overwriting every cached field with a delta's blank values would erase
//! previously known information on every partial update, so:
//!
//! - `is_online`, `show_online_status` and the alt/link flags are always
//!   taken from the delta;
//! - string and list fields are taken only when non-empty;
//! - `last_seen_at` is taken only when non-zero, `nation` only when it is
//!   not [`NATION_NOT_CARRIED`](crate::NATION_NOT_CARRIED).
//!
//! Applying the same delta twice yields the same table as applying it once.

use std::collections::BTreeMap;

use tracing::{trace, warn};

use crate::identity::FriendIdentity;
use crate::status::{FriendStatus, NATION_NOT_CARRIED};

/// Fold `src` into `dst`, keeping every field `src` does not carry.
pub fn merge_status(dst: &mut FriendStatus, src: &FriendStatus) {
    dst.is_online = src.is_online;
    dst.show_online_status = src.show_online_status;
    dst.is_linked_character = src.is_linked_character;
    dst.is_on_alt_character = src.is_on_alt_character;

    if src.last_seen_at != 0 {
        dst.last_seen_at = src.last_seen_at;
    }
    if src.nation != NATION_NOT_CARRIED {
        dst.nation = src.nation;
    }

    overwrite_if_set(&mut dst.display_name, &src.display_name);
    overwrite_if_set(&mut dst.job, &src.job);
    overwrite_if_set(&mut dst.rank, &src.rank);
    overwrite_if_set(&mut dst.zone, &src.zone);
    overwrite_if_set(&mut dst.alt_character_name, &src.alt_character_name);
    overwrite_if_set(&mut dst.friended_as, &src.friended_as);

    if !src.linked_characters.is_empty() {
        dst.linked_characters.clone_from(&src.linked_characters);
    }
}

#[inline]
fn overwrite_if_set(dst: &mut String, src: &str) {
    if !src.is_empty() {
        src.clone_into(dst);
    }
}

/// Counts reported by [`merge_statuses`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub updated: usize,
    pub inserted: usize,
    pub skipped: usize,
}

/// Cached status table keyed by [`FriendIdentity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTable {
    entries: BTreeMap<FriendIdentity, FriendStatus>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from an authoritative full snapshot.
    ///
    /// Later duplicates of the same identity win.
    pub fn from_statuses(statuses: impl IntoIterator<Item = FriendStatus>) -> Self {
        let mut entries = BTreeMap::new();
        for status in statuses {
            match status.identity() {
                Ok(identity) => {
                    entries.insert(identity, status);
                }
                Err(_) => warn!("Dropping status with empty character name"),
            }
        }
        Self { entries }
    }

    pub fn get(&self, identity: &FriendIdentity) -> Option<&FriendStatus> {
        self.entries.get(identity)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&FriendIdentity, &FriendStatus) -> bool) {
        self.entries.retain(|id, status| keep(id, status));
    }

    pub fn remove(&mut self, identity: &FriendIdentity) -> Option<FriendStatus> {
        self.entries.remove(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FriendIdentity, &FriendStatus)> {
        self.entries.iter()
    }

    /// Online flag per identity, the input of the change detector.
    pub fn online_map(&self) -> BTreeMap<FriendIdentity, bool> {
        self.entries
            .iter()
            .map(|(id, status)| (id.clone(), status.is_online))
            .collect()
    }

    /// Copy the statuses out in identity order.
    pub fn to_vec(&self) -> Vec<FriendStatus> {
        self.entries.values().cloned().collect()
    }
}

/// Merge a partial update into `cache`.
///
/// Known identities are updated with [`merge_status`]; unknown identities
/// are inserted as-is.
pub fn merge_statuses<'a>(
    cache: &mut StatusTable,
    delta: impl IntoIterator<Item = &'a FriendStatus>,
) -> MergeStats {
    let mut stats = MergeStats::default();

    for incoming in delta {
        let Ok(identity) = incoming.identity() else {
            warn!("Skipping delta entry with empty character name");
            stats.skipped += 1;
            continue;
        };

        match cache.entries.get_mut(&identity) {
            Some(existing) => {
                merge_status(existing, incoming);
                stats.updated += 1;
            }
            None => {
                trace!(identity = %identity, "Inserting previously unknown friend status");
                cache.entries.insert(identity, incoming.clone());
                stats.inserted += 1;
            }
        }
    }

    stats
}
