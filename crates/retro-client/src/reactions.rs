//! Per-item like state: the user's desired flag, what the store last
//! confirmed, and short-lived previews announced by peers.

use std::collections::HashMap;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use retro_types::api::ReactionSummary;

use crate::error::SyncError;

/// What the rendering layer sees for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReactionState {
    pub liked: bool,
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Preview {
    liked: bool,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Entry {
    /// Total the store last reported.
    confirmed_count: u32,
    /// Whether the store holds our like.
    remote_liked: bool,
    /// Whether the user wants the item liked.
    liked: bool,
    in_flight: Option<bool>,
    /// Bumped on every local change or settle; stale refreshes are dropped.
    revision: u64,
    /// Durable per-peer state learned from notifications.
    known: HashMap<Uuid, bool>,
    previews: HashMap<Uuid, Preview>,
}

impl Entry {
    fn state(&self) -> ReactionState {
        let own = i64::from(self.liked) - i64::from(self.remote_liked);
        let peers: i64 = self
            .previews
            .values()
            .map(|p| if p.liked { 1 } else { -1 })
            .sum();
        let count = (i64::from(self.confirmed_count) + own + peers).clamp(0, i64::from(u32::MAX));
        ReactionState {
            liked: self.liked,
            count: count as u32,
        }
    }
}

/// Outcome of a settled durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    /// The user changed their mind meanwhile; issue this write next.
    Next(bool),
    /// Quiet now; schedule an authoritative refresh tagged with `revision`.
    Refresh { revision: u64 },
    /// The write was rejected and the flag rolled back.
    Failed(SyncError),
}

#[derive(Debug)]
pub struct ReactionBook {
    me: Uuid,
    entries: HashMap<Uuid, Entry>,
}

impl ReactionBook {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            entries: HashMap::new(),
        }
    }

    /// Load authoritative summaries. Items with a write in flight keep
    /// their local state until it settles; idle items missing from
    /// `summaries` have no likes left.
    pub fn seed(&mut self, summaries: &[ReactionSummary]) {
        let reported: HashMap<Uuid, &ReactionSummary> =
            summaries.iter().map(|s| (s.item_id, s)).collect();
        for id in reported.keys() {
            self.entries.entry(*id).or_default();
        }
        for (id, entry) in &mut self.entries {
            if entry.in_flight.is_some() {
                continue;
            }
            let (count, liked) = reported
                .get(id)
                .map_or((0, false), |s| (s.count, s.liked));
            entry.confirmed_count = count;
            entry.remote_liked = liked;
            entry.liked = liked;
            entry.revision += 1;
            entry.known.clear();
            entry.previews.clear();
        }
    }

    pub fn state(&self, item_id: Uuid) -> ReactionState {
        self.entries.get(&item_id).map(Entry::state).unwrap_or_default()
    }

    pub fn states(&self) -> HashMap<Uuid, ReactionState> {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.state()))
            .collect()
    }

    /// Flip the local flag. Returns the new flag and the write to issue, if
    /// none is already in flight.
    pub fn toggle(&mut self, item_id: Uuid) -> (bool, Option<bool>) {
        let liked = !self.state(item_id).liked;
        (liked, self.set(item_id, liked))
    }

    /// Set the local flag. Setting the current value changes nothing.
    pub fn set(&mut self, item_id: Uuid, liked: bool) -> Option<bool> {
        let entry = self.entries.entry(item_id).or_default();
        if entry.liked == liked {
            return None;
        }
        entry.liked = liked;
        entry.revision += 1;

        if entry.in_flight.is_some() {
            debug!("Reaction on {} coalesced behind in-flight write", item_id);
            return None;
        }
        if entry.liked == entry.remote_liked {
            return None;
        }
        entry.in_flight = Some(liked);
        Some(liked)
    }

    /// Fold in the result of the write that carried `sent`.
    pub fn settle(
        &mut self,
        item_id: Uuid,
        sent: bool,
        result: Result<ReactionSummary, SyncError>,
    ) -> Option<Settled> {
        let entry = self.entries.get_mut(&item_id)?;
        entry.in_flight = None;
        entry.revision += 1;

        match result {
            Ok(summary) => {
                entry.remote_liked = sent;
                entry.confirmed_count = summary.count;
                // Peers' previews are counted in the store total or still on their way
                entry.previews.clear();
            }
            Err(SyncError::DuplicateReaction) => {
                entry.remote_liked = sent;
            }
            Err(e) => {
                entry.liked = entry.remote_liked;
                return Some(Settled::Failed(e));
            }
        }

        if entry.liked != entry.remote_liked {
            entry.in_flight = Some(entry.liked);
            return Some(Settled::Next(entry.liked));
        }
        Some(Settled::Refresh {
            revision: entry.revision,
        })
    }

    /// Apply a delayed authoritative read. Returns whether anything visible
    /// changed; a read that agrees with local state is a no-op.
    pub fn refresh(&mut self, item_id: Uuid, revision: u64, summary: &ReactionSummary) -> bool {
        let Some(entry) = self.entries.get_mut(&item_id) else {
            return false;
        };
        if entry.revision != revision || entry.in_flight.is_some() {
            debug!("Dropping stale reaction refresh for {}", item_id);
            return false;
        }
        let before = entry.state();
        entry.confirmed_count = summary.count;
        entry.remote_liked = summary.liked;
        entry.liked = summary.liked;
        entry.previews.clear();
        before != entry.state()
    }

    /// A durable reaction change pushed by the store.
    pub fn apply_durable(&mut self, item_id: Uuid, user_id: Uuid, liked: bool, count: u32) {
        let entry = self.entries.entry(item_id).or_default();
        entry.confirmed_count = count;
        if user_id == self.me {
            // The count includes this write, so the remote flag moves with it.
            // The desired flag stays put while our own write is in flight.
            entry.remote_liked = liked;
            if entry.in_flight.is_none() {
                entry.liked = liked;
            }
        } else {
            entry.previews.remove(&user_id);
            entry.known.insert(user_id, liked);
        }
    }

    /// A peer announced a like or unlike ahead of its durable write.
    pub fn apply_preview(&mut self, item_id: Uuid, user_id: Uuid, liked: bool, expires_at: Instant) -> bool {
        if user_id == self.me {
            return false;
        }
        let entry = self.entries.entry(item_id).or_default();
        if entry.known.get(&user_id) == Some(&liked) {
            return false;
        }
        match entry.previews.get(&user_id) {
            // Second opposite preview undoes the first
            Some(prev) if prev.liked != liked => {
                entry.previews.remove(&user_id);
            }
            _ => {
                entry
                    .previews
                    .insert(user_id, Preview { liked, expires_at });
            }
        }
        true
    }

    /// Drop previews that no durable notification confirmed in time.
    pub fn expire_previews(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for entry in self.entries.values_mut() {
            let before = entry.previews.len();
            entry.previews.retain(|_, p| p.expires_at > now);
            changed |= entry.previews.len() != before;
        }
        changed
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .flat_map(|e| e.previews.values().map(|p| p.expires_at))
            .min()
    }

    pub fn forget_item(&mut self, item_id: Uuid) {
        self.entries.remove(&item_id);
    }

    pub fn retain_items(&mut self, keep: impl Fn(Uuid) -> bool) {
        self.entries.retain(|id, _| keep(*id));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn summary(item_id: Uuid, count: u32, liked: bool) -> ReactionSummary {
        ReactionSummary {
            item_id,
            count,
            liked,
        }
    }

    #[test]
    fn toggle_is_optimistic_and_single_flight() {
        let item = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());

        assert_eq!(book.toggle(item), (true, Some(true)));
        assert_eq!(book.state(item), ReactionState { liked: true, count: 1 });

        // Second and third toggles ride behind the in-flight like
        assert_eq!(book.toggle(item), (false, None));
        assert_eq!(book.toggle(item), (true, None));
        assert_eq!(book.state(item).count, 1);

        let settled = book.settle(item, true, Ok(summary(item, 1, true)));
        assert!(matches!(settled, Some(Settled::Refresh { .. })));
        assert_eq!(book.state(item), ReactionState { liked: true, count: 1 });
    }

    #[test]
    fn settle_issues_follow_up_when_intent_changed() {
        let item = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());

        book.toggle(item);
        book.toggle(item);
        assert_eq!(book.state(item), ReactionState { liked: false, count: 0 });

        let next = book.settle(item, true, Ok(summary(item, 1, true)));
        assert_eq!(next, Some(Settled::Next(false)));
        assert_eq!(book.state(item).count, 0);

        let done = book.settle(item, false, Ok(summary(item, 0, false)));
        assert!(matches!(done, Some(Settled::Refresh { .. })));
        assert_eq!(book.state(item), ReactionState { liked: false, count: 0 });
    }

    #[test]
    fn set_is_idempotent() {
        let item = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());

        assert_eq!(book.set(item, true), Some(true));
        assert_eq!(book.set(item, true), None);
        assert_eq!(book.state(item).count, 1);
    }

    #[test]
    fn duplicate_counts_as_success() {
        let item = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());
        book.seed(&[summary(item, 3, false)]);

        book.set(item, true);
        let settled = book.settle(item, true, Err(SyncError::DuplicateReaction));
        assert!(matches!(settled, Some(Settled::Refresh { .. })));
        assert!(book.state(item).liked);
    }

    #[test]
    fn failure_rolls_back_to_store_state() {
        let item = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());
        book.seed(&[summary(item, 2, false)]);

        book.toggle(item);
        assert_eq!(book.state(item).count, 3);

        let settled = book.settle(item, true, Err(SyncError::Transient("timeout".into())));
        assert_eq!(settled, Some(Settled::Failed(SyncError::Transient("timeout".into()))));
        assert_eq!(book.state(item), ReactionState { liked: false, count: 2 });
    }

    #[test]
    fn refresh_only_lands_on_matching_revision() {
        let item = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());

        book.toggle(item);
        let Some(Settled::Refresh { revision }) = book.settle(item, true, Ok(summary(item, 1, true)))
        else {
            panic!("expected refresh");
        };

        // Agreeing read changes nothing visible
        assert!(!book.refresh(item, revision, &summary(item, 1, true)));
        // A peer liked in between
        assert!(book.refresh(item, revision, &summary(item, 2, true)));
        assert_eq!(book.state(item).count, 2);

        book.toggle(item);
        assert!(!book.refresh(item, revision, &summary(item, 9, true)));
        assert_eq!(book.state(item).count, 1);
    }

    #[test]
    fn previews_apply_cancel_and_expire() {
        let item = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut book = ReactionBook::new(me);
        let now = Instant::now();
        let ttl = Duration::from_secs(5);

        assert!(!book.apply_preview(item, me, true, now + ttl));

        assert!(book.apply_preview(item, peer, true, now + ttl));
        assert_eq!(book.state(item).count, 1);
        assert_eq!(book.next_deadline(), Some(now + ttl));

        // Unlike preview cancels the pending like preview
        assert!(book.apply_preview(item, peer, false, now + ttl));
        assert_eq!(book.state(item).count, 0);

        book.apply_preview(item, peer, true, now + ttl);
        assert!(!book.expire_previews(now));
        assert!(book.expire_previews(now + ttl));
        assert_eq!(book.state(item).count, 0);
        assert_eq!(book.next_deadline(), None);
    }

    #[test]
    fn own_notification_before_ack_counts_once() {
        let item = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut book = ReactionBook::new(me);

        book.toggle(item);
        assert_eq!(book.state(item), ReactionState { liked: true, count: 1 });

        book.apply_durable(item, me, true, 1);
        assert_eq!(book.state(item), ReactionState { liked: true, count: 1 });

        let settled = book.settle(item, true, Ok(summary(item, 1, true)));
        assert!(matches!(settled, Some(Settled::Refresh { .. })));
        assert_eq!(book.state(item), ReactionState { liked: true, count: 1 });
    }

    #[test]
    fn own_notification_under_a_changed_mind_keeps_intent() {
        let item = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut book = ReactionBook::new(me);

        book.toggle(item);
        book.toggle(item);
        book.apply_durable(item, me, true, 1);
        assert_eq!(book.state(item), ReactionState { liked: false, count: 0 });

        let next = book.settle(item, true, Ok(summary(item, 1, true)));
        assert_eq!(next, Some(Settled::Next(false)));
    }

    #[test]
    fn reseed_clears_items_that_lost_every_like() {
        let item = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());
        let later = Instant::now() + Duration::from_secs(5);

        book.seed(&[summary(item, 1, true)]);
        book.apply_preview(item, peer, true, later);
        assert_eq!(book.state(item).count, 2);

        book.seed(&[]);
        assert_eq!(book.state(item), ReactionState { liked: false, count: 0 });
        assert_eq!(book.next_deadline(), None);
    }

    #[test]
    fn reseed_leaves_in_flight_items_alone() {
        let item = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());

        book.toggle(item);
        book.seed(&[]);
        assert_eq!(book.state(item), ReactionState { liked: true, count: 1 });
    }

    #[test]
    fn authoritative_count_absorbs_peer_previews() {
        let item = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());
        let later = Instant::now() + Duration::from_secs(5);

        book.apply_preview(item, peer, true, later);
        book.toggle(item);
        assert_eq!(book.state(item).count, 2);

        let Some(Settled::Refresh { revision }) = book.settle(item, true, Ok(summary(item, 2, true)))
        else {
            panic!("expected refresh");
        };
        assert_eq!(book.state(item), ReactionState { liked: true, count: 2 });

        book.apply_preview(item, peer, true, later);
        book.refresh(item, revision, &summary(item, 2, true));
        assert_eq!(book.state(item), ReactionState { liked: true, count: 2 });
        assert_eq!(book.next_deadline(), None);
    }

    #[test]
    fn durable_notification_replaces_preview() {
        let item = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut book = ReactionBook::new(Uuid::new_v4());
        let later = Instant::now() + Duration::from_secs(5);

        book.apply_preview(item, peer, true, later);
        book.apply_durable(item, peer, true, 1);
        assert_eq!(book.state(item).count, 1);

        // Already reflected durably
        assert!(!book.apply_preview(item, peer, true, later));
        assert_eq!(book.state(item).count, 1);
    }
}
