use std::collections::{BTreeSet, HashSet};

use uuid::Uuid;

use retro_types::models::PresenceEntry;

/// Live participants of one board, rebuilt from every presence snapshot.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    live: BTreeSet<Uuid>,
    /// Every user id ever observed, for lazy profile lookups.
    seen: HashSet<Uuid>,
}

impl PresenceTracker {
    /// Replace the live set and return ids that were never seen before.
    pub fn apply_snapshot(&mut self, entries: &[PresenceEntry]) -> Vec<Uuid> {
        self.live = entries.iter().map(|e| e.user_id).collect();
        self.live
            .iter()
            .copied()
            .filter(|id| self.seen.insert(*id))
            .collect()
    }

    /// Users behind several connections count once.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_user_ids(&self) -> Vec<Uuid> {
        self.live.iter().copied().collect()
    }

    pub fn is_live(&self, user_id: Uuid) -> bool {
        self.live.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn entry(user_id: Uuid) -> PresenceEntry {
        PresenceEntry {
            user_id,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_replaces_rather_than_accumulates() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut tracker = PresenceTracker::default();

        let fresh = tracker.apply_snapshot(&[entry(a), entry(b), entry(a)]);
        assert_eq!(tracker.live_count(), 2);
        assert_eq!(fresh.len(), 2);

        let fresh = tracker.apply_snapshot(&[entry(b), entry(c)]);
        assert_eq!(fresh, vec![c]);
        assert!(!tracker.is_live(a));
        assert!(tracker.is_live(c));
        assert_eq!(tracker.live_count(), 2);

        // a returns: still live again, but not "newly seen"
        assert!(tracker.apply_snapshot(&[entry(a)]).is_empty());
        assert_eq!(tracker.live_user_ids(), vec![a]);
    }
}
