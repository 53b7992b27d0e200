use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use retro_types::api::ExpireResponse;
use retro_types::models::Board;

use crate::error::SyncError;

/// Leaderless expiry watchdog for one board. Any client that notices the
/// board is overdue asks the store for the conditional end transition.
#[derive(Debug)]
pub struct ExpiryEnforcer {
    ttl: Duration,
    in_flight: bool,
}

impl ExpiryEnforcer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            in_flight: false,
        }
    }

    /// Whether to issue the transition now. At most one request per client
    /// is outstanding.
    pub fn check(&mut self, board: &Board, now: DateTime<Utc>) -> bool {
        if self.in_flight || !board.is_overdue(now, self.ttl) {
            return false;
        }
        debug!("Board {} outlived its time budget, requesting expiry", board.id);
        self.in_flight = true;
        true
    }

    /// Fold in the store's answer. Losing the race is not an error; the
    /// board the store returns is the one to show either way.
    pub fn settle(&mut self, result: Result<ExpireResponse, SyncError>) -> Option<Board> {
        self.in_flight = false;
        match result {
            Ok(ExpireResponse { transitioned: true, board }) => {
                debug!("Board {} expired by this client", board.id);
                Some(board)
            }
            Ok(ExpireResponse { transitioned: false, board }) => {
                debug!("Board {} expiry: {}", board.id, SyncError::ExpiryRaceNoop);
                Some(board)
            }
            Err(e) => {
                warn!("Expiry request failed, will retry on next check: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use retro_types::models::BoardStatus;
    use uuid::Uuid;

    use super::*;

    fn board(created_at: DateTime<Utc>) -> Board {
        Board {
            id: Uuid::new_v4(),
            code: "ABC234".into(),
            title: "Sprint 12".into(),
            owner_id: Uuid::new_v4(),
            status: BoardStatus::Active,
            created_at,
            ended_at: None,
            ended_by: None,
        }
    }

    #[test]
    fn fires_once_while_outstanding() {
        let ttl = Duration::from_secs(2 * 3600);
        let now = Utc::now();
        let mut enforcer = ExpiryEnforcer::new(ttl);

        let fresh = board(now - chrono::Duration::minutes(30));
        assert!(!enforcer.check(&fresh, now));

        let stale = board(now - chrono::Duration::minutes(121));
        assert!(enforcer.check(&stale, now));
        assert!(!enforcer.check(&stale, now));

        let mut ended = stale.clone();
        ended.status = BoardStatus::Ended;
        ended.ended_at = Some(now);
        let shown = enforcer.settle(Ok(ExpireResponse {
            transitioned: false,
            board: ended.clone(),
        }));
        assert_eq!(shown, Some(ended.clone()));
        assert!(!enforcer.check(&ended, now));
    }

    #[test]
    fn failure_allows_a_later_retry() {
        let now = Utc::now();
        let mut enforcer = ExpiryEnforcer::new(Duration::from_secs(60));
        let stale = board(now - chrono::Duration::minutes(5));

        assert!(enforcer.check(&stale, now));
        assert_eq!(enforcer.settle(Err(SyncError::Transient("offline".into()))), None);
        assert!(enforcer.check(&stale, now));
    }
}
