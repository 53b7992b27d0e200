use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, trace};
use uuid::Uuid;

use retro_types::events::{GatewayEvent, Signal};
use retro_types::models::PresenceEntry;

const ROOM_CAPACITY: usize = 1024;

/// An event plus the connection that caused it. Connections skip envelopes
/// they originated so ephemeral signals are not echoed back.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: Option<Uuid>,
    pub event: GatewayEvent,
}

struct Room {
    tx: broadcast::Sender<Envelope>,
    /// conn_id -> presence entry
    presence: HashMap<Uuid, PresenceEntry>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(ROOM_CAPACITY);
        Self {
            tx,
            presence: HashMap::new(),
        }
    }

    fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self.presence.values().cloned().collect();
        entries.sort_by_key(|e| (e.joined_at, e.user_id));
        entries
    }

    fn send(&self, envelope: Envelope) {
        // No receivers is fine: nobody is watching this board right now.
        let _ = self.tx.send(envelope);
    }
}

/// Per-board fan-out of entity changes, peer signals and presence.
/// Boards never share a room, so traffic for one board cannot leak into another.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// board_id -> room
    rooms: RwLock<HashMap<Uuid, Room>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to a board's events, opening its room if needed.
    pub async fn subscribe(&self, board_id: Uuid) -> broadcast::Receiver<Envelope> {
        self.inner
            .rooms
            .write()
            .await
            .entry(board_id)
            .or_insert_with(Room::new)
            .tx
            .subscribe()
    }

    /// Publish a persisted entity change to everyone on the board.
    pub async fn publish(&self, board_id: Uuid, event: GatewayEvent) {
        if let Some(room) = self.inner.rooms.read().await.get(&board_id) {
            room.send(Envelope { origin: None, event });
        }
    }

    /// Relay an ephemeral signal to every connection except `origin`.
    pub async fn relay(&self, board_id: Uuid, origin: Uuid, signal: Signal) {
        trace!("Relaying {:?} on board {}", signal, board_id);
        if let Some(room) = self.inner.rooms.read().await.get(&board_id) {
            room.send(Envelope {
                origin: Some(origin),
                event: GatewayEvent::Broadcast { signal },
            });
        }
    }

    /// Add a connection to the board's presence set and broadcast the full snapshot.
    pub async fn announce(&self, board_id: Uuid, conn_id: Uuid, entry: PresenceEntry) {
        let mut rooms = self.inner.rooms.write().await;
        let room = rooms.entry(board_id).or_insert_with(Room::new);
        room.presence.insert(conn_id, entry);
        let entries = room.snapshot();
        debug!("Board {} presence: {} connections", board_id, entries.len());
        room.send(Envelope {
            origin: None,
            event: GatewayEvent::PresenceSync { entries },
        });
    }

    /// Remove a connection's presence entry and broadcast the new snapshot.
    /// Call after the connection's receiver is dropped so an idle room can be freed.
    pub async fn leave(&self, board_id: Uuid, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        let Some(room) = rooms.get_mut(&board_id) else {
            return;
        };

        if room.presence.remove(&conn_id).is_some() {
            room.send(Envelope {
                origin: None,
                event: GatewayEvent::PresenceSync {
                    entries: room.snapshot(),
                },
            });
        }

        if room.presence.is_empty() && room.tx.receiver_count() == 0 {
            rooms.remove(&board_id);
            debug!("Board {} room closed", board_id);
        }
    }

    pub async fn presence(&self, board_id: Uuid) -> Vec<PresenceEntry> {
        self.inner
            .rooms
            .read()
            .await
            .get(&board_id)
            .map(Room::snapshot)
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(user_id: Uuid) -> PresenceEntry {
        PresenceEntry {
            user_id,
            joined_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn announce_broadcasts_full_snapshot() {
        let dispatcher = Dispatcher::new();
        let board = Uuid::new_v4();
        let mut rx = dispatcher.subscribe(board).await;

        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        dispatcher.announce(board, Uuid::new_v4(), entry(alice)).await;
        dispatcher.announce(board, Uuid::new_v4(), entry(bob)).await;

        let _first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match second.event {
            GatewayEvent::PresenceSync { entries } => {
                let ids: Vec<Uuid> = entries.iter().map(|e| e.user_id).collect();
                assert_eq!(ids.len(), 2);
                assert!(ids.contains(&alice) && ids.contains(&bob));
            }
            other => panic!("expected presence sync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn boards_are_isolated() {
        let dispatcher = Dispatcher::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = dispatcher.subscribe(a).await;
        let _rx_b = dispatcher.subscribe(b).await;

        dispatcher
            .publish(b, GatewayEvent::ItemDelete { board_id: b, item_id: Uuid::new_v4() })
            .await;

        assert!(matches!(
            rx_a.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn relay_marks_origin() {
        let dispatcher = Dispatcher::new();
        let board = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let mut rx = dispatcher.subscribe(board).await;

        let signal = Signal::Typing {
            item_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        dispatcher.relay(board, conn, signal.clone()).await;

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.origin, Some(conn));
        assert_eq!(envelope.event, GatewayEvent::Broadcast { signal });
    }

    #[tokio::test]
    async fn leave_frees_idle_room() {
        let dispatcher = Dispatcher::new();
        let board = Uuid::new_v4();
        let conn = Uuid::new_v4();

        let rx = dispatcher.subscribe(board).await;
        dispatcher.announce(board, conn, entry(Uuid::new_v4())).await;
        drop(rx);
        dispatcher.leave(board, conn).await;

        assert!(dispatcher.presence(board).await.is_empty());
        assert_eq!(dispatcher.room_count().await, 0);
    }
}
