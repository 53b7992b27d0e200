use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Board, Item, PresenceEntry};

/// Events sent over a board's WebSocket channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server accepted the connection for this board
    Ready { user_id: Uuid, board_id: Uuid },

    /// A note was persisted
    ItemCreate { item: Item },

    /// A note's content or category was persisted
    ItemUpdate { item: Item },

    /// A note was deleted by its author
    ItemDelete { board_id: Uuid, item_id: Uuid },

    /// A like was added or removed. `count` is the authoritative total after the write.
    ReactionUpdate {
        item_id: Uuid,
        user_id: Uuid,
        liked: bool,
        count: u32,
    },

    /// Board metadata changed (only the end transition today)
    BoardUpdate { board: Board },

    /// Ephemeral peer signal, never persisted
    Broadcast { signal: Signal },

    /// Full set of participants currently connected to the board
    PresenceSync { entries: Vec<PresenceEntry> },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Announce this connection in the board's presence set
    Announce { joined_at: chrono::DateTime<chrono::Utc> },

    /// Relay an ephemeral signal to every other connection on the board
    Broadcast { signal: Signal },
}

/// Fire-and-forget signals relayed between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Signal {
    Typing { item_id: Uuid, user_id: Uuid },
    TypingStopped { item_id: Uuid, user_id: Uuid },
    ReactionIntent { item_id: Uuid, user_id: Uuid, liked: bool },
    Celebrate { user_id: Uuid, effect: String },
}

impl Signal {
    pub fn user_id(&self) -> Uuid {
        match self {
            Self::Typing { user_id, .. }
            | Self::TypingStopped { user_id, .. }
            | Self::ReactionIntent { user_id, .. }
            | Self::Celebrate { user_id, .. } => *user_id,
        }
    }

    /// Replace the sender with `user_id`. The gateway stamps the
    /// authenticated identity so peers cannot spoof each other.
    pub fn with_sender(mut self, sender: Uuid) -> Self {
        match &mut self {
            Self::Typing { user_id, .. }
            | Self::TypingStopped { user_id, .. }
            | Self::ReactionIntent { user_id, .. }
            | Self::Celebrate { user_id, .. } => *user_id = sender,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_wire_shape_is_tagged() {
        let item_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let event = GatewayEvent::Broadcast {
            signal: Signal::Typing { item_id, user_id },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Broadcast");
        assert_eq!(json["data"]["signal"]["kind"], "Typing");
        assert_eq!(json["data"]["signal"]["item_id"], item_id.to_string());
    }

    #[test]
    fn with_sender_overwrites_claimed_identity() {
        let real = Uuid::new_v4();
        let spoofed = Signal::ReactionIntent {
            item_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            liked: true,
        };

        assert_eq!(spoofed.with_sender(real).user_id(), real);
    }
}
