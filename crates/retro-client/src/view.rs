use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use uuid::Uuid;

use retro_types::api::BoardSummary;
use retro_types::models::{Board, Item};

use crate::items::{ItemId, LocalItem};
use crate::reactions::ReactionState;
use crate::signals::Celebration;
use crate::transport::ConnectionState;

/// Read-only state published to the rendering layer after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardView {
    pub board: Board,
    pub items: Vec<LocalItem>,
    pub reactions: HashMap<Uuid, ReactionState>,
    pub live_count: usize,
    pub live_user_ids: Vec<Uuid>,
    /// Item id to the peers typing in it.
    pub typing: BTreeMap<Uuid, Vec<Uuid>>,
    pub celebrations: Vec<Celebration>,
    pub connection: ConnectionState,
}

impl BoardView {
    pub fn new(board: Board) -> Self {
        Self {
            board,
            items: Vec::new(),
            reactions: HashMap::new(),
            live_count: 0,
            live_user_ids: Vec::new(),
            typing: BTreeMap::new(),
            celebrations: Vec::new(),
            connection: ConnectionState::Connecting,
        }
    }

    pub fn is_ended(&self) -> bool {
        !self.board.is_active()
    }

    pub fn item(&self, id: ItemId) -> Option<&LocalItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn reaction(&self, item_id: Uuid) -> ReactionState {
        self.reactions.get(&item_id).copied().unwrap_or_default()
    }

    /// Digest for the invitation and email collaborators. Pending notes
    /// are left out.
    pub fn summary(&self) -> BoardSummary {
        let confirmed: Vec<(Item, u32)> = self
            .items
            .iter()
            .filter_map(LocalItem::to_durable)
            .map(|item| {
                let likes = self.reaction(item.id).count;
                (item, likes)
            })
            .collect();
        BoardSummary::new(&self.board, confirmed.iter().map(|(item, likes)| (item, *likes)))
    }
}
