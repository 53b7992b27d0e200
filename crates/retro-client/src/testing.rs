//! In-memory [`BoardStore`] with configurable latency and injected
//! failures, shared by the engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use retro_types::api::{BoardSnapshot, ExpireResponse, ReactionSummary};
use retro_types::models::{Board, BoardStatus, Category, Item};

use crate::error::SyncError;
use crate::store::BoardStore;

#[derive(Default)]
struct State {
    boards: HashMap<Uuid, Board>,
    items: Vec<Item>,
    reactions: HashSet<(Uuid, Uuid)>,
    fail_next: Option<SyncError>,
    calls: Vec<&'static str>,
    transitions: usize,
}

impl State {
    fn active_board(&self, board_id: Uuid) -> Result<&Board, SyncError> {
        let board = self
            .boards
            .get(&board_id)
            .ok_or_else(|| SyncError::NotFound("board".into()))?;
        if board.is_active() {
            Ok(board)
        } else {
            Err(SyncError::SessionEnded)
        }
    }

    fn item_position(&self, item_id: Uuid) -> Result<usize, SyncError> {
        self.items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| SyncError::NotFound("item".into()))
    }

    fn open_item(&self, item_id: Uuid) -> Result<usize, SyncError> {
        let pos = self.item_position(item_id)?;
        self.active_board(self.items[pos].board_id)?;
        Ok(pos)
    }

    fn summary(&self, item_id: Uuid, user_id: Uuid) -> ReactionSummary {
        ReactionSummary {
            item_id,
            count: self.reactions.iter().filter(|(i, _)| *i == item_id).count() as u32,
            liked: self.reactions.contains(&(item_id, user_id)),
        }
    }

    fn end(&mut self, board_id: Uuid, ended_by: Option<Uuid>) -> Result<ExpireResponse, SyncError> {
        let board = self
            .boards
            .get_mut(&board_id)
            .ok_or_else(|| SyncError::NotFound("board".into()))?;
        let transitioned = board.is_active();
        if transitioned {
            board.status = BoardStatus::Ended;
            board.ended_at = Some(Utc::now());
            board.ended_by = ended_by;
            self.transitions += 1;
        }
        Ok(ExpireResponse {
            transitioned,
            board: board.clone(),
        })
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    latency: Duration,
    ttl: Duration,
}

impl MemoryStore {
    pub fn new(latency: Duration, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            latency,
            ttl,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_board(&self, owner_id: Uuid, created_at: DateTime<Utc>) -> Board {
        let board = Board {
            id: Uuid::new_v4(),
            code: "RETRO2".into(),
            title: "Sprint retro".into(),
            owner_id,
            status: BoardStatus::Active,
            created_at,
            ended_at: None,
            ended_by: None,
        };
        self.lock().boards.insert(board.id, board.clone());
        board
    }

    /// A note written by someone else, bypassing any engine.
    pub fn add_item(&self, board_id: Uuid, author_id: Uuid, content: &str) -> Item {
        let now = Utc::now();
        let item = Item {
            id: Uuid::new_v4(),
            client_token: None,
            board_id,
            content: content.into(),
            category: Category::Glad,
            author_id,
            created_at: now,
            updated_at: now,
        };
        self.lock().items.push(item.clone());
        item
    }

    pub fn end_now(&self, board_id: Uuid, ended_by: Uuid) {
        let _ = self.lock().end(board_id, Some(ended_by));
    }

    pub fn fail_next(&self, error: SyncError) {
        self.lock().fail_next = Some(error);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn transitions(&self) -> usize {
        self.lock().transitions
    }

    pub fn board(&self, board_id: Uuid) -> Board {
        self.lock().boards[&board_id].clone()
    }

    pub fn items(&self) -> Vec<Item> {
        self.lock().items.clone()
    }

    /// A like written by someone else, bypassing any engine.
    pub fn add_like(&self, item_id: Uuid, user_id: Uuid) {
        self.lock().reactions.insert((item_id, user_id));
    }

    pub fn remove_like(&self, item_id: Uuid, user_id: Uuid) {
        self.lock().reactions.remove(&(item_id, user_id));
    }

    pub fn is_liked(&self, item_id: Uuid, user_id: Uuid) -> bool {
        self.lock().reactions.contains(&(item_id, user_id))
    }

    /// Apply the write, then simulate the response leg of the round trip.
    async fn call<T>(
        &self,
        name: &'static str,
        op: impl FnOnce(&mut State) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let result = {
            let mut state = self.lock();
            state.calls.push(name);
            match state.fail_next.take() {
                Some(error) => Err(error),
                None => op(&mut state),
            }
        };
        tokio::time::sleep(self.latency).await;
        result
    }
}

#[async_trait]
impl BoardStore for MemoryStore {
    async fn snapshot(&self, board_id: Uuid, viewer: Uuid) -> Result<BoardSnapshot, SyncError> {
        // Reads never consume injected failures
        let snapshot = {
            let state = self.lock();
            let board = state
                .boards
                .get(&board_id)
                .cloned()
                .ok_or_else(|| SyncError::NotFound("board".into()))?;
            let items: Vec<Item> = state
                .items
                .iter()
                .filter(|i| i.board_id == board_id)
                .cloned()
                .collect();
            let reactions = items
                .iter()
                .map(|i| state.summary(i.id, viewer))
                .filter(|s| s.count > 0)
                .collect();
            BoardSnapshot {
                board,
                reactions,
                items,
            }
        };
        tokio::time::sleep(self.latency).await;
        Ok(snapshot)
    }

    async fn create_item(
        &self,
        board_id: Uuid,
        client_token: Uuid,
        author_id: Uuid,
        content: String,
        category: Category,
    ) -> Result<Item, SyncError> {
        self.call("create_item", move |state| {
            state.active_board(board_id)?;
            if let Some(existing) = state.items.iter().find(|i| i.client_token == Some(client_token)) {
                return Ok(existing.clone());
            }
            let now = Utc::now();
            let item = Item {
                id: Uuid::new_v4(),
                client_token: Some(client_token),
                board_id,
                content,
                category,
                author_id,
                created_at: now,
                updated_at: now,
            };
            state.items.push(item.clone());
            Ok(item)
        })
        .await
    }

    async fn update_item(
        &self,
        item_id: Uuid,
        author_id: Uuid,
        content: String,
        category: Category,
    ) -> Result<Item, SyncError> {
        self.call("update_item", move |state| {
            let pos = state.open_item(item_id)?;
            let item = &mut state.items[pos];
            if item.author_id != author_id {
                return Err(SyncError::Unauthorized("not the author".into()));
            }
            item.content = content;
            item.category = category;
            item.updated_at = Utc::now();
            Ok(item.clone())
        })
        .await
    }

    async fn delete_item(&self, item_id: Uuid, author_id: Uuid) -> Result<(), SyncError> {
        self.call("delete_item", move |state| {
            let pos = state.open_item(item_id)?;
            if state.items[pos].author_id != author_id {
                return Err(SyncError::Unauthorized("not the author".into()));
            }
            state.items.remove(pos);
            state.reactions.retain(|(i, _)| *i != item_id);
            Ok(())
        })
        .await
    }

    async fn like(&self, item_id: Uuid, user_id: Uuid) -> Result<ReactionSummary, SyncError> {
        self.call("like", move |state| {
            state.open_item(item_id)?;
            state.reactions.insert((item_id, user_id));
            Ok(state.summary(item_id, user_id))
        })
        .await
    }

    async fn unlike(&self, item_id: Uuid, user_id: Uuid) -> Result<ReactionSummary, SyncError> {
        self.call("unlike", move |state| {
            state.open_item(item_id)?;
            state.reactions.remove(&(item_id, user_id));
            Ok(state.summary(item_id, user_id))
        })
        .await
    }

    async fn item_reactions(&self, item_id: Uuid, user_id: Uuid) -> Result<ReactionSummary, SyncError> {
        let summary = self.lock().summary(item_id, user_id);
        tokio::time::sleep(self.latency).await;
        Ok(summary)
    }

    async fn expire_board(&self, board_id: Uuid) -> Result<ExpireResponse, SyncError> {
        let ttl = self.ttl;
        self.call("expire_board", move |state| {
            let board = state
                .boards
                .get(&board_id)
                .ok_or_else(|| SyncError::NotFound("board".into()))?;
            if board.is_active() && !board.is_overdue(Utc::now(), ttl) {
                return Ok(ExpireResponse {
                    transitioned: false,
                    board: board.clone(),
                });
            }
            state.end(board_id, None)
        })
        .await
    }

    async fn end_board(&self, board_id: Uuid, user_id: Uuid) -> Result<ExpireResponse, SyncError> {
        self.call("end_board", move |state| {
            let board = state
                .boards
                .get(&board_id)
                .ok_or_else(|| SyncError::NotFound("board".into()))?;
            if board.owner_id != user_id {
                return Err(SyncError::Unauthorized("only the owner can end the board".into()));
            }
            state.end(board_id, Some(user_id))
        })
        .await
    }
}
