use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Board, BoardStatus, Category, Item};

// -- JWT Claims --

/// Claims issued by the identity provider. The server only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Boards --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateBoardRequest {
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpireResponse {
    /// True only for the caller whose conditional write ended the board.
    pub transitioned: bool,
    pub board: Board,
}

/// Everything a client needs to render a board from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub board: Board,
    pub items: Vec<Item>,
    pub reactions: Vec<ReactionSummary>,
}

// -- Items --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateItemRequest {
    pub client_token: Option<Uuid>,
    pub content: String,
    pub category: Category,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateItemRequest {
    pub content: String,
    pub category: Category,
}

// -- Reactions --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub item_id: Uuid,
    pub count: u32,
    /// Whether the requesting user is among the likers.
    pub liked: bool,
}

// -- Summary export --

/// Read-only digest handed to invitation/email/export collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSummary {
    pub board_id: Uuid,
    pub title: String,
    pub status: BoardStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub items: Vec<SummaryItem>,
}

impl BoardSummary {
    /// Build a digest from a board and its notes with their like counts.
    pub fn new<'a>(board: &Board, items: impl IntoIterator<Item = (&'a Item, u32)>) -> Self {
        let mut items: Vec<SummaryItem> = items
            .into_iter()
            .map(|(item, likes)| SummaryItem {
                content: item.content.clone(),
                category: item.category,
                author_id: item.author_id,
                likes,
                created_at: item.created_at,
            })
            .collect();
        items.sort_by_key(|i| (i.category, i.created_at));

        Self {
            board_id: board.id,
            title: board.title.clone(),
            status: board.status,
            created_at: board.created_at,
            ended_at: board.ended_at,
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryItem {
    pub content: String,
    pub category: Category,
    pub author_id: Uuid,
    pub likes: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Errors --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionEnded,
    Forbidden,
    NotFound,
    Invalid,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}
