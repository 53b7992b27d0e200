//! Database row types. These map directly to SQLite rows and are converted
//! into `retro_types` models at the crate boundary.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;

use retro_types::models::{Board, Item};

use crate::error::StoreError;

pub const BOARD_COLUMNS: &str =
    "id, code, title, owner_id, status, created_at, ended_at, ended_by";

pub const ITEM_COLUMNS: &str =
    "id, client_token, board_id, content, category, author_id, created_at, updated_at";

pub struct BoardRow {
    pub id: String,
    pub code: String,
    pub title: String,
    pub owner_id: String,
    pub status: String,
    pub created_at: String,
    pub ended_at: Option<String>,
    pub ended_by: Option<String>,
}

impl BoardRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            code: row.get(1)?,
            title: row.get(2)?,
            owner_id: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            ended_at: row.get(6)?,
            ended_by: row.get(7)?,
        })
    }
}

impl TryFrom<BoardRow> for Board {
    type Error = StoreError;

    fn try_from(row: BoardRow) -> Result<Self, Self::Error> {
        Ok(Board {
            id: parse_uuid(&row.id)?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            owner_id: parse_uuid(&row.owner_id)?,
            created_at: parse_ts(&row.created_at)?,
            ended_at: row.ended_at.as_deref().map(parse_ts).transpose()?,
            ended_by: row.ended_by.as_deref().map(parse_uuid).transpose()?,
            code: row.code,
            title: row.title,
        })
    }
}

pub struct ItemRow {
    pub id: String,
    pub client_token: Option<String>,
    pub board_id: String,
    pub content: String,
    pub category: String,
    pub author_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ItemRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            client_token: row.get(1)?,
            board_id: row.get(2)?,
            content: row.get(3)?,
            category: row.get(4)?,
            author_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl TryFrom<ItemRow> for Item {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Item {
            id: parse_uuid(&row.id)?,
            client_token: row.client_token.as_deref().map(parse_uuid).transpose()?,
            board_id: parse_uuid(&row.board_id)?,
            category: row.category.parse().map_err(StoreError::Corrupt)?,
            author_id: parse_uuid(&row.author_id)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            content: row.content,
        })
    }
}

/// Fixed-width RFC 3339 so text comparison in SQL orders chronologically.
pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("uuid '{}': {}", raw, e)))
}
