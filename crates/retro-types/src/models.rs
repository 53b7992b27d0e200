use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardStatus {
    Active,
    Ended,
}

impl BoardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl FromStr for BoardStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            other => Err(format!("unknown board status '{}'", other)),
        }
    }
}

/// A time-boxed retrospective session.
///
/// `ended_by = None` on an ended board means the expiry enforcer closed it,
/// not a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub owner_id: Uuid,
    pub status: BoardStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_by: Option<Uuid>,
}

impl Board {
    pub fn is_active(&self) -> bool {
        self.status == BoardStatus::Active
    }

    /// Instant after which the board may be expired.
    pub fn expires_at(&self, ttl: std::time::Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        self.is_active() && now >= self.expires_at(ttl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Glad,
    Sad,
    Mad,
    Action,
}

impl Category {
    pub const ALL: [Category; 4] = [Self::Glad, Self::Sad, Self::Mad, Self::Action];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Glad => "glad",
            Self::Sad => "sad",
            Self::Mad => "mad",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

/// A note as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    /// Identity token minted by the creating client and echoed back by the
    /// store. Absent for items created through other paths.
    pub client_token: Option<Uuid>,
    pub board_id: Uuid,
    pub content: String,
    pub category: Category,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Presence of a row means `user_id` likes `item_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub item_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Live participant, held only in the channel's memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}
