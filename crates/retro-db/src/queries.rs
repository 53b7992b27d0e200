use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use retro_types::api::ReactionSummary;
use retro_types::models::{Board, BoardStatus, Category, Item};

use crate::error::{Result, StoreError, is_unique_violation};
use crate::models::{BOARD_COLUMNS, BoardRow, ITEM_COLUMNS, ItemRow, ts};
use crate::Database;

impl Database {
    // -- Boards --

    pub fn create_board(
        &self,
        code: &str,
        title: &str,
        owner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Board> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO boards (id, code, title, owner_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
                params![id.to_string(), code, title, owner_id.to_string(), ts(now)],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::CodeTaken
                } else {
                    e.into()
                }
            })?;
            query_board(conn, id)?.ok_or(StoreError::NotFound("board"))
        })
    }

    pub fn get_board(&self, id: Uuid) -> Result<Option<Board>> {
        self.with_conn(|conn| query_board(conn, id))
    }

    pub fn get_board_by_code(&self, code: &str) -> Result<Option<Board>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM boards WHERE code = ?1", BOARD_COLUMNS);
            conn.query_row(&sql, [code], BoardRow::from_row)
                .optional()?
                .map(Board::try_from)
                .transpose()
        })
    }

    /// The end transition. Only flips a board that is still active, so
    /// racing callers see exactly one `true`. `ended_by = None` records an
    /// automatic expiry.
    pub fn end_board_if_active(
        &self,
        id: Uuid,
        ended_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE boards SET status = 'ended', ended_at = ?2, ended_by = ?3
                 WHERE id = ?1 AND status = 'active'",
                params![id.to_string(), ts(now), ended_by.map(|u| u.to_string())],
            )?;
            if changed == 0 && query_board(conn, id)?.is_none() {
                return Err(StoreError::NotFound("board"));
            }
            Ok(changed == 1)
        })
    }

    /// Active boards created at or before `cutoff`.
    pub fn overdue_boards(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM boards WHERE status = 'active' AND created_at <= ?1",
            )?;
            let ids = stmt
                .query_map([ts(cutoff)], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.iter()
                .map(|id| {
                    id.parse()
                        .map_err(|e| StoreError::Corrupt(format!("uuid '{}': {}", id, e)))
                })
                .collect()
        })
    }

    // -- Items --

    /// Persist a note into an active board. A repeated `client_token`
    /// returns the row stored by the first call.
    pub fn insert_item(
        &self,
        board_id: Uuid,
        client_token: Option<Uuid>,
        author_id: Uuid,
        content: &str,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Item> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(token) = client_token {
                let sql = format!("SELECT {} FROM items WHERE client_token = ?1", ITEM_COLUMNS);
                let existing = tx
                    .query_row(&sql, [token.to_string()], ItemRow::from_row)
                    .optional()?;
                if let Some(row) = existing {
                    let item = Item::try_from(row)?;
                    if item.author_id != author_id || item.board_id != board_id {
                        return Err(StoreError::NotAuthor);
                    }
                    debug!("Item {} already stored for token {}", item.id, token);
                    return Ok(item);
                }
            }

            match query_board_status(&tx, board_id)? {
                None => return Err(StoreError::NotFound("board")),
                Some(BoardStatus::Ended) => return Err(StoreError::BoardEnded),
                Some(BoardStatus::Active) => {}
            }

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO items (id, client_token, board_id, content, category, author_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    id.to_string(),
                    client_token.map(|t| t.to_string()),
                    board_id.to_string(),
                    content,
                    category.as_str(),
                    author_id.to_string(),
                    ts(now),
                ],
            )?;
            let item = query_item(&tx, id)?.ok_or(StoreError::NotFound("item"))?;
            tx.commit()?;
            Ok(item)
        })
    }

    pub fn get_item(&self, id: Uuid) -> Result<Option<Item>> {
        self.with_conn(|conn| query_item(conn, id))
    }

    pub fn list_items(&self, board_id: Uuid) -> Result<Vec<Item>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM items WHERE board_id = ?1 ORDER BY created_at, rowid",
                ITEM_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([board_id.to_string()], ItemRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Item::try_from).collect()
        })
    }

    /// Author-scoped edit. The statement itself enforces author and board
    /// status; a miss is diagnosed afterwards for the error message.
    pub fn update_item(
        &self,
        id: Uuid,
        author_id: Uuid,
        content: &str,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Item> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE items SET content = ?3, category = ?4, updated_at = ?5
                 WHERE id = ?1 AND author_id = ?2
                   AND board_id IN (SELECT id FROM boards WHERE status = 'active')",
                params![
                    id.to_string(),
                    author_id.to_string(),
                    content,
                    category.as_str(),
                    ts(now)
                ],
            )?;
            if changed == 0 {
                return Err(diagnose_item_write(conn, id, author_id)?);
            }
            query_item(conn, id)?.ok_or(StoreError::NotFound("item"))
        })
    }

    /// Author-scoped delete. Returns the deleted item so callers can notify
    /// the board it belonged to.
    pub fn delete_item(&self, id: Uuid, author_id: Uuid) -> Result<Item> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let item = query_item(&tx, id)?.ok_or(StoreError::NotFound("item"))?;
            let changed = tx.execute(
                "DELETE FROM items
                 WHERE id = ?1 AND author_id = ?2
                   AND board_id IN (SELECT id FROM boards WHERE status = 'active')",
                params![id.to_string(), author_id.to_string()],
            )?;
            if changed == 0 {
                return Err(diagnose_item_write(&tx, id, author_id)?);
            }
            tx.commit()?;
            Ok(item)
        })
    }

    // -- Reactions --

    /// Like an item. Returns `(changed, count)`; an existing like is a
    /// successful no-op with `changed = false`.
    pub fn like(&self, item_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<(bool, u32)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            ensure_item_open(&tx, item_id)?;
            let changed = match tx.execute(
                "INSERT INTO reactions (item_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![item_id.to_string(), user_id.to_string(), ts(now)],
            ) {
                Ok(_) => true,
                Err(e) if is_unique_violation(&e) => {
                    debug!("Duplicate like on {} by {} ignored", item_id, user_id);
                    false
                }
                Err(e) => return Err(e.into()),
            };
            let count = query_reaction_count(&tx, item_id)?;
            tx.commit()?;
            Ok((changed, count))
        })
    }

    /// Remove a like. Returns `(changed, count)`.
    pub fn unlike(&self, item_id: Uuid, user_id: Uuid) -> Result<(bool, u32)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            ensure_item_open(&tx, item_id)?;
            let changed = tx.execute(
                "DELETE FROM reactions WHERE item_id = ?1 AND user_id = ?2",
                params![item_id.to_string(), user_id.to_string()],
            )?;
            let count = query_reaction_count(&tx, item_id)?;
            tx.commit()?;
            Ok((changed > 0, count))
        })
    }

    pub fn item_reactions(&self, item_id: Uuid, viewer: Uuid) -> Result<ReactionSummary> {
        self.with_conn(|conn| {
            if query_item(conn, item_id)?.is_none() {
                return Err(StoreError::NotFound("item"));
            }
            let count = query_reaction_count(conn, item_id)?;
            let liked = conn
                .query_row(
                    "SELECT 1 FROM reactions WHERE item_id = ?1 AND user_id = ?2",
                    params![item_id.to_string(), viewer.to_string()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(ReactionSummary { item_id, count, liked })
        })
    }

    /// Like counts for every liked item on a board, from `viewer`'s perspective.
    pub fn board_reactions(&self, board_id: Uuid, viewer: Uuid) -> Result<Vec<ReactionSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT i.id, COUNT(r.user_id), SUM(CASE WHEN r.user_id = ?2 THEN 1 ELSE 0 END)
                 FROM items i
                 JOIN reactions r ON r.item_id = i.id
                 WHERE i.board_id = ?1
                 GROUP BY i.id",
            )?;
            let rows = stmt
                .query_map(params![board_id.to_string(), viewer.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, count, mine)| {
                    let item_id = id
                        .parse()
                        .map_err(|e| StoreError::Corrupt(format!("uuid '{}': {}", id, e)))?;
                    Ok(ReactionSummary {
                        item_id,
                        count,
                        liked: mine > 0,
                    })
                })
                .collect()
        })
    }
}

fn query_board(conn: &Connection, id: Uuid) -> Result<Option<Board>> {
    let sql = format!("SELECT {} FROM boards WHERE id = ?1", BOARD_COLUMNS);
    conn.query_row(&sql, [id.to_string()], BoardRow::from_row)
        .optional()?
        .map(Board::try_from)
        .transpose()
}

fn query_board_status(conn: &Connection, id: Uuid) -> Result<Option<BoardStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM boards WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    status
        .map(|s| s.parse().map_err(StoreError::Corrupt))
        .transpose()
}

fn query_item(conn: &Connection, id: Uuid) -> Result<Option<Item>> {
    let sql = format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS);
    conn.query_row(&sql, [id.to_string()], ItemRow::from_row)
        .optional()?
        .map(Item::try_from)
        .transpose()
}

fn query_reaction_count(conn: &Connection, item_id: Uuid) -> Result<u32> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM reactions WHERE item_id = ?1",
        [item_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Item exists and its board still accepts writes.
fn ensure_item_open(conn: &Connection, item_id: Uuid) -> Result<()> {
    let status: Option<String> = conn
        .query_row(
            "SELECT b.status FROM items i JOIN boards b ON b.id = i.board_id WHERE i.id = ?1",
            [item_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match status.as_deref() {
        None => Err(StoreError::NotFound("item")),
        Some("active") => Ok(()),
        Some(_) => Err(StoreError::BoardEnded),
    }
}

/// Explain why an author-scoped write touched zero rows.
fn diagnose_item_write(conn: &Connection, id: Uuid, author_id: Uuid) -> Result<StoreError> {
    if let Err(e) = ensure_item_open(conn, id) {
        return Ok(e);
    }
    let item = query_item(conn, id)?.ok_or(StoreError::NotFound("item"))?;
    if item.author_id != author_id {
        Ok(StoreError::NotAuthor)
    } else {
        Ok(StoreError::Corrupt(format!("write to item {} matched no rows", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn setup() -> (Database, Board, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let board = db
            .create_board("ABC123", "Sprint 42", owner, Utc::now())
            .unwrap();
        (db, board, owner)
    }

    #[test]
    fn create_board_rejects_duplicate_code() {
        let (db, _, owner) = setup();
        let err = db
            .create_board("ABC123", "Other", owner, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::CodeTaken));
    }

    #[test]
    fn board_round_trips_by_code() {
        let (db, board, _) = setup();
        let found = db.get_board_by_code("ABC123").unwrap().unwrap();
        assert_eq!(found, board);
        assert!(found.is_active());
        assert!(db.get_board_by_code("NOPE00").unwrap().is_none());
    }

    #[test]
    fn insert_with_same_token_is_idempotent() {
        let (db, board, author) = setup();
        let token = Uuid::new_v4();
        let first = db
            .insert_item(board.id, Some(token), author, "Great sprint!", Category::Glad, Utc::now())
            .unwrap();
        let second = db
            .insert_item(board.id, Some(token), author, "Great sprint!", Category::Glad, Utc::now())
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(db.list_items(board.id).unwrap().len(), 1);
    }

    #[test]
    fn writes_on_ended_board_are_rejected() {
        let (db, board, author) = setup();
        let item = db
            .insert_item(board.id, None, author, "before", Category::Sad, Utc::now())
            .unwrap();
        assert!(db.end_board_if_active(board.id, None, Utc::now()).unwrap());

        let insert = db.insert_item(board.id, None, author, "after", Category::Sad, Utc::now());
        assert!(matches!(insert, Err(StoreError::BoardEnded)));

        let update = db.update_item(item.id, author, "edited", Category::Sad, Utc::now());
        assert!(matches!(update, Err(StoreError::BoardEnded)));

        assert!(matches!(db.delete_item(item.id, author), Err(StoreError::BoardEnded)));
        assert!(matches!(db.like(item.id, author, Utc::now()), Err(StoreError::BoardEnded)));
        assert_eq!(db.get_item(item.id).unwrap().unwrap().content, "before");
    }

    #[test]
    fn only_author_may_update_or_delete() {
        let (db, board, author) = setup();
        let stranger = Uuid::new_v4();
        let item = db
            .insert_item(board.id, None, author, "mine", Category::Mad, Utc::now())
            .unwrap();

        let update = db.update_item(item.id, stranger, "hijack", Category::Mad, Utc::now());
        assert!(matches!(update, Err(StoreError::NotAuthor)));
        assert!(matches!(db.delete_item(item.id, stranger), Err(StoreError::NotAuthor)));

        let edited = db
            .update_item(item.id, author, "still mine", Category::Action, Utc::now())
            .unwrap();
        assert_eq!(edited.content, "still mine");
        assert_eq!(edited.category, Category::Action);

        db.delete_item(item.id, author).unwrap();
        assert!(db.get_item(item.id).unwrap().is_none());
        assert!(matches!(
            db.update_item(item.id, author, "gone", Category::Glad, Utc::now()),
            Err(StoreError::NotFound("item"))
        ));
    }

    #[test]
    fn duplicate_like_is_a_successful_noop() {
        let (db, board, author) = setup();
        let fan = Uuid::new_v4();
        let item = db
            .insert_item(board.id, None, author, "liked", Category::Glad, Utc::now())
            .unwrap();

        assert_eq!(db.like(item.id, fan, Utc::now()).unwrap(), (true, 1));
        assert_eq!(db.like(item.id, fan, Utc::now()).unwrap(), (false, 1));
        assert_eq!(db.like(item.id, author, Utc::now()).unwrap(), (true, 2));

        let summary = db.item_reactions(item.id, fan).unwrap();
        assert_eq!(summary.count, 2);
        assert!(summary.liked);

        assert_eq!(db.unlike(item.id, fan).unwrap(), (true, 1));
        assert_eq!(db.unlike(item.id, fan).unwrap(), (false, 1));

        let board_view = db.board_reactions(board.id, fan).unwrap();
        assert_eq!(
            board_view,
            vec![ReactionSummary { item_id: item.id, count: 1, liked: false }]
        );
    }

    #[test]
    fn deleting_item_drops_its_reactions() {
        let (db, board, author) = setup();
        let item = db
            .insert_item(board.id, None, author, "bye", Category::Glad, Utc::now())
            .unwrap();
        db.like(item.id, author, Utc::now()).unwrap();
        db.delete_item(item.id, author).unwrap();
        assert!(db.board_reactions(board.id, author).unwrap().is_empty());
    }

    #[test]
    fn racing_expiry_transitions_exactly_once() {
        let (db, board, _) = setup();
        let db = Arc::new(db);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.end_board_if_active(board.id, None, Utc::now()).unwrap())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
        let ended = db.get_board(board.id).unwrap().unwrap();
        assert_eq!(ended.status, BoardStatus::Ended);
        assert!(ended.ended_at.is_some());
        assert_eq!(ended.ended_by, None);
    }

    #[test]
    fn manual_end_records_who_ended_it() {
        let (db, board, owner) = setup();
        assert!(db.end_board_if_active(board.id, Some(owner), Utc::now()).unwrap());
        assert!(!db.end_board_if_active(board.id, None, Utc::now()).unwrap());
        assert_eq!(db.get_board(board.id).unwrap().unwrap().ended_by, Some(owner));
    }

    #[test]
    fn overdue_boards_respects_cutoff() {
        let db = Database::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let old = db
            .create_board("OLD001", "old", owner, Utc::now() - chrono::Duration::hours(3))
            .unwrap();
        db.create_board("NEW001", "new", owner, Utc::now()).unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(2);
        assert_eq!(db.overdue_boards(cutoff).unwrap(), vec![old.id]);
    }
}
