use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS boards (
            id          TEXT PRIMARY KEY,
            code        TEXT NOT NULL UNIQUE,
            title       TEXT NOT NULL,
            owner_id    TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'active'
                        CHECK (status IN ('active', 'ended')),
            created_at  TEXT NOT NULL,
            ended_at    TEXT,
            ended_by    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_boards_status
            ON boards(status, created_at);

        CREATE TABLE IF NOT EXISTS items (
            id              TEXT PRIMARY KEY,
            client_token    TEXT UNIQUE,
            board_id        TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
            content         TEXT NOT NULL,
            category        TEXT NOT NULL,
            author_id       TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_items_board
            ON items(board_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            item_id     TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (item_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
