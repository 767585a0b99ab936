//! v003: evidence, comments, refresh_tokens, notifications.

use crate::sqlite::codec::db_err;
use rusqlite::Connection;
use verity_core::Result;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS evidence (
            id         TEXT PRIMARY KEY,
            claim_id   TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
            author_id  TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_evidence_claim ON evidence(claim_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_evidence_author ON evidence(author_id);

        CREATE TABLE IF NOT EXISTS comments (
            id         TEXT PRIMARY KEY,
            claim_id   TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
            author_id  TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_comments_claim ON comments(claim_id, created_at);

        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id         TEXT PRIMARY KEY,
            owner_id   TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            revoked    INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expiry ON refresh_tokens(expires_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id         TEXT PRIMARY KEY,
            agent_id   TEXT NOT NULL,
            kind       TEXT NOT NULL,
            payload    TEXT NOT NULL DEFAULT '{}',
            is_read    INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_agent
            ON notifications(agent_id, is_read, created_at);
        ",
    )
    .map_err(db_err)?;
    Ok(())
}
