//! v001: claims, claim_votes, gradient_history.

use crate::sqlite::codec::db_err;
use rusqlite::Connection;
use verity_core::Result;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS claims (
            id             TEXT PRIMARY KEY,
            author_id      TEXT NOT NULL,
            statement      TEXT NOT NULL,
            gradient       REAL NOT NULL DEFAULT 0.5 CHECK (gradient >= 0.0 AND gradient <= 1.0),
            vote_count     INTEGER NOT NULL DEFAULT 0,
            evidence_count INTEGER NOT NULL DEFAULT 0,
            tags           TEXT NOT NULL DEFAULT '[]',
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            resolved_at    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_claims_created ON claims(created_at);
        CREATE INDEX IF NOT EXISTS idx_claims_author ON claims(author_id);
        CREATE INDEX IF NOT EXISTS idx_claims_consensus ON claims(vote_count, updated_at);

        CREATE TABLE IF NOT EXISTS claim_votes (
            claim_id   TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
            agent_id   TEXT NOT NULL,
            value      REAL NOT NULL CHECK (value >= 0.0 AND value <= 1.0),
            weight     REAL NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (claim_id, agent_id)
        );

        CREATE INDEX IF NOT EXISTS idx_votes_agent ON claim_votes(agent_id, created_at);

        CREATE TABLE IF NOT EXISTS gradient_history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            claim_id    TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
            gradient    REAL NOT NULL,
            vote_count  INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_gradient_history_claim
            ON gradient_history(claim_id, recorded_at);
        ",
    )
    .map_err(db_err)?;
    Ok(())
}
