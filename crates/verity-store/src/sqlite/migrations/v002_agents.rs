//! v002: agents, reputation_history, agent_expertise, rate_limit_counters.

use crate::sqlite::codec::db_err;
use rusqlite::Connection;
use verity_core::Result;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS agents (
            id                     TEXT PRIMARY KEY,
            username               TEXT NOT NULL UNIQUE,
            display_name           TEXT,
            reputation_score       REAL NOT NULL DEFAULT 0.0 CHECK (reputation_score >= 0.0),
            tier                   TEXT NOT NULL DEFAULT 'new',
            evidence_per_day       INTEGER NOT NULL,
            votes_per_day          INTEGER NOT NULL,
            learning_score         REAL NOT NULL DEFAULT 0.5,
            accuracy_rate          REAL,
            total_resolved_votes   INTEGER NOT NULL DEFAULT 0,
            correct_resolved_votes INTEGER NOT NULL DEFAULT 0,
            first_activity_at      TEXT,
            created_at             TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_agents_reputation ON agents(reputation_score DESC);
        CREATE INDEX IF NOT EXISTS idx_agents_tier ON agents(tier);

        CREATE TABLE IF NOT EXISTS reputation_history (
            id              TEXT PRIMARY KEY,
            agent_id        TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
            previous_score  REAL NOT NULL,
            new_score       REAL NOT NULL,
            delta           REAL NOT NULL,
            requested_delta REAL NOT NULL,
            reason          TEXT NOT NULL,
            reference_id    TEXT,
            reference_type  TEXT,
            notes           TEXT,
            recorded_at     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reputation_history_agent
            ON reputation_history(agent_id, recorded_at);

        CREATE TABLE IF NOT EXISTS agent_expertise (
            agent_id         TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
            tag              TEXT NOT NULL,
            engagement_count INTEGER NOT NULL DEFAULT 0,
            accuracy_in_tag  REAL,
            last_activity_at TEXT NOT NULL,
            PRIMARY KEY (agent_id, tag)
        );

        CREATE TABLE IF NOT EXISTS rate_limit_counters (
            agent_id TEXT NOT NULL,
            action   TEXT NOT NULL,
            day      TEXT NOT NULL,
            count    INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (agent_id, action, day)
        );
        ",
    )
    .map_err(db_err)?;
    Ok(())
}
