//! Versioned schema migrations, applied in order on open.

mod v001_claims;
mod v002_agents;
mod v003_activity;

use super::codec::db_err;
use rusqlite::{params, Connection};
use verity_core::Result;

type Migration = fn(&Connection) -> Result<()>;

const MIGRATIONS: &[(u32, &str, Migration)] = &[
    (1, "claims", v001_claims::migrate),
    (2, "agents", v002_agents::migrate),
    (3, "activity", v003_activity::migrate),
];

/// Bring the schema up to date. Returns the resulting version.
pub fn run_migrations(conn: &mut Connection) -> Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )
    .map_err(db_err)?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(db_err)?;

    let mut version = current;
    for (v, name, migrate) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        let tx = conn.transaction().map_err(db_err)?;
        migrate(&*tx)?;
        tx.execute(
            "INSERT INTO schema_version (version, name) VALUES (?1, ?2)",
            params![v, name],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        tracing::info!(version = v, name, "applied migration");
        version = *v;
    }
    Ok(version)
}

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |(v, _, _)| *v)
}
