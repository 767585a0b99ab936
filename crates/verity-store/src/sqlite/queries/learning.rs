//! Resolved votes, per-tag expertise, rate-limit counters.

use rusqlite::{params, Connection, OptionalExtension, Row};
use verity_core::{ActionType, AgentExpertise, AgentId, ResolvedVote, Result};

use crate::sqlite::codec::{db_err, ts, ts_at, uuid_at};

fn expertise_from_row(row: &Row<'_>) -> rusqlite::Result<AgentExpertise> {
    Ok(AgentExpertise {
        agent_id: uuid_at(row, 0)?.into(),
        tag: row.get(1)?,
        engagement_count: row.get(2)?,
        accuracy_in_tag: row.get(3)?,
        last_activity_at: ts_at(row, 4)?,
    })
}

pub fn resolved_votes(
    conn: &Connection,
    agent: AgentId,
    since: &str,
    until: &str,
    resolved_true: f64,
    resolved_false: f64,
) -> Result<Vec<ResolvedVote>> {
    let mut stmt = conn
        .prepare(
            "SELECT v.value, c.gradient, v.created_at
             FROM claim_votes v JOIN claims c ON c.id = v.claim_id
             WHERE v.agent_id = ?1 AND v.created_at >= ?2 AND v.created_at < ?3
               AND (c.gradient > ?4 OR c.gradient < ?5)",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(
            params![agent.to_string(), since, until, resolved_true, resolved_false],
            |row| {
                Ok(ResolvedVote {
                    value: row.get(0)?,
                    gradient: row.get(1)?,
                    cast_at: ts_at(row, 2)?,
                })
            },
        )
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

pub fn observe_expertise(
    conn: &mut Connection,
    agent: AgentId,
    tag: &str,
    correct: Option<bool>,
    at: chrono::DateTime<chrono::Utc>,
) -> Result<AgentExpertise> {
    let tx = conn.transaction().map_err(db_err)?;
    let existing = tx
        .query_row(
            "SELECT agent_id, tag, engagement_count, accuracy_in_tag, last_activity_at
             FROM agent_expertise WHERE agent_id = ?1 AND tag = ?2",
            params![agent.to_string(), tag],
            expertise_from_row,
        )
        .optional()
        .map_err(db_err)?;
    let mut row = existing.unwrap_or_else(|| AgentExpertise::new(agent, tag, at));
    row.observe(correct, at);

    tx.execute(
        "INSERT INTO agent_expertise (agent_id, tag, engagement_count, accuracy_in_tag,
                                      last_activity_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (agent_id, tag) DO UPDATE SET
             engagement_count = excluded.engagement_count,
             accuracy_in_tag = excluded.accuracy_in_tag,
             last_activity_at = excluded.last_activity_at",
        params![
            agent.to_string(),
            row.tag,
            row.engagement_count,
            row.accuracy_in_tag,
            ts(row.last_activity_at),
        ],
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)?;
    Ok(row)
}

pub fn expertise(
    conn: &Connection,
    agent: AgentId,
    min_engagement: u32,
    limit: u32,
) -> Result<Vec<AgentExpertise>> {
    let mut stmt = conn
        .prepare(
            "SELECT agent_id, tag, engagement_count, accuracy_in_tag, last_activity_at
             FROM agent_expertise
             WHERE agent_id = ?1 AND engagement_count >= ?2
             ORDER BY engagement_count DESC, accuracy_in_tag IS NULL, accuracy_in_tag DESC, tag
             LIMIT ?3",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(
            params![agent.to_string(), min_engagement, limit],
            expertise_from_row,
        )
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

pub fn bump_rate_counter(
    conn: &Connection,
    agent: AgentId,
    action: ActionType,
    day: &str,
) -> Result<u32> {
    conn.query_row(
        "INSERT INTO rate_limit_counters (agent_id, action, day, count)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT (agent_id, action, day) DO UPDATE SET count = count + 1
         RETURNING count",
        params![agent.to_string(), action.as_str(), day],
        |row| row.get(0),
    )
    .map_err(db_err)
}

pub fn rate_counter(
    conn: &Connection,
    agent: AgentId,
    action: ActionType,
    day: &str,
) -> Result<u32> {
    let count = conn
        .query_row(
            "SELECT count FROM rate_limit_counters
             WHERE agent_id = ?1 AND action = ?2 AND day = ?3",
            params![agent.to_string(), action.as_str(), day],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    Ok(count.unwrap_or(0))
}
