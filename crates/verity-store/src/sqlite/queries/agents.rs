//! Agents, the reputation ledger, leaderboard reads.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use verity_core::{
    Agent, AgentId, AuthoredCounts, Error, Reference, ReferenceType, ReputationChange,
    ReputationHistoryEntry, ReputationOutcome, Result, Tier,
};

use crate::sqlite::codec::{
    count_at, db_err, enum_at, opt_ts_at, opt_uuid_at, placeholders, ts, ts_at, uuid_at,
};

const AGENT_COLUMNS: &str = "id, username, display_name, reputation_score, tier, \
     evidence_per_day, votes_per_day, learning_score, accuracy_rate, total_resolved_votes, \
     correct_resolved_votes, first_activity_at, created_at";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: uuid_at(row, 0)?.into(),
        username: row.get(1)?,
        display_name: row.get(2)?,
        reputation_score: row.get(3)?,
        tier: enum_at(row, 4)?,
        evidence_per_day: row.get(5)?,
        votes_per_day: row.get(6)?,
        learning_score: row.get(7)?,
        accuracy_rate: row.get(8)?,
        total_resolved_votes: row.get(9)?,
        correct_resolved_votes: row.get(10)?,
        first_activity_at: opt_ts_at(row, 11)?,
        created_at: ts_at(row, 12)?,
    })
}

fn ledger_from_row(row: &Row<'_>) -> rusqlite::Result<ReputationHistoryEntry> {
    let reference = match (opt_uuid_at(row, 7)?, row.get::<_, Option<String>>(8)?) {
        (Some(id), Some(kind)) => Some(Reference {
            id,
            kind: kind.parse::<ReferenceType>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into())
            })?,
        }),
        _ => None,
    };
    Ok(ReputationHistoryEntry {
        id: uuid_at(row, 0)?,
        agent_id: uuid_at(row, 1)?.into(),
        previous_score: row.get(2)?,
        new_score: row.get(3)?,
        delta: row.get(4)?,
        requested_delta: row.get(5)?,
        reason: enum_at(row, 6)?,
        reference,
        notes: row.get(9)?,
        recorded_at: ts_at(row, 10)?,
    })
}

pub fn insert_agent(conn: &Connection, agent: &Agent) -> Result<()> {
    conn.execute(
        "INSERT INTO agents (id, username, display_name, reputation_score, tier,
                             evidence_per_day, votes_per_day, learning_score, accuracy_rate,
                             total_resolved_votes, correct_resolved_votes, first_activity_at,
                             created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            agent.id.to_string(),
            agent.username,
            agent.display_name,
            agent.reputation_score,
            agent.tier.as_str(),
            agent.evidence_per_day,
            agent.votes_per_day,
            agent.learning_score,
            agent.accuracy_rate,
            agent.total_resolved_votes,
            agent.correct_resolved_votes,
            agent.first_activity_at.map(ts),
            ts(agent.created_at),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn get_agent(conn: &Connection, id: AgentId) -> Result<Option<Agent>> {
    conn.query_row(
        &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
        params![id.to_string()],
        agent_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn require_agent(conn: &Connection, id: AgentId) -> Result<Agent> {
    get_agent(conn, id)?.ok_or_else(|| Error::not_found("agent", id))
}

/// Score, tier, quotas and the ledger entry land together or not at all.
pub fn apply_reputation_change(
    conn: &mut Connection,
    id: AgentId,
    change: &ReputationChange,
) -> Result<ReputationOutcome> {
    let tx = conn.transaction().map_err(db_err)?;
    let mut agent = require_agent(&tx, id)?;
    let outcome = change.apply(&mut agent);

    tx.execute(
        "UPDATE agents
         SET reputation_score = ?2, tier = ?3, evidence_per_day = ?4, votes_per_day = ?5
         WHERE id = ?1",
        params![
            id.to_string(),
            agent.reputation_score,
            agent.tier.as_str(),
            agent.evidence_per_day,
            agent.votes_per_day,
        ],
    )
    .map_err(db_err)?;

    let entry = &outcome.entry;
    tx.execute(
        "INSERT INTO reputation_history (id, agent_id, previous_score, new_score, delta,
                                         requested_delta, reason, reference_id, reference_type,
                                         notes, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.id.to_string(),
            id.to_string(),
            entry.previous_score,
            entry.new_score,
            entry.delta,
            entry.requested_delta,
            entry.reason.as_str(),
            entry.reference.map(|r| r.id.to_string()),
            entry.reference.map(|r| r.kind.as_str()),
            entry.notes,
            ts(entry.recorded_at),
        ],
    )
    .map_err(db_err)?;

    tx.commit().map_err(db_err)?;
    Ok(outcome)
}

pub fn reputation_history(
    conn: &Connection,
    id: AgentId,
    limit: u32,
) -> Result<Vec<ReputationHistoryEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, agent_id, previous_score, new_score, delta, requested_delta, reason,
                    reference_id, reference_type, notes, recorded_at
             FROM reputation_history WHERE agent_id = ?1
             ORDER BY recorded_at DESC, rowid DESC LIMIT ?2",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![id.to_string(), limit], ledger_from_row)
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

const LEADERBOARD_FILTER: &str = "(?1 IS NULL OR tier = ?1)
     AND (?2 IS NULL OR EXISTS (
         SELECT 1 FROM reputation_history h
         WHERE h.agent_id = agents.id AND h.recorded_at >= ?2))";

pub fn leaderboard(
    conn: &Connection,
    tier: Option<Tier>,
    since: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<(Vec<Agent>, u64)> {
    let tier = tier.map(Tier::as_str);
    let total = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM agents WHERE {LEADERBOARD_FILTER}"),
            params![tier, since],
            |row| count_at(row, 0),
        )
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE {LEADERBOARD_FILTER}
             ORDER BY reputation_score DESC, created_at ASC, id ASC
             LIMIT ?3 OFFSET ?4"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![tier, since, limit, offset], agent_from_row)
        .map_err(db_err)?;
    let agents = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?;
    Ok((agents, total))
}

pub fn authored_counts(
    conn: &Connection,
    agents: &[AgentId],
) -> Result<HashMap<AgentId, AuthoredCounts>> {
    let mut out = HashMap::new();
    if agents.is_empty() {
        return Ok(out);
    }
    let sql = format!(
        "SELECT a.id,
                (SELECT COUNT(*) FROM claims c WHERE c.author_id = a.id),
                (SELECT COUNT(*) FROM evidence e WHERE e.author_id = a.id)
         FROM agents a WHERE a.id IN ({})",
        placeholders(1, agents.len())
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(agents.iter().map(|a| a.to_string())), |row| {
            Ok((
                AgentId::from(uuid_at(row, 0)?),
                AuthoredCounts {
                    claims: count_at(row, 1)?,
                    evidence: count_at(row, 2)?,
                },
            ))
        })
        .map_err(db_err)?;
    for row in rows {
        let (id, counts) = row.map_err(db_err)?;
        out.insert(id, counts);
    }
    Ok(out)
}

pub fn count_agents_above(conn: &Connection, score: f64) -> Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM agents WHERE reputation_score > ?1",
        params![score],
        |row| count_at(row, 0),
    )
    .map_err(db_err)
}

pub fn count_agents(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM agents", [], |row| count_at(row, 0))
        .map_err(db_err)
}

pub fn record_resolution(conn: &mut Connection, id: AgentId, correct: bool) -> Result<Agent> {
    let tx = conn.transaction().map_err(db_err)?;
    let mut agent = require_agent(&tx, id)?;
    agent.record_resolution(correct);
    tx.execute(
        "UPDATE agents
         SET total_resolved_votes = ?2, correct_resolved_votes = ?3, accuracy_rate = ?4
         WHERE id = ?1",
        params![
            id.to_string(),
            agent.total_resolved_votes,
            agent.correct_resolved_votes,
            agent.accuracy_rate,
        ],
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)?;
    Ok(agent)
}

pub fn set_learning_score(conn: &Connection, id: AgentId, score: f64) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE agents SET learning_score = ?2 WHERE id = ?1",
            params![id.to_string(), score],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::not_found("agent", id));
    }
    Ok(())
}

pub fn mark_first_activity(conn: &Connection, id: AgentId, at: &str) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE agents SET first_activity_at = ?2 WHERE id = ?1 AND first_activity_at IS NULL",
            params![id.to_string(), at],
        )
        .map_err(db_err)?;
    Ok(changed > 0)
}
