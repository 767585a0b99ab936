//! Claims, votes, gradient history.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use verity_core::{
    AgentId, Claim, ClaimId, ClaimVote, Error, GradientHistoryPoint, Result, WeightedVote,
};

use crate::sqlite::codec::{db_err, json_at, opt_ts_at, placeholders, ts, ts_at, uuid_at};

pub(crate) const CLAIM_COLUMNS: &str = "id, author_id, statement, gradient, vote_count, \
     evidence_count, tags, created_at, updated_at, resolved_at";

pub(crate) fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<Claim> {
    Ok(Claim {
        id: uuid_at(row, 0)?.into(),
        author_id: uuid_at(row, 1)?.into(),
        statement: row.get(2)?,
        gradient: row.get(3)?,
        vote_count: row.get(4)?,
        evidence_count: row.get(5)?,
        tags: json_at(row, 6)?,
        created_at: ts_at(row, 7)?,
        updated_at: ts_at(row, 8)?,
        resolved_at: opt_ts_at(row, 9)?,
    })
}

fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<ClaimVote> {
    Ok(ClaimVote {
        claim_id: uuid_at(row, 0)?.into(),
        agent_id: uuid_at(row, 1)?.into(),
        value: row.get(2)?,
        weight: row.get(3)?,
        created_at: ts_at(row, 4)?,
        updated_at: ts_at(row, 5)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<GradientHistoryPoint> {
    Ok(GradientHistoryPoint {
        claim_id: uuid_at(row, 0)?.into(),
        gradient: row.get(1)?,
        vote_count: row.get(2)?,
        recorded_at: ts_at(row, 3)?,
    })
}

pub fn insert_claim(conn: &Connection, claim: &Claim) -> Result<()> {
    let tags = serde_json::to_string(&claim.tags)?;
    conn.execute(
        "INSERT INTO claims (id, author_id, statement, gradient, vote_count, evidence_count,
                             tags, created_at, updated_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            claim.id.to_string(),
            claim.author_id.to_string(),
            claim.statement,
            claim.gradient,
            claim.vote_count,
            claim.evidence_count,
            tags,
            ts(claim.created_at),
            ts(claim.updated_at),
            claim.resolved_at.map(ts),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn get_claim(conn: &Connection, id: ClaimId) -> Result<Option<Claim>> {
    conn.query_row(
        &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE id = ?1"),
        params![id.to_string()],
        claim_from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Recount votes onto the claim row. Errors with `NotFound` if the claim is gone.
fn refresh_vote_count(conn: &Connection, claim: ClaimId, at: &str) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE claims
             SET vote_count = (SELECT COUNT(*) FROM claim_votes WHERE claim_id = ?1),
                 updated_at = ?2
             WHERE id = ?1",
            params![claim.to_string(), at],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::not_found("claim", claim));
    }
    Ok(())
}

pub fn upsert_vote(conn: &mut Connection, vote: &ClaimVote) -> Result<()> {
    let tx = conn.transaction().map_err(db_err)?;
    if get_claim(&tx, vote.claim_id)?.is_none() {
        return Err(Error::not_found("claim", vote.claim_id));
    }
    let updated_at = ts(vote.updated_at);
    tx.execute(
        "INSERT INTO claim_votes (claim_id, agent_id, value, weight, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (claim_id, agent_id) DO UPDATE SET
             value = excluded.value,
             weight = excluded.weight,
             updated_at = excluded.updated_at",
        params![
            vote.claim_id.to_string(),
            vote.agent_id.to_string(),
            vote.value,
            vote.weight,
            ts(vote.created_at),
            updated_at,
        ],
    )
    .map_err(db_err)?;
    refresh_vote_count(&tx, vote.claim_id, &updated_at)?;
    tx.commit().map_err(db_err)
}

pub fn delete_vote(conn: &mut Connection, claim: ClaimId, agent: AgentId, at: &str) -> Result<bool> {
    let tx = conn.transaction().map_err(db_err)?;
    let removed = tx
        .execute(
            "DELETE FROM claim_votes WHERE claim_id = ?1 AND agent_id = ?2",
            params![claim.to_string(), agent.to_string()],
        )
        .map_err(db_err)?;
    if removed == 0 {
        return Ok(false);
    }
    refresh_vote_count(&tx, claim, at)?;
    tx.commit().map_err(db_err)?;
    Ok(true)
}

pub fn get_vote(conn: &Connection, claim: ClaimId, agent: AgentId) -> Result<Option<ClaimVote>> {
    conn.query_row(
        "SELECT claim_id, agent_id, value, weight, created_at, updated_at
         FROM claim_votes WHERE claim_id = ?1 AND agent_id = ?2",
        params![claim.to_string(), agent.to_string()],
        vote_from_row,
    )
    .optional()
    .map_err(db_err)
}

pub fn claim_votes(conn: &Connection, claim: ClaimId) -> Result<Vec<(AgentId, f64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT agent_id, value FROM claim_votes
             WHERE claim_id = ?1 ORDER BY created_at, agent_id",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![claim.to_string()], |row| {
            Ok((AgentId::from(uuid_at(row, 0)?), row.get::<_, f64>(1)?))
        })
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

pub fn weighted_votes(conn: &Connection, claims: &[ClaimId]) -> Result<Vec<WeightedVote>> {
    if claims.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT v.claim_id, v.agent_id, v.value, a.reputation_score
         FROM claim_votes v LEFT JOIN agents a ON a.id = v.agent_id
         WHERE v.claim_id IN ({})",
        placeholders(1, claims.len())
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(claims.iter().map(|c| c.to_string())), |row| {
            Ok((
                ClaimId::from(uuid_at(row, 0)?),
                AgentId::from(uuid_at(row, 1)?),
                row.get::<_, f64>(2)?,
                row.get::<_, Option<f64>>(3)?,
            ))
        })
        .map_err(db_err)?;

    let mut out = Vec::new();
    for row in rows {
        let (claim_id, agent_id, value, reputation) = row.map_err(db_err)?;
        let reputation = reputation.ok_or_else(|| {
            Error::invariant(format!(
                "vote on claim {claim_id} by agent {agent_id} has no reputation row"
            ))
        })?;
        out.push(WeightedVote {
            claim_id,
            value,
            reputation,
        });
    }
    Ok(out)
}

pub fn record_gradient(
    conn: &mut Connection,
    claim: ClaimId,
    gradient: f64,
    at: &str,
) -> Result<Option<GradientHistoryPoint>> {
    let tx = conn.transaction().map_err(db_err)?;
    let changed = tx
        .execute(
            "UPDATE claims SET gradient = ?2, updated_at = ?3 WHERE id = ?1",
            params![claim.to_string(), gradient, at],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Ok(None);
    }
    tx.execute(
        "INSERT INTO gradient_history (claim_id, gradient, vote_count, recorded_at)
         SELECT id, gradient, vote_count, ?2 FROM claims WHERE id = ?1",
        params![claim.to_string(), at],
    )
    .map_err(db_err)?;
    let point = tx
        .query_row(
            "SELECT claim_id, gradient, vote_count, recorded_at
             FROM gradient_history WHERE id = last_insert_rowid()",
            [],
            history_from_row,
        )
        .map_err(db_err)?;
    tx.commit().map_err(db_err)?;
    Ok(Some(point))
}

pub fn gradient_history(
    conn: &Connection,
    claim: ClaimId,
    limit: u32,
) -> Result<Vec<GradientHistoryPoint>> {
    let mut stmt = conn
        .prepare(
            "SELECT claim_id, gradient, vote_count, recorded_at FROM gradient_history
             WHERE claim_id = ?1 ORDER BY recorded_at DESC, id DESC LIMIT ?2",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![claim.to_string(), limit], history_from_row)
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

pub fn voters_of(
    conn: &Connection,
    claims: &[ClaimId],
) -> Result<HashMap<ClaimId, HashSet<AgentId>>> {
    let mut out: HashMap<ClaimId, HashSet<AgentId>> = HashMap::new();
    if claims.is_empty() {
        return Ok(out);
    }
    let sql = format!(
        "SELECT claim_id, agent_id FROM claim_votes WHERE claim_id IN ({})",
        placeholders(1, claims.len())
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(claims.iter().map(|c| c.to_string())), |row| {
            Ok((ClaimId::from(uuid_at(row, 0)?), AgentId::from(uuid_at(row, 1)?)))
        })
        .map_err(db_err)?;
    for row in rows {
        let (claim, agent) = row.map_err(db_err)?;
        out.entry(claim).or_default().insert(agent);
    }
    Ok(out)
}

pub fn claims_created_since(
    conn: &Connection,
    since: &str,
    excluding_voter: Option<AgentId>,
    limit: u32,
) -> Result<Vec<Claim>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CLAIM_COLUMNS} FROM claims
             WHERE created_at >= ?1
               AND (?2 IS NULL OR id NOT IN (SELECT claim_id FROM claim_votes WHERE agent_id = ?2))
             ORDER BY created_at DESC, id LIMIT ?3"
        ))
        .map_err(db_err)?;
    let voter = excluding_voter.map(|a| a.to_string());
    let rows = stmt
        .query_map(params![since, voter, limit], claim_from_row)
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

pub fn consensus_candidates(conn: &Connection, min_votes: u32, limit: u32) -> Result<Vec<Claim>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CLAIM_COLUMNS} FROM claims
             WHERE vote_count >= ?1 ORDER BY updated_at DESC, id LIMIT ?2"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![min_votes, limit], claim_from_row)
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

pub fn mark_claim_resolved(conn: &Connection, claim: ClaimId, at: &str) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE claims SET resolved_at = ?2 WHERE id = ?1 AND resolved_at IS NULL",
            params![claim.to_string(), at],
        )
        .map_err(db_err)?;
    Ok(changed > 0)
}
