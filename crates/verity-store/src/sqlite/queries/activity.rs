//! Evidence, comments, trailing activity, refresh tokens, notifications.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use verity_core::{
    ActivityCounts, AgentId, ClaimId, CommentRecord, Error, EvidenceId, EvidenceRecord,
    Notification, RefreshToken, Result,
};

use crate::sqlite::codec::{count_at, db_err, enum_at, json_at, placeholders, ts, ts_at, uuid_at};

pub fn insert_evidence(conn: &mut Connection, evidence: &EvidenceRecord) -> Result<()> {
    let tx = conn.transaction().map_err(db_err)?;
    let changed = tx
        .execute(
            "UPDATE claims SET evidence_count = evidence_count + 1 WHERE id = ?1",
            params![evidence.claim_id.to_string()],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::not_found("claim", evidence.claim_id));
    }
    tx.execute(
        "INSERT INTO evidence (id, claim_id, author_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            evidence.id.to_string(),
            evidence.claim_id.to_string(),
            evidence.author_id.to_string(),
            ts(evidence.created_at),
        ],
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)
}

pub fn get_evidence(conn: &Connection, id: EvidenceId) -> Result<Option<EvidenceRecord>> {
    conn.query_row(
        "SELECT id, claim_id, author_id, created_at FROM evidence WHERE id = ?1",
        params![id.to_string()],
        |row| {
            Ok(EvidenceRecord {
                id: uuid_at(row, 0)?.into(),
                claim_id: uuid_at(row, 1)?.into(),
                author_id: uuid_at(row, 2)?.into(),
                created_at: ts_at(row, 3)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

pub fn insert_comment(conn: &Connection, comment: &CommentRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO comments (id, claim_id, author_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            comment.id.to_string(),
            comment.claim_id.to_string(),
            comment.author_id.to_string(),
            ts(comment.created_at),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// One grouped query over all three activity tables.
pub fn activity_counts(
    conn: &Connection,
    claims: &[ClaimId],
    since: &str,
) -> Result<HashMap<ClaimId, ActivityCounts>> {
    let mut out: HashMap<ClaimId, ActivityCounts> = HashMap::new();
    if claims.is_empty() {
        return Ok(out);
    }
    let sql = format!(
        "SELECT claim_id, kind, COUNT(*) FROM (
             SELECT claim_id, 'vote' AS kind, created_at FROM claim_votes
             UNION ALL SELECT claim_id, 'evidence', created_at FROM evidence
             UNION ALL SELECT claim_id, 'comment', created_at FROM comments
         )
         WHERE created_at >= ?1 AND claim_id IN ({})
         GROUP BY claim_id, kind",
        placeholders(2, claims.len())
    );
    let bind = std::iter::once(since.to_string()).chain(claims.iter().map(|c| c.to_string()));
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |row| {
            Ok((
                ClaimId::from(uuid_at(row, 0)?),
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
            ))
        })
        .map_err(db_err)?;
    for row in rows {
        let (claim, kind, n) = row.map_err(db_err)?;
        let counts = out.entry(claim).or_default();
        match kind.as_str() {
            "vote" => counts.votes = n,
            "evidence" => counts.evidence = n,
            _ => counts.comments = n,
        }
    }
    Ok(out)
}

pub fn insert_refresh_token(conn: &Connection, token: &RefreshToken) -> Result<()> {
    conn.execute(
        "INSERT INTO refresh_tokens (id, owner_id, expires_at, revoked) VALUES (?1, ?2, ?3, ?4)",
        params![
            token.id.to_string(),
            token.owner_id.to_string(),
            ts(token.expires_at),
            token.revoked,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn purge_refresh_tokens(conn: &Connection, now: &str) -> Result<u64> {
    let removed = conn
        .execute(
            "DELETE FROM refresh_tokens WHERE revoked = 1 OR expires_at < ?1",
            params![now],
        )
        .map_err(db_err)?;
    Ok(removed as u64)
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: uuid_at(row, 0)?,
        agent_id: uuid_at(row, 1)?.into(),
        kind: enum_at(row, 2)?,
        payload: json_at(row, 3)?,
        is_read: row.get(4)?,
        created_at: ts_at(row, 5)?,
    })
}

pub fn insert_notification(conn: &Connection, notification: &Notification) -> Result<()> {
    conn.execute(
        "INSERT INTO notifications (id, agent_id, kind, payload, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            notification.id.to_string(),
            notification.agent_id.to_string(),
            notification.kind.as_str(),
            serde_json::to_string(&notification.payload)?,
            notification.is_read,
            ts(notification.created_at),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn count_unread(conn: &Connection, agent: AgentId) -> Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE agent_id = ?1 AND is_read = 0",
        params![agent.to_string()],
        |row| count_at(row, 0),
    )
    .map_err(db_err)
}

pub fn mark_all_read(conn: &Connection, agent: AgentId) -> Result<u64> {
    let changed = conn
        .execute(
            "UPDATE notifications SET is_read = 1 WHERE agent_id = ?1 AND is_read = 0",
            params![agent.to_string()],
        )
        .map_err(db_err)?;
    Ok(changed as u64)
}

pub fn notifications(conn: &Connection, agent: AgentId, limit: u32) -> Result<Vec<Notification>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, agent_id, kind, payload, is_read, created_at FROM notifications
             WHERE agent_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![agent.to_string(), limit], notification_from_row)
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}
