//! SQLite-backed `ScoreStore`
//!
//! One connection behind a mutex; every call runs on the blocking pool so
//! the async callers never stall the runtime.

mod codec;
mod migrations;
mod queries;

pub use migrations::latest_version;

use crate::store::ScoreStore;
use chrono::{DateTime, NaiveDate, Utc};
use codec::{day, db_err, ts};
use queries::{activity, agents, claims, learning};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;
use verity_core::{
    ActionType, ActivityCounts, Agent, AgentExpertise, AgentId, AuthoredCounts, Claim, ClaimId,
    ClaimVote, CommentRecord, Error, EvidenceId, EvidenceRecord, GradientHistoryPoint,
    Notification, RefreshToken, ReputationChange, ReputationHistoryEntry, ReputationOutcome,
    ResolvedVote, Result, Tier, WeightedVote,
};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            ",
        )
        .map_err(db_err)?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "opened score store");
        Ok(store)
    }

    /// In-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::store("connection mutex poisoned"))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| Error::store(format!("store task failed: {e}")))?
    }

    /// Current schema version.
    pub async fn schema_version(&self) -> Result<u32> {
        self.call(|conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
        .await
    }
}

#[async_trait::async_trait]
impl ScoreStore for SqliteStore {
    // ----- claims and votes -----

    async fn insert_claim(&self, claim: &Claim) -> Result<()> {
        let claim = claim.clone();
        self.call(move |conn| claims::insert_claim(conn, &claim)).await
    }

    async fn get_claim(&self, id: ClaimId) -> Result<Option<Claim>> {
        self.call(move |conn| claims::get_claim(conn, id)).await
    }

    async fn upsert_vote(&self, vote: &ClaimVote) -> Result<()> {
        let vote = vote.clone();
        self.call(move |conn| claims::upsert_vote(conn, &vote)).await
    }

    async fn delete_vote(&self, claim: ClaimId, agent: AgentId, at: DateTime<Utc>) -> Result<bool> {
        self.call(move |conn| claims::delete_vote(conn, claim, agent, &ts(at)))
            .await
    }

    async fn get_vote(&self, claim: ClaimId, agent: AgentId) -> Result<Option<ClaimVote>> {
        self.call(move |conn| claims::get_vote(conn, claim, agent))
            .await
    }

    async fn claim_votes(&self, claim: ClaimId) -> Result<Vec<(AgentId, f64)>> {
        self.call(move |conn| claims::claim_votes(conn, claim)).await
    }

    async fn weighted_votes(&self, ids: &[ClaimId]) -> Result<Vec<WeightedVote>> {
        let ids = ids.to_vec();
        self.call(move |conn| claims::weighted_votes(conn, &ids))
            .await
    }

    async fn record_gradient(
        &self,
        claim: ClaimId,
        gradient: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<GradientHistoryPoint>> {
        self.call(move |conn| claims::record_gradient(conn, claim, gradient, &ts(at)))
            .await
    }

    async fn gradient_history(
        &self,
        claim: ClaimId,
        limit: u32,
    ) -> Result<Vec<GradientHistoryPoint>> {
        self.call(move |conn| claims::gradient_history(conn, claim, limit))
            .await
    }

    // ----- agents and the reputation ledger -----

    async fn insert_agent(&self, agent: &Agent) -> Result<()> {
        let agent = agent.clone();
        self.call(move |conn| agents::insert_agent(conn, &agent))
            .await
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>> {
        self.call(move |conn| agents::get_agent(conn, id)).await
    }

    async fn apply_reputation_change(
        &self,
        agent: AgentId,
        change: &ReputationChange,
    ) -> Result<ReputationOutcome> {
        let change = change.clone();
        self.call(move |conn| agents::apply_reputation_change(conn, agent, &change))
            .await
    }

    async fn reputation_history(
        &self,
        agent: AgentId,
        limit: u32,
    ) -> Result<Vec<ReputationHistoryEntry>> {
        self.call(move |conn| agents::reputation_history(conn, agent, limit))
            .await
    }

    async fn leaderboard(
        &self,
        tier: Option<Tier>,
        since: Option<DateTime<Utc>>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Agent>, u64)> {
        let since = since.map(ts);
        self.call(move |conn| agents::leaderboard(conn, tier, since.as_deref(), limit, offset))
            .await
    }

    async fn authored_counts(&self, ids: &[AgentId]) -> Result<HashMap<AgentId, AuthoredCounts>> {
        let ids = ids.to_vec();
        self.call(move |conn| agents::authored_counts(conn, &ids))
            .await
    }

    async fn count_agents_above(&self, score: f64) -> Result<u64> {
        self.call(move |conn| agents::count_agents_above(conn, score))
            .await
    }

    async fn count_agents(&self) -> Result<u64> {
        self.call(|conn| agents::count_agents(conn)).await
    }

    // ----- learning -----

    async fn record_resolution(&self, agent: AgentId, correct: bool) -> Result<Agent> {
        self.call(move |conn| agents::record_resolution(conn, agent, correct))
            .await
    }

    async fn resolved_votes(
        &self,
        agent: AgentId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        resolved_true: f64,
        resolved_false: f64,
    ) -> Result<Vec<ResolvedVote>> {
        self.call(move |conn| {
            learning::resolved_votes(
                conn,
                agent,
                &ts(since),
                &ts(until),
                resolved_true,
                resolved_false,
            )
        })
        .await
    }

    async fn set_learning_score(&self, agent: AgentId, score: f64) -> Result<()> {
        self.call(move |conn| agents::set_learning_score(conn, agent, score))
            .await
    }

    async fn observe_expertise(
        &self,
        agent: AgentId,
        tag: &str,
        correct: Option<bool>,
        at: DateTime<Utc>,
    ) -> Result<AgentExpertise> {
        let tag = tag.to_string();
        self.call(move |conn| learning::observe_expertise(conn, agent, &tag, correct, at))
            .await
    }

    async fn expertise(
        &self,
        agent: AgentId,
        min_engagement: u32,
        limit: u32,
    ) -> Result<Vec<AgentExpertise>> {
        self.call(move |conn| learning::expertise(conn, agent, min_engagement, limit))
            .await
    }

    async fn mark_first_activity(&self, agent: AgentId, at: DateTime<Utc>) -> Result<bool> {
        self.call(move |conn| agents::mark_first_activity(conn, agent, &ts(at)))
            .await
    }

    // ----- rate limit audit trail -----

    async fn bump_rate_counter(
        &self,
        agent: AgentId,
        action: ActionType,
        on: NaiveDate,
    ) -> Result<u32> {
        self.call(move |conn| learning::bump_rate_counter(conn, agent, action, &day(on)))
            .await
    }

    async fn rate_counter(&self, agent: AgentId, action: ActionType, on: NaiveDate) -> Result<u32> {
        self.call(move |conn| learning::rate_counter(conn, agent, action, &day(on)))
            .await
    }

    // ----- discovery -----

    async fn claims_created_since(
        &self,
        since: DateTime<Utc>,
        excluding_voter: Option<AgentId>,
        limit: u32,
    ) -> Result<Vec<Claim>> {
        self.call(move |conn| {
            claims::claims_created_since(conn, &ts(since), excluding_voter, limit)
        })
        .await
    }

    async fn activity_counts(
        &self,
        ids: &[ClaimId],
        since: DateTime<Utc>,
    ) -> Result<HashMap<ClaimId, ActivityCounts>> {
        let ids = ids.to_vec();
        self.call(move |conn| activity::activity_counts(conn, &ids, &ts(since)))
            .await
    }

    async fn voters_of(&self, ids: &[ClaimId]) -> Result<HashMap<ClaimId, HashSet<AgentId>>> {
        let ids = ids.to_vec();
        self.call(move |conn| claims::voters_of(conn, &ids)).await
    }

    // ----- evidence and comments -----

    async fn insert_evidence(&self, evidence: &EvidenceRecord) -> Result<()> {
        let evidence = evidence.clone();
        self.call(move |conn| activity::insert_evidence(conn, &evidence))
            .await
    }

    async fn get_evidence(&self, id: EvidenceId) -> Result<Option<EvidenceRecord>> {
        self.call(move |conn| activity::get_evidence(conn, id)).await
    }

    async fn insert_comment(&self, comment: &CommentRecord) -> Result<()> {
        let comment = comment.clone();
        self.call(move |conn| activity::insert_comment(conn, &comment))
            .await
    }

    // ----- sweeper -----

    async fn consensus_candidates(&self, min_votes: u32, limit: u32) -> Result<Vec<Claim>> {
        self.call(move |conn| claims::consensus_candidates(conn, min_votes, limit))
            .await
    }

    async fn mark_claim_resolved(&self, claim: ClaimId, at: DateTime<Utc>) -> Result<bool> {
        self.call(move |conn| claims::mark_claim_resolved(conn, claim, &ts(at)))
            .await
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        let token = token.clone();
        self.call(move |conn| activity::insert_refresh_token(conn, &token))
            .await
    }

    async fn purge_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        self.call(move |conn| activity::purge_refresh_tokens(conn, &ts(now)))
            .await
    }

    // ----- notifications -----

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let notification = notification.clone();
        self.call(move |conn| activity::insert_notification(conn, &notification))
            .await
    }

    async fn count_unread(&self, agent: AgentId) -> Result<u64> {
        self.call(move |conn| activity::count_unread(conn, agent))
            .await
    }

    async fn mark_all_read(&self, agent: AgentId) -> Result<u64> {
        self.call(move |conn| activity::mark_all_read(conn, agent))
            .await
    }

    async fn notifications(&self, agent: AgentId, limit: u32) -> Result<Vec<Notification>> {
        self.call(move |conn| activity::notifications(conn, agent, limit))
            .await
    }
}
