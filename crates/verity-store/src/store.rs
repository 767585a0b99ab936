//! Durable store seam
//!
//! Exactly the reads and writes the engines perform against the relational
//! store. Multi-row mutations are atomic in every implementation.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use verity_core::{
    ActionType, ActivityCounts, Agent, AgentExpertise, AgentId, AuthoredCounts, Claim, ClaimId,
    ClaimVote, CommentRecord, EvidenceId, EvidenceRecord, GradientHistoryPoint, Notification,
    RefreshToken, ReputationChange, ReputationHistoryEntry, ReputationOutcome, ResolvedVote,
    Result, Tier, WeightedVote,
};

#[async_trait::async_trait]
pub trait ScoreStore: Send + Sync {
    // ----- claims and votes -----

    async fn insert_claim(&self, claim: &Claim) -> Result<()>;

    async fn get_claim(&self, id: ClaimId) -> Result<Option<Claim>>;

    /// Insert or replace the (claim, agent) vote and refresh `vote_count`.
    async fn upsert_vote(&self, vote: &ClaimVote) -> Result<()>;

    /// Remove a vote and refresh `vote_count`. Returns whether one existed.
    async fn delete_vote(&self, claim: ClaimId, agent: AgentId, at: DateTime<Utc>)
        -> Result<bool>;

    async fn get_vote(&self, claim: ClaimId, agent: AgentId) -> Result<Option<ClaimVote>>;

    /// `(agent, value)` for every vote on the claim.
    async fn claim_votes(&self, claim: ClaimId) -> Result<Vec<(AgentId, f64)>>;

    /// Votes on the given claims joined with each voter's current reputation.
    /// One query regardless of how many claims are asked for.
    async fn weighted_votes(&self, claims: &[ClaimId]) -> Result<Vec<WeightedVote>>;

    /// Write the gradient onto the claim and append a history point carrying
    /// the claim's current vote count. `None` if the claim does not exist.
    async fn record_gradient(
        &self,
        claim: ClaimId,
        gradient: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<GradientHistoryPoint>>;

    /// Newest first.
    async fn gradient_history(
        &self,
        claim: ClaimId,
        limit: u32,
    ) -> Result<Vec<GradientHistoryPoint>>;

    // ----- agents and the reputation ledger -----

    async fn insert_agent(&self, agent: &Agent) -> Result<()>;

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>>;

    /// Apply the change and append its ledger entry in one transaction.
    /// Fails with `NotFound` for an unknown agent.
    async fn apply_reputation_change(
        &self,
        agent: AgentId,
        change: &ReputationChange,
    ) -> Result<ReputationOutcome>;

    /// Newest first.
    async fn reputation_history(
        &self,
        agent: AgentId,
        limit: u32,
    ) -> Result<Vec<ReputationHistoryEntry>>;

    /// Agents ordered by reputation descending, optionally restricted to a
    /// tier and to agents with a ledger entry at or after `since`. Returns
    /// the page and the total number of matching agents.
    async fn leaderboard(
        &self,
        tier: Option<Tier>,
        since: Option<DateTime<Utc>>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Agent>, u64)>;

    /// Claims and evidence authored, for all given agents in one query.
    async fn authored_counts(&self, agents: &[AgentId]) -> Result<HashMap<AgentId, AuthoredCounts>>;

    async fn count_agents_above(&self, score: f64) -> Result<u64>;

    async fn count_agents(&self) -> Result<u64>;

    // ----- learning -----

    /// Advance the resolved-vote counters and accuracy rate in one
    /// transaction. Returns the updated agent.
    async fn record_resolution(&self, agent: AgentId, correct: bool) -> Result<Agent>;

    /// The agent's votes cast in `[since, until)` on claims whose gradient is
    /// currently above `resolved_true` or below `resolved_false`.
    async fn resolved_votes(
        &self,
        agent: AgentId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        resolved_true: f64,
        resolved_false: f64,
    ) -> Result<Vec<ResolvedVote>>;

    async fn set_learning_score(&self, agent: AgentId, score: f64) -> Result<()>;

    /// Register one engagement with a tag, creating the row on first sight.
    async fn observe_expertise(
        &self,
        agent: AgentId,
        tag: &str,
        correct: Option<bool>,
        at: DateTime<Utc>,
    ) -> Result<AgentExpertise>;

    /// Rows with at least `min_engagement`, by engagement then accuracy
    /// (unset accuracy last).
    async fn expertise(
        &self,
        agent: AgentId,
        min_engagement: u32,
        limit: u32,
    ) -> Result<Vec<AgentExpertise>>;

    /// Stamp `first_activity_at` if unset. Returns whether it was stamped.
    async fn mark_first_activity(&self, agent: AgentId, at: DateTime<Utc>) -> Result<bool>;

    // ----- rate limit audit trail -----

    /// `count += 1`, creating the row at 1.
    async fn bump_rate_counter(
        &self,
        agent: AgentId,
        action: ActionType,
        day: NaiveDate,
    ) -> Result<u32>;

    async fn rate_counter(&self, agent: AgentId, action: ActionType, day: NaiveDate)
        -> Result<u32>;

    // ----- discovery -----

    /// Claims created at or after `since`, newest first, optionally skipping
    /// claims the given agent has voted on.
    async fn claims_created_since(
        &self,
        since: DateTime<Utc>,
        excluding_voter: Option<AgentId>,
        limit: u32,
    ) -> Result<Vec<Claim>>;

    /// Votes, evidence and comments created at or after `since`, per claim.
    async fn activity_counts(
        &self,
        claims: &[ClaimId],
        since: DateTime<Utc>,
    ) -> Result<HashMap<ClaimId, ActivityCounts>>;

    async fn voters_of(&self, claims: &[ClaimId]) -> Result<HashMap<ClaimId, HashSet<AgentId>>>;

    // ----- evidence and comments -----

    /// Insert and bump the claim's `evidence_count`.
    async fn insert_evidence(&self, evidence: &EvidenceRecord) -> Result<()>;

    async fn get_evidence(&self, id: EvidenceId) -> Result<Option<EvidenceRecord>>;

    async fn insert_comment(&self, comment: &CommentRecord) -> Result<()>;

    // ----- sweeper -----

    /// Claims with at least `min_votes`, most recently updated first.
    async fn consensus_candidates(&self, min_votes: u32, limit: u32) -> Result<Vec<Claim>>;

    /// Set `resolved_at` if still null. Returns whether this call set it.
    async fn mark_claim_resolved(&self, claim: ClaimId, at: DateTime<Utc>) -> Result<bool>;

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()>;

    /// Delete refresh tokens that are revoked or expired at `now`.
    async fn purge_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64>;

    // ----- notifications -----

    async fn insert_notification(&self, notification: &Notification) -> Result<()>;

    async fn count_unread(&self, agent: AgentId) -> Result<u64>;

    async fn mark_all_read(&self, agent: AgentId) -> Result<u64>;

    async fn notifications(&self, agent: AgentId, limit: u32) -> Result<Vec<Notification>>;
}
