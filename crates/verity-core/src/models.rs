//! Records read and written by the scoring engines

use crate::error::{Error, Result};
use crate::types::{
    ActionType, AgentId, ClaimId, EvidenceId, NotificationKind, Reference, ReputationReason, Tier,
    TierQuota,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Weight of the running per-tag accuracy when a new observation arrives.
pub const EXPERTISE_EMA_RETAIN: f64 = 0.9;

/// Gradient of a claim nobody has voted on.
pub const UNCERTAIN_GRADIENT: f64 = 0.5;

// ---------------------------------------------------------------------------
// Claims and votes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub author_id: AgentId,
    pub statement: String,
    /// Derived from the current vote set; written only by the gradient engine.
    pub gradient: f64,
    pub vote_count: u32,
    pub evidence_count: u32,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Stamped once, when the claim's accuracy bookkeeping has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Claim {
    pub fn new(author_id: AgentId, statement: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ClaimId::new(),
            author_id,
            statement: statement.into(),
            gradient: UNCERTAIN_GRADIENT,
            vote_count: 0,
            evidence_count: 0,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// One agent's vote on one claim. Unique per (claim, agent).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimVote {
    pub claim_id: ClaimId,
    pub agent_id: AgentId,
    pub value: f64,
    /// Weight at the time of the vote. Audit only; recomputation re-derives it.
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A vote value joined with the voter's current reputation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedVote {
    pub claim_id: ClaimId,
    pub value: f64,
    pub reputation: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradientHistoryPoint {
    pub claim_id: ClaimId,
    pub gradient: f64,
    pub vote_count: u32,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Agents and the reputation ledger
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub username: String,
    pub display_name: Option<String>,
    pub reputation_score: f64,
    pub tier: Tier,
    pub evidence_per_day: u32,
    pub votes_per_day: u32,
    pub learning_score: f64,
    pub accuracy_rate: Option<f64>,
    pub total_resolved_votes: u32,
    pub correct_resolved_votes: u32,
    pub first_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(username: impl Into<String>, now: DateTime<Utc>) -> Self {
        let quota = Tier::New.quota();
        Self {
            id: AgentId::new(),
            username: username.into(),
            display_name: None,
            reputation_score: 0.0,
            tier: Tier::New,
            evidence_per_day: quota.evidence_per_day,
            votes_per_day: quota.votes_per_day,
            learning_score: 0.5,
            accuracy_rate: None,
            total_resolved_votes: 0,
            correct_resolved_votes: 0,
            first_activity_at: None,
            created_at: now,
        }
    }

    /// Seed an agent at a given score, with tier and quotas derived from it.
    pub fn with_reputation(mut self, score: f64) -> Self {
        self.reputation_score = score.max(0.0);
        self.tier = Tier::from_score(self.reputation_score);
        self.set_quota(self.tier.quota());
        self
    }

    pub fn quota(&self) -> TierQuota {
        TierQuota {
            evidence_per_day: self.evidence_per_day,
            votes_per_day: self.votes_per_day,
        }
    }

    fn set_quota(&mut self, quota: TierQuota) {
        self.evidence_per_day = quota.evidence_per_day;
        self.votes_per_day = quota.votes_per_day;
    }

    pub fn daily_limit(&self, action: ActionType) -> u32 {
        action.daily_limit(self.tier, self.quota())
    }

    /// Count one resolved vote. The only way the accuracy counters move.
    pub fn record_resolution(&mut self, correct: bool) {
        self.total_resolved_votes += 1;
        if correct {
            self.correct_resolved_votes += 1;
        }
        self.accuracy_rate =
            Some(self.correct_resolved_votes as f64 / self.total_resolved_votes as f64);
    }
}

/// Immutable audit record. `delta` is what was applied to the score, so the
/// ledger always sums: `new_score == previous_score + delta`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReputationHistoryEntry {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub previous_score: f64,
    pub new_score: f64,
    pub delta: f64,
    /// Delta the caller asked for, before the zero floor.
    pub requested_delta: f64,
    pub reason: ReputationReason,
    pub reference: Option<Reference>,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A reputation mutation about to be applied.
#[derive(Clone, Debug)]
pub struct ReputationChange {
    pub reason: ReputationReason,
    pub delta: f64,
    pub reference: Option<Reference>,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

impl ReputationChange {
    /// Resolve the delta from the reason table unless one is supplied.
    pub fn new(
        reason: ReputationReason,
        custom_delta: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        let delta = match (custom_delta, reason.default_delta()) {
            (Some(delta), _) => delta,
            (None, Some(delta)) => delta,
            (None, None) => {
                return Err(Error::invalid(format!(
                    "{reason} requires an explicit delta"
                )))
            }
        };
        if !delta.is_finite() {
            return Err(Error::invalid(format!("delta must be finite, got {delta}")));
        }
        Ok(Self {
            reason,
            delta,
            reference: None,
            notes: None,
            at,
        })
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Apply to an agent: floor at zero, re-derive tier and quotas, and
    /// produce the ledger entry. Stores call this inside their transaction.
    pub fn apply(&self, agent: &mut Agent) -> ReputationOutcome {
        let previous_score = agent.reputation_score;
        let new_score = (previous_score + self.delta).max(0.0);
        let old_tier = agent.tier;
        let new_tier = Tier::from_score(new_score);

        agent.reputation_score = new_score;
        if new_tier != old_tier {
            agent.tier = new_tier;
            agent.set_quota(new_tier.quota());
        }

        ReputationOutcome {
            entry: ReputationHistoryEntry {
                id: Uuid::new_v4(),
                agent_id: agent.id,
                previous_score,
                new_score,
                delta: new_score - previous_score,
                requested_delta: self.delta,
                reason: self.reason,
                reference: self.reference,
                notes: self.notes.clone(),
                recorded_at: self.at,
            },
            old_tier,
            new_tier,
            quota: agent.quota(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReputationOutcome {
    pub entry: ReputationHistoryEntry,
    pub old_tier: Tier,
    pub new_tier: Tier,
    pub quota: TierQuota,
}

impl ReputationOutcome {
    pub fn promoted(&self) -> bool {
        self.new_tier > self.old_tier
    }

    pub fn new_score(&self) -> f64 {
        self.entry.new_score
    }
}

// ---------------------------------------------------------------------------
// Expertise and accuracy
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentExpertise {
    pub agent_id: AgentId,
    pub tag: String,
    pub engagement_count: u32,
    pub accuracy_in_tag: Option<f64>,
    pub last_activity_at: DateTime<Utc>,
}

impl AgentExpertise {
    pub fn new(agent_id: AgentId, tag: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            tag: tag.into(),
            engagement_count: 0,
            accuracy_in_tag: None,
            last_activity_at: at,
        }
    }

    /// Register one engagement. With an outcome, fold it into the accuracy
    /// EMA; the first outcome seeds it.
    pub fn observe(&mut self, correct: Option<bool>, at: DateTime<Utc>) {
        self.engagement_count += 1;
        self.last_activity_at = at;
        if let Some(correct) = correct {
            let hit = if correct { 1.0 } else { 0.0 };
            self.accuracy_in_tag = Some(match self.accuracy_in_tag {
                None => hit,
                Some(prev) => prev * EXPERTISE_EMA_RETAIN + hit * (1.0 - EXPERTISE_EMA_RETAIN),
            });
        }
    }
}

/// An agent's vote on a claim whose gradient sits beyond the resolution band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedVote {
    pub value: f64,
    pub gradient: f64,
    pub cast_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Rate limits, activity, tokens, notifications
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitCounter {
    pub agent_id: AgentId,
    pub action: ActionType,
    pub day: NaiveDate,
    pub count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: EvidenceId,
    pub claim_id: ClaimId,
    pub author_id: AgentId,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: Uuid,
    pub claim_id: ClaimId,
    pub author_id: AgentId,
    pub created_at: DateTime<Utc>,
}

/// Trailing-window activity on one claim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub votes: u32,
    pub evidence: u32,
    pub comments: u32,
}

/// Contributions authored by one agent, for leaderboard rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuthoredCounts {
    pub claims: u64,
    pub evidence: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub id: AgentId,
    pub username: String,
    pub display_name: Option<String>,
    pub reputation_score: f64,
    pub tier: Tier,
    pub claims_count: u64,
    pub evidence_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
    pub total: u64,
    pub period: crate::types::LeaderboardPeriod,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentRank {
    pub rank: u64,
    pub total: u64,
    pub percentile: f64,
    pub reputation_score: f64,
    pub tier: Tier,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpertiseArea {
    pub tag: String,
    pub engagement_count: u32,
    /// Percent, one decimal.
    pub accuracy: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitStatus {
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub exceeded: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendingClaim {
    pub id: ClaimId,
    pub statement: String,
    pub gradient: f64,
    pub vote_count: u32,
    pub evidence_count: u32,
    pub tags: Vec<String>,
    pub author_id: AgentId,
    pub created_at: DateTime<Utc>,
    pub trending_score: f64,
    pub votes_24h: u32,
    pub evidence_24h: u32,
    pub comments_24h: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelatedClaim {
    pub id: ClaimId,
    pub statement: String,
    pub gradient: f64,
    pub vote_count: u32,
    pub tags: Vec<String>,
    pub relevance_score: u32,
    pub shared_tags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecommendedClaim {
    pub id: ClaimId,
    pub statement: String,
    pub gradient: f64,
    pub vote_count: u32,
    pub evidence_count: u32,
    pub tags: Vec<String>,
    pub author_id: AgentId,
    pub created_at: DateTime<Utc>,
    pub recommendation_score: f64,
    pub matching_tags: Vec<String>,
}

/// Round to one decimal place, for percentages shown to clients.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn change_floors_at_zero_and_ledger_sums() {
        let mut agent = Agent::new("a", t0()).with_reputation(2.0);
        let change = ReputationChange::new(ReputationReason::EvidenceDownvoted, None, t0()).unwrap();
        let out = change.apply(&mut agent);
        assert_eq!(agent.reputation_score, 0.0);
        assert_eq!(out.entry.requested_delta, -3.0);
        assert_eq!(out.entry.previous_score + out.entry.delta, out.entry.new_score);
    }

    #[test]
    fn change_crossing_threshold_updates_quota() {
        let mut agent = Agent::new("a", t0()).with_reputation(99.0);
        let change = ReputationChange::new(ReputationReason::EvidenceUpvoted, None, t0()).unwrap();
        let out = change.apply(&mut agent);
        assert!(out.promoted());
        assert_eq!(agent.tier, Tier::Established);
        assert_eq!(agent.votes_per_day, 100);
        assert_eq!(agent.evidence_per_day, 20);
    }

    #[test]
    fn manual_adjustment_needs_delta() {
        assert!(ReputationChange::new(ReputationReason::ManualAdjustment, None, t0()).is_err());
        assert!(ReputationChange::new(ReputationReason::ManualAdjustment, Some(10.0), t0()).is_ok());
        assert!(ReputationChange::new(ReputationReason::VoteAligned, Some(f64::NAN), t0()).is_err());
    }

    #[test]
    fn expertise_ema_seeds_then_smooths() {
        let mut e = AgentExpertise::new(AgentId::new(), "physics", t0());
        e.observe(Some(true), t0());
        assert_eq!(e.accuracy_in_tag, Some(1.0));
        e.observe(Some(false), t0());
        let acc = e.accuracy_in_tag.unwrap();
        assert!((acc - 0.9).abs() < 1e-12);
        e.observe(None, t0());
        assert_eq!(e.engagement_count, 3);
        assert!((e.accuracy_in_tag.unwrap() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn record_resolution_tracks_rate() {
        let mut agent = Agent::new("a", t0());
        agent.record_resolution(true);
        agent.record_resolution(false);
        assert_eq!(agent.total_resolved_votes, 2);
        assert_eq!(agent.correct_resolved_votes, 1);
        assert_eq!(agent.accuracy_rate, Some(0.5));
    }
}
