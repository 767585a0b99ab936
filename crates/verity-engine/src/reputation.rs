//! Reputation engine
//!
//! Every score change goes through the store's ledger transaction, which
//! also re-derives tier and quotas. This module adds the table of reasons,
//! promotion notifications, consensus rewards and the cached read models.

use crate::cache::{keys, ScoreCache};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use verity_core::{
    round1, AgentId, AgentRank, CacheConfig, ClaimId, Clock, ConsensusConfig, Error, EvidenceId,
    Leaderboard, LeaderboardEntry, LeaderboardPeriod, NotificationKind, Reference,
    ReputationChange, ReputationHistoryEntry, ReputationOutcome, ReputationReason, Result, Tier,
};
use verity_store::{Notifier, ScoreStore};

pub struct ReputationEngine {
    store: Arc<dyn ScoreStore>,
    cache: ScoreCache,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    ttl: CacheConfig,
    consensus: ConsensusConfig,
}

impl ReputationEngine {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        cache: ScoreCache,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        ttl: CacheConfig,
        consensus: ConsensusConfig,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            clock,
            ttl,
            consensus,
        }
    }

    /// A change stamped with the engine clock. Fails for reasons that carry
    /// no table amount when `delta` is `None`.
    pub fn change(&self, reason: ReputationReason, delta: Option<f64>) -> Result<ReputationChange> {
        ReputationChange::new(reason, delta, self.clock.now())
    }

    /// Apply one change and return the new score.
    pub async fn update_reputation(
        &self,
        agent: AgentId,
        reason: ReputationReason,
        delta: Option<f64>,
        reference: Option<Reference>,
    ) -> Result<f64> {
        let mut change = self.change(reason, delta)?;
        change.reference = reference;
        Ok(self.apply(agent, change).await?.new_score())
    }

    /// Write score, tier, quotas and ledger entry as one unit, then notify on
    /// promotion and drop the cached score.
    #[instrument(skip(self, change), fields(agent_id = %agent, reason = %change.reason))]
    pub async fn apply(&self, agent: AgentId, change: ReputationChange) -> Result<ReputationOutcome> {
        let outcome = match self.store.apply_reputation_change(agent, &change).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if !matches!(e, Error::NotFound { .. }) {
                    error!(error = %e, "reputation ledger write failed");
                }
                return Err(e);
            }
        };

        if outcome.promoted() {
            self.notify_promotion(agent, &outcome).await;
        } else if outcome.new_tier != outcome.old_tier {
            debug!(from = %outcome.old_tier, to = %outcome.new_tier, "tier demoted");
        }
        self.cache.invalidate(&keys::reputation(agent)).await;

        info!(
            delta = outcome.entry.delta,
            new_score = outcome.new_score(),
            tier = %outcome.new_tier,
            "reputation updated"
        );
        Ok(outcome)
    }

    async fn notify_promotion(&self, agent: AgentId, outcome: &ReputationOutcome) {
        let payload = json!({
            "title": format!("Promoted to {}!", outcome.new_tier.display_name()),
            "old_tier": outcome.old_tier,
            "new_tier": outcome.new_tier,
            "reputation_score": outcome.new_score(),
            "evidence_per_day": outcome.quota.evidence_per_day,
            "votes_per_day": outcome.quota.votes_per_day,
        });
        if let Err(e) = self
            .notifier
            .notify(agent, NotificationKind::TierPromotion, payload)
            .await
        {
            warn!(agent_id = %agent, error = %e, "promotion notification failed");
        }
    }

    pub async fn on_evidence_vote(
        &self,
        author: AgentId,
        evidence: EvidenceId,
        is_upvote: bool,
    ) -> Result<f64> {
        let reason = if is_upvote {
            ReputationReason::EvidenceUpvoted
        } else {
            ReputationReason::EvidenceDownvoted
        };
        self.update_reputation(author, reason, None, Some(Reference::evidence(evidence)))
            .await
    }

    /// Reward voters who sided with consensus and penalise those who did not.
    /// Nothing happens inside the reputation band. Each voter is applied on
    /// its own: a failure is logged and the rest still go through.
    #[instrument(skip(self, votes), fields(claim_id = %claim, voters = votes.len()))]
    pub async fn on_consensus_reached(
        &self,
        claim: ClaimId,
        final_gradient: f64,
        votes: &[(AgentId, f64)],
    ) -> HashMap<AgentId, f64> {
        let mut updated = HashMap::new();
        let Some(verdict) = self.consensus.reputation_verdict(final_gradient) else {
            debug!(final_gradient, "no consensus");
            return updated;
        };

        for &(agent, value) in votes {
            let reason = if verdict.agrees_with(value) {
                ReputationReason::VoteAligned
            } else {
                ReputationReason::VoteOpposed
            };
            match self
                .update_reputation(agent, reason, None, Some(Reference::claim(claim)))
                .await
            {
                Ok(score) => {
                    updated.insert(agent, score);
                }
                Err(e) => error!(agent_id = %agent, error = %e, "consensus reward failed"),
            }
        }
        info!(verdict = ?verdict, rewarded = updated.len(), "consensus applied");
        updated
    }

    pub async fn get_reputation(&self, agent: AgentId) -> Result<f64> {
        let key = keys::reputation(agent);
        if let Some(score) = self.cache.get::<f64>(&key).await {
            return Ok(score);
        }
        let score = self
            .store
            .get_agent(agent)
            .await?
            .ok_or_else(|| Error::not_found("agent", agent))?
            .reputation_score;
        self.cache.put(&key, &score, self.ttl.reputation_ttl_secs).await;
        Ok(score)
    }

    /// Newest first.
    pub async fn get_reputation_history(
        &self,
        agent: AgentId,
        limit: u32,
    ) -> Result<Vec<ReputationHistoryEntry>> {
        self.store.reputation_history(agent, limit).await
    }

    pub async fn get_leaderboard(
        &self,
        limit: u32,
        offset: u32,
        tier: Option<Tier>,
        period: LeaderboardPeriod,
    ) -> Result<Leaderboard> {
        let key = keys::leaderboard(period, tier, limit, offset);
        if let Some(board) = self.cache.get::<Leaderboard>(&key).await {
            return Ok(board);
        }

        let now = self.clock.now();
        let (agents, total) = self
            .store
            .leaderboard(tier, period.window_start(now), limit, offset)
            .await?;
        let ids: Vec<AgentId> = agents.iter().map(|a| a.id).collect();
        let counts = self.store.authored_counts(&ids).await?;

        let entries = agents
            .into_iter()
            .enumerate()
            .map(|(i, agent)| {
                let authored = counts.get(&agent.id).copied().unwrap_or_default();
                LeaderboardEntry {
                    rank: u64::from(offset) + i as u64 + 1,
                    id: agent.id,
                    username: agent.username,
                    display_name: agent.display_name,
                    reputation_score: agent.reputation_score,
                    tier: agent.tier,
                    claims_count: authored.claims,
                    evidence_count: authored.evidence,
                }
            })
            .collect();

        let board = Leaderboard {
            entries,
            total,
            period,
            updated_at: now,
        };
        self.cache.put(&key, &board, self.ttl.leaderboard_ttl_secs).await;
        Ok(board)
    }

    /// Rank is one plus the number of agents strictly ahead.
    pub async fn get_agent_rank(&self, agent: AgentId) -> Result<AgentRank> {
        let key = keys::rank(agent);
        if let Some(rank) = self.cache.get::<AgentRank>(&key).await {
            return Ok(rank);
        }

        let record = self
            .store
            .get_agent(agent)
            .await?
            .ok_or_else(|| Error::not_found("agent", agent))?;
        let ahead = self.store.count_agents_above(record.reputation_score).await?;
        let total = self.store.count_agents().await?;
        let rank = ahead + 1;
        let percentile = if total > 0 {
            round1(total.saturating_sub(rank) as f64 / total as f64 * 100.0)
        } else {
            0.0
        };

        let rank = AgentRank {
            rank,
            total,
            percentile,
            reputation_score: record.reputation_score,
            tier: record.tier,
        };
        self.cache.put(&key, &rank, self.ttl.rank_ttl_secs).await;
        Ok(rank)
    }

    /// Drops every leaderboard page and every cached rank.
    pub async fn invalidate_leaderboard_cache(&self) -> u64 {
        self.cache.invalidate_prefix(keys::LEADERBOARD_PREFIX).await
    }
}
