//! Scoring engine facade
//!
//! Wires the engines over one store, one cache and one clock, and exposes
//! the write paths an API layer calls on each mutating request. Gradient
//! and reputation never call each other; the consensus sweeper is the only
//! bridge between them.

use crate::cache::ScoreCache;
use crate::gradient::{vote_weight, GradientEngine};
use crate::learning::LearningEngine;
use crate::rate_limit::RateLimiter;
use crate::reputation::ReputationEngine;
use crate::trending::TrendingRanker;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;
use verity_core::{
    ActionType, AgentId, Claim, ClaimId, ClaimVote, Clock, CommentRecord, EngineConfig, Error,
    EvidenceId, EvidenceRecord, NotificationKind, Result,
};
use verity_store::{CacheStore, Notifier, ScoreStore};

pub struct ScoringEngine {
    config: EngineConfig,
    store: Arc<dyn ScoreStore>,
    cache: ScoreCache,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    gradient: GradientEngine,
    reputation: ReputationEngine,
    learning: LearningEngine,
    rate_limiter: RateLimiter,
    trending: TrendingRanker,
}

impl ScoringEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ScoreStore>,
        cache: Arc<dyn CacheStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let score_cache = ScoreCache::new(Arc::clone(&cache));
        let gradient = GradientEngine::new(
            Arc::clone(&store),
            score_cache.clone(),
            Arc::clone(&clock),
            config.cache.clone(),
        );
        let reputation = ReputationEngine::new(
            Arc::clone(&store),
            score_cache.clone(),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            config.cache.clone(),
            config.consensus.clone(),
        );
        let learning = LearningEngine::new(
            Arc::clone(&store),
            score_cache.clone(),
            Arc::clone(&clock),
            config.cache.clone(),
            config.consensus.clone(),
        );
        let rate_limiter = RateLimiter::new(Arc::clone(&store), cache, Arc::clone(&clock));
        let trending = TrendingRanker::new(
            Arc::clone(&store),
            score_cache.clone(),
            Arc::clone(&clock),
            config.cache.clone(),
            config.ranking.clone(),
        );

        Self {
            config,
            store,
            cache: score_cache,
            clock,
            notifier,
            gradient,
            reputation,
            learning,
            rate_limiter,
            trending,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ScoreStore> {
        &self.store
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn gradient(&self) -> &GradientEngine {
        &self.gradient
    }

    pub fn reputation(&self) -> &ReputationEngine {
        &self.reputation
    }

    pub fn learning(&self) -> &LearningEngine {
        &self.learning
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn trending(&self) -> &TrendingRanker {
        &self.trending
    }

    async fn require_claim(&self, claim: ClaimId) -> Result<Claim> {
        self.store
            .get_claim(claim)
            .await?
            .ok_or_else(|| Error::not_found("claim", claim))
    }

    /// Engagement bookkeeping never fails the request that triggered it.
    async fn track(&self, agent: AgentId, tags: &[String]) {
        if let Err(e) = self.learning.track_activity(agent, tags).await {
            warn!(agent_id = %agent, error = %e, "activity not tracked");
        }
    }

    async fn notify(&self, agent: AgentId, kind: NotificationKind, payload: serde_json::Value) {
        if let Err(e) = self.notifier.notify(agent, kind, payload).await {
            warn!(agent_id = %agent, kind = %kind, error = %e, "notification failed");
        }
    }

    pub async fn create_claim(
        &self,
        author: AgentId,
        statement: &str,
        tags: Vec<String>,
    ) -> Result<Claim> {
        let statement = statement.trim();
        if statement.is_empty() {
            return Err(Error::invalid("claim statement is empty"));
        }
        self.rate_limiter
            .increment(author, ActionType::ClaimCreate, true)
            .await?;

        let claim = Claim::new(author, statement, self.clock.now()).with_tags(tags);
        self.store.insert_claim(&claim).await?;
        self.track(author, &claim.tags).await;
        debug!(claim_id = %claim.id, author_id = %author, "claim created");
        Ok(claim)
    }

    /// Record or replace the agent's vote and return the fresh gradient.
    pub async fn cast_vote(&self, agent: AgentId, claim: ClaimId, value: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::invalid(format!("vote value must be in [0, 1], got {value}")));
        }
        let record = self.require_claim(claim).await?;
        let voter = self
            .store
            .get_agent(agent)
            .await?
            .ok_or_else(|| Error::not_found("agent", agent))?;
        self.rate_limiter
            .increment(agent, ActionType::ClaimVote, true)
            .await?;

        let now = self.clock.now();
        self.store
            .upsert_vote(&ClaimVote {
                claim_id: claim,
                agent_id: agent,
                value,
                weight: vote_weight(voter.reputation_score),
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.track(agent, &record.tags).await;
        self.gradient.update_gradient(claim).await
    }

    pub async fn retract_vote(&self, agent: AgentId, claim: ClaimId) -> Result<f64> {
        if !self.store.delete_vote(claim, agent, self.clock.now()).await? {
            return Err(Error::not_found("vote", format!("{claim}/{agent}")));
        }
        self.gradient.update_gradient(claim).await
    }

    pub async fn submit_evidence(&self, author: AgentId, claim: ClaimId) -> Result<EvidenceRecord> {
        let record = self.require_claim(claim).await?;
        self.rate_limiter
            .increment(author, ActionType::EvidenceSubmit, true)
            .await?;

        let evidence = EvidenceRecord {
            id: EvidenceId::new(),
            claim_id: claim,
            author_id: author,
            created_at: self.clock.now(),
        };
        self.store.insert_evidence(&evidence).await?;
        self.track(author, &record.tags).await;
        Ok(evidence)
    }

    /// A vote on a piece of evidence moves its author's reputation. Returns
    /// the author's new score. Authors cannot vote on their own evidence.
    pub async fn evidence_voted(
        &self,
        evidence: EvidenceId,
        voter: AgentId,
        is_upvote: bool,
    ) -> Result<f64> {
        let record = self
            .store
            .get_evidence(evidence)
            .await?
            .ok_or_else(|| Error::not_found("evidence", evidence))?;
        if record.author_id == voter {
            return Err(Error::invalid("cannot vote on your own evidence"));
        }
        self.rate_limiter
            .increment(voter, ActionType::EvidenceVote, true)
            .await?;

        let score = self
            .reputation
            .on_evidence_vote(record.author_id, evidence, is_upvote)
            .await?;
        let kind = if is_upvote {
            NotificationKind::EvidenceUpvoted
        } else {
            NotificationKind::EvidenceDownvoted
        };
        self.notify(
            record.author_id,
            kind,
            json!({
                "evidence_id": evidence,
                "claim_id": record.claim_id,
                "voter_id": voter,
                "reputation_score": score,
            }),
        )
        .await;
        Ok(score)
    }

    pub async fn add_comment(&self, author: AgentId, claim: ClaimId) -> Result<CommentRecord> {
        let record = self.require_claim(claim).await?;
        self.rate_limiter
            .increment(author, ActionType::CommentCreate, true)
            .await?;

        let comment = CommentRecord {
            id: Uuid::new_v4(),
            claim_id: claim,
            author_id: author,
            created_at: self.clock.now(),
        };
        self.store.insert_comment(&comment).await?;
        if record.author_id != author {
            self.notify(
                record.author_id,
                NotificationKind::CommentOnClaim,
                json!({ "claim_id": claim, "comment_id": comment.id, "author_id": author }),
            )
            .await;
        }
        Ok(comment)
    }
}
