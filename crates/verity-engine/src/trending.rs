//! Trending, related and recommended claims
//!
//! All three rank a bounded pool of recent claims, newest first, so a
//! busy day never turns into an unbounded scan.

use crate::cache::{keys, ScoreCache};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use verity_core::{
    ActivityCounts, AgentId, CacheConfig, Claim, ClaimId, Clock, Error, RankingConfig,
    RecommendedClaim, RelatedClaim, Result, TrendingClaim,
};
use verity_store::ScoreStore;

const VOTE_POINTS: f64 = 3.0;
const EVIDENCE_POINTS: f64 = 5.0;
const COMMENT_POINTS: f64 = 2.0;
const AGE_OFFSET_HOURS: f64 = 2.0;
const GRAVITY: f64 = 1.5;

const SHARED_TAG_POINTS: u32 = 10;
const SHARED_VOTER_POINTS: u32 = 5;

const RECENCY_BONUS_MAX: f64 = 10.0;
const EVIDENCE_BONUS_PER_ITEM: f64 = 2.0;
const EVIDENCE_BONUS_MAX: f64 = 10.0;

/// `(3 votes + 5 evidence + 2 comments) / (hours + 2)^1.5`
pub fn trending_score(counts: ActivityCounts, hours_age: f64) -> f64 {
    let activity = f64::from(counts.votes) * VOTE_POINTS
        + f64::from(counts.evidence) * EVIDENCE_POINTS
        + f64::from(counts.comments) * COMMENT_POINTS;
    activity / (hours_age.max(0.0) + AGE_OFFSET_HOURS).powf(GRAVITY)
}

fn hours_since(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - then).num_seconds() as f64 / 3600.0
}

pub struct TrendingRanker {
    store: Arc<dyn ScoreStore>,
    cache: ScoreCache,
    clock: Arc<dyn Clock>,
    ttl: CacheConfig,
    ranking: RankingConfig,
}

impl TrendingRanker {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        cache: ScoreCache,
        clock: Arc<dyn Clock>,
        ttl: CacheConfig,
        ranking: RankingConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            ttl,
            ranking,
        }
    }

    async fn pool(
        &self,
        window: Duration,
        excluding_voter: Option<AgentId>,
    ) -> Result<(DateTime<Utc>, Vec<Claim>)> {
        let now = self.clock.now();
        let claims = self
            .store
            .claims_created_since(now - window, excluding_voter, self.ranking.candidate_limit)
            .await?;
        Ok((now, claims))
    }

    /// One page of claims by trailing activity. Claims past the trending
    /// window are left out entirely.
    pub async fn get_trending_claims(&self, limit: u32, offset: u32) -> Result<Vec<TrendingClaim>> {
        let key = keys::trending(limit, offset);
        if let Some(page) = self.cache.get(&key).await {
            return Ok(page);
        }

        let (now, pool) = self
            .pool(Duration::days(self.ranking.trending_window_days), None)
            .await?;
        let ids: Vec<ClaimId> = pool.iter().map(|c| c.id).collect();
        let activity = self
            .store
            .activity_counts(&ids, now - Duration::hours(self.ranking.activity_window_hours))
            .await?;

        let mut ranked: Vec<TrendingClaim> = pool
            .into_iter()
            .map(|claim| {
                let counts = activity.get(&claim.id).copied().unwrap_or_default();
                TrendingClaim {
                    trending_score: trending_score(counts, hours_since(claim.created_at, now)),
                    votes_24h: counts.votes,
                    evidence_24h: counts.evidence,
                    comments_24h: counts.comments,
                    id: claim.id,
                    statement: claim.statement,
                    gradient: claim.gradient,
                    vote_count: claim.vote_count,
                    evidence_count: claim.evidence_count,
                    tags: claim.tags,
                    author_id: claim.author_id,
                    created_at: claim.created_at,
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.trending_score.total_cmp(&a.trending_score));

        let page: Vec<TrendingClaim> = ranked
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        self.cache.put(&key, &page, self.ttl.trending_ttl_secs).await;
        Ok(page)
    }

    /// Recent claims sharing tags or voters with `claim`.
    pub async fn get_related_claims(&self, claim: ClaimId, limit: u32) -> Result<Vec<RelatedClaim>> {
        let key = keys::related(claim, limit);
        if let Some(related) = self.cache.get(&key).await {
            return Ok(related);
        }

        let source = self
            .store
            .get_claim(claim)
            .await?
            .ok_or_else(|| Error::not_found("claim", claim))?;
        let (_, pool) = self
            .pool(Duration::days(self.ranking.related_window_days), None)
            .await?;
        let pool: Vec<Claim> = pool.into_iter().filter(|c| c.id != claim).collect();

        let mut ids: Vec<ClaimId> = pool.iter().map(|c| c.id).collect();
        ids.push(claim);
        let voters = self.store.voters_of(&ids).await?;
        let empty = HashSet::new();
        let source_voters = voters.get(&claim).unwrap_or(&empty);
        let source_tags: HashSet<&str> = source.tags.iter().map(String::as_str).collect();

        let mut related: Vec<RelatedClaim> = pool
            .into_iter()
            .filter_map(|candidate| {
                let shared_tags: Vec<String> = candidate
                    .tags
                    .iter()
                    .filter(|t| source_tags.contains(t.as_str()))
                    .cloned()
                    .collect();
                let shared_voters = voters
                    .get(&candidate.id)
                    .map_or(0, |v| v.intersection(source_voters).count());
                let relevance = SHARED_TAG_POINTS * shared_tags.len() as u32
                    + SHARED_VOTER_POINTS * shared_voters as u32;
                (relevance > 0).then(|| RelatedClaim {
                    id: candidate.id,
                    statement: candidate.statement,
                    gradient: candidate.gradient,
                    vote_count: candidate.vote_count,
                    tags: candidate.tags,
                    relevance_score: relevance,
                    shared_tags,
                })
            })
            .collect();
        // stable: ties stay newest first
        related.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        related.truncate(limit as usize);

        debug!(claim_id = %claim, found = related.len(), "related claims");
        self.cache.put(&key, &related, self.ttl.related_ttl_secs).await;
        Ok(related)
    }

    /// Recent claims the agent has not voted on, leaning towards the tags it
    /// engages with most.
    pub async fn get_recommended_claims(
        &self,
        agent: AgentId,
        limit: u32,
    ) -> Result<Vec<RecommendedClaim>> {
        let key = keys::recommended(agent, limit);
        if let Some(recommended) = self.cache.get(&key).await {
            return Ok(recommended);
        }

        if self.store.get_agent(agent).await?.is_none() {
            return Err(Error::not_found("agent", agent));
        }
        let preferred: HashMap<String, u32> = self
            .store
            .expertise(agent, 0, self.ranking.preferred_tag_limit)
            .await?
            .into_iter()
            .map(|e| (e.tag, e.engagement_count))
            .collect();
        let (now, pool) = self
            .pool(Duration::days(self.ranking.recommend_window_days), Some(agent))
            .await?;

        let mut recommended: Vec<RecommendedClaim> = pool
            .into_iter()
            .map(|claim| {
                let matching_tags: Vec<String> = claim
                    .tags
                    .iter()
                    .filter(|t| preferred.contains_key(*t))
                    .cloned()
                    .collect();
                let tag_points: f64 = matching_tags
                    .iter()
                    .filter_map(|t| preferred.get(t))
                    .map(|&n| f64::from(n))
                    .sum();
                let recency =
                    (RECENCY_BONUS_MAX - hours_since(claim.created_at, now) / 24.0).max(0.0);
                let evidence = (EVIDENCE_BONUS_PER_ITEM * f64::from(claim.evidence_count))
                    .min(EVIDENCE_BONUS_MAX);
                RecommendedClaim {
                    recommendation_score: tag_points + recency + evidence,
                    matching_tags,
                    id: claim.id,
                    statement: claim.statement,
                    gradient: claim.gradient,
                    vote_count: claim.vote_count,
                    evidence_count: claim.evidence_count,
                    tags: claim.tags,
                    author_id: claim.author_id,
                    created_at: claim.created_at,
                }
            })
            .collect();
        recommended.sort_by(|a, b| b.recommendation_score.total_cmp(&a.recommendation_score));
        recommended.truncate(limit as usize);

        self.cache
            .put(&key, &recommended, self.ttl.recommended_ttl_secs)
            .await;
        Ok(recommended)
    }

    /// Drops every cached trending page, related list and recommendation.
    pub async fn invalidate_trending_cache(&self) -> u64 {
        let mut removed = 0;
        for prefix in keys::DISCOVERY_PREFIXES {
            removed += self.cache.invalidate_prefix(prefix).await;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_activity_outranks_stale_activity() {
        let counts = ActivityCounts {
            votes: 4,
            evidence: 1,
            comments: 2,
        };
        // 12 + 5 + 4 = 21 over 2^1.5
        let fresh = trending_score(counts, 0.0);
        assert!((fresh - 21.0 / 2f64.powf(1.5)).abs() < 1e-12);
        assert!(trending_score(counts, 48.0) < fresh);
    }

    #[test]
    fn no_activity_scores_zero() {
        assert_eq!(trending_score(ActivityCounts::default(), 3.0), 0.0);
    }
}
