//! Learning score engine
//!
//! `score = 0.5 * accuracy + 0.25 * consistency + 0.25 * trajectory`
//!
//! Accuracy comes from the agent's resolved-vote counters, which only
//! `update_on_claim_resolved` moves. Consistency and trajectory look at the
//! agent's resolved votes in three trailing 30-day windows.

use crate::cache::{keys, ScoreCache};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use verity_core::{
    round1, AgentId, CacheConfig, ClaimId, Clock, ConsensusConfig, Error, ExpertiseArea, Result,
};
use verity_store::ScoreStore;

/// Score for agents with nothing resolved yet.
pub const COLD_START_SCORE: f64 = 0.5;

/// Tags with less engagement are not shown as expertise.
pub const MIN_EXPERTISE_ENGAGEMENT: u32 = 3;

const WINDOW_DAYS: i64 = 30;
const WINDOW_COUNT: usize = 3;

/// `1 - min(1, 4 * variance)` of the per-window accuracies. Variance of a
/// rate in [0,1] is at most 0.25, hence the 4.
pub fn consistency_score(window_accuracies: &[f64]) -> f64 {
    if window_accuracies.len() < 2 {
        return 0.5;
    }
    let n = window_accuracies.len() as f64;
    let mean = window_accuracies.iter().sum::<f64>() / n;
    let variance = window_accuracies
        .iter()
        .map(|a| (a - mean).powi(2))
        .sum::<f64>()
        / n;
    1.0 - (4.0 * variance).min(1.0)
}

/// `0.5 + slope` of an ordinary least squares fit over
/// `(window index, accuracy)`, clamped to [0,1].
pub fn trajectory_score(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.5;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for &(x, y) in points {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x).powi(2);
    }
    if den == 0.0 {
        return 0.5;
    }
    (0.5 + num / den).clamp(0.0, 1.0)
}

pub fn learning_composite(accuracy: f64, consistency: f64, trajectory: f64) -> f64 {
    (0.5 * accuracy + 0.25 * consistency + 0.25 * trajectory).clamp(0.0, 1.0)
}

pub struct LearningEngine {
    store: Arc<dyn ScoreStore>,
    cache: ScoreCache,
    clock: Arc<dyn Clock>,
    ttl: CacheConfig,
    consensus: ConsensusConfig,
}

impl LearningEngine {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        cache: ScoreCache,
        clock: Arc<dyn Clock>,
        ttl: CacheConfig,
        consensus: ConsensusConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            ttl,
            consensus,
        }
    }

    pub async fn calculate_learning_score(&self, agent: AgentId) -> Result<f64> {
        let key = keys::learning_score(agent);
        if let Some(score) = self.cache.get::<f64>(&key).await {
            return Ok(score);
        }

        let record = self
            .store
            .get_agent(agent)
            .await?
            .ok_or_else(|| Error::not_found("agent", agent))?;
        if record.total_resolved_votes == 0 {
            self.cache
                .put(&key, &COLD_START_SCORE, self.ttl.learning_ttl_secs)
                .await;
            return Ok(COLD_START_SCORE);
        }

        let accuracy = record.accuracy_rate.unwrap_or(
            record.correct_resolved_votes as f64 / record.total_resolved_votes as f64,
        );
        let windows = self.window_accuracies(agent, self.clock.now()).await?;
        let present: Vec<f64> = windows.iter().flatten().copied().collect();
        let indexed: Vec<(f64, f64)> = windows
            .iter()
            .enumerate()
            .filter_map(|(i, acc)| acc.map(|a| (i as f64, a)))
            .collect();

        let consistency = consistency_score(&present);
        let trajectory = trajectory_score(&indexed);
        let score = learning_composite(accuracy, consistency, trajectory);

        self.store.set_learning_score(agent, score).await?;
        self.cache.put(&key, &score, self.ttl.learning_ttl_secs).await;
        debug!(
            agent_id = %agent,
            accuracy,
            consistency,
            trajectory,
            score,
            "learning score computed"
        );
        Ok(score)
    }

    /// Accuracy per trailing window, oldest first. `None` for empty windows.
    async fn window_accuracies(
        &self,
        agent: AgentId,
        now: DateTime<Utc>,
    ) -> Result<[Option<f64>; WINDOW_COUNT]> {
        let mut out = [None; WINDOW_COUNT];
        for (slot, acc) in out.iter_mut().enumerate() {
            let age = (WINDOW_COUNT - slot) as i64;
            let since = now - Duration::days(WINDOW_DAYS * age);
            let until = now - Duration::days(WINDOW_DAYS * (age - 1));
            let votes = self
                .store
                .resolved_votes(
                    agent,
                    since,
                    until,
                    self.consensus.resolution_true,
                    self.consensus.resolution_false,
                )
                .await?;

            let mut judged = 0u32;
            let mut correct = 0u32;
            for vote in votes {
                if let Some(verdict) = self.consensus.resolution_verdict(vote.gradient) {
                    judged += 1;
                    if verdict.agrees_with(vote.value) {
                        correct += 1;
                    }
                }
            }
            if judged > 0 {
                *acc = Some(correct as f64 / judged as f64);
            }
        }
        Ok(out)
    }

    /// Account one resolution for every voter on the claim: accuracy
    /// counters, per-tag expertise, then a fresh learning score. Nothing
    /// happens inside the resolution band. Voters are processed
    /// independently; a voter whose counters fail to update is skipped.
    #[instrument(skip(self), fields(claim_id = %claim))]
    pub async fn update_on_claim_resolved(
        &self,
        claim: ClaimId,
        final_gradient: f64,
    ) -> Result<HashMap<AgentId, f64>> {
        let mut scores = HashMap::new();
        let Some(verdict) = self.consensus.resolution_verdict(final_gradient) else {
            debug!(final_gradient, "claim not resolved");
            return Ok(scores);
        };

        let record = self
            .store
            .get_claim(claim)
            .await?
            .ok_or_else(|| Error::not_found("claim", claim))?;
        let votes = self.store.claim_votes(claim).await?;
        let now = self.clock.now();

        for (agent, value) in votes {
            let correct = (value > 0.5) == verdict.is_true();
            if let Err(e) = self.store.record_resolution(agent, correct).await {
                error!(agent_id = %agent, error = %e, "resolved-vote counters not updated");
                continue;
            }
            for tag in &record.tags {
                if let Err(e) = self
                    .store
                    .observe_expertise(agent, tag, Some(correct), now)
                    .await
                {
                    warn!(agent_id = %agent, tag = %tag, error = %e, "expertise not updated");
                }
            }
            self.invalidate_learning_cache(agent).await;
            match self.calculate_learning_score(agent).await {
                Ok(score) => {
                    scores.insert(agent, score);
                }
                Err(e) => warn!(agent_id = %agent, error = %e, "learning score not recomputed"),
            }
        }

        info!(verdict = ?verdict, voters = scores.len(), "resolution accounted");
        Ok(scores)
    }

    /// Tags the agent engages with most, accuracy in percent.
    pub async fn get_expertise_areas(
        &self,
        agent: AgentId,
        limit: u32,
    ) -> Result<Vec<ExpertiseArea>> {
        let key = keys::expertise(agent, limit);
        if let Some(areas) = self.cache.get(&key).await {
            return Ok(areas);
        }
        let areas: Vec<ExpertiseArea> = self
            .store
            .expertise(agent, MIN_EXPERTISE_ENGAGEMENT, limit)
            .await?
            .into_iter()
            .map(|e| ExpertiseArea {
                tag: e.tag,
                engagement_count: e.engagement_count,
                accuracy: e.accuracy_in_tag.map(|a| round1(a * 100.0)),
            })
            .collect();
        self.cache
            .put(&key, &areas, self.ttl.expertise_ttl_secs)
            .await;
        Ok(areas)
    }

    /// Note an engagement with the given tags. Accuracy is left alone.
    pub async fn track_activity(&self, agent: AgentId, tags: &[String]) -> Result<()> {
        let now = self.clock.now();
        if self.store.mark_first_activity(agent, now).await? {
            debug!(agent_id = %agent, "first activity");
        }
        for tag in tags {
            self.store.observe_expertise(agent, tag, None, now).await?;
        }
        self.cache
            .invalidate_prefix(&keys::expertise_prefix(agent))
            .await;
        Ok(())
    }

    pub async fn invalidate_learning_cache(&self, agent: AgentId) {
        self.cache.invalidate(&keys::learning_score(agent)).await;
        self.cache
            .invalidate_prefix(&keys::expertise_prefix(agent))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_accuracy_is_fully_consistent() {
        assert_eq!(consistency_score(&[0.7, 0.7, 0.7]), 1.0);
    }

    #[test]
    fn alternating_accuracy_is_inconsistent() {
        // variance 0.25 -> 4 * 0.25 = 1
        assert_eq!(consistency_score(&[0.0, 1.0]), 0.0);
    }

    #[test]
    fn one_window_is_neutral() {
        assert_eq!(consistency_score(&[0.9]), 0.5);
        assert_eq!(trajectory_score(&[(2.0, 0.9)]), 0.5);
    }

    #[test]
    fn improving_agent_trends_up() {
        let t = trajectory_score(&[(0.0, 0.4), (1.0, 0.6), (2.0, 0.8)]);
        assert!((t - 0.7).abs() < 1e-12, "{t}");
    }

    #[test]
    fn trajectory_skips_empty_windows_but_keeps_their_index() {
        // oldest and newest only: slope (0.9 - 0.5) / 2
        let t = trajectory_score(&[(0.0, 0.5), (2.0, 0.9)]);
        assert!((t - 0.7).abs() < 1e-12, "{t}");
    }

    #[test]
    fn trajectory_is_clamped() {
        assert_eq!(trajectory_score(&[(0.0, 0.0), (1.0, 1.0)]), 1.0);
        assert_eq!(trajectory_score(&[(0.0, 1.0), (1.0, 0.0)]), 0.0);
    }

    #[test]
    fn composite_weights() {
        assert!((learning_composite(1.0, 0.5, 0.5) - 0.75).abs() < 1e-12);
        assert_eq!(learning_composite(0.0, 0.0, 0.0), 0.0);
    }
}
