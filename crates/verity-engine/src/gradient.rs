//! Gradient engine
//!
//! A claim's gradient is the reputation-weighted mean of its vote values.
//! It is always recomputable from the vote set and the voters' current
//! reputations; the cached value and the copy on the claim row are views.

use crate::cache::{keys, ScoreCache};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use verity_core::{
    CacheConfig, ClaimId, Clock, Error, GradientHistoryPoint, Result, UNCERTAIN_GRADIENT,
};
use verity_store::ScoreStore;

/// Influence of an agent with no reputation at all.
pub const MIN_VOTE_WEIGHT: f64 = 0.1;

/// List drained by the sweeper's gradient loop.
pub const GRADIENT_QUEUE: &str = "queue:gradient_updates";

/// `max(0.1, ln(1 + max(0, reputation)))`
pub fn vote_weight(reputation: f64) -> f64 {
    (1.0 + reputation.max(0.0)).ln().max(MIN_VOTE_WEIGHT)
}

/// Weighted mean of `(value, reputation)` pairs; 0.5 with no votes.
///
/// Pairs are summed in a canonical order so the result does not depend on
/// the order the votes arrive in, down to the last bit.
pub fn weighted_gradient<I>(votes: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut votes: Vec<(f64, f64)> = votes.into_iter().collect();
    votes.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let (mut weighted, mut total) = (0.0_f64, 0.0_f64);
    for (value, reputation) in votes {
        let weight = vote_weight(reputation);
        weighted += weight * value;
        total += weight;
    }
    if total > 0.0 {
        (weighted / total).clamp(0.0, 1.0)
    } else {
        UNCERTAIN_GRADIENT
    }
}

pub struct GradientEngine {
    store: Arc<dyn ScoreStore>,
    cache: ScoreCache,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl GradientEngine {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        cache: ScoreCache,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            config,
        }
    }

    /// Straight from the store, no cache involved.
    pub async fn compute_gradient(&self, claim: ClaimId) -> Result<f64> {
        let votes = self.store.weighted_votes(&[claim]).await?;
        Ok(weighted_gradient(
            votes.iter().map(|v| (v.value, v.reputation)),
        ))
    }

    pub async fn get_gradient(&self, claim: ClaimId) -> Result<f64> {
        let key = keys::gradient(claim);
        if let Some(gradient) = self.cache.get::<f64>(&key).await {
            return Ok(gradient);
        }
        let gradient = self.compute_gradient(claim).await?;
        self.cache
            .put(&key, &gradient, self.config.gradient_ttl_secs)
            .await;
        Ok(gradient)
    }

    /// Recompute, write onto the claim, append a history point and refresh
    /// the cache. The only path that grows gradient history.
    #[instrument(skip(self), fields(claim_id = %claim))]
    pub async fn update_gradient(&self, claim: ClaimId) -> Result<f64> {
        let gradient = self.compute_gradient(claim).await?;
        let point = self
            .store
            .record_gradient(claim, gradient, self.clock.now())
            .await?
            .ok_or_else(|| Error::not_found("claim", claim))?;

        self.cache
            .put(&keys::gradient(claim), &gradient, self.config.gradient_ttl_secs)
            .await;
        self.cache
            .invalidate_prefix(&keys::gradient_history_prefix(claim))
            .await;

        debug!(gradient, vote_count = point.vote_count, "gradient updated");
        Ok(gradient)
    }

    /// Cache-first for many claims. Misses are computed from one aggregate
    /// vote query and written back in one pipelined call.
    pub async fn get_batch_gradients(&self, claims: &[ClaimId]) -> Result<HashMap<ClaimId, f64>> {
        let mut out = HashMap::with_capacity(claims.len());
        if claims.is_empty() {
            return Ok(out);
        }

        let cache_keys: Vec<String> = claims.iter().copied().map(keys::gradient).collect();
        let cached = self.cache.get_many::<f64>(&cache_keys).await;

        let mut missed = Vec::new();
        for (claim, hit) in claims.iter().zip(cached) {
            match hit {
                Some(gradient) => {
                    out.insert(*claim, gradient);
                }
                None => missed.push(*claim),
            }
        }
        missed.sort();
        missed.dedup();
        if missed.is_empty() {
            return Ok(out);
        }

        let mut grouped: HashMap<ClaimId, Vec<(f64, f64)>> = HashMap::new();
        for vote in self.store.weighted_votes(&missed).await? {
            grouped
                .entry(vote.claim_id)
                .or_default()
                .push((vote.value, vote.reputation));
        }

        let mut fresh = Vec::with_capacity(missed.len());
        for claim in missed {
            let gradient = weighted_gradient(grouped.remove(&claim).unwrap_or_default());
            out.insert(claim, gradient);
            fresh.push((keys::gradient(claim), gradient));
        }
        debug!(requested = claims.len(), misses = fresh.len(), "batch gradients");
        self.cache
            .put_many(fresh, self.config.gradient_ttl_secs)
            .await;
        Ok(out)
    }

    /// Newest first.
    pub async fn get_gradient_history(
        &self,
        claim: ClaimId,
        limit: u32,
    ) -> Result<Vec<GradientHistoryPoint>> {
        let key = keys::gradient_history(claim, limit);
        if let Some(history) = self.cache.get(&key).await {
            return Ok(history);
        }
        let history = self.store.gradient_history(claim, limit).await?;
        self.cache
            .put(&key, &history, self.config.gradient_history_ttl_secs)
            .await;
        Ok(history)
    }

    pub async fn invalidate_gradient(&self, claim: ClaimId) {
        self.cache.invalidate(&keys::gradient(claim)).await;
    }

    /// Defer a recomputation to the sweeper. Returns the queue length.
    pub async fn enqueue_gradient_update(&self, claim: ClaimId) -> Result<u64> {
        self.cache
            .raw()
            .push_back(GRADIENT_QUEUE, claim.to_string())
            .await
    }
}
