//! Score cache
//!
//! Typed JSON view over a `CacheStore`. Reads fail open: a cache error is
//! logged and reported as a miss so the caller recomputes from the store.
//! Writes are best-effort.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use verity_core::{AgentId, ClaimId, LeaderboardPeriod, Tier};
use verity_store::CacheStore;

/// Cache key layout. Everything the engines cache lives under one of these.
pub mod keys {
    use super::*;

    pub fn gradient(claim: ClaimId) -> String {
        format!("gradient:{claim}")
    }

    pub fn gradient_history(claim: ClaimId, limit: u32) -> String {
        format!("gradient_history:{claim}:{limit}")
    }

    pub fn gradient_history_prefix(claim: ClaimId) -> String {
        format!("gradient_history:{claim}:")
    }

    pub fn reputation(agent: AgentId) -> String {
        format!("reputation:{agent}")
    }

    pub const LEADERBOARD_PREFIX: &str = "leaderboard:";

    pub fn leaderboard(
        period: LeaderboardPeriod,
        tier: Option<Tier>,
        limit: u32,
        offset: u32,
    ) -> String {
        let tier = tier.map(Tier::as_str).unwrap_or("all");
        format!("leaderboard:{period}:{tier}:{limit}:{offset}")
    }

    pub fn rank(agent: AgentId) -> String {
        format!("leaderboard:rank:{agent}")
    }

    pub fn learning_score(agent: AgentId) -> String {
        format!("learning:score:{agent}")
    }

    pub fn expertise(agent: AgentId, limit: u32) -> String {
        format!("learning:expertise:{agent}:{limit}")
    }

    pub fn expertise_prefix(agent: AgentId) -> String {
        format!("learning:expertise:{agent}:")
    }

    pub fn trending(limit: u32, offset: u32) -> String {
        format!("trending:claims:{limit}:{offset}")
    }

    pub fn related(claim: ClaimId, limit: u32) -> String {
        format!("related:{claim}:{limit}")
    }

    pub fn recommended(agent: AgentId, limit: u32) -> String {
        format!("recommended:{agent}:{limit}")
    }

    pub const DISCOVERY_PREFIXES: [&str; 3] = ["trending:", "related:", "recommended:"];

    pub fn consensus_marker(claim: ClaimId) -> String {
        format!("consensus_processed:{claim}")
    }
}

#[derive(Clone)]
pub struct ScoreCache {
    inner: Arc<dyn CacheStore>,
}

impl ScoreCache {
    pub fn new(inner: Arc<dyn CacheStore>) -> Self {
        Self { inner }
    }

    /// The raw store, for callers that need its atomic primitives.
    pub fn raw(&self) -> &Arc<dyn CacheStore> {
        &self.inner
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.inner.get(key).await {
            Ok(Some(raw)) => decode(key, &raw),
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, recomputing");
                None
            }
        }
    }

    /// Lines up with `keys`; a failed round trip is all misses.
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        match self.inner.get_many(keys).await {
            Ok(values) => values
                .into_iter()
                .zip(keys)
                .map(|(raw, key)| raw.and_then(|raw| decode(key, &raw)))
                .collect(),
            Err(e) => {
                warn!(count = keys.len(), error = %e, "batch cache read failed, recomputing");
                keys.iter().map(|_| None).collect()
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let encoded = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(key, error = %e, "cache encode failed");
                return;
            }
        };
        if let Err(e) = self
            .inner
            .set_ex(key, encoded, Duration::from_secs(ttl_secs))
            .await
        {
            warn!(key, error = %e, "cache write failed");
        }
    }

    pub async fn put_many<T: Serialize>(&self, entries: Vec<(String, T)>, ttl_secs: u64) {
        if entries.is_empty() {
            return;
        }
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::to_string(&value) {
                Ok(s) => encoded.push((key, s)),
                Err(e) => warn!(key, error = %e, "cache encode failed"),
            }
        }
        let count = encoded.len();
        if let Err(e) = self
            .inner
            .set_many_ex(encoded, Duration::from_secs(ttl_secs))
            .await
        {
            warn!(count, error = %e, "batch cache write failed");
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.inner.delete(key).await {
            warn!(key, error = %e, "cache invalidation failed");
        }
    }

    /// Drop every key under `prefix`. Returns how many went.
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        match self.inner.delete_matching(prefix, "").await {
            Ok(n) => n,
            Err(e) => {
                warn!(prefix, error = %e, "cache invalidation failed");
                0
            }
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, error = %e, "discarding undecodable cache entry");
            None
        }
    }
}
