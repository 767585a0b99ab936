//! Daily action quotas
//!
//! One counter per (agent, action, UTC day) in the fast-path cache, expiring
//! at the next UTC midnight. The durable counter table is an audit trail
//! only. Unlike every other cache user, admission fails closed: if the
//! counter cannot be read or bumped, the action is denied.

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use verity_core::{
    seconds_until_next_midnight, ActionType, Agent, AgentId, Clock, Error, LimitStatus, Result,
};
use verity_store::{CacheStore, ScoreStore};

/// Outcome of an admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateCheck {
    pub allowed: bool,
    pub current: u32,
    pub limit: u32,
}

pub fn counter_key(agent: AgentId, action: ActionType, day: NaiveDate) -> String {
    format!("rate_limit:{agent}:{action}:{}", day.format("%Y-%m-%d"))
}

pub struct RateLimiter {
    store: Arc<dyn ScoreStore>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn ScoreStore>, cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache,
            clock,
        }
    }

    async fn agent(&self, agent: AgentId) -> Result<Agent> {
        self.store
            .get_agent(agent)
            .await?
            .ok_or_else(|| Error::not_found("agent", agent))
    }

    async fn current(&self, key: &str) -> Result<u32> {
        let raw = self.cache.get(key).await.map_err(|e| {
            warn!(key, error = %e, "rate counter unreadable, denying");
            e
        })?;
        match raw {
            None => Ok(0),
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|e| Error::cache(format!("rate counter {key} holds {raw:?}: {e}"))),
        }
    }

    /// `Err(Error::Cache)` when the counter cannot be read; callers must
    /// treat that as a denial.
    pub async fn check_rate_limit(&self, agent: AgentId, action: ActionType) -> Result<RateCheck> {
        let limit = self.agent(agent).await?.daily_limit(action);
        let key = counter_key(agent, action, self.clock.today());
        let current = self.current(&key).await?;
        Ok(RateCheck {
            allowed: current < limit,
            current,
            limit,
        })
    }

    /// Count one action. With `check_first`, refuse once the day's quota is
    /// used up.
    pub async fn increment(
        &self,
        agent: AgentId,
        action: ActionType,
        check_first: bool,
    ) -> Result<u32> {
        if check_first {
            let check = self.check_rate_limit(agent, action).await?;
            if !check.allowed {
                info!(
                    agent_id = %agent,
                    action = %action,
                    current = check.current,
                    limit = check.limit,
                    "rate limit exceeded"
                );
                return Err(Error::RateLimitExceeded {
                    action,
                    current: check.current,
                    limit: check.limit,
                });
            }
        }

        let now = self.clock.now();
        let today = now.date_naive();
        let key = counter_key(agent, action, today);
        let bumped = self.bump(&key, now).await;

        if let Err(e) = self.store.bump_rate_counter(agent, action, today).await {
            warn!(agent_id = %agent, action = %action, error = %e, "durable rate counter not updated");
        }

        let count = bumped?;
        debug!(agent_id = %agent, action = %action, count, "rate counter bumped");
        Ok(count)
    }

    async fn bump(&self, key: &str, now: DateTime<Utc>) -> Result<u32> {
        let count = self.cache.incr(key).await?;
        if count == 1 {
            let ttl = Duration::from_secs(seconds_until_next_midnight(now));
            self.cache.expire(key, ttl).await?;
        }
        u32::try_from(count).map_err(|_| Error::cache(format!("rate counter {key} out of range: {count}")))
    }

    pub async fn get_remaining(&self, agent: AgentId, action: ActionType) -> Result<u32> {
        let check = self.check_rate_limit(agent, action).await?;
        Ok(check.limit.saturating_sub(check.current))
    }

    /// Every action type, in declaration order.
    pub async fn get_all_limits(&self, agent: AgentId) -> Result<Vec<(ActionType, LimitStatus)>> {
        let record = self.agent(agent).await?;
        let today = self.clock.today();
        let mut out = Vec::with_capacity(ActionType::ALL.len());
        for action in ActionType::ALL {
            let limit = record.daily_limit(action);
            let current = self.current(&counter_key(agent, action, today)).await?;
            out.push((
                action,
                LimitStatus {
                    current,
                    limit,
                    remaining: limit.saturating_sub(current),
                    exceeded: current >= limit,
                },
            ));
        }
        Ok(out)
    }

    /// Clear today's counters for every action. Returns how many keys went.
    pub async fn reset_limits(&self, agent: AgentId) -> Result<u64> {
        let prefix = format!("rate_limit:{agent}:");
        let suffix = format!(":{}", self.clock.today().format("%Y-%m-%d"));
        let removed = self.cache.delete_matching(&prefix, &suffix).await?;
        info!(agent_id = %agent, removed, "rate limits reset");
        Ok(removed)
    }
}
