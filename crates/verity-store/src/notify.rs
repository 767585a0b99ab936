//! Notification delivery
//!
//! The engines only ever need to say "tell this agent this happened".

use crate::cache::CacheStore;
use crate::store::ScoreStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use verity_core::{AgentId, Clock, Notification, NotificationKind, Result};

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        agent: AgentId,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<()>;
}

pub fn unread_count_key(agent: AgentId) -> String {
    format!("notifications:unread:{agent}")
}

/// Persists notifications and keeps the per-agent unread count cached.
pub struct StoreNotifier {
    store: Arc<dyn ScoreStore>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    count_ttl: Duration,
}

impl StoreNotifier {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        count_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            count_ttl,
        }
    }

    async fn invalidate(&self, agent: AgentId) {
        if let Err(e) = self.cache.delete(&unread_count_key(agent)).await {
            warn!(agent_id = %agent, error = %e, "failed to invalidate unread count");
        }
    }

    /// Unread notifications for the agent, served from cache when possible.
    pub async fn unread_count(&self, agent: AgentId) -> Result<u64> {
        let key = unread_count_key(agent);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                if let Ok(n) = cached.parse::<u64>() {
                    return Ok(n);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(agent_id = %agent, error = %e, "unread count cache read failed"),
        }

        let count = self.store.count_unread(agent).await?;
        if let Err(e) = self
            .cache
            .set_ex(&key, count.to_string(), self.count_ttl)
            .await
        {
            warn!(agent_id = %agent, error = %e, "unread count cache write failed");
        }
        Ok(count)
    }

    pub async fn mark_all_read(&self, agent: AgentId) -> Result<u64> {
        let changed = self.store.mark_all_read(agent).await?;
        self.invalidate(agent).await;
        Ok(changed)
    }
}

#[async_trait::async_trait]
impl Notifier for StoreNotifier {
    async fn notify(
        &self,
        agent: AgentId,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        let notification = Notification {
            id: Uuid::new_v4(),
            agent_id: agent,
            kind,
            payload,
            is_read: false,
            created_at: self.clock.now(),
        };
        self.store.insert_notification(&notification).await?;
        self.invalidate(agent).await;
        debug!(agent_id = %agent, kind = %kind, "notification stored");
        Ok(())
    }
}

/// Keeps every notification in memory (for tests).
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(AgentId, NotificationKind, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(AgentId, NotificationKind, serde_json::Value)> {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        agent: AgentId,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((agent, kind, payload));
        Ok(())
    }
}
