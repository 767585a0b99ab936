//! Background sweeper
//!
//! Three independent loops share one engine:
//! - gradient queue drain: recompute claims queued by `enqueue_gradient_update`
//! - consensus detection: reward voters once a claim leaves the reputation
//!   band, then account resolutions once it leaves the stricter resolution band
//! - token cleanup: drop expired and revoked refresh tokens
//!
//! This is the only place gradients feed back into reputation.

use crate::report::{ConsensusReport, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use verity_core::{Claim, ClaimId, ConsensusConfig, Error, Result, SweeperConfig};
use verity_engine::cache::keys;
use verity_engine::{ScoringEngine, GRADIENT_QUEUE};

pub struct Sweeper {
    engine: Arc<ScoringEngine>,
    config: SweeperConfig,
    consensus: ConsensusConfig,
}

impl Sweeper {
    pub fn new(engine: Arc<ScoringEngine>) -> Self {
        let config = engine.config().sweeper.clone();
        let consensus = engine.config().consensus.clone();
        Self {
            engine,
            config,
            consensus,
        }
    }

    pub fn engine(&self) -> &Arc<ScoringEngine> {
        &self.engine
    }

    // ---------------------------------------------------------------------
    // Stages
    // ---------------------------------------------------------------------

    /// Pop one batch off the gradient queue and recompute each distinct
    /// claim once. Returns `(popped, updated)`.
    pub async fn drain_gradient_queue(&self) -> Result<(usize, usize)> {
        let queue = self.engine.cache().raw();
        let mut claims: Vec<ClaimId> = Vec::new();
        let mut popped = 0;
        while popped < self.config.gradient_batch_size {
            let Some(raw) = queue.pop_front(GRADIENT_QUEUE).await? else {
                break;
            };
            popped += 1;
            match raw.parse::<ClaimId>() {
                Ok(id) => claims.push(id),
                Err(e) => warn!(entry = %raw, error = %e, "dropping malformed queue entry"),
            }
        }
        claims.sort();
        claims.dedup();

        let mut updated = 0;
        for claim in claims {
            match self.engine.gradient().update_gradient(claim).await {
                Ok(_) => updated += 1,
                Err(Error::NotFound { .. }) => debug!(claim_id = %claim, "queued claim is gone"),
                Err(e) => warn!(claim_id = %claim, error = %e, "queued gradient update failed"),
            }
        }
        if popped > 0 {
            debug!(popped, updated, "gradient queue drained");
        }
        Ok((popped, updated))
    }

    /// One consensus pass over the most recently active well-voted claims.
    pub async fn sweep_consensus(&self) -> Result<ConsensusReport> {
        let candidates = self
            .engine
            .store()
            .consensus_candidates(self.consensus.min_votes, self.consensus.scan_limit)
            .await?;

        let mut report = ConsensusReport {
            examined: candidates.len(),
            ..Default::default()
        };
        for claim in &candidates {
            self.reward_consensus(claim, &mut report).await;
            self.account_resolution(claim, &mut report).await;
        }

        if report.reputation_updates > 0 {
            self.engine.reputation().invalidate_leaderboard_cache().await;
        }
        if report.rewarded_claims > 0 || report.resolved_claims > 0 {
            info!(
                examined = report.examined,
                rewarded = report.rewarded_claims,
                resolved = report.resolved_claims,
                "consensus sweep"
            );
        }
        Ok(report)
    }

    /// Reputation stage. The marker is taken before any reward is written, so
    /// a claim's voters are rewarded at most once per marker lifetime.
    async fn reward_consensus(&self, claim: &Claim, report: &mut ConsensusReport) {
        if self.consensus.reputation_verdict(claim.gradient).is_none() {
            return;
        }
        let marker = keys::consensus_marker(claim.id);
        let cache = self.engine.cache().raw();
        match cache
            .set_nx_ex(&marker, "1".to_string(), self.consensus.marker_ttl())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                report.already_processed += 1;
                return;
            }
            Err(e) => {
                warn!(claim_id = %claim.id, error = %e, "consensus marker unavailable, skipping claim");
                return;
            }
        }

        let votes = match self.engine.store().claim_votes(claim.id).await {
            Ok(votes) => votes,
            Err(e) => {
                error!(claim_id = %claim.id, error = %e, "could not load voters");
                // nothing was written; let the next pass try again
                if let Err(e) = cache.delete(&marker).await {
                    warn!(claim_id = %claim.id, error = %e, "consensus marker not released");
                }
                return;
            }
        };
        let updated = self
            .engine
            .reputation()
            .on_consensus_reached(claim.id, claim.gradient, &votes)
            .await;
        report.rewarded_claims += 1;
        report.reputation_updates += updated.len();
    }

    /// Learning stage, guarded by the claim's durable `resolved_at` stamp.
    async fn account_resolution(&self, claim: &Claim, report: &mut ConsensusReport) {
        if claim.resolved_at.is_some()
            || self.consensus.resolution_verdict(claim.gradient).is_none()
        {
            return;
        }
        let now = self.engine.clock().now();
        match self.engine.store().mark_claim_resolved(claim.id, now).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!(claim_id = %claim.id, error = %e, "could not stamp resolution");
                return;
            }
        }
        match self
            .engine
            .learning()
            .update_on_claim_resolved(claim.id, claim.gradient)
            .await
        {
            Ok(_) => report.resolved_claims += 1,
            Err(e) => error!(claim_id = %claim.id, error = %e, "resolution bookkeeping failed"),
        }
    }

    pub async fn cleanup_tokens(&self) -> Result<u64> {
        let purged = self
            .engine
            .store()
            .purge_refresh_tokens(self.engine.clock().now())
            .await?;
        if purged > 0 {
            info!(purged, "refresh tokens cleaned up");
        }
        Ok(purged)
    }

    /// Every stage once, in order. Used by `verity sweep-once` and tests.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let (_, gradients_updated) = self.drain_gradient_queue().await?;
        let consensus = self.sweep_consensus().await?;
        let tokens_purged = self.cleanup_tokens().await?;
        Ok(SweepReport {
            gradients_updated,
            consensus,
            tokens_purged,
        })
    }

    // ---------------------------------------------------------------------
    // Loops
    // ---------------------------------------------------------------------

    /// Run all three loops until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("sweeper started");
        tokio::join!(
            self.gradient_loop(cancel.clone()),
            self.consensus_loop(cancel.clone()),
            self.token_loop(cancel),
        );
        info!("sweeper stopped");
    }

    async fn gradient_loop(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let pause = match self.drain_gradient_queue().await {
                Ok((0, _)) => self.config.gradient_idle(),
                Ok(_) => Duration::ZERO,
                Err(e) => {
                    error!(error = %e, "gradient loop error");
                    self.config.gradient_error_backoff()
                }
            };
            if pause.is_zero() {
                tokio::task::yield_now().await;
            } else if pause_or_cancel(&cancel, pause).await {
                break;
            }
        }
        debug!("gradient loop stopped");
    }

    async fn consensus_loop(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let pause = match self.sweep_consensus().await {
                Ok(_) => self.config.consensus_interval(),
                Err(e) => {
                    error!(error = %e, "consensus loop error");
                    self.config.consensus_error_backoff()
                }
            };
            if pause_or_cancel(&cancel, pause).await {
                break;
            }
        }
        debug!("consensus loop stopped");
    }

    async fn token_loop(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let pause = match self.cleanup_tokens().await {
                Ok(_) => self.config.token_cleanup_interval(),
                Err(e) => {
                    error!(error = %e, "token cleanup error");
                    self.config.token_error_backoff()
                }
            };
            if pause_or_cancel(&cancel, pause).await {
                break;
            }
        }
        debug!("token loop stopped");
    }
}

/// Sleep for `pause`; true if cancelled first.
async fn pause_or_cancel(cancel: &CancellationToken, pause: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(pause) => false,
    }
}
