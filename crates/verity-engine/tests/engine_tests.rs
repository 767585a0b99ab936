//! Tests for verity-engine over the SQLite store and the in-memory cache

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use verity_core::*;
use verity_engine::*;
use verity_store::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap()
}

struct Harness {
    engine: ScoringEngine,
    store: Arc<SqliteStore>,
    cache: Arc<MemoryCache>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

fn harness_with(config: EngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let cache = Arc::new(MemoryCache::new(clock.clone()));
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = ScoringEngine::new(
        config,
        store.clone(),
        cache.clone(),
        notifier.clone(),
        clock.clone(),
    );
    Harness {
        engine,
        store,
        cache,
        clock,
        notifier,
    }
}

impl Harness {
    async fn agent(&self, name: &str, reputation: f64) -> Agent {
        let agent = Agent::new(name, self.clock.now()).with_reputation(reputation);
        self.store.insert_agent(&agent).await.unwrap();
        agent
    }

    async fn claim(&self, author: AgentId, tags: &[&str]) -> Claim {
        let claim = Claim::new(author, "the sky is blue", self.clock.now())
            .with_tags(tags.iter().copied());
        self.store.insert_claim(&claim).await.unwrap();
        claim
    }
}

// ===========================================================================
// Gradient
// ===========================================================================

#[tokio::test]
async fn unvoted_claim_is_uncertain() {
    let h = harness();
    let author = h.agent("author", 0.0).await;
    let claim = h.claim(author.id, &[]).await;
    assert_eq!(h.engine.gradient().get_gradient(claim.id).await.unwrap(), 0.5);
    assert_eq!(h.engine.gradient().compute_gradient(claim.id).await.unwrap(), 0.5);
}

#[tokio::test]
async fn single_full_vote_is_certain() {
    let h = harness();
    let voter = h.agent("voter", 0.0).await;
    let claim = h.claim(voter.id, &[]).await;
    assert_eq!(h.engine.cast_vote(voter.id, claim.id, 1.0).await.unwrap(), 1.0);
    let stored = h.store.get_claim(claim.id).await.unwrap().unwrap();
    assert_eq!(stored.gradient, 1.0);
    assert_eq!(stored.vote_count, 1);
}

#[tokio::test]
async fn read_after_update_is_served_from_cache() {
    let h = harness();
    let voter = h.agent("voter", 50.0).await;
    let claim = h.claim(voter.id, &[]).await;
    let fresh = h.engine.cast_vote(voter.id, claim.id, 0.9).await.unwrap();

    // Remove the vote behind the engine's back: only the cache still knows.
    h.store.delete_vote(claim.id, voter.id, t0()).await.unwrap();
    assert_eq!(h.engine.gradient().get_gradient(claim.id).await.unwrap(), fresh);
    assert_eq!(h.engine.gradient().compute_gradient(claim.id).await.unwrap(), 0.5);

    h.engine.gradient().invalidate_gradient(claim.id).await;
    assert_eq!(h.engine.gradient().get_gradient(claim.id).await.unwrap(), 0.5);
}

#[tokio::test]
async fn revote_replaces_the_earlier_value() {
    let h = harness();
    let voter = h.agent("voter", 0.0).await;
    let claim = h.claim(voter.id, &[]).await;
    h.engine.cast_vote(voter.id, claim.id, 1.0).await.unwrap();
    assert_eq!(h.engine.cast_vote(voter.id, claim.id, 0.0).await.unwrap(), 0.0);
    assert_eq!(h.store.get_claim(claim.id).await.unwrap().unwrap().vote_count, 1);
}

#[tokio::test]
async fn batch_gradients_mix_hits_and_misses() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let b = h.agent("b", 0.0).await;
    let voted = h.claim(a.id, &[]).await;
    let split = h.claim(a.id, &[]).await;
    let empty = h.claim(a.id, &[]).await;
    h.engine.cast_vote(a.id, voted.id, 1.0).await.unwrap();
    h.store
        .upsert_vote(&ClaimVote {
            claim_id: split.id,
            agent_id: a.id,
            value: 1.0,
            weight: 0.1,
            created_at: t0(),
            updated_at: t0(),
        })
        .await
        .unwrap();
    h.store
        .upsert_vote(&ClaimVote {
            claim_id: split.id,
            agent_id: b.id,
            value: 0.0,
            weight: 0.1,
            created_at: t0(),
            updated_at: t0(),
        })
        .await
        .unwrap();

    let gradients = h
        .engine
        .gradient()
        .get_batch_gradients(&[voted.id, split.id, empty.id, voted.id])
        .await
        .unwrap();
    assert_eq!(gradients.len(), 3);
    assert_eq!(gradients[&voted.id], 1.0);
    assert!((gradients[&split.id] - 0.5).abs() < 1e-12);
    assert_eq!(gradients[&empty.id], 0.5);

    // misses were written back
    assert!(h.cache.get(&format!("gradient:{}", split.id)).await.unwrap().is_some());
    assert!(h.cache.get(&format!("gradient:{}", empty.id)).await.unwrap().is_some());
}

#[tokio::test]
async fn history_grows_with_each_update_newest_first() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let b = h.agent("b", 0.0).await;
    let claim = h.claim(a.id, &[]).await;
    h.engine.cast_vote(a.id, claim.id, 1.0).await.unwrap();
    h.clock.advance(Duration::minutes(1));
    h.engine.cast_vote(b.id, claim.id, 0.0).await.unwrap();

    let history = h
        .engine
        .gradient()
        .get_gradient_history(claim.id, 100)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].vote_count, 2);
    assert!((history[0].gradient - 0.5).abs() < 1e-12);
    assert_eq!(history[1].gradient, 1.0);
}

#[tokio::test]
async fn retract_recomputes_and_unknown_vote_is_not_found() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let claim = h.claim(a.id, &[]).await;
    h.engine.cast_vote(a.id, claim.id, 1.0).await.unwrap();
    assert_eq!(h.engine.retract_vote(a.id, claim.id).await.unwrap(), 0.5);
    assert!(matches!(
        h.engine.retract_vote(a.id, claim.id).await,
        Err(Error::NotFound { kind: "vote", .. })
    ));
}

#[tokio::test]
async fn vote_outside_unit_interval_is_rejected() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let claim = h.claim(a.id, &[]).await;
    for value in [-0.1, 1.5, f64::NAN] {
        assert!(matches!(
            h.engine.cast_vote(a.id, claim.id, value).await,
            Err(Error::InvalidInput(_))
        ));
    }
}

#[tokio::test]
async fn vote_on_missing_claim_is_not_found() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    assert!(matches!(
        h.engine.cast_vote(a.id, ClaimId::new(), 1.0).await,
        Err(Error::NotFound { kind: "claim", .. })
    ));
}

#[tokio::test]
async fn queued_updates_land_on_the_shared_list() {
    let h = harness();
    let claim = ClaimId::new();
    assert_eq!(h.engine.gradient().enqueue_gradient_update(claim).await.unwrap(), 1);
    assert_eq!(
        h.cache.pop_front(GRADIENT_QUEUE).await.unwrap(),
        Some(claim.to_string())
    );
}

// ===========================================================================
// Reputation
// ===========================================================================

#[tokio::test]
async fn reputation_never_goes_negative() {
    let h = harness();
    let a = h.agent("a", 2.0).await;
    let score = h
        .engine
        .reputation()
        .update_reputation(a.id, ReputationReason::ManualAdjustment, Some(-3.0), None)
        .await
        .unwrap();
    assert_eq!(score, 0.0);
    let history = h.engine.reputation().get_reputation_history(a.id, 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].delta, -2.0);
    assert_eq!(history[0].requested_delta, -3.0);
}

#[tokio::test]
async fn crossing_a_threshold_promotes_and_notifies() {
    let h = harness();
    let a = h.agent("a", 99.0).await;
    let score = h
        .engine
        .reputation()
        .update_reputation(a.id, ReputationReason::EvidenceUpvoted, None, None)
        .await
        .unwrap();
    assert_eq!(score, 104.0);

    let stored = h.store.get_agent(a.id).await.unwrap().unwrap();
    assert_eq!(stored.tier, Tier::Established);
    assert_eq!(stored.quota(), Tier::Established.quota());

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, NotificationKind::TierPromotion);
    assert_eq!(sent[0].2["title"], "Promoted to Established!");
    assert_eq!(sent[0].2["old_tier"], "new");
    assert_eq!(sent[0].2["votes_per_day"], 100);
}

#[tokio::test]
async fn demotion_is_silent() {
    let h = harness();
    let a = h.agent("a", 101.0).await;
    h.engine
        .reputation()
        .update_reputation(a.id, ReputationReason::EvidenceDownvoted, None, None)
        .await
        .unwrap();
    let stored = h.store.get_agent(a.id).await.unwrap().unwrap();
    assert_eq!(stored.tier, Tier::New);
    assert_eq!(stored.quota(), Tier::New.quota());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn manual_reason_without_delta_is_rejected() {
    let h = harness();
    let a = h.agent("a", 10.0).await;
    assert!(matches!(
        h.engine
            .reputation()
            .update_reputation(a.id, ReputationReason::ManualAdjustment, None, None)
            .await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn no_consensus_changes_nothing() {
    let h = harness();
    let a = h.agent("a", 10.0).await;
    let b = h.agent("b", 10.0).await;
    let claim = h.claim(a.id, &[]).await;
    let updated = h
        .engine
        .reputation()
        .on_consensus_reached(claim.id, 0.5, &[(a.id, 0.9), (b.id, 0.2)])
        .await;
    assert!(updated.is_empty());
    assert!(h.store.reputation_history(a.id, 10).await.unwrap().is_empty());
    assert!(h.store.reputation_history(b.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn consensus_rewards_aligned_and_penalises_opposed() {
    let h = harness();
    let a = h.agent("a", 10.0).await;
    let b = h.agent("b", 10.0).await;
    let claim = h.claim(a.id, &[]).await;
    let updated = h
        .engine
        .reputation()
        .on_consensus_reached(claim.id, 0.8, &[(a.id, 0.9), (b.id, 0.2)])
        .await;
    assert_eq!(updated[&a.id], 11.0);
    assert_eq!(updated[&b.id], 9.5);

    let a_history = h.store.reputation_history(a.id, 10).await.unwrap();
    assert_eq!(a_history[0].reason, ReputationReason::VoteAligned);
    assert_eq!(a_history[0].reference, Some(Reference::claim(claim.id)));
    let b_history = h.store.reputation_history(b.id, 10).await.unwrap();
    assert_eq!(b_history[0].reason, ReputationReason::VoteOpposed);
}

#[tokio::test]
async fn consensus_false_flips_alignment() {
    let h = harness();
    let a = h.agent("a", 10.0).await;
    let claim = h.claim(a.id, &[]).await;
    let updated = h
        .engine
        .reputation()
        .on_consensus_reached(claim.id, 0.1, &[(a.id, 0.1)])
        .await;
    assert_eq!(updated[&a.id], 11.0);
}

#[tokio::test]
async fn one_failing_voter_does_not_stop_the_rest() {
    let h = harness();
    let a = h.agent("a", 10.0).await;
    let ghost = AgentId::new();
    let claim = h.claim(a.id, &[]).await;
    let updated = h
        .engine
        .reputation()
        .on_consensus_reached(claim.id, 0.9, &[(ghost, 0.9), (a.id, 0.9)])
        .await;
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[&a.id], 11.0);
}

#[tokio::test]
async fn cached_reputation_is_dropped_on_update() {
    let h = harness();
    let a = h.agent("a", 10.0).await;
    let rep = h.engine.reputation();
    assert_eq!(rep.get_reputation(a.id).await.unwrap(), 10.0);
    rep.update_reputation(a.id, ReputationReason::VoteAligned, None, None)
        .await
        .unwrap();
    assert_eq!(rep.get_reputation(a.id).await.unwrap(), 11.0);
    assert!(matches!(
        rep.get_reputation(AgentId::new()).await,
        Err(Error::NotFound { kind: "agent", .. })
    ));
}

#[tokio::test]
async fn leaderboard_ranks_follow_the_page_offset() {
    let h = harness();
    let mut ids = Vec::new();
    for (i, score) in [500.0, 40.0, 1200.0, 75.0, 300.0].into_iter().enumerate() {
        ids.push(h.agent(&format!("agent{i}"), score).await.id);
    }
    h.claim(ids[2], &[]).await;

    let rep = h.engine.reputation();
    let first = rep
        .get_leaderboard(2, 0, None, LeaderboardPeriod::AllTime)
        .await
        .unwrap();
    let second = rep
        .get_leaderboard(2, 2, None, LeaderboardPeriod::AllTime)
        .await
        .unwrap();

    assert_eq!(first.total, 5);
    let ranks: Vec<u64> = first
        .entries
        .iter()
        .chain(&second.entries)
        .map(|e| e.rank)
        .collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert_eq!(first.entries[0].id, ids[2]);
    assert_eq!(first.entries[0].claims_count, 1);
    assert_eq!(second.entries[0].reputation_score, 300.0);

    let trusted = rep
        .get_leaderboard(10, 0, Some(Tier::Trusted), LeaderboardPeriod::AllTime)
        .await
        .unwrap();
    assert_eq!(trusted.total, 1);
}

#[tokio::test]
async fn weekly_leaderboard_needs_recent_ledger_activity() {
    let h = harness();
    let quiet = h.agent("quiet", 500.0).await;
    let busy = h.agent("busy", 10.0).await;
    h.engine
        .reputation()
        .update_reputation(busy.id, ReputationReason::VoteAligned, None, None)
        .await
        .unwrap();

    let weekly = h
        .engine
        .reputation()
        .get_leaderboard(10, 0, None, LeaderboardPeriod::Weekly)
        .await
        .unwrap();
    assert_eq!(weekly.total, 1);
    assert_eq!(weekly.entries[0].id, busy.id);
    assert_ne!(weekly.entries[0].id, quiet.id);
}

#[tokio::test]
async fn leaderboard_pages_are_cached_until_invalidated() {
    let h = harness();
    let a = h.agent("a", 10.0).await;
    let rep = h.engine.reputation();
    let before = rep
        .get_leaderboard(10, 0, None, LeaderboardPeriod::AllTime)
        .await
        .unwrap();
    h.agent("b", 20.0).await;
    let cached = rep
        .get_leaderboard(10, 0, None, LeaderboardPeriod::AllTime)
        .await
        .unwrap();
    assert_eq!(cached, before);

    assert!(rep.invalidate_leaderboard_cache().await >= 1);
    let fresh = rep
        .get_leaderboard(10, 0, None, LeaderboardPeriod::AllTime)
        .await
        .unwrap();
    assert_eq!(fresh.total, 2);
    assert_eq!(fresh.entries[1].id, a.id);
}

#[tokio::test]
async fn agent_rank_counts_strictly_greater_scores() {
    let h = harness();
    h.agent("top", 900.0).await;
    let mid = h.agent("mid", 100.0).await;
    h.agent("tied", 100.0).await;
    h.agent("low", 1.0).await;

    let rank = h.engine.reputation().get_agent_rank(mid.id).await.unwrap();
    assert_eq!(rank.rank, 2);
    assert_eq!(rank.total, 4);
    assert_eq!(rank.percentile, 50.0);
    assert_eq!(rank.tier, Tier::Established);
}

// ===========================================================================
// Evidence and comments
// ===========================================================================

#[tokio::test]
async fn evidence_votes_move_the_author_and_notify() {
    let h = harness();
    let author = h.agent("author", 10.0).await;
    let voter = h.agent("voter", 10.0).await;
    let claim = h.claim(author.id, &["physics"]).await;
    let evidence = h.engine.submit_evidence(author.id, claim.id).await.unwrap();

    let score = h
        .engine
        .evidence_voted(evidence.id, voter.id, true)
        .await
        .unwrap();
    assert_eq!(score, 15.0);
    assert_eq!(h.notifier.count(NotificationKind::EvidenceUpvoted), 1);

    let score = h
        .engine
        .evidence_voted(evidence.id, voter.id, false)
        .await
        .unwrap();
    assert_eq!(score, 12.0);
    assert_eq!(h.store.get_claim(claim.id).await.unwrap().unwrap().evidence_count, 1);
}

#[tokio::test]
async fn authors_cannot_vote_on_their_own_evidence() {
    let h = harness();
    let author = h.agent("author", 10.0).await;
    let claim = h.claim(author.id, &[]).await;
    let evidence = h.engine.submit_evidence(author.id, claim.id).await.unwrap();
    assert!(matches!(
        h.engine.evidence_voted(evidence.id, author.id, true).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(h.store.reputation_history(author.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn comments_notify_the_claim_author_only() {
    let h = harness();
    let author = h.agent("author", 0.0).await;
    let other = h.agent("other", 0.0).await;
    let claim = h.claim(author.id, &[]).await;
    h.engine.add_comment(author.id, claim.id).await.unwrap();
    h.engine.add_comment(other.id, claim.id).await.unwrap();
    assert_eq!(h.notifier.count(NotificationKind::CommentOnClaim), 1);
}

#[tokio::test]
async fn created_claims_count_against_the_claim_quota() {
    let h = harness();
    let author = h.agent("author", 0.0).await;
    for _ in 0..Tier::New.claims_per_day() {
        h.engine
            .create_claim(author.id, "  a claim  ", vec!["x".into()])
            .await
            .unwrap();
    }
    assert!(matches!(
        h.engine.create_claim(author.id, "one more", vec![]).await,
        Err(Error::RateLimitExceeded { action: ActionType::ClaimCreate, .. })
    ));
    assert!(matches!(
        h.engine.create_claim(author.id, "   ", vec![]).await,
        Err(Error::InvalidInput(_))
    ));
}

// ===========================================================================
// Learning
// ===========================================================================

#[tokio::test]
async fn agents_without_resolutions_score_neutral() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    assert_eq!(
        h.engine.learning().calculate_learning_score(a.id).await.unwrap(),
        0.5
    );
}

/// A heavy voter says true, a light one says false: the claim resolves true.
async fn resolved_claim(h: &Harness) -> (Agent, Agent, Claim, f64) {
    let right = h.agent("right", 1000.0).await;
    let wrong = h.agent("wrong", 0.0).await;
    let claim = h.claim(right.id, &["physics"]).await;
    h.engine.cast_vote(right.id, claim.id, 0.9).await.unwrap();
    let gradient = h.engine.cast_vote(wrong.id, claim.id, 0.2).await.unwrap();
    assert!(gradient > 0.8, "{gradient}");
    h.clock.advance(Duration::hours(1));
    (right, wrong, claim, gradient)
}

#[tokio::test]
async fn resolution_inside_the_band_does_nothing() {
    let h = harness();
    let (right, _, claim, _) = resolved_claim(&h).await;
    let scores = h
        .engine
        .learning()
        .update_on_claim_resolved(claim.id, 0.75)
        .await
        .unwrap();
    assert!(scores.is_empty());
    let stored = h.store.get_agent(right.id).await.unwrap().unwrap();
    assert_eq!(stored.total_resolved_votes, 0);
}

#[tokio::test]
async fn resolution_updates_counters_expertise_and_score() {
    let h = harness();
    let (right, wrong, claim, gradient) = resolved_claim(&h).await;
    let scores = h
        .engine
        .learning()
        .update_on_claim_resolved(claim.id, gradient)
        .await
        .unwrap();

    // one populated window: consistency and trajectory stay neutral,
    // so the score is 0.5 * accuracy + 0.25
    assert!((scores[&right.id] - 0.75).abs() < 1e-12);
    assert!((scores[&wrong.id] - 0.25).abs() < 1e-12);

    let right_row = h.store.get_agent(right.id).await.unwrap().unwrap();
    assert_eq!(right_row.total_resolved_votes, 1);
    assert_eq!(right_row.correct_resolved_votes, 1);
    assert_eq!(right_row.accuracy_rate, Some(1.0));
    assert!((right_row.learning_score - 0.75).abs() < 1e-12);

    let wrong_row = h.store.get_agent(wrong.id).await.unwrap().unwrap();
    assert_eq!(wrong_row.correct_resolved_votes, 0);
    assert_eq!(wrong_row.accuracy_rate, Some(0.0));

    // vote + resolution = 2 engagements; one more to be listed
    h.engine
        .learning()
        .track_activity(right.id, &["physics".to_string()])
        .await
        .unwrap();
    let areas = h
        .engine
        .learning()
        .get_expertise_areas(right.id, 5)
        .await
        .unwrap();
    assert_eq!(areas.len(), 1);
    assert_eq!(areas[0].tag, "physics");
    assert_eq!(areas[0].engagement_count, 3);
    assert_eq!(areas[0].accuracy, Some(100.0));
}

#[tokio::test]
async fn half_vote_counts_as_correct_when_claim_resolves_false() {
    let h = harness();
    let heavy = h.agent("heavy", 1000.0).await;
    let unsure = h.agent("unsure", 0.0).await;
    let claim = h.claim(heavy.id, &["physics"]).await;
    h.engine.cast_vote(heavy.id, claim.id, 0.0).await.unwrap();
    let gradient = h.engine.cast_vote(unsure.id, claim.id, 0.5).await.unwrap();
    assert!(gradient < 0.2, "{gradient}");
    h.clock.advance(Duration::hours(1));

    h.engine
        .learning()
        .update_on_claim_resolved(claim.id, gradient)
        .await
        .unwrap();

    // 0.5 does not predict true, so it matches a false resolution
    let row = h.store.get_agent(unsure.id).await.unwrap().unwrap();
    assert_eq!(row.total_resolved_votes, 1);
    assert_eq!(row.correct_resolved_votes, 1);
    assert_eq!(row.accuracy_rate, Some(1.0));

    h.engine
        .learning()
        .track_activity(unsure.id, &["physics".to_string()])
        .await
        .unwrap();
    let areas = h
        .engine
        .learning()
        .get_expertise_areas(unsure.id, 5)
        .await
        .unwrap();
    assert_eq!(areas[0].accuracy, Some(100.0));
}

#[tokio::test]
async fn learning_score_tracks_accuracy_across_windows() {
    let h = harness();
    let now = t0() + Duration::days(100);
    let anchor = h.agent("anchor", 1000.0).await;
    let a = h.agent("a", 0.0).await;

    // (days before now, anchor vote, a's vote); the anchor fixes the verdict
    let plan = [
        (75, 1.0, 0.9), // window 0, right
        (45, 1.0, 0.9), // window 1, right
        (45, 1.0, 0.1), // window 1, wrong
        (30, 0.0, 0.0), // on the edge, so window 2, right
        (10, 0.0, 0.9), // window 2, wrong
    ];
    let mut resolved = Vec::new();
    for (days_ago, anchor_vote, a_vote) in plan {
        h.clock.set(now - Duration::days(days_ago));
        let claim = h.claim(anchor.id, &["history"]).await;
        h.engine.cast_vote(anchor.id, claim.id, anchor_vote).await.unwrap();
        let gradient = h.engine.cast_vote(a.id, claim.id, a_vote).await.unwrap();
        resolved.push((claim.id, gradient));
    }

    h.clock.set(now);
    let mut last = HashMap::new();
    for (claim, gradient) in resolved {
        last = h
            .engine
            .learning()
            .update_on_claim_resolved(claim, gradient)
            .await
            .unwrap();
    }

    let row = h.store.get_agent(a.id).await.unwrap().unwrap();
    assert_eq!(row.total_resolved_votes, 5);
    assert_eq!(row.correct_resolved_votes, 3);

    // windows oldest first: [1.0, 0.5, 0.5]
    let consistency = consistency_score(&[1.0, 0.5, 0.5]);
    let trajectory = trajectory_score(&[(0.0, 1.0), (1.0, 0.5), (2.0, 0.5)]);
    assert!((consistency - 7.0 / 9.0).abs() < 1e-9, "{consistency}");
    assert!((trajectory - 0.25).abs() < 1e-9, "{trajectory}");

    let expected = learning_composite(0.6, consistency, trajectory);
    assert!((expected - (0.3 + 0.25 * 7.0 / 9.0 + 0.0625)).abs() < 1e-9);
    assert!((last[&a.id] - expected).abs() < 1e-9, "{}", last[&a.id]);

    h.cache
        .delete(&verity_engine::cache::keys::learning_score(a.id))
        .await
        .unwrap();
    let fresh = h.engine.learning().calculate_learning_score(a.id).await.unwrap();
    assert!((fresh - expected).abs() < 1e-9, "{fresh}");
    let row = h.store.get_agent(a.id).await.unwrap().unwrap();
    assert!((row.learning_score - expected).abs() < 1e-9);
}

#[tokio::test]
async fn activity_tracking_stamps_first_activity() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    h.engine
        .learning()
        .track_activity(a.id, &["x".to_string(), "y".to_string()])
        .await
        .unwrap();
    let stored = h.store.get_agent(a.id).await.unwrap().unwrap();
    assert_eq!(stored.first_activity_at, Some(t0()));
    assert!(h
        .engine
        .learning()
        .get_expertise_areas(a.id, 5)
        .await
        .unwrap()
        .is_empty());
}

// ===========================================================================
// Rate limiter
// ===========================================================================

#[tokio::test]
async fn nth_action_passes_and_the_next_is_refused() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let limiter = h.engine.rate_limiter();
    let limit = Tier::New.quota().evidence_per_day;
    for n in 1..=limit {
        assert_eq!(
            limiter
                .increment(a.id, ActionType::EvidenceSubmit, true)
                .await
                .unwrap(),
            n
        );
    }
    match limiter.increment(a.id, ActionType::EvidenceSubmit, true).await {
        Err(Error::RateLimitExceeded {
            action,
            current,
            limit: l,
        }) => {
            assert_eq!(action, ActionType::EvidenceSubmit);
            assert_eq!(current, limit);
            assert_eq!(l, limit);
        }
        other => panic!("expected a denial, got {other:?}"),
    }
    assert_eq!(
        limiter.get_remaining(a.id, ActionType::EvidenceSubmit).await.unwrap(),
        0
    );
    // the audit trail saw every admitted action
    assert_eq!(
        h.store
            .rate_counter(a.id, ActionType::EvidenceSubmit, t0().date_naive())
            .await
            .unwrap(),
        limit
    );
}

#[tokio::test]
async fn counters_roll_over_at_utc_midnight() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let limiter = h.engine.rate_limiter();
    h.clock
        .set(Utc.with_ymd_and_hms(2026, 4, 10, 23, 59, 59).unwrap());
    limiter
        .increment(a.id, ActionType::ClaimVote, false)
        .await
        .unwrap();
    let key = counter_key(a.id, ActionType::ClaimVote, h.clock.today());
    assert_eq!(
        h.cache.ttl(&key).await.unwrap(),
        Some(std::time::Duration::from_secs(1))
    );

    h.clock.advance(Duration::seconds(1));
    let check = limiter
        .check_rate_limit(a.id, ActionType::ClaimVote)
        .await
        .unwrap();
    assert_eq!(check.current, 0);
    assert!(check.allowed);
}

#[tokio::test]
async fn limits_follow_the_agents_tier() {
    let h = harness();
    let a = h.agent("a", 150.0).await;
    let limits = h.engine.rate_limiter().get_all_limits(a.id).await.unwrap();
    assert_eq!(limits.len(), ActionType::ALL.len());
    let votes = &limits
        .iter()
        .find(|(action, _)| *action == ActionType::ClaimVote)
        .unwrap()
        .1;
    assert_eq!(votes.limit, 100);
    assert_eq!(votes.remaining, 100);
    assert!(!votes.exceeded);
}

#[tokio::test]
async fn reset_clears_only_todays_counters_for_that_agent() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let b = h.agent("b", 0.0).await;
    let limiter = h.engine.rate_limiter();
    limiter.increment(a.id, ActionType::ClaimVote, true).await.unwrap();
    limiter.increment(a.id, ActionType::CommentCreate, true).await.unwrap();
    limiter.increment(b.id, ActionType::ClaimVote, true).await.unwrap();

    assert_eq!(limiter.reset_limits(a.id).await.unwrap(), 2);
    assert_eq!(
        limiter.check_rate_limit(a.id, ActionType::ClaimVote).await.unwrap().current,
        0
    );
    assert_eq!(
        limiter.check_rate_limit(b.id, ActionType::ClaimVote).await.unwrap().current,
        1
    );
}

// ===========================================================================
// Cache outage
// ===========================================================================

#[tokio::test]
async fn reads_fail_open_but_admission_fails_closed() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = ScoringEngine::new(
        EngineConfig::default(),
        store.clone(),
        Arc::new(UnavailableCache),
        Arc::new(RecordingNotifier::new()),
        clock.clone(),
    );
    let a = Agent::new("a", t0()).with_reputation(10.0);
    store.insert_agent(&a).await.unwrap();
    let claim = Claim::new(a.id, "cached nowhere", t0());
    store.insert_claim(&claim).await.unwrap();

    assert_eq!(engine.gradient().get_gradient(claim.id).await.unwrap(), 0.5);
    assert_eq!(engine.reputation().get_reputation(a.id).await.unwrap(), 10.0);

    assert!(matches!(
        engine.cast_vote(a.id, claim.id, 1.0).await,
        Err(Error::Cache(_))
    ));
    assert_eq!(store.get_claim(claim.id).await.unwrap().unwrap().vote_count, 0);

    // ledger writes do not depend on the cache
    let score = engine
        .reputation()
        .update_reputation(a.id, ReputationReason::VoteAligned, None, None)
        .await
        .unwrap();
    assert_eq!(score, 11.0);
}

// ===========================================================================
// Discovery
// ===========================================================================

#[tokio::test]
async fn trending_excludes_old_claims_and_ranks_by_activity() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let b = h.agent("b", 0.0).await;

    let old = h.claim(a.id, &[]).await;
    h.clock.advance(Duration::days(8));
    let quiet = h.claim(a.id, &[]).await;
    let busy = h.claim(a.id, &[]).await;
    h.engine.cast_vote(a.id, busy.id, 1.0).await.unwrap();
    h.engine.cast_vote(b.id, busy.id, 1.0).await.unwrap();
    h.engine.cast_vote(a.id, old.id, 1.0).await.unwrap();

    let page = h.engine.trending().get_trending_claims(10, 0).await.unwrap();
    let ids: Vec<ClaimId> = page.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![busy.id, quiet.id]);
    assert_eq!(page[0].votes_24h, 2);
    assert!(page[0].trending_score > 0.0);
    assert_eq!(page[1].trending_score, 0.0);

    let second = h.engine.trending().get_trending_claims(1, 1).await.unwrap();
    assert_eq!(second[0].id, quiet.id);
}

#[tokio::test]
async fn related_claims_share_tags_or_voters() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let b = h.agent("b", 0.0).await;
    let source = h.claim(a.id, &["physics", "space"]).await;
    let by_tag = h.claim(a.id, &["space"]).await;
    let by_voter = h.claim(a.id, &["cooking"]).await;
    let unrelated = h.claim(a.id, &["music"]).await;
    h.engine.cast_vote(b.id, source.id, 1.0).await.unwrap();
    h.engine.cast_vote(b.id, by_voter.id, 1.0).await.unwrap();

    let related = h
        .engine
        .trending()
        .get_related_claims(source.id, 10)
        .await
        .unwrap();
    let ids: Vec<ClaimId> = related.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![by_tag.id, by_voter.id]);
    assert_eq!(related[0].relevance_score, 10);
    assert_eq!(related[0].shared_tags, vec!["space".to_string()]);
    assert_eq!(related[1].relevance_score, 5);
    assert!(!ids.contains(&unrelated.id));

    assert!(matches!(
        h.engine.trending().get_related_claims(ClaimId::new(), 5).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn recommendations_skip_voted_claims_and_favour_known_tags() {
    let h = harness();
    let reader = h.agent("reader", 0.0).await;
    let author = h.agent("author", 0.0).await;
    h.engine
        .learning()
        .track_activity(reader.id, &["rust".to_string()])
        .await
        .unwrap();

    let voted = h.claim(author.id, &["rust"]).await;
    h.engine.cast_vote(reader.id, voted.id, 1.0).await.unwrap();
    let other = h.claim(author.id, &["gardening"]).await;
    let matching = h.claim(author.id, &["rust"]).await;

    let recs = h
        .engine
        .trending()
        .get_recommended_claims(reader.id, 10)
        .await
        .unwrap();
    let ids: Vec<ClaimId> = recs.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![matching.id, other.id]);
    assert_eq!(recs[0].matching_tags, vec!["rust".to_string()]);
    // engagement 2 (tracked + voted) plus a full recency bonus
    assert!((recs[0].recommendation_score - 12.0).abs() < 1e-9);
    assert!((recs[1].recommendation_score - 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn discovery_invalidation_drops_every_page() {
    let h = harness();
    let a = h.agent("a", 0.0).await;
    let claim = h.claim(a.id, &["x"]).await;
    let trending = h.engine.trending();
    trending.get_trending_claims(10, 0).await.unwrap();
    trending.get_related_claims(claim.id, 5).await.unwrap();
    trending.get_recommended_claims(a.id, 5).await.unwrap();
    assert_eq!(trending.invalidate_trending_cache().await, 3);
}
