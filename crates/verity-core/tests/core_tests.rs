//! Tests for verity-core: tiers, quotas, ledger math, config, errors

use chrono::{Duration, TimeZone, Utc};
use verity_core::*;

fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

// ===========================================================================
// Tier
// ===========================================================================

#[test]
fn tier_thresholds_are_exact() {
    assert_eq!(Tier::from_score(0.0), Tier::New);
    assert_eq!(Tier::from_score(99.999), Tier::New);
    assert_eq!(Tier::from_score(100.0), Tier::Established);
    assert_eq!(Tier::from_score(999.9), Tier::Established);
    assert_eq!(Tier::from_score(1000.0), Tier::Trusted);
}

#[test]
fn tier_ordering_follows_promotion() {
    assert!(Tier::New < Tier::Established);
    assert!(Tier::Established < Tier::Trusted);
}

#[test]
fn tier_round_trips_through_str() {
    for tier in Tier::ALL {
        assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
    }
    assert!("gold".parse::<Tier>().is_err());
}

// ===========================================================================
// ActionType quotas
// ===========================================================================

#[test]
fn every_action_has_a_limit_for_every_tier() {
    for tier in Tier::ALL {
        for action in ActionType::ALL {
            assert!(action.daily_limit(tier, tier.quota()) > 0, "{tier}/{action}");
        }
    }
}

#[test]
fn vote_actions_share_the_vote_quota() {
    let quota = Tier::New.quota();
    assert_eq!(ActionType::ClaimVote.daily_limit(Tier::New, quota), 20);
    assert_eq!(ActionType::EvidenceVote.daily_limit(Tier::New, quota), 20);
    assert_eq!(ActionType::EvidenceSubmit.daily_limit(Tier::New, quota), 3);
    assert_eq!(ActionType::ClaimCreate.daily_limit(Tier::New, quota), 5);
    assert_eq!(ActionType::CommentCreate.daily_limit(Tier::New, quota), 10);
}

#[test]
fn agent_limit_uses_denormalized_quota() {
    let agent = Agent::new("alice", Utc::now()).with_reputation(250.0);
    assert_eq!(agent.tier, Tier::Established);
    assert_eq!(agent.daily_limit(ActionType::ClaimVote), 100);
    assert_eq!(agent.daily_limit(ActionType::ClaimCreate), 20);
}

// ===========================================================================
// Reputation changes
// ===========================================================================

#[test]
fn reason_table_deltas() {
    assert_eq!(ReputationReason::EvidenceUpvoted.default_delta(), Some(5.0));
    assert_eq!(ReputationReason::EvidenceDownvoted.default_delta(), Some(-3.0));
    assert_eq!(ReputationReason::VoteAligned.default_delta(), Some(1.0));
    assert_eq!(ReputationReason::VoteOpposed.default_delta(), Some(-0.5));
    assert_eq!(ReputationReason::ManualAdjustment.default_delta(), None);
    assert_eq!(ReputationReason::TierPromotion.default_delta(), None);
}

#[test]
fn demotion_updates_quota_without_promotion_flag() {
    let now = Utc::now();
    let mut agent = Agent::new("bob", now).with_reputation(101.0);
    let change = ReputationChange::new(ReputationReason::EvidenceDownvoted, None, now).unwrap();
    let outcome = change.apply(&mut agent);
    assert_eq!(outcome.new_tier, Tier::New);
    assert!(!outcome.promoted());
    assert_eq!(agent.votes_per_day, 20);
    assert_eq!(agent.evidence_per_day, 3);
}

#[test]
fn custom_delta_overrides_table() {
    let now = Utc::now();
    let mut agent = Agent::new("carol", now);
    let change = ReputationChange::new(ReputationReason::EvidenceUpvoted, Some(1500.0), now)
        .unwrap()
        .with_reference(Reference::evidence(EvidenceId::new()))
        .with_notes("backfill");
    let outcome = change.apply(&mut agent);
    assert_eq!(agent.tier, Tier::Trusted);
    assert_eq!(outcome.entry.delta, 1500.0);
    assert_eq!(outcome.entry.notes.as_deref(), Some("backfill"));
    assert_eq!(
        outcome.entry.reference.map(|r| r.kind),
        Some(ReferenceType::Evidence)
    );
}

// ===========================================================================
// Leaderboard windows
// ===========================================================================

#[test]
fn weekly_window_starts_seven_days_before_midnight() {
    let now = at(2026, 3, 10, 15, 30, 0);
    assert_eq!(
        LeaderboardPeriod::Weekly.window_start(now),
        Some(at(2026, 3, 3, 0, 0, 0))
    );
}

#[test]
fn monthly_window_starts_on_the_first() {
    let now = at(2026, 3, 10, 15, 30, 0);
    assert_eq!(
        LeaderboardPeriod::Monthly.window_start(now),
        Some(at(2026, 3, 1, 0, 0, 0))
    );
    assert_eq!(LeaderboardPeriod::AllTime.window_start(now), None);
}

// ===========================================================================
// Clock
// ===========================================================================

#[test]
fn manual_clock_crosses_utc_midnight() {
    let clock = ManualClock::new(at(2026, 3, 10, 23, 59, 59));
    let before = clock.today();
    clock.advance(Duration::seconds(1));
    assert_ne!(before, clock.today());
    assert_eq!(seconds_until_next_midnight(clock.now()), 86_400);
}

// ===========================================================================
// Config
// ===========================================================================

#[test]
fn config_defaults_match_documented_values() {
    let cfg = EngineConfig::default();
    assert_eq!(cfg.cache.gradient_ttl_secs, 300);
    assert_eq!(cfg.cache.reputation_ttl_secs, 600);
    assert_eq!(cfg.cache.rank_ttl_secs, 60);
    assert_eq!(cfg.consensus.min_votes, 10);
    assert_eq!(cfg.consensus.reputation_true, 0.7);
    assert_eq!(cfg.consensus.resolution_false, 0.2);
    assert_eq!(cfg.sweeper.gradient_batch_size, 100);
    assert_eq!(cfg.ranking.candidate_limit, 100);
}

#[test]
fn config_partial_toml_keeps_other_defaults() {
    let cfg = EngineConfig::from_toml("[cache]\ngradient_ttl_secs = 30\n").unwrap();
    assert_eq!(cfg.cache.gradient_ttl_secs, 30);
    assert_eq!(cfg.cache.leaderboard_ttl_secs, 300);
    assert_eq!(cfg.consensus.min_votes, 10);
}

#[test]
fn config_load_from_file_and_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verity.toml");
    std::fs::write(&path, "[consensus]\nmin_votes = 3\n").unwrap();
    assert_eq!(EngineConfig::load(&path).consensus.min_votes, 3);

    let missing = dir.path().join("absent.toml");
    assert_eq!(EngineConfig::load(&missing).consensus.min_votes, 10);

    std::fs::write(&path, "not = [valid").unwrap();
    assert_eq!(EngineConfig::load(&path).consensus.min_votes, 10);
}

#[test]
fn config_to_toml_parses_back() {
    let cfg = EngineConfig::default();
    let parsed = EngineConfig::from_toml(&cfg.to_toml()).unwrap();
    assert_eq!(parsed.cache, cfg.cache);
    assert_eq!(parsed.consensus, cfg.consensus);
}

#[test]
fn config_marker_must_outlive_sweep() {
    let mut cfg = EngineConfig::default();
    cfg.consensus.marker_ttl_secs = 10;
    assert!(cfg.validate().is_err());
}

// ===========================================================================
// Errors
// ===========================================================================

#[test]
fn rate_limit_message_carries_counts() {
    let err = Error::RateLimitExceeded {
        action: ActionType::ClaimVote,
        current: 20,
        limit: 20,
    };
    assert_eq!(
        err.public_message(),
        "daily limit reached for claim_vote (20/20)"
    );
    assert!(!err.is_transient());
}

#[test]
fn internal_errors_stay_opaque() {
    let err = Error::store("disk I/O error at page 42");
    assert!(err.is_transient());
    assert_eq!(err.public_message(), "internal error");
    assert_eq!(
        Error::invariant("negative weight").public_message(),
        "internal error"
    );
    assert_eq!(
        Error::not_found("claim", ClaimId::new()).public_message(),
        "claim not found"
    );
}
