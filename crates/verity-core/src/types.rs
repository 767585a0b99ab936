//! Core types for Verity

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Claim identifier
    ClaimId
);
uuid_id!(
    /// Agent identifier
    AgentId
);
uuid_id!(
    /// Evidence identifier
    EvidenceId
);

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Agent tier. A step function of reputation score; never assigned directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    New,
    Established,
    Trusted,
}

/// Daily quotas denormalized onto the agent row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierQuota {
    pub evidence_per_day: u32,
    pub votes_per_day: u32,
}

impl Tier {
    pub const ESTABLISHED_MIN: f64 = 100.0;
    pub const TRUSTED_MIN: f64 = 1000.0;

    pub const ALL: [Tier; 3] = [Tier::New, Tier::Established, Tier::Trusted];

    pub fn from_score(score: f64) -> Self {
        if score >= Self::TRUSTED_MIN {
            Tier::Trusted
        } else if score >= Self::ESTABLISHED_MIN {
            Tier::Established
        } else {
            Tier::New
        }
    }

    pub fn quota(self) -> TierQuota {
        match self {
            Tier::New => TierQuota {
                evidence_per_day: 3,
                votes_per_day: 20,
            },
            Tier::Established => TierQuota {
                evidence_per_day: 20,
                votes_per_day: 100,
            },
            // evidence is effectively unlimited for trusted agents
            Tier::Trusted => TierQuota {
                evidence_per_day: 10_000,
                votes_per_day: 500,
            },
        }
    }

    pub fn claims_per_day(self) -> u32 {
        match self {
            Tier::New => 5,
            Tier::Established => 20,
            Tier::Trusted => 100,
        }
    }

    pub fn comments_per_day(self) -> u32 {
        match self {
            Tier::New => 10,
            Tier::Established => 50,
            Tier::Trusted => 200,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::New => "new",
            Tier::Established => "established",
            Tier::Trusted => "trusted",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Tier::New => "New",
            Tier::Established => "Established",
            Tier::Trusted => "Trusted",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(Tier::New),
            "established" => Ok(Tier::Established),
            "trusted" => Ok(Tier::Trusted),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// Quota-governed actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    EvidenceSubmit,
    ClaimVote,
    EvidenceVote,
    ClaimCreate,
    CommentCreate,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::EvidenceSubmit,
        ActionType::ClaimVote,
        ActionType::EvidenceVote,
        ActionType::ClaimCreate,
        ActionType::CommentCreate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::EvidenceSubmit => "evidence_submit",
            ActionType::ClaimVote => "claim_vote",
            ActionType::EvidenceVote => "evidence_vote",
            ActionType::ClaimCreate => "claim_create",
            ActionType::CommentCreate => "comment_create",
        }
    }

    /// Daily limit for this action given the agent's tier and denormalized quotas.
    pub fn daily_limit(self, tier: Tier, quota: TierQuota) -> u32 {
        match self {
            ActionType::ClaimVote | ActionType::EvidenceVote => quota.votes_per_day,
            ActionType::EvidenceSubmit => quota.evidence_per_day,
            ActionType::ClaimCreate => tier.claims_per_day(),
            ActionType::CommentCreate => tier.comments_per_day(),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action type: {s}"))
    }
}

// ---------------------------------------------------------------------------
// ReputationReason
// ---------------------------------------------------------------------------

/// Why a reputation score moved. Every ledger entry carries one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationReason {
    EvidenceUpvoted,
    EvidenceDownvoted,
    VoteAligned,
    VoteOpposed,
    ManualAdjustment,
    TierPromotion,
}

impl ReputationReason {
    pub const ALL: [ReputationReason; 6] = [
        ReputationReason::EvidenceUpvoted,
        ReputationReason::EvidenceDownvoted,
        ReputationReason::VoteAligned,
        ReputationReason::VoteOpposed,
        ReputationReason::ManualAdjustment,
        ReputationReason::TierPromotion,
    ];

    /// Fixed amount for table-driven reasons. `None` means the caller must
    /// supply the delta.
    pub fn default_delta(self) -> Option<f64> {
        match self {
            ReputationReason::EvidenceUpvoted => Some(5.0),
            ReputationReason::EvidenceDownvoted => Some(-3.0),
            ReputationReason::VoteAligned => Some(1.0),
            ReputationReason::VoteOpposed => Some(-0.5),
            ReputationReason::ManualAdjustment | ReputationReason::TierPromotion => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReputationReason::EvidenceUpvoted => "evidence_upvoted",
            ReputationReason::EvidenceDownvoted => "evidence_downvoted",
            ReputationReason::VoteAligned => "vote_aligned",
            ReputationReason::VoteOpposed => "vote_opposed",
            ReputationReason::ManualAdjustment => "manual_adjustment",
            ReputationReason::TierPromotion => "tier_promotion",
        }
    }
}

impl std::fmt::Display for ReputationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReputationReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown reputation reason: {s}"))
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Claim,
    Evidence,
    Comment,
}

impl ReferenceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceType::Claim => "claim",
            ReferenceType::Evidence => "evidence",
            ReferenceType::Comment => "comment",
        }
    }
}

impl FromStr for ReferenceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "claim" => Ok(ReferenceType::Claim),
            "evidence" => Ok(ReferenceType::Evidence),
            "comment" => Ok(ReferenceType::Comment),
            other => Err(format!("unknown reference type: {other}")),
        }
    }
}

/// What a ledger entry or notification points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: Uuid,
    pub kind: ReferenceType,
}

impl Reference {
    pub fn claim(id: ClaimId) -> Self {
        Self {
            id: id.0,
            kind: ReferenceType::Claim,
        }
    }

    pub fn evidence(id: EvidenceId) -> Self {
        Self {
            id: id.0,
            kind: ReferenceType::Evidence,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    EvidenceUpvoted,
    EvidenceDownvoted,
    CommentReply,
    CommentOnClaim,
    CommentOnEvidence,
    ReputationChange,
    TierPromotion,
    ClaimMilestone,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 8] = [
        NotificationKind::EvidenceUpvoted,
        NotificationKind::EvidenceDownvoted,
        NotificationKind::CommentReply,
        NotificationKind::CommentOnClaim,
        NotificationKind::CommentOnEvidence,
        NotificationKind::ReputationChange,
        NotificationKind::TierPromotion,
        NotificationKind::ClaimMilestone,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::EvidenceUpvoted => "evidence_upvoted",
            NotificationKind::EvidenceDownvoted => "evidence_downvoted",
            NotificationKind::CommentReply => "comment_reply",
            NotificationKind::CommentOnClaim => "comment_on_claim",
            NotificationKind::CommentOnEvidence => "comment_on_evidence",
            NotificationKind::ReputationChange => "reputation_change",
            NotificationKind::TierPromotion => "tier_promotion",
            NotificationKind::ClaimMilestone => "claim_milestone",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown notification kind: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Leaderboard period
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    #[default]
    AllTime,
    Weekly,
    Monthly,
}

impl LeaderboardPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaderboardPeriod::AllTime => "all_time",
            LeaderboardPeriod::Weekly => "weekly",
            LeaderboardPeriod::Monthly => "monthly",
        }
    }

    /// Earliest ledger timestamp that counts as activity in this period.
    /// Weekly: start of today minus seven days. Monthly: first of the month.
    pub fn window_start(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        match self {
            LeaderboardPeriod::AllTime => None,
            LeaderboardPeriod::Weekly => {
                let midnight = Utc.from_utc_datetime(&today.and_hms_opt(0, 0, 0)?);
                Some(midnight - Duration::days(7))
            }
            LeaderboardPeriod::Monthly => {
                let first = today.with_day(1)?;
                Some(Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0)?))
            }
        }
    }
}

impl std::fmt::Display for LeaderboardPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaderboardPeriod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all_time" => Ok(LeaderboardPeriod::AllTime),
            "weekly" => Ok(LeaderboardPeriod::Weekly),
            "monthly" => Ok(LeaderboardPeriod::Monthly),
            other => Err(format!("unknown leaderboard period: {other}")),
        }
    }
}
