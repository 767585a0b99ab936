//! What one pass of each loop got done

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsensusReport {
    /// Candidates looked at this pass.
    pub examined: usize,
    /// Claims whose voters were rewarded or penalised.
    pub rewarded_claims: usize,
    /// Individual reputation updates applied.
    pub reputation_updates: usize,
    /// Claims handed to accuracy bookkeeping.
    pub resolved_claims: usize,
    /// Claims skipped because another pass already handled them.
    pub already_processed: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub gradients_updated: usize,
    pub consensus: ConsensusReport,
    pub tokens_purged: u64,
}
