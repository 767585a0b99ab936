//! Verity Sweeper - background gradient, consensus and token maintenance

pub mod report;
pub mod sweeper;

pub use report::{ConsensusReport, SweepReport};
pub use sweeper::Sweeper;
pub use tokio_util::sync::CancellationToken;
