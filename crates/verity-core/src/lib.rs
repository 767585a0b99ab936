//! Verity Core - domain types, configuration, clock, and error handling

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod types;

pub use clock::{seconds_until_next_midnight, Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, ConsensusConfig, EngineConfig, RankingConfig, StoreConfig, SweeperConfig, Verdict,
};
pub use error::{Error, Result};
pub use models::*;
pub use types::*;
