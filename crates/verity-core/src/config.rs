//! Engine configuration
//!
//! Every TTL and threshold the engines use. Loaded from TOML at startup,
//! falls back to defaults if no config file exists. Each engine takes the
//! section it needs by value.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reputation rewards fire once a claim's gradient leaves this band.
pub const REPUTATION_CONSENSUS_TRUE: f64 = 0.7;
pub const REPUTATION_CONSENSUS_FALSE: f64 = 0.3;

/// Accuracy bookkeeping fires only beyond this stricter band.
pub const RESOLUTION_TRUE: f64 = 0.8;
pub const RESOLUTION_FALSE: f64 = 0.2;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cache TTLs, in seconds.
    pub cache: CacheConfig,
    /// Consensus bands and sweep bounds.
    pub consensus: ConsensusConfig,
    /// Background loop cadence.
    pub sweeper: SweeperConfig,
    /// Discovery windows and candidate pool sizes.
    pub ranking: RankingConfig,
    /// Durable store location.
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub gradient_ttl_secs: u64,
    pub gradient_history_ttl_secs: u64,
    pub reputation_ttl_secs: u64,
    pub learning_ttl_secs: u64,
    pub expertise_ttl_secs: u64,
    pub trending_ttl_secs: u64,
    pub related_ttl_secs: u64,
    pub recommended_ttl_secs: u64,
    pub leaderboard_ttl_secs: u64,
    /// Individual rank is rechecked more often than whole pages.
    pub rank_ttl_secs: u64,
    pub notification_count_ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Claims with fewer votes are never considered.
    pub min_votes: u32,
    pub reputation_true: f64,
    pub reputation_false: f64,
    pub resolution_true: f64,
    pub resolution_false: f64,
    /// Lifetime of the per-claim "already processed" marker. Must exceed the
    /// consensus sweep interval.
    pub marker_ttl_secs: u64,
    /// Claims examined per consensus sweep.
    pub scan_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub gradient_batch_size: usize,
    pub gradient_idle_secs: u64,
    pub gradient_error_backoff_secs: u64,
    pub consensus_interval_secs: u64,
    pub consensus_error_backoff_secs: u64,
    pub token_cleanup_interval_secs: u64,
    pub token_error_backoff_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Claims older than this are never trending.
    pub trending_window_days: i64,
    pub activity_window_hours: i64,
    pub related_window_days: i64,
    pub recommend_window_days: i64,
    pub candidate_limit: u32,
    pub preferred_tag_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

/// Where a gradient sits relative to a consensus band.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    True,
    False,
}

impl Verdict {
    pub fn is_true(self) -> bool {
        matches!(self, Verdict::True)
    }

    /// A vote agrees with the verdict when its implied prediction
    /// (`value > 0.5`) matches. A vote of exactly 0.5 agrees with neither.
    pub fn agrees_with(self, value: f64) -> bool {
        match self {
            Verdict::True => value > 0.5,
            Verdict::False => value < 0.5,
        }
    }
}

fn band(gradient: f64, true_edge: f64, false_edge: f64) -> Option<Verdict> {
    if gradient > true_edge {
        Some(Verdict::True)
    } else if gradient < false_edge {
        Some(Verdict::False)
    } else {
        None
    }
}

// ============================================================
// Defaults
// ============================================================

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            gradient_ttl_secs: 300,
            gradient_history_ttl_secs: 60,
            reputation_ttl_secs: 600,
            learning_ttl_secs: 300,
            expertise_ttl_secs: 300,
            trending_ttl_secs: 300,
            related_ttl_secs: 600,
            recommended_ttl_secs: 300,
            leaderboard_ttl_secs: 300,
            rank_ttl_secs: 60,
            notification_count_ttl_secs: 60,
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_votes: 10,
            reputation_true: REPUTATION_CONSENSUS_TRUE,
            reputation_false: REPUTATION_CONSENSUS_FALSE,
            resolution_true: RESOLUTION_TRUE,
            resolution_false: RESOLUTION_FALSE,
            marker_ttl_secs: 86_400,
            scan_limit: 50,
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            gradient_batch_size: 100,
            gradient_idle_secs: 5,
            gradient_error_backoff_secs: 10,
            consensus_interval_secs: 300,
            consensus_error_backoff_secs: 60,
            token_cleanup_interval_secs: 3600,
            token_error_backoff_secs: 600,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            trending_window_days: 7,
            activity_window_hours: 24,
            related_window_days: 30,
            recommend_window_days: 14,
            candidate_limit: 100,
            preferred_tag_limit: 10,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("verity.db"),
        }
    }
}

// ============================================================
// Consensus bands
// ============================================================

impl ConsensusConfig {
    /// Verdict for reputation rewards (the looser band).
    pub fn reputation_verdict(&self, gradient: f64) -> Option<Verdict> {
        band(gradient, self.reputation_true, self.reputation_false)
    }

    /// Verdict for accuracy resolution (the stricter band).
    pub fn resolution_verdict(&self, gradient: f64) -> Option<Verdict> {
        band(gradient, self.resolution_true, self.resolution_false)
    }

    pub fn marker_ttl(&self) -> Duration {
        Duration::from_secs(self.marker_ttl_secs)
    }
}

impl SweeperConfig {
    pub fn gradient_idle(&self) -> Duration {
        Duration::from_secs(self.gradient_idle_secs)
    }

    pub fn gradient_error_backoff(&self) -> Duration {
        Duration::from_secs(self.gradient_error_backoff_secs)
    }

    pub fn consensus_interval(&self) -> Duration {
        Duration::from_secs(self.consensus_interval_secs)
    }

    pub fn consensus_error_backoff(&self) -> Duration {
        Duration::from_secs(self.consensus_error_backoff_secs)
    }

    pub fn token_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.token_cleanup_interval_secs)
    }

    pub fn token_error_backoff(&self) -> Duration {
        Duration::from_secs(self.token_error_backoff_secs)
    }
}

// ============================================================
// Loading
// ============================================================

impl EngineConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Parse a TOML document; unlike `load`, errors are returned.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Reject thresholds that would make the two consensus bands inconsistent.
    pub fn validate(&self) -> Result<()> {
        let c = &self.consensus;
        let edges = [
            ("reputation_true", c.reputation_true),
            ("reputation_false", c.reputation_false),
            ("resolution_true", c.resolution_true),
            ("resolution_false", c.resolution_false),
        ];
        for (name, edge) in edges {
            if !(edge > 0.0 && edge < 1.0) {
                return Err(Error::ConfigError(format!(
                    "consensus.{name} must lie in (0, 1), got {edge}"
                )));
            }
        }
        if c.reputation_true <= 0.5 || c.resolution_true <= 0.5 {
            return Err(Error::ConfigError(
                "consensus true edges must be above 0.5".into(),
            ));
        }
        if c.reputation_false >= 0.5 || c.resolution_false >= 0.5 {
            return Err(Error::ConfigError(
                "consensus false edges must be below 0.5".into(),
            ));
        }
        if c.resolution_true < c.reputation_true || c.resolution_false > c.reputation_false {
            return Err(Error::ConfigError(
                "resolution band must be at least as strict as the reputation band".into(),
            ));
        }
        if c.marker_ttl_secs < self.sweeper.consensus_interval_secs {
            return Err(Error::ConfigError(format!(
                "consensus.marker_ttl_secs ({}) must be at least sweeper.consensus_interval_secs ({})",
                c.marker_ttl_secs, self.sweeper.consensus_interval_secs
            )));
        }
        if self.sweeper.gradient_batch_size == 0 {
            return Err(Error::ConfigError(
                "sweeper.gradient_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
