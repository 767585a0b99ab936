//! verity: epistemic scoring and rate governance
//!
//! The `verity` binary wires a SQLite store, an in-process cache and the
//! system clock into one `ScoringEngine`. The same wiring is exposed here so
//! integration tests exercise exactly what the binary runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use verity_core::{Clock, EngineConfig, Result, SystemClock};
use verity_engine::ScoringEngine;
use verity_store::{CacheStore, MemoryCache, ScoreStore, SqliteStore, StoreNotifier};

pub use verity_core;
pub use verity_engine;
pub use verity_store;
pub use verity_sweeper;

pub const CONFIG_ENV: &str = "VERITY_CONFIG";
pub const DB_ENV: &str = "VERITY_DB";
pub const DEFAULT_CONFIG_FILE: &str = "verity.toml";

/// Config path precedence: flag, then `VERITY_CONFIG`, then `./verity.toml`.
pub fn config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load and validate the config, then apply the database override
/// (flag, then `VERITY_DB`).
pub fn load_config(path: &Path, db: Option<PathBuf>) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(path);
    if let Some(db) = db.or_else(|| std::env::var_os(DB_ENV).map(PathBuf::from)) {
        config.store.path = db;
    }
    config.validate()?;
    Ok(config)
}

/// Everything a running process shares: one store, one cache, one clock.
pub struct Services {
    pub engine: Arc<ScoringEngine>,
    pub store: Arc<dyn ScoreStore>,
    pub cache: Arc<dyn CacheStore>,
    pub notifier: Arc<StoreNotifier>,
}

impl Services {
    /// Open the SQLite file named by the config and build the engine over it.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.store.path)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = Arc::new(MemoryCache::new(Arc::clone(&clock)));
        Ok(Self::with(config, store, cache, clock))
    }

    pub fn with(
        config: EngineConfig,
        store: Arc<dyn ScoreStore>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let notifier = Arc::new(StoreNotifier::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&clock),
            Duration::from_secs(config.cache.notification_count_ttl_secs),
        ));
        let engine = Arc::new(ScoringEngine::new(
            config,
            Arc::clone(&store),
            Arc::clone(&cache),
            notifier.clone(),
            clock,
        ));
        Self {
            engine,
            store,
            cache,
            notifier,
        }
    }
}
