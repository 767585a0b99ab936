//! Verity Store - cache, durable store and notification seams

pub mod cache;
pub mod notify;
pub mod sqlite;
pub mod store;

pub use cache::{CacheStore, MemoryCache, UnavailableCache};
pub use notify::{unread_count_key, Notifier, RecordingNotifier, StoreNotifier};
pub use sqlite::SqliteStore;
pub use store::ScoreStore;
