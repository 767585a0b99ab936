//! Error types for Verity

use crate::types::ActionType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("rate limit exceeded for {action}: {current}/{limit}")]
    RateLimitExceeded {
        action: ActionType,
        current: u32,
        limit: u32,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn store(message: impl std::fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    pub fn cache(message: impl std::fmt::Display) -> Self {
        Self::Cache(message.to_string())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Timeouts and unavailability of the cache or durable store.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Cache(_))
    }

    /// Text safe to show a client. Rate-limit denials carry their counts so the
    /// client can say how far over quota it is; everything else stays opaque.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound { kind, .. } => format!("{kind} not found"),
            Self::RateLimitExceeded {
                action,
                current,
                limit,
            } => format!("daily limit reached for {action} ({current}/{limit})"),
            Self::InvalidInput(message) => message.clone(),
            _ => "internal error".to_string(),
        }
    }
}
