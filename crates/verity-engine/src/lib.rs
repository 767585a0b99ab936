//! Verity Engine - gradient, reputation, learning, quotas and discovery

pub mod cache;
pub mod engine;
pub mod gradient;
pub mod learning;
pub mod rate_limit;
pub mod reputation;
pub mod trending;

pub use cache::ScoreCache;
pub use engine::ScoringEngine;
pub use gradient::{vote_weight, weighted_gradient, GradientEngine, GRADIENT_QUEUE, MIN_VOTE_WEIGHT};
pub use learning::{consistency_score, learning_composite, trajectory_score, LearningEngine};
pub use rate_limit::{counter_key, RateCheck, RateLimiter};
pub use reputation::ReputationEngine;
pub use trending::{trending_score, TrendingRanker};
