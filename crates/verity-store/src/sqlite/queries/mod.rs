//! Synchronous query functions over a borrowed connection.

pub mod activity;
pub mod agents;
pub mod claims;
pub mod learning;
