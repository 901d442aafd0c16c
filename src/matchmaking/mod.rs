//! Matchmaking
//!
//! Per-mode queues of waiting players and the periodic matcher that places
//! them on hub servers.

pub mod matchmaker;
pub mod queue;

pub use matchmaker::Matchmaker;
pub use queue::{MatchResult, MatchmakingError, QueueEntry};
