//! Matchmaking queue.
//!
//! Players wait per stake tier. Four waiting players form a match; on the
//! zero-stake tier a partial group is seated with bots once the bot-fill
//! delay passes (or on demand through
//! [`force_fill`](MatchmakingQueue::force_fill)).

pub mod config;
pub mod models;
pub mod queue;
pub mod seating;
pub mod store;

pub use config::QueueConfig;
pub use models::{JoinOutcome, MatchAssignment, OnMatched, QueueEntry};
pub use queue::MatchmakingQueue;
pub use seating::SeatRandomizer;
pub use store::{InMemoryQueueStore, PgQueueStore, QueueStore};
