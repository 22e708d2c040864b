//! # Spades Engine
//!
//! Four-player, real-money Spades matches: the per-match state machine,
//! trick resolution and scoring, the turn controller that keeps exactly one
//! action in flight per match, automated players, the matchmaking queue and
//! the per-seat state broadcaster.
//!
//! ## Architecture
//!
//! A match moves through these phases:
//!
//! - **Dealing**: a fresh deck is dealt 13 cards a seat, starting at the dealer's left
//! - **Bidding**: each seat bids 0 to 13 tricks, clockwise from the dealer's left
//! - **Playing**: 13 tricks; spades are trump and may not be led until broken
//! - **Scoring**: team bids are scored against tricks won
//! - **GameComplete**: a team reached 300 points or the other team was set twice
//!
//! When a hand ends without a winner the next hand is dealt automatically
//! with the deal passed clockwise.
//!
//! ## Core Modules
//!
//! - [`game`]: cards, rules, trick resolution, scoring and the match record
//! - [`controller`]: per-match leases, turn timers, bot turns
//! - [`matchmaking`]: stake-tier queues and group formation
//! - [`broadcast`]: seat-redacted views and their delivery
//! - [`db`]: PostgreSQL pool and match persistence
//! - [`wallet`]: settlement and eligibility boundaries
//!
//! ## Example
//!
//! ```
//! use spades_engine::game::{Match, Seat, SeatInfo};
//! use spades_engine::wallet::StakeTier;
//!
//! let seats = Seat::ALL.iter().map(|&s| SeatInfo::bot(s)).collect();
//! let mut game = Match::new(uuid::Uuid::new_v4(), StakeTier::FREE, seats);
//! game.start().unwrap();
//! assert_eq!(game.hand_number, 1);
//! ```

pub mod bot;
pub mod broadcast;
pub mod controller;
pub mod db;
pub mod errors;
pub mod game;
pub mod matchmaking;
pub mod wallet;

pub use errors::{MatchError, MatchResult};
pub use game::{Action, Card, Match, MatchId, MatchStatus, Phase, Rank, Seat, Suit, Team};
