//! Spades game engine: cards and dealing, play rules, trick resolution,
//! scoring, and the per-match state machine.

pub mod constants;
pub mod entities;
pub mod rules;
pub mod scoring;
pub mod state_machine;
pub mod tricks;

pub use entities::{Card, Deck, Hand, Rank, Seat, Suit, Team, TeamPair};
pub use rules::{RuleViolation, check_play, legal_cards};
pub use scoring::HandSummary;
pub use state_machine::{
    Action, BidOutcome, BiddingRound, Match, MatchId, MatchStatus, Phase, PlayOutcome, PlayingRound,
    SeatInfo, TrickPlay, UserId,
};
pub use tricks::trick_winner;
