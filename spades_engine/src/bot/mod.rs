//! Automated player for bot-controlled seats.
//!
//! Bots follow exactly the same rules as humans: every card a bot plays
//! comes from [`legal_cards`](crate::game::legal_cards), and every bid or
//! play is applied through the regular engine path by the turn controller.
//! Strategy quality is not a goal; a bot only needs to produce a legal move.

pub mod decision;

pub use decision::{BotDecisionMaker, default_action};
