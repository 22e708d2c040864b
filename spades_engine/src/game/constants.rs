//! Fixed table and scoring parameters for the four-seat Spades variant.

pub const NUM_SEATS: usize = 4;
pub const DECK_SIZE: usize = 52;
pub const CARDS_PER_HAND: usize = DECK_SIZE / NUM_SEATS;
pub const TRICKS_PER_HAND: u8 = CARDS_PER_HAND as u8;

pub const MIN_BID: u8 = 0;
pub const MAX_BID: u8 = 13;

/// Cumulative score that wins the match.
pub const WINNING_SCORE: i32 = 300;
/// Failed bids after which a team loses the match.
pub const SETS_TO_LOSE: u32 = 2;
pub const POINTS_PER_BID_TRICK: i32 = 10;
