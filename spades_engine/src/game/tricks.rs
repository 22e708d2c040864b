//! Trick resolution with spades as the fixed trump suit.

use super::entities::{Card, Seat, Suit};
use super::state_machine::TrickPlay;

/// Ordering key of a card within a trick led in `lead`: trumps beat the
/// lead suit, the lead suit beats everything else, and off-suit cards
/// can never win.
fn strength(card: Card, lead: Suit) -> (u8, u8) {
    let tier = if card.suit.is_trump() {
        2
    } else if card.suit == lead {
        1
    } else {
        0
    };
    let rank = if tier == 0 { 0 } else { card.rank.value() };
    (tier, rank)
}

/// Whether `challenger` supersedes the currently winning card.
pub fn beats(challenger: Card, current: Card, lead: Suit) -> bool {
    strength(challenger, lead) > strength(current, lead)
}

/// Winner of a trick given its lead suit. The plays may be inspected in any
/// order; the result only depends on the set of plays.
pub fn winning_play(lead: Suit, plays: &[TrickPlay]) -> Option<TrickPlay> {
    let mut iter = plays.iter().copied();
    let mut best = iter.next()?;
    for play in iter {
        if beats(play.card, best.card, lead) {
            best = play;
        }
    }
    Some(best)
}

/// Winner of a trick in play order; the first play is the lead.
pub fn trick_winner(plays: &[TrickPlay]) -> Option<Seat> {
    let lead = plays.first()?.card.suit;
    winning_play(lead, plays).map(|p| p.seat)
}
