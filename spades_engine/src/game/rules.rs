//! Card-play legality shared by human validation, bots and timeout defaults.

use super::entities::{Card, Suit, hand_has_suit};
use super::state_machine::TrickPlay;

/// Why a card may not be played.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RuleViolation {
    #[error("card {0} is not in hand")]
    NotInHand(Card),
    #[error("spades have not been broken")]
    SpadesNotBroken,
    #[error("must follow {0}")]
    MustFollowSuit(Suit),
}

/// Check a single play against the hand, the trick so far and the
/// spades-broken flag. Rules are applied in order: possession, spade-lead
/// restriction, suit-following.
pub fn check_play(
    hand: &[Card],
    trick: &[TrickPlay],
    spades_broken: bool,
    card: Card,
) -> Result<(), RuleViolation> {
    if !hand.contains(&card) {
        return Err(RuleViolation::NotInHand(card));
    }

    match trick.first() {
        None => {
            let only_spades = hand.iter().all(|c| c.suit == Suit::Spades);
            if card.suit == Suit::Spades && !spades_broken && !only_spades {
                return Err(RuleViolation::SpadesNotBroken);
            }
        }
        Some(lead) => {
            let lead_suit = lead.card.suit;
            if card.suit != lead_suit && hand_has_suit(hand, lead_suit) {
                return Err(RuleViolation::MustFollowSuit(lead_suit));
            }
        }
    }

    Ok(())
}

/// Every card in `hand` that `check_play` accepts, in hand order.
pub fn legal_cards(hand: &[Card], trick: &[TrickPlay], spades_broken: bool) -> Vec<Card> {
    hand.iter()
        .copied()
        .filter(|&card| check_play(hand, trick, spades_broken, card).is_ok())
        .collect()
}
