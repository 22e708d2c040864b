//! Bot move selection.

use std::ops::RangeInclusive;

use rand::Rng;

use crate::errors::{MatchError, MatchResult};
use crate::game::{Action, Match, Phase, Seat, legal_cards};

/// Picks bids and cards for bot-controlled seats.
#[derive(Debug, Clone)]
pub struct BotDecisionMaker {
    /// Range the bot draws its bid from
    bid_range: RangeInclusive<u8>,
}

impl BotDecisionMaker {
    pub fn new(bid_range: RangeInclusive<u8>) -> Self {
        Self { bid_range }
    }

    /// Decide the move for `seat`.
    ///
    /// # Arguments
    ///
    /// * `game` - Current match record
    /// * `seat` - Seat the bot is acting for
    ///
    /// # Returns
    ///
    /// * `MatchResult<Action>` - A random bid while bidding, otherwise the
    ///   first legal card in hand order
    pub fn decide(&self, game: &Match, seat: Seat) -> MatchResult<Action> {
        match &game.phase {
            Phase::Bidding(_) => {
                let value = rand::rng().random_range(self.bid_range.clone());
                Ok(Action::Bid { value })
            }
            Phase::Playing(_) => first_legal_card(game, seat),
            other => Err(MatchError::invalid_state(format!(
                "bot has nothing to do during {}",
                other.name()
            ))),
        }
    }
}

impl Default for BotDecisionMaker {
    fn default() -> Self {
        Self::new(1..=5)
    }
}

/// Move forced on a seat whose turn timer ran out: the fixed `timeout_bid`
/// while bidding, otherwise the first legal card.
pub fn default_action(game: &Match, seat: Seat, timeout_bid: u8) -> MatchResult<Action> {
    match &game.phase {
        Phase::Bidding(_) => Ok(Action::Bid { value: timeout_bid }),
        Phase::Playing(_) => first_legal_card(game, seat),
        other => Err(MatchError::invalid_state(format!(
            "no default action during {}",
            other.name()
        ))),
    }
}

fn first_legal_card(game: &Match, seat: Seat) -> MatchResult<Action> {
    let Phase::Playing(round) = &game.phase else {
        return Err(MatchError::invalid_state("not in the playing phase"));
    };
    legal_cards(&round.hands[seat.index()], &round.trick, round.spades_broken)
        .first()
        .map(|&card| Action::Play { card })
        .ok_or_else(|| MatchError::invalid_state(format!("{seat} has no legal card")))
}
