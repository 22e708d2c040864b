//! Hand scoring and the match win condition.
//!
//! A team's bid is the sum of its two partners' bids. Making the bid earns
//! ten points per bid trick plus one point (and one bag) per overtrick;
//! missing it costs ten points per bid trick and counts as a set.

use serde::{Deserialize, Serialize};

use super::constants::{POINTS_PER_BID_TRICK, SETS_TO_LOSE, WINNING_SCORE};
use super::entities::{Seat, Team, TeamPair};

/// Outcome of one completed hand.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HandSummary {
    pub hand_number: u32,
    pub bids: TeamPair<u8>,
    pub tricks: TeamPair<u8>,
    pub deltas: TeamPair<i32>,
    pub overtricks: TeamPair<u8>,
    pub set: TeamPair<bool>,
}

pub fn team_bids(bids: &[u8; 4]) -> TeamPair<u8> {
    let mut totals = TeamPair::default();
    for seat in Seat::ALL {
        *totals.get_mut(seat.team()) += bids[seat.index()];
    }
    totals
}

/// Score a finished hand from the seat bids and per-team trick counts.
pub fn score_hand(hand_number: u32, bids: &[u8; 4], tricks: TeamPair<u8>) -> HandSummary {
    let bids = team_bids(bids);
    let mut summary = HandSummary {
        hand_number,
        bids,
        tricks,
        deltas: TeamPair::default(),
        overtricks: TeamPair::default(),
        set: TeamPair::default(),
    };

    for team in [Team::A, Team::B] {
        let bid = *bids.get(team);
        let won = *tricks.get(team);
        if won >= bid {
            let over = won - bid;
            *summary.deltas.get_mut(team) = i32::from(bid) * POINTS_PER_BID_TRICK + i32::from(over);
            *summary.overtricks.get_mut(team) = over;
        } else {
            *summary.deltas.get_mut(team) = -i32::from(bid) * POINTS_PER_BID_TRICK;
            *summary.set.get_mut(team) = true;
        }
    }

    summary
}

/// Fold a hand summary into the running totals.
pub fn apply(
    summary: &HandSummary,
    scores: &mut TeamPair<i32>,
    sets: &mut TeamPair<u32>,
    bags: &mut TeamPair<u32>,
) {
    for team in [Team::A, Team::B] {
        *scores.get_mut(team) += summary.deltas.get(team);
        *bags.get_mut(team) += u32::from(*summary.overtricks.get(team));
        if *summary.set.get(team) {
            *sets.get_mut(team) += 1;
        }
    }
}

fn leader(scores: &TeamPair<i32>) -> Option<Team> {
    match scores.a.cmp(&scores.b) {
        std::cmp::Ordering::Greater => Some(Team::A),
        std::cmp::Ordering::Less => Some(Team::B),
        std::cmp::Ordering::Equal => None,
    }
}

/// Match winner, if any. Reaching the winning score takes precedence over
/// the set limit; simultaneous triggers go to the higher score and a tie
/// plays on.
pub fn winner(scores: &TeamPair<i32>, sets: &TeamPair<u32>) -> Option<Team> {
    let a_reached = scores.a >= WINNING_SCORE;
    let b_reached = scores.b >= WINNING_SCORE;
    match (a_reached, b_reached) {
        (true, false) => return Some(Team::A),
        (false, true) => return Some(Team::B),
        (true, true) => return leader(scores),
        (false, false) => {}
    }

    let a_out = sets.a >= SETS_TO_LOSE;
    let b_out = sets.b >= SETS_TO_LOSE;
    match (a_out, b_out) {
        (true, false) => Some(Team::B),
        (false, true) => Some(Team::A),
        (true, true) => leader(scores),
        (false, false) => None,
    }
}
