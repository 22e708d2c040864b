//! Seat-redacted snapshots of a match.

use serde::{Deserialize, Serialize};

use crate::game::{
    Card, HandSummary, Match, MatchId, MatchStatus, Phase, Seat, Team, TeamPair, TrickPlay,
    legal_cards,
};
use crate::wallet::StakeTier;

/// What one seat is allowed to see of another.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PlayerView {
    pub seat: Seat,
    pub team: Team,
    pub is_bot: bool,
    pub connected: bool,
    pub cards_remaining: usize,
    pub bid: Option<u8>,
}

/// Hidden-information view of a match for one seat: its own hand in full,
/// only card counts for the others.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SeatView {
    pub match_id: MatchId,
    pub seat: Seat,
    pub team: Team,
    pub stake_tier: StakeTier,
    pub status: MatchStatus,
    pub phase: String,
    pub hand_number: u32,
    pub dealer: Option<Seat>,
    pub current_turn: Option<Seat>,
    pub hand: Vec<Card>,
    /// Cards this seat may play right now; empty unless it is its turn
    pub legal_cards: Vec<Card>,
    pub players: Vec<PlayerView>,
    pub trick: Vec<TrickPlay>,
    pub completed_tricks: u8,
    pub spades_broken: bool,
    pub team_tricks: TeamPair<u8>,
    pub scores: TeamPair<i32>,
    pub sets: TeamPair<u32>,
    pub bags: TeamPair<u32>,
    pub last_hand: Option<HandSummary>,
    pub winner: Option<Team>,
    pub turn_seq: u64,
}

/// Render the view of `game` for `seat`.
pub fn render(game: &Match, seat: Seat) -> SeatView {
    let bid_of = |s: Seat| match &game.phase {
        Phase::Bidding(round) => round.bids[s.index()],
        Phase::Playing(round) => Some(round.bids[s.index()]),
        _ => None,
    };

    let players = game
        .seats
        .iter()
        .map(|info| PlayerView {
            seat: info.seat,
            team: info.team(),
            is_bot: info.is_bot,
            connected: info.is_bot || info.disconnected_at.is_none(),
            cards_remaining: game.hand(info.seat).len(),
            bid: bid_of(info.seat),
        })
        .collect();

    let mut view = SeatView {
        match_id: game.id,
        seat,
        team: seat.team(),
        stake_tier: game.stake_tier,
        status: game.status,
        phase: game.phase.name().to_string(),
        hand_number: game.hand_number,
        dealer: game.dealer,
        current_turn: game.current_turn(),
        hand: game.hand(seat).to_vec(),
        legal_cards: Vec::new(),
        players,
        trick: Vec::new(),
        completed_tricks: 0,
        spades_broken: false,
        team_tricks: TeamPair::default(),
        scores: game.scores,
        sets: game.sets,
        bags: game.bags,
        last_hand: game.last_hand.clone(),
        winner: game.winner,
        turn_seq: game.turn_seq,
    };

    if let Phase::Playing(round) = &game.phase {
        view.trick = round.trick.clone();
        view.completed_tricks = round.completed_tricks;
        view.spades_broken = round.spades_broken;
        view.team_tricks = round.team_tricks;
        if round.turn == seat {
            view.legal_cards = legal_cards(
                &round.hands[seat.index()],
                &round.trick,
                round.spades_broken,
            );
        }
    }

    view
}
