//! Match record and the phase state machine.
//!
//! `Match` is the authoritative per-match record. Phase-specific hand state
//! lives inside the `Phase` variants so that, for example, a trick can only
//! exist while the match is in the playing phase.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::constants::{MAX_BID, MIN_BID, NUM_SEATS, TRICKS_PER_HAND};
use super::entities::{Card, Deck, Hand, Seat, Team, TeamPair, deal_hands};
use super::rules::check_play;
use super::scoring::{self, HandSummary};
use super::tricks::trick_winner;
use crate::errors::{MatchError, MatchResult};
use crate::wallet::StakeTier;

pub type MatchId = Uuid;
pub type UserId = i64;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Waiting,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl MatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Cancelled)
    }
}

/// One occupied seat.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SeatInfo {
    pub seat: Seat,
    /// `None` for seats filled by a bot at match formation
    pub user_id: Option<UserId>,
    pub is_bot: bool,
    /// Set when a human occupant was permanently handed to bot control
    pub replaced_by_bot: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl SeatInfo {
    pub fn human(seat: Seat, user_id: UserId) -> Self {
        Self {
            seat,
            user_id: Some(user_id),
            is_bot: false,
            replaced_by_bot: false,
            connected_at: None,
            disconnected_at: None,
        }
    }

    pub fn bot(seat: Seat) -> Self {
        Self {
            seat,
            user_id: None,
            is_bot: true,
            replaced_by_bot: false,
            connected_at: None,
            disconnected_at: None,
        }
    }

    pub fn team(&self) -> Team {
        self.seat.team()
    }

    /// One-way conversion of a human seat to bot control.
    pub fn replace_with_bot(&mut self) {
        if !self.is_bot {
            self.is_bot = true;
            self.replaced_by_bot = true;
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TrickPlay {
    pub seat: Seat,
    pub card: Card,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BiddingRound {
    pub hands: [Hand; NUM_SEATS],
    pub bids: [Option<u8>; NUM_SEATS],
    pub turn: Seat,
}

impl BiddingRound {
    pub fn placed(&self) -> usize {
        self.bids.iter().filter(|b| b.is_some()).count()
    }

    pub fn pending(&self) -> usize {
        NUM_SEATS - self.placed()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PlayingRound {
    pub hands: [Hand; NUM_SEATS],
    pub bids: [u8; NUM_SEATS],
    pub trick: Vec<TrickPlay>,
    pub completed_tricks: u8,
    pub spades_broken: bool,
    pub team_tricks: TeamPair<u8>,
    /// Cards from completed tricks, in play order
    pub played: Vec<Card>,
    pub turn: Seat,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Dealing,
    Bidding(BiddingRound),
    Playing(PlayingRound),
    Scoring(HandSummary),
    GameComplete { winner: Team },
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Dealing => "DEALING",
            Phase::Bidding(_) => "BIDDING",
            Phase::Playing(_) => "PLAYING",
            Phase::Scoring(_) => "SCORING",
            Phase::GameComplete { .. } => "GAME_COMPLETE",
        }
    }
}

/// A seat's move, as submitted by a player, the bot, or the turn timer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Bid { value: u8 },
    Play { card: Card },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Bid { value } => write!(f, "bid {value}"),
            Action::Play { card } => write!(f, "play {card}"),
        }
    }
}

/// Result of an accepted bid.
#[derive(Clone, Debug, PartialEq)]
pub struct BidOutcome {
    /// All four bids are in and play has started
    pub bidding_complete: bool,
    pub next_turn: Option<Seat>,
}

/// Result of an accepted card play.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayOutcome {
    pub trick_winner: Option<Seat>,
    pub completed_tricks: u8,
    /// Present when this play finished the hand
    pub hand_summary: Option<HandSummary>,
    /// Present when this play finished the match
    pub winner: Option<Team>,
    pub next_turn: Option<Seat>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Match {
    pub id: MatchId,
    pub stake_tier: StakeTier,
    pub status: MatchStatus,
    pub seats: Vec<SeatInfo>,
    pub dealer: Option<Seat>,
    pub hand_number: u32,
    pub scores: TeamPair<i32>,
    pub sets: TeamPair<u32>,
    pub bags: TeamPair<u32>,
    pub phase: Phase,
    pub winner: Option<Team>,
    pub last_hand: Option<HandSummary>,
    /// Bumped by every accepted bid or play; turn timers carry it
    pub turn_seq: u64,
    /// Bumped on every save
    pub version: u64,
    pub settled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    /// Create a match in the waiting state with the given seats.
    pub fn new(id: MatchId, stake_tier: StakeTier, seats: Vec<SeatInfo>) -> Self {
        let now = Utc::now();
        Self {
            id,
            stake_tier,
            status: MatchStatus::Waiting,
            seats,
            dealer: None,
            hand_number: 0,
            scores: TeamPair::default(),
            sets: TeamPair::default(),
            bags: TeamPair::default(),
            phase: Phase::Dealing,
            winner: None,
            last_hand: None,
            turn_seq: 0,
            version: 0,
            settled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn seat(&self, seat: Seat) -> MatchResult<&SeatInfo> {
        self.seats
            .iter()
            .find(|s| s.seat == seat)
            .ok_or_else(|| MatchError::NotFound(format!("{seat} in match {}", self.id)))
    }

    pub fn seat_mut(&mut self, seat: Seat) -> MatchResult<&mut SeatInfo> {
        let id = self.id;
        self.seats
            .iter_mut()
            .find(|s| s.seat == seat)
            .ok_or_else(|| MatchError::NotFound(format!("{seat} in match {id}")))
    }

    pub fn seat_of_user(&self, user_id: UserId) -> Option<Seat> {
        self.seats
            .iter()
            .find(|s| s.user_id == Some(user_id))
            .map(|s| s.seat)
    }

    pub fn is_bot(&self, seat: Seat) -> bool {
        self.seat(seat).map(|s| s.is_bot).unwrap_or(false)
    }

    /// Whose action the match is waiting on, if anyone's.
    pub fn current_turn(&self) -> Option<Seat> {
        match &self.phase {
            Phase::Bidding(round) => Some(round.turn),
            Phase::Playing(round) => Some(round.turn),
            _ => None,
        }
    }

    pub fn hand(&self, seat: Seat) -> &[Card] {
        match &self.phase {
            Phase::Bidding(round) => &round.hands[seat.index()],
            Phase::Playing(round) => &round.hands[seat.index()],
            _ => &[],
        }
    }

    fn ensure_active(&self) -> MatchResult<()> {
        if self.status != MatchStatus::Active {
            return Err(MatchError::invalid_state(format!(
                "match {} is {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Start the match with a uniformly random dealer and a fresh shuffle.
    pub fn start(&mut self) -> MatchResult<()> {
        let dealer = Seat::from_index(rand::rng().random_range(0..NUM_SEATS));
        self.start_with(dealer, Deck::shuffled())
    }

    /// Start the match with an explicit dealer and deck.
    pub fn start_with(&mut self, dealer: Seat, deck: Deck) -> MatchResult<()> {
        if self.seats.len() != NUM_SEATS {
            return Err(MatchError::invalid_state(format!(
                "match needs {NUM_SEATS} seats, has {}",
                self.seats.len()
            )));
        }
        for seat in Seat::ALL {
            self.seat(seat)
                .map_err(|_| MatchError::invalid_state(format!("{seat} is unassigned")))?;
        }
        if self.status != MatchStatus::Waiting {
            return Err(MatchError::invalid_state(format!(
                "match {} already started",
                self.id
            )));
        }

        self.status = MatchStatus::Active;
        self.deal(dealer, deck);
        Ok(())
    }

    fn deal(&mut self, dealer: Seat, mut deck: Deck) {
        self.phase = Phase::Dealing;
        self.dealer = Some(dealer);
        self.hand_number += 1;
        let hands = deal_hands(&mut deck, dealer);
        self.phase = Phase::Bidding(BiddingRound {
            hands,
            bids: [None; NUM_SEATS],
            turn: dealer.next(),
        });
    }

    pub fn submit_bid(&mut self, seat: Seat, value: u8) -> MatchResult<BidOutcome> {
        self.ensure_active()?;
        let Phase::Bidding(round) = &mut self.phase else {
            return Err(MatchError::invalid_state(format!(
                "cannot bid during {}",
                self.phase.name()
            )));
        };
        if round.turn != seat {
            return Err(MatchError::invalid_state(format!(
                "not {seat}'s turn to bid"
            )));
        }
        if !(MIN_BID..=MAX_BID).contains(&value) {
            return Err(MatchError::invalid_input(format!(
                "bid must be between {MIN_BID} and {MAX_BID}, got {value}"
            )));
        }

        round.bids[seat.index()] = Some(value);
        round.turn = seat.next();
        self.turn_seq += 1;

        if round.pending() > 0 {
            return Ok(BidOutcome {
                bidding_complete: false,
                next_turn: Some(round.turn),
            });
        }

        let dealer = self
            .dealer
            .ok_or_else(|| MatchError::invalid_state("bidding without a dealer"))?;
        let bids = round.bids.map(|b| b.unwrap_or_default());
        let hands = std::mem::take(&mut round.hands);
        self.phase = Phase::Playing(PlayingRound {
            hands,
            bids,
            trick: Vec::with_capacity(NUM_SEATS),
            completed_tricks: 0,
            spades_broken: false,
            team_tricks: TeamPair::default(),
            played: Vec::new(),
            turn: dealer.next(),
        });

        Ok(BidOutcome {
            bidding_complete: true,
            next_turn: Some(dealer.next()),
        })
    }

    pub fn play_card(&mut self, seat: Seat, card: Card) -> MatchResult<PlayOutcome> {
        self.ensure_active()?;
        let Phase::Playing(round) = &mut self.phase else {
            return Err(MatchError::invalid_state(format!(
                "cannot play a card during {}",
                self.phase.name()
            )));
        };
        if round.turn != seat {
            return Err(MatchError::invalid_state(format!(
                "not {seat}'s turn to play"
            )));
        }

        let hand = &mut round.hands[seat.index()];
        check_play(hand, &round.trick, round.spades_broken, card)
            .map_err(|violation| MatchError::invalid_input(violation.to_string()))?;

        hand.retain(|c| *c != card);
        round.trick.push(TrickPlay { seat, card });
        if card.suit.is_trump() {
            round.spades_broken = true;
        }
        round.turn = seat.next();
        self.turn_seq += 1;

        let mut outcome = PlayOutcome {
            trick_winner: None,
            completed_tricks: round.completed_tricks,
            hand_summary: None,
            winner: None,
            next_turn: Some(round.turn),
        };

        if round.trick.len() < NUM_SEATS {
            return Ok(outcome);
        }

        let winner = trick_winner(&round.trick)
            .ok_or_else(|| MatchError::invalid_state("resolved an empty trick"))?;
        *round.team_tricks.get_mut(winner.team()) += 1;
        round.played.extend(round.trick.drain(..).map(|p| p.card));
        round.completed_tricks += 1;
        round.turn = winner;
        outcome.trick_winner = Some(winner);
        outcome.completed_tricks = round.completed_tricks;
        outcome.next_turn = Some(winner);

        if round.completed_tricks < TRICKS_PER_HAND {
            return Ok(outcome);
        }

        let summary = scoring::score_hand(self.hand_number, &round.bids, round.team_tricks);
        self.phase = Phase::Scoring(summary.clone());
        outcome.winner = self.finish_hand(summary.clone());
        outcome.hand_summary = Some(summary);
        outcome.next_turn = self.current_turn();
        Ok(outcome)
    }

    /// Apply a scored hand. Ends the match on a win, otherwise deals the
    /// next hand with the deal passed clockwise.
    fn finish_hand(&mut self, summary: HandSummary) -> Option<Team> {
        scoring::apply(&summary, &mut self.scores, &mut self.sets, &mut self.bags);
        self.last_hand = Some(summary);

        if let Some(team) = scoring::winner(&self.scores, &self.sets) {
            self.winner.get_or_insert(team);
            self.phase = Phase::GameComplete { winner: team };
            self.status = MatchStatus::Completed;
            return Some(team);
        }

        let dealer = self.dealer.map(Seat::next).unwrap_or(Seat::ALL[0]);
        self.deal(dealer, Deck::shuffled());
        None
    }

    /// Apply a bid or play. Returns the winning team when the action ended
    /// the match.
    pub fn apply(&mut self, seat: Seat, action: Action) -> MatchResult<Option<Team>> {
        match action {
            Action::Bid { value } => self.submit_bid(seat, value).map(|_| None),
            Action::Play { card } => self.play_card(seat, card).map(|outcome| outcome.winner),
        }
    }

    /// Bump the version and modification time ahead of a save.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Move a non-terminal match to `Cancelled`.
    pub fn cancel(&mut self) -> MatchResult<()> {
        if self.status.is_terminal() {
            return Err(MatchError::invalid_state(format!(
                "match {} is already {:?}",
                self.id, self.status
            )));
        }
        self.status = MatchStatus::Cancelled;
        Ok(())
    }

    pub fn pause(&mut self) -> MatchResult<()> {
        self.ensure_active()?;
        self.status = MatchStatus::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> MatchResult<()> {
        if self.status != MatchStatus::Paused {
            return Err(MatchError::invalid_state(format!(
                "match {} is not paused",
                self.id
            )));
        }
        self.status = MatchStatus::Active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::{Rank, Suit};

    fn seat(n: u8) -> Seat {
        Seat::new(n).unwrap()
    }

    fn four_seat_match() -> Match {
        let seats = Seat::ALL
            .iter()
            .map(|&s| SeatInfo::human(s, i64::from(s.number()) * 100))
            .collect();
        Match::new(Uuid::new_v4(), StakeTier::FREE, seats)
    }

    fn active_match(dealer: u8) -> Match {
        let mut m = four_seat_match();
        m.start_with(seat(dealer), Deck::shuffled()).unwrap();
        m
    }

    fn bid_all(m: &mut Match, bids: [u8; 4]) {
        for _ in 0..4 {
            let turn = m.current_turn().unwrap();
            m.submit_bid(turn, bids[turn.index()]).unwrap();
        }
    }

    // === Start Tests ===

    #[test]
    fn test_start_requires_four_seats() {
        let mut m = Match::new(
            Uuid::new_v4(),
            StakeTier::FREE,
            vec![SeatInfo::human(seat(1), 1), SeatInfo::bot(seat(2))],
        );
        assert!(matches!(m.start(), Err(MatchError::InvalidState(_))));
        assert_eq!(m.status, MatchStatus::Waiting);
    }

    #[test]
    fn test_start_deals_and_opens_bidding() {
        let m = active_match(2);
        assert_eq!(m.status, MatchStatus::Active);
        assert_eq!(m.dealer, Some(seat(2)));
        assert_eq!(m.hand_number, 1);
        assert_eq!(m.current_turn(), Some(seat(3)));
        for s in Seat::ALL {
            assert_eq!(m.hand(s).len(), 13);
        }
    }

    #[test]
    fn test_cannot_start_twice() {
        let mut m = active_match(1);
        assert!(matches!(
            m.start_with(seat(1), Deck::shuffled()),
            Err(MatchError::InvalidState(_))
        ));
    }

    // === Bidding Tests ===

    #[test]
    fn test_bidding_example_moves_to_playing() {
        let mut m = active_match(2);
        bid_all(&mut m, [3, 2, 4, 2]);
        let Phase::Playing(round) = &m.phase else {
            panic!("expected playing phase, got {}", m.phase.name());
        };
        assert_eq!(round.bids, [3, 2, 4, 2]);
        assert_eq!(round.turn, seat(3));
    }

    #[test]
    fn test_bid_out_of_turn_rejected() {
        let mut m = active_match(1);
        assert!(matches!(
            m.submit_bid(seat(1), 3),
            Err(MatchError::InvalidState(_))
        ));
    }

    #[test]
    fn test_bid_out_of_range_rejected() {
        let mut m = active_match(1);
        assert!(matches!(
            m.submit_bid(seat(2), 14),
            Err(MatchError::InvalidInput(_))
        ));
        assert_eq!(m.turn_seq, 0);
    }

    #[test]
    fn test_pending_bids_count_down() {
        let mut m = active_match(4);
        m.submit_bid(seat(1), 2).unwrap();
        m.submit_bid(seat(2), 0).unwrap();
        let Phase::Bidding(round) = &m.phase else {
            panic!("expected bidding phase");
        };
        assert_eq!(round.placed(), 2);
        assert_eq!(round.pending(), 2);
        assert_eq!(round.turn, seat(3));
    }

    #[test]
    fn test_play_rejected_during_bidding() {
        let mut m = active_match(1);
        let card = m.hand(seat(2))[0];
        assert!(matches!(
            m.play_card(seat(2), card),
            Err(MatchError::InvalidState(_))
        ));
    }

    // === Play Tests ===

    #[test]
    fn test_play_card_not_in_hand_rejected() {
        let mut m = active_match(1);
        bid_all(&mut m, [3, 3, 3, 3]);
        let other = m.hand(seat(3))[0];
        assert!(matches!(
            m.play_card(seat(2), other),
            Err(MatchError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_paused_match_rejects_actions() {
        let mut m = active_match(1);
        m.pause().unwrap();
        assert!(matches!(
            m.submit_bid(seat(2), 3),
            Err(MatchError::InvalidState(_))
        ));
        m.resume().unwrap();
        assert!(m.submit_bid(seat(2), 3).is_ok());
    }

    #[test]
    fn test_full_hand_scores_and_redeals() {
        let mut m = active_match(1);
        bid_all(&mut m, [3, 3, 3, 3]);

        let mut last = None;
        let mut tricks_seen = 0;
        for _ in 0..52 {
            let Phase::Playing(round) = &m.phase else {
                panic!("hand ended early");
            };
            let turn = round.turn;
            let card = crate::game::rules::legal_cards(
                &round.hands[turn.index()],
                &round.trick,
                round.spades_broken,
            )[0];
            let outcome = m.play_card(turn, card).unwrap();
            if outcome.trick_winner.is_some() {
                tricks_seen += 1;
                assert_eq!(outcome.completed_tricks, tricks_seen);
            }
            last = Some(outcome);
        }

        let last = last.unwrap();
        assert_eq!(tricks_seen, 13);
        let summary = last.hand_summary.expect("hand should be scored");
        assert_eq!(summary.tricks.a + summary.tricks.b, 13);
        assert_eq!(m.last_hand.as_ref(), Some(&summary));
        assert_eq!(m.scores.a, summary.deltas.a);
        assert_eq!(m.hand_number, 2);
        assert_eq!(m.dealer, Some(seat(2)));
        assert!(matches!(m.phase, Phase::Bidding(_)));
        assert_eq!(m.current_turn(), Some(seat(3)));
    }

    #[test]
    fn test_spade_play_breaks_spades() {
        let mut m = active_match(4);
        let spade = Card::new(Suit::Spades, Rank::new(4).unwrap());
        let club = |r: u8| Card::new(Suit::Clubs, Rank::new(r).unwrap());
        m.phase = Phase::Playing(PlayingRound {
            hands: [
                vec![club(10)],
                vec![club(13)],
                vec![spade],
                vec![club(14)],
            ],
            bids: [1, 1, 1, 1],
            trick: vec![],
            completed_tricks: 12,
            spades_broken: false,
            team_tricks: TeamPair { a: 6, b: 6 },
            played: vec![],
            turn: seat(1),
        });

        m.play_card(seat(1), club(10)).unwrap();
        m.play_card(seat(2), club(13)).unwrap();
        m.play_card(seat(3), spade).unwrap();
        let outcome = m.play_card(seat(4), club(14)).unwrap();

        assert_eq!(outcome.trick_winner, Some(seat(3)));
        let summary = outcome.hand_summary.unwrap();
        assert_eq!(summary.tricks, TeamPair { a: 7, b: 6 });
    }

    #[test]
    fn test_reaching_300_completes_match() {
        let mut m = active_match(4);
        m.scores = TeamPair { a: 250, b: 120 };
        let c = |s: Suit, r: u8| Card::new(s, Rank::new(r).unwrap());
        m.phase = Phase::Playing(PlayingRound {
            hands: [
                vec![c(Suit::Hearts, 14)],
                vec![c(Suit::Hearts, 2)],
                vec![c(Suit::Hearts, 3)],
                vec![c(Suit::Hearts, 4)],
            ],
            bids: [3, 4, 2, 4],
            trick: vec![],
            completed_tricks: 12,
            spades_broken: true,
            team_tricks: TeamPair { a: 4, b: 8 },
            played: vec![],
            turn: seat(1),
        });

        for n in 1..=3 {
            let card = m.hand(seat(n))[0];
            m.play_card(seat(n), card).unwrap();
        }
        let card = m.hand(seat(4))[0];
        let outcome = m.play_card(seat(4), card).unwrap();

        assert_eq!(outcome.winner, Some(Team::A));
        assert_eq!(m.winner, Some(Team::A));
        assert_eq!(m.scores.a, 300);
        assert_eq!(m.status, MatchStatus::Completed);
        assert!(matches!(m.phase, Phase::GameComplete { winner: Team::A }));
        assert_eq!(outcome.next_turn, None);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let mut m = active_match(1);
        m.cancel().unwrap();
        assert!(m.status.is_terminal());
        assert!(m.cancel().is_err());
    }

    #[test]
    fn test_match_roundtrips_through_json() {
        let mut m = active_match(3);
        bid_all(&mut m, [2, 2, 2, 2]);
        let json = serde_json::to_string(&m).unwrap();
        let back: Match = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
