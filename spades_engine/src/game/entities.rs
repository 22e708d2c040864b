use rand::seq::SliceRandom;
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr};

use super::constants::{CARDS_PER_HAND, DECK_SIZE, NUM_SEATS};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Suit {
    #[serde(alias = "clubs", alias = "C")]
    Clubs,
    #[serde(alias = "diamonds", alias = "D")]
    Diamonds,
    #[serde(alias = "hearts", alias = "H")]
    Hearts,
    #[serde(alias = "spades", alias = "S")]
    Spades,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades];

    /// Spades are always trump in this variant.
    pub const TRUMP: Suit = Suit::Spades;

    pub fn is_trump(self) -> bool {
        self == Self::TRUMP
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let repr = match self {
            Self::Clubs => "♣",
            Self::Diamonds => "♦",
            Self::Hearts => "♥",
            Self::Spades => "♠",
        };
        write!(f, "{repr}")
    }
}

/// Card rank, 2 (deuce) through 14 (ace).
///
/// Ranks deserialize from either a number (`12`) or a label (`"Q"`), and
/// both spellings compare identically.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Rank(u8);

impl Rank {
    pub const TWO: Rank = Rank(2);
    pub const TEN: Rank = Rank(10);
    pub const JACK: Rank = Rank(11);
    pub const QUEEN: Rank = Rank(12);
    pub const KING: Rank = Rank(13);
    pub const ACE: Rank = Rank(14);

    pub fn new(value: u8) -> Option<Self> {
        (2..=14).contains(&value).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Rank> {
        (2..=14).map(Rank)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            11 => write!(f, "J"),
            12 => write!(f, "Q"),
            13 => write!(f, "K"),
            14 => write!(f, "A"),
            v => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[error("invalid rank: {0}")]
pub struct InvalidRank(pub String);

impl FromStr for Rank {
    type Err = InvalidRank;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s.trim().to_ascii_uppercase().as_str() {
            "J" | "JACK" => 11,
            "Q" | "QUEEN" => 12,
            "K" | "KING" => 13,
            "A" | "ACE" => 14,
            other => other.parse().map_err(|_| InvalidRank(s.to_string()))?,
        };
        Rank::new(value).ok_or_else(|| InvalidRank(s.to_string()))
    }
}

impl TryFrom<u8> for Rank {
    type Error = InvalidRank;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rank::new(value).ok_or_else(|| InvalidRank(value.to_string()))
    }
}

impl<'de> Deserialize<'de> for Rank {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u8),
            Label(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Rank::try_from(n).map_err(serde::de::Error::custom),
            Repr::Label(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Card {
    pub suit: Suit,
    pub rank: Rank,
}

impl Card {
    pub fn new(suit: Suit, rank: Rank) -> Self {
        Self { suit, rank }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.rank, self.suit)
    }
}

#[derive(Debug)]
pub struct Deck {
    cards: [Card; DECK_SIZE],
    pub deck_idx: usize,
}

impl Deck {
    /// Returns `None` once all 52 cards have been dealt.
    pub fn deal_card(&mut self) -> Option<Card> {
        let card = self.cards.get(self.deck_idx).copied()?;
        self.deck_idx += 1;
        Some(card)
    }

    pub fn shuffle(&mut self) {
        self.cards.shuffle(&mut rand::rng());
        self.deck_idx = 0;
    }

    pub fn remaining(&self) -> usize {
        DECK_SIZE - self.deck_idx
    }

    pub fn shuffled() -> Self {
        let mut deck = Self::default();
        deck.shuffle();
        deck
    }
}

impl Default for Deck {
    fn default() -> Self {
        let mut cards = [Card::new(Suit::Clubs, Rank::TWO); DECK_SIZE];
        let mut i = 0;
        for suit in Suit::ALL {
            for rank in Rank::all() {
                cards[i] = Card::new(suit, rank);
                i += 1;
            }
        }
        Self { cards, deck_idx: 0 }
    }
}

/// The two partnerships. Odd seats play for A, even seats for B.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Team {
    A,
    B,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::A => write!(f, "A"),
            Team::B => write!(f, "B"),
        }
    }
}

/// A pair of per-team values (tricks, scores, sets...).
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TeamPair<T> {
    pub a: T,
    pub b: T,
}

impl<T> TeamPair<T> {
    pub fn get(&self, team: Team) -> &T {
        match team {
            Team::A => &self.a,
            Team::B => &self.b,
        }
    }

    pub fn get_mut(&mut self, team: Team) -> &mut T {
        match team {
            Team::A => &mut self.a,
            Team::B => &mut self.b,
        }
    }
}

/// Seat number, 1 through 4, clockwise around the table.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Seat(u8);

impl Seat {
    pub const ALL: [Seat; NUM_SEATS] = [Seat(1), Seat(2), Seat(3), Seat(4)];

    pub fn new(number: u8) -> Option<Self> {
        (1..=NUM_SEATS as u8).contains(&number).then_some(Self(number))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based index for per-seat arrays.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    pub fn from_index(index: usize) -> Self {
        Self((index % NUM_SEATS) as u8 + 1)
    }

    /// The seat to this seat's left; 4 wraps to 1.
    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    /// Team affiliation: odd seats are Team A, even seats Team B.
    pub fn team(self) -> Team {
        if self.0 % 2 == 1 { Team::A } else { Team::B }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seat {}", self.0)
    }
}

impl TryFrom<u8> for Seat {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Seat::new(value).ok_or_else(|| format!("seat must be between 1 and 4, got {value}"))
    }
}

impl From<Seat> for u8 {
    fn from(seat: Seat) -> u8 {
        seat.0
    }
}

pub type Hand = Vec<Card>;

/// Deal a full deck 13 cards each, starting at the dealer's left so the
/// dealer receives the last card. Hands come back sorted and indexed by
/// `Seat::index`.
pub fn deal_hands(deck: &mut Deck, dealer: Seat) -> [Hand; NUM_SEATS] {
    let mut hands: [Hand; NUM_SEATS] = Default::default();
    let mut seat = dealer.next();
    while let Some(card) = deck.deal_card() {
        hands[seat.index()].push(card);
        seat = seat.next();
    }
    for hand in &mut hands {
        debug_assert_eq!(hand.len(), CARDS_PER_HAND);
        hand.sort();
    }
    hands
}

pub fn hand_has_suit(hand: &[Card], suit: Suit) -> bool {
    hand.iter().any(|c| c.suit == suit)
}
