//! Random seat assignment for a newly formed match.

use rand::seq::SliceRandom;

use crate::game::{Seat, SeatInfo, UserId};

/// Seats players at random so queue order cannot be used to pick a partner.
pub struct SeatRandomizer {
    rng: rand::rngs::ThreadRng,
}

impl SeatRandomizer {
    pub fn new() -> Self {
        Self { rng: rand::rng() }
    }

    /// Place each user on a distinct random seat and fill the remaining
    /// seats with bots.
    ///
    /// # Arguments
    ///
    /// * `user_ids` - Humans to seat, at most four
    ///
    /// # Returns
    ///
    /// * `Vec<SeatInfo>` - Four seats ordered by seat number
    pub fn seat_players(&mut self, user_ids: &[UserId]) -> Vec<SeatInfo> {
        let mut seats = Seat::ALL;
        seats.shuffle(&mut self.rng);

        let mut assigned: Vec<SeatInfo> = seats
            .iter()
            .enumerate()
            .map(|(idx, &seat)| match user_ids.get(idx) {
                Some(&user_id) => SeatInfo::human(seat, user_id),
                None => SeatInfo::bot(seat),
            })
            .collect();
        assigned.sort_by_key(|info| info.seat);
        assigned
    }
}

impl Default for SeatRandomizer {
    fn default() -> Self {
        Self::new()
    }
}
