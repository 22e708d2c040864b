//! Fan-out of seat views to in-process subscribers (WebSocket sessions).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

use super::views::SeatView;
use crate::game::{MatchId, Seat};

/// Delivers seat views to observers. Best effort: delivery failures never
/// reach the engine.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn notify(&self, match_id: MatchId, seat: Seat, view: SeatView);
}

/// Per-seat mpsc subscribers, keyed by match and seat.
pub struct ChannelBroadcaster {
    capacity: usize,
    subscribers: Mutex<HashMap<(MatchId, Seat), Vec<mpsc::Sender<SeatView>>>>,
}

impl ChannelBroadcaster {
    /// Create a broadcaster whose subscriber channels hold `capacity` views.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register an observer for one seat of a match.
    pub fn subscribe(&self, match_id: MatchId, seat: Seat) -> mpsc::Receiver<SeatView> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((match_id, seat))
            .or_default()
            .push(sender);
        log::debug!("Subscribed to {} of match {}", seat, match_id);
        receiver
    }

    /// Number of live subscribers for a seat.
    pub fn subscriber_count(&self, match_id: MatchId, seat: Seat) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(match_id, seat))
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn notify(&self, match_id: MatchId, seat: Seat, view: SeatView) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = subscribers.get_mut(&(match_id, seat)) else {
            return;
        };

        senders.retain(|sender| match sender.try_send(view.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!(
                    "Subscriber for {} of match {} is full, dropping view",
                    seat,
                    match_id
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Subscriber for {} of match {} closed, removing", seat, match_id);
                false
            }
        });

        if senders.is_empty() {
            subscribers.remove(&(match_id, seat));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::views::render;
    use crate::game::{Match, SeatInfo};
    use crate::wallet::StakeTier;
    use uuid::Uuid;

    fn view_for(seat: Seat) -> (MatchId, SeatView) {
        let seats = Seat::ALL.iter().map(|&s| SeatInfo::bot(s)).collect();
        let m = Match::new(Uuid::new_v4(), StakeTier::FREE, seats);
        (m.id, render(&m, seat))
    }

    // === Delivery Tests ===

    #[tokio::test]
    async fn test_notify_reaches_only_that_seat() {
        let broadcaster = ChannelBroadcaster::default();
        let seat1 = Seat::new(1).unwrap();
        let seat2 = Seat::new(2).unwrap();
        let (match_id, view) = view_for(seat1);
        let mut rx1 = broadcaster.subscribe(match_id, seat1);
        let mut rx2 = broadcaster.subscribe(match_id, seat2);

        broadcaster.notify(match_id, seat1, view.clone()).await;

        assert_eq!(rx1.recv().await.unwrap(), view);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_dropped() {
        let broadcaster = ChannelBroadcaster::default();
        let seat = Seat::new(4).unwrap();
        let (match_id, view) = view_for(seat);
        let rx = broadcaster.subscribe(match_id, seat);
        assert_eq!(broadcaster.subscriber_count(match_id, seat), 1);

        drop(rx);
        broadcaster.notify(match_id, seat, view).await;
        assert_eq!(broadcaster.subscriber_count(match_id, seat), 0);
    }

    #[tokio::test]
    async fn test_full_subscriber_is_kept() {
        let broadcaster = ChannelBroadcaster::new(1);
        let seat = Seat::new(2).unwrap();
        let (match_id, view) = view_for(seat);
        let mut rx = broadcaster.subscribe(match_id, seat);

        broadcaster.notify(match_id, seat, view.clone()).await;
        broadcaster.notify(match_id, seat, view.clone()).await;

        assert_eq!(broadcaster.subscriber_count(match_id, seat), 1);
        assert_eq!(rx.recv().await.unwrap(), view);
        assert!(rx.try_recv().is_err());
    }
}
