//! Per-match turn controller.
//!
//! Every mutating action on a match runs under an exclusive match lease:
//! load, apply through the engine, save, broadcast, re-arm the turn timer.
//! A second action arriving while the lease is held fails immediately with
//! `ActionInProgress`. Bot seats and expired turn timers re-enter the same
//! path, so they are serialized with human actions.

use chrono::Utc;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::config::ControllerConfig;
use super::lock::{KeyedLock, LeaseToken, acquire_with_retry};
use super::scheduler::KeyedScheduler;
use crate::bot::{BotDecisionMaker, default_action};
use crate::broadcast::{Broadcaster, SeatView, render};
use crate::db::MatchStore;
use crate::errors::{MatchError, MatchResult};
use crate::game::{Action, Card, Match, MatchId, MatchStatus, Seat, SeatInfo};
use crate::wallet::{Settlement, StakeTier};

fn match_key(id: MatchId) -> String {
    format!("match:{id}")
}

fn turn_timer_key(id: MatchId) -> String {
    format!("turn:{id}")
}

/// Retries for a timer that found the lease held. Kept apart from
/// `turn:{id}` so a retry never displaces the next turn's timer.
fn turn_retry_key(id: MatchId, turn_seq: u64) -> String {
    format!("turn-retry:{id}:{turn_seq}")
}

fn grace_timer_key(id: MatchId, seat: Seat) -> String {
    format!("grace:{id}:{}", seat.number())
}

/// Serializes actions per match and keeps every match moving.
pub struct TurnController {
    config: ControllerConfig,
    store: Arc<dyn MatchStore>,
    locks: Arc<dyn KeyedLock>,
    scheduler: Arc<dyn KeyedScheduler>,
    broadcaster: Arc<dyn Broadcaster>,
    settlement: Arc<dyn Settlement>,
    bot: BotDecisionMaker,
}

impl TurnController {
    /// Create a controller over the given capabilities.
    ///
    /// # Arguments
    ///
    /// * `config` - Timer and bot settings
    /// * `store` - Match persistence
    /// * `locks` - Match-scoped leases
    /// * `scheduler` - Turn and disconnect-grace timers
    /// * `broadcaster` - Seat view delivery
    /// * `settlement` - Payout hook for finished matches
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn MatchStore>,
        locks: Arc<dyn KeyedLock>,
        scheduler: Arc<dyn KeyedScheduler>,
        broadcaster: Arc<dyn Broadcaster>,
        settlement: Arc<dyn Settlement>,
    ) -> Arc<Self> {
        let bot = BotDecisionMaker::new(config.bot_bid_range.clone());
        Arc::new(Self {
            config,
            store,
            locks,
            scheduler,
            broadcaster,
            settlement,
            bot,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Read a match without taking the lease.
    pub async fn load(&self, id: MatchId) -> MatchResult<Match> {
        self.store.load_match(id).await
    }

    /// Persist a new waiting match with the given seats.
    pub async fn create_match(
        &self,
        stake_tier: StakeTier,
        seats: Vec<SeatInfo>,
    ) -> MatchResult<Match> {
        let mut game = Match::new(uuid::Uuid::new_v4(), stake_tier, seats);
        game.touch();
        self.store.save_match(&game).await?;
        log::info!(
            "Created match {} (stake tier {}, {} bots)",
            game.id,
            stake_tier,
            game.seats.iter().filter(|s| s.is_bot).count()
        );
        Ok(game)
    }

    /// Deal the first hand and open bidding.
    pub async fn start_match(self: &Arc<Self>, id: MatchId) -> MatchResult<Match> {
        let game = self
            .locked(id, false, async {
                let mut game = self.store.load_match(id).await?;
                game.start()?;
                log::info!(
                    "Match {} started, dealer {}",
                    id,
                    game.dealer.map_or(0, Seat::number)
                );
                self.commit(&mut game, true).await?;
                Ok(game)
            })
            .await?;
        self.spawn_bot_if_needed(&game);
        Ok(game)
    }

    pub async fn submit_bid(
        self: &Arc<Self>,
        id: MatchId,
        seat: Seat,
        value: u8,
    ) -> MatchResult<Match> {
        self.act(id, seat, Action::Bid { value }).await
    }

    pub async fn play_card(
        self: &Arc<Self>,
        id: MatchId,
        seat: Seat,
        card: Card,
    ) -> MatchResult<Match> {
        self.act(id, seat, Action::Play { card }).await
    }

    /// Apply a seat's action under the match lease.
    pub async fn act(
        self: &Arc<Self>,
        id: MatchId,
        seat: Seat,
        action: Action,
    ) -> MatchResult<Match> {
        let game = self
            .locked(id, false, async {
                let mut game = self.store.load_match(id).await?;
                game.seat(seat)?;
                game.apply(seat, action)?;
                log::debug!("Match {}: {} {}", id, seat, action);
                self.commit(&mut game, true).await?;
                Ok(game)
            })
            .await?;
        self.spawn_bot_if_needed(&game);
        Ok(game)
    }

    /// Stop the clock. Actions are rejected until [`TurnController::resume_match`].
    pub async fn pause_match(self: &Arc<Self>, id: MatchId) -> MatchResult<Match> {
        self.locked(id, false, async {
            let mut game = self.store.load_match(id).await?;
            game.pause()?;
            self.commit(&mut game, true).await?;
            log::info!("Match {} paused", id);
            Ok(game)
        })
        .await
    }

    pub async fn resume_match(self: &Arc<Self>, id: MatchId) -> MatchResult<Match> {
        let game = self
            .locked(id, false, async {
                let mut game = self.store.load_match(id).await?;
                game.resume()?;
                self.commit(&mut game, true).await?;
                log::info!("Match {} resumed", id);
                Ok(game)
            })
            .await?;
        self.spawn_bot_if_needed(&game);
        Ok(game)
    }

    /// Abandon a match. No settlement happens for cancelled matches.
    pub async fn cancel_match(self: &Arc<Self>, id: MatchId) -> MatchResult<Match> {
        let game = self
            .locked(id, false, async {
                let mut game = self.store.load_match(id).await?;
                game.cancel()?;
                self.commit(&mut game, true).await?;
                Ok(game)
            })
            .await?;
        for seat in Seat::ALL {
            self.scheduler.cancel(&grace_timer_key(id, seat));
        }
        log::info!("Match {} cancelled", id);
        Ok(game)
    }

    /// Seat-redacted view of a match.
    pub async fn view(&self, id: MatchId, seat: Seat) -> MatchResult<SeatView> {
        let game = self.store.load_match(id).await?;
        game.seat(seat)?;
        Ok(render(&game, seat))
    }

    /// Record a dropped connection and start the grace timer. The seat keeps
    /// its cards and turn until the timer fires.
    pub async fn on_disconnect(self: &Arc<Self>, id: MatchId, seat: Seat) -> MatchResult<()> {
        let game = self
            .locked(id, true, async {
                let mut game = self.store.load_match(id).await?;
                if game.status.is_terminal() {
                    return Ok(None);
                }
                let info = game.seat_mut(seat)?;
                if info.is_bot {
                    return Ok(None);
                }
                info.disconnected_at = Some(Utc::now());
                self.commit(&mut game, false).await?;
                Ok(Some(game))
            })
            .await?;

        if game.is_some() {
            log::info!(
                "Match {}: {} disconnected, grace {:?}",
                id,
                seat,
                self.config.disconnect_grace
            );
            self.arm_grace_timer(id, seat);
        }
        Ok(())
    }

    /// Cancel a pending grace timer and mark the seat connected.
    ///
    /// # Returns
    ///
    /// * `MatchResult<bool>` - `false` if the seat has already been handed
    ///   to a bot, which is permanent for the rest of the match
    pub async fn on_reconnect(self: &Arc<Self>, id: MatchId, seat: Seat) -> MatchResult<bool> {
        let reconnected = self
            .locked(id, true, async {
                let mut game = self.store.load_match(id).await?;
                let info = game.seat_mut(seat)?;
                if info.is_bot {
                    return Ok(false);
                }
                info.connected_at = Some(Utc::now());
                info.disconnected_at = None;
                if !game.status.is_terminal() {
                    self.commit(&mut game, false).await?;
                }
                Ok(true)
            })
            .await?;

        // Only a committed reconnect stops the grace clock
        if reconnected {
            self.scheduler.cancel(&grace_timer_key(id, seat));
        }
        Ok(reconnected)
    }

    /// Re-arm timers for every active match after a restart and retry any
    /// payout that failed before it. The stored record is taken as
    /// authoritative.
    pub async fn recover_active_matches(self: &Arc<Self>) -> MatchResult<usize> {
        self.retry_unsettled().await?;

        let active = self.store.list_active().await?;
        for game in &active {
            self.arm_turn_timer(game);
            let disconnected = game
                .seats
                .iter()
                .filter(|s| !s.is_bot && s.disconnected_at.is_some());
            for info in disconnected {
                self.arm_grace_timer(game.id, info.seat);
            }
            self.spawn_bot_if_needed(game);
        }
        log::info!("Recovered {} active matches", active.len());
        Ok(active.len())
    }

    /// Settle completed matches whose payout never went through.
    ///
    /// # Returns
    ///
    /// * `MatchResult<usize>` - Matches settled by this pass
    pub async fn retry_unsettled(self: &Arc<Self>) -> MatchResult<usize> {
        let pending = self.store.list_unsettled().await?;
        let mut settled = 0;
        for game in &pending {
            let result = self
                .locked(game.id, true, async {
                    let mut stored = self.store.load_match(game.id).await?;
                    if stored.settled {
                        return Ok(false);
                    }
                    self.settle(&mut stored).await
                })
                .await;
            match result {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(e) => log::error!("Settlement retry for match {} failed: {}", game.id, e),
            }
        }
        if !pending.is_empty() {
            log::info!(
                "Settled {} of {} matches left unsettled",
                settled,
                pending.len()
            );
        }
        Ok(settled)
    }

    // === Lease handling ===

    async fn acquire(&self, id: MatchId, retry: bool) -> MatchResult<LeaseToken> {
        let key = match_key(id);
        let token = if retry {
            acquire_with_retry(
                self.locks.as_ref(),
                &key,
                self.config.lock_ttl,
                self.config.lock_retry_attempts,
                self.config.lock_retry_interval,
            )
            .await?
        } else {
            self.locks.try_acquire(&key, self.config.lock_ttl).await?
        };
        token.ok_or(MatchError::ActionInProgress)
    }

    /// Run `work` while holding the match lease.
    async fn locked<T>(
        &self,
        id: MatchId,
        retry: bool,
        work: impl Future<Output = MatchResult<T>> + Send,
    ) -> MatchResult<T> {
        let token = self.acquire(id, retry).await?;
        let result = work.await;
        if let Err(e) = self.locks.release(&match_key(id), token).await {
            log::warn!("Failed to release lease on match {}: {}", id, e);
        }
        result
    }

    // === Commit path ===

    /// Save, settle a fresh win, push views, and optionally restart the
    /// turn clock. Caller holds the lease.
    async fn commit(self: &Arc<Self>, game: &mut Match, rearm: bool) -> MatchResult<()> {
        game.touch();
        self.store.save_match(game).await?;
        self.settle(game).await?;

        if rearm {
            self.arm_turn_timer(game);
        }
        for info in &game.seats {
            self.broadcaster
                .notify(game.id, info.seat, render(game, info.seat))
                .await;
        }
        Ok(())
    }

    /// Pay out a won match that is not yet settled. A ledger failure is
    /// logged and left for [`TurnController::retry_unsettled`].
    ///
    /// # Returns
    ///
    /// * `MatchResult<bool>` - Whether this call settled the match
    async fn settle(&self, game: &mut Match) -> MatchResult<bool> {
        let Some(winner) = game.winner else {
            return Ok(false);
        };
        if game.settled {
            return Ok(false);
        }
        match self.settlement.settle_match(game.id, winner).await {
            Ok(()) => {
                game.settled = true;
                game.touch();
                self.store.save_match(game).await?;
                log::info!("Match {} complete, team {} wins", game.id, winner);
                Ok(true)
            }
            Err(e) => {
                log::error!("Settlement failed for match {}: {}", game.id, e);
                Ok(false)
            }
        }
    }

    // === Timers ===

    fn arm_turn_timer(self: &Arc<Self>, game: &Match) {
        let key = turn_timer_key(game.id);
        self.scheduler.cancel(&key);
        if game.status != MatchStatus::Active || game.current_turn().is_none() {
            return;
        }
        self.schedule_turn_timeout(game.id, game.turn_seq, self.config.turn_timeout);
    }

    fn schedule_turn_timeout(self: &Arc<Self>, id: MatchId, turn_seq: u64, delay: Duration) {
        self.schedule_timeout_under(&turn_timer_key(id), id, turn_seq, delay);
    }

    fn schedule_timeout_under(
        self: &Arc<Self>,
        key: &str,
        id: MatchId,
        turn_seq: u64,
        delay: Duration,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler.schedule(
            key,
            delay,
            Box::pin(async move {
                if let Some(controller) = weak.upgrade() {
                    controller.on_turn_timeout(id, turn_seq).await;
                }
            }),
        );
    }

    fn arm_grace_timer(self: &Arc<Self>, id: MatchId, seat: Seat) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler.schedule(
            &grace_timer_key(id, seat),
            self.config.disconnect_grace,
            Box::pin(async move {
                if let Some(controller) = weak.upgrade() {
                    controller.on_grace_expired(id, seat).await;
                }
            }),
        );
    }

    async fn on_turn_timeout(self: &Arc<Self>, id: MatchId, turn_seq: u64) {
        match self.locked(id, false, self.force_default(id, turn_seq)).await {
            Ok(Some(game)) => self.spawn_bot_if_needed(&game),
            Ok(None) => log::debug!("Match {}: stale turn timer {} ignored", id, turn_seq),
            Err(MatchError::ActionInProgress) => {
                // The holder may fail without advancing; check again shortly.
                // A retry for a turn that has moved on finds a stale seq.
                log::debug!("Match {}: turn timer hit a held lease", id);
                self.schedule_timeout_under(
                    &turn_retry_key(id, turn_seq),
                    id,
                    turn_seq,
                    self.config.lock_retry_interval,
                );
            }
            Err(e) => log::error!("Match {}: turn timeout action failed: {}", id, e),
        }
    }

    async fn force_default(
        self: &Arc<Self>,
        id: MatchId,
        turn_seq: u64,
    ) -> MatchResult<Option<Match>> {
        let mut game = self.store.load_match(id).await?;
        if game.status != MatchStatus::Active || game.turn_seq != turn_seq {
            return Ok(None);
        }
        let Some(seat) = game.current_turn() else {
            return Ok(None);
        };

        let info = game.seat_mut(seat)?;
        if !info.is_bot {
            info.replace_with_bot();
            log::info!("Match {}: {} timed out, handed to a bot", id, seat);
        }

        let action = default_action(&game, seat, self.config.timeout_bid)?;
        game.apply(seat, action)?;
        log::debug!("Match {}: forced {} for {}", id, action, seat);
        self.commit(&mut game, true).await?;
        Ok(Some(game))
    }

    async fn on_grace_expired(self: &Arc<Self>, id: MatchId, seat: Seat) {
        let result = self
            .locked(id, true, async {
                let mut game = self.store.load_match(id).await?;
                if game.status.is_terminal() {
                    return Ok(None);
                }
                let info = game.seat_mut(seat)?;
                if info.is_bot || info.disconnected_at.is_none() {
                    return Ok(None);
                }
                info.replace_with_bot();
                self.commit(&mut game, false).await?;
                Ok(Some(game))
            })
            .await;

        match result {
            Ok(Some(game)) => {
                log::info!("Match {}: {} did not return, handed to a bot", id, seat);
                self.spawn_bot_if_needed(&game);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Match {}: grace expiry for {} failed: {}", id, seat, e),
        }
    }

    // === Bot turns ===

    fn spawn_bot_if_needed(self: &Arc<Self>, game: &Match) {
        if game.status != MatchStatus::Active {
            return;
        }
        let Some(seat) = game.current_turn() else {
            return;
        };
        if !game.is_bot(seat) {
            return;
        }

        let controller = Arc::clone(self);
        let (id, turn_seq) = (game.id, game.turn_seq);
        tokio::spawn(async move {
            controller.bot_turn(id, seat, turn_seq).await;
        });
    }

    async fn bot_turn(self: Arc<Self>, id: MatchId, seat: Seat, turn_seq: u64) {
        if !self.config.bot_move_delay.is_zero() {
            tokio::time::sleep(self.config.bot_move_delay).await;
        }

        match self.locked(id, false, self.bot_move(id, seat, turn_seq)).await {
            Ok(Some(game)) => self.spawn_bot_if_needed(&game),
            Ok(None) => {}
            Err(MatchError::ActionInProgress) => {
                log::debug!("Match {}: bot move for {} skipped, lease held", id, seat);
            }
            Err(e) => log::warn!("Match {}: bot move for {} failed: {}", id, seat, e),
        }
    }

    async fn bot_move(
        self: &Arc<Self>,
        id: MatchId,
        seat: Seat,
        turn_seq: u64,
    ) -> MatchResult<Option<Match>> {
        let mut game = self.store.load_match(id).await?;
        if game.status != MatchStatus::Active
            || game.turn_seq != turn_seq
            || game.current_turn() != Some(seat)
            || !game.is_bot(seat)
        {
            return Ok(None);
        }

        let action = self.bot.decide(&game, seat)?;
        game.apply(seat, action)?;
        log::debug!("Match {}: bot {} {}", id, seat, action);
        self.commit(&mut game, true).await?;
        Ok(Some(game))
    }
}
