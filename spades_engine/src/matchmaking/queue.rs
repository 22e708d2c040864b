//! Matchmaking queue: groups waiting players into matches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::config::QueueConfig;
use super::models::{JoinOutcome, MatchAssignment, OnMatched, QueueEntry};
use super::seating::SeatRandomizer;
use super::store::QueueStore;
use crate::controller::{
    KeyedLock, KeyedScheduler, ScheduledTask, TurnController, acquire_with_retry,
};
use crate::errors::{MatchError, MatchResult};
use crate::game::UserId;
use crate::game::constants::NUM_SEATS;
use crate::wallet::{EligibilityCheck, StakeTier};

fn tier_key(tier: StakeTier) -> String {
    format!("queue:{tier}")
}

fn fill_timer_key(tier: StakeTier) -> String {
    format!("fill:{tier}")
}

fn formation_retry_key(tier: StakeTier) -> String {
    format!("form:{tier}")
}

/// Stake-tier queues plus the group formation that turns them into matches.
///
/// Formation (pop up to four, create and start the match) runs under a
/// per-tier lease so that concurrent workers never form overlapping groups.
pub struct MatchmakingQueue {
    config: QueueConfig,
    store: Arc<dyn QueueStore>,
    locks: Arc<dyn KeyedLock>,
    scheduler: Arc<dyn KeyedScheduler>,
    eligibility: Arc<dyn EligibilityCheck>,
    controller: Arc<TurnController>,
    /// Process-local notification hooks for queued users
    callbacks: Mutex<HashMap<UserId, OnMatched>>,
}

impl MatchmakingQueue {
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn QueueStore>,
        locks: Arc<dyn KeyedLock>,
        scheduler: Arc<dyn KeyedScheduler>,
        eligibility: Arc<dyn EligibilityCheck>,
        controller: Arc<TurnController>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            locks,
            scheduler,
            eligibility,
            controller,
            callbacks: Mutex::new(HashMap::new()),
        })
    }

    /// Queue a player and try to form a match.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Player joining
    /// * `stake_tier` - Entry fee bracket
    /// * `on_matched` - Called once with the seat assignment when a match starts
    /// * `meta` - Client details kept with the entry
    ///
    /// # Returns
    ///
    /// * `MatchResult<JoinOutcome>` - Queue position, or the assignment if this
    ///   join completed a group
    pub async fn join_queue(
        self: &Arc<Self>,
        user_id: UserId,
        stake_tier: StakeTier,
        on_matched: OnMatched,
        meta: HashMap<String, String>,
    ) -> MatchResult<JoinOutcome> {
        if !self.eligibility.is_eligible(user_id).await? {
            log::info!("User {} refused queue entry: account frozen", user_id);
            return Err(MatchError::AccountIneligible);
        }
        if self.store.is_queued(user_id).await? {
            return Err(MatchError::invalid_state(format!(
                "user {user_id} is already queued"
            )));
        }

        {
            let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
            if callbacks.contains_key(&user_id) {
                return Err(MatchError::invalid_state(format!(
                    "user {user_id} is already queued"
                )));
            }
            callbacks.insert(user_id, on_matched);
        }

        let entry = QueueEntry::new(user_id, stake_tier, meta);
        if !self.store.push(entry).await? {
            self.take_callback(user_id);
            return Err(MatchError::invalid_state(format!(
                "user {user_id} is already queued"
            )));
        }
        log::info!("User {} joined queue for stake tier {}", user_id, stake_tier);

        let formed = match self.form_groups(stake_tier).await {
            Ok(formed) => formed,
            Err(e) => {
                if !self.store.is_queued(user_id).await? {
                    return Err(e);
                }
                // The group went back to the head of the queue
                log::warn!("Match formation at stake tier {} failed: {}", stake_tier, e);
                self.schedule_formation_retry(stake_tier);
                Vec::new()
            }
        };
        if let Some(assignment) = formed.iter().find(|a| a.user_id == user_id) {
            return Ok(JoinOutcome::Matched(*assignment));
        }

        self.refresh_fill_timer(stake_tier).await?;
        let position = self
            .store
            .position(user_id, stake_tier)
            .await?
            .unwrap_or_default();
        Ok(JoinOutcome::Queued { position })
    }

    /// Remove a player from one tier, or all tiers when `stake_tier` is
    /// `None`. Safe to call repeatedly.
    ///
    /// # Returns
    ///
    /// * `MatchResult<bool>` - Whether an entry was removed
    pub async fn leave_queue(
        self: &Arc<Self>,
        user_id: UserId,
        stake_tier: Option<StakeTier>,
    ) -> MatchResult<bool> {
        let removed = self.store.remove(user_id, stake_tier).await?;
        if !self.store.is_queued(user_id).await? {
            self.take_callback(user_id);
        }

        for tier in &removed {
            self.refresh_fill_timer(*tier).await?;
            log::info!("User {} left queue for stake tier {}", user_id, tier);
        }
        Ok(!removed.is_empty())
    }

    /// Immediately seat the earliest zero-stake waiters (up to four) with
    /// bots filling the empty seats.
    ///
    /// # Returns
    ///
    /// * `MatchResult<Vec<MatchAssignment>>` - Empty when nobody was waiting
    pub async fn force_fill(
        self: &Arc<Self>,
        stake_tier: StakeTier,
    ) -> MatchResult<Vec<MatchAssignment>> {
        if !stake_tier.is_free() {
            return Err(MatchError::invalid_state(format!(
                "bot fill is only available for the free tier, not {stake_tier}"
            )));
        }
        self.scheduler.cancel(&fill_timer_key(stake_tier));

        let assignments = self
            .with_tier_lease(stake_tier, async {
                let group = self.store.pop_front(stake_tier, NUM_SEATS).await?;
                if group.is_empty() {
                    return Ok(Vec::new());
                }
                self.launch(stake_tier, group).await
            })
            .await;

        // A failed launch requeues its group, which needs a fresh deadline
        self.refresh_fill_timer(stake_tier).await?;
        assignments
    }

    pub async fn queue_len(&self, stake_tier: StakeTier) -> MatchResult<usize> {
        self.store.len(stake_tier).await
    }

    /// Form full groups of four while enough players wait.
    async fn form_groups(&self, stake_tier: StakeTier) -> MatchResult<Vec<MatchAssignment>> {
        let result = self
            .with_tier_lease(stake_tier, async {
                let mut assignments = Vec::new();
                while self.store.len(stake_tier).await? >= NUM_SEATS {
                    let group = self.store.pop_front(stake_tier, NUM_SEATS).await?;
                    assignments.extend(self.launch(stake_tier, group).await?);
                }
                Ok(assignments)
            })
            .await;

        match result {
            // Another worker is forming groups for this tier and will see us.
            Err(MatchError::ActionInProgress) => {
                log::warn!("Stake tier {} busy, leaving formation to its holder", stake_tier);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn with_tier_lease<T>(
        &self,
        stake_tier: StakeTier,
        work: impl std::future::Future<Output = MatchResult<T>> + Send,
    ) -> MatchResult<T> {
        let key = tier_key(stake_tier);
        let token = acquire_with_retry(
            self.locks.as_ref(),
            &key,
            self.config.tier_lock_ttl,
            self.config.lock_retry_attempts,
            self.config.lock_retry_interval,
        )
        .await?
        .ok_or(MatchError::ActionInProgress)?;

        let result = work.await;
        if let Err(e) = self.locks.release(&key, token).await {
            log::warn!("Failed to release lease on stake tier {}: {}", stake_tier, e);
        }
        result
    }

    /// Create and start a match for `group`, then notify its members.
    ///
    /// On failure the group is put back at the head of the queue.
    async fn launch(
        &self,
        stake_tier: StakeTier,
        group: Vec<QueueEntry>,
    ) -> MatchResult<Vec<MatchAssignment>> {
        let user_ids: Vec<UserId> = group.iter().map(|e| e.user_id).collect();
        let seats = SeatRandomizer::new().seat_players(&user_ids);

        let game = match self.controller.create_match(stake_tier, seats).await {
            Ok(game) => game,
            Err(e) => {
                log::error!("Failed to create match for users {:?}: {}", user_ids, e);
                self.restore(group).await;
                return Err(e);
            }
        };
        let game = match self.controller.start_match(game.id).await {
            Ok(game) => game,
            Err(e) => {
                log::error!("Failed to start match {} for users {:?}: {}", game.id, user_ids, e);
                if let Err(cancel) = self.controller.cancel_match(game.id).await {
                    log::warn!("Could not cancel unstarted match {}: {}", game.id, cancel);
                }
                self.restore(group).await;
                return Err(e);
            }
        };

        let assignments: Vec<MatchAssignment> = game
            .seats
            .iter()
            .filter_map(|info| {
                info.user_id.map(|user_id| MatchAssignment {
                    match_id: game.id,
                    user_id,
                    seat: info.seat,
                    stake_tier,
                })
            })
            .collect();

        for assignment in &assignments {
            if let Some(on_matched) = self.take_callback(assignment.user_id) {
                on_matched(*assignment);
            }
        }
        log::info!(
            "Formed match {} at stake tier {} for users {:?}",
            game.id,
            stake_tier,
            user_ids
        );
        Ok(assignments)
    }

    /// Return a group whose match never started to the queue. If that
    /// fails too, forget their hooks so they can join again.
    async fn restore(&self, group: Vec<QueueEntry>) {
        let user_ids: Vec<UserId> = group.iter().map(|e| e.user_id).collect();
        match self.store.requeue(group).await {
            Ok(()) => log::info!("Requeued users {:?} after a failed launch", user_ids),
            Err(e) => {
                log::error!(
                    "Dropped users {:?} from the queue after a failed launch: {}",
                    user_ids,
                    e
                );
                for user_id in user_ids {
                    self.take_callback(user_id);
                }
            }
        }
    }

    fn take_callback(&self, user_id: UserId) -> Option<OnMatched> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id)
    }

    /// Arm the zero-stake bot-fill timer while a partial group waits, and
    /// drop it once nobody does.
    async fn refresh_fill_timer(self: &Arc<Self>, stake_tier: StakeTier) -> MatchResult<()> {
        if !stake_tier.is_free() {
            return Ok(());
        }
        let key = fill_timer_key(stake_tier);
        let waiting = self.store.len(stake_tier).await?;
        if waiting == 0 {
            self.scheduler.cancel(&key);
            return Ok(());
        }
        if self.scheduler.is_scheduled(&key) {
            return Ok(());
        }

        self.scheduler.schedule(
            &key,
            self.config.bot_fill_delay,
            Self::fill_task(Arc::downgrade(self), stake_tier),
        );
        log::debug!("Bot fill armed for stake tier {} ({} waiting)", stake_tier, waiting);
        Ok(())
    }

    fn schedule_formation_retry(self: &Arc<Self>, stake_tier: StakeTier) {
        let key = formation_retry_key(stake_tier);
        if self.scheduler.is_scheduled(&key) {
            return;
        }
        let weak = Arc::downgrade(self);
        self.scheduler.schedule(
            &key,
            self.config.formation_retry_delay,
            Box::pin(async move {
                let Some(queue) = weak.upgrade() else {
                    return;
                };
                match queue.form_groups(stake_tier).await {
                    Ok(formed) if !formed.is_empty() => log::info!(
                        "Formation retry seated {} players at stake tier {}",
                        formed.len(),
                        stake_tier
                    ),
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("Formation retry at stake tier {} failed: {}", stake_tier, e);
                        queue.schedule_formation_retry(stake_tier);
                        return;
                    }
                }
                if let Err(e) = queue.refresh_fill_timer(stake_tier).await {
                    log::warn!("Bot fill refresh at stake tier {} failed: {}", stake_tier, e);
                }
            }),
        );
    }

    fn fill_task(queue: Weak<Self>, stake_tier: StakeTier) -> ScheduledTask {
        Box::pin(async move {
            let Some(queue) = queue.upgrade() else {
                return;
            };
            match queue.force_fill(stake_tier).await {
                Ok(assignments) if !assignments.is_empty() => {
                    log::info!(
                        "Bot fill seated {} waiting players at stake tier {}",
                        assignments.len(),
                        stake_tier
                    );
                }
                Ok(_) => {}
                Err(e) => log::error!("Bot fill for stake tier {} failed: {}", stake_tier, e),
            }
        })
    }
}
