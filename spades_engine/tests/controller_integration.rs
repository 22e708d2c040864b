//! Integration tests for the turn controller: lease serialization, turn
//! timeouts, disconnect grace, bot play and settlement.
//!
//! All tests run on a paused tokio clock, so timers fire as soon as the
//! runtime goes idle past their deadline.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use spades_engine::MatchError;
use spades_engine::broadcast::ChannelBroadcaster;
use spades_engine::controller::{
    ControllerConfig, InMemoryKeyedLock, KeyedLock, KeyedScheduler, LeaseToken, TokioScheduler,
    TurnController,
};
use spades_engine::db::{InMemoryMatchStore, MatchStore};
use spades_engine::errors::MatchResult;
use spades_engine::game::{Match, MatchId, MatchStatus, Phase, Seat, SeatInfo, Team};
use spades_engine::wallet::{RecordingSettlement, Settlement, StakeTier};

/// Store that yields on every load so concurrent actions overlap.
struct SlowStore {
    inner: InMemoryMatchStore,
    delay: Duration,
}

#[async_trait]
impl MatchStore for SlowStore {
    async fn load_match(&self, id: MatchId) -> MatchResult<Match> {
        tokio::time::sleep(self.delay).await;
        self.inner.load_match(id).await
    }

    async fn save_match(&self, game: &Match) -> MatchResult<()> {
        self.inner.save_match(game).await
    }

    async fn list_active(&self) -> MatchResult<Vec<Match>> {
        self.inner.list_active().await
    }

    async fn list_unsettled(&self) -> MatchResult<Vec<Match>> {
        self.inner.list_unsettled().await
    }
}

/// Lease backend with a round-trip delay on every call, like a remote database.
struct SlowLock {
    inner: InMemoryKeyedLock,
    delay: Duration,
}

#[async_trait]
impl KeyedLock for SlowLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> MatchResult<Option<LeaseToken>> {
        tokio::time::sleep(self.delay).await;
        self.inner.try_acquire(key, ttl).await
    }

    async fn release(&self, key: &str, token: LeaseToken) -> MatchResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.release(key, token).await
    }
}

/// Ledger that is down for the first `failures` calls.
struct FlakySettlement {
    failures: AtomicUsize,
    recorded: RecordingSettlement,
}

impl FlakySettlement {
    fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            recorded: RecordingSettlement::new(),
        }
    }
}

#[async_trait]
impl Settlement for FlakySettlement {
    async fn settle_match(&self, match_id: MatchId, winning_team: Team) -> MatchResult<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(MatchError::invalid_state("ledger unavailable"));
        }
        self.recorded.settle_match(match_id, winning_team).await
    }
}

struct Harness {
    controller: Arc<TurnController>,
    store: Arc<dyn MatchStore>,
    locks: Arc<dyn KeyedLock>,
    scheduler: Arc<TokioScheduler>,
    broadcaster: Arc<ChannelBroadcaster>,
    settlement: Arc<RecordingSettlement>,
}

fn build_harness(
    config: ControllerConfig,
    store: Arc<dyn MatchStore>,
    locks: Arc<dyn KeyedLock>,
    settlement: Arc<dyn Settlement>,
) -> Harness {
    let scheduler = Arc::new(TokioScheduler::new());
    let broadcaster = Arc::new(ChannelBroadcaster::default());
    let controller = TurnController::new(
        config,
        store.clone(),
        locks.clone(),
        scheduler.clone(),
        broadcaster.clone(),
        settlement,
    );
    Harness {
        controller,
        store,
        locks,
        scheduler,
        broadcaster,
        settlement: Arc::new(RecordingSettlement::new()),
    }
}

fn harness_with(config: ControllerConfig, store: Arc<dyn MatchStore>) -> Harness {
    let settlement = Arc::new(RecordingSettlement::new());
    let mut h = build_harness(
        config,
        store,
        Arc::new(InMemoryKeyedLock::new()),
        settlement.clone(),
    );
    h.settlement = settlement;
    h
}

fn harness() -> Harness {
    harness_with(ControllerConfig::default(), Arc::new(InMemoryMatchStore::new()))
}

fn humans() -> Vec<SeatInfo> {
    Seat::ALL
        .iter()
        .map(|&s| SeatInfo::human(s, 100 + i64::from(s.number())))
        .collect()
}

fn bots() -> Vec<SeatInfo> {
    Seat::ALL.iter().map(|&s| SeatInfo::bot(s)).collect()
}

/// Let spawned tasks run without moving the clock past any timer.
async fn settle_tasks() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn wait_for_status(store: &Arc<dyn MatchStore>, id: MatchId, status: MatchStatus) -> Match {
    for _ in 0..10_000 {
        let game = store.load_match(id).await.unwrap();
        if game.status == status {
            return game;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("match {id} never reached {status:?}");
}

// ============================================================================
// Lease Serialization
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_actions_one_wins_rest_in_progress() {
    let store: Arc<dyn MatchStore> = Arc::new(SlowStore {
        inner: InMemoryMatchStore::new(),
        delay: Duration::from_millis(20),
    });
    let h = harness_with(ControllerConfig::default(), store);
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let started = h.controller.start_match(game.id).await.unwrap();
    let turn = started.current_turn().unwrap();

    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.submit_bid(game.id, turn, 1 + i).await })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(MatchError::ActionInProgress)))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(busy, 3);

    let game = h.store.load_match(game.id).await.unwrap();
    let Phase::Bidding(round) = &game.phase else {
        panic!("expected bidding, got {}", game.phase.name());
    };
    assert_eq!(round.placed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_actions_bump_version_and_broadcast() {
    let h = harness();
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let mut receivers: Vec<_> = Seat::ALL
        .iter()
        .map(|&s| h.broadcaster.subscribe(game.id, s))
        .collect();

    let started = h.controller.start_match(game.id).await.unwrap();
    let turn = started.current_turn().unwrap();
    let after = h.controller.submit_bid(game.id, turn, 4).await.unwrap();
    assert!(after.version > started.version);

    for (rx, seat) in receivers.iter_mut().zip(Seat::ALL) {
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.seat, seat);
        assert_eq!(second.players[turn.index()].bid, Some(4));
        assert_eq!(second.hand.len(), 13);
    }
}

#[tokio::test(start_paused = true)]
async fn test_wrong_seat_is_rejected_without_state_change() {
    let h = harness();
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let started = h.controller.start_match(game.id).await.unwrap();
    let turn = started.current_turn().unwrap();

    let result = h.controller.submit_bid(game.id, turn.next(), 3).await;
    assert!(matches!(result, Err(MatchError::InvalidState(_))));

    let stored = h.store.load_match(game.id).await.unwrap();
    assert_eq!(stored.version, started.version);
}

// ============================================================================
// Turn Timeouts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_turn_timeout_hands_seat_to_bot_and_bids_default() {
    let h = harness();
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let started = h.controller.start_match(game.id).await.unwrap();
    let turn = started.current_turn().unwrap();

    tokio::time::sleep(Duration::from_millis(8_500)).await;
    settle_tasks().await;

    let game = h.store.load_match(game.id).await.unwrap();
    let info = game.seat(turn).unwrap();
    assert!(info.is_bot);
    assert!(info.replaced_by_bot);
    assert_eq!(info.user_id, Some(100 + i64::from(turn.number())));
    let Phase::Bidding(round) = &game.phase else {
        panic!("expected bidding");
    };
    assert_eq!(round.bids[turn.index()], Some(1));
    assert_eq!(game.current_turn(), Some(turn.next()));
}

#[tokio::test(start_paused = true)]
async fn test_acting_in_time_rearms_the_clock() {
    let h = harness();
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let started = h.controller.start_match(game.id).await.unwrap();
    let turn = started.current_turn().unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    h.controller.submit_bid(game.id, turn, 2).await.unwrap();

    // Past the first seat's original deadline, before the next seat's.
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle_tasks().await;

    let game = h.store.load_match(game.id).await.unwrap();
    assert!(game.seats.iter().all(|s| !s.is_bot));
    assert_eq!(game.current_turn(), Some(turn.next()));
}

#[tokio::test(start_paused = true)]
async fn test_timer_racing_a_late_action_keeps_next_seat_on_the_clock() {
    let latency = Duration::from_millis(50);
    let locks: Arc<dyn KeyedLock> = Arc::new(SlowLock {
        inner: InMemoryKeyedLock::new(),
        delay: latency,
    });
    let h = build_harness(
        ControllerConfig::default(),
        Arc::new(InMemoryMatchStore::new()),
        locks,
        Arc::new(RecordingSettlement::new()),
    );
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();

    let before_start = tokio::time::Instant::now();
    let started = h.controller.start_match(game.id).await.unwrap();
    let turn = started.current_turn().unwrap();

    // The clock is armed once the start's lease is in hand. Bid just before
    // the deadline so the expiring timer finds the bid holding the lease.
    let deadline = before_start + latency + Duration::from_secs(8);
    tokio::time::sleep_until(deadline - Duration::from_millis(10)).await;
    let after_bid = h.controller.submit_bid(game.id, turn, 2).await.unwrap();
    assert_eq!(after_bid.current_turn(), Some(turn.next()));

    tokio::time::sleep(Duration::from_secs(10)).await;
    settle_tasks().await;

    let game = h.store.load_match(game.id).await.unwrap();
    assert!(!game.seat(turn).unwrap().is_bot);
    assert!(game.seat(turn.next()).unwrap().is_bot);
    assert!(game.turn_seq > after_bid.turn_seq);
    assert!(h.scheduler.is_scheduled(&format!("turn:{}", game.id)));
}

#[tokio::test(start_paused = true)]
async fn test_paused_match_never_times_out() {
    let h = harness();
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    h.controller.start_match(game.id).await.unwrap();
    let paused = h.controller.pause_match(game.id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    settle_tasks().await;

    let game = h.store.load_match(game.id).await.unwrap();
    assert_eq!(game.status, MatchStatus::Paused);
    assert_eq!(game.turn_seq, paused.turn_seq);
}

// ============================================================================
// Disconnect Grace
// ============================================================================

fn slow_clock() -> ControllerConfig {
    ControllerConfig {
        turn_timeout: Duration::from_secs(600),
        ..ControllerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_grace_expiry_hands_seat_to_bot() {
    let h = harness_with(slow_clock(), Arc::new(InMemoryMatchStore::new()));
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let started = h.controller.start_match(game.id).await.unwrap();
    let idle = started.current_turn().unwrap().next();

    h.controller.on_disconnect(game.id, idle).await.unwrap();
    assert!(h.scheduler.is_scheduled(&format!("grace:{}:{}", game.id, idle.number())));

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle_tasks().await;

    let game = h.store.load_match(game.id).await.unwrap();
    let info = game.seat(idle).unwrap();
    assert!(info.is_bot);
    assert!(info.replaced_by_bot);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_keeps_seat() {
    let h = harness_with(slow_clock(), Arc::new(InMemoryMatchStore::new()));
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let started = h.controller.start_match(game.id).await.unwrap();
    let seat = started.current_turn().unwrap();

    h.controller.on_disconnect(game.id, seat).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.controller.on_reconnect(game.id, seat).await.unwrap());
    assert!(!h.scheduler.is_scheduled(&format!("grace:{}:{}", game.id, seat.number())));

    tokio::time::sleep(Duration::from_secs(60)).await;
    settle_tasks().await;

    let game = h.store.load_match(game.id).await.unwrap();
    let info = game.seat(seat).unwrap();
    assert!(!info.is_bot);
    assert!(info.disconnected_at.is_none());
    assert_eq!(game.current_turn(), Some(seat));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_takeover_is_refused() {
    let h = harness_with(slow_clock(), Arc::new(InMemoryMatchStore::new()));
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let started = h.controller.start_match(game.id).await.unwrap();
    let idle = started.current_turn().unwrap().next();

    h.controller.on_disconnect(game.id, idle).await.unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;
    settle_tasks().await;

    assert!(!h.controller.on_reconnect(game.id, idle).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_leaves_grace_timer_running() {
    let h = harness_with(slow_clock(), Arc::new(InMemoryMatchStore::new()));
    let game = h.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let started = h.controller.start_match(game.id).await.unwrap();
    let idle = started.current_turn().unwrap().next();
    let grace_key = format!("grace:{}:{}", game.id, idle.number());

    h.controller.on_disconnect(game.id, idle).await.unwrap();
    let token = h
        .locks
        .try_acquire(&format!("match:{}", game.id), Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let result = h.controller.on_reconnect(game.id, idle).await;
    assert!(matches!(result, Err(MatchError::ActionInProgress)));
    assert!(h.scheduler.is_scheduled(&grace_key));

    h.locks
        .release(&format!("match:{}", game.id), token)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;
    settle_tasks().await;

    let game = h.store.load_match(game.id).await.unwrap();
    assert!(game.seat(idle).unwrap().is_bot);
}

// ============================================================================
// Bots and Settlement
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_bot_match_completes_and_settles_once() {
    let h = harness();
    let game = h.controller.create_match(StakeTier(100), bots()).await.unwrap();
    h.controller.start_match(game.id).await.unwrap();

    let finished = wait_for_status(&h.store, game.id, MatchStatus::Completed).await;
    settle_tasks().await;

    let winner = finished.winner.unwrap();
    assert!(finished.settled);
    assert_eq!(h.settlement.count_for(game.id), 1);
    assert_eq!(h.settlement.calls(), vec![(game.id, winner)]);
    assert!(!h.scheduler.is_scheduled(&format!("turn:{}", game.id)));
}

#[tokio::test(start_paused = true)]
async fn test_completed_match_rejects_actions() {
    let h = harness();
    let game = h.controller.create_match(StakeTier::FREE, bots()).await.unwrap();
    h.controller.start_match(game.id).await.unwrap();
    wait_for_status(&h.store, game.id, MatchStatus::Completed).await;

    let result = h.controller.submit_bid(game.id, Seat::ALL[0], 3).await;
    assert!(matches!(result, Err(MatchError::InvalidState(_))));
    assert!(h.controller.cancel_match(game.id).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_match_is_not_settled() {
    let h = harness();
    let game = h.controller.create_match(StakeTier(50), humans()).await.unwrap();
    h.controller.start_match(game.id).await.unwrap();
    let cancelled = h.controller.cancel_match(game.id).await.unwrap();
    assert_eq!(cancelled.status, MatchStatus::Cancelled);

    tokio::time::sleep(Duration::from_secs(60)).await;
    settle_tasks().await;

    assert_eq!(h.settlement.count_for(game.id), 0);
    assert!(!h.scheduler.is_scheduled(&format!("turn:{}", game.id)));
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_settlement_is_retried_on_recovery() {
    let store: Arc<dyn MatchStore> = Arc::new(InMemoryMatchStore::new());
    let first = build_harness(
        ControllerConfig::default(),
        store.clone(),
        Arc::new(InMemoryKeyedLock::new()),
        Arc::new(FlakySettlement::failing(1)),
    );
    let game = first.controller.create_match(StakeTier(100), bots()).await.unwrap();
    first.controller.start_match(game.id).await.unwrap();

    let finished = wait_for_status(&store, game.id, MatchStatus::Completed).await;
    settle_tasks().await;
    assert!(!finished.settled);
    assert_eq!(store.list_unsettled().await.unwrap().len(), 1);
    drop(first);

    let ledger = Arc::new(FlakySettlement::failing(0));
    let second = build_harness(
        ControllerConfig::default(),
        store.clone(),
        Arc::new(InMemoryKeyedLock::new()),
        ledger.clone(),
    );
    assert_eq!(second.controller.recover_active_matches().await.unwrap(), 0);
    assert_eq!(second.controller.recover_active_matches().await.unwrap(), 0);

    let winner = finished.winner.unwrap();
    assert_eq!(ledger.recorded.count_for(game.id), 1);
    assert_eq!(ledger.recorded.calls(), vec![(game.id, winner)]);
    assert!(store.load_match(game.id).await.unwrap().settled);
    assert!(store.list_unsettled().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recovery_rearms_timers_from_stored_state() {
    let store: Arc<dyn MatchStore> = Arc::new(InMemoryMatchStore::new());
    let first = harness_with(ControllerConfig::default(), store.clone());
    let game = first.controller.create_match(StakeTier::FREE, humans()).await.unwrap();
    let started = first.controller.start_match(game.id).await.unwrap();
    let turn = started.current_turn().unwrap();

    // Simulate a crash: the first controller's timers die with it.
    first.scheduler.cancel(&format!("turn:{}", game.id));
    drop(first);

    let second = harness_with(ControllerConfig::default(), store);
    assert_eq!(second.controller.recover_active_matches().await.unwrap(), 1);
    assert!(second.scheduler.is_scheduled(&format!("turn:{}", game.id)));

    tokio::time::sleep(Duration::from_millis(8_500)).await;
    settle_tasks().await;

    let game = second.store.load_match(game.id).await.unwrap();
    assert!(game.seat(turn).unwrap().is_bot);
}
