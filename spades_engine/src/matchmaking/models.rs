//! Queue data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::game::{MatchId, Seat, UserId};
use crate::wallet::StakeTier;

/// A player waiting for a match. Never mutated once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub user_id: UserId,
    pub stake_tier: StakeTier,
    /// Client details forwarded to fraud scoring (IP, user agent)
    pub meta: HashMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(user_id: UserId, stake_tier: StakeTier, meta: HashMap<String, String>) -> Self {
        Self {
            user_id,
            stake_tier,
            meta,
            enqueued_at: Utc::now(),
        }
    }
}

/// Where a queued player ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAssignment {
    pub match_id: MatchId,
    pub user_id: UserId,
    pub seat: Seat,
    pub stake_tier: StakeTier,
}

/// Outcome of joining a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinOutcome {
    /// Still waiting; `position` is 1-based
    Queued { position: usize },
    Matched(MatchAssignment),
}

/// Notification hook for a queued player, called once when their match starts.
pub type OnMatched = Arc<dyn Fn(MatchAssignment) + Send + Sync>;
