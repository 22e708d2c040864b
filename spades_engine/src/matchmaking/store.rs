//! Storage for waiting players, FIFO per stake tier.

use async_trait::async_trait;
use sqlx::{PgPool, Row, types::Json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use super::models::QueueEntry;
use crate::db::timeouts::with_default_timeout;
use crate::errors::MatchResult;
use crate::game::UserId;
use crate::wallet::StakeTier;

/// A player may wait in at most one tier at a time.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append an entry. Returns `false` if the user is already queued.
    async fn push(&self, entry: QueueEntry) -> MatchResult<bool>;

    async fn is_queued(&self, user_id: UserId) -> MatchResult<bool>;

    /// Remove the user from `tier`, or from every tier when `None`.
    ///
    /// # Returns
    ///
    /// * `MatchResult<Vec<StakeTier>>` - Tiers the user was removed from
    async fn remove(&self, user_id: UserId, tier: Option<StakeTier>)
    -> MatchResult<Vec<StakeTier>>;

    /// Take up to `count` of the earliest entries in `tier`.
    async fn pop_front(&self, tier: StakeTier, count: usize) -> MatchResult<Vec<QueueEntry>>;

    /// Put popped entries back ahead of everyone who joined after them.
    /// Users who queued again in the meantime are skipped.
    async fn requeue(&self, entries: Vec<QueueEntry>) -> MatchResult<()>;

    async fn len(&self, tier: StakeTier) -> MatchResult<usize>;

    /// 1-based position of the user in `tier`.
    async fn position(&self, user_id: UserId, tier: StakeTier) -> MatchResult<Option<usize>>;
}

/// Queue held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    tiers: Mutex<HashMap<StakeTier, VecDeque<QueueEntry>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn push(&self, entry: QueueEntry) -> MatchResult<bool> {
        let mut tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        let queued = tiers
            .values()
            .any(|queue| queue.iter().any(|e| e.user_id == entry.user_id));
        if queued {
            return Ok(false);
        }
        tiers.entry(entry.stake_tier).or_default().push_back(entry);
        Ok(true)
    }

    async fn is_queued(&self, user_id: UserId) -> MatchResult<bool> {
        let tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tiers
            .values()
            .any(|queue| queue.iter().any(|e| e.user_id == user_id)))
    }

    async fn remove(
        &self,
        user_id: UserId,
        tier: Option<StakeTier>,
    ) -> MatchResult<Vec<StakeTier>> {
        let mut tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = Vec::new();
        for (stake_tier, queue) in tiers.iter_mut() {
            if tier.is_some_and(|t| t != *stake_tier) {
                continue;
            }
            let before = queue.len();
            queue.retain(|e| e.user_id != user_id);
            if queue.len() != before {
                removed.push(*stake_tier);
            }
        }
        tiers.retain(|_, queue| !queue.is_empty());
        Ok(removed)
    }

    async fn pop_front(&self, tier: StakeTier, count: usize) -> MatchResult<Vec<QueueEntry>> {
        let mut tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = tiers.get_mut(&tier) else {
            return Ok(Vec::new());
        };
        let take = count.min(queue.len());
        let popped = queue.drain(..take).collect();
        if queue.is_empty() {
            tiers.remove(&tier);
        }
        Ok(popped)
    }

    async fn requeue(&self, entries: Vec<QueueEntry>) -> MatchResult<()> {
        let mut tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.into_iter().rev() {
            let queued = tiers
                .values()
                .any(|queue| queue.iter().any(|e| e.user_id == entry.user_id));
            if !queued {
                tiers.entry(entry.stake_tier).or_default().push_front(entry);
            }
        }
        Ok(())
    }

    async fn len(&self, tier: StakeTier) -> MatchResult<usize> {
        let tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tiers.get(&tier).map_or(0, VecDeque::len))
    }

    async fn position(&self, user_id: UserId, tier: StakeTier) -> MatchResult<Option<usize>> {
        let tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tiers
            .get(&tier)
            .and_then(|queue| queue.iter().position(|e| e.user_id == user_id))
            .map(|idx| idx + 1))
    }
}

/// Queue rows in `queue_entries`, shared by every matchmaking worker.
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn push(&self, entry: QueueEntry) -> MatchResult<bool> {
        let result = with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO queue_entries (user_id, stake_tier, meta, enqueued_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id) DO NOTHING
                "#,
            )
            .bind(entry.user_id)
            .bind(entry.stake_tier.entry_fee())
            .bind(Json(&entry.meta))
            .bind(entry.enqueued_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_queued(&self, user_id: UserId) -> MatchResult<bool> {
        let row = with_default_timeout(
            sqlx::query("SELECT 1 FROM queue_entries WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.is_some())
    }

    async fn remove(
        &self,
        user_id: UserId,
        tier: Option<StakeTier>,
    ) -> MatchResult<Vec<StakeTier>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                DELETE FROM queue_entries
                WHERE user_id = $1 AND ($2::BIGINT IS NULL OR stake_tier = $2)
                RETURNING stake_tier
                "#,
            )
            .bind(user_id)
            .bind(tier.map(StakeTier::entry_fee))
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .iter()
            .map(|row| StakeTier(row.get::<i64, _>("stake_tier")))
            .collect())
    }

    async fn pop_front(&self, tier: StakeTier, count: usize) -> MatchResult<Vec<QueueEntry>> {
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                DELETE FROM queue_entries
                WHERE id IN (
                    SELECT id FROM queue_entries
                    WHERE stake_tier = $1
                    ORDER BY enqueued_at, id
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, user_id, stake_tier, meta, enqueued_at
                "#,
            )
            .bind(tier.entry_fee())
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;

        let mut entries = rows
            .into_iter()
            .map(|row| {
                let Json(meta): Json<HashMap<String, String>> = row.try_get("meta")?;
                let enqueued_at: chrono::DateTime<chrono::Utc> = row.try_get("enqueued_at")?;
                Ok((
                    (enqueued_at, row.try_get::<i64, _>("id")?),
                    QueueEntry {
                        user_id: row.try_get("user_id")?,
                        stake_tier: StakeTier(row.try_get("stake_tier")?),
                        meta,
                        enqueued_at,
                    },
                ))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        entries.sort_by_key(|(order, _)| *order);
        Ok(entries.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn requeue(&self, entries: Vec<QueueEntry>) -> MatchResult<()> {
        // Original join times restore the entries' place at the head
        for entry in entries {
            self.push(entry).await?;
        }
        Ok(())
    }

    async fn len(&self, tier: StakeTier) -> MatchResult<usize> {
        let row = with_default_timeout(
            sqlx::query("SELECT COUNT(*) AS waiting FROM queue_entries WHERE stake_tier = $1")
                .bind(tier.entry_fee())
                .fetch_one(&self.pool),
        )
        .await?;
        Ok(usize::try_from(row.get::<i64, _>("waiting")).unwrap_or_default())
    }

    async fn position(&self, user_id: UserId, tier: StakeTier) -> MatchResult<Option<usize>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT COUNT(*) AS ahead
                FROM queue_entries
                WHERE stake_tier = $1
                  AND (enqueued_at, id) <= (
                      SELECT enqueued_at, id FROM queue_entries
                      WHERE user_id = $2 AND stake_tier = $1
                  )
                "#,
            )
            .bind(tier.entry_fee())
            .bind(user_id)
            .fetch_one(&self.pool),
        )
        .await?;
        let ahead = usize::try_from(row.get::<i64, _>("ahead")).unwrap_or_default();
        Ok((ahead > 0).then_some(ahead))
    }
}
