//! Keyed leases: exclusive, expiring ownership of a named resource.
//!
//! The turn controller takes one lease per match and the matchmaking queue
//! one per stake tier. A lease that is never released (crashed holder)
//! becomes available again once its TTL passes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::db::timeouts::with_default_timeout;
use crate::errors::{MatchError, MatchResult};

/// Proof of lease ownership, required to release it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait KeyedLock: Send + Sync {
    /// Take the lease on `key` if nobody holds an unexpired one.
    ///
    /// # Returns
    ///
    /// * `MatchResult<Option<LeaseToken>>` - `None` when the key is held
    async fn try_acquire(&self, key: &str, ttl: Duration) -> MatchResult<Option<LeaseToken>>;

    /// Give the lease back. Releasing with a stale token is a no-op.
    async fn release(&self, key: &str, token: LeaseToken) -> MatchResult<()>;
}

/// Retry [`KeyedLock::try_acquire`] up to `attempts` times, sleeping
/// `interval` between tries.
pub async fn acquire_with_retry(
    lock: &dyn KeyedLock,
    key: &str,
    ttl: Duration,
    attempts: u32,
    interval: Duration,
) -> MatchResult<Option<LeaseToken>> {
    for attempt in 0..attempts.max(1) {
        if let Some(token) = lock.try_acquire(key, ttl).await? {
            return Ok(Some(token));
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(None)
}

/// Single-process leases behind a mutex.
#[derive(Debug, Default)]
pub struct InMemoryKeyedLock {
    leases: Mutex<HashMap<String, (LeaseToken, Instant)>>,
}

impl InMemoryKeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held by an unexpired lease.
    pub fn is_held(&self, key: &str) -> bool {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }
}

#[async_trait]
impl KeyedLock for InMemoryKeyedLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> MatchResult<Option<LeaseToken>> {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, expires_at)) = leases.get(key)
            && *expires_at > now
        {
            return Ok(None);
        }

        let token = LeaseToken::new();
        leases.insert(key.to_string(), (token, now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: LeaseToken) -> MatchResult<()> {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        if leases.get(key).is_some_and(|(held, _)| *held == token) {
            leases.remove(key);
        }
        Ok(())
    }
}

/// Leases stored as rows of the `leases` table so several processes can
/// share them. Expired rows are taken over in place.
pub struct PgKeyedLock {
    pool: PgPool,
}

impl PgKeyedLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyedLock for PgKeyedLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> MatchResult<Option<LeaseToken>> {
        let token = LeaseToken::new();
        let ttl_ms = i64::try_from(ttl.as_millis())
            .map_err(|_| MatchError::Lock(format!("lease ttl too large: {ttl:?}")))?;

        let result = with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO leases (key, token, expires_at)
                VALUES ($1, $2, NOW() + make_interval(secs => $3::double precision / 1000.0))
                ON CONFLICT (key) DO UPDATE
                SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
                WHERE leases.expires_at <= NOW()
                "#,
            )
            .bind(key)
            .bind(token.0)
            .bind(ttl_ms)
            .execute(&self.pool),
        )
        .await?;

        Ok((result.rows_affected() == 1).then_some(token))
    }

    async fn release(&self, key: &str, token: LeaseToken) -> MatchResult<()> {
        with_default_timeout(
            sqlx::query("DELETE FROM leases WHERE key = $1 AND token = $2")
                .bind(key)
                .bind(token.0)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(5);

    // === In-Memory Lease Tests ===

    #[tokio::test]
    async fn test_second_acquire_fails_while_held() {
        let lock = InMemoryKeyedLock::new();
        let token = lock.try_acquire("match:1", TTL).await.unwrap();
        assert!(token.is_some());
        assert!(lock.try_acquire("match:1", TTL).await.unwrap().is_none());
        assert!(lock.try_acquire("match:2", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_frees_key() {
        let lock = InMemoryKeyedLock::new();
        let token = lock.try_acquire("k", TTL).await.unwrap().unwrap();
        lock.release("k", token).await.unwrap();
        assert!(!lock.is_held("k"));
        assert!(lock.try_acquire("k", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_token_does_not_release() {
        let lock = InMemoryKeyedLock::new();
        let _held = lock.try_acquire("k", TTL).await.unwrap().unwrap();
        lock.release("k", LeaseToken::new()).await.unwrap();
        assert!(lock.is_held("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_can_be_taken_over() {
        let lock = InMemoryKeyedLock::new();
        let first = lock.try_acquire("k", TTL).await.unwrap().unwrap();
        tokio::time::advance(TTL + Duration::from_millis(1)).await;

        let second = lock.try_acquire("k", TTL).await.unwrap().unwrap();
        assert_ne!(first, second);

        // the crashed holder's late release must not free the new lease
        lock.release("k", first).await.unwrap();
        assert!(lock.is_held("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_retry_waits_for_release() {
        let lock = std::sync::Arc::new(InMemoryKeyedLock::new());
        let token = lock.try_acquire("tier", TTL).await.unwrap().unwrap();

        let holder = lock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            holder.release("tier", token).await.unwrap();
        });

        let acquired = acquire_with_retry(
            lock.as_ref(),
            "tier",
            TTL,
            10,
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        assert!(acquired.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_retry_gives_up() {
        let lock = InMemoryKeyedLock::new();
        let _held = lock.try_acquire("tier", TTL).await.unwrap();
        let acquired =
            acquire_with_retry(&lock, "tier", TTL, 3, Duration::from_millis(10)).await.unwrap();
        assert!(acquired.is_none());
    }
}
