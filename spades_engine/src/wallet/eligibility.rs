//! Queue entry gate backed by the wallet's frozen-account flag.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::db::timeouts::with_default_timeout;
use crate::errors::MatchResult;
use crate::game::UserId;

#[async_trait]
pub trait EligibilityCheck: Send + Sync {
    /// Whether the user's funding account may enter a queue.
    async fn is_eligible(&self, user_id: UserId) -> MatchResult<bool>;
}

/// Reads `wallets.is_frozen`. A user without a wallet is not eligible.
pub struct PgEligibility {
    pool: PgPool,
}

impl PgEligibility {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EligibilityCheck for PgEligibility {
    async fn is_eligible(&self, user_id: UserId) -> MatchResult<bool> {
        let row = with_default_timeout(
            sqlx::query("SELECT is_frozen FROM wallets WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;

        Ok(match row {
            Some(row) => !row.get::<bool, _>("is_frozen"),
            None => false,
        })
    }
}

/// Admits everyone except an explicit set of frozen users.
#[derive(Debug, Default)]
pub struct AllowAll {
    frozen: Mutex<HashSet<UserId>>,
}

impl AllowAll {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn freeze(&self, user_id: UserId) {
        self.frozen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id);
    }
}

#[async_trait]
impl EligibilityCheck for AllowAll {
    async fn is_eligible(&self, user_id: UserId) -> MatchResult<bool> {
        Ok(!self
            .frozen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&user_id))
    }
}
