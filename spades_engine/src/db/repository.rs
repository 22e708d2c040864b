//! Match persistence.
//!
//! The whole `Match` record is read and written as one blob. Saves must carry
//! a strictly greater `version` than the stored copy, which turns a lost
//! update into a `Conflict` instead of silent overwrite.

use async_trait::async_trait;
use sqlx::{PgPool, Row, types::Json};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::timeouts::with_default_timeout;
use crate::errors::{MatchError, MatchResult};
use crate::game::{Match, MatchId, MatchStatus};

#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Load a match, or `NotFound`.
    async fn load_match(&self, id: MatchId) -> MatchResult<Match>;

    /// Insert or replace a match. `Conflict` unless `version` increased.
    async fn save_match(&self, game: &Match) -> MatchResult<()>;

    /// Matches still in `ACTIVE` status, for restart recovery.
    async fn list_active(&self) -> MatchResult<Vec<Match>>;

    /// Completed matches whose settlement has not gone through.
    async fn list_unsettled(&self) -> MatchResult<Vec<Match>>;
}

fn decode_rows(rows: Vec<sqlx::postgres::PgRow>) -> MatchResult<Vec<Match>> {
    rows.into_iter()
        .map(|row| {
            let Json(game): Json<Match> = row.try_get("state")?;
            Ok(game)
        })
        .collect()
}

/// PostgreSQL store keeping the match as JSONB in `matches.state`.
pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_label(status: MatchStatus) -> MatchResult<String> {
    Ok(serde_json::to_value(status)?
        .as_str()
        .unwrap_or_default()
        .to_string())
}

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn load_match(&self, id: MatchId) -> MatchResult<Match> {
        let row = with_default_timeout(
            sqlx::query("SELECT state FROM matches WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?
        .ok_or_else(|| MatchError::NotFound(format!("match {id}")))?;

        let Json(game): Json<Match> = row.try_get("state")?;
        Ok(game)
    }

    async fn save_match(&self, game: &Match) -> MatchResult<()> {
        let version = i64::try_from(game.version)
            .map_err(|_| MatchError::invalid_state("version overflow"))?;

        let result = with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO matches (id, stake_tier, status, version, state, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE
                SET status = EXCLUDED.status,
                    version = EXCLUDED.version,
                    state = EXCLUDED.state,
                    updated_at = EXCLUDED.updated_at
                WHERE matches.version < EXCLUDED.version
                "#,
            )
            .bind(game.id)
            .bind(game.stake_tier.entry_fee())
            .bind(status_label(game.status)?)
            .bind(version)
            .bind(Json(game))
            .bind(game.created_at)
            .bind(game.updated_at)
            .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(MatchError::Conflict(game.id.to_string()));
        }
        Ok(())
    }

    async fn list_active(&self) -> MatchResult<Vec<Match>> {
        let rows = with_default_timeout(
            sqlx::query("SELECT state FROM matches WHERE status = 'ACTIVE' ORDER BY created_at")
                .fetch_all(&self.pool),
        )
        .await?;
        decode_rows(rows)
    }

    async fn list_unsettled(&self) -> MatchResult<Vec<Match>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT state FROM matches
                WHERE status = 'COMPLETED'
                  AND NOT (state->>'settled')::BOOLEAN
                ORDER BY updated_at
                "#,
            )
            .fetch_all(&self.pool),
        )
        .await?;
        decode_rows(rows)
    }
}

/// Process-local store for tests and single-node runs without a database.
#[derive(Debug, Default)]
pub struct InMemoryMatchStore {
    matches: Mutex<HashMap<MatchId, Match>>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.matches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn load_match(&self, id: MatchId) -> MatchResult<Match> {
        self.matches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| MatchError::NotFound(format!("match {id}")))
    }

    async fn save_match(&self, game: &Match) -> MatchResult<()> {
        let mut matches = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stored) = matches.get(&game.id)
            && stored.version >= game.version
        {
            return Err(MatchError::Conflict(game.id.to_string()));
        }
        matches.insert(game.id, game.clone());
        Ok(())
    }

    async fn list_active(&self) -> MatchResult<Vec<Match>> {
        let mut active: Vec<Match> = self
            .matches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|m| m.status == MatchStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|m| m.created_at);
        Ok(active)
    }

    async fn list_unsettled(&self) -> MatchResult<Vec<Match>> {
        let mut unsettled: Vec<Match> = self
            .matches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|m| m.status == MatchStatus::Completed && !m.settled)
            .cloned()
            .collect();
        unsettled.sort_by_key(|m| m.updated_at);
        Ok(unsettled)
    }
}
