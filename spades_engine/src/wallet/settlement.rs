//! Payout hook invoked once a match has a winner.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::{Mutex, PoisonError};

use crate::db::timeouts::with_default_timeout;
use crate::errors::MatchResult;
use crate::game::{MatchId, Team};

/// Settles a finished match with the external wallet ledger.
///
/// Called by the turn controller exactly once per match, after the win
/// condition is met. Implementations should still treat a repeated call for
/// the same match as a no-op.
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn settle_match(&self, match_id: MatchId, winning_team: Team) -> MatchResult<()>;
}

/// Records settlements in `match_settlements`, keyed by match id.
pub struct PgSettlement {
    pool: PgPool,
}

impl PgSettlement {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Settlement for PgSettlement {
    async fn settle_match(&self, match_id: MatchId, winning_team: Team) -> MatchResult<()> {
        let result = with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO match_settlements (match_id, winning_team, settled_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (match_id) DO NOTHING
                "#,
            )
            .bind(match_id)
            .bind(winning_team.to_string())
            .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            log::warn!("Match {} was already settled", match_id);
        } else {
            log::info!("Settled match {} for team {}", match_id, winning_team);
        }
        Ok(())
    }
}

/// Settlement that only logs; used when no ledger is configured.
#[derive(Debug, Default)]
pub struct NoopSettlement;

#[async_trait]
impl Settlement for NoopSettlement {
    async fn settle_match(&self, match_id: MatchId, winning_team: Team) -> MatchResult<()> {
        log::info!(
            "Match {} won by team {} (no settlement backend)",
            match_id,
            winning_team
        );
        Ok(())
    }
}

/// Keeps every settlement call in memory so callers can assert on them.
#[derive(Debug, Default)]
pub struct RecordingSettlement {
    calls: Mutex<Vec<(MatchId, Team)>>,
}

impl RecordingSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(MatchId, Team)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_for(&self, match_id: MatchId) -> usize {
        self.calls()
            .iter()
            .filter(|(id, _)| *id == match_id)
            .count()
    }
}

#[async_trait]
impl Settlement for RecordingSettlement {
    async fn settle_match(&self, match_id: MatchId, winning_team: Team) -> MatchResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((match_id, winning_team));
        Ok(())
    }
}
