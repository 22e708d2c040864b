//! Matchmaking API handlers.
//!
//! Joining returns immediately with either a queue position or, when the
//! join completed a group, the seat assignment. Players still waiting learn
//! about their match through `GET /queue/assignment`, which is filled in by
//! the queue's match notification.

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use spades_engine::MatchError;
use spades_engine::game::UserId;
use spades_engine::matchmaking::{JoinOutcome, MatchAssignment, OnMatched};
use spades_engine::wallet::StakeTier;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::AppState;
use super::error::ApiResult;
use super::middleware::Caller;
use crate::metrics;

/// Latest match assignment per user, written by queue notifications.
#[derive(Debug, Default)]
pub struct Assignments {
    by_user: Mutex<HashMap<UserId, MatchAssignment>>,
}

impl Assignments {
    pub fn record(&self, assignment: MatchAssignment) {
        self.by_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(assignment.user_id, assignment);
    }

    pub fn get(&self, user_id: UserId) -> Option<MatchAssignment> {
        self.by_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .copied()
    }

    pub fn clear(&self, user_id: UserId) {
        self.by_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }

    /// Queue notification hook that records into `assignments`.
    pub fn notifier(assignments: &Arc<Self>) -> OnMatched {
        let assignments = Arc::clone(assignments);
        Arc::new(move |assignment: MatchAssignment| {
            tracing::info!(
                user_id = assignment.user_id,
                match_id = %assignment.match_id,
                seat = assignment.seat.number(),
                "Player matched"
            );
            metrics::players_matched_total(&assignment.stake_tier.to_string());
            assignments.record(assignment);
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct JoinQueueRequest {
    pub stake_tier: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaveQueueRequest {
    /// Leave every tier when absent
    pub stake_tier: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveQueueResponse {
    pub removed: bool,
}

fn parse_tier(fee: i64) -> ApiResult<StakeTier> {
    fee.to_string()
        .parse()
        .map_err(|e: String| MatchError::InvalidInput(e).into())
}

/// Client details kept with the queue entry.
fn client_meta(headers: &HeaderMap) -> HashMap<String, String> {
    ["user-agent", "x-forwarded-for"]
        .into_iter()
        .filter_map(|name| {
            let value = headers.get(name)?.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Join the queue for a stake tier.
///
/// # Response
///
/// Returns `200 OK` with `{"status": "queued", "position": N}` or
/// `{"status": "matched", "match_id": ..., "seat": N, ...}`.
///
/// # Errors
///
/// - `400 Bad Request`: Negative stake tier
/// - `403 Forbidden`: Frozen account
/// - `409 Conflict`: Already queued
pub async fn join_queue(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    Json(request): Json<JoinQueueRequest>,
) -> ApiResult<Json<JoinOutcome>> {
    let stake_tier = parse_tier(request.stake_tier)?;
    state.assignments.clear(caller.0);

    let outcome = state
        .queue
        .join_queue(
            caller.0,
            stake_tier,
            Assignments::notifier(&state.assignments),
            client_meta(&headers),
        )
        .await?;
    Ok(Json(outcome))
}

/// Leave one tier, or all tiers when no `stake_tier` is given. Idempotent.
pub async fn leave_queue(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Option<Json<LeaveQueueRequest>>,
) -> ApiResult<Json<LeaveQueueResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let stake_tier = request.stake_tier.map(parse_tier).transpose()?;
    let removed = state.queue.leave_queue(caller.0, stake_tier).await?;
    Ok(Json(LeaveQueueResponse { removed }))
}

/// The caller's most recent match assignment.
///
/// # Errors
///
/// - `404 Not Found`: No match formed for the caller since their last join
pub async fn get_assignment(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<MatchAssignment>> {
    let assignment = state
        .assignments
        .get(caller.0)
        .ok_or_else(|| MatchError::NotFound(format!("assignment for user {}", caller.0)))?;
    Ok(Json(assignment))
}

/// Seat the zero-stake tier's waiters now, with bots in the empty seats.
///
/// # Errors
///
/// - `409 Conflict`: The tier is not the zero-stake tier
pub async fn force_fill(
    State(state): State<AppState>,
    Path(tier): Path<String>,
) -> ApiResult<Json<Vec<MatchAssignment>>> {
    let stake_tier: StakeTier = tier
        .parse()
        .map_err(|e: String| MatchError::InvalidInput(e))?;
    let assignments = state.queue.force_fill(stake_tier).await?;
    Ok(Json(assignments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spades_engine::game::Seat;

    #[test]
    fn test_parse_tier_rejects_negative() {
        assert_eq!(parse_tier(250).unwrap(), StakeTier(250));
        assert!(parse_tier(-1).is_err());
    }

    #[test]
    fn test_notifier_records_assignment() {
        let assignments = Arc::new(Assignments::default());
        let notify = Assignments::notifier(&assignments);
        let assignment = MatchAssignment {
            match_id: uuid::Uuid::new_v4(),
            user_id: 5,
            seat: Seat::ALL[2],
            stake_tier: StakeTier::FREE,
        };

        notify(assignment);
        assert_eq!(assignments.get(5), Some(assignment));
        assignments.clear(5);
        assert_eq!(assignments.get(5), None);
    }

    #[test]
    fn test_client_meta_picks_known_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "cards/1.0".parse().unwrap());
        headers.insert("x-other", "ignored".parse().unwrap());

        let meta = client_meta(&headers);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["user-agent"], "cards/1.0");
    }
}
