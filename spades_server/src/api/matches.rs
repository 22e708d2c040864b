//! Match API handlers: start, seat views, bids and card plays.
//!
//! Every endpoint requires the caller to occupy the seat it names. Actions
//! go through the turn controller, so a request that races another action
//! on the same match gets `423 Locked` and should be retried by the client.
//!
//! # Examples
//!
//! Bid four tricks from seat 2:
//! ```bash
//! curl -X POST http://localhost:6969/api/v1/matches/$MATCH/bid \
//!   -H "x-user-id: 42" \
//!   -H "Content-Type: application/json" \
//!   -d '{"seat": 2, "value": 4}'
//! ```
//!
//! Play the queen of hearts:
//! ```bash
//! curl -X POST http://localhost:6969/api/v1/matches/$MATCH/play \
//!   -H "x-user-id: 42" \
//!   -H "Content-Type: application/json" \
//!   -d '{"seat": 2, "card": {"suit": "HEARTS", "rank": "Q"}}'
//! ```

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};
use serde::Deserialize;
use spades_engine::MatchError;
use spades_engine::broadcast::{SeatView, render};
use spades_engine::game::{Action, Card, Match, MatchId, Seat};

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::middleware::Caller;
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct SeatQuery {
    pub seat: u8,
}

#[derive(Debug, Deserialize)]
pub struct BidRequest {
    pub seat: u8,
    pub value: u8,
}

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    pub seat: u8,
    pub card: Card,
}

pub(crate) fn parse_seat(number: u8) -> ApiResult<Seat> {
    Seat::try_from(number).map_err(|e| ApiError::Match(MatchError::InvalidInput(e)))
}

/// Check that `caller` is the player assigned to `seat`.
pub(crate) fn authorize_seat(game: &Match, seat: Seat, caller: Caller) -> ApiResult<()> {
    let info = game.seat(seat)?;
    if info.user_id != Some(caller.0) {
        return Err(ApiError::Forbidden(format!(
            "{seat} of match {} belongs to another player",
            game.id
        )));
    }
    Ok(())
}

/// Load the match and confirm the caller may act for `seat` right now.
pub(crate) async fn authorize_action(
    state: &AppState,
    match_id: MatchId,
    seat: Seat,
    caller: Caller,
) -> ApiResult<()> {
    let game = state.controller.load(match_id).await?;
    authorize_seat(&game, seat, caller)?;
    if game.is_bot(seat) {
        return Err(MatchError::invalid_state(format!(
            "{seat} has been handed to a bot for the rest of the match"
        ))
        .into());
    }
    Ok(())
}

/// Deal the first hand of a waiting match.
///
/// # Response
///
/// Returns `200 OK` with the caller's seat view.
///
/// # Errors
///
/// - `403 Forbidden`: Caller is not seated in the match
/// - `404 Not Found`: Unknown match
/// - `409 Conflict`: Match already started
pub async fn start_match(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(match_id): Path<MatchId>,
) -> ApiResult<Json<SeatView>> {
    let game = state.controller.load(match_id).await?;
    let seat = game.seat_of_user(caller.0).ok_or_else(|| {
        ApiError::Forbidden(format!("user {} is not seated in match {match_id}", caller.0))
    })?;

    let game = state.controller.start_match(match_id).await?;
    Ok(Json(render(&game, seat)))
}

/// Seat-redacted view of a match: `GET /matches/{id}?seat=N`.
pub async fn get_match(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(match_id): Path<MatchId>,
    Query(query): Query<SeatQuery>,
) -> ApiResult<Json<SeatView>> {
    let seat = parse_seat(query.seat)?;
    let game = state.controller.load(match_id).await?;
    authorize_seat(&game, seat, caller)?;
    Ok(Json(render(&game, seat)))
}

/// Submit a bid for the caller's seat.
///
/// # Errors
///
/// - `400 Bad Request`: Bid outside 0..=13 or malformed seat
/// - `409 Conflict`: Not this seat's turn, or not bidding
/// - `423 Locked`: Another action on this match is in flight
pub async fn submit_bid(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(match_id): Path<MatchId>,
    Json(request): Json<BidRequest>,
) -> ApiResult<Json<SeatView>> {
    let seat = parse_seat(request.seat)?;
    act(&state, caller, match_id, seat, Action::Bid { value: request.value }).await
}

/// Play a card from the caller's seat.
///
/// # Errors
///
/// - `400 Bad Request`: Card not in hand, spades not broken, or failing to follow suit
/// - `409 Conflict`: Not this seat's turn, or not playing
/// - `423 Locked`: Another action on this match is in flight
pub async fn play_card(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(match_id): Path<MatchId>,
    Json(request): Json<PlayRequest>,
) -> ApiResult<Json<SeatView>> {
    let seat = parse_seat(request.seat)?;
    act(&state, caller, match_id, seat, Action::Play { card: request.card }).await
}

async fn act(
    state: &AppState,
    caller: Caller,
    match_id: MatchId,
    seat: Seat,
    action: Action,
) -> ApiResult<Json<SeatView>> {
    authorize_action(state, match_id, seat, caller).await?;
    let game = state.controller.act(match_id, seat, action).await?;
    metrics::match_actions_total(action_kind(&action));
    Ok(Json(render(&game, seat)))
}

pub(crate) fn action_kind(action: &Action) -> &'static str {
    match action {
        Action::Bid { .. } => "bid",
        Action::Play { .. } => "play",
    }
}
