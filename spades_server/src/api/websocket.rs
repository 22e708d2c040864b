//! WebSocket handler for live seat updates.
//!
//! A seat's owner connects to `GET /ws/{match_id}/{seat}` and from then on
//! receives its seat-redacted view after every committed change to the
//! match. Bids and plays can be sent over the same socket.
//!
//! # Connection Flow
//!
//! 1. Identity is checked by the same `x-user-id` layer as the REST API
//! 2. The caller must own the seat; a seat already handed to a bot is refused
//! 3. The connection counts as a reconnect, which cancels a pending grace timer
//! 4. The current view is sent at once, then every broadcast for the seat
//! 5. Closing the socket starts the disconnect grace period
//!
//! # Client Messages
//!
//! ```json
//! {"type": "bid", "value": 3}
//! {"type": "play", "card": {"suit": "SPADES", "rank": "A"}}
//! ```
//!
//! Each command is answered with `{"type": "success", ...}` or
//! `{"type": "error", ...}`; the resulting view arrives as a broadcast.

use axum::{
    extract::{
        Extension, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use spades_engine::game::{Action, Card, MatchId, Seat};

use super::AppState;
use super::error::ApiError;
use super::matches::{action_kind, authorize_action, parse_seat};
use super::middleware::Caller;
use crate::metrics;

/// Commands accepted from the client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Bid { value: u8 },
    Play { card: Card },
}

impl From<ClientMessage> for Action {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::Bid { value } => Action::Bid { value },
            ClientMessage::Play { card } => Action::Play { card },
        }
    }
}

/// Replies to client commands
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerResponse {
    Success { message: String },
    Error { code: String, message: String },
}

impl From<ApiError> for ServerResponse {
    fn from(err: ApiError) -> Self {
        ServerResponse::Error {
            code: err.code().to_string(),
            message: err.client_message(),
        }
    }
}

/// Upgrade to a WebSocket bound to one seat of a match.
///
/// # Response
///
/// - `101 Switching Protocols` on success
/// - `400 Bad Request`: Seat outside 1..=4
/// - `403 Forbidden`: Seat belongs to another player
/// - `404 Not Found`: Unknown match
/// - `409 Conflict`: Seat already taken over by a bot
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((match_id, seat)): Path<(MatchId, u8)>,
) -> Response {
    let seat = match parse_seat(seat) {
        Ok(seat) => seat,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = authorize_action(&state, match_id, seat, caller).await {
        return err.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, match_id, seat, caller))
}

/// Drive an established connection until either side closes it.
///
/// # Arguments
///
/// - `socket`: The WebSocket connection
/// - `state`: Shared application state
/// - `match_id`: Match the socket observes
/// - `seat`: Seat owned by the caller
/// - `caller`: Authenticated user
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    match_id: MatchId,
    seat: Seat,
    caller: Caller,
) {
    let (mut sender, mut receiver) = socket.split();
    info!(
        "WebSocket connected: match={}, {}, user={}",
        match_id, seat, caller.0
    );
    metrics::websocket_connections_total();
    metrics::websocket_connections_active(1.0);

    match state.controller.on_reconnect(match_id, seat).await {
        Ok(true) => {}
        Ok(false) => warn!(
            "{} of match {} was already handed to a bot, observing only",
            seat, match_id
        ),
        Err(e) => warn!("Reconnect bookkeeping failed for match {}: {}", match_id, e),
    }

    // Subscribe before reading the current view so no commit falls in between
    let mut views = state.broadcaster.subscribe(match_id, seat);
    let (response_tx, mut response_rx) = tokio::sync::mpsc::channel::<String>(32);

    let initial = match state.controller.view(match_id, seat).await {
        Ok(view) => serde_json::to_string(&view).ok(),
        Err(e) => {
            error!("Failed to render initial view for match {}: {}", match_id, e);
            None
        }
    };

    let send_task = tokio::spawn(async move {
        if let Some(json) = initial {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
            metrics::websocket_views_sent();
        }

        loop {
            tokio::select! {
                Some(view) = views.recv() => {
                    let json = match serde_json::to_string(&view) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize seat view: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                    metrics::websocket_views_sent();
                }
                Some(response_json) = response_rx.recv() => {
                    if sender.send(Message::Text(response_json.into())).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let response = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        handle_client_message(&state, match_id, seat, caller, client_msg).await
                    }
                    Err(e) => {
                        warn!("Failed to parse client message: {}", e);
                        ServerResponse::Error {
                            code: "invalid_input".to_string(),
                            message: "Invalid message format".to_string(),
                        }
                    }
                };

                if let Ok(json) = serde_json::to_string(&response)
                    && response_tx.send(json).await.is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    metrics::websocket_connections_active(-1.0);

    if let Err(e) = state.controller.on_disconnect(match_id, seat).await {
        warn!(
            "Disconnect bookkeeping failed for {} of match {}: {}",
            seat, match_id, e
        );
    }
    info!(
        "WebSocket disconnected: match={}, {}, user={}",
        match_id, seat, caller.0
    );
}

/// Apply a client command through the turn controller.
async fn handle_client_message(
    state: &AppState,
    match_id: MatchId,
    seat: Seat,
    caller: Caller,
    message: ClientMessage,
) -> ServerResponse {
    let action = Action::from(message);
    if let Err(err) = authorize_action(state, match_id, seat, caller).await {
        return err.into();
    }

    match state.controller.act(match_id, seat, action).await {
        Ok(game) => {
            let kind = action_kind(&action);
            metrics::match_actions_total(kind);
            ServerResponse::Success {
                message: format!("{kind} accepted, match version {}", game.version),
            }
        }
        Err(err) => ApiError::from(err).into(),
    }
}
