//! HTTP/WebSocket API for the Spades server.
//!
//! # Modules
//!
//! - [`matches`]: start a match, read a seat view, bid, play
//! - [`queue`]: join and leave stake-tier queues, fetch assignments
//! - [`websocket`]: live seat views and in-band actions
//! - [`middleware`]: caller identity and request tracing
//! - [`error`]: engine errors mapped to HTTP statuses
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                             - Health check (public)
//! POST /api/v1/matches/{id}/start          - Deal the first hand
//! GET  /api/v1/matches/{id}?seat=N         - Seat view
//! POST /api/v1/matches/{id}/bid            - Bid {seat, value}
//! POST /api/v1/matches/{id}/play           - Play {seat, card}
//! POST /api/v1/queue/join                  - Join {stake_tier}
//! POST /api/v1/queue/leave                 - Leave {stake_tier?}
//! GET  /api/v1/queue/assignment            - Latest match assignment
//! POST /api/v1/queue/{tier}/fill           - Bot-fill the zero-stake tier now
//! GET  /ws/{match_id}/{seat}               - WebSocket seat feed
//! ```
//!
//! Everything except `/health` requires the `x-user-id` header.
//!
//! # CORS
//!
//! CORS is configured permissively for development. In production, configure
//! appropriate origins, methods, and headers.

pub mod error;
pub mod matches;
pub mod middleware;
pub mod queue;
pub mod websocket;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use spades_engine::broadcast::{Broadcaster, ChannelBroadcaster};
use spades_engine::controller::{
    InMemoryKeyedLock, KeyedLock, KeyedScheduler, PgKeyedLock, TokioScheduler, TurnController,
};
use spades_engine::db::{Database, InMemoryMatchStore, MatchStore, PgMatchStore};
use spades_engine::matchmaking::{InMemoryQueueStore, MatchmakingQueue, PgQueueStore, QueueStore};
use spades_engine::wallet::{
    AllowAll, EligibilityCheck, NoopSettlement, PgEligibility, PgSettlement, Settlement,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use queue::Assignments;

/// Storage and wallet capabilities the engine runs on.
///
/// Swap individual fields to substitute test doubles.
pub struct Capabilities {
    pub matches: Arc<dyn MatchStore>,
    pub locks: Arc<dyn KeyedLock>,
    pub queue_store: Arc<dyn QueueStore>,
    pub eligibility: Arc<dyn EligibilityCheck>,
    pub settlement: Arc<dyn Settlement>,
}

impl Capabilities {
    /// Process-local stores; every account is eligible and payouts are dropped.
    pub fn in_memory() -> Self {
        Self {
            matches: Arc::new(InMemoryMatchStore::new()),
            locks: Arc::new(InMemoryKeyedLock::new()),
            queue_store: Arc::new(InMemoryQueueStore::new()),
            eligibility: Arc::new(AllowAll::new()),
            settlement: Arc::new(NoopSettlement),
        }
    }

    /// Everything backed by the shared Postgres pool.
    pub fn postgres(database: &Database) -> Self {
        let pool = database.pool().clone();
        Self {
            matches: Arc::new(PgMatchStore::new(pool.clone())),
            locks: Arc::new(PgKeyedLock::new(pool.clone())),
            queue_store: Arc::new(PgQueueStore::new(pool.clone())),
            eligibility: Arc::new(PgEligibility::new(pool.clone())),
            settlement: Arc::new(PgSettlement::new(pool)),
        }
    }
}

/// Application state shared across all HTTP handlers and WebSocket connections.
///
/// Cloned for each request; every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<TurnController>,
    pub queue: Arc<MatchmakingQueue>,
    pub broadcaster: Arc<ChannelBroadcaster>,
    pub assignments: Arc<Assignments>,
    /// Present with the Postgres backend; probed by `/health`
    pub database: Option<Database>,
}

impl AppState {
    /// Wire the controller and queue over the given capabilities.
    ///
    /// # Arguments
    ///
    /// * `config` - Server configuration (controller, queue, broadcast buffer)
    /// * `capabilities` - Stores, leases and wallet boundaries
    /// * `database` - Pool to health-check, if any
    pub fn new(
        config: &ServerConfig,
        capabilities: Capabilities,
        database: Option<Database>,
    ) -> Self {
        let scheduler: Arc<dyn KeyedScheduler> = Arc::new(TokioScheduler::new());
        let broadcaster = Arc::new(ChannelBroadcaster::new(config.broadcast_buffer));

        let controller = TurnController::new(
            config.controller.clone(),
            capabilities.matches,
            Arc::clone(&capabilities.locks),
            Arc::clone(&scheduler),
            Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
            capabilities.settlement,
        );
        let queue = MatchmakingQueue::new(
            config.queue.clone(),
            capabilities.queue_store,
            capabilities.locks,
            scheduler,
            capabilities.eligibility,
            Arc::clone(&controller),
        );

        Self {
            controller,
            queue,
            broadcaster,
            assignments: Arc::new(Assignments::default()),
            database,
        }
    }

    pub fn in_memory(config: &ServerConfig) -> Self {
        Self::new(config, Capabilities::in_memory(), None)
    }

    pub fn postgres(config: &ServerConfig, database: Database) -> Self {
        let capabilities = Capabilities::postgres(&database);
        Self::new(config, capabilities, Some(database))
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use spades_server::api::{create_router, AppState};
/// # use spades_server::config::ServerConfig;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let state = AppState::in_memory(&ServerConfig::default());
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:6969").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router();

    // Not versioned; the socket checks identity with the same layer
    let ws_routes = Router::new()
        .route("/ws/{match_id}/{seat}", get(websocket::websocket_handler))
        .layer(axum::middleware::from_fn(middleware::identity_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(ws_routes)
        .nest("/api/v1", v1_routes)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn(middleware::request_id_middleware)),
        )
        .with_state(state)
}

fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/matches/{match_id}", get(matches::get_match))
        .route("/matches/{match_id}/start", post(matches::start_match))
        .route("/matches/{match_id}/bid", post(matches::submit_bid))
        .route("/matches/{match_id}/play", post(matches::play_card))
        .route("/queue/join", post(queue::join_queue))
        .route("/queue/leave", post(queue::leave_queue))
        .route("/queue/assignment", get(queue::get_assignment))
        .route("/queue/{tier}/fill", post(queue::force_fill))
        .layer(axum::middleware::from_fn(middleware::identity_middleware))
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK`, or `503 Service Unavailable` when the configured
/// database does not answer.
///
/// # Example
///
/// ```bash
/// curl http://localhost:6969/health
/// # {"status":"healthy","version":"0.1.0","database":true,"timestamp":"2026-10-19T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.database {
        Some(db) => Some(db.health_check().await.is_ok()),
        None => None,
    };
    let healthy = database.unwrap_or(true);

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
