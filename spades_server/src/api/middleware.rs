//! Request middleware: caller identity and request tracing.
//!
//! Sessions are terminated upstream; the session layer forwards the
//! authenticated user in the `x-user-id` header. Handlers behind
//! [`identity_middleware`] read it back with:
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use spades_server::api::middleware::Caller;
//!
//! async fn protected_handler(Extension(caller): Extension<Caller>) -> String {
//!     format!("Acting as user {}", caller.0)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{MatchedPath, Request},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use spades_engine::game::UserId;
use std::time::Instant;
use uuid::Uuid;

use super::error::ApiError;
use crate::{logging, metrics};

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Authenticated caller of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

/// Rejects requests without a numeric `x-user-id` and injects [`Caller`].
///
/// # Behavior
///
/// - **Valid header**: Injects `Caller` into request extensions, calls next handler
/// - **Missing or non-numeric header**: Returns `401 Unauthorized`
pub async fn identity_middleware(mut request: Request, next: Next) -> Response {
    let caller = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<UserId>().ok());

    match caller {
        Some(user_id) => {
            request.extensions_mut().insert(Caller(user_id));
            next.run(request).await
        }
        None => ApiError::Unauthenticated.into_response(),
    }
}

/// Tags each request with an id, then logs and counts the response.
///
/// An incoming `x-request-id` is kept, otherwise a fresh UUID is used; either
/// way it is echoed on the response.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let user_id = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = start.elapsed();

    let status = response.status().as_u16();
    logging::log_api_request(
        &request_id,
        &method,
        &route,
        status,
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        user_id,
    );
    metrics::http_requests_total(&method, &route, status);
    metrics::http_request_duration_ms(&method, &route, elapsed.as_secs_f64() * 1000.0);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
