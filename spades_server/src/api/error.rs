//! Mapping of engine errors onto HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use spades_engine::MatchError;

use crate::metrics;

/// Body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Failure of an API request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Match(#[from] MatchError),

    /// Missing or malformed `x-user-id`
    #[error("Missing or invalid caller identity")]
    Unauthenticated,

    /// Caller does not occupy the seat it is acting for
    #[error("{0}")]
    Forbidden(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Match(err) => match err {
                MatchError::NotFound(_) => StatusCode::NOT_FOUND,
                MatchError::InvalidState(_) => StatusCode::CONFLICT,
                MatchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                MatchError::ActionInProgress => StatusCode::LOCKED,
                MatchError::AccountIneligible => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Match(err) => err.code(),
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::Forbidden(_) => "forbidden",
        }
    }

    /// Message safe to show to clients
    pub fn client_message(&self) -> String {
        match self {
            ApiError::Match(err) => err.client_message(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Request failed: {}", self);
        }
        metrics::api_errors_total(self.code());

        let body = ErrorResponse {
            error: self.client_message(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
