//! Engine error types.

use thiserror::Error;

/// Errors surfaced by the match engine, controller and matchmaking queue.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Match, seat or queue entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Action is illegal for the current phase, status or turn
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed bid or card, or a card that breaks a play rule
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Another action holds the match (or tier) lock; retry later
    #[error("Another action is already in progress")]
    ActionInProgress,

    /// Funding account is frozen
    #[error("Account is not eligible to join the queue")]
    AccountIneligible,

    /// Stored record is newer than the one being saved
    #[error("Conflicting update for match {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Match state could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Lease backend failure
    #[error("Lock error: {0}")]
    Lock(String),

    /// Database call exceeded its deadline
    #[error("Database operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl MatchError {
    /// Get a client-safe error message that doesn't leak internals
    pub fn client_message(&self) -> String {
        match self {
            MatchError::Database(_)
            | MatchError::Serialization(_)
            | MatchError::Lock(_)
            | MatchError::Timeout(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::NotFound(_) => "not_found",
            MatchError::InvalidState(_) => "invalid_state",
            MatchError::InvalidInput(_) => "invalid_input",
            MatchError::ActionInProgress => "action_in_progress",
            MatchError::AccountIneligible => "account_ineligible",
            MatchError::Conflict(_) => "conflict",
            MatchError::Database(_)
            | MatchError::Serialization(_)
            | MatchError::Lock(_)
            | MatchError::Timeout(_) => "internal",
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        MatchError::InvalidState(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        MatchError::InvalidInput(msg.into())
    }
}

impl From<crate::db::TimeoutError> for MatchError {
    fn from(err: crate::db::TimeoutError) -> Self {
        match err {
            crate::db::TimeoutError::Timeout(duration) => MatchError::Timeout(duration),
            crate::db::TimeoutError::Database(e) => MatchError::Database(e),
        }
    }
}

/// Result type for engine operations
pub type MatchResult<T> = Result<T, MatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_hides_internals() {
        let err = MatchError::Lock("redis exploded at 10.0.0.3".to_string());
        assert_eq!(err.client_message(), "Internal server error");
        assert_eq!(err.code(), "internal");
    }

    #[test]
    fn test_client_message_keeps_domain_errors() {
        let err = MatchError::invalid_state("not your turn");
        assert_eq!(err.client_message(), "Invalid state: not your turn");
        assert_eq!(err.code(), "invalid_state");
        assert_eq!(MatchError::ActionInProgress.code(), "action_in_progress");
    }
}
