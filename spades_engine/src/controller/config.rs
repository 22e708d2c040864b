//! Turn controller settings.

use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::game::constants::{MAX_BID, MIN_BID};

/// Timing and automated-play settings for the turn controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Time a seat has to act before a default action is forced (default: 8s)
    pub turn_timeout: Duration,

    /// Time a disconnected human keeps the seat before a bot takes over (default: 30s)
    pub disconnect_grace: Duration,

    /// Bid forced when a seat times out during bidding (default: 1)
    pub timeout_bid: u8,

    /// Range bots draw their bids from (default: 1..=5)
    pub bot_bid_range: RangeInclusive<u8>,

    /// Pause before a bot acts (default: none)
    pub bot_move_delay: Duration,

    /// Expiry on the per-match action lease (default: 10s)
    pub lock_ttl: Duration,

    /// Attempts at the match lease for bookkeeping updates such as disconnects
    pub lock_retry_attempts: u32,

    /// Pause between those attempts
    pub lock_retry_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(8),
            disconnect_grace: Duration::from_secs(30),
            timeout_bid: 1,
            bot_bid_range: 1..=5,
            bot_move_delay: Duration::ZERO,
            lock_ttl: Duration::from_secs(10),
            lock_retry_attempts: 20,
            lock_retry_interval: Duration::from_millis(50),
        }
    }
}

impl ControllerConfig {
    /// Read overrides from the environment on top of the defaults.
    ///
    /// - `TURN_TIMEOUT_MS`
    /// - `DISCONNECT_GRACE_MS`
    /// - `TIMEOUT_BID`
    /// - `BOT_MIN_BID` / `BOT_MAX_BID`
    /// - `BOT_MOVE_DELAY_MS`
    /// - `MATCH_LOCK_TTL_MS`
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        let config = Self {
            turn_timeout: millis_or("TURN_TIMEOUT_MS", defaults.turn_timeout)?,
            disconnect_grace: millis_or("DISCONNECT_GRACE_MS", defaults.disconnect_grace)?,
            timeout_bid: parse_or("TIMEOUT_BID", defaults.timeout_bid)?,
            bot_bid_range: parse_or("BOT_MIN_BID", *defaults.bot_bid_range.start())?
                ..=parse_or("BOT_MAX_BID", *defaults.bot_bid_range.end())?,
            bot_move_delay: millis_or("BOT_MOVE_DELAY_MS", defaults.bot_move_delay)?,
            lock_ttl: millis_or("MATCH_LOCK_TTL_MS", defaults.lock_ttl)?,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.turn_timeout.is_zero() {
            return Err("Turn timeout must be greater than zero".to_string());
        }

        if !(MIN_BID..=MAX_BID).contains(&self.timeout_bid) {
            return Err(format!(
                "Timeout bid must be between {MIN_BID} and {MAX_BID}"
            ));
        }

        if self.bot_bid_range.is_empty() || *self.bot_bid_range.end() > MAX_BID {
            return Err(format!(
                "Bot bid range must be non-empty and within {MIN_BID}..={MAX_BID}"
            ));
        }

        if self.lock_ttl.is_zero() {
            return Err("Lock TTL must be greater than zero".to_string());
        }

        Ok(())
    }
}

pub(crate) fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| format!("{key} has an invalid value: {value}")),
        Err(_) => Ok(default),
    }
}

pub(crate) fn millis_or(key: &str, default: Duration) -> Result<Duration, String> {
    let millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(key, millis).map(Duration::from_millis)
}
