//! Matchmaking queue settings.

use std::time::Duration;

use crate::controller::config::{millis_or, parse_or};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Wait before zero-stake waiters are grouped with bots (default: 15s)
    pub bot_fill_delay: Duration,

    /// Expiry on the per-tier formation lease (default: 5s)
    pub tier_lock_ttl: Duration,

    /// Attempts at the tier lease before giving up (default: 10)
    pub lock_retry_attempts: u32,

    /// Pause between attempts (default: 50ms)
    pub lock_retry_interval: Duration,

    /// Wait before forming a group again after a launch failed (default: 1s)
    pub formation_retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            bot_fill_delay: Duration::from_secs(15),
            tier_lock_ttl: Duration::from_secs(5),
            lock_retry_attempts: 10,
            lock_retry_interval: Duration::from_millis(50),
            formation_retry_delay: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Read overrides from the environment on top of the defaults.
    ///
    /// - `BOT_FILL_DELAY_MS`
    /// - `QUEUE_LOCK_TTL_MS`
    /// - `QUEUE_LOCK_RETRIES`
    /// - `QUEUE_LOCK_RETRY_INTERVAL_MS`
    /// - `QUEUE_FORMATION_RETRY_MS`
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        let config = Self {
            bot_fill_delay: millis_or("BOT_FILL_DELAY_MS", defaults.bot_fill_delay)?,
            tier_lock_ttl: millis_or("QUEUE_LOCK_TTL_MS", defaults.tier_lock_ttl)?,
            lock_retry_attempts: parse_or("QUEUE_LOCK_RETRIES", defaults.lock_retry_attempts)?,
            lock_retry_interval: millis_or(
                "QUEUE_LOCK_RETRY_INTERVAL_MS",
                defaults.lock_retry_interval,
            )?,
            formation_retry_delay: millis_or(
                "QUEUE_FORMATION_RETRY_MS",
                defaults.formation_retry_delay,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.tier_lock_ttl.is_zero() {
            return Err("Queue lock TTL must be greater than zero".to_string());
        }
        if self.lock_retry_attempts == 0 {
            return Err("Queue lock retries must be at least 1".to_string());
        }
        if self.formation_retry_delay.is_zero() {
            return Err("Formation retry delay must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.bot_fill_delay, Duration::from_secs(15));
        assert_eq!(config.tier_lock_ttl, Duration::from_secs(5));
        assert_eq!(config.formation_retry_delay, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let config = QueueConfig {
            lock_retry_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
