//! Wallet-facing data models.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Entry fee bracket used to group queue entries, in minor currency units.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct StakeTier(pub i64);

impl StakeTier {
    /// The zero-stake tier; the only tier that backfills with bots.
    pub const FREE: StakeTier = StakeTier(0);

    pub fn entry_fee(self) -> i64 {
        self.0
    }

    pub fn is_free(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StakeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StakeTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fee: i64 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid stake tier: {s}"))?;
        if fee < 0 {
            return Err(format!("stake tier cannot be negative: {fee}"));
        }
        Ok(StakeTier(fee))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stake_tier() {
        assert_eq!("0".parse::<StakeTier>().unwrap(), StakeTier::FREE);
        assert_eq!(" 500 ".parse::<StakeTier>().unwrap(), StakeTier(500));
        assert!("-5".parse::<StakeTier>().is_err());
        assert!("five".parse::<StakeTier>().is_err());
    }

    #[test]
    fn test_free_tier() {
        assert!(StakeTier::FREE.is_free());
        assert!(!StakeTier(100).is_free());
        assert_eq!(serde_json::to_string(&StakeTier(100)).unwrap(), "100");
    }
}
