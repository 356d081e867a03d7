//! Snowflake ids and guild → shard routing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds between the Unix epoch and the platform epoch snowflake
/// timestamps are offset from.
const EPOCH_MS: u64 = 1_420_070_400_000;

/// A platform snowflake id. The high 42 bits embed the creation timestamp;
/// the low 22 bits (worker/process/increment) are irrelevant to routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snowflake(pub u64);

impl Snowflake {
    /// Creation time encoded in the id, as milliseconds since the Unix epoch.
    pub fn timestamp_ms(self) -> u64 {
        (self.0 >> 22) + EPOCH_MS
    }

    pub fn created_at(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms() as i64)
            .single()
            .unwrap_or_default()
    }

    /// Which shard owns a guild: `(id >> 22) % shard_count`.
    ///
    /// Pure in both arguments — callers must re-derive whenever the shard
    /// count changes (re-sharding); for a fixed count the mapping is stable
    /// for the process lifetime.
    pub fn shard_index(self, shard_count: u32) -> u32 {
        debug_assert!(shard_count > 0);
        ((self.0 >> 22) % u64::from(shard_count)) as u32
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(v: u64) -> Self {
        Snowflake(v)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Snowflake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_deterministic() {
        let guild = Snowflake(175_928_847_299_117_063);
        let a = guild.shard_index(8);
        let b = guild.shard_index(8);
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn routing_ignores_low_bits() {
        // Two ids differing only in the low 22 bits route identically.
        let base = 175_928_847_299_117_063u64 & !0x3F_FFFF;
        assert_eq!(
            Snowflake(base).shard_index(16),
            Snowflake(base | 0x3F_FFFF).shard_index(16)
        );
    }

    #[test]
    fn routing_changes_with_shard_count() {
        // Not a guarantee for every id, but this one demonstrates that the
        // mapping must be recomputed after re-sharding.
        let guild = Snowflake(175_928_847_299_117_063);
        assert_ne!(guild.shard_index(7), guild.shard_index(8));
    }

    #[test]
    fn timestamp_extraction() {
        let id = Snowflake(175_928_847_299_117_063);
        // Known id from the protocol docs: 2016-04-30T11:18:25.796Z.
        assert_eq!(id.timestamp_ms(), 1_462_015_105_796);
    }

    #[test]
    fn parse_and_display() {
        let id: Snowflake = "80351110224678912".parse().unwrap();
        assert_eq!(id.to_string(), "80351110224678912");
    }
}
