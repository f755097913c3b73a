//! Timestamp type and the injectable clock.
//!
//! Timestamps are Unix epoch milliseconds (UTC). Block timestamps reported by
//! the chain are seconds and are converted with [`Timestamp::from_secs`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A Unix timestamp in milliseconds since epoch (UTC).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    /// Get the current system time as a `Timestamp`.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000
    }

    /// Time elapsed between this timestamp and `now` (zero if `now` is earlier).
    pub fn elapsed_since(&self, now: Timestamp) -> Duration {
        Duration::from_millis(now.0.saturating_sub(self.0))
    }

    /// Whether more than `lifetime` has passed since this timestamp, relative to `now`.
    ///
    /// A timestamp exactly `lifetime` old is still alive.
    pub fn has_expired(&self, lifetime: Duration, now: Timestamp) -> bool {
        now.0 > self.0.saturating_add(lifetime.as_millis() as u64)
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_millis() as u64))
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of the current time. Injected everywhere expiry or recency matters.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_secs_scales_to_millis() {
        assert_eq!(Timestamp::from_secs(3).as_millis(), 3_000);
        assert_eq!(Timestamp::from_millis(4_999).as_secs(), 4);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let seen = Timestamp::from_millis(1_000);
        let lifetime = Duration::from_millis(500);
        assert!(!seen.has_expired(lifetime, Timestamp::from_millis(1_500)));
        assert!(seen.has_expired(lifetime, Timestamp::from_millis(1_501)));
    }

    #[test]
    fn elapsed_saturates_for_future_timestamps() {
        let later = Timestamp::from_millis(10);
        assert_eq!(later.elapsed_since(Timestamp::EPOCH), Duration::ZERO);
    }
}
