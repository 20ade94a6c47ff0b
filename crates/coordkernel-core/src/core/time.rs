// coordkernel-core/src/core/time.rs
// ============================================================================
// Module: Coordination Kernel Time Model
// Description: Canonical timestamp representation for entities and TTLs.
// Purpose: Provide a single wall-clock timestamp type shared by every module.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every persisted entity carries `Timestamp` values produced either by a
//! caller-supplied clock or by the store adapter's server-timestamp write
//! path. The type wraps Unix milliseconds so arithmetic for TTL and
//! heartbeat-timeout comparisons stays in one place.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ops::Add;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// A point in time expressed as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Builds a timestamp from raw Unix milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the number of whole seconds elapsed between `self` and `later`.
    ///
    /// Negative when `later` precedes `self`.
    #[must_use]
    pub const fn seconds_until(self, later: Self) -> i64 {
        (later.0 - self.0) / 1000
    }

    /// Returns true when `self` is strictly before `other`.
    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }

    /// Returns a copy of this timestamp advanced by the given duration.
    #[must_use]
    pub fn plus(self, duration: Duration) -> Self {
        #[allow(
            clippy::cast_possible_wrap,
            reason = "durations used for TTL math stay well under i64::MAX millis"
        )]
        let delta = duration.as_millis() as i64;
        Self(self.0.saturating_add(delta))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.plus(rhs)
    }
}

/// Supplies the current wall-clock time. Abstracted so control loops and
/// tests can inject a fixed or stepped clock instead of [`std::time::SystemTime`].
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// [`Clock`] backed by [`std::time::SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        #[allow(
            clippy::cast_possible_wrap,
            reason = "current wall-clock millis fit comfortably in i64 until year 292 billion"
        )]
        Self::now_from_millis(millis as i64)
    }
}

impl SystemClock {
    /// Helper used so the cast stays in one documented spot.
    const fn now_from_millis(millis: i64) -> Timestamp {
        Timestamp::from_unix_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Clock;
    use super::SystemClock;
    use super::Timestamp;

    #[test]
    fn plus_advances_by_duration() {
        let start = Timestamp::from_unix_millis(0);
        let later = start.plus(Duration::from_secs(90));
        assert_eq!(later.as_unix_millis(), 90_000);
        assert_eq!(start.seconds_until(later), 90);
    }

    #[test]
    fn is_before_orders_timestamps() {
        let a = Timestamp::from_unix_millis(10);
        let b = Timestamp::from_unix_millis(20);
        assert!(a.is_before(b));
        assert!(!b.is_before(a));
    }

    #[test]
    fn system_clock_returns_a_sane_timestamp() {
        let now = SystemClock.now();
        assert!(now.as_unix_millis() > 0);
    }
}
