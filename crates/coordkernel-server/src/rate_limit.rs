// coordkernel-server/src/rate_limit.rs
// ============================================================================
// Module: Rate Limiter
// Description: In-process sliding-window counters, per-key and per-IP.
// Purpose: The sixth gate stage (spec.md §4.4).
// Dependencies: coordkernel-config, tokio
// ============================================================================

//! ## Overview
//! Two independent windows. [`RateLimiter::check_key`] tracks one-minute
//! buckets per `(tenant, program, tool-class)`, tier-dependent; the
//! coordination plane only calls it from the gate (control loops bypass it
//! entirely — spec.md §4.4: "advisory for the coordination plane... authoritative
//! on the transport front door"). [`RateLimiter::check_ip`] tracks pre-auth
//! attempts per source IP. Both live in a single process-local map behind a
//! `tokio::sync::Mutex`; [`RateLimiter::sweep`] evicts empty buckets on a
//! timer so the map does not grow unbounded across a long-lived process
//! (spec.md §5: "a background sweep every few minutes evicts empty entries").

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use coordkernel_config::RateLimitConfig;
use coordkernel_config::RateLimitTier;
use tokio::sync::Mutex;

// ============================================================================
// SECTION: Tool Class
// ============================================================================

/// The two rate-limit classes a tool call falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    /// A read-only tool call.
    Read,
    /// A tool call that mutates state.
    Write,
}

/// The tier an authenticated caller's limits are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Free-tier limits.
    Free,
    /// Pro-tier limits.
    Pro,
    /// Internal-tier limits (control loops, first-party tooling).
    Internal,
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy)]
pub enum RateLimitOutcome {
    /// Within the window; the call may proceed.
    Allowed,
    /// The window is exhausted; retry after the given number of seconds.
    Refused {
        /// Seconds the caller should wait before the window has room again.
        retry_after_secs: u64,
    },
}

impl RateLimitOutcome {
    /// `true` for [`Self::Allowed`].
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

// ============================================================================
// SECTION: Bucket
// ============================================================================

/// One sliding one-minute window: a count and the instant the window opened.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_started_at: Instant,
    count: u32,
}

const WINDOW: Duration = Duration::from_secs(60);

impl Bucket {
    fn fresh(now: Instant) -> Self {
        Self {
            window_started_at: now,
            count: 0,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_started_at) >= WINDOW
    }

    fn seconds_until_reset(&self, now: Instant) -> u64 {
        WINDOW.saturating_sub(now.duration_since(self.window_started_at)).as_secs()
    }
}

// ============================================================================
// SECTION: Rate Limiter
// ============================================================================

/// Process-local rate limiter. One instance is shared (behind an `Arc`)
/// across every request-handling task.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    key_buckets: Mutex<HashMap<String, Bucket>>,
    ip_buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Builds a limiter from the configured tier table.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            key_buckets: Mutex::new(HashMap::new()),
            ip_buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Checks and records one call against the per-key window for
    /// `(tenant, program, tool_class)` at `tier`.
    pub async fn check_key(
        &self,
        tenant: &str,
        program: &str,
        tool_class: ToolClass,
        tier: Tier,
    ) -> RateLimitOutcome {
        let tier_limits = self.tier_limits(tier);
        let limit = match tool_class {
            ToolClass::Read => tier_limits.read_rpm,
            ToolClass::Write => tier_limits.write_rpm,
        } + tier_limits.burst;
        let class_label = match tool_class {
            ToolClass::Read => "read",
            ToolClass::Write => "write",
        };
        let bucket_key = format!("{tenant}:{program}:{class_label}");
        let mut buckets = self.key_buckets.lock().await;
        Self::check_bucket(&mut buckets, &bucket_key, limit)
    }

    /// Checks and records one call against the per-IP pre-auth window.
    pub async fn check_ip(&self, ip: &str) -> RateLimitOutcome {
        let limit = self.config.per_ip_rpm;
        let mut buckets = self.ip_buckets.lock().await;
        Self::check_bucket(&mut buckets, ip, limit)
    }

    fn check_bucket(buckets: &mut HashMap<String, Bucket>, key: &str, limit: u32) -> RateLimitOutcome {
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket::fresh(now));
        if bucket.is_expired(now) {
            *bucket = Bucket::fresh(now);
        }
        if bucket.count >= limit {
            return RateLimitOutcome::Refused {
                retry_after_secs: bucket.seconds_until_reset(now),
            };
        }
        bucket.count += 1;
        RateLimitOutcome::Allowed
    }

    fn tier_limits(&self, tier: Tier) -> RateLimitTier {
        match tier {
            Tier::Free => self.config.free,
            Tier::Pro => self.config.pro,
            Tier::Internal => self.config.internal,
        }
    }

    /// Evicts buckets whose window has already expired. Intended to be
    /// called from a fixed-interval background task so the map does not
    /// grow unbounded; per-request checks already self-correct a stale
    /// bucket, so a missed sweep cycle is never a correctness problem.
    pub async fn sweep(&self) {
        let now = Instant::now();
        self.key_buckets.lock().await.retain(|_, bucket| !bucket.is_expired(now));
        self.ip_buckets.lock().await.retain(|_, bucket| !bucket.is_expired(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> RateLimitConfig {
        let mut config = RateLimitConfig::default();
        config.free.read_rpm = 2;
        config.free.write_rpm = 2;
        config.free.burst = 0;
        config.per_ip_rpm = 2;
        config
    }

    #[tokio::test]
    async fn refuses_after_limit_and_allows_again_after_reset() {
        let limiter = RateLimiter::new(tiny_config());
        assert!(limiter.check_key("t", "p", ToolClass::Read, Tier::Free).await.is_allowed());
        assert!(limiter.check_key("t", "p", ToolClass::Read, Tier::Free).await.is_allowed());
        let refused = limiter.check_key("t", "p", ToolClass::Read, Tier::Free).await;
        assert!(!refused.is_allowed());
    }

    #[tokio::test]
    async fn read_and_write_windows_are_independent() {
        let limiter = RateLimiter::new(tiny_config());
        assert!(limiter.check_key("t", "p", ToolClass::Read, Tier::Free).await.is_allowed());
        assert!(limiter.check_key("t", "p", ToolClass::Read, Tier::Free).await.is_allowed());
        assert!(!limiter.check_key("t", "p", ToolClass::Read, Tier::Free).await.is_allowed());
        assert!(limiter.check_key("t", "p", ToolClass::Write, Tier::Free).await.is_allowed());
    }

    #[tokio::test]
    async fn per_ip_window_is_independent_of_per_key_window() {
        let limiter = RateLimiter::new(tiny_config());
        assert!(limiter.check_ip("1.2.3.4").await.is_allowed());
        assert!(limiter.check_ip("1.2.3.4").await.is_allowed());
        assert!(!limiter.check_ip("1.2.3.4").await.is_allowed());
        assert!(limiter.check_key("t", "p", ToolClass::Read, Tier::Free).await.is_allowed());
    }

    #[tokio::test]
    async fn sweep_evicts_nothing_for_a_fresh_bucket() {
        let limiter = RateLimiter::new(tiny_config());
        assert!(limiter.check_ip("1.2.3.4").await.is_allowed());
        limiter.sweep().await;
        assert!(!limiter.check_ip("1.2.3.4").await.is_allowed());
    }
}
