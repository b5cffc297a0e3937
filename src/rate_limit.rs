//! Sliding-Window Rate Limiting
//!
//! Keyed admission control for API calls: each identity (user, API key,
//! tenant) gets at most `max_calls` admitted calls per rolling `window`.
//! Timestamps outside the window are evicted lazily on the next check for
//! that identity.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for a sliding-window limiter
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Maximum admitted calls per window
    pub max_calls: usize,
    /// Rolling window duration
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create a new rate limit config
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self { max_calls, window }
    }

    /// Per-second limit
    pub fn per_second(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(1))
    }

    /// Per-minute limit
    pub fn per_minute(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(60))
    }

    // === LLM Provider Presets ===

    /// OpenAI GPT-4 tier limits (Tier 1: 500 RPM)
    pub fn openai_tier1() -> Self {
        Self::per_minute(500)
    }

    /// Anthropic Claude limits (Tier 1: 60 RPM)
    pub fn anthropic_tier1() -> Self {
        Self::per_minute(60)
    }

    /// Conservative default for unknown providers
    pub fn conservative() -> Self {
        Self::per_minute(30)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::conservative()
    }
}

/// Keyed sliding-window rate limiter.
///
/// Explicitly constructed and owned by the component that needs it; tests
/// build independent instances per scenario. The whole map sits behind one
/// mutex so that each read-prune-append is a single critical section and two
/// concurrent checks on the same identity can never both see `max_calls - 1`.
pub struct SlidingWindowLimiter<K = String>
where
    K: Hash + Eq,
{
    config: RateLimitConfig,
    calls: Mutex<HashMap<K, VecDeque<Instant>>>,
}

impl<K> SlidingWindowLimiter<K>
where
    K: Hash + Eq,
{
    /// Create a new limiter
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Get current config
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether a call for `identity` is admitted at `now`.
    ///
    /// Prunes timestamps older than `now - window`, then admits and records
    /// the call if fewer than `max_calls` remain; a denied call records
    /// nothing. `now` must be non-decreasing across calls on one limiter.
    /// Unknown identities start from an empty record.
    pub fn is_allowed_at(&self, identity: K, now: Instant) -> bool {
        let window = self.config.window;
        let mut calls = self.calls.lock();
        let timestamps = calls.entry(identity).or_default();

        timestamps.retain(|&t| now.saturating_duration_since(t) < window);

        if timestamps.len() < self.config.max_calls {
            timestamps.push_back(now);
            true
        } else {
            debug!(
                max_calls = %self.config.max_calls,
                window_ms = %window.as_millis(),
                "Rate limit exceeded, call rejected"
            );
            false
        }
    }

    /// Decide admission against the current time
    pub fn is_allowed(&self, identity: K) -> bool {
        self.is_allowed_at(identity, Instant::now())
    }

    /// How many further calls would be admitted for `identity` at `now`
    pub fn remaining_at(&self, identity: &K, now: Instant) -> usize {
        let window = self.config.window;
        let mut calls = self.calls.lock();
        match calls.get_mut(identity) {
            Some(timestamps) => {
                timestamps.retain(|&t| now.saturating_duration_since(t) < window);
                self.config.max_calls.saturating_sub(timestamps.len())
            }
            None => self.config.max_calls,
        }
    }

    /// Remaining capacity against the current time
    pub fn remaining(&self, identity: &K) -> usize {
        self.remaining_at(identity, Instant::now())
    }

    /// Drop one identity's record entirely
    pub fn reset(&self, identity: &K) {
        self.calls.lock().remove(identity);
    }

    /// Evict stale timestamps everywhere and drop empty identity entries.
    ///
    /// Admission checks only prune the identity they touch, so identities
    /// that stop calling would otherwise keep their last window of
    /// timestamps forever. Call this periodically on long-lived limiters.
    pub fn prune_at(&self, now: Instant) {
        let window = self.config.window;
        let mut calls = self.calls.lock();
        calls.retain(|_, timestamps| {
            timestamps.retain(|&t| now.saturating_duration_since(t) < window);
            !timestamps.is_empty()
        });
    }

    /// Housekeeping against the current time
    pub fn prune(&self) {
        self.prune_at(Instant::now());
    }

    /// Number of identities currently holding records
    pub fn tracked_identities(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_calls: usize, window: Duration) -> SlidingWindowLimiter<&'static str> {
        SlidingWindowLimiter::new(RateLimitConfig::new(max_calls, window))
    }

    #[test]
    fn allows_within_limit() {
        let limiter = limiter(3, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.is_allowed_at("user-1", now));
        assert!(limiter.is_allowed_at("user-1", now));
        assert!(limiter.is_allowed_at("user-1", now));
    }

    #[test]
    fn rejects_over_limit() {
        let limiter = limiter(2, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.is_allowed_at("user-1", now));
        assert!(limiter.is_allowed_at("user-1", now));
        assert!(!limiter.is_allowed_at("user-1", now));
        assert!(!limiter.is_allowed_at("user-1", now));
    }

    #[test]
    fn rejected_call_leaves_no_record() {
        let limiter = limiter(1, Duration::from_secs(10));
        let base = Instant::now();

        assert!(limiter.is_allowed_at("user-1", base));
        assert!(!limiter.is_allowed_at("user-1", base + Duration::from_secs(5)));

        // The rejection at t=5s was not recorded, so once the t=0 call ages
        // out the next call is admitted.
        assert!(limiter.is_allowed_at("user-1", base + Duration::from_secs(11)));
    }

    #[test]
    fn window_slides() {
        let limiter = limiter(2, Duration::from_secs(10));
        let base = Instant::now();

        assert!(limiter.is_allowed_at("user-1", base));
        assert!(limiter.is_allowed_at("user-1", base + Duration::from_secs(1)));
        assert!(!limiter.is_allowed_at("user-1", base + Duration::from_secs(2)));

        // t=0 falls out of the window at t=10, freeing one slot
        assert!(limiter.is_allowed_at("user-1", base + Duration::from_secs(10)));
        assert!(!limiter.is_allowed_at("user-1", base + Duration::from_secs(10)));
    }

    #[test]
    fn window_bound_holds_for_any_sequence() {
        let max = 5;
        let window = Duration::from_secs(10);
        let limiter = limiter(max, window);
        let base = Instant::now();

        // Irregular but non-decreasing spacing: bursts followed by gaps
        let steps_ms = [0u64, 10, 0, 2_500, 40, 0, 7_000, 100, 900, 3_000];

        let mut admitted: Vec<Instant> = Vec::new();
        let mut elapsed = Duration::ZERO;
        for i in 0..200usize {
            elapsed += Duration::from_millis(steps_ms[i % steps_ms.len()]);
            let now = base + elapsed;
            if limiter.is_allowed_at("user-1", now) {
                admitted.push(now);
            }

            // No trailing window of length `window` ever contains more than
            // `max` admitted calls.
            let in_window = admitted
                .iter()
                .filter(|&&t| now.saturating_duration_since(t) < window)
                .count();
            assert!(in_window <= max);
        }
    }

    #[test]
    fn identities_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.is_allowed_at("user-a", now));
        assert!(!limiter.is_allowed_at("user-a", now));

        // Exhausting user-a never affects user-b
        assert!(limiter.is_allowed_at("user-b", now));
    }

    #[test]
    fn zero_max_calls_rejects_unconditionally() {
        let limiter = limiter(0, Duration::from_secs(60));
        let now = Instant::now();

        assert!(!limiter.is_allowed_at("user-1", now));
        assert!(!limiter.is_allowed_at("user-1", now + Duration::from_secs(120)));
    }

    #[test]
    fn zero_window_admits_unconditionally() {
        let limiter = limiter(1, Duration::ZERO);
        let now = Instant::now();

        // Every record is immediately stale, so the count never reaches max
        for _ in 0..10 {
            assert!(limiter.is_allowed_at("user-1", now));
        }
    }

    #[test]
    fn remaining_reflects_usage() {
        let limiter = limiter(3, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.remaining_at(&"user-1", now), 3);
        assert!(limiter.is_allowed_at("user-1", now));
        assert!(limiter.is_allowed_at("user-1", now));
        assert_eq!(limiter.remaining_at(&"user-1", now), 1);
    }

    #[test]
    fn reset_clears_identity() {
        let limiter = limiter(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.is_allowed_at("user-1", now));
        assert!(!limiter.is_allowed_at("user-1", now));

        limiter.reset(&"user-1");
        assert!(limiter.is_allowed_at("user-1", now));
    }

    #[test]
    fn prune_drops_idle_identities() {
        let limiter = limiter(5, Duration::from_secs(10));
        let base = Instant::now();

        assert!(limiter.is_allowed_at("user-a", base));
        assert!(limiter.is_allowed_at("user-b", base));
        assert_eq!(limiter.tracked_identities(), 2);

        limiter.prune_at(base + Duration::from_secs(11));
        assert_eq!(limiter.tracked_identities(), 0);
    }

    #[test]
    fn provider_presets() {
        let openai = RateLimitConfig::openai_tier1();
        assert_eq!(openai.max_calls, 500);

        let anthropic = RateLimitConfig::anthropic_tier1();
        assert_eq!(anthropic.max_calls, 60);
        assert_eq!(anthropic.window, Duration::from_secs(60));
    }
}
