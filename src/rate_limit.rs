//! # Rate Limiter
//! Soft admission gate in front of the upstream API.
//!
//! Keeps call timestamps per tracker key in a trailing 60 s window and
//! enforces two rules before a call may proceed:
//! - at least `min_call_interval` since the last recorded call (any key),
//! - fewer than `max_calls_per_minute` calls in the window (all keys).
//!
//! Denials are a policy outcome, not an error: callers fall back to cached
//! data or an empty result.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tracing::debug;

use crate::clock::SharedClock;

/// Tracker key used when callers do not distinguish call kinds.
pub const GLOBAL_KEY: &str = "global";

/// Width of the sliding window.
pub const WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimits {
    pub max_calls_per_minute: usize,
    pub min_call_interval: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_calls_per_minute: 10,
            min_call_interval: Duration::seconds(1),
        }
    }
}

/// Why a call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    TooSoon,
    CeilingReached,
}

pub struct RateLimiter {
    limits: RateLimits,
    clock: SharedClock,
    window: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(limits: RateLimits, clock: SharedClock) -> Self {
        Self {
            limits,
            clock,
            window: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// May a call proceed now? Does NOT record anything.
    pub fn check_rate_limit(&self) -> bool {
        self.check_key(GLOBAL_KEY)
    }

    /// Record a call that is about to go out.
    pub fn record_api_call(&self) {
        self.record_key(GLOBAL_KEY)
    }

    pub fn check_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut window = self.lock();
        match evaluate(&mut window, &self.limits, now) {
            Ok(()) => true,
            Err(why) => {
                log_denial(key, why);
                false
            }
        }
    }

    pub fn record_key(&self, key: &str) {
        let now = self.clock.now();
        self.lock().entry(key.to_string()).or_default().push_back(now);
    }

    /// Check and record under one lock, so two concurrent callers cannot both
    /// take the last free slot.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut window = self.lock();
        match evaluate(&mut window, &self.limits, now) {
            Ok(()) => {
                window.entry(key.to_string()).or_default().push_back(now);
                true
            }
            Err(why) => {
                log_denial(key, why);
                false
            }
        }
    }

    /// Calls recorded within the trailing window, across all keys.
    pub fn recent_calls(&self) -> usize {
        let now = self.clock.now();
        let mut window = self.lock();
        purge(&mut window, now);
        window.values().map(VecDeque::len).sum()
    }

    /// Forget every recorded call.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<DateTime<Utc>>>> {
        self.window.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn evaluate(
    window: &mut HashMap<String, VecDeque<DateTime<Utc>>>,
    limits: &RateLimits,
    now: DateTime<Utc>,
) -> Result<(), Denial> {
    let last = window.values().filter_map(|q| q.back()).max().copied();
    if let Some(last) = last {
        if now - last < limits.min_call_interval {
            return Err(Denial::TooSoon);
        }
    }

    purge(window, now);

    let total: usize = window.values().map(VecDeque::len).sum();
    if total >= limits.max_calls_per_minute {
        return Err(Denial::CeilingReached);
    }
    Ok(())
}

/// Drop timestamps that left the window; drop keys that became empty.
fn purge(window: &mut HashMap<String, VecDeque<DateTime<Utc>>>, now: DateTime<Utc>) {
    let cutoff = now - Duration::seconds(WINDOW_SECS);
    window.retain(|_, calls| {
        while let Some(&t) = calls.front() {
            if t <= cutoff {
                calls.pop_front();
            } else {
                break;
            }
        }
        !calls.is_empty()
    });
}

fn log_denial(key: &str, why: Denial) {
    counter!("rate_limit_denied_total").increment(1);
    debug!(target: "rate_limit", key, reason = ?why, "upstream call denied");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn limiter(max: usize, spacing_ms: i64) -> (Arc<ManualClock>, RateLimiter) {
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(t0));
        let rl = RateLimiter::new(
            RateLimits {
                max_calls_per_minute: max,
                min_call_interval: Duration::milliseconds(spacing_ms),
            },
            clock.clone(),
        );
        (clock, rl)
    }

    #[test]
    fn ceiling_denies_the_next_call_inside_window() {
        let (clock, rl) = limiter(10, 1000);
        for _ in 0..10 {
            assert!(rl.check_rate_limit());
            rl.record_api_call();
            clock.advance(Duration::seconds(2));
        }
        // 10 calls spread over 20 s; none aged out yet.
        assert!(!rl.check_rate_limit());
        assert_eq!(rl.recent_calls(), 10);
    }

    #[test]
    fn slots_free_up_as_calls_age_out() {
        let (clock, rl) = limiter(2, 1000);
        assert!(rl.try_acquire(GLOBAL_KEY));
        clock.advance(Duration::seconds(5));
        assert!(rl.try_acquire(GLOBAL_KEY));
        clock.advance(Duration::seconds(5));
        assert!(!rl.try_acquire(GLOBAL_KEY));

        // First call leaves the window at t0 + 60 s.
        clock.advance(Duration::seconds(51));
        assert!(rl.try_acquire(GLOBAL_KEY));
    }

    #[test]
    fn minimum_spacing_denies_regardless_of_count() {
        let (clock, rl) = limiter(100, 1000);
        assert!(rl.try_acquire(GLOBAL_KEY));
        clock.advance(Duration::milliseconds(999));
        assert!(!rl.check_rate_limit());
        clock.advance(Duration::milliseconds(1));
        assert!(rl.check_rate_limit());
    }

    #[test]
    fn ceiling_is_shared_across_keys() {
        let (clock, rl) = limiter(2, 0);
        assert!(rl.try_acquire("today"));
        clock.advance(Duration::seconds(1));
        assert!(rl.try_acquire("historical"));
        clock.advance(Duration::seconds(1));
        assert!(!rl.check_key("today"));
    }

    #[test]
    fn check_does_not_record() {
        let (_clock, rl) = limiter(1, 0);
        assert!(rl.check_rate_limit());
        assert!(rl.check_rate_limit());
        assert_eq!(rl.recent_calls(), 0);
    }

    #[test]
    fn reset_clears_window() {
        let (_clock, rl) = limiter(1, 1000);
        assert!(rl.try_acquire(GLOBAL_KEY));
        assert!(!rl.check_rate_limit());
        rl.reset();
        assert!(rl.check_rate_limit());
    }
}
