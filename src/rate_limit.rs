//! Minimum-interval rate limiting for contributions.

use crate::Timestamp;
use std::time::Duration;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The contribution may proceed.
    Allowed,
    /// The contribution must wait this long.
    Blocked(Duration),
}

/// Pure predicate over the caller's history.
///
/// Blocks when the principal exists and `now < last + min_interval`.  A
/// first-ever contribution is never blocked.  A clock that runs backwards
/// relative to `last` counts as "no time elapsed".
pub fn check_rate_limit(
    exists: bool,
    last_contribution: Timestamp,
    now: Timestamp,
    min_interval: u64,
) -> RateDecision {
    if !exists {
        return RateDecision::Allowed;
    }
    let ready_at = last_contribution.saturating_add(min_interval);
    if now < ready_at {
        RateDecision::Blocked(Duration::from_secs(ready_at - now))
    } else {
        RateDecision::Allowed
    }
}

/// Configured limiter applied by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    min_interval: u64,
}

impl RateLimit {
    /// Limiter requiring `min_interval` seconds between contributions.
    pub fn new(min_interval: u64) -> Self {
        Self { min_interval }
    }

    /// Minimum interval in seconds.
    pub fn min_interval(&self) -> u64 {
        self.min_interval
    }

    /// Applies the predicate to an optional last-contribution time.
    pub fn check(&self, last_contribution: Option<Timestamp>, now: Timestamp) -> RateDecision {
        match last_contribution {
            Some(last) => check_rate_limit(true, last, now, self.min_interval),
            None => check_rate_limit(false, 0, now, self.min_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_contribution_is_never_blocked() {
        assert_eq!(check_rate_limit(false, 0, 0, 10), RateDecision::Allowed);
        assert_eq!(check_rate_limit(false, 500, 3, 10), RateDecision::Allowed);
    }

    #[test]
    fn blocks_inside_interval_and_reports_remaining() {
        assert_eq!(
            check_rate_limit(true, 0, 5, 10),
            RateDecision::Blocked(Duration::from_secs(5))
        );
        assert_eq!(check_rate_limit(true, 0, 10, 10), RateDecision::Allowed);
        assert_eq!(check_rate_limit(true, 0, 11, 10), RateDecision::Allowed);
    }

    #[test]
    fn backwards_clock_waits_full_interval_from_last() {
        assert_eq!(
            check_rate_limit(true, 100, 90, 10),
            RateDecision::Blocked(Duration::from_secs(20))
        );
    }

    #[test]
    fn zero_interval_only_blocks_a_backwards_clock() {
        let limit = RateLimit::new(0);
        assert_eq!(limit.min_interval(), 0);
        assert_eq!(limit.check(Some(42), 42), RateDecision::Allowed);
        assert_eq!(limit.check(Some(42), 43), RateDecision::Allowed);
        assert_eq!(
            limit.check(Some(100), 90),
            RateDecision::Blocked(Duration::from_secs(10))
        );
    }

    #[test]
    fn saturates_near_end_of_time() {
        assert_eq!(
            check_rate_limit(true, u64::MAX - 1, u64::MAX - 1, 10),
            RateDecision::Blocked(Duration::from_secs(1))
        );
    }
}
