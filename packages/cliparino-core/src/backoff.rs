//! Exponential backoff with jitter for reconnect and retry loops.
//!
//! Every supervisor that re-attempts a failed transport (OBS reconnects,
//! EventSub re-probes, Helix retries) derives its delays from a [`Backoff`]
//! value. The attempt counter resets to zero on every observed success.

use std::time::Duration;

use rand::Rng;

/// Minimum delay produced regardless of policy or jitter.
const FLOOR: Duration = Duration::from_millis(1);

/// Delay policy: base delay, cap, and jitter fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    /// Delay for attempt 0 before doubling.
    pub base: Duration,
    /// Upper bound for the un-jittered delay.
    pub max: Duration,
    /// Fraction of the delay applied as uniform random jitter (±).
    pub jitter: f64,
}

impl Policy {
    /// Default policy: 2s base, 300s cap, ±30% jitter.
    ///
    /// Used by the OBS reconnect loop and the EventSub re-probe cycle.
    #[must_use]
    pub const fn default_policy() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
            jitter: 0.30,
        }
    }

    /// Fast policy: 1s base, 30s cap. Used for in-call Helix retries.
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.30,
        }
    }

    /// Slow policy: 5s base, 600s cap. Used where reconnect pressure must
    /// stay low (long outages).
    #[must_use]
    pub const fn slow() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(600),
            jitter: 0.30,
        }
    }

    /// Computes the jittered delay for a given attempt number.
    ///
    /// `clamp(base * 2^attempt, 0, max)` plus a uniform ±jitter fraction of
    /// the clamped delay, floored at 1ms.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let raw_ms = (base_ms * 2f64.powi(attempt.min(63) as i32)).min(max_ms);

        let jittered_ms = if self.jitter > 0.0 {
            let factor: f64 = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            raw_ms + factor * raw_ms
        } else {
            raw_ms
        };

        Duration::from_millis(jittered_ms as u64).max(FLOOR)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::default_policy()
    }
}

/// Stateful backoff: tracks the attempt counter for one failure sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: Policy,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff with the given policy, starting at attempt 0.
    #[must_use]
    pub fn new(policy: Policy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Returns the delay for the current attempt and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of failures observed since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Resets the attempt counter. Call on every observed success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Policy::default_policy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Jitter-free policy so delays are exact in assertions.
    fn exact(base_ms: u64, max_ms: u64) -> Policy {
        Policy {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms),
            jitter: 0.0,
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = exact(100, 10_000);
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = exact(100, 500);
        assert_eq!(policy.delay(10), Duration::from_millis(500));
        // A huge attempt number must not overflow.
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = Policy {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(300),
            jitter: 0.30,
        };
        for _ in 0..100 {
            let d = policy.delay(0).as_millis() as i64;
            assert!((700..=1300).contains(&d), "delay {d}ms outside ±30%");
        }
    }

    #[test]
    fn delay_never_drops_below_floor() {
        let policy = exact(0, 0);
        assert_eq!(policy.delay(0), Duration::from_millis(1));
    }

    #[test]
    fn backoff_advances_and_resets() {
        let mut backoff = Backoff::new(exact(100, 10_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn named_policies_match_contract() {
        assert_eq!(Policy::default_policy().base, Duration::from_secs(2));
        assert_eq!(Policy::default_policy().max, Duration::from_secs(300));
        assert_eq!(Policy::fast().base, Duration::from_secs(1));
        assert_eq!(Policy::fast().max, Duration::from_secs(30));
        assert_eq!(Policy::slow().base, Duration::from_secs(5));
        assert_eq!(Policy::slow().max, Duration::from_secs(600));
    }
}
