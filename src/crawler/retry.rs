//! Retry budget and exponential backoff for transient fetch failures

use crate::config::EngineConfig;
use rand::Rng;
use std::time::Duration;

/// Backoff parameters shared by every item of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per item, including the first
    pub max_attempts: u32,
    pub base: Duration,
    pub ceiling: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, ceiling: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            ceiling,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_ceiling_ms),
        )
    }

    /// Delay after the failed attempt with zero-based index `attempt`, before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.scaled(attempt, 1.0)
    }

    /// `min(base * 2^attempt * factor, ceiling)`
    fn scaled(&self, attempt: u32, factor: f64) -> Duration {
        let exp = 2f64.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base.as_secs_f64() * exp * factor;
        Duration::from_secs_f64(secs.min(self.ceiling.as_secs_f64()))
    }

    /// Backoff with a uniform jitter factor in `[0.5, 1.5)`
    pub fn jittered(&self, attempt: u32) -> Duration {
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        self.scaled(attempt, factor)
    }
}

/// What to do after a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given delay, then try again
    Retry(Duration),
    /// The attempt budget is spent
    GiveUp,
}

/// Retry bookkeeping for one work item
///
/// Lives only as long as the item is being processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far
    pub attempt: u32,

    /// Delay chosen after the latest failure, if another attempt follows
    pub next_delay: Option<Duration>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed attempt and decides whether another one follows
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> RetryDecision {
        self.attempt += 1;

        if self.attempt >= policy.max_attempts {
            self.next_delay = None;
            return RetryDecision::GiveUp;
        }

        let delay = policy.jittered(self.attempt - 1);
        self.next_delay = Some(delay);
        RetryDecision::Retry(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1000))
    }

    #[test]
    fn test_backoff_increases_until_ceiling() {
        let policy = policy();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_strictly_increasing_below_ceiling() {
        let policy = RetryPolicy::new(10, Duration::from_millis(10), Duration::from_secs(60));
        let delays: Vec<_> = (0..10).map(|a| policy.backoff(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = policy();
        for _ in 0..200 {
            let d = policy.jittered(1);
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(300));
        }
        for _ in 0..50 {
            assert!(policy.jittered(10) <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let mut state = RetryState::new();

        assert!(matches!(state.record_failure(&policy), RetryDecision::Retry(_)));
        assert!(state.next_delay.is_some());
        assert!(matches!(state.record_failure(&policy), RetryDecision::Retry(_)));
        assert_eq!(state.record_failure(&policy), RetryDecision::GiveUp);
        assert_eq!(state.attempt, 3);
        assert_eq!(state.next_delay, None);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(5));
        let mut state = RetryState::new();
        assert_eq!(state.record_failure(&policy), RetryDecision::GiveUp);
    }
}
