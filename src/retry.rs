//! Bounded polling and retry primitives
//!
//! Replaces ad-hoc `until ...; do sleep; done` loops with an explicit
//! combinator carrying a fixed interval and an attempt ceiling, reused by
//! both probe phases and by the coordinator wait.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Fixed-interval polling policy with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between consecutive attempts
    pub interval: Duration,
    /// Maximum number of attempts before giving up
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Worst-case wall-clock ceiling for this policy.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 5s x 30 gives a ~150s ceiling per phase
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 30,
        }
    }
}

/// Poll `attempt` until it reports success or the policy's attempt budget
/// is exhausted. Returns whether the condition was ever met. No sleep is
/// taken after the final attempt.
pub async fn poll_until<F, Fut>(policy: RetryPolicy, mut attempt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for n in 1..=policy.max_attempts {
        if attempt().await {
            return true;
        }
        if n < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }
    false
}

/// Poll `attempt` on a fixed interval until it reports success, with no
/// attempt bound. Used for the coordinator wait, which has no timeout by
/// default: nothing can proceed without the coordinator.
pub async fn poll_forever<F, Fut>(interval: Duration, mut attempt: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        if attempt().await {
            return;
        }
        sleep(interval).await;
    }
}
