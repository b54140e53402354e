//! Retry decisions: what happens to a job after its command has run.
//!
//! [`Decider`] is a pure function of (job, outcome, policy). Applying the
//! decision to the store is the retry scheduler's job (`app::retry`).

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::job::{Job, Transition};
use super::outcome::Outcome;

/// Backoff policy, read fresh from config on every failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Exponent base: the k-th failure waits `backoff_base^k` seconds.
    pub backoff_base: f64,
}

impl RetryPolicy {
    pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

    /// Upper bound on a single delay.
    pub const MAX_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    pub fn new(backoff_base: f64) -> Self {
        Self { backoff_base }
    }

    /// [`Self::MAX_DELAY`] as a chrono delta.
    pub fn max_delta() -> chrono::Duration {
        chrono::Duration::seconds(Self::MAX_DELAY.as_secs() as i64)
    }

    /// Delay before the next attempt, given the post-increment attempt count.
    ///
    /// Example with base=2: attempt 1 -> 2s, 2 -> 4s, 3 -> 8s.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let secs = self.backoff_base.powi(exponent);
        if !secs.is_finite() || secs >= Self::MAX_DELAY.as_secs_f64() {
            return Self::MAX_DELAY;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BACKOFF_BASE)
    }
}

/// The next action for a job whose command just ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The run succeeded.
    Complete,

    /// Retry after `delay`; `attempts` is the post-increment count.
    Retry { delay: Duration, attempts: u32 },

    /// Out of retries.
    MarkDead { attempts: u32 },
}

impl Decision {
    /// Translate into the state-machine transition to persist.
    pub fn to_transition(&self, outcome: &Outcome, now: DateTime<Utc>) -> Transition {
        match self {
            Decision::Complete => Transition::Complete { at: now },
            Decision::Retry { delay, .. } => {
                let delay = chrono::Duration::from_std(*delay).unwrap_or(RetryPolicy::max_delta());
                Transition::Fail {
                    at: now,
                    error: outcome.error_text(),
                    next_retry_at: now + delay,
                }
            }
            Decision::MarkDead { .. } => Transition::Bury {
                at: now,
                error: outcome.error_text(),
            },
        }
    }
}

/// Decides the next action from the job record and the run outcome.
pub trait Decider: Send + Sync {
    fn decide(&self, job: &Job, outcome: &Outcome, policy: &RetryPolicy) -> Decision;
}

/// Attempt-counting exponential backoff:
/// - success -> Complete
/// - failure with `attempts + 1 >= max_retries` -> MarkDead
/// - otherwise -> Retry after `backoff_base^(attempts + 1)` seconds
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecider;

impl Decider for DefaultDecider {
    fn decide(&self, job: &Job, outcome: &Outcome, policy: &RetryPolicy) -> Decision {
        if outcome.is_success() {
            return Decision::Complete;
        }

        let attempts = job.attempts.saturating_add(1);
        if attempts >= job.max_retries {
            Decision::MarkDead { attempts }
        } else {
            Decision::Retry {
                delay: policy.next_delay(attempts),
                attempts,
            }
        }
    }
}
