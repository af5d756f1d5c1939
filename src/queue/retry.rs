//! Retry budget and backoff for failed conversion attempts.

use std::time::Duration;

/// Decides whether a failed attempt is retried and how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries granted after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each later one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy with the default one second base delay.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// What to do with a job that has used `retry_count` retries and just failed.
    pub fn on_failure(&self, retry_count: u32) -> FailureAction {
        if retry_count < self.max_retries {
            let attempt = retry_count + 1;
            FailureAction::Retry {
                attempt,
                delay: self.delay_before(attempt),
            }
        } else {
            FailureAction::GiveUp {
                attempts: self.max_retries + 1,
            }
        }
    }

    /// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay * 2u32.pow(exponent)
    }
}

/// Result of handling a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Requeue after `delay`; `attempt` is the retry number.
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted after `attempts` total attempts.
    GiveUp { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.on_failure(0),
            FailureAction::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.on_failure(1),
            FailureAction::Retry {
                attempt: 2,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(policy.on_failure(2), FailureAction::GiveUp { attempts: 3 });
    }

    #[test]
    fn zero_budget_never_retries() {
        let policy = RetryPolicy::with_max_retries(0);
        assert_eq!(policy.on_failure(0), FailureAction::GiveUp { attempts: 1 });
    }
}
