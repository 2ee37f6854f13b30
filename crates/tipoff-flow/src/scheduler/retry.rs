//! Retry coordination: bounded exponential backoff and dead-lettering.
//!
//! Two budgets are tracked per event:
//!
//! - the **generation budget** (`max_attempts`), charged for transient,
//!   validation, internal and lease-expiry failures;
//! - the **data-readiness budget** (`max_data_waits`), charged for missing
//!   or stale structured data. The generation attempt taken at lease
//!   acquisition is refunded.
//!
//! After a generation-path failure with `n` attempts consumed the next retry
//! waits `min(base * 2^n, max_backoff)`. A data-readiness failure waits
//! `data_retry_delay`, long enough for the next data refresh to land.

use std::time::Duration;

use crate::error::{Error, FailureKind, Result};

/// Retry and dead-letter policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Generation attempts before an event is dead-lettered.
    pub max_attempts: u32,
    /// Backoff base.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Delay after a data-readiness failure.
    pub data_retry_delay: Duration,
    /// Data-readiness failures before an event is dead-lettered.
    pub max_data_waits: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(900),
            data_retry_delay: Duration::from_secs(60),
            max_data_waits: 30,
        }
    }
}

/// What happens to an event after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    RetryAfter(Duration),
    /// The relevant budget is exhausted.
    DeadLetter,
}

impl RetryPolicy {
    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a budget is zero or the backoff
    /// base exceeds the cap.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::configuration("max_attempts must be >= 1"));
        }
        if self.max_data_waits == 0 {
            return Err(Error::configuration("max_data_waits must be >= 1"));
        }
        if self.base_backoff > self.max_backoff {
            return Err(Error::configuration(format!(
                "backoff base {:?} exceeds cap {:?}",
                self.base_backoff, self.max_backoff
            )));
        }
        Ok(())
    }

    /// Backoff after a generation-path failure with `attempts` consumed.
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        2_u32
            .checked_pow(attempts)
            .and_then(|factor| self.base_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// Decides the next step after a failure of `kind`.
    ///
    /// `attempts` and `data_waits` are the budgets consumed including this
    /// failure (after any refund).
    #[must_use]
    pub fn decide(&self, kind: FailureKind, attempts: u32, data_waits: u32) -> RetryDecision {
        if kind.is_data_readiness() {
            if data_waits >= self.max_data_waits {
                RetryDecision::DeadLetter
            } else {
                RetryDecision::RetryAfter(self.data_retry_delay)
            }
        } else if attempts >= self.max_attempts {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::RetryAfter(self.backoff(attempts))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            data_retry_delay: Duration::from_secs(5),
            max_data_waits: 2,
        }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(10));
        assert_eq!(p.backoff(1), Duration::from_secs(20));
        assert_eq!(p.backoff(2), Duration::from_secs(40));
        assert_eq!(p.backoff(3), Duration::from_secs(60));
        assert_eq!(p.backoff(40), Duration::from_secs(60));
    }

    #[test]
    fn generation_failures_dead_letter_at_budget() {
        let p = policy();
        assert_eq!(
            p.decide(FailureKind::Transient, 1, 0),
            RetryDecision::RetryAfter(Duration::from_secs(20))
        );
        assert_eq!(
            p.decide(FailureKind::Validation, 2, 0),
            RetryDecision::RetryAfter(Duration::from_secs(40))
        );
        assert_eq!(
            p.decide(FailureKind::LeaseExpired, 3, 0),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn data_failures_use_separate_budget() {
        let p = policy();
        assert_eq!(
            p.decide(FailureKind::DataNotReady, 0, 1),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        // Generation budget is irrelevant for data-readiness failures.
        assert_eq!(
            p.decide(FailureKind::DataNotReady, 3, 1),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            p.decide(FailureKind::DataNotReady, 0, 2),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn validate_rejects_bad_policies() {
        assert!(policy().validate().is_ok());
        assert!(RetryPolicy {
            max_attempts: 0,
            ..policy()
        }
        .validate()
        .is_err());
        assert!(RetryPolicy {
            base_backoff: Duration::from_secs(120),
            ..policy()
        }
        .validate()
        .is_err());
    }
}
