//! Retry and backoff decisions, kept free of any I/O so they can be tested
//! directly.

use crate::api::error::{ApiError, ErrorClass};
use crate::config::PipelineConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            base,
            cap,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
        )
    }

    /// Exponential delay for the given zero-based retry `attempt`, with
    /// "equal jitter": half the delay is fixed, the other half scaled by
    /// `jitter` in `[0, 1)`. Never exceeds `cap`.
    pub fn backoff(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = self
            .base
            .checked_mul(2u32.saturating_pow(attempt.min(31)))
            .unwrap_or(self.cap)
            .min(self.cap);
        let jitter = jitter.clamp(0.0, 1.0);
        exp.mul_f64(0.5 + 0.5 * jitter).min(self.cap)
    }

    /// What to do after `error` on zero-based retry `attempt`.
    pub fn decide(&self, error: &ApiError, attempt: u32, jitter: f64) -> RetryDecision {
        self.decide_class(error.class(), error.retry_after(), attempt, jitter)
    }

    pub fn decide_class(
        &self,
        class: ErrorClass,
        retry_after: Option<Duration>,
        attempt: u32,
        jitter: f64,
    ) -> RetryDecision {
        if class == ErrorClass::Permanent || attempt >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        let delay = self.backoff(attempt, jitter);
        match (class, retry_after) {
            // The provider knows best when its window resets.
            (ErrorClass::RateLimited, Some(hint)) => RetryDecision::RetryAfter(delay.max(hint)),
            _ => RetryDecision::RetryAfter(delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(1))
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let p = policy();
        assert_eq!(p.backoff(0, 1.0), Duration::from_millis(100));
        assert_eq!(p.backoff(1, 1.0), Duration::from_millis(200));
        assert_eq!(p.backoff(2, 1.0), Duration::from_millis(400));
        assert_eq!(p.backoff(3, 1.0), Duration::from_millis(800));
        assert_eq!(p.backoff(4, 1.0), Duration::from_secs(1));
        assert_eq!(p.backoff(40, 1.0), Duration::from_secs(1));
    }

    #[test]
    fn jitter_keeps_at_least_half_the_delay() {
        let p = policy();
        assert_eq!(p.backoff(2, 0.0), Duration::from_millis(200));
        let mid = p.backoff(2, 0.5);
        assert!(mid > Duration::from_millis(200) && mid < Duration::from_millis(400));
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        assert_eq!(
            policy().decide_class(ErrorClass::Permanent, None, 0, 0.5),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn gives_up_after_max_retries() {
        let p = policy();
        assert!(matches!(
            p.decide_class(ErrorClass::Transient, None, 3, 0.0),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(
            p.decide_class(ErrorClass::Transient, None, 4, 0.0),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn rate_limit_hint_extends_the_wait() {
        let p = policy();
        assert_eq!(
            p.decide_class(ErrorClass::RateLimited, Some(Duration::from_secs(30)), 0, 0.0),
            RetryDecision::RetryAfter(Duration::from_secs(30))
        );
        assert_eq!(
            p.decide_class(ErrorClass::RateLimited, Some(Duration::from_millis(1)), 0, 1.0),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
    }

    #[test]
    fn decide_uses_error_classification() {
        let err = ApiError::Timeout("u".to_string());
        assert!(matches!(policy().decide(&err, 0, 0.0), RetryDecision::RetryAfter(_)));
    }
}
