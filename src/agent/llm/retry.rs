//! Retry with exponential back-off for transient provider failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ProviderError;

/// How often, and how patiently, a provider call is retried.
///
/// Only transient error kinds are retried; the last error is returned
/// unchanged once attempts run out.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn should_retry(&self, attempt: u32, error: &ProviderError) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let unbounded = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(unbounded)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Run `execute` until it succeeds, fails permanently, or attempts run out.
///
/// `sleep` is awaited between attempts.
pub async fn execute_with_retry<T, Op, OpFuture, Sleep, SleepFuture>(
    operation: &str,
    policy: &RetryPolicy,
    mut execute: Op,
    mut sleep: Sleep,
) -> Result<T, ProviderError>
where
    Op: FnMut(u32) -> OpFuture,
    OpFuture: Future<Output = Result<T, ProviderError>>,
    Sleep: FnMut(Duration) -> SleepFuture,
    SleepFuture: Future<Output = ()>,
{
    let mut attempt = 1;

    loop {
        match execute(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !policy.should_retry(attempt, &error) {
                    return Err(error);
                }

                let delay = policy.backoff_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation, attempt, policy.max_attempts, delay, error
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// [`execute_with_retry`] sleeping on the tokio timer.
pub async fn with_retry<T, Op, OpFuture>(
    operation: &str,
    policy: &RetryPolicy,
    execute: Op,
) -> Result<T, ProviderError>
where
    Op: FnMut(u32) -> OpFuture,
    OpFuture: Future<Output = Result<T, ProviderError>>,
{
    execute_with_retry(operation, policy, execute, tokio::time::sleep).await
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::ProviderErrorKind;

    fn recorder() -> (Arc<Mutex<Vec<Duration>>>, impl FnMut(Duration) -> std::future::Ready<()>) {
        let sleeps = Arc::new(Mutex::new(Vec::new()));
        let record = {
            let sleeps = Arc::clone(&sleeps);
            move |delay| {
                sleeps.lock().expect("sleep lock").push(delay);
                std::future::ready(())
            }
        };
        (sleeps, record)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_attempt(5), Duration::from_secs(16));
        assert_eq!(policy.backoff_for_attempt(7), Duration::from_secs(60));
        assert_eq!(policy.backoff_for_attempt(30), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_survives_extreme_settings() {
        let huge = RetryPolicy {
            max_backoff: Duration::from_secs(u64::MAX),
            ..RetryPolicy::default()
        };
        assert_eq!(huge.backoff_for_attempt(3), Duration::from_secs(4));
        assert_eq!(huge.backoff_for_attempt(5000), Duration::from_secs(u64::MAX));

        let nan = RetryPolicy {
            backoff_multiplier: f64::NAN,
            ..RetryPolicy::default()
        };
        assert_eq!(nan.backoff_for_attempt(2), Duration::from_secs(60));

        let negative = RetryPolicy {
            backoff_multiplier: -2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(negative.backoff_for_attempt(2), Duration::from_secs(60));
    }

    #[test]
    fn test_should_retry_only_transient() {
        let policy = RetryPolicy::new(3);
        let transient = ProviderError::timeout("timed out");
        let permanent = ProviderError::authentication("bad key");

        assert!(policy.should_retry(1, &transient));
        assert!(policy.should_retry(2, &transient));
        assert!(!policy.should_retry(3, &transient));
        assert!(!policy.should_retry(1, &permanent));
    }

    #[tokio::test]
    async fn test_exhaustion_makes_six_attempts_and_returns_original_error() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(Mutex::new(0_u32));
        let (sleeps, record) = recorder();

        let result: Result<(), _> = execute_with_retry(
            "chat",
            &policy,
            {
                let attempts = Arc::clone(&attempts);
                move |_| {
                    *attempts.lock().expect("attempts lock") += 1;
                    std::future::ready(Err(ProviderError::rate_limit("429").with_status(429)))
                }
            },
            record,
        )
        .await;

        let error = result.unwrap_err();
        assert_eq!(error, ProviderError::rate_limit("429").with_status(429));
        assert_eq!(*attempts.lock().unwrap(), 6);

        let delays = sleeps.lock().unwrap().clone();
        assert_eq!(delays.len(), 5);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_backoff_is_capped_over_long_runs() {
        let policy = RetryPolicy::new(12);
        let (sleeps, record) = recorder();

        let _ = execute_with_retry::<(), _, _, _, _>(
            "chat",
            &policy,
            |_| std::future::ready(Err(ProviderError::service_unavailable("503"))),
            record,
        )
        .await;

        let delays = sleeps.lock().unwrap().clone();
        assert_eq!(delays.len(), 11);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let policy = RetryPolicy::default();
        let (sleeps, record) = recorder();

        let result = execute_with_retry(
            "chat",
            &policy,
            |attempt| {
                std::future::ready(if attempt < 3 {
                    Err(ProviderError::connection("reset by peer"))
                } else {
                    Ok(attempt)
                })
            },
            record,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            sleeps.lock().unwrap().clone(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let (sleeps, record) = recorder();
        let mut calls = 0;

        let result = execute_with_retry::<(), _, _, _, _>(
            "chat",
            &policy,
            |_| {
                calls += 1;
                std::future::ready(Err(ProviderError::invalid_request("bad input")))
            },
            record,
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ProviderErrorKind::InvalidRequest);
        assert_eq!(calls, 1);
        assert!(sleeps.lock().unwrap().is_empty());
    }
}
