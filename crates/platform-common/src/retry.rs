//! Backoff helpers
//!
//! Two flavours: a jittered, bounded delay used to requeue a reconcile that
//! lost an optimistic-concurrency race, and a generic retry loop for startup
//! calls against the API server.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Seconds to wait before retrying a write that hit a conflict
pub const CONFLICT_BACKOFF_SECS: RangeInclusive<u64> = 1..=5;

/// Random delay within [`CONFLICT_BACKOFF_SECS`]
///
/// Spreads competing writers apart so they don't collide again.
pub fn conflict_backoff() -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(CONFLICT_BACKOFF_SECS))
}

/// Configuration for operations that may fail transiently
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = retry forever)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Give up after `attempts` tries
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

/// Run `operation` until it succeeds, doubling the delay between attempts
///
/// Each delay is jittered by 0.5x..1.5x and capped at `max_delay`.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(operation = %operation_name, attempt, error = %e, "giving up after max attempts");
            return Err(e);
        }

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let wait = delay.mul_f64(jitter);
        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = wait.as_millis() as u64,
            "operation failed, retrying"
        );
        tokio::time::sleep(wait).await;
        delay = (delay * 2).min(config.max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn conflict_backoff_stays_in_bounds() {
        for _ in 0..200 {
            let d = conflict_backoff();
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, String> =
            retry_with_backoff(&RetryConfig::default(), "flaky", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("attempt {} failed", n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> =
            retry_with_backoff(&RetryConfig::with_max_attempts(2), "doomed", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("nope".to_string()) }
            })
            .await;
        assert_eq!(result, Err("nope".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
