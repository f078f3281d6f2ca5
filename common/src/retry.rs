use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff for transient remote failures.
///
/// Delay before attempt `k` is `min(initial * multiplier^(k-1), max_delay)`,
/// scaled by a uniform random factor in [0.75, 1.25] when jitter is on.
/// Jitter keeps concurrent pipelines from retrying in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first failure
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before retry attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = self.initial_delay.as_secs_f64() * exp;
        let capped = base.min(self.max_delay.as_secs_f64());
        let scaled = if self.jitter {
            capped * rand::random_range(0.75..=1.25)
        } else {
            capped
        };
        Duration::from_secs_f64(scaled)
    }
}

/// Reinvoke `op` until it succeeds, the error is classified non-retryable,
/// or `max_retries` extra attempts are spent. The last error is surfaced.
pub async fn retry<T, E, F, Fut, P>(config: &RetryConfig, is_retryable: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt > config.max_retries || !is_retryable(&err) {
                    return Err(err);
                }
                tokio::time::sleep(config.delay_for(attempt)).await;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// A shared time budget for one provisioning run.
///
/// Cheap to clone; all phases of a run race the same instant.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    pub fn check(&self) -> Result<(), DeadlineExceeded> {
        if self.expired() {
            Err(DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Race `fut` against the remaining budget.
    pub async fn wrap<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        self.check()?;
        tokio::time::timeout(self.remaining(), fut)
            .await
            .map_err(|_| DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter: false,
            ..Default::default()
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let config = no_jitter();
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
        assert_eq!(config.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn jittered_delay_stays_in_band() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let d = config.delay_for(2).as_secs_f64();
            assert!((1.5..=2.5).contains(&d), "delay {d} outside jitter band");
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(&fast(), |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("transient") } else { Ok(n) } }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry(&fast(), |_| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal") }
        })
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(&fast(), |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("failure {n}")) }
        })
        .await;
        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_budget_expires_immediately() {
        let deadline = Deadline::new(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.check(), Err(DeadlineExceeded));
        let wrapped = deadline.wrap(async { 1 }).await;
        assert_eq!(wrapped, Err(DeadlineExceeded));
    }

    #[tokio::test]
    async fn wrap_times_out_slow_operations() {
        let deadline = Deadline::new(Duration::from_millis(20));
        let slow = deadline.wrap(tokio::time::sleep(Duration::from_secs(5)));
        assert_eq!(slow.await, Err(DeadlineExceeded));
    }

    #[tokio::test]
    async fn wrap_passes_through_fast_operations() {
        let deadline = Deadline::new(Duration::from_secs(60));
        assert_eq!(deadline.wrap(async { 7 }).await, Ok(7));
        assert!(!deadline.expired());
    }
}
