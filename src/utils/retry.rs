use std::future::Future;

use tokio::time::{sleep, Duration};

use crate::config::OrchestratorConfig;

/// Exponential backoff schedule with a cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is raised to at least one
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy built from the orchestrator section of the config
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(1u32 << shift).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

/// Runs `f` until it succeeds, the error is not retryable, or attempts run out
///
/// Returns the last result together with the number of attempts made.
/// `f` receives the 1-based attempt number.
pub async fn with_retry<F, Fut, T, E, P>(policy: &RetryPolicy, f: F, should_retry: P) -> (Result<T, E>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    with_retry_notify(policy, f, should_retry, |_, _, _| {}).await
}

/// Same as [`with_retry`], calling `on_retry(attempt, error, delay)` before each backoff sleep
pub async fn with_retry_notify<F, Fut, T, E, P, N>(
    policy: &RetryPolicy,
    mut f: F,
    should_retry: P,
    mut on_retry: N,
) -> (Result<T, E>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    N: FnMut(u32, &E, Duration),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f(attempt).await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) => {
                if attempt >= policy.max_attempts || !should_retry(&e) {
                    return (Err(e), attempt);
                }
                let delay = policy.delay_for(attempt);
                on_retry(attempt, &e, delay);
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        }
    }
}
