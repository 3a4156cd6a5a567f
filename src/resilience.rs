//! Shared resilient-call layer: bounded retries with backoff, and a circuit
//! breaker for dependencies that stay broken longer than a retry loop should
//! wait. Capture, window polling, and classification all go through here
//! instead of hand-rolling their own loops.

use anyhow::Result;
use log::{debug, warn};
use std::future::Future;
use tokio::time::{Duration, Instant};

/// Delay strategy between retry attempts. `attempt` is zero-based: the delay
/// is applied after attempt N fails and before attempt N+1 starts.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    Fixed(Duration),
    /// base, 2*base, 3*base, ...
    Linear(Duration),
    /// base, 2*base, 4*base, ...
    Exponential(Duration),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(base) => base,
            Backoff::Linear(base) => base.saturating_mul(attempt + 1),
            Backoff::Exponential(base) => base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX)),
        }
    }
}

/// Runs `op` up to `max_attempts` times, sleeping per `backoff` between
/// failures. Returns the first success, or the last error once attempts are
/// exhausted. The operation receives the zero-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    backoff: Backoff,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    debug_assert!(max_attempts > 0);
    let mut last_err = None;

    for attempt in 0..max_attempts.max(1) {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{label}: recovered on attempt {}/{}", attempt + 1, max_attempts);
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt + 1 < max_attempts {
                    let delay = backoff.delay(attempt);
                    debug!(
                        "{label}: attempt {}/{} failed ({err:#}), retrying in {delay:?}",
                        attempt + 1,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    warn!("{label}: all {max_attempts} attempts failed: {err:#}");
                }
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{label}: no attempts were made")))
}

/// Consecutive-failure circuit breaker. Closed until `threshold` failures in
/// a row, then open for `cool_down`; the first caller after the cool-down is
/// let through again (half-open) and a success fully closes the circuit.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cool_down: Duration,
    failures: u32,
    open: bool,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cool_down: Duration) -> Self {
        Self {
            threshold,
            cool_down,
            failures: 0,
            open: false,
            last_failure: None,
        }
    }

    /// Whether a call may proceed right now. While open, returns false until
    /// the cool-down has elapsed; then the breaker moves to half-open and the
    /// call is allowed through.
    pub fn try_acquire(&mut self) -> bool {
        if !self.open {
            return true;
        }

        let cooled = self
            .last_failure
            .map(|at| at.elapsed() >= self.cool_down)
            .unwrap_or(true);

        if cooled {
            debug!("circuit breaker half-open after cool-down, allowing a probe call");
            self.open = false;
            self.failures = 0;
            return true;
        }

        false
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.open = false;
    }

    /// Returns true if this failure opened the circuit.
    pub fn record_failure(&mut self) -> bool {
        self.failures += 1;
        self.last_failure = Some(Instant::now());

        if !self.open && self.failures >= self.threshold {
            self.open = true;
            return true;
        }

        false
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", 3, Backoff::Fixed(Duration::from_millis(10)), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    anyhow::bail!("not yet");
                }
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> =
            retry_with_backoff("test", 3, Backoff::Linear(Duration::from_millis(10)), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { anyhow::bail!("always") }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_at_threshold_and_recovers_after_cool_down() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());
        assert!(breaker.is_open());
        assert!(!breaker.try_acquire());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(breaker.try_acquire());
        assert!(!breaker.is_open());

        breaker.record_success();
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn success_resets_consecutive_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }
}
