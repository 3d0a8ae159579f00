//! Retry/backoff for wallet backends that inject late or answer slowly.
//!
//! Every call site supplies a bounded [`RetryPolicy`]. The delay before retry
//! `n` (0-based) is `min(max_delay, min_delay * factor^n)`, optionally jittered
//! and clamped back into `[min_delay, max_delay]`.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts, min_delay, max_delay, ..Default::default() }
    }

    pub fn with_factor(mut self, factor: f64) -> Self { self.factor = factor; self }
    pub fn with_jitter(mut self, jitter: bool) -> Self { self.jitter = jitter; self }

    /// Waiting for an extension to inject its object into the page.
    pub fn injection() -> Self {
        Self::new(10, Duration::from_millis(100), Duration::from_secs(1)).with_factor(1.5)
    }

    /// Waiting for a backend to populate its connected-account field.
    pub fn account_population() -> Self {
        Self::new(15, Duration::from_millis(100), Duration::from_secs(2)).with_factor(1.3)
    }

    /// Transient request failures (busy backend, pending prompt).
    pub fn request() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(4))
    }

    /// Policy with a single attempt, i.e. no retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO).with_jitter(false)
    }

    pub fn attempts(&self) -> u32 { self.max_attempts.max(1) }

    /// Un-jittered delay before retry number `retry` (0-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = self.factor.max(1.0).powi(retry.min(64) as i32);
        let millis = (self.min_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let scale = rand::thread_rng().gen_range(0.8..=1.2);
        base.mul_f64(scale).clamp(self.min_delay.min(self.max_delay), self.max_delay)
    }

    /// Upper bound on total sleeping time across all retries.
    pub fn budget(&self) -> Duration {
        (0..self.attempts().saturating_sub(1)).map(|n| self.base_delay(n).mul_f64(if self.jitter { 1.2 } else { 1.0 }).min(self.max_delay)).sum()
    }
}

/// Run `op` until it succeeds or the policy is exhausted, retrying every error.
///
/// `on_retry(error, attempt)` is invoked with the 1-based number of the attempt
/// that just failed, before sleeping.
pub async fn retry<T, E, F, Fut, R>(policy: &RetryPolicy, op: F, on_retry: R) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E, u32),
{
    retry_when(policy, |_| true, op, on_retry).await
}

/// Like [`retry`], but errors rejected by `should_retry` are returned at once.
pub async fn retry_when<T, E, P, F, Fut, R>(policy: &RetryPolicy, should_retry: P, mut op: F, mut on_retry: R) -> Result<T, E>
where
    P: Fn(&E) -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E, u32),
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts || !should_retry(&e) => return Err(e),
            Err(e) => {
                on_retry(&e, attempt);
                let delay = policy.delay_for(attempt - 1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
