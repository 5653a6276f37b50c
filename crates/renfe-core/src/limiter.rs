//! Process-wide request admission gate
//!
//! One [`RateLimiter`] is shared (behind an `Arc`) by every concurrent
//! scrape. It knows nothing about the protocol; it only decides when the
//! next request may be sent.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::config::RateLimitConfig;

/// Length of the admission window
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct LimiterState {
    /// Admission instant of the most recent request from any scrape
    last_request: Option<Instant>,
    /// Admissions inside the trailing window, oldest first
    window: VecDeque<Instant>,
    consecutive_errors: u32,
    last_error: Option<Instant>,
}

/// Rate limiter bounding requests per minute with a minimum spacing and
/// exponential backoff after errors.
///
/// `record_error` and `record_success` are synchronous, so dropping a scrape
/// mid-flight never leaves the counters half-updated.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Example
    /// ```
    /// use renfe_core::config::RateLimitConfig;
    /// use renfe_core::limiter::RateLimiter;
    ///
    /// let limiter = RateLimiter::new(RateLimitConfig::default());
    /// assert_eq!(limiter.consecutive_errors(), 0);
    /// ```
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LimiterState> {
        // Counters stay consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until a request may be issued, then record its admission.
    pub async fn acquire(&self) {
        loop {
            let ready_at = {
                let mut state = self.state();
                let now = Instant::now();
                let ready_at = self.ready_at(&mut state, now);
                if ready_at <= now {
                    state.last_request = Some(now);
                    state.window.push_back(now);
                    return;
                }
                ready_at
            };
            // Another scrape may be admitted while we sleep, so re-check.
            sleep_until(ready_at).await;
        }
    }

    /// Wait for admission and return a guard for the request's outcome.
    ///
    /// Dropping the guard before reporting counts as a failed request, so a
    /// cancelled request still feeds the backoff.
    pub async fn admit(&self) -> Admission<'_> {
        self.acquire().await;
        Admission {
            limiter: self,
            pending: true,
        }
    }

    /// Earliest instant at which the next request may be admitted
    fn ready_at(&self, state: &mut LimiterState, now: Instant) -> Instant {
        while let Some(&oldest) = state.window.front() {
            if now.duration_since(oldest) >= WINDOW {
                state.window.pop_front();
            } else {
                break;
            }
        }

        let mut ready = now;

        if let Some(last) = state.last_request {
            ready = ready.max(last + self.config.min_delay);
        }

        // A zero cap behaves as one request per window.
        let cap = self.config.max_requests_per_minute.max(1) as usize;
        if state.window.len() >= cap {
            let idx = state.window.len() - cap;
            ready = ready.max(state.window[idx] + WINDOW);
        }

        if let Some(last_error) = state.last_error {
            ready = ready.max(last_error + self.backoff_for(state.consecutive_errors));
        }

        ready
    }

    /// Record a failed request; later acquisitions back off further.
    pub fn record_error(&self) {
        let mut state = self.state();
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);
        state.last_error = Some(Instant::now());
    }

    /// Record a successful request, clearing the backoff.
    pub fn record_success(&self) {
        let mut state = self.state();
        state.consecutive_errors = 0;
        state.last_error = None;
    }

    /// Current consecutive error count
    pub fn consecutive_errors(&self) -> u32 {
        self.state().consecutive_errors
    }

    /// Backoff applied after the current number of consecutive errors
    pub fn backoff_delay(&self) -> Duration {
        let errors = self.state().consecutive_errors;
        self.backoff_for(errors)
    }

    /// `min(base ^ errors, max)` seconds; zero without errors
    fn backoff_for(&self, errors: u32) -> Duration {
        if errors == 0 {
            return Duration::ZERO;
        }
        let exponent = errors.min(i32::MAX as u32) as i32;
        let secs = self.config.backoff_base.powi(exponent);
        if !secs.is_finite() || secs >= self.config.backoff_max.as_secs_f64() {
            return self.config.backoff_max;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Get the configuration this limiter enforces
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

/// An admitted request whose outcome is not reported yet
#[derive(Debug)]
#[must_use = "report the outcome or the request counts as failed"]
pub struct Admission<'a> {
    limiter: &'a RateLimiter,
    pending: bool,
}

impl Admission<'_> {
    /// The request succeeded; clears the backoff.
    pub fn succeeded(mut self) {
        self.pending = false;
        self.limiter.record_success();
    }

    /// The request failed; extends the backoff.
    pub fn failed(mut self) {
        self.pending = false;
        self.limiter.record_error();
    }

    /// Settle without touching the error counters.
    pub fn release(mut self) {
        self.pending = false;
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.pending {
            self.limiter.record_error();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(min_delay_ms: u64, rpm: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            min_delay: Duration::from_millis(min_delay_ms),
            max_requests_per_minute: rpm,
            ..RateLimitConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = limiter(500, 10);
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_delay_between_requests() {
        let limiter = limiter(500, 1000);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_never_exceeds_max_rpm() {
        let limiter = limiter(0, 10);
        let start = Instant::now();
        let mut admitted = Vec::new();
        for _ in 0..100 {
            limiter.acquire().await;
            admitted.push(start.elapsed());
        }
        for (i, t) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|u| **u < *t + WINDOW)
                .count();
            assert!(in_window <= 10, "{} requests within 60s of {:?}", in_window, t);
        }
        // 100 requests at 10/min need at least 9 full windows.
        assert!(start.elapsed() >= Duration::from_secs(9 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquirers_share_the_window() {
        let limiter = Arc::new(limiter(0, 10));
        let start = Instant::now();
        let handles: Vec<_> = (0..30)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire().await;
                    start.elapsed()
                })
            })
            .collect();
        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();
        for (i, t) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|u| **u < *t + WINDOW)
                .count();
            assert!(in_window <= 10);
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        assert_eq!(limiter.backoff_delay(), Duration::ZERO);

        limiter.record_error();
        assert_eq!(limiter.backoff_delay(), Duration::from_secs(2));

        limiter.record_error();
        assert_eq!(limiter.backoff_delay(), Duration::from_secs(4));

        for _ in 0..10 {
            limiter.record_error();
        }
        assert_eq!(limiter.backoff_delay(), Duration::from_secs(30));

        limiter.record_success();
        assert_eq!(limiter.backoff_delay(), Duration::ZERO);
        assert_eq!(limiter.consecutive_errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_backoff() {
        let limiter = limiter(0, 1000);
        limiter.acquire().await;
        limiter.record_error();
        limiter.record_error();

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(4));

        limiter.record_success();
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rpm_admits_one_request_per_window() {
        let limiter = limiter(0, 0);
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquire_leaves_state_usable() {
        let limiter = limiter(0, 1);
        limiter.acquire().await;

        // Second acquisition must wait a full window; abandon it.
        let pending = tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
        assert!(pending.is_err());

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(58));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_outcomes() {
        let limiter = limiter(0, 1000);

        limiter.admit().await.failed();
        assert_eq!(limiter.consecutive_errors(), 1);

        limiter.admit().await.release();
        assert_eq!(limiter.consecutive_errors(), 1);

        limiter.admit().await.succeeded();
        assert_eq!(limiter.consecutive_errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_admission_counts_as_error() {
        let limiter = limiter(0, 1000);
        {
            let _admission = limiter.admit().await;
        }
        assert_eq!(limiter.consecutive_errors(), 1);
        assert_eq!(limiter.backoff_delay(), Duration::from_secs(2));
    }
}
