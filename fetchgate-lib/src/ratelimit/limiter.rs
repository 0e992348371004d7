use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::config::RateLimitConfig;
use super::window::Window;

/// Sliding-window rate limiter.
///
/// At most `max_requests` fetches may *start* within any trailing `window`.
/// Unlike a fixed bucket that resets on window boundaries, the sliding window
/// never lets a burst at the end of one bucket combine with a burst at the
/// start of the next.
///
/// The start timestamps are kept in a single mutex-protected [`Window`];
/// timestamps older than the window are purged lazily on every check.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    starts: Mutex<Window<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` starts per `window`.
    ///
    /// A `max_requests` of zero would block forever and is raised to one.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            starts: Mutex::new(Window::new(max_requests)),
        }
    }

    /// Wait until starting another fetch would not exceed the limit, then
    /// record the start.
    ///
    /// The lock is released while sleeping. After waking up the check is
    /// repeated, because other workers may have claimed the freed slot in
    /// the meantime.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    log::trace!("Rate limit reached, waiting {}ms", wait.as_millis());
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Record a start if a slot is free right now.
    ///
    /// # Errors
    ///
    /// Returns the time until the oldest start leaves the window if the
    /// limit is currently exhausted. Nothing is recorded in that case.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut starts = self.lock();
        self.purge(&mut starts, now);

        if starts.len() < self.max_requests {
            starts.push(now);
            return Ok(());
        }

        let wait = starts.front().map_or(Duration::ZERO, |oldest| {
            (*oldest + self.window).saturating_duration_since(now)
        });
        // The oldest start is purged once it is exactly `window` old, so a
        // zero wait cannot happen here; guard against spinning anyway.
        Err(wait.max(Duration::from_millis(1)))
    }

    /// Number of starts recorded within the current window
    #[must_use]
    pub fn in_window(&self) -> usize {
        let mut starts = self.lock();
        self.purge(&mut starts, Instant::now());
        starts.len()
    }

    /// Maximum number of starts per window
    #[must_use]
    pub const fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Length of the sliding window
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    fn purge(&self, starts: &mut Window<Instant>, now: Instant) {
        starts.purge_while(|start| now.saturating_duration_since(*start) >= self.window);
    }

    fn lock(&self) -> MutexGuard<'_, Window<Instant>> {
        // The window holds plain timestamps, so it is consistent even if a
        // holder panicked.
        self.starts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<RateLimitConfig> for RateLimiter {
    fn from(config: RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimitConfig::default().into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_limit_does_not_wait() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_oldest_to_expire() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await;
        tokio::time::advance(Duration::from_millis(300)).await;
        limiter.acquire().await;

        // Third start has to wait until the first one slides out at t=1s
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1010), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_reports_wait() {
        let limiter = RateLimiter::new(1, Duration::from_millis(500));
        assert_eq!(limiter.try_acquire(), Ok(()));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(limiter.try_acquire(), Err(Duration::from_millis(300)));
        assert_eq!(limiter.in_window(), 1);

        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(limiter.in_window(), 0);
        assert_eq!(limiter.try_acquire(), Ok(()));
    }

    #[test]
    fn test_zero_limit_is_raised() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.max_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_window_exceeds_limit_under_contention() {
        const LIMIT: usize = 5;
        let limiter = Arc::new(RateLimiter::new(LIMIT, Duration::from_secs(1)));

        // Twice as many callers as the limit, all racing at once
        let callers: Vec<_> = (0..LIMIT * 4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut completions = Vec::new();
        for caller in callers {
            completions.push(caller.await.unwrap());
        }
        completions.sort();

        // Any LIMIT + 1 consecutive completions must span at least a window
        for pair in completions.windows(LIMIT + 1) {
            let span = pair[LIMIT] - pair[0];
            assert!(span >= Duration::from_secs(1), "window saw {} starts", LIMIT + 1);
        }
    }
}
