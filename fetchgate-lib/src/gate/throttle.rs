use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Minimum interval between actions such as manual refreshes
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Lets at most one trigger through per interval.
///
/// ```
/// use fetchgate_lib::gate::Throttle;
/// use std::time::Duration;
///
/// let throttle = Throttle::new(Duration::from_secs(60));
/// assert!(throttle.can_proceed());
/// assert!(!throttle.can_proceed());
/// assert!(throttle.wait_time() > Duration::ZERO);
/// ```
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Create a throttle passing one trigger per `min_interval`
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Whether a trigger may proceed now. A `true` answer starts the next
    /// interval.
    pub fn can_proceed(&self) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Time until a trigger may proceed again, zero if it may right now
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.map_or(Duration::ZERO, |previous| {
            self.min_interval.saturating_sub(previous.elapsed())
        })
    }

    /// Let the next trigger through regardless of the interval
    pub fn reset(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The minimum interval between triggers
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
