//! Suppression of redundant submissions at the call site.
//!
//! User interaction produces bursts: a keystroke per character in a search
//! box, a scroll event per pixel, repeated clicks on the same tab. The gate
//! drops most of them before they ever reach a [`Scheduler`](crate::Scheduler).
//!
//! - [`Debouncer`]: Runs only the last action of a burst, once the burst has
//!   been quiet for a delay
//! - [`Throttle`]: Lets at most one trigger through per interval
//! - [`Gate`]: Keeps one debouncer and one throttle per call site
//!
//! Suppressed triggers are dropped, not queued.

mod debounce;
mod throttle;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

pub use debounce::{DEFAULT_DEBOUNCE_DELAY, Debouncer};
pub use throttle::{DEFAULT_THROTTLE_INTERVAL, Throttle};

/// Registry of debouncers and throttles, keyed by call site.
///
/// The timing of a site is fixed by its first use; later calls with a
/// different delay or interval reuse the existing guard. Cloning is cheap
/// and clones share the same sites.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    debouncers: Arc<DashMap<String, Arc<Debouncer>>>,
    throttles: Arc<DashMap<String, Arc<Throttle>>>,
}

impl Gate {
    /// Create a gate without any sites
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay` of quiet at `site`.
    ///
    /// A later call for the same site before the delay has passed replaces
    /// `action` and restarts the delay.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn debounce(&self, site: &str, delay: Duration, action: impl FnOnce() + Send + 'static) {
        self.debouncer(site, delay).trigger(action);
    }

    /// The debouncer of `site`, created with `delay` on first use
    #[must_use]
    pub fn debouncer(&self, site: &str, delay: Duration) -> Arc<Debouncer> {
        self.debouncers
            .entry(site.to_string())
            .or_insert_with(|| Arc::new(Debouncer::new(delay)))
            .clone()
    }

    /// The throttle of `site`, created with `min_interval` on first use
    ///
    /// # Examples
    ///
    /// ```
    /// use fetchgate_lib::gate::Gate;
    /// use std::time::Duration;
    ///
    /// let gate = Gate::new();
    /// assert!(gate.throttle("refresh", Duration::from_secs(60)).can_proceed());
    /// assert!(!gate.throttle("refresh", Duration::from_secs(60)).can_proceed());
    /// ```
    #[must_use]
    pub fn throttle(&self, site: &str, min_interval: Duration) -> Arc<Throttle> {
        self.throttles
            .entry(site.to_string())
            .or_insert_with(|| Arc::new(Throttle::new(min_interval)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_throttle_sites_are_independent() {
        let gate = Gate::new();
        assert!(gate.throttle("search", DEFAULT_THROTTLE_INTERVAL).can_proceed());
        assert!(gate.throttle("charts", DEFAULT_THROTTLE_INTERVAL).can_proceed());
        assert!(!gate.throttle("search", DEFAULT_THROTTLE_INTERVAL).can_proceed());
    }

    #[test]
    fn test_first_interval_wins() {
        let gate = Gate::new();
        let first = gate.throttle("tab", Duration::from_secs(1));
        let second = gate.throttle("tab", Duration::from_secs(5));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.min_interval(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_per_site() {
        let gate = Gate::new();
        let fired = Arc::new(Mutex::new(Vec::new()));

        for (site, query) in [("search", "a"), ("filter", "x"), ("search", "ab")] {
            let fired = fired.clone();
            gate.debounce(site, DEFAULT_DEBOUNCE_DELAY, move || {
                fired.lock().unwrap().push(query);
            });
        }

        tokio::time::sleep(DEFAULT_DEBOUNCE_DELAY * 2).await;
        let mut fired = fired.lock().unwrap().clone();
        fired.sort_unstable();
        assert_eq!(fired, vec!["ab", "x"]);
    }
}
