use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Quiet period used by interactive inputs such as search-as-you-type
pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(300);

type Action = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    generation: u64,
    pending: Option<Action>,
    timer: Option<JoinHandle<()>>,
    last_fire: Option<Instant>,
}

/// Collapses a burst of triggers into one execution of the last action.
///
/// Every [`trigger`](Debouncer::trigger) cancels the pending execution and
/// restarts the delay. The action of the last trigger runs once the delay
/// passes without another trigger.
pub struct Debouncer {
    delay: Duration,
    state: Arc<Mutex<State>>,
}

impl Debouncer {
    /// Create a debouncer waiting `delay` for quiet
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Schedule `action`, replacing the pending one if there is any
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn trigger(&self, action: impl FnOnce() + Send + 'static) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.pending = Some(Box::new(action));
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let generation = state.generation;
        let delay = self.delay;
        let shared = self.state.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let action = {
                let mut state = lock(&shared);
                // A newer trigger owns the pending action now
                if state.generation != generation {
                    return;
                }
                state.timer = None;
                state.last_fire = Some(Instant::now());
                state.pending.take()
            };
            if let Some(action) = action {
                action();
            }
        }));
    }

    /// Drop the pending action, if any
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.pending = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    /// Whether an action is waiting for the delay to pass
    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    /// When the last action ran
    #[must_use]
    pub fn last_fire(&self) -> Option<Instant> {
        lock(&self.state).last_fire
    }

    /// The quiet period
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .finish()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_last_action_once() {
        let debouncer = Debouncer::new(DEFAULT_DEBOUNCE_DELAY);
        let runs = Arc::new(Mutex::new(Vec::new()));

        for query in ["d", "du", "dun", "dune"] {
            let runs = runs.clone();
            debouncer.trigger(move || runs.lock().unwrap().push(query));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(runs.lock().unwrap().is_empty());
        assert!(debouncer.is_pending());

        tokio::time::sleep(DEFAULT_DEBOUNCE_DELAY).await;
        assert_eq!(*runs.lock().unwrap(), vec!["dune"]);
        assert!(!debouncer.is_pending());
        assert!(debouncer.last_fire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_run_separately() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = runs.clone();
            debouncer.trigger(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        debouncer.trigger(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();
        assert!(!debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.last_fire(), None);
    }
}
