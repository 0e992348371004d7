//! Aggregated "something is loading" state.
//!
//! Many independent fetches (say, five posters loading at once) collapse into
//! one busy flag, so the UI shows a single spinner. Listeners hear about the
//! idle → busy transition when the first fetch starts and about busy → idle
//! when the last one finishes, regardless of how many ran in between.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

type Listener = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct BusyState {
    count: usize,
    listeners: Vec<Listener>,
}

impl BusyState {
    fn notify(&self, busy: bool) {
        for listener in &self.listeners {
            listener(busy);
        }
    }
}

/// Reference-counted busy flag shared by all fetches of a
/// [`FetchContext`](crate::FetchContext).
///
/// Cloning is cheap; clones share the same counter and listeners.
///
/// Listeners are called while the internal lock is held, which keeps
/// notifications in transition order. They must be quick and must not call
/// back into the same `Busy`; posting to a channel (see
/// [`Busy::subscribe_channel`]) is the intended use.
#[derive(Clone, Default)]
pub struct Busy {
    state: Arc<Mutex<BusyState>>,
}

impl Busy {
    /// Create an idle aggregator without listeners
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more running operation
    pub fn start(&self) {
        let mut state = self.lock();
        state.count += 1;
        if state.count == 1 {
            state.notify(true);
        }
    }

    /// Register that an operation finished.
    ///
    /// Extra calls (more finishes than starts, e.g. when a cancellation races
    /// a completion) are ignored; the counter never drops below zero.
    pub fn finish(&self) {
        let mut state = self.lock();
        match state.count {
            0 => log::debug!("Ignoring finish() without a matching start()"),
            1 => {
                state.count = 0;
                state.notify(false);
            }
            _ => state.count -= 1,
        }
    }

    /// [`Busy::start`] now and [`Busy::finish`] when the guard is dropped
    #[must_use = "dropping the guard immediately finishes the operation"]
    pub fn guard(&self) -> BusyGuard {
        self.start();
        BusyGuard { busy: self.clone() }
    }

    /// Whether at least one operation is running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock().count > 0
    }

    /// Number of running operations
    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().count
    }

    /// Force the idle state, e.g. when the screen that started the
    /// operations is torn down. Listeners are told only if it was busy.
    pub fn reset(&self) {
        let mut state = self.lock();
        if state.count > 0 {
            state.count = 0;
            state.notify(false);
        }
    }

    /// Call `listener` with `true` on every idle → busy transition and with
    /// `false` on every busy → idle transition
    pub fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.lock().listeners.push(Box::new(listener));
    }

    /// Receive busy transitions as messages, to be drained on the
    /// consumer's own execution context.
    #[must_use]
    pub fn subscribe_channel(&self) -> UnboundedReceiver<bool> {
        let (tx, rx) = unbounded_channel();
        self.subscribe(move |busy| {
            // A dropped receiver just means nobody is interested anymore
            let _ = tx.send(busy);
        });
        rx
    }

    fn lock(&self) -> MutexGuard<'_, BusyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Busy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Busy")
            .field("count", &state.count)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// RAII guard for one running operation, see [`Busy::guard`]
#[derive(Debug)]
pub struct BusyGuard {
    busy: Busy,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.finish();
    }
}
