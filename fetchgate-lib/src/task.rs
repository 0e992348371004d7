use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::RequestKey;

/// Identifier of one scheduled request.
///
/// Ids increase monotonically per [`Scheduler`](crate::Scheduler), so a
/// consumer that only cares about the latest request for some view can drop
/// deliveries with a smaller id than the one it is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a fetch task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for a worker slot
    Pending,
    /// Waiting for the rate limiter or running the fetch
    Running,
    /// Finished; the outcome was delivered
    Completed,
    /// Cancelled; the outcome is discarded
    Cancelled,
}

impl TaskState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            _ => Self::Cancelled,
        }
    }
}

/// Per-handle cancellation flag, shared with the delivery for that handle
#[derive(Debug, Clone)]
pub(crate) struct Subscriber {
    pub(crate) id: TaskId,
    cancelled: Arc<AtomicBool>,
}

impl Subscriber {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Returns `false` if it was cancelled before
    fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Attached {
    subscribers: Vec<Subscriber>,
    cancelled: bool,
    finished: bool,
}

/// One fetch in flight, shared by every handle attached to it.
///
/// The task is cancelled only once all of its handles are. The lock makes
/// attaching, cancelling and finishing mutually exclusive, so a handle is
/// either attached before the outcome is taken or is told to start a fetch
/// of its own.
#[derive(Debug)]
pub(crate) struct Flight {
    key: RequestKey,
    state: AtomicU8,
    attached: Mutex<Attached>,
}

impl Flight {
    pub(crate) fn new(key: RequestKey, first: Subscriber) -> Self {
        Self {
            key,
            state: AtomicU8::new(TaskState::Pending as u8),
            attached: Mutex::new(Attached {
                subscribers: vec![first],
                cancelled: false,
                finished: false,
            }),
        }
    }

    pub(crate) const fn key(&self) -> &RequestKey {
        &self.key
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Pending → Running, unless it was cancelled in the meantime
    pub(crate) fn set_running(&self) {
        let _ = self.state.compare_exchange(
            TaskState::Pending as u8,
            TaskState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Attach another handle. Fails if the task already finished or was
    /// cancelled; the caller has to start a new one then.
    pub(crate) fn attach(&self, subscriber: Subscriber) -> bool {
        let mut attached = self.lock();
        if attached.finished || attached.cancelled {
            return false;
        }
        attached.subscribers.push(subscriber);
        true
    }

    /// Mark the task finished and return the handles to deliver to, or
    /// `None` if it was cancelled. `on_success` runs under the lock so that
    /// late attachers can rely on seeing its effect.
    pub(crate) fn finish(&self, on_success: impl FnOnce()) -> Option<Vec<Subscriber>> {
        let mut attached = self.lock();
        attached.finished = true;
        if attached.cancelled {
            self.state.store(TaskState::Cancelled as u8, Ordering::SeqCst);
            return None;
        }
        self.state.store(TaskState::Completed as u8, Ordering::SeqCst);
        on_success();
        Some(attached.subscribers.clone())
    }

    fn subscriber_cancelled(&self) {
        let mut attached = self.lock();
        if attached.finished || attached.cancelled {
            return;
        }
        if attached.subscribers.iter().all(Subscriber::is_cancelled) {
            log::debug!("All handles for {} cancelled, cancelling task", self.key);
            attached.cancelled = true;
            self.state.store(TaskState::Cancelled as u8, Ordering::SeqCst);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Attached> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The caller's grip on a scheduled fetch.
///
/// Pass it to [`Inbox::on_result`](crate::Inbox::on_result) to receive the
/// outcome, or [`cancel`](Handle::cancel) it when the result is no longer
/// wanted (the view was closed, the user typed another character, ...).
#[derive(Debug, Clone)]
pub struct Handle {
    subscriber: Subscriber,
    flight: Arc<Flight>,
}

impl Handle {
    pub(crate) const fn new(subscriber: Subscriber, flight: Arc<Flight>) -> Self {
        Self { subscriber, flight }
    }

    /// Id of this request
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.subscriber.id
    }

    /// Key of the requested resource
    #[must_use]
    pub fn key(&self) -> &RequestKey {
        self.flight.key()
    }

    /// Give up on the result.
    ///
    /// Idempotent and callable from any thread. Cancellation is cooperative:
    /// a fetch that is already running is allowed to finish, but its result
    /// is neither cached nor delivered to this handle. The underlying task
    /// is only cancelled once every handle attached to it is.
    pub fn cancel(&self) {
        if self.subscriber.cancel() {
            log::trace!("Cancelled request {} for {}", self.id(), self.key());
            self.flight.subscriber_cancelled();
        }
    }

    /// Whether [`Handle::cancel`] was called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.subscriber.is_cancelled()
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.subscriber.flag()
    }

    /// State of the request as seen through this handle
    #[must_use]
    pub fn state(&self) -> TaskState {
        match self.flight.state() {
            TaskState::Completed => TaskState::Completed,
            _ if self.is_cancelled() => TaskState::Cancelled,
            state => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flight(id: u64) -> (Subscriber, Arc<Flight>) {
        let subscriber = Subscriber::new(TaskId(id));
        let flight = Arc::new(Flight::new(RequestKey::from("k"), subscriber.clone()));
        (subscriber, flight)
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (subscriber, flight) = flight(1);
        let handle = Handle::new(subscriber, flight);

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_shared_task_needs_all_handles_cancelled() {
        let (first, flight) = flight(1);
        let second = Subscriber::new(TaskId(2));
        assert!(flight.attach(second.clone()));

        let a = Handle::new(first, flight.clone());
        let b = Handle::new(second, flight.clone());

        a.cancel();
        assert!(!flight.is_cancelled());
        assert_eq!(a.state(), TaskState::Cancelled);
        assert_eq!(b.state(), TaskState::Pending);

        b.cancel();
        assert!(flight.is_cancelled());
        assert!(!flight.attach(Subscriber::new(TaskId(3))));
    }

    #[test]
    fn test_finish_returns_subscribers() {
        let (first, flight) = flight(1);
        let handle = Handle::new(first, flight.clone());
        flight.set_running();
        assert_eq!(handle.state(), TaskState::Running);

        let mut ran = false;
        let subscribers = flight.finish(|| ran = true).unwrap();
        assert!(ran);
        assert_eq!(subscribers.len(), 1);
        assert_eq!(handle.state(), TaskState::Completed);

        // Too late to attach or cancel
        assert!(!flight.attach(Subscriber::new(TaskId(2))));
        handle.cancel();
        assert_eq!(handle.state(), TaskState::Completed);
    }

    #[test]
    fn test_finish_after_cancel_discards() {
        let (first, flight) = flight(1);
        Handle::new(first, flight.clone()).cancel();

        let mut ran = false;
        assert!(flight.finish(|| ran = true).is_none());
        assert!(!ran);
        assert_eq!(flight.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_cancelled_task_does_not_run() {
        let (first, flight) = flight(1);
        Handle::new(first, flight.clone()).cancel();
        flight.set_running();
        assert_eq!(flight.state(), TaskState::Cancelled);
    }
}
