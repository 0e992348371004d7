//! Consumer side of result delivery.
//!
//! Workers never call back into the consumer. They post a [`Delivery`] to a
//! channel, and the consumer drains it on its own execution context (its UI
//! loop, say) with [`Inbox::pump`] or [`Inbox::recv`]. Callbacks registered
//! with [`Inbox::on_result`] therefore run on the consumer's side and do not
//! need to be `Send`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::{Handle, RequestKey, Result, TaskId};

/// A registered callback and the cancel flag of the handle it waits for
struct Callback<T> {
    run: Box<dyn FnOnce(Result<T>)>,
    cancelled: Arc<AtomicBool>,
}

impl<T> Callback<T> {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The outcome of one scheduled request, as posted by a worker
pub struct Delivery<T> {
    /// Id of the request
    pub id: TaskId,
    /// Key of the fetched resource
    pub key: RequestKey,
    /// The fetched value or the reason the fetch failed
    pub outcome: Result<T>,
    cancelled: Arc<AtomicBool>,
}

impl<T> Delivery<T> {
    pub(crate) const fn new(
        id: TaskId,
        key: RequestKey,
        outcome: Result<T>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            key,
            outcome,
            cancelled,
        }
    }

    /// Whether the handle of this request was cancelled after the worker
    /// posted it
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl<T: fmt::Debug> fmt::Debug for Delivery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

/// Receiving end of a [`Scheduler`](crate::Scheduler).
///
/// Deliveries whose handle was cancelled are dropped here, even if the
/// cancellation happened after the worker posted them. Callbacks of
/// cancelled handles are dropped on the next [`Inbox::pump`], whether or not
/// a delivery ever arrives for them.
///
/// [`Inbox::pump`] with callbacks and [`Inbox::recv`] can be mixed: a
/// delivery that `pump` kept because it had no callback yet is returned by
/// the next `recv`.
pub struct Inbox<T> {
    rx: UnboundedReceiver<Delivery<T>>,
    callbacks: HashMap<TaskId, Callback<T>>,
    unclaimed: HashMap<TaskId, Delivery<T>>,
}

impl<T> Inbox<T> {
    pub(crate) fn new(rx: UnboundedReceiver<Delivery<T>>) -> Self {
        Self {
            rx,
            callbacks: HashMap::new(),
            unclaimed: HashMap::new(),
        }
    }

    /// Call `callback` with the outcome of `handle`'s request.
    ///
    /// The callback runs during a later [`Inbox::pump`], or right away if
    /// the outcome was already pumped. It never runs if the handle is
    /// cancelled.
    pub fn on_result(&mut self, handle: &Handle, callback: impl FnOnce(Result<T>) + 'static) {
        if handle.is_cancelled() {
            self.callbacks.remove(&handle.id());
            self.unclaimed.remove(&handle.id());
            return;
        }
        match self.unclaimed.remove(&handle.id()) {
            Some(delivery) => callback(delivery.outcome),
            None => {
                self.callbacks.insert(
                    handle.id(),
                    Callback {
                        run: Box::new(callback),
                        cancelled: handle.cancel_flag(),
                    },
                );
            }
        }
    }

    /// Dispatch every delivery that is ready, without waiting.
    ///
    /// Deliveries without a registered callback are kept until one is
    /// registered. Returns the number of callbacks invoked.
    pub fn pump(&mut self) -> usize {
        self.prune_cancelled();
        let mut dispatched = 0;
        while let Ok(delivery) = self.rx.try_recv() {
            if self.dispatch(delivery) {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Wait for the next delivery of a request that is still wanted.
    ///
    /// This bypasses registered callbacks. Returns `None` once the
    /// scheduler and all of its workers are gone.
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        self.prune_cancelled();
        if let Some(id) = self.unclaimed.keys().min().copied() {
            return self.unclaimed.remove(&id);
        }
        while let Some(delivery) = self.rx.recv().await {
            if delivery.is_cancelled() {
                log::trace!("Dropping delivery {} of cancelled request", delivery.id);
                self.callbacks.remove(&delivery.id);
                continue;
            }
            return Some(delivery);
        }
        None
    }

    /// Number of callbacks waiting for their delivery. Callbacks of
    /// cancelled handles are not counted.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.values().filter(|cb| !cb.is_cancelled()).count()
    }

    /// Forget callbacks and kept deliveries of cancelled handles. A cancelled
    /// task never posts a delivery, so nothing else would remove them.
    fn prune_cancelled(&mut self) {
        self.callbacks.retain(|id, cb| {
            if cb.is_cancelled() {
                log::trace!("Dropping callback of cancelled request {id}");
            }
            !cb.is_cancelled()
        });
        self.unclaimed.retain(|_, delivery| !delivery.is_cancelled());
    }

    fn dispatch(&mut self, delivery: Delivery<T>) -> bool {
        if delivery.is_cancelled() {
            log::trace!("Dropping delivery {} of cancelled request", delivery.id);
            self.callbacks.remove(&delivery.id);
            return false;
        }
        match self.callbacks.remove(&delivery.id) {
            Some(callback) => {
                (callback.run)(delivery.outcome);
                true
            }
            None => {
                self.unclaimed.insert(delivery.id, delivery);
                false
            }
        }
    }
}

impl<T> fmt::Debug for Inbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox")
            .field("callbacks", &self.callbacks.len())
            .field("unclaimed", &self.unclaimed.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::Semaphore;

    use crate::{FetchConfig, FetchContext, RequestKey, Scheduler};

    async fn settle<T: Clone + Send + 'static>(scheduler: &Scheduler<T>) {
        while scheduler.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_callback_of_cancelled_task_is_dropped() {
        let ctx = FetchContext::new(FetchConfig::default());
        let (scheduler, mut inbox) = Scheduler::<u32>::new(&ctx);
        let release = Arc::new(Semaphore::new(0));

        let gate = release.clone();
        let scheduled = scheduler.schedule(RequestKey::from("backdrop"), move || async move {
            gate.acquire().await.unwrap().forget();
            Ok(1)
        });
        let handle = scheduled.handle().unwrap().clone();
        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        inbox.on_result(&handle, move |_| flag.set(true));

        handle.cancel();
        release.add_permits(1);
        settle(&scheduler).await;

        assert_eq!(inbox.pump(), 0);
        assert_eq!(inbox.pending_callbacks(), 0);
        assert!(inbox.callbacks.is_empty());
        assert!(!called.get());
    }

    #[tokio::test]
    async fn test_callback_of_cancelled_attached_handle_is_dropped() {
        let ctx = FetchContext::new(FetchConfig::default());
        let (scheduler, mut inbox) = Scheduler::<u32>::new(&ctx);
        let release = Arc::new(Semaphore::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let gate = release.clone();
            let scheduled = scheduler.schedule(RequestKey::from("poster"), move || async move {
                gate.acquire().await.unwrap().forget();
                Ok(7)
            });
            handles.push(scheduled.handle().unwrap().clone());
        }
        let results = Rc::new(Cell::new(0));
        for handle in &handles {
            let sink = results.clone();
            inbox.on_result(handle, move |_| sink.set(sink.get() + 1));
        }

        handles[0].cancel();
        release.add_permits(1);
        settle(&scheduler).await;

        assert_eq!(inbox.pump(), 1);
        assert_eq!(results.get(), 1);
        assert!(inbox.callbacks.is_empty());
    }

    #[tokio::test]
    async fn test_recv_returns_deliveries_kept_by_pump() {
        let ctx = FetchContext::new(FetchConfig::default());
        let (scheduler, mut inbox) = Scheduler::<u32>::new(&ctx);

        let scheduled = scheduler.schedule(RequestKey::from("genres"), || async { Ok(3) });
        let id = scheduled.handle().unwrap().id();
        settle(&scheduler).await;
        assert_eq!(inbox.pump(), 0);

        let delivery = inbox.recv().await.unwrap();
        assert_eq!(delivery.id, id);
        assert_eq!(delivery.outcome, Ok(3));
        assert!(inbox.unclaimed.is_empty());
    }
}
