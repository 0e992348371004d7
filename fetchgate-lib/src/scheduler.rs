use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::busy::BusyGuard;
use crate::ratelimit::{FetchClass, LimiterPool};
use crate::task::{Flight, Subscriber};
use crate::{
    Delivery, ErrorKind, FetchContext, Handle, Inbox, RequestKey, Result, ResultCache, TaskId,
};

type InFlight = DashMap<RequestKey, Arc<Flight>>;

/// What [`Scheduler::schedule`] did with a request
#[derive(Debug)]
pub enum Scheduled<T> {
    /// The result was cached; nothing was fetched
    Cached(T),
    /// A fetch is pending (new, or an identical one already in flight)
    Pending(Handle),
}

impl<T> Scheduled<T> {
    /// The handle of a pending fetch
    #[must_use]
    pub const fn handle(&self) -> Option<&Handle> {
        match self {
            Self::Cached(_) => None,
            Self::Pending(handle) => Some(handle),
        }
    }
}

/// Counters of a [`Scheduler`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Requests answered from the cache
    pub hits: u64,
    /// Requests that were not cached
    pub misses: u64,
    /// Requests that attached to a fetch already in flight
    pub coalesced: u64,
    /// Fetch functions actually invoked
    pub fetches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    coalesced: AtomicU64,
    fetches: AtomicU64,
}

/// Turns "fetch resource X" requests for results of type `T` into
/// deduplicated, cached, rate limited background fetches.
///
/// A request is answered from the cache if possible. Otherwise it attaches
/// to an identical fetch already in flight, or a new fetch task is queued on
/// the context's worker pool. Outcomes are posted to the [`Inbox`] returned
/// by [`Scheduler::new`].
///
/// Use one scheduler per result type (one for decoded API responses, one for
/// image bytes, ...), all sharing the same [`FetchContext`].
pub struct Scheduler<T> {
    ctx: FetchContext,
    cache: Arc<ResultCache<T>>,
    in_flight: Arc<InFlight>,
    outbox: UnboundedSender<Delivery<T>>,
    next_id: Arc<AtomicU64>,
    counters: Arc<Counters>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            cache: self.cache.clone(),
            in_flight: self.in_flight.clone(),
            outbox: self.outbox.clone(),
            next_id: self.next_id.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("ctx", &self.ctx)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Scheduler<T> {
    /// Create a scheduler and the inbox its outcomes are delivered to
    #[must_use]
    pub fn new(ctx: &FetchContext) -> (Self, Inbox<T>) {
        let config = ctx.config();
        let (outbox, rx) = unbounded_channel();
        let scheduler = Self {
            ctx: ctx.clone(),
            cache: Arc::new(ResultCache::with_max_age(
                config.cache_capacity,
                config.cache_max_age,
            )),
            in_flight: Arc::new(DashMap::new()),
            outbox,
            next_id: Arc::new(AtomicU64::new(1)),
            counters: Arc::default(),
        };
        (scheduler, Inbox::new(rx))
    }

    /// Request the resource identified by `key`, classified for rate
    /// limiting by the host of the key.
    ///
    /// `fetch` is invoked at most once, and not at all if the result is
    /// cached or an identical fetch is already in flight.
    pub fn schedule<F, Fut>(&self, key: RequestKey, fetch: F) -> Scheduled<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let class = FetchClass::from(&key);
        self.schedule_with_class(class, key, fetch)
    }

    /// Like [`Scheduler::schedule`], but rate limited under `class`
    pub fn schedule_with_class<F, Fut>(
        &self,
        class: FetchClass,
        key: RequestKey,
        fetch: F,
    ) -> Scheduled<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let subscriber = Subscriber::new(self.next_id());
        let entry = self.in_flight.entry(key.clone());
        if let Entry::Occupied(entry) = &entry {
            if entry.get().attach(subscriber.clone()) {
                log::debug!("Attaching {} to fetch in flight for {key}", subscriber.id);
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                return Scheduled::Pending(Handle::new(subscriber, entry.get().clone()));
            }
        }

        // A flight that just finished has cached its result under its lock,
        // before it leaves the registry
        if let Some(value) = self.cache.get(&key) {
            log::debug!("Cache hit for {key}");
            return Scheduled::Cached(value);
        }

        let flight = Arc::new(Flight::new(key.clone(), subscriber.clone()));
        entry.insert(flight.clone());

        log::debug!("Cache miss for {key}, queueing fetch {}", subscriber.id);
        self.submit(class, flight.clone(), fetch);
        Scheduled::Pending(Handle::new(subscriber, flight))
    }

    /// The cached result for `key`, if any
    #[must_use]
    pub fn cached(&self, key: &RequestKey) -> Option<T> {
        self.cache.get(key)
    }

    /// Drop the cached result for `key`, so the next request fetches it
    /// again. Returns whether it was cached.
    pub fn invalidate(&self, key: &RequestKey) -> bool {
        self.cache.remove(key)
    }

    /// Number of distinct fetches currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Cache and fetch counters
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            hits: self.cache.hits(),
            misses: self.cache.misses(),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
        }
    }

    fn next_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn submit<F, Fut>(&self, class: FetchClass, flight: Arc<Flight>, fetch: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let task = FetchTask {
            flight,
            class,
            cache: self.cache.clone(),
            in_flight: self.in_flight.clone(),
            outbox: self.outbox.clone(),
            limiters: self.ctx.limiters().clone(),
            timeout: self.ctx.config().fetch_timeout,
            counters: self.counters.clone(),
            _busy: self.ctx.busy().guard(),
        };
        self.ctx
            .pool()
            .submit(move |admission| task.run(admission, fetch));
    }
}

/// One queued fetch. Holds the busy flag up until it is dropped.
struct FetchTask<T> {
    flight: Arc<Flight>,
    class: FetchClass,
    cache: Arc<ResultCache<T>>,
    in_flight: Arc<InFlight>,
    outbox: UnboundedSender<Delivery<T>>,
    limiters: LimiterPool,
    timeout: Duration,
    counters: Arc<Counters>,
    _busy: BusyGuard,
}

impl<T: Clone + Send + 'static> FetchTask<T> {
    async fn run<F, Fut>(self, admission: Result<()>, fetch: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Err(e) = admission {
            self.complete(Err(e));
            return;
        }
        if self.flight.is_cancelled() {
            self.complete(Err(ErrorKind::Cancelled));
            return;
        }

        self.flight.set_running();
        self.limiters.acquire(&self.class).await;

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let outcome = match tokio::time::timeout(self.timeout, fetch()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ErrorKind::Timeout(self.timeout)),
        };
        self.complete(outcome);
    }

    fn complete(self, outcome: Result<T>) {
        let key = self.flight.key().clone();
        let subscribers = self.flight.finish(|| {
            if let Ok(value) = &outcome {
                self.cache.put(key.clone(), value.clone());
            }
        });
        self.in_flight
            .remove_if(&key, |_, flight| Arc::ptr_eq(flight, &self.flight));

        let Some(subscribers) = subscribers else {
            log::trace!("Discarding outcome of cancelled fetch for {key}");
            return;
        };
        if let Err(e) = &outcome {
            log::debug!("Fetch for {key} failed: {e}");
        }

        for subscriber in subscribers {
            if subscriber.is_cancelled() {
                log::trace!("Not delivering {key} to cancelled request {}", subscriber.id);
                continue;
            }
            let delivery = Delivery::new(
                subscriber.id,
                key.clone(),
                outcome.clone(),
                subscriber.flag(),
            );
            if self.outbox.send(delivery).is_err() {
                log::debug!("Inbox is gone, dropping outcome for {key}");
                break;
            }
        }
    }
}
