use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use tokio::sync::mpsc::error::SendError;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};

use crate::{ErrorKind, Result};

/// Default number of fetches running at the same time
pub const DEFAULT_CONCURRENCY: usize = 8;

/// A queued unit of work.
///
/// The dispatcher passes `Ok(())` when a slot is free and the job may run, or
/// the reason it never will. Either way the job gets to report its outcome.
type Job = Box<dyn FnOnce(Result<()>) -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
}

/// Decrements the running counter even if a job panics
struct Running(Arc<Counters>);

impl Drop for Running {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed number of concurrent execution slots with a FIFO queue for the rest.
///
/// Submitted jobs are started strictly in submission order; at most
/// `concurrency` of them run at any time. There are no priorities and the
/// pool never retries a job.
///
/// Cloning is cheap and clones feed the same queue. Jobs can be submitted
/// from any thread, including threads outside the Tokio runtime the pool
/// was created on.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Job>,
    runtime: Handle,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
    concurrency: usize,
}

impl WorkerPool {
    /// Create a pool running at most `concurrency` jobs at once.
    /// A concurrency of 0 is treated as 1.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let slots = Arc::new(Semaphore::new(concurrency));
        let counters = Arc::new(Counters::default());
        let runtime = Handle::current();

        runtime.spawn(dispatch(rx, slots.clone(), counters.clone()));

        Self {
            tx,
            runtime,
            slots,
            counters,
            concurrency,
        }
    }

    /// Queue a job.
    ///
    /// `job` is called exactly once: with `Ok(())` once a slot is free, or
    /// with [`ErrorKind::Shutdown`] if the pool stopped first.
    pub fn submit<F, Fut>(&self, job: F)
    where
        F: FnOnce(Result<()>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Box::new(move |admission| Box::pin(job(admission)));

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if self.slots.is_closed() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            reject(&self.runtime, job);
            return;
        }
        if let Err(SendError(job)) = self.tx.send(job) {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            reject(&self.runtime, job);
        }
    }

    /// Stop starting new jobs.
    ///
    /// Running jobs are left to finish. Queued and later submitted jobs are
    /// told [`ErrorKind::Shutdown`].
    pub fn shutdown(&self) {
        log::debug!("Shutting down worker pool");
        self.slots.close();
    }

    /// Whether [`WorkerPool::shutdown`] was called
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.slots.is_closed()
    }

    /// Number of jobs currently running
    #[must_use]
    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::SeqCst)
    }

    /// Number of jobs waiting for a slot
    #[must_use]
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Maximum number of jobs running at once
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Hand out slots to queued jobs in FIFO order
async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Job>,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            counters.queued.fetch_sub(1, Ordering::SeqCst);
            reject(&Handle::current(), job);
            break;
        };

        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.running.fetch_add(1, Ordering::SeqCst);
        let running = Running(counters.clone());
        tokio::spawn(async move {
            job(Ok(())).await;
            drop(running);
            drop(permit);
        });
    }

    // Pool was shut down: drain what is left so every job hears about it
    rx.close();
    while let Some(job) = rx.recv().await {
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        reject(&Handle::current(), job);
    }
}

fn reject(runtime: &Handle, job: Job) {
    runtime.spawn(job(Err(ErrorKind::Shutdown)));
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::{Notify, oneshot};

    use super::*;

    #[tokio::test]
    async fn test_jobs_start_in_submission_order() {
        let pool = WorkerPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel();
        let mut done_tx = Some(done_tx);

        for i in 0..5 {
            let order = order.clone();
            let done = if i == 4 { done_tx.take() } else { None };
            pool.submit(move |admission| async move {
                assert!(admission.is_ok());
                order.lock().unwrap().push(i);
                if let Some(done) = done {
                    done.send(()).unwrap();
                }
            });
        }

        done_rx.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let release = Arc::new(Notify::new());

        for _ in 0..5 {
            let release = release.clone();
            pool.submit(move |_| async move { release.notified().await });
        }

        // Give the dispatcher time to fill the slots
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.running(), 2);
        assert_eq!(pool.queued(), 3);
        assert_eq!(pool.concurrency(), 2);

        release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.running(), 2);
        assert_eq!(pool.queued(), 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_runs_one_at_a_time() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.concurrency(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let pool = WorkerPool::new(2);
        pool.shutdown();
        assert!(pool.is_shutdown());

        let (tx, rx) = oneshot::channel();
        pool.submit(move |admission| async move {
            tx.send(admission).unwrap();
        });

        assert_eq!(rx.await.unwrap(), Err(ErrorKind::Shutdown));
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_outside_runtime() {
        let pool = WorkerPool::new(2);
        pool.shutdown();

        let (tx, rx) = oneshot::channel();
        let submitter = pool.clone();
        std::thread::spawn(move || {
            submitter.submit(move |admission| async move {
                tx.send(admission).unwrap();
            });
        })
        .join()
        .unwrap();

        assert_eq!(rx.await.unwrap(), Err(ErrorKind::Shutdown));
    }

    #[tokio::test]
    async fn test_queued_jobs_are_rejected_on_shutdown() {
        let pool = WorkerPool::new(1);
        let release = Arc::new(Notify::new());

        let blocker = release.clone();
        pool.submit(move |_| async move { blocker.notified().await });
        let (tx, rx) = oneshot::channel();
        pool.submit(move |admission| async move {
            tx.send(admission).unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.shutdown();

        assert_eq!(rx.await.unwrap(), Err(ErrorKind::Shutdown));
        release.notify_waiters();
    }
}
