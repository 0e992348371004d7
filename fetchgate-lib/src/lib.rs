//! `fetchgate` runs the background fetching of an interactive media browser.
//!
//! It turns "fetch resource X" requests (API calls, image downloads, local
//! asset reads) into non-blocking operations that are deduplicated, cached,
//! throttled to provider limits and executed on a bounded pool of workers.
//! Outcomes are delivered as messages to a single consumer, usually the UI.
//!
//! ```
//! use fetchgate_lib::{FetchConfig, FetchContext, RequestKey, Result, Scheduled, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let ctx = FetchContext::new(FetchConfig::default());
//!   let (charts, mut inbox) = Scheduler::<Vec<String>>::new(&ctx);
//!
//!   let key = RequestKey::endpoint("charts", [("country", "us")]);
//!   charts.schedule(key.clone(), || async { Ok(vec!["Song".to_string()]) });
//!
//!   let delivery = inbox.recv().await.unwrap();
//!   assert_eq!(delivery.outcome?, vec!["Song"]);
//!
//!   // The second request is answered from the cache
//!   assert!(matches!(
//!     charts.schedule(key, || async { Ok(vec![]) }),
//!     Scheduled::Cached(_)
//!   ));
//!   Ok(())
//! }
//! ```

mod busy;
mod cache;
mod config;
mod context;
mod fetcher;
mod inbox;
mod scheduler;
mod task;
mod types;
mod worker_pool;

pub mod fs;
pub mod gate;
pub mod ratelimit;
pub mod retry;

pub use crate::{
    busy::{Busy, BusyGuard},
    cache::ResultCache,
    config::{DEFAULT_CACHE_CAPACITY, DEFAULT_FETCH_TIMEOUT, FetchConfig},
    context::FetchContext,
    fetcher::{DEFAULT_USER_AGENT, HttpFetcher, HttpFetcherBuilder},
    inbox::{Delivery, Inbox},
    scheduler::{Scheduled, Scheduler, SchedulerStats},
    task::{Handle, TaskId, TaskState},
    types::{ErrorKind, RequestKey, Result},
    worker_pool::{DEFAULT_CONCURRENCY, WorkerPool},
};
