use std::sync::Arc;

use crate::ratelimit::LimiterPool;
use crate::{Busy, FetchConfig, WorkerPool};

/// Everything the schedulers of one application share: the worker pool,
/// the rate limiters, the busy flag and the configuration.
///
/// Build one at startup and hand clones to every
/// [`Scheduler`](crate::Scheduler). Cloning is cheap and clones share state.
/// Tests build their own isolated instance.
#[derive(Debug, Clone)]
pub struct FetchContext {
    config: Arc<FetchConfig>,
    pool: WorkerPool,
    limiters: LimiterPool,
    busy: Busy,
}

impl FetchContext {
    /// Create a context from `config`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime, since the worker pool
    /// spawns its dispatcher right away.
    #[must_use]
    pub fn new(config: FetchConfig) -> Self {
        log::debug!(
            "Creating fetch context: {} workers, {} per {}ms",
            config.concurrency,
            config.rate_limit.max_requests,
            config.rate_limit.window.as_millis()
        );
        let pool = WorkerPool::new(config.concurrency);
        let limiters = LimiterPool::new(config.rate_limit, config.classes.clone());
        Self {
            config: Arc::new(config),
            pool,
            limiters,
            busy: Busy::new(),
        }
    }

    /// The configuration this context was built from
    #[must_use]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// The shared worker pool
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// The per-class rate limiters
    #[must_use]
    pub const fn limiters(&self) -> &LimiterPool {
        &self.limiters
    }

    /// The aggregated busy flag of all fetches in this context
    #[must_use]
    pub const fn busy(&self) -> &Busy {
        &self.busy
    }

    /// Stop the worker pool. See [`WorkerPool::shutdown`].
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
