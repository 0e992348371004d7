use dashmap::DashMap;
use std::sync::Arc;

use crate::ratelimit::{ClassConfigs, FetchClass, RateLimitConfig, RateLimiter};

/// Registry of rate limiters, one per [`FetchClass`].
///
/// Limiters are created lazily the first time a class is used, from the
/// class-specific overrides if there are any and from the global defaults
/// otherwise. Cloning is cheap and clones share the same limiters.
#[derive(Debug, Clone, Default)]
pub struct LimiterPool {
    /// Map of class to limiter, created on-demand
    limiters: Arc<DashMap<FetchClass, Arc<RateLimiter>>>,

    /// Global configuration for rate limiting defaults
    global_config: RateLimitConfig,

    /// Per-class configuration overrides
    class_configs: Arc<ClassConfigs>,
}

impl LimiterPool {
    /// Create a new `LimiterPool` with the given configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use fetchgate_lib::ratelimit::{ClassConfig, ClassConfigs, LimiterPool, RateLimitConfig};
    ///
    /// let mut overrides = ClassConfigs::new();
    /// overrides.insert("tmdb".into(), ClassConfig { max_requests: Some(40), window: None });
    ///
    /// let pool = LimiterPool::new(RateLimitConfig::default(), overrides);
    /// assert_eq!(pool.limiter(&"tmdb".into()).max_requests(), 40);
    /// assert_eq!(pool.limiter(&"rawg".into()).max_requests(), 10);
    /// ```
    #[must_use]
    pub fn new(global_config: RateLimitConfig, class_configs: ClassConfigs) -> Self {
        Self {
            limiters: Arc::new(DashMap::new()),
            global_config,
            class_configs: Arc::new(class_configs),
        }
    }

    /// Get the limiter for `class`, creating it if this is the first use
    #[must_use]
    pub fn limiter(&self, class: &FetchClass) -> Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.get(class) {
            return limiter.clone();
        }

        let config = self
            .class_configs
            .get(class)
            .map_or(self.global_config, |overrides| {
                overrides.effective(&self.global_config)
            });
        log::debug!(
            "Creating rate limiter for class {class}: {} per {}ms",
            config.max_requests,
            config.window.as_millis()
        );

        // Another worker may have raced us here; keep whichever came first
        self.limiters
            .entry(class.clone())
            .or_insert_with(|| Arc::new(RateLimiter::from(config)))
            .clone()
    }

    /// Wait for a start slot of `class`
    pub async fn acquire(&self, class: &FetchClass) {
        self.limiter(class).acquire().await;
    }

    /// Number of classes that have been used so far
    #[must_use]
    pub fn active_class_count(&self) -> usize {
        self.limiters.len()
    }
}
