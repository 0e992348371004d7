use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::ratelimit::{ClassConfigs, RateLimitConfig};
use crate::retry::DEFAULT_THROTTLE_BACKOFF;
use crate::worker_pool::DEFAULT_CONCURRENCY;

/// Default number of results kept per scheduler
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default time a single fetch may take before it counts as failed
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(6);

/// Settings of a [`FetchContext`](crate::FetchContext).
///
/// Every field is optional when deserializing, e.g. from a TOML file.
/// Durations use `humantime` notation (`"6s"`, `"250ms"`).
#[derive(TypedBuilder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[builder(field_defaults(setter(into)))]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Number of fetches running at the same time
    #[builder(default = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Number of results each scheduler keeps. 0 disables caching.
    #[builder(default = DEFAULT_CACHE_CAPACITY)]
    pub cache_capacity: usize,

    /// Age after which a cached result counts as stale
    #[builder(default)]
    #[serde(with = "humantime_serde")]
    pub cache_max_age: Option<Duration>,

    /// Time a single fetch may take
    #[builder(default = DEFAULT_FETCH_TIMEOUT)]
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Pause before the one retry of a throttled request
    #[builder(default = DEFAULT_THROTTLE_BACKOFF)]
    #[serde(with = "humantime_serde")]
    pub throttle_backoff: Duration,

    /// Rate limit of every class without an override
    #[builder(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-class rate limit overrides
    #[builder(default)]
    pub classes: ClassConfigs,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
