use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::ratelimit::FetchClass;

/// Default number of fetches allowed to start per window
const DEFAULT_MAX_REQUESTS: usize = 10;

/// Default length of the sliding window
const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Rate limiting configuration applied to every class without an override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of fetches allowed to start within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Length of the trailing window
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window: default_window(),
        }
    }
}

const fn default_max_requests() -> usize {
    DEFAULT_MAX_REQUESTS
}

const fn default_window() -> Duration {
    DEFAULT_WINDOW
}

/// Per-class configuration overrides
pub type ClassConfigs = HashMap<FetchClass, ClassConfig>;

/// Rate limiting overrides for one fetch class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassConfig {
    /// Maximum number of fetches of this class per window
    pub max_requests: Option<usize>,

    /// Window length for this class
    #[serde(default, with = "humantime_serde")]
    pub window: Option<Duration>,
}

impl ClassConfig {
    /// Resolve the overrides against the global defaults
    #[must_use]
    pub fn effective(&self, global_config: &RateLimitConfig) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.max_requests.unwrap_or(global_config.max_requests),
            window: self.window.unwrap_or(global_config.window),
        }
    }
}
