//! Per-class rate limiting.
//!
//! Providers publish limits such as "40 requests per 10 seconds". This module
//! keeps fetches within such limits by delaying the *start* of a fetch until
//! the provider's sliding window has room for it.
//!
//! # Architecture
//!
//! - [`FetchClass`]: Names the provider (or any other group) a fetch counts against
//! - [`RateLimiter`]: Sliding-window limiter for a single class
//! - [`LimiterPool`]: Creates and hands out one limiter per class
//! - [`RateLimitConfig`] / [`ClassConfig`]: Global defaults and per-class overrides

mod class;
mod config;
mod limiter;
mod pool;
mod window;

pub use class::{DEFAULT_CLASS, FetchClass};
pub use config::{ClassConfig, ClassConfigs, RateLimitConfig};
pub use limiter::RateLimiter;
pub use pool::LimiterPool;
pub use window::Window;
