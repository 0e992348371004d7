use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Error, Result, anyhow};
use clap::builder::PossibleValuesParser;
use clap::builder::TypedValueParser as _;
use clap::Parser;
use fetchgate_lib::ratelimit::{ClassConfigs, RateLimitConfig};
use fetchgate_lib::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_CONCURRENCY, DEFAULT_FETCH_TIMEOUT, DEFAULT_USER_AGENT,
    FetchConfig,
};
use fetchgate_lib::retry::DEFAULT_THROTTLE_BACKOFF;
use serde::Deserialize;
use strum::{Display, VariantNames};
use url::Url;

use crate::verbosity::Verbosity;

/// Configuration file read from the working directory if `--config` is not given
pub(crate) const FETCHGATE_CONFIG_FILE: &str = "fetchgate.toml";

const DEFAULT_MAX_REQUESTS: usize = 10;
const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

const HELP_MSG_CONFIG_FILE: &str =
    "Configuration file to use [default: ./fetchgate.toml, if present]";

/// How outcomes are printed
#[derive(Debug, Deserialize, Default, Clone, Copy, Display, VariantNames, PartialEq, Eq)]
#[non_exhaustive]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub(crate) enum OutputFormat {
    /// One `[OK]` or `[ERR]` line per URL
    #[default]
    Plain,
    /// One JSON object per URL
    Json,
}

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    concurrency: usize = DEFAULT_CONCURRENCY;
    max_requests: usize = DEFAULT_MAX_REQUESTS;
    window: Duration = DEFAULT_WINDOW;
    timeout: Duration = DEFAULT_FETCH_TIMEOUT;
    throttle_backoff: Duration = DEFAULT_THROTTLE_BACKOFF;
    cache_capacity: usize = DEFAULT_CACHE_CAPACITY;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// fetchgate downloads a list of URLs through a cached, rate-limited pool of
/// workers and reports the outcome of each.
///
/// Duplicate URLs are fetched once. Fetches to the same host share one rate
/// limit.
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct FetchOptions {
    /// URLs to fetch
    #[arg(name = "urls", required = true)]
    pub(crate) urls: Vec<Url>,

    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

/// The main configuration for fetchgate
#[derive(Parser, Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Maximum number of fetches running at the same time
    #[arg(long, default_value_t = concurrency())]
    #[serde(default = "concurrency")]
    pub(crate) concurrency: usize,

    /// Maximum number of fetches per host starting within one window
    #[arg(long, default_value_t = max_requests())]
    #[serde(default = "max_requests")]
    pub(crate) max_requests: usize,

    /// Length of the rate limiting window, e.g. `1s` or `500ms`
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    #[serde(default = "window", with = "humantime_serde")]
    pub(crate) window: Duration,

    /// Time a single fetch may take, e.g. `6s`
    #[arg(long, value_parser = humantime::parse_duration, default_value = "6s")]
    #[serde(default = "timeout", with = "humantime_serde")]
    pub(crate) timeout: Duration,

    /// Pause before the one retry of a request the server throttled (HTTP 429)
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2s")]
    #[serde(default = "throttle_backoff", with = "humantime_serde")]
    pub(crate) throttle_backoff: Duration,

    /// Number of fetched results to keep in memory. 0 disables the cache.
    #[arg(long, default_value_t = cache_capacity())]
    #[serde(default = "cache_capacity")]
    pub(crate) cache_capacity: usize,

    /// Age after which a cached result is fetched again, e.g. `5m`
    #[arg(long, value_parser = humantime::parse_duration)]
    #[serde(default, with = "humantime_serde")]
    pub(crate) cache_max_age: Option<Duration>,

    /// User agent sent with every request
    #[arg(short, long, default_value_t = user_agent())]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Output format of the results
    #[arg(
        short,
        long,
        default_value = "plain",
        value_parser = PossibleValuesParser::new(OutputFormat::VARIANTS)
            .map(|s| s.parse::<OutputFormat>().unwrap_or_default())
    )]
    #[serde(default)]
    pub(crate) format: OutputFormat,

    /// Per-host rate limit overrides. Only available in the configuration
    /// file, e.g.
    ///
    /// ```toml
    /// [classes."api.themoviedb.org"]
    /// max_requests = 40
    /// window = "10s"
    /// ```
    #[arg(skip)]
    #[serde(default)]
    pub(crate) classes: ClassConfigs,
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration.
    /// Values given on the command line win.
    pub(crate) fn merge(&mut self, toml: Config) {
        // Classes are only available in TOML
        self.classes = toml.classes;

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..classes,

                // Keys with defaults to assign
                verbose: Verbosity::default(),
                concurrency: DEFAULT_CONCURRENCY,
                max_requests: DEFAULT_MAX_REQUESTS,
                window: DEFAULT_WINDOW,
                timeout: DEFAULT_FETCH_TIMEOUT,
                throttle_backoff: DEFAULT_THROTTLE_BACKOFF,
                cache_capacity: DEFAULT_CACHE_CAPACITY,
                cache_max_age: None,
                user_agent: DEFAULT_USER_AGENT,
                format: OutputFormat::default(),
            }
        }
    }

    /// The library configuration these options describe
    pub(crate) fn fetch_config(&self) -> FetchConfig {
        FetchConfig::builder()
            .concurrency(self.concurrency)
            .cache_capacity(self.cache_capacity)
            .cache_max_age(self.cache_max_age)
            .fetch_timeout(self.timeout)
            .throttle_backoff(self.throttle_backoff)
            .rate_limit(RateLimitConfig {
                max_requests: self.max_requests,
                window: self.window,
            })
            .classes(self.classes.clone())
            .build()
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "plain" | "text" => Ok(OutputFormat::Plain),
            "json" => Ok(OutputFormat::Json),
            _ => Err(anyhow!("Unknown format {format}")),
        }
    }
}
