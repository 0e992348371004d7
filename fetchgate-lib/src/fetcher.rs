//! Ready-made fetch functions for provider APIs and image downloads.
//!
//! [`HttpFetcher`] turns HTTP failures into the [`ErrorKind`] taxonomy and
//! applies the throttled-retry policy of [`crate::retry`]. Rate limiting and
//! the overall fetch timeout are left to the [`Scheduler`](crate::Scheduler)
//! that runs these functions.
//!
//! ```no_run
//! use fetchgate_lib::{FetchConfig, FetchContext, HttpFetcherBuilder, RequestKey, Scheduler};
//! use url::Url;
//!
//! # #[tokio::main]
//! # async fn main() -> fetchgate_lib::Result<()> {
//! let ctx = FetchContext::new(FetchConfig::default());
//! let (images, mut inbox) = Scheduler::new(&ctx);
//! let fetcher = HttpFetcherBuilder::from(ctx.config()).fetcher()?;
//!
//! let url = Url::parse("https://image.tmdb.org/t/p/w342/poster.jpg").unwrap();
//! images.schedule(RequestKey::from(&url), move || async move {
//!     fetcher.get_bytes(&url).await
//! });
//!
//! let delivery = inbox.recv().await.unwrap();
//! println!("{} bytes", delivery.outcome?.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue};
use http::{StatusCode, header};
use serde::de::DeserializeOwned;
use typed_builder::TypedBuilder;
use url::Url;

use crate::retry::{DEFAULT_THROTTLE_BACKOFF, retry_throttled};
use crate::{ErrorKind, FetchConfig, Result};

/// Default user agent, `fetchgate/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("fetchgate/", env!("CARGO_PKG_VERSION"));

/// Builder for [`HttpFetcher`].
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
pub struct HttpFetcherBuilder {
    /// User agent sent with every request
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,

    /// Timeout of a single HTTP request, none by default.
    ///
    /// Fetches run through a scheduler are bounded by its fetch timeout
    /// anyway; this one also applies when the fetcher is used on its own.
    timeout: Option<Duration>,

    /// Pause before retrying a throttled request
    #[builder(default = DEFAULT_THROTTLE_BACKOFF)]
    throttle_backoff: Duration,
}

impl Default for HttpFetcherBuilder {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A builder using the throttle backoff of a [`FetchConfig`].
/// The per-request timeout stays unset; the scheduler's fetch timeout
/// bounds every fetch it runs.
impl From<&FetchConfig> for HttpFetcherBuilder {
    fn from(config: &FetchConfig) -> Self {
        Self::builder()
            .throttle_backoff(config.throttle_backoff)
            .build()
    }
}

impl HttpFetcherBuilder {
    /// Replace the user agent
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Instantiate the [`HttpFetcher`]
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the user agent is not a valid header value or the
    /// TLS backend cannot be initialized.
    pub fn fetcher(self) -> Result<HttpFetcher> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| ErrorKind::BuildClient(e.to_string()))?,
        );

        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers);
        let client = (match self.timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        })
        .build()
        .map_err(|e| ErrorKind::BuildClient(e.to_string()))?;

        Ok(HttpFetcher {
            client,
            timeout: self.timeout,
            throttle_backoff: self.throttle_backoff,
        })
    }
}

/// GETs resources over HTTP. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Option<Duration>,
    throttle_backoff: Duration,
}

impl HttpFetcher {
    /// Pause before the one retry of a throttled request
    #[must_use]
    pub const fn throttle_backoff(&self) -> Duration {
        self.throttle_backoff
    }

    /// GET `url` and decode the response body as JSON
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::ProviderThrottled`] turned into a network error
    /// if the provider throttles twice in a row, with
    /// [`ErrorKind::RejectedStatusCode`] on any other non-success status, and
    /// with [`ErrorKind::Decode`] if the body is not the expected JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        retry_throttled(self.throttle_backoff, || self.json_once(url)).await
    }

    /// GET `url` and return the raw response body, e.g. image bytes
    ///
    /// # Errors
    ///
    /// See [`HttpFetcher::get_json`], except for decoding.
    pub async fn get_bytes(&self, url: &Url) -> Result<Bytes> {
        retry_throttled(self.throttle_backoff, || self.bytes_once(url)).await
    }

    async fn json_once<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let body = self.bytes_once(url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn bytes_once(&self, url: &Url) -> Result<Bytes> {
        log::debug!("GET {url}");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(parse_retry_after);
            return Err(ErrorKind::ProviderThrottled { retry_after });
        }
        if !status.is_success() {
            return Err(ErrorKind::RejectedStatusCode(status));
        }

        response.bytes().await.map_err(|e| self.map_error(e))
    }

    fn map_error(&self, e: reqwest::Error) -> ErrorKind {
        match self.timeout {
            Some(timeout) if e.is_timeout() => ErrorKind::Timeout(timeout),
            _ => ErrorKind::from(e),
        }
    }
}

/// Parse the delay-seconds form of a `Retry-After` header.
/// The value is informational only; the retry uses the fixed backoff.
fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    value
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
        .map(Duration::from_secs)
}
