use std::path::PathBuf;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Possible errors of a fetch scheduled through `fetchgate_lib`.
///
/// Errors are `Clone` because a single failed fetch may be delivered to
/// several handles that were attached to the same in-flight task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The connection to the provider failed or broke down
    #[error("Network error: {0}")]
    Network(String),

    /// The fetch did not complete within its timeout
    #[error("Fetch timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The provider answered, but with a status code that is not a success
    #[error("Provider rejected the request with status code {0}")]
    RejectedStatusCode(StatusCode),

    /// The provider explicitly asked us to slow down (HTTP 429)
    #[error("Provider is throttling requests{}", match .retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    })]
    ProviderThrottled {
        /// Wait time suggested by the provider, if it sent one
        retry_after: Option<Duration>,
    },

    /// The response could not be decoded into the expected type
    #[error("Cannot decode response: {0}")]
    Decode(String),

    /// A local asset could not be read
    #[error("Failed to read from path: `{}`, reason: {reason}", .path.display())]
    Io {
        /// Path of the asset
        path: PathBuf,
        /// Description of the underlying I/O error
        reason: String,
    },

    /// The task was cancelled by its caller; never delivered to the consumer
    #[error("Fetch was cancelled")]
    Cancelled,

    /// The worker pool stopped before the task could run
    #[error("Worker pool has shut down")]
    Shutdown,

    /// The HTTP client could not be created
    #[error("Failed to create HTTP client: {0}")]
    BuildClient(String),
}

impl ErrorKind {
    /// Whether this error belongs to the network class: the resource could
    /// not be obtained from its provider.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RejectedStatusCode(_)
        )
    }

    /// Whether the provider signalled that we exceeded its rate limit
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        matches!(self, Self::ProviderThrottled { .. })
    }

    /// Whether this is the outcome of an intentional cancellation
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for ErrorKind {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                Self::ProviderThrottled { retry_after: None }
            } else {
                Self::RejectedStatusCode(status)
            }
        } else {
            // Timeouts land here too; the client does not report the
            // configured duration, so keep the message instead.
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ErrorKind {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
