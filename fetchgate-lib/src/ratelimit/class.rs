use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::RequestKey;

/// Name of the class a fetch is rate limited under.
///
/// Every provider gets its own class (one for the movie database, one for the
/// game catalog, one for image CDNs, ...) so that each is throttled to its own
/// published limit. Names are normalized to lowercase.
///
/// # Examples
///
/// ```
/// use fetchgate_lib::ratelimit::FetchClass;
/// use url::Url;
///
/// let url = Url::parse("https://Image.TMDB.org/t/p/w342/x.jpg").unwrap();
/// assert_eq!(FetchClass::from(&url).as_str(), "image.tmdb.org");
/// assert_eq!(FetchClass::from("TMDB").as_str(), "tmdb");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FetchClass(String);

/// Class used when the caller does not name one
pub const DEFAULT_CLASS: &str = "default";

impl FetchClass {
    /// Get the class name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FetchClass {
    fn default() -> Self {
        Self(DEFAULT_CLASS.to_string())
    }
}

/// Classify a URL by its host. URLs without a host (e.g. `file:`) fall into
/// the default class.
impl From<&Url> for FetchClass {
    fn from(url: &Url) -> Self {
        url.host_str().map_or_else(Self::default, Self::from)
    }
}

/// Classify a request by the host of its key. Endpoint keys and other keys
/// that are not absolute URLs fall into the default class.
impl From<&RequestKey> for FetchClass {
    fn from(key: &RequestKey) -> Self {
        Url::parse(key.as_str()).map_or_else(|_| Self::default(), |url| Self::from(&url))
    }
}

impl fmt::Display for FetchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FetchClass {
    fn from(name: String) -> Self {
        FetchClass(name.to_lowercase())
    }
}

impl From<&str> for FetchClass {
    fn from(name: &str) -> Self {
        FetchClass(name.to_lowercase())
    }
}

impl From<FetchClass> for String {
    fn from(class: FetchClass) -> Self {
        class.0
    }
}
