use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use url::{Url, form_urlencoded};

/// Canonical identity of a fetched resource.
///
/// Two requests with equal keys are treated as the same resource by the cache
/// and by single-flight deduplication, so every constructor canonicalizes its
/// input: query parameters are sorted and URL fragments are dropped.
///
/// Cloning is cheap; the key is reference counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(Arc<str>);

impl RequestKey {
    /// Key for a resource addressed by URL, e.g. an image download.
    ///
    /// ```
    /// use fetchgate_lib::RequestKey;
    /// use url::Url;
    ///
    /// let a = RequestKey::from_url(&Url::parse("https://x.org/p?b=2&a=1#top").unwrap());
    /// let b = RequestKey::from_url(&Url::parse("https://x.org/p?a=1&b=2").unwrap());
    /// assert_eq!(a, b);
    /// ```
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            pairs.sort();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }

        Self(Arc::from(url.as_str()))
    }

    /// Key for an API call identified by an endpoint name and its parameters.
    ///
    /// Parameters are sorted by name, so the order in which a caller supplies
    /// them does not matter. Later duplicates of a name win. Names and values
    /// are form-urlencoded.
    #[must_use]
    pub fn endpoint<I, K, V>(name: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Display,
    {
        let params: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();

        if params.is_empty() {
            return Self(Arc::from(name));
        }

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&params)
            .finish();
        Self(Arc::from(format!("{name}?{query}")))
    }

    /// Key for a local asset, e.g. a bundled placeholder image.
    ///
    /// Relative paths are kept as given since resolving them would depend on
    /// the working directory of the process.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match Url::from_file_path(path) {
            Ok(url) => Self(Arc::from(url.as_str())),
            Err(()) => Self(Arc::from(format!("file:{}", path.display()))),
        }
    }

    /// The canonical string representation of this key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestKey {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for RequestKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&Url> for RequestKey {
    fn from(url: &Url) -> Self {
        Self::from_url(url)
    }
}
