use std::path::Path;

use bytes::Bytes;

use crate::{ErrorKind, Result};

/// Read a local asset (a bundled placeholder image, say) as a fetch function.
///
/// Pair it with [`RequestKey::from_path`](crate::RequestKey::from_path) so
/// that local and remote images share one cache.
///
/// # Errors
///
/// Returns [`ErrorKind::Io`] if the file cannot be read.
pub async fn read_asset(path: impl AsRef<Path>) -> Result<Bytes> {
    let path = path.as_ref();
    log::debug!("Reading asset {}", path.display());
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| ErrorKind::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
