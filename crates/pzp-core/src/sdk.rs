//! Vendor SDK plumbing.
//!
//! Vendor SDKs are modelled as backend traits in each driver crate. A Piece
//! receives an [`SdkLoader`] that produces the backend on first use; the
//! result is stored in the puzzle's globals under the vendor key so every
//! Piece of that vendor shares one instance.
//!
//! SDK calls are blocking. [`run_blocking`] moves them off the async runtime.

use crate::error::{PieceError, PieceResult};
use std::path::PathBuf;
use std::sync::Arc;

/// Produces an SDK backend.
pub type SdkLoader<T> = Arc<dyn Fn() -> PieceResult<T> + Send + Sync>;

/// Loader that always fails with [`PieceError::BackendMissing`].
///
/// Used when no native binding is compiled in; the message names the SDK
/// and the directory it was expected in.
pub fn unavailable<T>(sdk: &str, dir: Option<PathBuf>) -> SdkLoader<T> {
    let message = match dir {
        Some(dir) => format!("{sdk} (looked in {})", dir.display()),
        None => format!("{sdk} (no SDK directory configured)"),
    };
    Arc::new(move || Err(PieceError::BackendMissing(message.clone())))
}

/// Loader returning a fixed backend.
pub fn fixed<T: Clone + Send + Sync + 'static>(backend: T) -> SdkLoader<T> {
    Arc::new(move || Ok(backend.clone()))
}

/// Run a blocking SDK call on the blocking thread pool.
pub async fn run_blocking<T, F>(f: F) -> PieceResult<T>
where
    F: FnOnce() -> PieceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PieceError::Other(anyhow::anyhow!("blocking task failed: {e}")))?
}
