//! Resource-URL loading port.
//!
//! The `sys.classpath` cube maps lookup coordinates to URL lists; turning a
//! URL list into a loader is the host's concern. Loader handles are cached
//! per workspace and released on whole-workspace invalidation.

use std::sync::Arc;

use crate::error::Result;

/// A resolved resource loader.
pub trait ResourceLoader: Send + Sync {
    /// Fetches the bytes behind a path relative to the loader's roots.
    fn resolve(&self, path: &str) -> Result<Vec<u8>>;
}

/// Builds resource loaders from the URL lists stored in `sys.classpath`.
pub trait ClasspathPort: Send + Sync {
    /// Builds (or reuses) a loader over the given URL roots.
    fn loader(&self, urls: &[String]) -> Result<Arc<dyn ResourceLoader>>;
}
