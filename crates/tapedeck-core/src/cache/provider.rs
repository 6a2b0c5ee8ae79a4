//! Process-wide cache handle

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::{Cache, EvictionPolicy};
use crate::Result;

/// Directory under the application data directory holding cached media
pub const DOWNLOAD_CONTENT_DIRECTORY: &str = "downloads";

/// Default cache root: `<data dir>/tapedeck/downloads`, falling back to the
/// working directory when the platform has no data directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tapedeck")
        .join(DOWNLOAD_CONTENT_DIRECTORY)
}

/// Owner of the single cache handle
///
/// Built once at startup and passed by reference to everything that needs
/// the cache. Every [`get_cache`](Self::get_cache) call returns the same
/// handle.
#[derive(Debug, Clone)]
pub struct CacheProvider {
    cache: Arc<Cache>,
}

impl CacheProvider {
    /// Open the cache at `root` with the given eviction policy
    pub fn open(root: impl AsRef<Path>, policy: EvictionPolicy) -> Result<Self> {
        let root = root.as_ref();
        info!(root = %root.display(), policy = %policy, "Creating media cache");
        let cache = Cache::open(root, policy)?;
        Ok(Self {
            cache: Arc::new(cache),
        })
    }

    /// The shared cache handle
    pub fn get_cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }
}
