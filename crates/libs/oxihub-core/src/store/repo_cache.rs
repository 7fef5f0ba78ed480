//! LRU cache of open git repositories.
//!
//! A hub instance can hold thousands of repositories; keeping every git
//! handle open would exhaust file descriptors. The cache bounds open repos
//! and serialises access to each through an `Arc<Mutex<Repository>>`.

use crate::error::Result;
use git2::Repository;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Thread-safe LRU cache for git repositories.
pub struct RepoCache {
    cache: Arc<Mutex<LruCache<PathBuf, Arc<Mutex<Repository>>>>>,
    capacity: usize,
}

/// Each open repo can use tens of file descriptors.
const DEFAULT_CAPACITY: usize = 32;

impl Default for RepoCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RepoCache {
    /// # Panics
    /// Panics if capacity is 0 (a programmer error, not a runtime condition).
    #[allow(clippy::expect_used)]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).expect("cache capacity must be > 0");
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
            capacity,
        }
    }

    /// Get or open the repository at `path`.
    ///
    /// The returned handle must be locked before use; the per-repo mutex is
    /// also what serialises branch compare-and-set during commits.
    pub async fn get(&self, path: &Path) -> Result<Arc<Mutex<Repository>>> {
        let canonical = path.canonicalize()?;

        let mut cache = self.cache.lock().await;

        if let Some(repo) = cache.get(&canonical) {
            debug!(path = %canonical.display(), "repo cache hit");
            return Ok(Arc::clone(repo));
        }

        debug!(path = %canonical.display(), "repo cache miss, opening");
        let repo = Arc::new(Mutex::new(Repository::open(&canonical)?));

        if cache.len() >= self.capacity {
            if let Some((evicted, _)) = cache.pop_lru() {
                debug!(path = %evicted.display(), "evicted repo from cache");
            }
        }
        cache.put(canonical, Arc::clone(&repo));

        Ok(repo)
    }

    /// Drop a repository from the cache (used when a repo is deleted).
    pub async fn evict(&self, path: &Path) {
        if let Ok(canonical) = path.canonicalize() {
            let mut cache = self.cache.lock().await;
            cache.pop(&canonical);
        }
    }
}
