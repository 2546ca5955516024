//! On-disk build cache.
//!
//! The directory is opaque: it is only ever created by the bundler and
//! deleted wholesale here.

use crate::error::CacheError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Owns the build-cache directory of one session.
#[derive(Debug, Clone)]
pub struct CacheManager {
    path: PathBuf,
}

impl CacheManager {
    /// `cache_dir` is resolved against `root` unless it is absolute.
    #[must_use]
    pub fn new(root: &Path, cache_dir: &Path) -> Self {
        Self {
            path: root.join(cache_dir),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the cache directory tree. An absent directory is not an error.
    pub async fn invalidate(&self) -> Result<(), CacheError> {
        let path = self.path.clone();
        let removed = tokio::task::spawn_blocking(move || {
            pilet_util::fs::remove_dir_all_if_exists(&path)
        })
        .await
        .map_err(|e| CacheError {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| CacheError {
            path: self.path.clone(),
            source,
        })?;

        if removed {
            info!(path = %self.path.display(), "cleared build cache");
        } else {
            debug!(path = %self.path.display(), "build cache already absent");
        }
        Ok(())
    }

    /// Invalidate only when a fresh start was requested.
    pub async fn prepare(&self, fresh: bool) -> Result<(), CacheError> {
        if fresh {
            self.invalidate().await
        } else {
            Ok(())
        }
    }
}
