//! `pilet clean` command implementation.

use miette::{IntoDiagnostic, Result};
use pilet_core::cache::CacheManager;
use pilet_core::config::{RcFile, DEFAULT_CACHE_DIR};
use pilet_core::manifest::find_manifest;
use std::path::{Path, PathBuf};

/// Remove the build cache of the project containing `cwd`.
///
/// The cache directory comes from `cache_dir`, then the rc-file, then the
/// default, and is resolved against the project root.
pub fn run(cwd: &Path, cache_dir: Option<PathBuf>) -> Result<()> {
    let rc_cache_dir = RcFile::discover(cwd)
        .into_diagnostic()?
        .and_then(|(_, rc)| rc.session.cache_dir);
    let cache_dir = cache_dir
        .or(rc_cache_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

    let root = find_manifest(cwd)
        .and_then(|manifest| manifest.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| cwd.to_path_buf());

    let cache = CacheManager::new(&root, &cache_dir);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    rt.block_on(cache.invalidate()).into_diagnostic()?;

    println!("  Cleaned {}", cache.path().display());
    Ok(())
}
