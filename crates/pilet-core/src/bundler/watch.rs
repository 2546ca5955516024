//! Source watcher for incremental rebuilds.
//!
//! Engines that rebuild on file changes can hand the receiver returned by
//! [`watch_sources`] out from [`BuildEngine::take_triggers`](super::BuildEngine::take_triggers).

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Event coalescing window.
const COALESCE_WINDOW_MS: u64 = 50;

/// Source extensions that trigger a rebuild.
const SOURCE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "css", "scss", "json", "html", "svg", "png",
];

/// Keeps the underlying watcher alive. Dropping it stops watching.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
}

/// Check if a path should never trigger a rebuild.
#[must_use]
pub fn should_ignore(path: &Path, ignored: &[PathBuf]) -> bool {
    if ignored.iter().any(|dir| path.starts_with(dir)) {
        return true;
    }

    if path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("node_modules" | ".git" | "dist" | ".cache")
        )
    }) {
        return true;
    }

    if let Some(name) = path.file_name() {
        if name.to_string_lossy().starts_with('.') {
            return true;
        }
    }

    !path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Watch `root` recursively. Changed paths arrive in coalesced batches.
///
/// Anything below a directory in `ignored` (typically the output and cache
/// directories) is filtered out so builds do not retrigger themselves.
pub fn watch_sources(
    root: &Path,
    ignored: Vec<PathBuf>,
) -> notify::Result<(SourceWatcher, mpsc::Receiver<Vec<PathBuf>>)> {
    let (raw_tx, raw_rx) = std_mpsc::channel::<notify::Result<Event>>();
    let (tx, rx) = mpsc::channel(16);

    let mut watcher = RecommendedWatcher::new(raw_tx, Config::default())?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    debug!(root = %root.display(), "watching sources");

    std::thread::spawn(move || coalesce(&raw_rx, &tx, &ignored));

    Ok((SourceWatcher { _watcher: watcher }, rx))
}

fn coalesce(
    raw_rx: &std_mpsc::Receiver<notify::Result<Event>>,
    tx: &mpsc::Sender<Vec<PathBuf>>,
    ignored: &[PathBuf],
) {
    let window = Duration::from_millis(COALESCE_WINDOW_MS);
    let mut pending: HashSet<PathBuf> = HashSet::new();

    loop {
        // Block for the first event, then gather whatever follows within the window
        let first = match raw_rx.recv() {
            Ok(event) => event,
            Err(_) => return,
        };
        collect(first, ignored, &mut pending);

        loop {
            match raw_rx.recv_timeout(window) {
                Ok(event) => collect(event, ignored, &mut pending),
                Err(std_mpsc::RecvTimeoutError::Timeout) => break,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }

        if pending.is_empty() {
            continue;
        }

        let mut changed: Vec<PathBuf> = pending.drain().collect();
        changed.sort();
        if tx.blocking_send(changed).is_err() {
            return;
        }
    }
}

fn collect(event: notify::Result<Event>, ignored: &[PathBuf], pending: &mut HashSet<PathBuf>) {
    match event {
        Ok(event) => {
            for path in event.paths {
                if !should_ignore(&path, ignored) {
                    pending.insert(path);
                }
            }
        }
        Err(e) => warn!(error = %e, "watch error"),
    }
}
