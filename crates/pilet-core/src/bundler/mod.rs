//! Bundler session.
//!
//! The build engine itself is a collaborator behind [`BuildEngine`]. A
//! [`BundlerSession`] owns one engine scoped to one entry module and turns its
//! builds into a stream of `bundled` outcomes:
//!
//! ```text
//! construct(entry, config) ── BundlerHandle::bundle() ──▶ build #1 ──▶ bundled
//!                                                         │
//!                       engine rebuild trigger (watch) ──▶ build #n ──▶ bundled
//! ```
//!
//! The first build is seeded manually, at most once. Every later build is
//! driven by the engine's own rebuild triggers.

mod feed;
mod postprocess;
pub mod watch;

pub use feed::{BundleFeed, BundlePublisher, BundleReady};
pub use postprocess::{PiletHeader, PostProcess, PILET_HEADER};

use crate::config::{LogLevel, SessionConfig};
use crate::error::BuildError;
use crate::externals::ExternalsSet;
use crate::manifest::ProjectData;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Output directory for debug builds, relative to the project root.
pub const OUT_DIR: &str = "dist";

/// Engine options derived from the session configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Resolved entry module.
    pub entry: PathBuf,
    pub root: PathBuf,
    pub target_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Absolute cache directory.
    pub cache_dir: PathBuf,
    pub log_level: LogLevel,
    pub minify: bool,
    /// Engine-level HMR. Reloads are pushed by the session instead.
    pub hmr: bool,
    pub scope_hoist: bool,
    pub public_url: String,
    pub auto_install: bool,
}

impl EngineOptions {
    #[must_use]
    pub fn from_session(config: &SessionConfig, project: &ProjectData) -> Self {
        Self {
            entry: config.entry_module.clone(),
            root: project.root.clone(),
            target_dir: config.target_dir.clone(),
            out_dir: project.root.join(OUT_DIR),
            cache_dir: project.root.join(&config.cache_dir),
            log_level: config.log_level,
            minify: true,
            hmr: false,
            scope_hoist: config.scope_hoist,
            public_url: "./".to_string(),
            auto_install: config.auto_install,
        }
    }
}

/// Immutable configuration an engine is constructed with.
///
/// Produced by [`ExternalsSet::apply`], so externals are always part of it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub options: EngineOptions,
    pub externals: ExternalsSet,
    /// Standard environment for every build.
    pub env: BTreeMap<String, String>,
}

/// One completed build artifact.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Main output file.
    pub entry: PathBuf,
    pub out_dir: PathBuf,
    /// Every file the build produced.
    pub files: Vec<PathBuf>,
    /// Content fingerprint of `out_dir`.
    pub hash: String,
    pub duration: Duration,
}

impl Bundle {
    /// The main output file's name relative to `out_dir`.
    #[must_use]
    pub fn entry_name(&self) -> String {
        self.entry
            .strip_prefix(&self.out_dir)
            .unwrap_or(&self.entry)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Outcome of a single build.
pub type Bundled = Result<Bundle, BuildError>;

/// The build engine collaborator.
pub trait BuildEngine: Send {
    /// Run one build.
    fn build(&mut self) -> BoxFuture<'_, Bundled>;

    /// The engine's own rebuild triggers (e.g. a file watcher). Each message
    /// carries the paths that changed. Called once; `None` means the engine
    /// never rebuilds on its own.
    fn take_triggers(&mut self) -> Option<mpsc::Receiver<Vec<PathBuf>>> {
        None
    }
}

/// Constructs an engine from its final configuration.
pub trait EngineBuilder: Send {
    fn construct(self, config: EngineConfig) -> Result<Box<dyn BuildEngine>, BuildError>;
}

impl<F> EngineBuilder for F
where
    F: FnOnce(EngineConfig) -> Result<Box<dyn BuildEngine>, BuildError> + Send,
{
    fn construct(self, config: EngineConfig) -> Result<Box<dyn BuildEngine>, BuildError> {
        self(config)
    }
}

/// Manual trigger for the first build.
#[derive(Debug, Clone)]
pub struct BundlerHandle {
    seed: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl BundlerHandle {
    /// Request the first build. Only the first call has an effect; returns
    /// whether this call seeded the session.
    pub fn bundle(&self) -> bool {
        let sender = match self.seed.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => {
                warn!("bundle() called more than once, ignoring");
                false
            }
        }
    }
}

/// One engine bound to one entry module.
pub struct BundlerSession {
    engine: Box<dyn BuildEngine>,
    seed: oneshot::Receiver<()>,
    entry: PathBuf,
}

impl BundlerSession {
    /// Construct the engine. `config` already carries the externals.
    pub fn construct<B: EngineBuilder>(
        builder: B,
        config: EngineConfig,
    ) -> Result<(Self, BundlerHandle), BuildError> {
        let entry = config.options.entry.clone();
        debug!(
            entry = %entry.display(),
            externals = config.externals.len(),
            "constructing bundler"
        );
        let engine = builder.construct(config)?;
        let (tx, rx) = oneshot::channel();
        Ok((
            Self {
                engine,
                seed: rx,
                entry,
            },
            BundlerHandle {
                seed: Arc::new(Mutex::new(Some(tx))),
            },
        ))
    }

    /// Drive builds until the engine stops triggering or `events` is closed.
    ///
    /// Waits for the manual seed first. Triggers that queue up while a build
    /// runs are coalesced into the next build.
    pub async fn run(mut self, events: mpsc::Sender<Bundled>) {
        if self.seed.await.is_err() {
            debug!("bundler handle dropped before the first build");
            return;
        }

        let mut triggers = self.engine.take_triggers();
        let mut build = 1u64;

        loop {
            info!(build, entry = %self.entry.display(), "bundling");
            let outcome = self.engine.build().await;
            if events.send(outcome).await.is_err() {
                return;
            }

            let Some(rx) = triggers.as_mut() else {
                return;
            };
            let Some(mut changed) = rx.recv().await else {
                return;
            };
            while let Ok(more) = rx.try_recv() {
                changed.extend(more);
            }
            debug!(files = changed.len(), "rebuild triggered");
            build += 1;
        }
    }
}
