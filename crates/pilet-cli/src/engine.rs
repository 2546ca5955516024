//! Process-backed build engine.
//!
//! Runs an esbuild-compatible bundler executable once per build. Rebuilds are
//! triggered by a source watcher on the target directory.

use futures::future::BoxFuture;
use pilet_core::bundler::watch::{watch_sources, SourceWatcher};
use pilet_core::bundler::{
    Bundle, BuildEngine, Bundled, EngineBuilder, EngineConfig, PILET_HEADER,
};
use pilet_core::{BuildError, LogLevel};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Bundler used when none is given.
pub const DEFAULT_BUNDLER: &str = "esbuild";

/// Name of the main output file.
const ENTRY_NAME: &str = "index";

/// Maximum stderr length carried in a build error.
const MAX_ERROR_LEN: usize = 4096;

pub struct ProcessEngine {
    program: PathBuf,
    config: EngineConfig,
    triggers: Option<mpsc::Receiver<Vec<PathBuf>>>,
    _watcher: Option<SourceWatcher>,
    /// Whether the output directory was cleared of earlier runs.
    cleared: bool,
}

impl ProcessEngine {
    /// Builder for [`pilet_core::DebugSession`]. `bundler` is a binary name
    /// looked up in `node_modules/.bin` and `PATH`, or a path.
    pub fn builder(bundler: String) -> impl EngineBuilder {
        move |config: EngineConfig| -> Result<Box<dyn BuildEngine>, BuildError> {
            let engine = Self::construct(&bundler, config, true)?;
            Ok(Box::new(engine))
        }
    }

    fn construct(bundler: &str, config: EngineConfig, watch: bool) -> Result<Self, BuildError> {
        let program = resolve_binary(&config.options.root, bundler).ok_or_else(|| {
            BuildError::Construct(format!(
                "bundler '{bundler}' not found in node_modules/.bin or PATH"
            ))
        })?;
        debug!(program = %program.display(), "resolved bundler");

        if config.options.auto_install {
            trace!("auto-install is left to the bundler");
        }

        let (watcher, triggers) = if watch {
            let ignored = vec![
                config.options.out_dir.clone(),
                config.options.cache_dir.clone(),
            ];
            let (watcher, rx) = watch_sources(&config.options.target_dir, ignored)
                .map_err(|e| BuildError::Construct(format!("failed to watch sources: {e}")))?;
            (Some(watcher), Some(rx))
        } else {
            (None, None)
        };

        Ok(Self {
            program,
            config,
            triggers,
            _watcher: watcher,
            cleared: false,
        })
    }

    /// Command-line arguments for one build.
    fn args(&self) -> Vec<String> {
        let options = &self.config.options;
        let mut args = vec![
            options.entry.display().to_string(),
            "--bundle".to_string(),
            "--format=esm".to_string(),
            "--sourcemap".to_string(),
            // Emitted by the bundler so the source map accounts for it
            format!("--banner:js={PILET_HEADER}"),
            format!("--outdir={}", options.out_dir.display()),
            format!("--entry-names={ENTRY_NAME}"),
            format!("--public-path={}", options.public_url),
            format!("--log-level={}", engine_log_level(options.log_level)),
            "--define:process.env.NODE_ENV=\"development\"".to_string(),
        ];

        if options.minify {
            args.push("--minify".to_string());
        }
        if options.scope_hoist {
            args.push("--tree-shaking=true".to_string());
        }
        for name in self.config.externals.iter() {
            args.push(format!("--external:{name}"));
            args.push(format!("--external:{name}/*"));
        }
        args
    }
}

impl BuildEngine for ProcessEngine {
    fn build(&mut self) -> BoxFuture<'_, Bundled> {
        Box::pin(async move {
            let start = Instant::now();
            let out_dir = self.config.options.out_dir.clone();

            if !self.cleared {
                clear_dir(&out_dir).await.map_err(|e| {
                    BuildError::failed(format!("failed to clear {}: {e}", out_dir.display()))
                })?;
                self.cleared = true;
            }
            tokio::fs::create_dir_all(&out_dir).await.map_err(|e| {
                BuildError::failed(format!("failed to create {}: {e}", out_dir.display()))
            })?;

            let output = Command::new(&self.program)
                .args(self.args())
                .current_dir(&self.config.options.root)
                .envs(&self.config.env)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| {
                    BuildError::failed(format!("failed to run {}: {e}", self.program.display()))
                })?;

            if !output.status.success() {
                return Err(BuildError::failed(failure_message(
                    &output.stderr,
                    output.status.code(),
                )));
            }

            let files = list_outputs(&out_dir);
            let entry = out_dir.join(format!("{ENTRY_NAME}.js"));
            if !files.contains(&entry) {
                return Err(BuildError::failed(format!(
                    "bundler produced no {}",
                    entry.display()
                )));
            }

            Ok(Bundle {
                entry,
                out_dir,
                files,
                hash: String::new(),
                duration: start.elapsed(),
            })
        })
    }

    fn take_triggers(&mut self) -> Option<mpsc::Receiver<Vec<PathBuf>>> {
        self.triggers.take()
    }
}

fn engine_log_level(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Errors => "error",
        LogLevel::Warnings => "warning",
        LogLevel::Info => "info",
    }
}

fn failure_message(stderr: &[u8], code: Option<i32>) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return match code {
            Some(code) => format!("bundler exited with code {code}"),
            None => "bundler was terminated by a signal".to_string(),
        };
    }
    let mut message = stderr.to_string();
    if message.len() > MAX_ERROR_LEN {
        let mut cut = MAX_ERROR_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push_str("...");
    }
    message
}

/// Remove `dir` so that stale outputs are not served as part of the bundle.
async fn clear_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Every file below `out_dir`, sorted.
fn list_outputs(out_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(out_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Resolve the bundler executable.
///
/// A path (anything with more than one component) is used as-is relative to
/// `root`. A bare name is searched in `node_modules/.bin` from `root`
/// upwards, then in `PATH`.
fn resolve_binary(root: &Path, bundler: &str) -> Option<PathBuf> {
    let given = Path::new(bundler);
    if given.is_absolute() || given.components().count() > 1 {
        let path = root.join(given);
        return path.is_file().then_some(path);
    }
    if given.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }

    let mut current = root.to_path_buf();
    loop {
        let candidate = current.join("node_modules").join(".bin").join(bundler);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }

    which::which(bundler).ok()
}
