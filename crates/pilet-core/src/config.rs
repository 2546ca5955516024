//! Session configuration resolution.
//!
//! A [`SessionConfig`] is built once from three layers, highest precedence first:
//!
//! 1. explicit caller options (CLI flags),
//! 2. the locally discovered rc-file (`.piletrc`),
//! 3. built-in defaults.
//!
//! ## rc-file format
//!
//! ```json
//! {
//!   "port": 4000,
//!   "cacheDir": ".cache",
//!   "hmr": true,
//!   "server": {
//!     "api": "/manage-mock-server",
//!     "map": { "/api": "https://example.com/api" },
//!     "injectors": { "json": { "active": true } }
//!   }
//! }
//! ```

use crate::error::ConfigError;
use crate::server::ServerOptions;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const DEFAULT_ENTRY: &str = "./src/index";
pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_CACHE_DIR: &str = ".cache";
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Info;
pub const DEFAULT_HMR: bool = true;
pub const DEFAULT_AUTO_INSTALL: bool = true;
pub const DEFAULT_SCOPE_HOIST: bool = false;
pub const DEFAULT_FRESH: bool = false;
pub const DEFAULT_OPEN: bool = false;

/// rc-file names in priority order.
const RC_FILES: &[&str] = &[".piletrc", ".piletrc.json"];

/// Extensions tried when the entry is given without one.
const ENTRY_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".mjs"];

/// Log verbosity, ordinal 1 to 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Errors = 1,
    Warnings = 2,
    Info = 3,
}

impl LogLevel {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Errors),
            2 => Ok(Self::Warnings),
            3 => Ok(Self::Info),
            other => Err(ConfigError::invalid(
                "logLevel",
                format!("expected 1, 2 or 3, got {other}"),
            )),
        }
    }
}

/// Partial session options. Every field is optional; unset fields fall
/// through to the next layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Entry module, relative to the base directory.
    pub entry: Option<String>,
    /// Port for the dev/mock server.
    pub port: Option<u16>,
    /// Build-cache directory, relative to the project root.
    pub cache_dir: Option<PathBuf>,
    /// Log verbosity (1 to 3).
    pub log_level: Option<u8>,
    /// Clear the cache before the first build.
    pub fresh: Option<bool>,
    /// Open a browser once the server is up.
    pub open: Option<bool>,
    /// Enable scope hoisting in the bundler.
    pub scope_hoist: Option<bool>,
    /// Push reload signals after each build.
    pub hmr: Option<bool>,
    /// Let the bundler install missing dependencies.
    pub auto_install: Option<bool>,
    /// Host app package name or path.
    pub app: Option<String>,
}

impl SessionOptions {
    /// Fill every unset field from `lower`.
    #[must_use]
    pub fn or(self, lower: SessionOptions) -> SessionOptions {
        SessionOptions {
            entry: self.entry.or(lower.entry),
            port: self.port.or(lower.port),
            cache_dir: self.cache_dir.or(lower.cache_dir),
            log_level: self.log_level.or(lower.log_level),
            fresh: self.fresh.or(lower.fresh),
            open: self.open.or(lower.open),
            scope_hoist: self.scope_hoist.or(lower.scope_hoist),
            hmr: self.hmr.or(lower.hmr),
            auto_install: self.auto_install.or(lower.auto_install),
            app: self.app.or(lower.app),
        }
    }
}

/// Contents of a `.piletrc` file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RcFile {
    #[serde(flatten)]
    pub session: SessionOptions,
    /// Mock server section.
    #[serde(default)]
    pub server: ServerOptions,
}

impl RcFile {
    /// Find an rc-file in `dir`.
    #[must_use]
    pub fn find(dir: &Path) -> Option<PathBuf> {
        RC_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Discover and parse the rc-file in `dir`, if any.
    pub fn discover(dir: &Path) -> Result<Option<(PathBuf, RcFile)>, ConfigError> {
        let Some(path) = Self::find(dir) else {
            return Ok(None);
        };

        let source = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let rc = Self::parse(&source).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Some((path, rc)))
    }

    /// Parse rc-file contents. An empty file is an empty configuration.
    pub fn parse(source: &str) -> Result<RcFile, serde_json::Error> {
        if source.trim().is_empty() {
            return Ok(RcFile::default());
        }
        serde_json::from_str(source)
    }
}

/// The fully resolved, immutable session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory the session was started from.
    pub base_dir: PathBuf,
    /// `base_dir` joined with the configured entry, before module lookup.
    pub entry_file: PathBuf,
    /// The entry module located on disk.
    pub entry_module: PathBuf,
    /// Always the directory containing `entry_file`.
    pub target_dir: PathBuf,
    pub log_level: LogLevel,
    pub cache_dir: PathBuf,
    pub fresh: bool,
    pub open: bool,
    pub port: u16,
    pub scope_hoist: bool,
    pub hmr: bool,
    pub auto_install: bool,
    /// Host app reference, if one was given.
    pub app: Option<String>,
    /// rc-file the configuration was read from.
    pub rc_file: Option<PathBuf>,
    /// Mock server options from the rc-file.
    pub server: ServerOptions,
}

impl SessionConfig {
    /// Resolve options against `base_dir`.
    ///
    /// Fails with [`ConfigError`] if the options are malformed or the entry
    /// module cannot be located.
    pub fn resolve(base_dir: &Path, options: SessionOptions) -> Result<Self, ConfigError> {
        let (rc_file, rc) = match RcFile::discover(base_dir)? {
            Some((path, rc)) => {
                debug!(path = %path.display(), "loaded rc-file");
                (Some(path), rc)
            }
            None => (None, RcFile::default()),
        };

        let merged = options.or(rc.session);

        let entry = merged.entry.as_deref().unwrap_or(DEFAULT_ENTRY);
        if entry.trim().is_empty() {
            return Err(ConfigError::invalid("entry", "must not be empty"));
        }
        if entry.contains('\0') {
            return Err(ConfigError::invalid("entry", "must not contain NUL bytes"));
        }

        let entry_file = normalize_path(&base_dir.join(entry));
        let target_dir = entry_file
            .parent()
            .map_or_else(|| base_dir.to_path_buf(), Path::to_path_buf);
        let entry_module = find_entry_module(&entry_file, &target_dir)?;

        let log_level = match merged.log_level {
            Some(level) => LogLevel::try_from(level)?,
            None => DEFAULT_LOG_LEVEL,
        };

        let cache_dir = merged
            .cache_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
        if cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("cacheDir", "must not be empty"));
        }

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            entry_file,
            entry_module,
            target_dir,
            log_level,
            cache_dir,
            fresh: merged.fresh.unwrap_or(DEFAULT_FRESH),
            open: merged.open.unwrap_or(DEFAULT_OPEN),
            port: merged.port.unwrap_or(DEFAULT_PORT),
            scope_hoist: merged.scope_hoist.unwrap_or(DEFAULT_SCOPE_HOIST),
            hmr: merged.hmr.unwrap_or(DEFAULT_HMR),
            auto_install: merged.auto_install.unwrap_or(DEFAULT_AUTO_INSTALL),
            app: merged.app,
            rc_file,
            server: rc.server,
        })
    }
}

/// Locate the entry module for `entry_file`.
///
/// Tries the path as-is, then with each known extension appended, then
/// `index.*` inside it when it names a directory.
pub fn find_entry_module(entry_file: &Path, target_dir: &Path) -> Result<PathBuf, ConfigError> {
    if entry_file.is_file() {
        return Ok(entry_file.to_path_buf());
    }

    for ext in ENTRY_EXTENSIONS {
        let mut candidate = entry_file.as_os_str().to_owned();
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    if entry_file.is_dir() {
        for ext in ENTRY_EXTENSIONS {
            let candidate = entry_file.join(format!("index{ext}"));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(ConfigError::EntryNotFound {
        entry: entry_file.to_path_buf(),
        target: target_dir.to_path_buf(),
    })
}

/// Lexically normalize a path (drop `.`, fold `..`) without touching the disk.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
