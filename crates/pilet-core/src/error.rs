//! Error taxonomy for a debug session.
//!
//! Fatal kinds (`Config`, `Cache`, `Server`) reject the session's overall
//! result. `BuildError` is recoverable: it is logged and the watch loop stays
//! alive waiting for the next incremental trigger.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration could not be resolved. Aborts before any server starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("entry module not found: {entry} (searched in {target})")]
    EntryNotFound { entry: PathBuf, target: PathBuf },

    #[error("invalid option `{name}`: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("host app `{name}` not found (looked in {searched})")]
    HostAppNotFound { name: String, searched: PathBuf },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            name,
            reason: reason.into(),
        }
    }
}

/// The cache directory could not be cleared.
#[derive(Error, Debug)]
#[error("failed to clear cache directory {path}: {source}")]
pub struct CacheError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// A single build attempt failed.
#[derive(Error, Debug, Clone)]
pub enum BuildError {
    #[error("failed to construct bundler: {0}")]
    Construct(String),

    #[error("build failed: {message}")]
    Failed { message: String },

    #[error("post-processing {path} failed: {message}")]
    PostProcess { path: PathBuf, message: String },
}

impl BuildError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// The dev/mock server failed to bind or crashed while serving.
#[derive(Error, Debug, Clone)]
pub enum ServerError {
    #[error("failed to bind port {port}: {message}")]
    Bind { port: u16, message: String },

    #[error("ssl is configured but not supported by this server")]
    SslUnsupported,

    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("server stopped unexpectedly: {0}")]
    Crashed(String),
}

/// Umbrella error returned by the session coordinator.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

impl SessionError {
    /// Whether the session failed while resolving its configuration.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
