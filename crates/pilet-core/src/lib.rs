#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Core of the pilet debug session.
//!
//! Resolves configuration, prepares the build cache, drives a bundler
//! session and a dev/mock server through one lifecycle. The build engine and
//! the server are collaborators behind [`bundler::EngineBuilder`] and
//! [`server::ServerBuilder`].

pub mod bundler;
pub mod cache;
pub mod config;
pub mod error;
pub mod externals;
pub mod manifest;
pub mod server;
pub mod session;
pub mod version;

pub use bundler::{Bundle, BuildEngine, BundleFeed, EngineBuilder, EngineConfig};
pub use config::{LogLevel, SessionConfig, SessionOptions};
pub use error::{BuildError, CacheError, ConfigError, ServerError, SessionError};
pub use externals::ExternalsSet;
pub use manifest::ProjectData;
pub use server::{DebugServer, MockServerConfig, ServerBuilder, ServerEvent};
pub use session::{DebugSession, SessionObserver, SessionOpened, SessionState};
pub use version::VERSION;
