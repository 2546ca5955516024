//! Debug server session model.
//!
//! The concrete dev/mock server is a collaborator behind [`DebugServer`].
//! This module owns what the session hands it: the resolved
//! [`MockServerConfig`] with the session injector merged in, and the
//! lifecycle events the server reports back.

mod injectors;

pub use injectors::{
    Injector, InjectorMap, PiletInjector, DEFAULT_INJECTORS, SCRIPT_INJECTOR, SESSION_INJECTOR,
};

use crate::error::ServerError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Default management API path.
pub const MANAGEMENT_API: &str = "/manage-mock-server";

/// Path of the pilet debug API.
pub const PILET_API: &str = "/$pilet-api";

/// Default mocks directory, relative to the target directory.
pub const MOCKS_DIR: &str = "mocks";

/// TLS material for the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslOptions {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// The `server` section of the rc-file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOptions {
    pub directory: Option<PathBuf>,
    pub ssl: Option<SslOptions>,
    /// Path prefix → rewrite target.
    pub map: Option<BTreeMap<String, String>>,
    pub api: Option<String>,
    /// User injectors, carried opaquely in declaration order.
    pub injectors: Option<Map<String, Value>>,
}

/// Final configuration handed to the server builder.
#[derive(Debug, Clone, Serialize)]
pub struct MockServerConfig {
    pub port: u16,
    /// Directory with mock definitions.
    pub directory: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslOptions>,
    pub map: BTreeMap<String, String>,
    /// Management API path.
    pub api: String,
    pub injectors: InjectorMap,
}

impl MockServerConfig {
    /// Apply defaults to the rc-file options.
    ///
    /// `/` and [`PILET_API`] are always mapped to `""`, which means they are
    /// answered locally instead of being rewritten.
    #[must_use]
    pub fn from_options(options: &ServerOptions, port: u16, target_dir: &Path) -> Self {
        let directory = match &options.directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => target_dir.join(dir),
            None => target_dir.join(MOCKS_DIR),
        };

        let mut map = options.map.clone().unwrap_or_default();
        map.insert("/".to_string(), String::new());
        map.insert(PILET_API.to_string(), String::new());

        let injectors = match &options.injectors {
            Some(user) => InjectorMap::from_user(user.clone()),
            None => InjectorMap::defaults(),
        };

        Self {
            port,
            directory,
            ssl: options.ssl.clone(),
            map,
            api: options
                .api
                .clone()
                .unwrap_or_else(|| MANAGEMENT_API.to_string()),
            injectors,
        }
    }
}

/// Where the server ended up listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub protocol: String,
    pub port: u16,
}

impl ServerAddress {
    #[must_use]
    pub fn http(port: u16) -> Self {
        Self {
            protocol: "http".to_string(),
            port,
        }
    }

    /// Base URL, e.g. `http://localhost:1234`.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://localhost:{}", self.protocol, self.port)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Server lifecycle events.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Listening. Sent once.
    Open(ServerAddress),
    /// Stopped. Sent once and terminal.
    Close(Result<(), ServerError>),
}

/// The dev/mock server collaborator.
pub trait DebugServer: Send {
    /// Bind and begin serving in the background. Lifecycle events go to
    /// `events`; an `Err` here means the server never started.
    fn start(
        &mut self,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> BoxFuture<'_, Result<(), ServerError>>;
}

/// Builds a server from its final configuration.
pub trait ServerBuilder: Send {
    fn build(self, config: MockServerConfig) -> Result<Box<dyn DebugServer>, ServerError>;
}

impl<F> ServerBuilder for F
where
    F: FnOnce(MockServerConfig) -> Result<Box<dyn DebugServer>, ServerError> + Send,
{
    fn build(self, config: MockServerConfig) -> Result<Box<dyn DebugServer>, ServerError> {
        self(config)
    }
}
