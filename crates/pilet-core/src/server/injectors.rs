//! Injector map of the dev/mock server.
//!
//! Injectors are ordered: the server consults them front to back. After the
//! session injector is merged the order is `script`, the session injector,
//! then every other user injector in declaration order.

use crate::bundler::BundleFeed;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::warn;

/// Fixed key of the session's own injector.
pub const SESSION_INJECTOR: &str = "pilet-core/injectors/pilet.js";

/// Built-in injector that runs user scripts.
pub const SCRIPT_INJECTOR: &str = "script";

/// Injectors enabled when the configuration names none.
pub const DEFAULT_INJECTORS: &[&str] = &[SCRIPT_INJECTOR, "har", "json", "proxy"];

/// The session's live debug-API injector.
#[derive(Debug, Clone, Serialize)]
pub struct PiletInjector {
    pub active: bool,
    /// Handle to the bundles this session produces.
    #[serde(skip)]
    pub bundler: BundleFeed,
    pub port: u16,
    pub root: PathBuf,
    /// Directory the host app is served from.
    pub app: PathBuf,
    /// Routes this injector answers.
    pub handle: Vec<String>,
    /// Pilet API path.
    pub api: String,
    /// Pilet package name, as read from its manifest.
    pub name: String,
    pub version: String,
}

/// One entry of the injector map.
#[derive(Debug, Clone)]
pub enum Injector {
    /// User configuration, opaque to this crate.
    User(Value),
    Session(PiletInjector),
}

impl Injector {
    fn enabled() -> Self {
        let mut map = Map::new();
        map.insert("active".to_string(), Value::Bool(true));
        Self::User(Value::Object(map))
    }

    /// Whether the injector is switched on. User entries without an
    /// `active` flag count as active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            Self::User(value) => value.get("active").and_then(Value::as_bool).unwrap_or(true),
            Self::Session(injector) => injector.active,
        }
    }
}

impl Serialize for Injector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::User(value) => value.serialize(serializer),
            Self::Session(injector) => injector.serialize(serializer),
        }
    }
}

/// Ordered injector name → configuration map.
#[derive(Debug, Clone, Default)]
pub struct InjectorMap {
    entries: Vec<(String, Injector)>,
}

impl InjectorMap {
    /// User injectors from configuration, in declaration order.
    #[must_use]
    pub fn from_user(user: Map<String, Value>) -> Self {
        Self {
            entries: user
                .into_iter()
                .map(|(name, value)| (name, Injector::User(value)))
                .collect(),
        }
    }

    /// The default set, each entry enabled.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            entries: DEFAULT_INJECTORS
                .iter()
                .map(|name| ((*name).to_string(), Injector::enabled()))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Injector> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, injector)| injector)
    }

    /// The session injector, once merged.
    #[must_use]
    pub fn session(&self) -> Option<&PiletInjector> {
        match self.get(SESSION_INJECTOR) {
            Some(Injector::Session(injector)) => Some(injector),
            _ => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Injector)> {
        self.entries.iter().map(|(name, injector)| (name.as_str(), injector))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert the session injector under [`SESSION_INJECTOR`].
    ///
    /// User entries under other keys are kept unchanged. A missing `script`
    /// entry is synthesized as enabled. Merging again replaces only the
    /// session entry.
    pub fn merge_session_injector(&mut self, injector: PiletInjector) {
        let mut script = None;
        let mut rest = Vec::with_capacity(self.entries.len());

        for (name, entry) in self.entries.drain(..) {
            if name == SCRIPT_INJECTOR {
                script = Some(entry);
            } else if name == SESSION_INJECTOR {
                if matches!(entry, Injector::User(_)) {
                    warn!(key = SESSION_INJECTOR, "user injector uses the reserved session key, replacing it");
                }
            } else {
                rest.push((name, entry));
            }
        }

        self.entries.push((
            SCRIPT_INJECTOR.to_string(),
            script.unwrap_or_else(Injector::enabled),
        ));
        self.entries
            .push((SESSION_INJECTOR.to_string(), Injector::Session(injector)));
        self.entries.extend(rest);
    }
}

impl Serialize for InjectorMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, injector) in &self.entries {
            map.serialize_entry(name, injector)?;
        }
        map.end()
    }
}
