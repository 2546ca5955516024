//! Project manifest discovery.
//!
//! Locates the pilet's `package.json` (its directory is the project root) and,
//! when one is referenced, the host app package whose peer dependencies the
//! pilet must not bundle.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MANIFEST: &str = "package.json";
const DEFAULT_APP_FILE: &str = "index.html";

/// The subset of `package.json` this crate reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
    /// Host app reference of a pilet (`{ "host": { "name": "my-app" } }`).
    #[serde(default)]
    pub host: Option<HostRef>,
    /// App file of a host package, relative to its directory.
    #[serde(default)]
    pub app: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostRef {
    pub name: String,
}

impl PackageManifest {
    /// Read and parse a manifest file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A located host application package.
#[derive(Debug, Clone)]
pub struct HostApp {
    /// Package name as declared in its manifest.
    pub name: String,
    /// Directory holding the host's `package.json`.
    pub root: PathBuf,
    pub manifest: PackageManifest,
    /// The host's app file (its HTML shell).
    pub app_file: PathBuf,
}

impl HostApp {
    /// Load the host package rooted at `root`.
    fn load(root: PathBuf) -> Result<Self, ConfigError> {
        let manifest = PackageManifest::read(&root.join(MANIFEST))?;
        let app_file = root.join(manifest.app.as_deref().unwrap_or(DEFAULT_APP_FILE));
        Ok(Self {
            name: manifest.name.clone(),
            root,
            manifest,
            app_file,
        })
    }

    /// Directory containing the app file.
    #[must_use]
    pub fn app_dir(&self) -> &Path {
        self.app_file.parent().unwrap_or(&self.root)
    }
}

/// Everything the session needs to know about the project on disk.
#[derive(Debug, Clone)]
pub struct ProjectData {
    /// Directory of the pilet's `package.json`.
    pub root: PathBuf,
    /// The pilet manifest. Empty when the project has none.
    pub manifest: PackageManifest,
    pub host: Option<HostApp>,
}

impl ProjectData {
    /// Discover project data starting from `target_dir`.
    ///
    /// `app` overrides the host reference from the pilet manifest. It may be a
    /// package name (looked up in `node_modules`) or a path to the host package.
    pub fn retrieve(target_dir: &Path, app: Option<&str>) -> Result<Self, ConfigError> {
        let (root, manifest) = match find_manifest(target_dir) {
            Some(path) => {
                let manifest = PackageManifest::read(&path)?;
                let root = path
                    .parent()
                    .map_or_else(|| target_dir.to_path_buf(), Path::to_path_buf);
                (root, manifest)
            }
            None => {
                warn!(target = %target_dir.display(), "no package.json found, using target directory as root");
                (target_dir.to_path_buf(), PackageManifest::default())
            }
        };

        let host_ref = app
            .map(str::to_string)
            .or_else(|| manifest.host.as_ref().map(|h| h.name.clone()));

        let host = match host_ref {
            Some(reference) => Some(locate_host(&root, &reference)?),
            None => None,
        };

        if let Some(host) = &host {
            debug!(name = %host.name, root = %host.root.display(), "located host app");
        }

        Ok(Self {
            root,
            manifest,
            host,
        })
    }

    /// Peer dependency names declared by the pilet and its host, sorted and deduplicated.
    #[must_use]
    pub fn peer_dependencies(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.manifest.peer_dependencies.keys().cloned().collect();
        if let Some(host) = &self.host {
            names.extend(host.manifest.peer_dependencies.keys().cloned());
        }
        names
    }

    /// Directory the host app is served from. Falls back to the project root.
    #[must_use]
    pub fn app_dir(&self) -> PathBuf {
        self.host
            .as_ref()
            .map_or_else(|| self.root.clone(), |h| h.app_dir().to_path_buf())
    }

    /// Host app name, if any.
    #[must_use]
    pub fn host_name(&self) -> Option<&str> {
        self.host.as_ref().map(|h| h.name.as_str())
    }
}

/// Walk up from `start` to the nearest `package.json`.
#[must_use]
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(MANIFEST);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

fn locate_host(root: &Path, reference: &str) -> Result<HostApp, ConfigError> {
    let as_path = Path::new(reference);
    if reference.starts_with('.') || as_path.is_absolute() {
        let dir = root.join(as_path);
        if dir.join(MANIFEST).is_file() {
            return HostApp::load(dir);
        }
        return Err(ConfigError::HostAppNotFound {
            name: reference.to_string(),
            searched: dir,
        });
    }

    // Walk up looking in every node_modules directory
    let mut current = root.to_path_buf();
    loop {
        let dir = current.join("node_modules").join(reference);
        if dir.join(MANIFEST).is_file() {
            return HostApp::load(dir);
        }
        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::HostAppNotFound {
        name: reference.to_string(),
        searched: root.join("node_modules"),
    })
}
