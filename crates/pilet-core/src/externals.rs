//! Dependency externalization.
//!
//! Host-provided packages must resolve to the host's runtime copy instead of
//! being bundled. The set is folded into the immutable [`EngineConfig`] that
//! the bundler is constructed with, so it is in place before any engine
//! instance exists and never touches shared state.

use crate::bundler::{EngineConfig, EngineOptions};
use crate::manifest::ProjectData;
use std::collections::{BTreeMap, BTreeSet};

/// Package names the bundler must treat as provided at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalsSet(BTreeSet<String>);

impl ExternalsSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            names
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.is_empty())
                .collect(),
        )
    }

    /// Peer dependencies of the pilet and its host app.
    #[must_use]
    pub fn from_project(project: &ProjectData) -> Self {
        Self::new(project.peer_dependencies())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Whether an import specifier refers to an external package,
    /// either the package itself or one of its subpaths.
    #[must_use]
    pub fn matches(&self, specifier: &str) -> bool {
        self.0.iter().any(|name| {
            specifier == name
                || specifier
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names joined with `sep`, in sorted order.
    #[must_use]
    pub fn join(&self, sep: &str) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(sep)
    }

    /// Fold the externals and the standard build environment into the final
    /// engine configuration.
    #[must_use]
    pub fn apply(self, options: EngineOptions, host: Option<&str>) -> EngineConfig {
        let env = standard_env(&options, host, &self);
        EngineConfig {
            options,
            externals: self,
            env,
        }
    }
}

/// Environment every build sees.
fn standard_env(
    options: &EngineOptions,
    host: Option<&str>,
    externals: &ExternalsSet,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("NODE_ENV".to_string(), "development".to_string());
    env.insert(
        "PILET_TARGET".to_string(),
        options.target_dir.display().to_string(),
    );
    env.insert("PILET_HOST".to_string(), host.unwrap_or_default().to_string());
    env.insert("PILET_EXTERNALS".to_string(), externals.join(","));
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::path::PathBuf;

    fn options() -> EngineOptions {
        EngineOptions {
            entry: PathBuf::from("/p/src/index.tsx"),
            root: PathBuf::from("/p"),
            target_dir: PathBuf::from("/p/src"),
            out_dir: PathBuf::from("/p/dist"),
            cache_dir: PathBuf::from("/p/.cache"),
            log_level: LogLevel::Info,
            minify: true,
            hmr: false,
            scope_hoist: false,
            public_url: "./".to_string(),
            auto_install: true,
        }
    }

    #[test]
    fn test_matches_package_and_subpaths() {
        let externals = ExternalsSet::new(["react", "@scope/ui"]);
        assert!(externals.matches("react"));
        assert!(externals.matches("react/jsx-runtime"));
        assert!(externals.matches("@scope/ui/button"));
        assert!(!externals.matches("react-dom"));
        assert!(!externals.matches("./react"));
    }

    #[test]
    fn test_empty_names_dropped() {
        let externals = ExternalsSet::new(["", "a", "a"]);
        assert_eq!(externals.len(), 1);
    }

    #[test]
    fn test_apply_sets_externals_and_env() {
        let config = ExternalsSet::new(["b", "a"]).apply(options(), Some("shell"));
        assert!(config.externals.contains("a"));
        assert!(config.externals.contains("b"));
        assert_eq!(config.env["PILET_EXTERNALS"], "a,b");
        assert_eq!(config.env["PILET_HOST"], "shell");
        assert_eq!(config.env["NODE_ENV"], "development");
        assert_eq!(config.env["PILET_TARGET"], "/p/src");
    }

    #[test]
    fn test_apply_without_host() {
        let config = ExternalsSet::default().apply(options(), None);
        assert!(config.externals.is_empty());
        assert_eq!(config.env["PILET_HOST"], "");
        assert_eq!(config.env["PILET_EXTERNALS"], "");
    }
}
