//! Post-processing of finished bundles.

use super::Bundle;
use crate::error::BuildError;
use futures::future::BoxFuture;
use std::path::PathBuf;

/// First line of every pilet script.
pub const PILET_HEADER: &str = "//@pilet v:0";

/// Runs on every successful build before the bundle is published.
pub trait PostProcess: Send + Sync {
    fn process<'a>(&'a self, bundle: &'a mut Bundle) -> BoxFuture<'a, Result<(), BuildError>>;
}

/// Stamps [`PILET_HEADER`] onto JavaScript outputs that do not start with it
/// and refreshes the bundle hash. Engines should emit the header themselves
/// when they write source maps; a stamped line shifts every mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct PiletHeader;

impl PostProcess for PiletHeader {
    fn process<'a>(&'a self, bundle: &'a mut Bundle) -> BoxFuture<'a, Result<(), BuildError>> {
        Box::pin(async move {
            let scripts: Vec<PathBuf> = bundle
                .files
                .iter()
                .filter(|f| f.extension().is_some_and(|ext| ext == "js"))
                .cloned()
                .collect();
            let out_dir = bundle.out_dir.clone();

            let hash = tokio::task::spawn_blocking(move || -> Result<String, BuildError> {
                for script in &scripts {
                    pilet_util::fs::ensure_first_line(script, PILET_HEADER).map_err(|e| {
                        BuildError::PostProcess {
                            path: script.clone(),
                            message: e.to_string(),
                        }
                    })?;
                }
                pilet_util::hash::blake3_dir(&out_dir).map_err(|e| BuildError::PostProcess {
                    path: out_dir.clone(),
                    message: e.to_string(),
                })
            })
            .await
            .map_err(|e| BuildError::PostProcess {
                path: bundle.out_dir.clone(),
                message: e.to_string(),
            })??;

            bundle.hash = hash;
            Ok(())
        })
    }
}
