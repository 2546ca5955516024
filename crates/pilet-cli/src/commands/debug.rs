//! `pilet debug` command implementation.
//!
//! Starts a debug session: builds the pilet with the configured bundler,
//! serves it next to the host app and mock injectors, and pushes a reload to
//! connected browsers after every successful build.

use crate::engine::ProcessEngine;
use crate::server;
use miette::{IntoDiagnostic, Result};
use pilet_core::bundler::Bundle;
use pilet_core::session::{DebugSession, SessionObserver, SessionOpened};
use pilet_core::{BuildError, SessionOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Debug command action.
#[derive(Debug, Clone)]
pub struct DebugAction {
    /// Directory the session is resolved against.
    pub cwd: PathBuf,
    /// Options from the command line. Unset fields fall through to the rc-file.
    pub options: SessionOptions,
    /// Bundler executable name or path.
    pub bundler: String,
}

pub fn run(action: DebugAction) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
    rt.block_on(serve(action))
}

async fn serve(action: DebugAction) -> Result<()> {
    let session = DebugSession::new(
        action.cwd,
        action.options,
        ProcessEngine::builder(action.bundler),
        server::builder(),
    )
    .with_observer(Arc::new(ConsoleObserver));

    session.run().await.into_diagnostic()
}

/// Prints the user-facing lines of a session.
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn opened(&self, opened: &SessionOpened) {
        let url = opened.address.url();
        println!();
        println!("  Pilet debug server running at {url}");
        println!("  Mock server management at {}", opened.management_url);
        println!();
        println!("  Press Ctrl+C to stop");
        println!();

        if opened.open_browser {
            if let Err(e) = open_browser(&url) {
                warn!(error = %e, url = %url, "failed to open browser");
            }
        }
    }

    fn bundled(&self, bundle: &Bundle) {
        println!(
            "  Built {} in {}ms",
            bundle.entry_name(),
            bundle.duration.as_millis()
        );
    }

    fn build_failed(&self, error: &BuildError) {
        eprintln!("  Build failed: {error}");
        eprintln!("  Waiting for changes...");
    }
}

/// Open `url` with the platform opener.
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}
