#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod engine;
mod logging;
mod server;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use pilet_core::config::DEFAULT_LOG_LEVEL;
use pilet_core::{LogLevel, SessionOptions};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pilet")]
#[command(author, version, about = "Debug server for pilets", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the pilet and serve it with live reload
    Debug {
        /// Entry module, relative to the working directory
        entry: Option<String>,

        /// Port of the debug server
        #[arg(long, short)]
        port: Option<u16>,

        /// Build cache directory, relative to the project root
        #[arg(long, value_name = "PATH")]
        cache_dir: Option<PathBuf>,

        /// Log level: 1 = errors, 2 = warnings, 3 = info
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
        log_level: Option<u8>,

        /// Clear the build cache before the first build
        #[arg(long)]
        fresh: bool,

        /// Open a browser once the server is up
        #[arg(long)]
        open: bool,

        /// Enable scope hoisting
        #[arg(long)]
        scope_hoist: bool,

        /// Do not push reloads to the browser after builds
        #[arg(long)]
        no_hmr: bool,

        /// Do not let the bundler install missing dependencies
        #[arg(long)]
        no_autoinstall: bool,

        /// Host app package name or path
        #[arg(long)]
        app: Option<String>,

        /// Bundler executable (name in node_modules/.bin or PATH, or a path)
        #[arg(long, default_value = engine::DEFAULT_BUNDLER, env = "PILET_BUNDLER")]
        bundler: String,
    },

    /// Remove the build cache
    Clean {
        /// Build cache directory, relative to the project root
        #[arg(long, value_name = "PATH")]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = match cli.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().into_diagnostic()?,
    };

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Debug {
            entry,
            port,
            cache_dir,
            log_level,
            fresh,
            open,
            scope_hoist,
            no_hmr,
            no_autoinstall,
            app,
            bundler,
        }) => {
            let level = log_level
                .and_then(|level| LogLevel::try_from(level).ok())
                .unwrap_or(DEFAULT_LOG_LEVEL);
            logging::init(level, cli.verbose, cli.json);

            // Switches only override lower layers when given
            let options = SessionOptions {
                entry,
                port,
                cache_dir,
                log_level,
                fresh: fresh.then_some(true),
                open: open.then_some(true),
                scope_hoist: scope_hoist.then_some(true),
                hmr: no_hmr.then_some(false),
                auto_install: no_autoinstall.then_some(false),
                app,
            };

            let span = tracing::info_span!("debug", cmd = "debug", cwd = %cwd.display());
            let _guard = span.enter();
            commands::debug::run(commands::debug::DebugAction {
                cwd,
                options,
                bundler,
            })
        }
        Some(Commands::Clean { cache_dir }) => {
            logging::init(DEFAULT_LOG_LEVEL, cli.verbose, cli.json);
            commands::clean::run(&cwd, cache_dir)
        }
    }
}
