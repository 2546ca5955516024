//! Logging initialization for the CLI.
//!
//! Logging is owned by the CLI crate to keep library crates lightweight.
//! Uses tracing with structured JSON output for machine-readable logs.

use pilet_core::LogLevel;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose events follow the session log level.
const TARGETS: &[&str] = &["pilet", "pilet_core"];

/// Map the session log level and `-v` count to a tracing level.
///
/// Without `-v` the session level applies (1 = errors, 2 = warnings,
/// 3 = info). `-v` raises it to DEBUG, `-vv` to TRACE.
#[must_use]
pub fn level_for(log_level: LogLevel, verbosity: u8) -> Level {
    match verbosity {
        0 => match log_level {
            LogLevel::Errors => Level::ERROR,
            LogLevel::Warnings => Level::WARN,
            LogLevel::Info => Level::INFO,
        },
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` is honored; the computed level is added on top for the pilet
/// crates. With `json`, stable JSON lines go to stderr:
///
/// ```json
/// {"timestamp":"...","level":"INFO","target":"pilet_core::session","fields":{"message":"bundled"}}
/// ```
///
/// # Panics
/// Panics if the subscriber cannot be initialized (e.g., called twice).
pub fn init(log_level: LogLevel, verbosity: u8, json: bool) {
    let level = level_for(log_level, verbosity);

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    for target in TARGETS {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_follows_session_level() {
        assert_eq!(level_for(LogLevel::Errors, 0), Level::ERROR);
        assert_eq!(level_for(LogLevel::Warnings, 0), Level::WARN);
        assert_eq!(level_for(LogLevel::Info, 0), Level::INFO);
    }

    #[test]
    fn test_verbosity_overrides() {
        assert_eq!(level_for(LogLevel::Errors, 1), Level::DEBUG);
        assert_eq!(level_for(LogLevel::Info, 2), Level::TRACE);
        assert_eq!(level_for(LogLevel::Info, 5), Level::TRACE);
    }
}
