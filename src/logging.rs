//! Log output setup
//!
//! Verbosity from the command line selects the level of this crate's
//! targets:
//!
//! | flags  | level |
//! |--------|-------|
//! | none   | warn  |
//! | `-v`   | info  |
//! | `-vv`  | debug |
//! | `-vvv` | trace |
//!
//! `RUST_LOG`, when set, replaces the flag-derived filter entirely.

use tracing_subscriber::EnvFilter;

/// Targets that receive the flag-derived level
const CRATE_TARGETS: &[&str] = &["stack_stats", "stack_stats::orchestrator", "stack_stats::output"];

fn level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn default_filter(verbosity: u8) -> String {
    let level = level(verbosity);
    CRATE_TARGETS
        .iter()
        .map(|t| format!("{t}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber, writing to stderr
pub fn init(verbosity: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
