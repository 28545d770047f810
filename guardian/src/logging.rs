//! Diagnostic tracing for guardian runs.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr
//!   and optionally appended to a log file. Not part of the product output.
//!
//! - **Run log (`io/run_log`)**: the JSON document describing every subject's
//!   outcome. Always produced, unaffected by `RUST_LOG`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `guardian=debug` when `verbose`.
/// Output: stderr, compact format. With `log_file`, events are also appended
/// to that file without ANSI colors.
///
/// # Example
/// ```bash
/// RUST_LOG=guardian=debug guardian run --manifest subjects.toml
/// ```
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_directive = if verbose { "guardian=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}
