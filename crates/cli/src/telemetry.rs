//! Tracing initialization.

use color_eyre::eyre::{eyre, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise `info` (or `debug`
/// with `verbose`). Logs go to stderr so command output on stdout stays
/// machine-readable.
///
/// # Errors
///
/// Returns an error if the filter is malformed or a subscriber is already
/// installed.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| eyre!("Failed to create env filter: {e}"))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize tracing: {e}"))
}
