//! Diagnostic tracing for the conductor.
//!
//! Spans carry the task name, stage, and retry count, so interleaved output
//! from concurrently running agents stays attributable. Nothing here is
//! persisted; the status store is the durable record of progress.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output goes to stderr in compact
/// format so stdout stays reserved for command output.
///
/// # Example
/// ```bash
/// RUST_LOG=conductor=info conductor build design.md
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
