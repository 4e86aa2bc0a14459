//! Tracing setup for binaries and tests.

use std::sync::Once;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Errors that can occur while initializing tracing.
#[derive(Debug, Error)]
pub enum TracingError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber")]
    Init(#[source] tracing_subscriber::util::TryInitError),
}

/// Initializes tracing for a binary.
///
/// Logs go to stdout through a non-blocking writer as human-readable,
/// timestamped lines with structured fields. The filter honors `RUST_LOG`
/// and defaults to `info`.
///
/// The returned guard flushes buffered log lines when dropped; hold it for
/// the lifetime of the process.
pub fn init_tracing(service_name: &str) -> Result<WorkerGuard, TracingError> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(writer))
        .try_init()
        .map_err(TracingError::Init)?;

    info!(service = service_name, "tracing initialized");

    Ok(guard)
}

/// Initializes tracing for tests.
///
/// Output is captured per test and only shown for failures. Safe to call from
/// every test; initialization happens once.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_test_writer())
            .init();
    });
}
