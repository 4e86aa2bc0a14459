use std::error::Error;

use auditor::error::AuditError;
use auditor_telemetry::tracing::TracingError;
use thiserror::Error as ThisError;

/// Result type for the command-line auditor.
pub type CliResult<T> = Result<T, CliError>;

/// Error type for the command-line auditor.
///
/// Wraps [`AuditError`] for engine failures and provides variants for the
/// pre-flight faults that exit the process non-zero.
#[derive(Debug, ThisError)]
pub enum CliError {
    /// Invalid or inconsistent command-line arguments.
    #[error("invalid arguments: {0}")]
    Arguments(String),

    /// Credentials could not be resolved for one of the account contexts.
    #[error("failed to load credentials for the {context} context")]
    Credentials {
        context: &'static str,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    /// Tracing initialization failure.
    #[error("failed to initialize tracing")]
    Tracing(#[from] TracingError),

    /// Engine failure.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// I/O failure, e.g. while building the async runtime.
    #[error("i/o error")]
    Io(#[from] std::io::Error),
}
