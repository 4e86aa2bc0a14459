//! Utility macros for error handling.
//!
//! These macros provide a concise way to create and return
//! [`crate::error::AuditError`] values with consistent formatting.

/// Creates an [`crate::error::AuditError`] from error kind and description.
///
/// # Examples
/// ```rust,no_run
/// use auditor::auditor_error;
/// use auditor::error::{AuditError, ErrorKind};
///
/// // Simple error with static description
/// let error = auditor_error!(ErrorKind::InvalidConfig, "missing table name");
///
/// // Error with additional detail
/// let error = auditor_error!(
///     ErrorKind::StreamApi,
///     "shard iterator request failed",
///     format!("shard {}", "shardId-001")
/// );
/// ```
#[macro_export]
macro_rules! auditor_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::AuditError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::AuditError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Creates and returns an [`crate::error::AuditError`] from the current function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::auditor_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::auditor_error!($kind, $desc, $detail))
    };
}
