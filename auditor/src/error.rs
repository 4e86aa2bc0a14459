use std::borrow::Cow;
use std::{error, fmt, result};

/// Type alias for convenience when using the Result type with [`AuditError`].
pub type AuditResult<T> = result::Result<T, AuditError>;

/// Error classification for the audit engine.
///
/// The kinds follow the failure taxonomy of the system: configuration faults
/// are fatal at startup, data-plane faults are logged and contained to the
/// task that observed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid engine configuration. Fatal at startup.
    InvalidConfig,
    /// The audited table has no active change stream.
    NoActiveStream,
    /// A shard was read behind the stream retention window. Treated as a
    /// clean close of that shard, never surfaced to the operator.
    TrimmedData,
    /// A change-stream API call failed for any other reason.
    StreamApi,
    /// A table API call (metadata or point lookup) failed.
    TableApi,
    /// A background task panicked or was aborted.
    WorkerPanicked,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "invalid config",
            ErrorKind::NoActiveStream => "no active stream",
            ErrorKind::TrimmedData => "trimmed data access",
            ErrorKind::StreamApi => "stream api failure",
            ErrorKind::TableApi => "table api failure",
            ErrorKind::WorkerPanicked => "worker panicked",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal error representation with kind, description and optional context.
///
/// Uses boxing to keep the public error type size consistent and enable rich
/// error context without penalizing the success path.
struct ErrorInner {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<String>,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

/// A stable error type for the audit engine.
///
/// Carries an [`ErrorKind`] for classification, a static description, an
/// optional dynamic detail and an optional source error. Construct via the
/// [`crate::auditor_error!`] and [`crate::bail!`] macros or
/// [`AuditError::with_source`].
pub struct AuditError(Box<ErrorInner>);

impl AuditError {
    /// Creates a new error with the given kind and source error.
    pub fn with_source<E>(
        kind: ErrorKind,
        description: impl Into<Cow<'static, str>>,
        source: E,
    ) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        AuditError(Box::new(ErrorInner {
            kind,
            description: description.into(),
            detail: None,
            source: Some(source.into()),
        }))
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }
}

impl From<(ErrorKind, &'static str)> for AuditError {
    fn from((kind, description): (ErrorKind, &'static str)) -> Self {
        AuditError(Box::new(ErrorInner {
            kind,
            description: Cow::Borrowed(description),
            detail: None,
            source: None,
        }))
    }
}

impl From<(ErrorKind, String)> for AuditError {
    fn from((kind, description): (ErrorKind, String)) -> Self {
        AuditError(Box::new(ErrorInner {
            kind,
            description: Cow::Owned(description),
            detail: None,
            source: None,
        }))
    }
}

impl From<(ErrorKind, &'static str, String)> for AuditError {
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> Self {
        AuditError(Box::new(ErrorInner {
            kind,
            description: Cow::Borrowed(description),
            detail: Some(detail),
            source: None,
        }))
    }
}

impl fmt::Debug for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditError")
            .field("kind", &self.0.kind)
            .field("description", &self.0.description)
            .field("detail", &self.0.detail)
            .field("source", &self.0.source)
            .finish()
    }
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.kind, self.0.description)?;
        if let Some(detail) = &self.0.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl error::Error for AuditError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|err| err.as_ref() as &(dyn error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auditor_error;

    #[test]
    fn display_includes_kind_and_description() {
        let err = auditor_error!(ErrorKind::NoActiveStream, "table reports no stream");
        assert_eq!(
            err.to_string(),
            "no active stream: table reports no stream"
        );
    }

    #[test]
    fn display_includes_detail_when_present() {
        let err = auditor_error!(
            ErrorKind::InvalidConfig,
            "sample rate must be greater than 0",
            format!("got {}", 0)
        );
        assert!(err.to_string().ends_with("(got 0)"));
    }

    #[test]
    fn source_is_chained() {
        let io_err = std::io::Error::other("boom");
        let err = AuditError::with_source(ErrorKind::StreamApi, "get records failed", io_err);
        assert_eq!(err.kind(), ErrorKind::StreamApi);
        assert!(std::error::Error::source(&err).is_some());
    }
}
