//! Core domain errors.

use std::fmt;

use thiserror::Error;

/// Boxed error returned by caller-supplied job code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A cursor failed to survive the transport encoding.
///
/// Fatal: the resume point cannot be trusted, so nothing is resubmitted.
#[derive(Debug, Error)]
pub enum CursorError {
    /// Cursor decoded into a different value than the one encoded.
    #[error(
        "{cursor_type} cursor {cursor} does not round-trip through {codec}: decoded as {decoded}"
    )]
    RoundTrip {
        codec: &'static str,
        cursor_type: &'static str,
        cursor: String,
        decoded: String,
    },

    /// Cursor could not be encoded at all.
    #[error("{cursor_type} cursor cannot be encoded with {codec}: {message}")]
    Encode {
        codec: &'static str,
        cursor_type: &'static str,
        message: String,
    },

    /// Encoded cursor could not be decoded.
    #[error("cursor cannot be decoded with {codec}: {message}")]
    Decode {
        codec: &'static str,
        message: String,
    },
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum IterationError {
    /// Checkpoint cursor is not serializable.
    #[error(transparent)]
    Cursor(#[from] CursorError),

    /// Sequence could not be built from the resume cursor.
    #[error("failed to build sequence: {source}")]
    SequenceConstruction {
        #[source]
        source: BoxError,
    },

    /// Per-item work, or pulling an item, failed.
    #[error("iteration failed: {source}")]
    Execution {
        #[source]
        source: BoxError,
    },
}

impl IterationError {
    pub fn sequence_construction(source: impl Into<BoxError>) -> Self {
        Self::SequenceConstruction {
            source: source.into(),
        }
    }

    pub fn execution(source: impl Into<BoxError>) -> Self {
        Self::Execution {
            source: source.into(),
        }
    }

    /// Kind reported to the transport's failure channel.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cursor(_) => ErrorKind::CursorError,
            Self::SequenceConstruction { .. } => ErrorKind::SequenceConstructionError,
            Self::Execution { .. } => ErrorKind::ExecutionError,
        }
    }

    /// Whether the host may retry the run. Cursor errors are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cursor(_))
    }
}

/// Failure kinds, distinguishable in failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CursorError,
    SequenceConstructionError,
    ExecutionError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CursorError => "CursorError",
            Self::SequenceConstructionError => "SequenceConstructionError",
            Self::ExecutionError => "ExecutionError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
