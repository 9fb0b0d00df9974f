//! Ingestion error taxonomy.

use thiserror::Error;

/// Abstract classification of every failure the pipeline can observe.
///
/// Backend-specific errors (Redis, Postgres, in-memory) are mapped onto these
/// kinds by explicit classification in the infrastructure layer. The
/// orchestrator only ever reasons in terms of `ErrorKind`; it never sees a raw
/// backend error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connect or liveness-probe failure. Recovered by re-acquiring on the
    /// next call, never by retrying inside one call.
    BackendUnavailable,

    /// The storage uniqueness constraint rejected a write. Expected and
    /// counted; not an error path.
    DuplicateKey,

    /// The uniqueness constraint could not be created. Logged, non-fatal.
    ConstraintSetupFailure,

    /// The record lacks a usable unique key. Skipped by dedup, still stored.
    MalformedRecord,

    /// Any other backend-reported failure. Counted; the record is dropped.
    BackendOperationError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::DuplicateKey => "duplicate_key",
            ErrorKind::ConstraintSetupFailure => "constraint_setup_failure",
            ErrorKind::MalformedRecord => "malformed_record",
            ErrorKind::BackendOperationError => "backend_operation_error",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record-level validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The value is not a JSON object and cannot be a record.
    #[error("record must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    /// The unique key field is missing, null, empty, or not a scalar.
    #[error("record has no usable value for unique key field '{0}'")]
    MissingKey(String),
}

impl RecordError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::MalformedRecord
    }
}
