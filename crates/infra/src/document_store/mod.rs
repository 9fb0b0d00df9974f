//! Document store boundary.
//!
//! A collection holds JSON documents, each with a store-assigned
//! [`DocumentId`]. Uniqueness of a field across a collection is enforced by
//! the store itself through a unique index; that index is the correctness
//! backstop for deduplication.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use jobsink_core::{DocumentId, ErrorKind, Record};

use crate::connection::Unavailable;

pub use in_memory::InMemoryDocumentStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDocumentStore;

/// Longest collection or field name accepted; keeps derived index names
/// within Postgres' 63-byte identifier limit.
pub const MAX_IDENTIFIER_LEN: usize = 48;

/// A record as persisted, plus store-assigned metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub inserted_at: DateTime<Utc>,
    pub record: Record,
}

/// Document store error, already classified for the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentStoreError {
    #[error(transparent)]
    Unavailable(#[from] Unavailable),

    #[error("document store operation timed out: {0}")]
    Timeout(String),

    /// A unique index rejected the write. `field` is the indexed field when
    /// the violated index is one this store created.
    #[error("duplicate key (field: {field:?}): {message}")]
    DuplicateKey { field: Option<String>, message: String },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("document store error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentStoreError::Unavailable(_) => ErrorKind::BackendUnavailable,
            DocumentStoreError::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            DocumentStoreError::Timeout(_)
            | DocumentStoreError::InvalidIdentifier(_)
            | DocumentStoreError::Backend(_) => ErrorKind::BackendOperationError,
        }
    }

    /// True if this is a unique violation on `field`.
    pub fn is_duplicate_of(&self, field: &str) -> bool {
        matches!(self, DocumentStoreError::DuplicateKey { field: Some(f), .. } if f == field)
    }
}

/// Collection-oriented document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Liveness check; also primes the underlying connection.
    async fn ping(&self) -> Result<(), DocumentStoreError>;

    /// Ensure a unique index on `field` exists (idempotent).
    async fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), DocumentStoreError>;

    /// Insert a document, failing with `DuplicateKey` on a unique violation.
    async fn insert_one(&self, collection: &str, record: &Record) -> Result<DocumentId, DocumentStoreError>;

    /// Exact-match lookup over top-level fields; an empty filter matches
    /// everything. Results are ordered by insertion. With a projection,
    /// only the listed fields are returned.
    async fn find(
        &self,
        collection: &str,
        filter: &Record,
        projection: Option<&[String]>,
    ) -> Result<Vec<StoredDocument>, DocumentStoreError>;

    /// Drop any cached connection.
    async fn release(&self);
}

#[async_trait]
impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    async fn ping(&self) -> Result<(), DocumentStoreError> {
        (**self).ping().await
    }

    async fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), DocumentStoreError> {
        (**self).create_unique_index(collection, field).await
    }

    async fn insert_one(&self, collection: &str, record: &Record) -> Result<DocumentId, DocumentStoreError> {
        (**self).insert_one(collection, record).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Record,
        projection: Option<&[String]>,
    ) -> Result<Vec<StoredDocument>, DocumentStoreError> {
        (**self).find(collection, filter, projection).await
    }

    async fn release(&self) {
        (**self).release().await
    }
}

/// Validate a collection or field name: `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Names are interpolated into DDL, so anything else is refused.
pub fn validate_identifier(name: &str) -> Result<(), DocumentStoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest {
        return Err(DocumentStoreError::InvalidIdentifier(format!(
            "'{name}' must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(DocumentStoreError::InvalidIdentifier(format!(
            "'{name}' is longer than {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    Ok(())
}

/// Name of the unique index on `field` in `collection`.
pub fn unique_index_name(collection: &str, field: &str) -> String {
    format!("{collection}_{field}_key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_restricted() {
        assert!(validate_identifier("testing_jobs").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        for bad in ["", "1jobs", "jobs;drop", "job-s", "jobs\"", "a b"] {
            assert!(validate_identifier(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn duplicate_classification_checks_the_field() {
        let err = DocumentStoreError::DuplicateKey {
            field: Some("slug".to_string()),
            message: "exists".to_string(),
        };
        assert!(err.is_duplicate_of("slug"));
        assert!(!err.is_duplicate_of("req_id"));
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);

        let unknown = DocumentStoreError::DuplicateKey {
            field: None,
            message: "exists".to_string(),
        };
        assert!(!unknown.is_duplicate_of("slug"));
    }
}
