//! Idempotent write path into the document store.
//!
//! First writer wins: there is no upsert. The unique index on the key field
//! turns a repeated write into [`StoreOutcome::DuplicateKey`].

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{debug, info, instrument, warn};

use jobsink_core::{ErrorKind, Record, RejectReason, StoreOutcome};

use crate::document_store::{DocumentStore, DocumentStoreError, StoredDocument};

/// Default unique key field.
pub const DEFAULT_KEY_FIELD: &str = "slug";

/// Writes records under a uniqueness constraint on `key_field`.
#[derive(Debug)]
pub struct IdempotentStore<S> {
    store: S,
    key_field: String,
    /// Collections whose constraint setup has been settled.
    ensured: Mutex<HashSet<String>>,
}

impl<S: DocumentStore> IdempotentStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_key_field(store, DEFAULT_KEY_FIELD)
    }

    pub fn with_key_field(store: S, key_field: impl Into<String>) -> Self {
        Self {
            store,
            key_field: key_field.into(),
            ensured: Mutex::new(HashSet::new()),
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    fn is_ensured(&self, collection: &str) -> bool {
        self.ensured
            .lock()
            .map(|e| e.contains(collection))
            .unwrap_or(false)
    }

    fn mark_ensured(&self, collection: &str) {
        if let Ok(mut ensured) = self.ensured.lock() {
            ensured.insert(collection.to_string());
        }
    }

    /// Ensure the unique index on the key field exists in `collection`.
    ///
    /// Best-effort: a failure is logged and returned, but only an
    /// availability failure leaves the collection to be retried on next use.
    #[instrument(skip(self), fields(key_field = %self.key_field))]
    pub async fn ensure_constraint(&self, collection: &str) -> Result<(), DocumentStoreError> {
        if self.is_ensured(collection) {
            return Ok(());
        }

        match self.store.create_unique_index(collection, &self.key_field).await {
            Ok(()) => {
                info!(collection, "uniqueness constraint in place");
                self.mark_ensured(collection);
                Ok(())
            }
            Err(e @ DocumentStoreError::Unavailable(_)) => {
                warn!(collection, kind = %ErrorKind::ConstraintSetupFailure, error = %e, "constraint setup deferred; store unavailable");
                Err(e)
            }
            Err(e) => {
                warn!(collection, kind = %ErrorKind::ConstraintSetupFailure, error = %e, "constraint setup failed");
                self.mark_ensured(collection);
                Err(e)
            }
        }
    }

    /// Write `record` into `collection`.
    pub async fn store(&self, record: &Record, collection: &str) -> StoreOutcome {
        if let Err(DocumentStoreError::Unavailable(e)) = self.ensure_constraint(collection).await {
            debug!(collection, error = %e, "store unavailable; record rejected");
            return StoreOutcome::Rejected(RejectReason::BackendUnavailable);
        }

        match self.store.insert_one(collection, record).await {
            Ok(id) => StoreOutcome::Inserted(id),
            Err(e) if e.is_duplicate_of(&self.key_field) => {
                debug!(collection, key = ?record.key(&self.key_field), "duplicate key rejected by store");
                StoreOutcome::DuplicateKey
            }
            Err(DocumentStoreError::Unavailable(e)) => {
                warn!(collection, kind = %e.kind(), error = %e, "store unavailable; record rejected");
                StoreOutcome::Rejected(RejectReason::BackendUnavailable)
            }
            Err(e) => {
                warn!(collection, kind = %e.kind(), error = %e, "insert failed; record rejected");
                StoreOutcome::Rejected(RejectReason::BackendError)
            }
        }
    }

    /// Exact-match lookup, ordered by insertion.
    pub async fn find(
        &self,
        collection: &str,
        filter: &Record,
        projection: Option<&[String]>,
    ) -> Result<Vec<StoredDocument>, DocumentStoreError> {
        self.store.find(collection, filter, projection).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use jobsink_core::DocumentId;

    use super::*;
    use crate::connection::Unavailable;
    use crate::document_store::InMemoryDocumentStore;

    /// Store whose index creation and inserts fail as scripted.
    #[derive(Default)]
    struct FlakyStore {
        index_error: Option<DocumentStoreError>,
        insert_error: Option<DocumentStoreError>,
        index_calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn ping(&self) -> Result<(), DocumentStoreError> {
            Ok(())
        }

        async fn create_unique_index(&self, _collection: &str, _field: &str) -> Result<(), DocumentStoreError> {
            self.index_calls.fetch_add(1, Ordering::SeqCst);
            match &self.index_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        async fn insert_one(&self, _collection: &str, _record: &Record) -> Result<DocumentId, DocumentStoreError> {
            match &self.insert_error {
                Some(e) => Err(e.clone()),
                None => Ok(DocumentId::new()),
            }
        }

        async fn find(
            &self,
            _collection: &str,
            _filter: &Record,
            _projection: Option<&[String]>,
        ) -> Result<Vec<StoredDocument>, DocumentStoreError> {
            Ok(vec![])
        }

        async fn release(&self) {}
    }

    fn job(slug: &str) -> Record {
        Record::new().with("slug", slug).with("title", "Engineer")
    }

    #[tokio::test]
    async fn second_store_is_duplicate_key() {
        let store = IdempotentStore::new(InMemoryDocumentStore::new());

        let first = store.store(&job("a"), "jobs").await;
        assert!(first.inserted_id().is_some());
        assert_eq!(store.store(&job("a"), "jobs").await, StoreOutcome::DuplicateKey);

        let found = store
            .find("jobs", &Record::new().with("slug", "a"), None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(Some(found[0].id), first.inserted_id());
    }

    #[tokio::test]
    async fn unavailable_store_rejects_and_retries_setup() {
        let flaky = FlakyStore {
            index_error: Some(Unavailable::new("postgres", "refused").into()),
            ..Default::default()
        };
        let store = IdempotentStore::new(flaky);

        assert_eq!(
            store.store(&job("a"), "jobs").await,
            StoreOutcome::Rejected(RejectReason::BackendUnavailable)
        );
        store.store(&job("b"), "jobs").await;
        assert_eq!(store.backend().index_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn setup_failure_is_not_retried_and_not_fatal() {
        let flaky = FlakyStore {
            index_error: Some(DocumentStoreError::Backend("permission denied".to_string())),
            ..Default::default()
        };
        let store = IdempotentStore::new(flaky);

        assert!(store.store(&job("a"), "jobs").await.inserted_id().is_some());
        assert!(store.store(&job("b"), "jobs").await.inserted_id().is_some());
        assert_eq!(store.backend().index_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn only_the_key_index_counts_as_duplicate() {
        let other_index = FlakyStore {
            insert_error: Some(DocumentStoreError::DuplicateKey {
                field: Some("req_id".to_string()),
                message: "exists".to_string(),
            }),
            ..Default::default()
        };
        let store = IdempotentStore::new(other_index);
        assert_eq!(
            store.store(&job("a"), "jobs").await,
            StoreOutcome::Rejected(RejectReason::BackendError)
        );

        let unnamed_index = FlakyStore {
            insert_error: Some(DocumentStoreError::DuplicateKey {
                field: None,
                message: "duplicate key value violates unique constraint \"jobs_pkey\"".to_string(),
            }),
            ..Default::default()
        };
        let store = IdempotentStore::new(unnamed_index);
        assert_eq!(
            store.store(&job("a"), "jobs").await,
            StoreOutcome::Rejected(RejectReason::BackendError)
        );

        let timeout = FlakyStore {
            insert_error: Some(DocumentStoreError::Timeout("insert_one exceeded 5000 ms".to_string())),
            ..Default::default()
        };
        let store = IdempotentStore::new(timeout);
        assert_eq!(
            store.store(&job("a"), "jobs").await,
            StoreOutcome::Rejected(RejectReason::BackendError)
        );
    }

    #[tokio::test]
    async fn keyless_records_are_stored() {
        let store = IdempotentStore::new(InMemoryDocumentStore::new());
        let keyless = Record::new().with("title", "no slug");
        assert!(store.store(&keyless, "jobs").await.inserted_id().is_some());
        assert!(store.store(&keyless, "jobs").await.inserted_id().is_some());
    }
}
