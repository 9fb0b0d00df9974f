use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use jobsink_core::{DocumentId, Record};

use super::{
    DocumentStore, DocumentStoreError, StoredDocument, unique_index_name, validate_identifier,
};

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<StoredDocument>,
    /// Indexed field → keys present in the collection.
    unique: HashMap<String, HashSet<String>>,
}

/// In-memory document store.
///
/// Intended for tests/dev. Unique indexes are enforced under the write lock,
/// so concurrent inserts of the same key see exactly one winner.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection` (test helper).
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map(|c| c.documents.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    fn poisoned() -> DocumentStoreError {
        DocumentStoreError::Backend("lock poisoned".to_string())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn ping(&self) -> Result<(), DocumentStoreError> {
        Ok(())
    }

    async fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), DocumentStoreError> {
        validate_identifier(collection)?;
        validate_identifier(field)?;

        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;
        let coll = collections.entry(collection.to_string()).or_default();
        if coll.unique.contains_key(field) {
            return Ok(());
        }

        let mut keys = HashSet::new();
        for doc in &coll.documents {
            if let Some(key) = doc.record.key(field) {
                if !keys.insert(key.as_str().to_string()) {
                    return Err(DocumentStoreError::DuplicateKey {
                        field: Some(field.to_string()),
                        message: format!(
                            "could not create {}: key '{key}' appears more than once",
                            unique_index_name(collection, field)
                        ),
                    });
                }
            }
        }
        coll.unique.insert(field.to_string(), keys);
        Ok(())
    }

    async fn insert_one(&self, collection: &str, record: &Record) -> Result<DocumentId, DocumentStoreError> {
        validate_identifier(collection)?;

        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;
        let coll = collections.entry(collection.to_string()).or_default();

        for (field, keys) in &coll.unique {
            if let Some(key) = record.key(field) {
                if keys.contains(key.as_str()) {
                    return Err(DocumentStoreError::DuplicateKey {
                        field: Some(field.clone()),
                        message: format!(
                            "key '{key}' violates {}",
                            unique_index_name(collection, field)
                        ),
                    });
                }
            }
        }

        for (field, keys) in coll.unique.iter_mut() {
            if let Some(key) = record.key(field) {
                keys.insert(key.as_str().to_string());
            }
        }

        let id = DocumentId::new();
        coll.documents.push(StoredDocument {
            id,
            inserted_at: Utc::now(),
            record: record.clone(),
        });
        Ok(id)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Record,
        projection: Option<&[String]>,
    ) -> Result<Vec<StoredDocument>, DocumentStoreError> {
        validate_identifier(collection)?;

        let collections = self.collections.read().map_err(|_| Self::poisoned())?;
        let Some(coll) = collections.get(collection) else {
            return Ok(vec![]);
        };

        Ok(coll
            .documents
            .iter()
            .filter(|doc| doc.record.matches(filter))
            .map(|doc| match projection {
                Some(fields) => StoredDocument {
                    record: doc.record.project(fields),
                    ..doc.clone()
                },
                None => doc.clone(),
            })
            .collect())
    }

    async fn release(&self) {}
}
