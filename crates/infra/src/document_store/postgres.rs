//! Postgres-backed document store.
//!
//! Each collection is a table of JSONB documents:
//!
//! ```sql
//! CREATE TABLE "<collection>" (
//!     id          UUID PRIMARY KEY,
//!     document    JSONB NOT NULL,
//!     inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE UNIQUE INDEX "<collection>_<field>_key" ON "<collection>" ((document ->> '<field>'))
//!     WHERE jsonb_typeof(document -> '<field>') IN ('string', 'number', 'boolean')
//!       AND document ->> '<field>' <> '';
//! ```
//!
//! The index is partial so that it constrains exactly the values that
//! [`Record::key`] accepts as a key: empty strings, lists and maps stay
//! unconstrained, as they are in the in-memory store.
//!
//! Tables are created on first use, so a collection behaves like a document
//! collection that springs into existence on first insert.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | DocumentStoreError |
//! |------------|----------------------|--------------------|
//! | Database (unique violation) | `23505` | `DuplicateKey` (field resolved from the index name) |
//! | Database (other) | Any other | `Backend` |
//! | PoolTimedOut / PoolClosed / Io / Tls | N/A | `Unavailable` |
//! | Other | N/A | `Backend` |
//!
//! ## Thread Safety
//!
//! `PostgresDocumentStore` is `Send + Sync`. The pool handle comes from a
//! shared [`ConnectionManager`], which re-dials after a failed liveness probe.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

use jobsink_core::{DocumentId, Record};

use crate::connection::postgres::PostgresDialer;
use crate::connection::{ConnectionManager, Unavailable};

use super::{DocumentStore, DocumentStoreError, StoredDocument, unique_index_name, validate_identifier};

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(5000);

const UNIQUE_VIOLATION: &str = "23505";
const DUPLICATE_TABLE: &str = "42P07";
const UNDEFINED_TABLE: &str = "42P01";

/// Document store on top of a shared Postgres [`ConnectionManager`].
#[derive(Debug)]
pub struct PostgresDocumentStore {
    manager: Arc<ConnectionManager<PostgresDialer>>,
    operation_timeout: Duration,
    /// Collections whose table is known to exist.
    tables: RwLock<HashSet<String>>,
    /// Index name → indexed field, for classifying unique violations.
    indexes: RwLock<HashMap<String, String>>,
}

impl PostgresDocumentStore {
    pub fn new(manager: Arc<ConnectionManager<PostgresDialer>>) -> Self {
        Self {
            manager,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            tables: RwLock::new(HashSet::new()),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<PostgresDialer>> {
        &self.manager
    }

    async fn pool(&self) -> Result<PgPool, DocumentStoreError> {
        Ok(self.manager.acquire().await?)
    }

    async fn bounded<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T, DocumentStoreError>
    where
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.map_sqlx_error(operation, e)),
            Err(_) => Err(DocumentStoreError::Timeout(format!(
                "{operation} exceeded {} ms",
                self.operation_timeout.as_millis()
            ))),
        }
    }

    fn table_known(&self, collection: &str) -> bool {
        self.tables
            .read()
            .map(|t| t.contains(collection))
            .unwrap_or(false)
    }

    async fn ensure_table(&self, pool: &PgPool, collection: &str) -> Result<(), DocumentStoreError> {
        if self.table_known(collection) {
            return Ok(());
        }

        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{collection}" (
                id UUID PRIMARY KEY,
                document JSONB NOT NULL,
                inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        );

        match self
            .bounded("create_table", sqlx::query(&sql).execute(pool))
            .await
        {
            Ok(_) => {}
            // Concurrent CREATE TABLE IF NOT EXISTS can still collide in the catalog.
            Err(DocumentStoreError::DuplicateKey { .. }) => {}
            Err(DocumentStoreError::Backend(msg)) if msg.contains(DUPLICATE_TABLE) => {}
            Err(e) => return Err(e),
        }

        if let Ok(mut tables) = self.tables.write() {
            tables.insert(collection.to_string());
        }
        Ok(())
    }

    fn register_index(&self, index: &str, field: &str) {
        if let Ok(mut indexes) = self.indexes.write() {
            indexes.insert(index.to_string(), field.to_string());
        }
    }

    fn indexed_field(&self, constraint: Option<&str>) -> Option<String> {
        let constraint = constraint?;
        self.indexes.read().ok()?.get(constraint).cloned()
    }

    /// Map SQLx errors to DocumentStoreError.
    fn map_sqlx_error(&self, operation: &str, err: sqlx::Error) -> DocumentStoreError {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                let msg = format!("database error in {operation} [{code}]: {}", db_err.message());

                if code == UNIQUE_VIOLATION {
                    DocumentStoreError::DuplicateKey {
                        field: self.indexed_field(db_err.constraint()),
                        message: msg,
                    }
                } else {
                    DocumentStoreError::Backend(msg)
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => {
                Unavailable::new("postgres", format!("{operation}: {err}")).into()
            }
            _ => DocumentStoreError::Backend(format!("sqlx error in {operation}: {err}")),
        }
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn ping(&self) -> Result<(), DocumentStoreError> {
        self.pool().await.map(|_| ())
    }

    #[instrument(skip(self), err)]
    async fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), DocumentStoreError> {
        validate_identifier(collection)?;
        validate_identifier(field)?;

        let pool = self.pool().await?;
        self.ensure_table(&pool, collection).await?;

        let index = unique_index_name(collection, field);
        let sql = unique_index_ddl(collection, field);
        self.bounded("create_unique_index", sqlx::query(&sql).execute(&pool))
            .await?;

        self.register_index(&index, field);
        info!(collection, field, index = %index, "unique index ensured");
        Ok(())
    }

    #[instrument(skip(self, record), fields(fields = record.len()), err)]
    async fn insert_one(&self, collection: &str, record: &Record) -> Result<DocumentId, DocumentStoreError> {
        validate_identifier(collection)?;

        let pool = self.pool().await?;
        self.ensure_table(&pool, collection).await?;

        let id = DocumentId::new();
        let sql = format!(r#"INSERT INTO "{collection}" (id, document) VALUES ($1, $2)"#);
        self.bounded(
            "insert_one",
            sqlx::query(&sql)
                .bind(id.as_uuid())
                .bind(Json(record))
                .execute(&pool),
        )
        .await?;

        debug!(collection, document_id = %id, "document inserted");
        Ok(id)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Record,
        projection: Option<&[String]>,
    ) -> Result<Vec<StoredDocument>, DocumentStoreError> {
        validate_identifier(collection)?;

        let pool = self.pool().await?;
        let sql = format!(
            r#"
            SELECT id, document, inserted_at
            FROM "{collection}"
            WHERE document @> $1
            ORDER BY inserted_at ASC, id ASC
            "#
        );

        let rows = match self
            .bounded("find", sqlx::query(&sql).bind(Json(filter)).fetch_all(&pool))
            .await
        {
            Ok(rows) => rows,
            // A collection nobody has written to yet is simply empty.
            Err(DocumentStoreError::Backend(msg)) if msg.contains(UNDEFINED_TABLE) => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = StoredDocumentRow::from_row(&row)
                .map_err(|e| DocumentStoreError::Backend(format!("failed to decode document row: {e}")))?;
            let document = stored.into_document();

            // `@>` is containment; re-check for exact top-level equality.
            if !document.record.matches(filter) {
                continue;
            }
            documents.push(match projection {
                Some(fields) => StoredDocument {
                    record: document.record.project(fields),
                    ..document
                },
                None => document,
            });
        }

        debug!(collection, found = documents.len(), "find completed");
        Ok(documents)
    }

    async fn release(&self) {
        self.manager.release().await;
    }
}

/// DDL for the partial unique index on `field`.
///
/// Both names must already have passed [`validate_identifier`].
fn unique_index_ddl(collection: &str, field: &str) -> String {
    let index = unique_index_name(collection, field);
    format!(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS "{index}" ON "{collection}" ((document ->> '{field}'))
        WHERE jsonb_typeof(document -> '{field}') IN ('string', 'number', 'boolean')
          AND document ->> '{field}' <> ''
        "#
    )
}

// SQLx row types

#[derive(Debug)]
struct StoredDocumentRow {
    id: uuid::Uuid,
    document: Json<Record>,
    inserted_at: DateTime<Utc>,
}

impl StoredDocumentRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocumentRow {
            id: row.try_get("id")?,
            document: row.try_get("document")?,
            inserted_at: row.try_get("inserted_at")?,
        })
    }

    fn into_document(self) -> StoredDocument {
        StoredDocument {
            id: DocumentId::from_uuid(self.id),
            inserted_at: self.inserted_at,
            record: self.document.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::fmt;

    use sqlx::error::{DatabaseError, ErrorKind as SqlxErrorKind};

    use super::*;

    /// Minimal server error carrying a SQLSTATE and constraint name.
    #[derive(Debug)]
    struct ServerError {
        code: &'static str,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for ServerError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "server error {}", self.code)
        }
    }

    impl std::error::Error for ServerError {}

    impl DatabaseError for ServerError {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> SqlxErrorKind {
            if self.code == UNIQUE_VIOLATION {
                SqlxErrorKind::UniqueViolation
            } else {
                SqlxErrorKind::Other
            }
        }
    }

    fn server_error(code: &'static str, constraint: Option<&'static str>) -> sqlx::Error {
        sqlx::Error::Database(Box::new(ServerError { code, constraint }))
    }

    fn store() -> PostgresDocumentStore {
        let manager = ConnectionManager::new(PostgresDialer::new("postgres://localhost/jobsink"));
        let store = PostgresDocumentStore::new(Arc::new(manager));
        store.register_index(&unique_index_name("jobs", "slug"), "slug");
        store
    }

    #[test]
    fn unique_violation_on_a_known_index_names_the_field() {
        let err = store().map_sqlx_error("insert_one", server_error("23505", Some("jobs_slug_key")));
        assert!(err.is_duplicate_of("slug"));
        assert_eq!(err.kind(), jobsink_core::ErrorKind::DuplicateKey);
    }

    #[test]
    fn unique_violation_on_another_index_has_no_field() {
        let err = store().map_sqlx_error("insert_one", server_error("23505", Some("jobs_pkey")));
        assert!(matches!(err, DocumentStoreError::DuplicateKey { field: None, .. }));
        assert!(!err.is_duplicate_of("slug"));

        let err = store().map_sqlx_error("insert_one", server_error("23505", None));
        assert!(!err.is_duplicate_of("slug"));
    }

    #[test]
    fn other_server_errors_are_backend_errors() {
        let err = store().map_sqlx_error("find", server_error(UNDEFINED_TABLE, None));
        match err {
            DocumentStoreError::Backend(msg) => assert!(msg.contains(UNDEFINED_TABLE)),
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[test]
    fn connection_level_failures_are_unavailable() {
        let s = store();
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        for err in [sqlx::Error::PoolTimedOut, sqlx::Error::PoolClosed, sqlx::Error::Io(io)] {
            let mapped = s.map_sqlx_error("insert_one", err);
            assert!(matches!(mapped, DocumentStoreError::Unavailable(_)), "{mapped:?}");
        }

        let mapped = s.map_sqlx_error("find", sqlx::Error::RowNotFound);
        assert!(matches!(mapped, DocumentStoreError::Backend(_)));
    }

    #[test]
    fn index_only_covers_values_usable_as_keys() {
        let ddl = unique_index_ddl("jobs", "slug");
        assert!(ddl.contains(r#""jobs_slug_key" ON "jobs" ((document ->> 'slug'))"#));
        assert!(ddl.contains("jsonb_typeof(document -> 'slug') IN ('string', 'number', 'boolean')"));
        assert!(ddl.contains("document ->> 'slug' <> ''"));
    }
}
