//! Infrastructure layer: backend connections, dedup, storage, orchestration.
//!
//! Backends:
//! - Redis (feature `redis`): seen-sets for the dedup gate
//! - Postgres (feature `postgres`): JSONB document collections
//! - In-memory versions of both, for tests and local runs

pub mod cache;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod document_store;
pub mod export;
pub mod pipeline;
pub mod source;
pub mod store;


pub use cache::{CacheBackend, CacheError, InMemoryCache};
pub use config::{ConfigError, Settings};
pub use connection::{ConnectionManager, Dialer, Unavailable};
pub use dedup::DedupGate;
pub use document_store::{DocumentStore, DocumentStoreError, InMemoryDocumentStore, StoredDocument};
pub use pipeline::{IngestPipeline, PipelineError, PipelineStats, RecordOutcome, RunState};
pub use store::IdempotentStore;
