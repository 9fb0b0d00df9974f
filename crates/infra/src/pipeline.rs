//! Ingestion pipeline orchestrator.
//!
//! A run moves through `Idle → Open → Processing → Closed`. Each record goes
//! through the dedup gate and, unless it is a duplicate, the idempotent store.
//! A single record's failure never halts the run; only an unreachable
//! document store at `open` aborts it.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use jobsink_core::{AdmitOutcome, ErrorKind, Record, SkipReason, StoreOutcome};

use crate::cache::CacheBackend;
use crate::dedup::DedupGate;
use crate::document_store::{DocumentStore, DocumentStoreError};
use crate::store::IdempotentStore;

/// Lifecycle state of a pipeline run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Open,
    Processing,
    Closed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("document store unavailable at open: {0}")]
    StoreUnavailable(DocumentStoreError),

    #[error("pipeline is not open (state: {0:?})")]
    NotOpen(RunState),

    #[error("pipeline was already started (state: {0:?})")]
    AlreadyStarted(RunState),
}

impl PipelineError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PipelineError::StoreUnavailable(_) => Some(ErrorKind::BackendUnavailable),
            PipelineError::NotOpen(_) | PipelineError::AlreadyStarted(_) => None,
        }
    }
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub processed: u64,
    pub admitted: u64,
    pub duplicates: u64,
    pub inserted: u64,
    pub duplicate_key: u64,
    pub rejected: u64,
    pub skipped_no_id: u64,
    pub dedup_bypassed: u64,
}

/// What happened to one record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub admit: AdmitOutcome,
    /// `None` when the gate dropped the record as a duplicate.
    pub store: Option<StoreOutcome>,
}

/// Sequences the dedup gate and the idempotent store over one run.
#[derive(Debug)]
pub struct IngestPipeline<C, S> {
    gate: DedupGate<C>,
    store: IdempotentStore<S>,
    collection: String,
    namespace: Option<String>,
    state: RunState,
    stats: PipelineStats,
}

impl<C, S> IngestPipeline<C, S>
where
    C: CacheBackend,
    S: DocumentStore,
{
    pub fn new(gate: DedupGate<C>, store: IdempotentStore<S>, collection: impl Into<String>) -> Self {
        Self {
            gate,
            store,
            collection: collection.into(),
            namespace: None,
            state: RunState::Idle,
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Seen-set namespace of the current run, once opened.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Prime both backends and ensure the storage constraint.
    ///
    /// Fails only if the document store cannot be reached; an unreachable
    /// cache is tolerated (dedup then fails open per record).
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn open(&mut self, source: &str) -> Result<(), PipelineError> {
        if self.state != RunState::Idle {
            return Err(PipelineError::AlreadyStarted(self.state));
        }

        let namespace = self.gate.namespace_for(source);

        if let Err(e) = self.gate.cache().ping().await {
            warn!(namespace = %namespace, kind = %e.kind(), error = %e, "cache unavailable at open; continuing without dedup fast path");
        }

        if let Err(e) = self.store.backend().ping().await {
            warn!(kind = %e.kind(), error = %e, "document store unavailable at open; aborting run");
            return Err(PipelineError::StoreUnavailable(e));
        }

        // Failures are logged inside; setup is retried or skipped per record.
        let _ = self.store.ensure_constraint(&self.collection).await;

        info!(namespace = %namespace, "pipeline open");
        self.namespace = Some(namespace);
        self.state = RunState::Open;
        Ok(())
    }

    /// Run one record through the gate and the store.
    pub async fn process(&mut self, record: &Record) -> Result<RecordOutcome, PipelineError> {
        let namespace = match (&self.state, &self.namespace) {
            (RunState::Open | RunState::Processing, Some(ns)) => ns.clone(),
            _ => return Err(PipelineError::NotOpen(self.state)),
        };
        self.state = RunState::Processing;
        self.stats.processed += 1;

        let key = record.key(self.store.key_field());
        let admit = self.gate.admit(&namespace, key.as_ref()).await;

        match admit {
            AdmitOutcome::Duplicate => {
                self.stats.duplicates += 1;
                debug!(key = ?key, "duplicate dropped by gate");
                return Ok(RecordOutcome { admit, store: None });
            }
            AdmitOutcome::Admitted => self.stats.admitted += 1,
            AdmitOutcome::Skipped(SkipReason::NoKey) => {
                self.stats.skipped_no_id += 1;
                warn!(key_field = self.store.key_field(), "record has no unique key; storing without dedup");
            }
            AdmitOutcome::Skipped(_) => self.stats.dedup_bypassed += 1,
        }

        let stored = self.store.store(record, &self.collection).await;
        match stored {
            StoreOutcome::Inserted(_) => self.stats.inserted += 1,
            StoreOutcome::DuplicateKey => self.stats.duplicate_key += 1,
            StoreOutcome::Rejected(_) => self.stats.rejected += 1,
        }

        Ok(RecordOutcome {
            admit,
            store: Some(stored),
        })
    }

    /// Release both backends and emit the final counters.
    ///
    /// Safe in any state, including after a failed `open`; repeated calls
    /// only return the counters.
    pub async fn close(&mut self) -> PipelineStats {
        if self.state == RunState::Closed {
            return self.stats.clone();
        }

        self.gate.cache().release().await;
        self.store.backend().release().await;
        self.state = RunState::Closed;

        let s = &self.stats;
        info!(
            collection = %self.collection,
            namespace = self.namespace.as_deref().unwrap_or(""),
            processed = s.processed,
            admitted = s.admitted,
            duplicates = s.duplicates,
            inserted = s.inserted,
            duplicate_key = s.duplicate_key,
            rejected = s.rejected,
            skipped_no_id = s.skipped_no_id,
            dedup_bypassed = s.dedup_bypassed,
            "pipeline closed"
        );
        self.stats.clone()
    }

    /// Drive a full run: open, process every record, close.
    pub async fn run<I>(&mut self, source: &str, records: I) -> Result<PipelineStats, PipelineError>
    where
        I: IntoIterator<Item = Record>,
    {
        if let Err(e) = self.open(source).await {
            self.close().await;
            return Err(e);
        }
        for record in records {
            self.process(&record).await?;
        }
        Ok(self.close().await)
    }
}
