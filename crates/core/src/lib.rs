//! `jobsink-core`: ingestion domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! records and their identity, backend-assigned document ids, per-record
//! outcomes and the error taxonomy every backend error is classified into.

pub mod error;
pub mod id;
pub mod outcome;
pub mod record;

pub use error::{ErrorKind, RecordError};
pub use id::DocumentId;
pub use outcome::{AdmitOutcome, RejectReason, SkipReason, StoreOutcome};
pub use record::{JOB_FIELDS, Record, RecordKey};
