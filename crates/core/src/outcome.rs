//! Per-record outcomes of the dedup gate and the idempotent store.

use serde::Serialize;

use crate::error::ErrorKind;
use crate::id::DocumentId;

/// Why the dedup gate did not make a membership decision.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The record has no usable unique key.
    NoKey,
    /// The cache backend could not be acquired.
    BackendUnavailable,
    /// The cache backend failed a membership or insert command.
    BackendError,
}

impl SkipReason {
    pub fn kind(self) -> ErrorKind {
        match self {
            SkipReason::NoKey => ErrorKind::MalformedRecord,
            SkipReason::BackendUnavailable => ErrorKind::BackendUnavailable,
            SkipReason::BackendError => ErrorKind::BackendOperationError,
        }
    }
}

/// Result of asking the dedup gate whether a key has been seen.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum AdmitOutcome {
    /// This call performed the insertion into the seen-set.
    Admitted,
    /// The key was already present (or another admitter won the race).
    Duplicate,
    /// No decision was made; the record passes through (fail-open).
    Skipped(SkipReason),
}

impl AdmitOutcome {
    /// Whether the record continues on to storage.
    pub fn passes(self) -> bool {
        !matches!(self, AdmitOutcome::Duplicate)
    }
}

/// Why the idempotent store refused a record for reasons other than a
/// duplicate key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    BackendUnavailable,
    BackendError,
}

impl RejectReason {
    pub fn kind(self) -> ErrorKind {
        match self {
            RejectReason::BackendUnavailable => ErrorKind::BackendUnavailable,
            RejectReason::BackendError => ErrorKind::BackendOperationError,
        }
    }
}

/// Result of writing a record to the document store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum StoreOutcome {
    /// First writer: the document was inserted under this id.
    Inserted(DocumentId),
    /// The uniqueness constraint on the key field rejected the write.
    DuplicateKey,
    /// The write failed for another reason.
    Rejected(RejectReason),
}

impl StoreOutcome {
    pub fn inserted_id(&self) -> Option<DocumentId> {
        match self {
            StoreOutcome::Inserted(id) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_duplicates_are_dropped() {
        assert!(AdmitOutcome::Admitted.passes());
        assert!(AdmitOutcome::Skipped(SkipReason::NoKey).passes());
        assert!(AdmitOutcome::Skipped(SkipReason::BackendUnavailable).passes());
        assert!(!AdmitOutcome::Duplicate.passes());
    }

    #[test]
    fn reasons_map_onto_the_error_taxonomy() {
        assert_eq!(SkipReason::NoKey.kind(), ErrorKind::MalformedRecord);
        assert_eq!(SkipReason::BackendError.kind(), ErrorKind::BackendOperationError);
        assert_eq!(
            RejectReason::BackendUnavailable.kind(),
            ErrorKind::BackendUnavailable
        );
    }

    #[test]
    fn outcomes_serialize_with_tags() {
        let json = serde_json::to_value(AdmitOutcome::Skipped(SkipReason::NoKey)).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "skipped", "reason": "no_key"}));

        let json = serde_json::to_value(StoreOutcome::DuplicateKey).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "duplicate_key"}));
    }
}
