//! CSV export of stored job documents.

use std::io::Write;
use std::path::Path;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use jobsink_core::JOB_FIELDS;

use crate::document_store::{DocumentStore, DocumentStoreError, StoredDocument};

/// Separator used to flatten list values into one cell.
pub const LIST_SEPARATOR: &str = "|";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] DocumentStoreError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Render one field value as a CSV cell.
pub fn format_cell(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| format_cell(Some(item)))
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR),
        Some(other) => other.to_string(),
    }
}

/// Write `documents` as CSV with the job field list as header.
///
/// Returns the number of data rows written.
pub fn write_csv<W: Write>(documents: &[StoredDocument], out: W) -> Result<usize, ExportError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(JOB_FIELDS)?;

    for doc in documents {
        writer.write_record(JOB_FIELDS.iter().map(|field| format_cell(doc.record.get(field))))?;
    }
    writer.flush()?;
    Ok(documents.len())
}

/// Export every document in `collection` to a CSV file at `path`.
pub async fn export_collection<S>(store: &S, collection: &str, path: &Path) -> Result<usize, ExportError>
where
    S: DocumentStore + ?Sized,
{
    let projection: Vec<String> = JOB_FIELDS.iter().map(|f| f.to_string()).collect();
    let documents = store
        .find(collection, &Default::default(), Some(&projection))
        .await?;

    let file = std::fs::File::create(path)?;
    let rows = write_csv(&documents, file)?;
    info!(collection, rows, path = %path.display(), "collection exported");
    Ok(rows)
}
