//! Crawl-file record source.
//!
//! A crawl file is a JSON document shaped `{"jobs": [{"data": {...}}, ...]}`.
//! Each `data` object is projected onto [`JOB_FIELDS`]; anything else in the
//! posting is dropped, as are null fields.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{info, warn};

use jobsink_core::{JOB_FIELDS, Record};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected crawl file shape: {0}")]
    Shape(String),
}

/// Project a raw posting onto the job field list.
pub fn project_job(data: &Map<String, JsonValue>) -> Record {
    let mut record = Record::new();
    for field in JOB_FIELDS {
        match data.get(*field) {
            None | Some(JsonValue::Null) => {}
            Some(value) => record.insert(*field, value.clone()),
        }
    }
    record
}

/// Parse the contents of one crawl file.
///
/// Entries that are not objects, or that lack a `data` object, are skipped
/// with a warning.
pub fn parse_crawl(contents: &str) -> Result<Vec<Record>, SourceError> {
    let root: JsonValue = serde_json::from_str(contents)?;
    let jobs = match root.get("jobs") {
        Some(JsonValue::Array(jobs)) => jobs,
        Some(_) => return Err(SourceError::Shape("'jobs' is not a list".to_string())),
        None => return Err(SourceError::Shape("missing 'jobs'".to_string())),
    };

    let mut records = Vec::with_capacity(jobs.len());
    for (index, entry) in jobs.iter().enumerate() {
        match entry.get("data") {
            Some(JsonValue::Object(data)) => records.push(project_job(data)),
            _ => warn!(index, "crawl entry has no 'data' object; skipped"),
        }
    }
    Ok(records)
}

/// Read and parse one crawl file.
pub fn read_crawl_file(path: &Path) -> Result<Vec<Record>, SourceError> {
    let contents = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_crawl(&contents)
}

/// Read every file in order; unreadable or malformed files are logged and
/// skipped.
pub fn load_records<P: AsRef<Path>>(paths: &[P]) -> Vec<Record> {
    let mut records = Vec::new();
    for path in paths {
        let path = path.as_ref();
        match read_crawl_file(path) {
            Ok(mut batch) => {
                info!(path = %path.display(), records = batch.len(), "crawl file loaded");
                records.append(&mut batch);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "crawl file skipped"),
        }
    }
    records
}
